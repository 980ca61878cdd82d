//! Archive request handling: addressing, resolution, and serving.

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use dat_gateway_core::{ArchiveKey, BASE32_KEY_LEN};
use dat_gateway_swarm::normalize_path;

use crate::content;
use crate::error::GatewayError;
use crate::handlers::ws;
use crate::state::GatewayState;

/// Handle `GET /<address>[/<subpath>]` and WebSocket upgrades on the same
/// paths.
pub async fn serve(
    State(state): State<GatewayState>,
    upgrade: Option<WebSocketUpgrade>,
    Path(path): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let request_path = uri.path().to_string();

    let (address, subpath, from_host) = match subdomain_address(&state, &headers) {
        // The hostname label is the address; the whole path is the subpath.
        Some(address) => (address, path, true),
        None => match path.split_once('/') {
            Some((address, rest)) => (address.to_string(), rest.to_string(), false),
            None => (path, String::new(), false),
        },
    };

    serve_target(state, upgrade, headers, address, subpath, &request_path, from_host).await
}

/// Serve one addressed request, HTTP or WebSocket.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn serve_target(
    state: GatewayState,
    upgrade: Option<WebSocketUpgrade>,
    headers: HeaderMap,
    address: String,
    subpath: String,
    request_path: &str,
    from_host: bool,
) -> Response {
    // Upgrades are answered on the socket, even when the address is
    // missing: the handshake completes and the stream is closed with the
    // reason.
    if let Some(upgrade) = upgrade {
        if address.is_empty() {
            return ws::missing_key(upgrade);
        }
        return ws::replicate(state, upgrade, address);
    }

    if address.is_empty() {
        return content::not_found();
    }

    // The resolved record endpoint materializes nothing.
    if normalize_path(&subpath) == ".well-known/dat" {
        return well_known(&state, &address).await;
    }

    // Path-addressed archive on a redirecting gateway: send the client to
    // the key's own subdomain.
    if state.config.redirect && !from_host && ArchiveKey::from_base32(&address).is_err() {
        return subdomain_redirect(&state, &headers, &address, &subpath).await;
    }

    let fut = async {
        let key = state.resolver.resolve(&address).await?;
        let archive = state.registry.get_or_admit(key).await?;
        Ok::<_, GatewayError>(content::respond(&archive, &subpath, request_path, &headers).await)
    };

    match tokio::time::timeout(state.config.request_timeout(), fut).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => e.into_response(),
        Err(_) => {
            tracing::debug!(address = %address, "archive request timed out");
            GatewayError::NotFound.into_response()
        }
    }
}

/// Answer `/<address>/.well-known/dat` with the resolved Dat record.
async fn well_known(state: &GatewayState, address: &str) -> Response {
    match state.resolver.resolve(address).await {
        Ok(key) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("dat://{}\nttl=3600", key.to_hex()),
        )
            .into_response(),
        Err(e) => GatewayError::Resolution(e).into_response(),
    }
}

/// 302 to `http://<base32-key>.<host>/<subpath>`.
async fn subdomain_redirect(
    state: &GatewayState,
    headers: &HeaderMap,
    address: &str,
    subpath: &str,
) -> Response {
    let Some(host) = host_header(headers) else {
        return GatewayError::Internal("missing Host header".to_string()).into_response();
    };

    match state.resolver.resolve(address).await {
        Ok(key) => {
            let location = format!("http://{}.{host}/{subpath}", key.to_base32());
            (
                StatusCode::FOUND,
                [(header::LOCATION, location)],
                "",
            )
                .into_response()
        }
        Err(e) => GatewayError::Resolution(e).into_response(),
    }
}

/// The address carried by the leading hostname label, when subdomain
/// addressing is active. Only labels of exactly the base32 key length
/// decode as keys.
pub(crate) fn subdomain_address(state: &GatewayState, headers: &HeaderMap) -> Option<String> {
    if !state.config.redirect {
        return None;
    }
    let host = host_header(headers)?;
    let hostname = host.split(':').next()?;
    let label = hostname.split('.').next()?;
    (label.len() == BASE32_KEY_LEN && ArchiveKey::from_base32(label).is_ok())
        .then(|| label.to_string())
}

fn host_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST)?.to_str().ok()
}
