//! The landing page and requests to the listener root.

use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Response};

use crate::handlers::{archive, ws};
use crate::state::GatewayState;

/// The static landing page, read at compile time.
const LANDING_PAGE: &str = include_str!("../../assets/index.html");

/// Handle requests to `/`.
///
/// With subdomain addressing active, the root of a key-labelled host is the
/// archive's own root. Otherwise plain GETs receive the landing page and
/// WebSocket upgrades are refused: replication needs an archive key.
pub async fn root(
    State(state): State<GatewayState>,
    ws: Option<WebSocketUpgrade>,
    headers: HeaderMap,
) -> Response {
    if let Some(address) = archive::subdomain_address(&state, &headers) {
        return archive::serve_target(state, ws, headers, address, String::new(), "/", true)
            .await;
    }

    match ws {
        Some(upgrade) => ws::missing_key(upgrade),
        None => Html(LANDING_PAGE).into_response(),
    }
}
