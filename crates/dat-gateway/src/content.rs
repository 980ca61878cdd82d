//! Serving archive content over HTTP.
//!
//! This module answers GET requests against a materialized drive:
//! files with content types, validators, and single-range support;
//! directories with an `index.html` fallback or a generated listing.
//! Responses stream nothing the drive has not produced; the body is the
//! drive's own bytes handle.

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use dat_gateway_registry::LiveArchive;
use dat_gateway_swarm::{normalize_path, DirEntry, Drive};

/// What a `Range` header asked for.
enum RangeRequest {
    /// No usable range; serve the whole file.
    Full,
    /// A satisfiable byte range, inclusive.
    Partial(u64, u64),
    /// A syntactically valid but unsatisfiable range.
    Unsatisfiable,
}

/// Serve `subpath` from an archive.
///
/// `request_path` is the path of the incoming request, used to redirect
/// directory URLs to their trailing-slash form so relative links resolve.
pub async fn respond(
    archive: &LiveArchive,
    subpath: &str,
    request_path: &str,
    headers: &HeaderMap,
) -> Response {
    // An archive that never materialized has nothing to serve.
    let Some(drive) = archive.drive() else {
        return not_found();
    };

    let path = normalize_path(subpath);
    let stat = match drive.stat(&path).await {
        Ok(stat) => stat,
        Err(_) => return not_found(),
    };

    if stat.is_directory {
        let index = if path.is_empty() {
            "index.html".to_string()
        } else {
            format!("{path}/index.html")
        };
        if drive.read_file(&index).await.is_ok() {
            return serve_file(drive.as_ref(), &index, headers).await;
        }
        if !request_path.ends_with('/') {
            return redirect_to(&format!("{request_path}/"));
        }
        return match drive.read_dir(&path).await {
            Ok(entries) => listing(&path, &entries),
            Err(_) => not_found(),
        };
    }

    serve_file(drive.as_ref(), &path, headers).await
}

/// A plain 404 in the gateway's house style.
#[must_use]
pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

async fn serve_file(drive: &dyn Drive, path: &str, headers: &HeaderMap) -> Response {
    let data = match drive.read_file(path).await {
        Ok(data) => data,
        Err(_) => return not_found(),
    };

    let etag = etag(drive, path);

    if headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|candidate| candidate.trim() == etag))
    {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, &etag)
            .body(Body::empty())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let content_type = mime_guess::from_path(path).first_or_octet_stream();
    let total = data.len() as u64;
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map_or(RangeRequest::Full, |v| parse_range(v, total));

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::ETAG, &etag)
        .header(header::ACCEPT_RANGES, "bytes");

    let response = match range {
        RangeRequest::Full => builder.status(StatusCode::OK).body(Body::from(data)),
        RangeRequest::Partial(start, end) => {
            let slice = data.slice(start as usize..=end as usize);
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"))
                .body(Body::from(slice))
        }
        RangeRequest::Unsatisfiable => builder
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{total}"))
            .body(Body::empty()),
    };

    response.unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// The strong validator for one file: the drive is an immutable snapshot,
/// so key, version, and path together identify the representation. The
/// path goes in hashed, keeping the tag short for deep trees.
fn etag(drive: &dyn Drive, path: &str) -> String {
    let path_hash = blake3::hash(path.as_bytes()).to_hex();
    format!(
        "\"{}-{}-{}\"",
        &drive.key().to_hex()[..8],
        drive.version(),
        &path_hash[..8]
    )
}

/// Parse a `Range` header against a file of `total` bytes. Only single
/// byte ranges are honored; anything else falls back to a full response.
fn parse_range(value: &str, total: u64) -> RangeRequest {
    let Some(spec) = value.strip_prefix("bytes=") else {
        return RangeRequest::Full;
    };
    if spec.contains(',') {
        return RangeRequest::Full;
    }
    let Some((start, end)) = spec.trim().split_once('-') else {
        return RangeRequest::Full;
    };

    match (start, end) {
        // bytes=-N : the final N bytes
        ("", suffix) => match suffix.parse::<u64>() {
            Ok(n) if n > 0 && total > 0 => {
                RangeRequest::Partial(total.saturating_sub(n), total - 1)
            }
            Ok(_) => RangeRequest::Unsatisfiable,
            Err(_) => RangeRequest::Full,
        },
        // bytes=N- : from N to the end
        (from, "") => match from.parse::<u64>() {
            Ok(start) if start < total => RangeRequest::Partial(start, total - 1),
            _ => RangeRequest::Unsatisfiable,
        },
        // bytes=N-M
        (from, to) => match (from.parse::<u64>(), to.parse::<u64>()) {
            (Ok(start), Ok(end)) if start <= end && start < total => {
                RangeRequest::Partial(start, end.min(total - 1))
            }
            (Ok(_), Ok(_)) => RangeRequest::Unsatisfiable,
            _ => RangeRequest::Full,
        },
    }
}

/// Render a directory listing. Links are relative, which is correct for
/// both path and subdomain addressing once the URL ends with a slash.
fn listing(path: &str, entries: &[DirEntry]) -> Response {
    let title = if path.is_empty() { "/" } else { path };
    let mut html = String::from("<!doctype html>\n<html>\n<head><meta charset=\"utf-8\">");
    html.push_str(&format!("<title>Index of {title}</title></head>\n<body>\n"));
    html.push_str(&format!("<h1>Index of {title}</h1>\n<ul>\n"));
    if !path.is_empty() {
        html.push_str("<li><a href=\"../\">..</a></li>\n");
    }
    for entry in entries {
        if entry.is_directory {
            html.push_str(&format!(
                "<li><a href=\"{name}/\">{name}/</a></li>\n",
                name = entry.name
            ));
        } else {
            html.push_str(&format!(
                "<li><a href=\"{name}\">{name}</a> ({size} bytes)</li>\n",
                name = entry.name,
                size = entry.size
            ));
        }
    }
    html.push_str("</ul>\n</body>\n</html>\n");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(Bytes::from(html)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn redirect_to(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
