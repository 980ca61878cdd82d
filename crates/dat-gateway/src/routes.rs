//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{archive, health, landing};
use crate::state::GatewayState;

/// Outer request deadline, a backstop behind the per-request archive
/// timeout.
const OUTER_TIMEOUT: Duration = Duration::from_secs(30);

/// Create the gateway router with all routes and middleware.
///
/// # Routes
///
/// - `GET /` - Landing page (or archive root under subdomain addressing)
/// - `GET /healthz` - Health check
/// - `GET /<address>[/<subpath>]` - Archive content
/// - `GET /<address>/.well-known/dat` - Resolved Dat record
/// - WebSocket upgrade on `/<address>` - Replication proxy
///
/// Every response carries `Access-Control-Allow-Origin: *`.
pub fn create_router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(landing::root))
        .route("/healthz", get(health::health))
        .route("/*path", get(archive::serve))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .layer(TimeoutLayer::new(OUTER_TIMEOUT))
        .with_state(state)
}

/// Archives are public content: any origin may read them.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
