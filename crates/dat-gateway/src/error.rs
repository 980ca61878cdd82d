//! Gateway error type and its HTTP mapping.
//!
//! Resolution and admission errors are caught at the front-end boundary and
//! translated to the gateway's plain-text responses: `404 Not found` for
//! archives or paths that cannot be served, `500 Server error` for
//! everything else.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use dat_gateway_dns::DnsError;
use dat_gateway_registry::RegistryError;

/// Errors surfaced by the HTTP and WebSocket front ends.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The archive or path cannot be served.
    #[error("not found")]
    NotFound,

    /// Address resolution failed.
    #[error("resolution failed: {0}")]
    Resolution(#[from] DnsError),

    /// The registry failed to admit or evict.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Resolution(_) | Self::Registry(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::NOT_FOUND {
            (status, "Not found").into_response()
        } else {
            tracing::warn!(error = %self, "request failed");
            (status, "Server error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(GatewayError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            GatewayError::Resolution(DnsError::InvalidAddress("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
