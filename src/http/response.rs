//! Response handling and error mapping.
//!
//! # Responsibilities
//! - Map per-request failures to HTTP status codes and plain-text bodies
//! - Attach rate-limit headers to rejections
//!
//! # Design Decisions
//! - Every per-request error ends here; nothing escapes the request
//! - Upstream dial/transport failures are 502, deadline expiry is 504

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::http::proxy::UpstreamError;
use crate::security::identity::{ClientIdentity, IdentityError};
use crate::security::rate_limit::RateLimitResult;
use crate::store::StoreError;

/// Why a request did not reach (or come back from) the upstream.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0} is not found")]
    RouteNotFound(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("failed to allow request to {pattern} from {identity}: {source}")]
    RateLimitStore {
        identity: ClientIdentity,
        pattern: String,
        source: StoreError,
    },

    #[error("exceeds rate limit, retry after {} second(s)", .0.retry_after_secs())]
    RateLimitExceeded(RateLimitResult),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Identity(_) => StatusCode::BAD_REQUEST,
            GatewayError::RateLimitStore { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Upstream(e) => e.status(),
        }
    }

    /// Request stage at which the request was turned away.
    pub fn stage(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound(_) => "routed",
            GatewayError::Identity(_) => "identity_resolved",
            GatewayError::RateLimitStore { .. } | GatewayError::RateLimitExceeded(_) => "rate_checked",
            GatewayError::Upstream(_) => "proxied",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.to_string()));
        *response.status_mut() = self.status();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        if let GatewayError::RateLimitExceeded(result) = &self {
            result.apply_headers(response.headers_mut());
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::rate_limit::{X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
    use std::time::Duration;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_not_found() {
        let response = GatewayError::RouteNotFound("/v1/unknown".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "/v1/unknown is not found");
    }

    #[tokio::test]
    async fn test_bad_identity() {
        let response = GatewayError::from(IdentityError::Missing).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "ip address is missing");
    }

    #[tokio::test]
    async fn test_rate_limited_sets_headers() {
        let result = RateLimitResult {
            allowed: false,
            remaining: 0,
            retry_after: Duration::from_secs(42),
        };
        let response = GatewayError::RateLimitExceeded(result).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "0");
        assert_eq!(response.headers()[X_RATELIMIT_RESET], "42");
        assert_eq!(body_text(response).await, "exceeds rate limit, retry after 42 second(s)");
    }

    #[test]
    fn test_store_failure_is_internal_error() {
        let err = GatewayError::RateLimitStore {
            identity: ClientIdentity::new("192.0.2.1".parse().unwrap()),
            pattern: "/v1/dogfood/record".into(),
            source: StoreError::Timeout,
        };
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.stage(), "rate_checked");
    }
}
