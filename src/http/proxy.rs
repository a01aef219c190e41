//! Reverse proxy dispatch.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the route's upstream
//! - Forward method, headers, query and streamed body
//! - Relay upstream status, headers and streamed body
//!
//! # Design Decisions
//! - One upstream per route: no retries, no failover
//! - The per-request deadline bounds the wait for response headers
//! - Bodies are streamed in both directions, never buffered

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, Response, StatusCode, Version},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::time::Instant;

use crate::routing::Upstream;
use crate::security::headers::{append_forwarded_for, strip_hop_by_hop};
use crate::security::identity::ClientIdentity;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream {upstream} is unavailable: {source}")]
    Unavailable {
        upstream: String,
        source: hyper_util::client::legacy::Error,
    },

    #[error("request to upstream {upstream} failed: {source}")]
    Failed {
        upstream: String,
        source: hyper_util::client::legacy::Error,
    },

    #[error("upstream {upstream} did not respond before the request deadline")]
    Timeout { upstream: String },

    #[error("cannot build upstream request: {0}")]
    InvalidTarget(#[from] axum::http::Error),
}

impl UpstreamError {
    pub fn status(&self) -> StatusCode {
        match self {
            UpstreamError::Unavailable { .. } | UpstreamError::Failed { .. } => StatusCode::BAD_GATEWAY,
            UpstreamError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            UpstreamError::InvalidTarget(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Forwards admitted requests over a shared, pooled HTTP/1.1 client.
#[derive(Clone)]
pub struct Dispatcher {
    client: Client<HttpConnector, Body>,
}

impl Dispatcher {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }

    /// Send `request` to `upstream` and hand back its response untouched
    /// apart from hop-by-hop headers.
    pub async fn forward(
        &self,
        upstream: &Upstream,
        client_ip: &ClientIdentity,
        request: Request<Body>,
        deadline: Instant,
    ) -> Result<Response<Body>, UpstreamError> {
        let (mut parts, body) = request.into_parts();
        parts.uri = upstream.target_uri(&parts.uri)?;
        parts.version = Version::HTTP_11;
        strip_hop_by_hop(&mut parts.headers);
        append_forwarded_for(&mut parts.headers, client_ip);

        let outbound = Request::from_parts(parts, body);

        let response: Response<hyper::body::Incoming> =
            match tokio::time::timeout_at(deadline, self.client.request(outbound)).await {
                Ok(Ok(response)) => response,
                Ok(Err(source)) if source.is_connect() => {
                    return Err(UpstreamError::Unavailable {
                        upstream: upstream.to_string(),
                        source,
                    });
                }
                Ok(Err(source)) => {
                    return Err(UpstreamError::Failed {
                        upstream: upstream.to_string(),
                        source,
                    });
                }
                Err(_) => {
                    return Err(UpstreamError::Timeout {
                        upstream: upstream.to_string(),
                    });
                }
            };

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
