//! HTTP server setup and request handling.
//!
//! # Responsibilities
//! - Create the Axum Router with probe routes and the proxy fallback
//! - Wire up middleware (tracing, request ID)
//! - Run each request through route → identity → rate limit → proxy
//! - Attach rate-limit headers and record metrics on the way out
//!
//! # Request States
//! ```text
//! Received → Routed → IdentityResolved → RateChecked → Proxied → Responded
//!               │            │                 │           │
//!               └────────────┴─────────────────┴───────────┴──→ Rejected(reason)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::Instrument;

use crate::config::TimeoutConfig;
use crate::health::{probes, LIVENESS_PATH, READINESS_PATH, STARTUP_PATH};
use crate::http::proxy::Dispatcher;
use crate::http::request::{request_id, MakeRequestUuid};
use crate::http::response::GatewayError;
use crate::observability::metrics;
use crate::observability::tracing::{Hop, Tracer};
use crate::routing::RouteTable;
use crate::security::identity;
use crate::security::rate_limit::{RateLimitKey, RateLimitPolicy, RateLimitResult, RateLimiter};
use crate::store::{CounterStore, StoreError};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub limiter: RateLimiter,
    pub store: Arc<dyn CounterStore>,
    pub dispatcher: Dispatcher,
    pub tracer: Option<Arc<Tracer>>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        routes: RouteTable,
        store: Arc<dyn CounterStore>,
        policy: RateLimitPolicy,
        tracer: Option<Tracer>,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self {
            routes: Arc::new(routes),
            limiter: RateLimiter::new(store.clone(), policy),
            store,
            dispatcher: Dispatcher::new(timeouts.connect()),
            tracer: tracer.map(Arc::new),
            request_timeout: timeouts.request(),
        }
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            router: build_router(state),
        }
    }

    /// The fully layered router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(LIVENESS_PATH, get(probes::liveness))
        .route(READINESS_PATH, get(probes::readiness))
        .route(STARTUP_PATH, get(probes::startup))
        .fallback(proxy_handler)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// Main proxy handler.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = std::time::Instant::now();
    let deadline = Instant::now() + state.request_timeout;
    let path = request.uri().path().to_string();
    let method = request.method().to_string();
    let request_id = request_id(request.headers()).to_string();

    let hop = state
        .tracer
        .as_ref()
        .map(|tracer| tracer.start_hop(request.headers(), &path));
    let span = match &hop {
        Some(hop) => hop.span().clone(),
        None => tracing::info_span!("gateway.request", resource = %path),
    };

    let mut quota = None;
    let outcome = handle(&state, request, hop.as_ref(), deadline, &mut quota)
        .instrument(span.clone())
        .await;

    let mut response = match outcome {
        Ok(response) => response,
        Err(err) => {
            span.in_scope(|| log_rejection(&err, &request_id));
            err.into_response()
        }
    };
    if let Some(quota) = quota {
        quota.apply_headers(response.headers_mut());
    }

    let route = if state.routes.lookup(&path).is_some() {
        path.as_str()
    } else {
        metrics::UNMATCHED_ROUTE
    };
    metrics::record_request(route, &method, response.status().as_u16(), start_time);

    response
}

async fn handle(
    state: &AppState,
    mut request: Request<Body>,
    hop: Option<&Hop>,
    deadline: Instant,
    quota: &mut Option<RateLimitResult>,
) -> Result<Response, GatewayError> {
    let pattern = request.uri().path().to_string();

    let upstream = state
        .routes
        .lookup(&pattern)
        .cloned()
        .ok_or_else(|| GatewayError::RouteNotFound(pattern.clone()))?;

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = identity::resolve(peer, request.headers())?;

    let key = RateLimitKey::new(&identity, &pattern);
    let ratelimit_span = tracing::info_span!(
        "ratelimit",
        service = %state
            .tracer
            .as_ref()
            .map(|t| t.service_with_suffix(".ratelimit"))
            .unwrap_or_else(|| "ratelimit".to_string()),
        key = %key
    );
    let checked = tokio::time::timeout_at(deadline, state.limiter.check(&key))
        .instrument(ratelimit_span)
        .await
        .unwrap_or(Err(StoreError::Timeout));
    let decision = match checked {
        Ok(decision) => decision,
        Err(source) => {
            metrics::record_store_error("increment");
            return Err(GatewayError::RateLimitStore {
                identity,
                pattern,
                source,
            });
        }
    };
    *quota = Some(decision);

    if !decision.allowed {
        metrics::record_rate_limited(&pattern);
        return Err(GatewayError::RateLimitExceeded(decision));
    }

    if let (Some(tracer), Some(hop)) = (state.tracer.as_ref(), hop) {
        tracer.inject(hop, request.headers_mut());
    }

    tracing::info!(
        pattern = %pattern,
        upstream = %upstream,
        client = %identity,
        remaining = decision.remaining,
        "reverse proxy: {} to {}",
        pattern,
        upstream
    );

    let response = state
        .dispatcher
        .forward(&upstream, &identity, request, deadline)
        .await?;
    Ok(response)
}

fn log_rejection(err: &GatewayError, request_id: &str) {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!(
            request_id = %request_id,
            stage = err.stage(),
            status = status.as_u16(),
            error = %err,
            "Request failed"
        );
    } else {
        tracing::warn!(
            request_id = %request_id,
            stage = err.stage(),
            status = status.as_u16(),
            error = %err,
            "Request rejected"
        );
    }
}
