//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::ConnectInfo,
    http::{HeaderMap, Method, Request, StatusCode, Uri},
    Router,
};
use tokio::net::TcpListener;

use dogfood_gateway::config::TimeoutConfig;
use dogfood_gateway::http::AppState;
use dogfood_gateway::observability::tracing::Tracer;
use dogfood_gateway::routing::{RouteTable, CREATE_RECORD_PATH, LIST_RECORDS_PATH};
use dogfood_gateway::security::rate_limit::RateLimitPolicy;
use dogfood_gateway::store::{CounterStore, StoreError, WindowCount};

/// A backend that answers every request with what it received.
///
/// The body is `"{method} {uri}"`, one `"name: value"` line per header, a
/// blank line, then the request body.
pub struct EchoBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl EchoBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub async fn start_echo_backend() -> EchoBackend {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    let app = Router::new().fallback(move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut out = format!("{method} {uri}\n");
            for (name, value) in &headers {
                out.push_str(&format!("{}: {}\n", name, value.to_str().unwrap_or("<binary>")));
            }
            out.push('\n');
            out.push_str(&String::from_utf8_lossy(&body));
            out
        }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    EchoBackend { addr, hits }
}

/// A backend that always answers with `status` and `body`.
pub async fn start_status_backend(status: StatusCode, body: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move || async move { (status, body) });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A counter store whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingStore;

#[async_trait]
impl CounterStore for FailingStore {
    async fn increment(&self, _key: &str, _window: Duration) -> Result<WindowCount, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// Gateway state with both dogfood routes bound to `backend`.
pub fn gateway_state(
    backend: &str,
    store: Arc<dyn CounterStore>,
    policy: RateLimitPolicy,
    tracer: Option<Tracer>,
) -> AppState {
    let routes = RouteTable::builder()
        .register(backend, &[CREATE_RECORD_PATH, LIST_RECORDS_PATH])
        .unwrap()
        .build();
    let timeouts = TimeoutConfig {
        request_secs: 5,
        connect_secs: 1,
    };
    AppState::new(routes, store, policy, tracer, &timeouts)
}

/// A request as if it arrived over a socket from `ip`.
pub fn request_from(ip: &str, method: Method, uri: &str, body: impl Into<Body>) -> Request<Body> {
    let ip: IpAddr = ip.parse().unwrap();
    Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(SocketAddr::new(ip, 40000)))
        .body(body.into())
        .unwrap()
}

pub async fn body_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Value of `name` in an echoed request, if the backend saw it.
pub fn echoed_header<'a>(echo: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("{name}: ");
    echo.lines()
        .take_while(|line| !line.is_empty())
        .find_map(|line| line.strip_prefix(prefix.as_str()))
}
