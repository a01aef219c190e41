//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve configuration into a route table, limiter and tracer
//! - Open the counter store and report whether it answers
//! - Start the metrics exporter when configured
//! - Bind the listener and serve until a termination signal
//!
//! # Design Decisions
//! - Fail fast: any configuration error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use super::shutdown::Shutdown;
use super::signals;
use crate::config::{ConfigError, GatewayConfig};
use crate::http::{AppState, HttpServer};
use crate::observability::metrics;
use crate::observability::tracing::Tracer;
use crate::routing::{RouteTable, CREATE_RECORD_PATH, LIST_RECORDS_PATH};
use crate::store::{CounterStore, RedisStore, StoreError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot open counter store: {0}")]
    Store(#[from] StoreError),

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("cannot start metrics exporter: {0}")]
    Metrics(String),

    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Bind every dogfood endpoint to the backend.
pub fn register_routes(backend_addr: &str) -> Result<RouteTable, ConfigError> {
    let table = RouteTable::builder()
        .register(backend_addr, &[CREATE_RECORD_PATH, LIST_RECORDS_PATH])?
        .build();
    tracing::info!(routes = table.len(), "Route table built");
    Ok(table)
}

/// Build the shared request state from configuration.
pub async fn build_state(config: &GatewayConfig) -> Result<AppState, StartupError> {
    let routes = register_routes(&config.backend_addr)?;

    let url = config.redis.connection_url()?;
    let store: Arc<dyn CounterStore> = Arc::new(
        RedisStore::open(url.as_str())?
            .with_timeouts(config.timeouts.connect(), config.timeouts.connect()),
    );
    match tokio::time::timeout(config.timeouts.connect(), store.ping()).await {
        Ok(Ok(())) => tracing::info!(
            host = %config.redis.host,
            port = config.redis.port(),
            db = config.redis.db,
            "Counter store reachable"
        ),
        Ok(Err(e)) => tracing::warn!(error = %e, "Counter store unreachable at startup"),
        Err(_) => tracing::warn!("Counter store did not answer before the connect timeout"),
    }

    let policy = config.rate_limit.policy();
    tracing::info!(policy = %policy, "Rate limit policy loaded");

    let tracer = Tracer::from_style(
        config.observability.service_name.clone(),
        config.observability.trace_propagation,
    );
    match &tracer {
        Some(tracer) => tracing::info!(
            service = tracer.service(),
            style = ?config.observability.trace_propagation,
            "Trace propagation enabled"
        ),
        None => tracing::info!("Trace propagation disabled"),
    }

    Ok(AppState::new(routes, store, policy, tracer, &config.timeouts))
}

/// Run the gateway until SIGINT or SIGTERM.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    let listen_addr = config.listen_addr()?;
    let state = build_state(&config).await?;

    if let Some(addr) = config.observability.metrics_addr {
        metrics::init_metrics(addr).map_err(StartupError::Metrics)?;
    }

    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: listen_addr,
            source,
        })?;

    let shutdown = Shutdown::new();
    let signal_task = signals::spawn_signal_listener(shutdown.clone());

    let result = HttpServer::new(state)
        .run(listener, shutdown.subscribe())
        .await
        .map_err(StartupError::Serve);

    signal_task.abort();
    result
}
