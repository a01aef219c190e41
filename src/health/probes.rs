//! Kubernetes-style probe handlers.

use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::STARTUP_PATH;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::store::StoreError;

/// Upper bound on a probe's store round trip.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Always healthy while the process serves HTTP.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Healthy when the counter store answers a ping.
pub async fn readiness(State(state): State<AppState>) -> Response {
    let ping = tokio::time::timeout(PROBE_TIMEOUT, state.store.ping())
        .await
        .unwrap_or(Err(StoreError::Timeout));

    match ping {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "readiness probe failed");
            metrics::record_store_error("ping");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("readiness probe failed: {e}"),
            )
                .into_response()
        }
    }
}

/// Healthy when a short-lived write can be read back from the counter store.
pub async fn startup(State(state): State<AppState>) -> Response {
    let check = async {
        state.store.set(STARTUP_PATH, "true", Duration::from_secs(1)).await?;
        state.store.get(STARTUP_PATH).await
    };

    match tokio::time::timeout(PROBE_TIMEOUT, check)
        .await
        .unwrap_or(Err(StoreError::Timeout))
    {
        Ok(Some(_)) => StatusCode::OK.into_response(),
        Ok(None) => {
            tracing::error!("startup probe failed: probe key vanished");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "startup probe failed: written key could not be read back",
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "startup probe failed");
            metrics::record_store_error("startup_probe");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("startup probe failed: {e}"),
            )
                .into_response()
        }
    }
}
