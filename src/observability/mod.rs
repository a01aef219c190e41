//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!     → tracing.rs (hop spans, trace context propagation)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Upstream service (continues the trace)
//! ```
//!
//! # Design Decisions
//! - Trace ids flow into log lines through the request span
//! - Failures here are logged and swallowed, never turned into responses

pub mod logging;
pub mod metrics;
pub mod tracing;
