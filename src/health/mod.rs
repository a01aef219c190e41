//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Orchestrator probe (GET)
//!     → livenessProbe:  process is up, no dependency check
//!     → readinessProbe: counter store answers PING
//!     → startupProbe:   counter store accepts a write and reads it back
//! ```
//!
//! # Design Decisions
//! - Probes report the counter store only; the upstream has its own probes
//! - Probe requests are neither rate limited nor traced

pub mod probes;

pub const LIVENESS_PATH: &str = "/v1/healthcheck/livenessProbe";
pub const READINESS_PATH: &str = "/v1/healthcheck/readinessProbe";
pub const STARTUP_PATH: &str = "/v1/healthcheck/startupProbe";
