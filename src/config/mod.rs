//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! environment variables / command-line flags
//!     → schema.rs (clap derive, `env` fallbacks)
//!     → GatewayConfig (immutable for the process lifetime)
//!     → lifecycle::startup hands the pieces to each subsystem
//! ```
//!
//! # Design Decisions
//! - Required values abort startup when missing
//! - Rate-limit values never abort startup; bad input falls back to 60/hour
//! - The rate-limit policy is resolved once, not on every request

pub mod schema;

use thiserror::Error;

pub use schema::{GatewayConfig, ObservabilityConfig, RateLimitConfig, RedisConfig, TimeoutConfig};

/// Fatal configuration problems detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address {addr:?}: expected a port or host:port")]
    ListenAddress { addr: String },

    #[error("target host {addr:?} is invalid: {reason}")]
    InvalidUpstream { addr: String, reason: String },

    #[error("invalid counter store parameters: {0}")]
    Store(String),
}
