//! Dogfood edge gateway.
//!
//! A small reverse proxy in front of the dogfood backend that limits each
//! client to a fixed number of requests per window.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────▶ http::server ──▶ routing ──▶ security::identity ──▶ security::rate_limit
//!                                                                      │
//!                                                                      ▼
//!                                                               store (Redis)
//!                                                                      │
//!     Client Response                                                  ▼
//!     ◀────── http::response ◀──── http::proxy ◀─── observability::tracing (inject)
//!                                     │
//!                                     └──▶ dogfood backend
//!
//!     health::probes ──▶ store (PING / write-read)
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod routing;
pub mod store;

// Traffic management
pub mod health;
pub mod security;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
