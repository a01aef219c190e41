//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID and trace layers)
//!     → [route table lookup, identity, rate limit]
//!     → proxy.rs (rewrite onto the upstream, stream both ways)
//!     → response.rs (map rejections to status codes)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use proxy::{Dispatcher, UpstreamError};
pub use request::{request_id, MakeRequestUuid, X_REQUEST_ID};
pub use response::GatewayError;
pub use server::{build_router, AppState, HttpServer};
