//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (who is asking: peer IP or forwarding header)
//!     → rate_limit.rs (per client, per route fixed window)
//!     → headers.rs (X-Forwarded-For, hop-by-hop stripping)
//!     → Pass to the dispatcher
//! ```
//!
//! # Design Decisions
//! - Fail closed: a limiter that cannot reach its store rejects the request
//! - Unknown identities are rejected before any quota is charged

pub mod headers;
pub mod identity;
pub mod rate_limit;

pub use identity::{ClientIdentity, IdentityError};
pub use rate_limit::{RateLimitKey, RateLimitPolicy, RateLimitResult, RateLimitUnit, RateLimiter};
