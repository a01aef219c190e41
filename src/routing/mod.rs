//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Registration (at startup):
//!     upstream address + patterns
//!     → RouteTableBuilder::register (validate URL, last write wins)
//!     → build() → immutable RouteTable, shared via Arc
//!
//! Incoming Request (path)
//!     → RouteTable::lookup (exact, case-sensitive)
//!     → Return: bound Upstream or NoMatch
//! ```
//!
//! # Design Decisions
//! - Patterns are exact keys: no prefixes, no wildcards
//! - Immutable after construction (thread-safe without locks)
//! - A malformed upstream aborts startup instead of being skipped

pub mod router;

pub use router::{RouteTable, RouteTableBuilder, Upstream};

/// Record creation endpoint of the dogfood backend.
pub const CREATE_RECORD_PATH: &str = "/v1/dogfood/record";

/// Record listing endpoint of the dogfood backend.
pub const LIST_RECORDS_PATH: &str = "/v1/dogfood/records";
