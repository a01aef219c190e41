//! Shared counter store.
//!
//! # Data Flow
//! ```text
//! security::rate_limit (allow)
//!     → CounterStore::increment (atomic INCR + expire-on-first)
//!     → WindowCount { count, reset_after }
//!
//! health probes
//!     → CounterStore::ping / set / get
//! ```
//!
//! # Design Decisions
//! - Window state lives in the store, never in the gateway process
//! - Atomicity is the store's job; callers hold no locks
//! - Every failure is surfaced as `StoreError`, callers decide how to fail

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors returned by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error("counter store did not answer before the request deadline")]
    Timeout,

    #[error("unexpected counter store reply: {0}")]
    UnexpectedReply(String),
}

/// Result of incrementing a windowed counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Number of hits recorded in the current window, including this one.
    pub count: u64,
    /// Time left until the window expires.
    pub reset_after: Duration,
}

/// The get/increment/expire contract the gateway consumes.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, starting a new window of length `window`
    /// if the key does not exist yet.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    /// Read a plain value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a plain value that expires after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), StoreError>;
}
