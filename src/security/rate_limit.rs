//! Fixed-window rate limiting against the shared counter store.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::security::identity::ClientIdentity;
use crate::store::{CounterStore, StoreError};

pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Length of one rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitUnit {
    Second,
    Minute,
    Hour,
}

impl RateLimitUnit {
    pub fn window(&self) -> Duration {
        match self {
            RateLimitUnit::Second => Duration::from_secs(1),
            RateLimitUnit::Minute => Duration::from_secs(60),
            RateLimitUnit::Hour => Duration::from_secs(3600),
        }
    }
}

impl FromStr for RateLimitUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "second" => Ok(RateLimitUnit::Second),
            "minute" => Ok(RateLimitUnit::Minute),
            "hour" => Ok(RateLimitUnit::Hour),
            other => Err(format!("unknown rate limit unit: {other}")),
        }
    }
}

impl fmt::Display for RateLimitUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RateLimitUnit::Second => "second",
            RateLimitUnit::Minute => "minute",
            RateLimitUnit::Hour => "hour",
        };
        f.write_str(name)
    }
}

/// `volume` requests per `unit`, per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub unit: RateLimitUnit,
    pub volume: u64,
}

impl RateLimitPolicy {
    pub const fn new(unit: RateLimitUnit, volume: u64) -> Self {
        Self { unit, volume }
    }

    pub const fn per_second(volume: u64) -> Self {
        Self::new(RateLimitUnit::Second, volume)
    }

    pub const fn per_minute(volume: u64) -> Self {
        Self::new(RateLimitUnit::Minute, volume)
    }

    pub const fn per_hour(volume: u64) -> Self {
        Self::new(RateLimitUnit::Hour, volume)
    }

    /// Build a policy from raw configuration values. Anything missing or
    /// malformed yields the default policy.
    pub fn from_raw(unit: Option<&str>, volume: Option<&str>) -> Self {
        let (Some(unit), Some(volume)) = (unit, volume) else {
            return Self::default();
        };
        match (unit.parse::<RateLimitUnit>(), volume.trim().parse::<u64>()) {
            (Ok(unit), Ok(volume)) => Self::new(unit, volume),
            (unit_res, volume_res) => {
                tracing::warn!(
                    unit = %unit,
                    volume = %volume,
                    unit_error = ?unit_res.err(),
                    volume_error = ?volume_res.err().map(|e| e.to_string()),
                    "Invalid rate limit configuration, using default"
                );
                Self::default()
            }
        }
    }
}

impl Default for RateLimitPolicy {
    /// 60 requests per hour.
    fn default() -> Self {
        Self::per_hour(60)
    }
}

impl fmt::Display for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.volume, self.unit)
    }
}

/// Quota key: one bucket per (client, route pattern).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn new(identity: &ClientIdentity, pattern: &str) -> Self {
        Self(format!("rate:{} {}", identity, pattern))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one limiter evaluation.
///
/// `remaining` is the quota left after this request's attempt, so the request
/// that exhausts the window reports 0 and so does every rejected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u64,
    /// Time until the window resets. Zero when allowed.
    pub retry_after: Duration,
}

impl RateLimitResult {
    /// Whole seconds to wait, rounded up and never zero for a rejection.
    pub fn retry_after_secs(&self) -> u64 {
        if self.allowed {
            return 0;
        }
        let secs = self.retry_after.as_secs() + u64::from(self.retry_after.subsec_nanos() > 0);
        secs.max(1)
    }

    /// Write the quota headers onto a response.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        if !self.allowed {
            headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.retry_after_secs()));
        }
    }
}

/// Fixed-window limiter. Counting happens in the store so every gateway
/// instance shares one quota per key.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, policy: RateLimitPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Evaluate `key` against the configured policy.
    pub async fn check(&self, key: &RateLimitKey) -> Result<RateLimitResult, StoreError> {
        self.allow(key, &self.policy).await
    }

    /// Record one hit for `key` and decide whether it fits in `policy`.
    pub async fn allow(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitResult, StoreError> {
        let window = self.store.increment(key.as_str(), policy.unit.window()).await?;

        let allowed = window.count <= policy.volume;
        let result = RateLimitResult {
            allowed,
            remaining: policy.volume.saturating_sub(window.count),
            retry_after: if allowed { Duration::ZERO } else { window.reset_after },
        };

        tracing::debug!(
            key = %key,
            policy = %policy,
            count = window.count,
            allowed = result.allowed,
            remaining = result.remaining,
            "Rate limit evaluated"
        );

        Ok(result)
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, WindowCount};
    use async_trait::async_trait;

    fn identity(ip: &str) -> ClientIdentity {
        ClientIdentity::new(ip.parse().unwrap())
    }

    fn limiter(policy: RateLimitPolicy) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryStore::new()), policy)
    }

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn increment(&self, _: &str, _: Duration) -> Result<WindowCount, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn test_unit_parsing_is_case_insensitive() {
        assert_eq!("second".parse(), Ok(RateLimitUnit::Second));
        assert_eq!("Minute".parse(), Ok(RateLimitUnit::Minute));
        assert_eq!("HOUR".parse(), Ok(RateLimitUnit::Hour));
        assert!("day".parse::<RateLimitUnit>().is_err());
    }

    #[test]
    fn test_policy_from_raw_falls_back_to_default() {
        assert_eq!(RateLimitPolicy::from_raw(None, None), RateLimitPolicy::per_hour(60));
        assert_eq!(RateLimitPolicy::from_raw(Some("minute"), None), RateLimitPolicy::default());
        assert_eq!(RateLimitPolicy::from_raw(Some("fortnight"), Some("5")), RateLimitPolicy::default());
        assert_eq!(RateLimitPolicy::from_raw(Some("minute"), Some("-3")), RateLimitPolicy::default());
        assert_eq!(RateLimitPolicy::from_raw(Some("minute"), Some("lots")), RateLimitPolicy::default());
        assert_eq!(RateLimitPolicy::from_raw(Some("MINUTE"), Some("2")), RateLimitPolicy::per_minute(2));
    }

    #[test]
    fn test_keys_separate_clients_and_patterns() {
        let a = identity("203.0.113.5");
        let b = identity("203.0.113.9");
        assert_ne!(RateLimitKey::new(&a, "/v1/dogfood/record"), RateLimitKey::new(&b, "/v1/dogfood/record"));
        assert_ne!(RateLimitKey::new(&a, "/v1/dogfood/record"), RateLimitKey::new(&a, "/v1/dogfood/records"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_requests_then_rejection() {
        let limiter = limiter(RateLimitPolicy::per_minute(2));
        let key = RateLimitKey::new(&identity("203.0.113.5"), "/v1/dogfood/record");

        let first = limiter.check(&key).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);

        let second = limiter.check(&key).await.unwrap();
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = limiter.check(&key).await.unwrap();
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
        assert!(third.retry_after > Duration::ZERO);
        assert_eq!(third.retry_after_secs(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_never_increases_and_resets_after_window() {
        let limiter = limiter(RateLimitPolicy::per_second(3));
        let key = RateLimitKey::new(&identity("192.0.2.1"), "/v1/dogfood/records");

        let mut last = u64::MAX;
        for _ in 0..5 {
            let res = limiter.check(&key).await.unwrap();
            assert!(res.remaining <= last);
            last = res.remaining;
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert_eq!(last, 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        let fresh = limiter.check(&key).await.unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_do_not_share_quota() {
        let limiter = limiter(RateLimitPolicy::per_minute(2));
        let a = RateLimitKey::new(&identity("203.0.113.5"), "/v1/dogfood/record");
        let b = RateLimitKey::new(&identity("203.0.113.9"), "/v1/dogfood/record");

        for _ in 0..3 {
            limiter.check(&a).await.unwrap();
        }
        let res = limiter.check(&b).await.unwrap();
        assert!(res.allowed);
        assert_eq!(res.remaining, 1);
    }

    #[tokio::test]
    async fn test_zero_volume_denies_everything() {
        let limiter = limiter(RateLimitPolicy::per_hour(0));
        let key = RateLimitKey::new(&identity("192.0.2.1"), "/v1/dogfood/record");
        let res = limiter.check(&key).await.unwrap();
        assert!(!res.allowed);
        assert_eq!(res.remaining, 0);
        assert!(res.retry_after_secs() >= 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_an_error() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore), RateLimitPolicy::default());
        let key = RateLimitKey::new(&identity("192.0.2.1"), "/v1/dogfood/record");
        assert!(matches!(limiter.check(&key).await, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_headers_on_rejection() {
        let res = RateLimitResult {
            allowed: false,
            remaining: 0,
            retry_after: Duration::from_millis(1500),
        };
        let mut headers = HeaderMap::new();
        res.apply_headers(&mut headers);
        assert_eq!(headers[X_RATELIMIT_REMAINING], "0");
        assert_eq!(headers[X_RATELIMIT_RESET], "2");
    }

    #[test]
    fn test_headers_on_admission() {
        let res = RateLimitResult {
            allowed: true,
            remaining: 7,
            retry_after: Duration::ZERO,
        };
        let mut headers = HeaderMap::new();
        res.apply_headers(&mut headers);
        assert_eq!(headers[X_RATELIMIT_REMAINING], "7");
        assert!(!headers.contains_key(X_RATELIMIT_RESET));
    }
}
