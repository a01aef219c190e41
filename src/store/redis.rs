//! Redis-backed counter store.
//!
//! # Responsibilities
//! - Hold one multiplexed, self-reconnecting connection per process
//! - Run INCR + PEXPIRE + PTTL as a single script (one round trip, atomic)
//!
//! # Design Decisions
//! - The connection is established lazily: a store outage at boot shows up
//!   in the readiness probe instead of killing the process
//! - Dialing, replies and reconnects are all bounded so an outage surfaces
//!   as an error within the connect timeout, not after the backoff schedule
//! - Keys that lost their TTL are given one back by the same script

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, Script};
use tokio::sync::OnceCell;

use super::{CounterStore, StoreError, WindowCount};

const INCREMENT_WINDOW: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Dial and reply bounds, mirroring the usual Redis client defaults.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Reconnect attempts before a command gives up.
const RECONNECT_RETRIES: usize = 1;
/// Cap on the reconnect backoff, in milliseconds.
const RECONNECT_MAX_DELAY_MS: u64 = 500;

pub struct RedisStore {
    client: Client,
    conn: OnceCell<ConnectionManager>,
    increment: Script,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl RedisStore {
    /// Create a store for the given `redis://` URL. Does not connect.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            increment: Script::new(INCREMENT_WINDOW),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        })
    }

    /// Override the dial and per-command reply bounds.
    pub fn with_timeouts(mut self, connect: Duration, response: Duration) -> Self {
        self.connect_timeout = connect;
        self.response_timeout = response;
        self
    }

    fn manager_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig::new()
            .set_connection_timeout(self.connect_timeout)
            .set_response_timeout(self.response_timeout)
            .set_number_of_retries(RECONNECT_RETRIES)
            .set_max_delay(RECONNECT_MAX_DELAY_MS)
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                tracing::debug!(
                    connect_timeout_ms = self.connect_timeout.as_millis() as u64,
                    "Connecting to counter store"
                );
                let connect = ConnectionManager::new_with_config(self.client.clone(), self.manager_config());
                // The retry schedule runs inside `connect`; bound the whole attempt.
                match tokio::time::timeout(self.connect_timeout, connect).await {
                    Ok(result) => result.map_err(StoreError::from),
                    Err(_) => Err(StoreError::Unavailable(format!(
                        "no connection within {:?}",
                        self.connect_timeout
                    ))),
                }
            })
            .await?;
        Ok(conn.clone())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connected", &self.conn.initialized())
            .finish()
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let mut conn = self.connection().await?;
        let window_ms = window.as_millis().max(1) as u64;

        let (count, ttl_ms): (i64, i64) = self
            .increment
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        if count < 1 {
            return Err(StoreError::UnexpectedReply(format!(
                "counter {key} reported count {count}"
            )));
        }

        Ok(WindowCount {
            count: count as u64,
            reset_after: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let _: () = conn.pset_ex(key, value, ttl_ms).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply != "PONG" {
            return Err(StoreError::UnexpectedReply(reply));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_malformed_url() {
        assert!(RedisStore::open("not a url").is_err());
    }

    #[test]
    fn test_open_does_not_connect() {
        // Nothing listens on port 1; opening must still succeed.
        let store = RedisStore::open("redis://127.0.0.1:1/0").unwrap();
        assert!(!store.conn.initialized());
    }

    #[tokio::test]
    async fn test_refused_connection_fails_within_connect_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = RedisStore::open(&format!("redis://{addr}/0"))
            .unwrap()
            .with_timeouts(Duration::from_secs(1), Duration::from_secs(1));

        let started = std::time::Instant::now();
        assert!(store.ping().await.is_err());
        assert!(store.increment("rate:test", Duration::from_secs(60)).await.is_err());
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "took {:?}",
            started.elapsed()
        );
        assert!(!store.conn.initialized());
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_increment_against_live_redis() {
        let store = RedisStore::open("redis://127.0.0.1:6379/0").unwrap();
        let key = format!("rate:test {}", fastrand::u64(..));

        let first = store.increment(&key, Duration::from_secs(60)).await.unwrap();
        let second = store.increment(&key, Duration::from_secs(60)).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert!(second.reset_after <= Duration::from_secs(60));
        assert!(second.reset_after > Duration::ZERO);
    }
}
