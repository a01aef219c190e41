//! Configuration schema definitions.
//!
//! Every field can be set through its environment variable or the matching
//! command-line flag.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::{Args, Parser};
use url::Url;

use super::ConfigError;
use crate::observability::logging::LogFormat;
use crate::observability::tracing::PropagationStyle;
use crate::security::rate_limit::RateLimitPolicy;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dogfood-gateway",
    version,
    about = "Rate-limiting edge gateway in front of the dogfood backend"
)]
pub struct GatewayConfig {
    /// Listen port (`8080`, `:8080`) or socket address (`127.0.0.1:8080`).
    #[arg(long, env = "ADDR")]
    pub addr: String,

    /// Base URL of the dogfood backend (e.g. `http://backend:8080`).
    #[arg(long = "backend-addr", env = "DOGFOOD_BACKEND_ADDR")]
    pub backend_addr: String,

    #[command(flatten)]
    pub redis: RedisConfig,

    #[command(flatten)]
    pub rate_limit: RateLimitConfig,

    #[command(flatten)]
    pub timeouts: TimeoutConfig,

    #[command(flatten)]
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Resolve the listen socket address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = self.addr.trim();
        let port = raw.strip_prefix(':').unwrap_or(raw);
        if let Ok(port) = port.parse::<u16>() {
            return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
        }
        raw.parse::<SocketAddr>().map_err(|_| ConfigError::ListenAddress {
            addr: self.addr.clone(),
        })
    }
}

/// Counter store (Redis) connection parameters.
#[derive(Debug, Clone, Args)]
pub struct RedisConfig {
    /// Counter store host.
    #[arg(long = "redis-host", env = "REDIS_HOST")]
    pub host: String,

    /// Counter store port (default 6379).
    #[arg(long = "redis-port", env = "REDIS_PORT")]
    pub port: Option<u16>,

    /// Older name for the counter store port, used when `REDIS_PORT` is unset.
    #[arg(long = "redis-addr", env = "REDIS_ADDR", hide = true)]
    pub legacy_port: Option<u16>,

    /// Counter store password.
    #[arg(long = "redis-password", env = "REDIS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Counter store database index.
    #[arg(long = "redis-db", env = "REDIS_DB", default_value_t = 0)]
    pub db: u32,
}

impl RedisConfig {
    pub const DEFAULT_PORT: u16 = 6379;

    /// Effective port: `REDIS_PORT`, then `REDIS_ADDR`, then 6379.
    pub fn port(&self) -> u16 {
        self.port.or(self.legacy_port).unwrap_or(Self::DEFAULT_PORT)
    }

    /// `redis://` URL with the password percent-encoded.
    pub fn connection_url(&self) -> Result<Url, ConfigError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ConfigError::Store("redis host is missing".to_string()));
        }
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };

        let mut url = Url::parse(&format!("redis://{}:{}/{}", host, self.port(), self.db))
            .map_err(|e| ConfigError::Store(format!("redis host {:?}: {}", self.host, e)))?;
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|()| ConfigError::Store("redis password cannot be encoded".to_string()))?;
        }
        Ok(url)
    }
}

/// Rate-limit policy inputs, kept raw so that bad values degrade to the
/// default policy instead of failing startup.
#[derive(Debug, Clone, Args)]
pub struct RateLimitConfig {
    /// Window length: `second`, `minute` or `hour` (case-insensitive).
    #[arg(long = "ratelimit-unit", env = "RATELIMIT_UNIT")]
    pub unit: Option<String>,

    /// Requests admitted per window, per client and route.
    #[arg(long = "ratelimit-volume", env = "RATELIMIT_VOLUME")]
    pub volume: Option<String>,
}

impl RateLimitConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::from_raw(self.unit.as_deref(), self.volume.as_deref())
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Args)]
pub struct TimeoutConfig {
    /// Deadline for one request, covering the rate-limit check and the upstream response.
    #[arg(long = "request-timeout-secs", env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_secs: u64,

    /// Upstream connection establishment timeout.
    #[arg(long = "upstream-connect-timeout-secs", env = "UPSTREAM_CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    pub connect_secs: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs.max(1))
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs.max(1))
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            connect_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Args)]
pub struct ObservabilityConfig {
    /// Service name attached to trace spans.
    #[arg(long = "service-name", env = "DD_SERVICE", default_value = "dogfood-gateway")]
    pub service_name: String,

    /// Trace context propagation format.
    #[arg(long = "trace-propagation", env = "TRACE_PROPAGATION", value_enum, default_value_t = PropagationStyle::Datadog)]
    pub trace_propagation: PropagationStyle,

    /// Log output format.
    #[arg(long = "log-format", env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Prometheus scrape listener; metrics export is off when unset.
    #[arg(long = "metrics-addr", env = "METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::rate_limit::RateLimitUnit;

    fn parse(extra: &[&str]) -> GatewayConfig {
        let mut args = vec![
            "dogfood-gateway",
            "--addr",
            "8080",
            "--backend-addr",
            "http://backend:8080",
            "--redis-host",
            "redis",
        ];
        args.extend_from_slice(extra);
        GatewayConfig::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--ratelimit-unit", "", "--ratelimit-volume", ""]);
        assert_eq!(config.redis.port(), 6379);
        assert_eq!(config.redis.db, 0);
        assert_eq!(config.timeouts.request(), Duration::from_secs(30));
        assert_eq!(config.observability.trace_propagation, PropagationStyle::Datadog);
        assert_eq!(config.rate_limit.policy(), RateLimitPolicy::per_hour(60));
    }

    #[test]
    fn test_listen_addr_forms() {
        let mut config = parse(&[]);
        assert_eq!(config.listen_addr().unwrap(), "0.0.0.0:8080".parse().unwrap());

        config.addr = ":9090".to_string();
        assert_eq!(config.listen_addr().unwrap(), "0.0.0.0:9090".parse().unwrap());

        config.addr = "127.0.0.1:7000".to_string();
        assert_eq!(config.listen_addr().unwrap(), "127.0.0.1:7000".parse().unwrap());

        config.addr = "localhost".to_string();
        assert!(matches!(config.listen_addr(), Err(ConfigError::ListenAddress { .. })));
    }

    #[test]
    fn test_rate_limit_policy_from_flags() {
        let config = parse(&["--ratelimit-unit", "Minute", "--ratelimit-volume", "2"]);
        let policy = config.rate_limit.policy();
        assert_eq!(policy.unit, RateLimitUnit::Minute);
        assert_eq!(policy.volume, 2);
    }

    #[test]
    fn test_redis_url_encodes_password() {
        let config = parse(&["--redis-port", "6380", "--redis-password", "p@ss/word", "--redis-db", "2"]);
        let url = config.redis.connection_url().unwrap();
        assert_eq!(url.host_str(), Some("redis"));
        assert_eq!(url.port(), Some(6380));
        assert_eq!(url.path(), "/2");
        assert_eq!(url.password(), Some("p%40ss%2Fword"));
    }

    #[test]
    fn test_redis_port_accepts_legacy_name() {
        let config = parse(&["--redis-addr", "6390"]);
        assert_eq!(config.redis.port(), 6390);
        assert_eq!(config.redis.connection_url().unwrap().port(), Some(6390));

        let config = parse(&["--redis-addr", "6390", "--redis-port", "6380"]);
        assert_eq!(config.redis.port(), 6380);
    }

    #[test]
    fn test_redis_url_brackets_ipv6_host() {
        let mut config = parse(&[]);
        config.redis.host = "::1".to_string();
        let url = config.redis.connection_url().unwrap();
        assert_eq!(url.host_str(), Some("[::1]"));
    }

    #[test]
    fn test_invalid_propagation_style_is_rejected() {
        let result = GatewayConfig::try_parse_from([
            "dogfood-gateway",
            "--addr",
            "8080",
            "--backend-addr",
            "http://backend:8080",
            "--redis-host",
            "redis",
            "--trace-propagation",
            "zipkin",
        ]);
        assert!(result.is_err());
    }
}
