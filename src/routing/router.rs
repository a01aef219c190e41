//! Route table and upstream targets.
//!
//! # Responsibilities
//! - Validate upstream addresses at registration
//! - Store pattern → upstream bindings
//! - Build the outbound URI for a forwarded request

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::Uri;
use url::{Position, Url};

use crate::config::ConfigError;

/// A backend the gateway forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    url: Url,
    authority: Authority,
}

impl Upstream {
    /// Parse and validate an upstream address such as `http://backend:8080`.
    pub fn parse(addr: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUpstream {
            addr: addr.to_string(),
            reason,
        };

        let url = Url::parse(addr).map_err(|e| invalid(e.to_string()))?;
        if url.scheme() != "http" {
            return Err(invalid(format!(
                "unsupported scheme {:?}, only http upstreams are supported",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }

        let authority = url[Position::BeforeHost..Position::AfterPort]
            .parse::<Authority>()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self { url, authority })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Outbound URI: the upstream's base path joined with the original path,
    /// and both query strings merged.
    pub fn target_uri(&self, original: &Uri) -> Result<Uri, axum::http::Error> {
        let path = join_paths(self.url.path(), original.path());
        let query = match (self.url.query().filter(|q| !q.is_empty()), original.query()) {
            (Some(base), Some(extra)) if !extra.is_empty() => Some(format!("{base}&{extra}")),
            (Some(base), _) => Some(base.to_string()),
            (None, extra) => extra.map(str::to_string),
        };
        let path_and_query = match query {
            Some(q) => format!("{path}?{q}"),
            None => path,
        };

        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(path_and_query.parse::<PathAndQuery>()?)
            .build()
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Mutable table used while the gateway boots.
#[derive(Debug, Default)]
pub struct RouteTableBuilder {
    routes: HashMap<String, Arc<Upstream>>,
}

impl RouteTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind every pattern to `upstream_addr`.
    ///
    /// A pattern registered twice keeps the last upstream. Registration only
    /// runs once at startup, so this never races with lookups.
    pub fn register(&mut self, upstream_addr: &str, patterns: &[&str]) -> Result<&mut Self, ConfigError> {
        let upstream = Arc::new(Upstream::parse(upstream_addr)?);
        for pattern in patterns {
            if let Some(previous) = self.routes.insert(pattern.to_string(), upstream.clone()) {
                tracing::warn!(
                    pattern = %pattern,
                    previous = %previous,
                    upstream = %upstream,
                    "Route re-registered, last registration wins"
                );
            }
            tracing::info!(pattern = %pattern, upstream = %upstream, "Route registered");
        }
        Ok(self)
    }

    /// Freeze the table.
    pub fn build(&mut self) -> RouteTable {
        RouteTable {
            routes: std::mem::take(&mut self.routes),
        }
    }
}

/// Immutable pattern → upstream map.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, Arc<Upstream>>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::new()
    }

    /// Exact, case-sensitive lookup.
    pub fn lookup(&self, pattern: &str) -> Option<&Arc<Upstream>> {
        self.routes.get(pattern)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let table = RouteTable::builder()
            .register("http://backend:8080", &["/v1/dogfood/record", "/v1/dogfood/records"])
            .unwrap()
            .build();

        assert_eq!(table.len(), 2);
        let upstream = table.lookup("/v1/dogfood/record").unwrap();
        assert_eq!(upstream.authority().as_str(), "backend:8080");
        assert!(table.lookup("/v1/unknown").is_none());
    }

    #[test]
    fn test_lookup_is_exact_and_case_sensitive() {
        let table = RouteTable::builder()
            .register("http://backend:8080", &["/v1/dogfood/record"])
            .unwrap()
            .build();

        assert!(table.lookup("/V1/DOGFOOD/RECORD").is_none());
        assert!(table.lookup("/v1/dogfood/record/").is_none());
        assert!(table.lookup("/v1/dogfood").is_none());
    }

    #[test]
    fn test_last_registration_wins() {
        let table = RouteTable::builder()
            .register("http://a:1", &["/p"])
            .unwrap()
            .register("http://b:2", &["/p"])
            .unwrap()
            .build();
        assert_eq!(table.lookup("/p").unwrap().authority().as_str(), "b:2");
    }

    #[test]
    fn test_one_upstream_serves_many_patterns() {
        let table = RouteTable::builder()
            .register("http://a:1", &["/x", "/y"])
            .unwrap()
            .build();
        assert!(Arc::ptr_eq(table.lookup("/x").unwrap(), table.lookup("/y").unwrap()));
    }

    #[test]
    fn test_malformed_upstream_fails_registration() {
        for addr in ["", "backend", "://nohost", "ftp://files:21", "https://secure:443", "http://"] {
            let err = RouteTable::builder().register(addr, &["/p"]).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidUpstream { .. }), "address {addr:?}");
        }
    }

    #[test]
    fn test_target_uri_preserves_path_and_query() {
        let upstream = Upstream::parse("http://127.0.0.1:9000").unwrap();
        let original: Uri = "/v1/dogfood/records?limit=10&page=2".parse().unwrap();
        assert_eq!(
            upstream.target_uri(&original).unwrap().to_string(),
            "http://127.0.0.1:9000/v1/dogfood/records?limit=10&page=2"
        );
    }

    #[test]
    fn test_target_uri_joins_base_path_and_query() {
        let upstream = Upstream::parse("http://backend/api/?tenant=a").unwrap();
        let original: Uri = "/v1/dogfood/record?x=1".parse().unwrap();
        assert_eq!(
            upstream.target_uri(&original).unwrap().to_string(),
            "http://backend/api/v1/dogfood/record?tenant=a&x=1"
        );

        let upstream = Upstream::parse("http://backend/api").unwrap();
        let original: Uri = "/v1/dogfood/record".parse().unwrap();
        assert_eq!(
            upstream.target_uri(&original).unwrap().to_string(),
            "http://backend/api/v1/dogfood/record"
        );
    }

    #[test]
    fn test_ipv6_upstream_authority() {
        let upstream = Upstream::parse("http://[::1]:8080").unwrap();
        assert_eq!(upstream.authority().as_str(), "[::1]:8080");
    }
}
