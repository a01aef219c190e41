//! Client identity resolution.
//!
//! # Responsibilities
//! - Derive the client IP a quota is charged to
//! - Prefer the TCP peer, fall back to forwarding headers
//!
//! # Design Decisions
//! - Header names are matched case-insensitively (HeaderMap semantics)
//! - An unparseable address is an error, never a default key

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use thiserror::Error;

/// Forwarding headers consulted when the peer address is unknown, in priority order.
pub const FORWARDING_HEADERS: [&str; 2] = ["x-forwarded-for", "x-real-ip"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("ip address is missing")]
    Missing,

    #[error("ip address: {0} is invalid format")]
    Unparseable(String),
}

/// The IP address a request is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientIdentity(IpAddr);

impl ClientIdentity {
    pub fn new(ip: IpAddr) -> Self {
        Self(ip.to_canonical())
    }

    pub fn ip(&self) -> IpAddr {
        self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Resolve the client identity from the connection peer or, when that is
/// absent, from the first non-empty forwarding header.
pub fn resolve(peer: Option<SocketAddr>, headers: &HeaderMap) -> Result<ClientIdentity, IdentityError> {
    if let Some(addr) = peer {
        return Ok(ClientIdentity::new(addr.ip()));
    }

    let raw = FORWARDING_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        // X-Forwarded-For is "client, proxy1, proxy2"
        .map(|value| value.split(',').next().unwrap_or_default().trim())
        .find(|value| !value.is_empty())
        .ok_or(IdentityError::Missing)?;

    parse_ip(raw)
        .map(ClientIdentity::new)
        .ok_or_else(|| IdentityError::Unparseable(raw.to_string()))
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}
