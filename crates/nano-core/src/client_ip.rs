//! Client address resolution.

use crate::metadata::Metadata;
use std::net::SocketAddr;

/// Header carrying the proxy chain, leftmost entry is the original client.
pub const FORWARDED_FOR: &str = "X-Forwarded-For";

/// Header set by reverse proxies with the client address.
pub const REAL_IP: &str = "X-Real-Ip";

/// Resolves the client address of a request.
///
/// Prefers the first entry of `X-Forwarded-For`, then `X-Real-Ip`, then the
/// peer socket address. The IPv6 loopback is reported as `127.0.0.1`.
/// Returns an empty string when nothing is known.
#[must_use]
pub fn resolve(metadata: &Metadata, peer: Option<SocketAddr>) -> String {
    if let Some(chain) = metadata.get_first(FORWARDED_FOR) {
        let first = chain.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return normalize(first);
        }
    }
    if let Some(ip) = metadata.get_first(REAL_IP) {
        let ip = ip.trim();
        if !ip.is_empty() {
            return normalize(ip);
        }
    }
    peer.map(|addr| normalize(&addr.ip().to_string()))
        .unwrap_or_default()
}

fn normalize(ip: &str) -> String {
    if ip == "::1" {
        "127.0.0.1".to_string()
    } else {
        ip.to_string()
    }
}
