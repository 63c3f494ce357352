//! Perimeter access gate.
//!
//! Public paths (share pages, share downloads, static assets and the API) are
//! open to everyone; a share link id is a bearer capability and never goes
//! through the IP check. Every other path requires the caller's IP to be on
//! the whitelist or inside the configured IPv4 range.
//!
//! Proxy headers name the caller only when the socket peer is a trusted proxy;
//! anyone else is judged by the peer address.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

use super::suspicious::{is_suspicious, SuspiciousLog};

/// Outcome of an access check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// A swappable rule deciding whether a request may proceed.
pub trait AccessPolicy: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Decide for a request path and the caller's IP, if known.
    fn check(&self, path: &str, ip: Option<IpAddr>) -> Decision;
}

/// An inclusive IPv4 range, compared as 32-bit integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Range {
    start: u32,
    end: u32,
}

impl Ipv4Range {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Self {
        Self {
            start: u32::from(start),
            end: u32::from(end),
        }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        ip >= self.start && ip <= self.end
    }

}

/// Exact IP whitelist plus an optional IPv4 range.
#[derive(Debug, Clone, Default)]
pub struct IpAllowList {
    whitelist: HashSet<IpAddr>,
    range: Option<Ipv4Range>,
}

impl IpAllowList {
    pub fn new(whitelist: impl IntoIterator<Item = IpAddr>, range: Option<Ipv4Range>) -> Self {
        Self {
            whitelist: whitelist.into_iter().map(canonical).collect(),
            range,
        }
    }

    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        let ip = canonical(ip);
        if self.whitelist.contains(&ip) {
            return true;
        }
        match (ip, self.range) {
            (IpAddr::V4(v4), Some(range)) => range.contains(v4),
            _ => false,
        }
    }

}

/// Dual-stack sockets report IPv4 peers as `::ffff:a.b.c.d`.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

/// Public path prefixes plus an IP allow list.
pub struct PerimeterPolicy {
    public_prefixes: Vec<String>,
    allow_list: IpAllowList,
}

impl PerimeterPolicy {
    pub fn new(public_prefixes: Vec<String>, allow_list: IpAllowList) -> Self {
        Self {
            public_prefixes,
            allow_list,
        }
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

impl AccessPolicy for PerimeterPolicy {
    fn name(&self) -> &'static str {
        "perimeter"
    }

    fn check(&self, path: &str, ip: Option<IpAddr>) -> Decision {
        if self.is_public(path) {
            return Decision::Allow;
        }
        match ip {
            Some(ip) if self.allow_list.is_allowed(ip) => Decision::Allow,
            _ => Decision::Deny,
        }
    }
}

/// Lets every request through. For local use only.
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn name(&self) -> &'static str {
        "allow-all"
    }

    fn check(&self, _path: &str, _ip: Option<IpAddr>) -> Decision {
        Decision::Allow
    }
}

/// Peers whose `X-Real-IP` / `X-Forwarded-For` headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies(HashSet<IpAddr>);

impl TrustedProxies {
    pub fn new(proxies: impl IntoIterator<Item = IpAddr>) -> Self {
        Self(proxies.into_iter().map(canonical).collect())
    }

    /// Loopback only, for a reverse proxy on the same host.
    pub fn loopback() -> Self {
        Self::new([
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ])
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.0.contains(&canonical(ip))
    }
}

/// Resolve the caller's IP.
///
/// When the socket peer is a trusted proxy: `X-Real-IP`, then the first
/// `X-Forwarded-For` entry, then the peer itself. Otherwise the peer, and
/// the headers are ignored. Unparseable header values are skipped.
pub fn caller_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted: &TrustedProxies,
) -> Option<IpAddr> {
    let peer_ip = peer.map(|addr| canonical(addr.ip()));
    if !peer_ip.is_some_and(|ip| trusted.contains(ip)) {
        return peer_ip;
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());

    let forwarded = || {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    real_ip.or_else(forwarded).map(canonical).or(peer_ip)
}

/// State shared by the gate middleware.
pub struct AccessGate {
    policy: Arc<dyn AccessPolicy>,
    suspicious: Arc<SuspiciousLog>,
    trusted_proxies: TrustedProxies,
}

impl AccessGate {
    /// A gate trusting proxy headers from loopback peers only.
    pub fn new(policy: Arc<dyn AccessPolicy>, suspicious: Arc<SuspiciousLog>) -> Self {
        Self {
            policy,
            suspicious,
            trusted_proxies: TrustedProxies::loopback(),
        }
    }

    pub fn with_trusted_proxies(mut self, trusted_proxies: TrustedProxies) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }
}

/// Middleware applying the gate to every request.
pub async fn access_gate(State(gate): State<Arc<AccessGate>>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = caller_ip(request.headers(), peer, &gate.trusted_proxies);
    let path = request.uri().path().to_string();

    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(path.as_str());
    if is_suspicious(target) {
        gate.suspicious.record(ip, target);
    }

    match gate.policy.check(&path, ip) {
        Decision::Allow => {
            debug!(ip = ?ip, path = %path, policy = gate.policy.name(), "Request allowed");
            next.run(request).await
        }
        Decision::Deny => {
            warn!(
                ip = ?ip,
                method = %request.method(),
                path = %path,
                status = 403,
                "Blocked request"
            );
            (
                StatusCode::FORBIDDEN,
                [(header::CONTENT_TYPE, "text/plain")],
                "DENIED",
            )
                .into_response()
        }
    }
}
