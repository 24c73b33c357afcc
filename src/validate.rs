use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use url::{Host, Url};

use crate::error::PreviewError;

// ── Resolver seam ────────────────────────────────────────────────────────────

/// Hostname to address lookup, returning every address of both families.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<IpAddr>>;
}

/// System resolver backed by `tokio::net::lookup_host`.
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

// ── Validated URL ────────────────────────────────────────────────────────────

/// A URL whose host resolved only to public addresses when it was checked.
/// The fetch may resolve the host again, so this holds at validation time only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUrl(Url);

impl ValidatedUrl {
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn into_url(self) -> Url {
        self.0
    }
}

impl fmt::Display for ValidatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Validator ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct UrlValidator {
    resolver: Arc<dyn Resolver>,
}

impl UrlValidator {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self { resolver }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(DnsResolver))
    }

    pub async fn validate(&self, raw_url: &str) -> Result<ValidatedUrl, PreviewError> {
        let parsed = Url::parse(raw_url.trim()).map_err(|e| {
            tracing::debug!(url = raw_url, error = %e, "rejecting malformed URL");
            PreviewError::UnsafeUrl
        })?;
        self.validate_url(parsed).await
    }

    pub async fn validate_url(&self, url: Url) -> Result<ValidatedUrl, PreviewError> {
        if !matches!(url.scheme(), "http" | "https") {
            tracing::debug!(url = %url, "rejecting non-http scheme");
            return Err(PreviewError::UnsafeUrl);
        }

        let addrs = match url.host() {
            Some(Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
            Some(Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
            Some(Host::Domain(domain)) => {
                let port = url.port_or_known_default().unwrap_or(80);
                self.resolver.resolve(domain, port).await.map_err(|e| {
                    tracing::warn!(url = %url, error = %e, "DNS lookup failed");
                    PreviewError::UnsafeUrl
                })?
            }
            None => return Err(PreviewError::UnsafeUrl),
        };

        if addrs.is_empty() {
            tracing::warn!(url = %url, "DNS lookup returned no addresses");
            return Err(PreviewError::UnsafeUrl);
        }

        if let Some(ip) = addrs.iter().find(|ip| is_blocked_ip(**ip)) {
            tracing::warn!(url = %url, ip = %ip, "blocked private/loopback address");
            return Err(PreviewError::UnsafeUrl);
        }

        Ok(ValidatedUrl(url))
    }
}

// ── Address ranges ───────────────────────────────────────────────────────────

pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => match embedded_v4(v6) {
            Some(v4) => is_blocked_v4(v4),
            None => is_blocked_v6(v6),
        },
    }
}

/// IPv4 address carried inside an IPv6 one: `::ffff:a.b.c.d` (mapped),
/// `::a.b.c.d` (compatible) and `64:ff9b::a.b.c.d` (NAT64 well-known prefix).
/// `::` and `::1` stay IPv6.
fn embedded_v4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return Some(v4);
    }
    let seg = ip.segments();
    let tail = Ipv4Addr::from((u32::from(seg[6]) << 16) | u32::from(seg[7]));
    match seg[..6] {
        [0, 0, 0, 0, 0, 0] if !ip.is_loopback() && !ip.is_unspecified() => Some(tail),
        [0x64, 0xff9b, 0, 0, 0, 0] => Some(tail),
        _ => None,
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    // 10/8, 172.16/12, 192.168/16, 127/8, 169.254/16, 0/8
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.octets()[0] == 0
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // fc00::/7
        || (first & 0xffc0) == 0xfe80 // fe80::/10
}
