use std::net::SocketAddr;
use std::time::Duration;

// ── Constants ────────────────────────────────────────────────────────────────

/// Hard cap on the HTML body, in bytes. This is 1_548_288 bytes (~1.48 MiB),
/// not 512 KiB.
pub const MAX_SIZE: usize = 1512 * 1024;

/// Total budget for one fetch, covering every redirect hop and the body read.
pub const TIMEOUT: Duration = Duration::from_millis(5000);

pub const MAX_REDIRECTS: usize = 3;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

pub const ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

pub const RATE_LIMIT_POINTS: u32 = 10;
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

pub const ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:8080",
    "http://localhost:8081",
    "http://localhost:8082",
];

pub const BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 3000);

// ── Runtime configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PreviewConfig {
    pub bind_addr: SocketAddr,
    pub fetch: FetchConfig,
    pub rate_limit_points: u32,
    pub rate_limit_window: Duration,
    pub allowed_origins: Vec<String>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(BIND_ADDR),
            fetch: FetchConfig::default(),
            rate_limit_points: RATE_LIMIT_POINTS,
            rate_limit_window: RATE_LIMIT_WINDOW,
            allowed_origins: ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub max_body_bytes: usize,
    pub timeout: Duration,
    pub max_redirects: usize,
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    /// Run every redirect target back through the URL validator before
    /// following it. When off, redirects are only hop-limited.
    pub revalidate_redirects: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: MAX_SIZE,
            timeout: TIMEOUT,
            max_redirects: MAX_REDIRECTS,
            user_agent: USER_AGENT.to_string(),
            accept: ACCEPT.to_string(),
            accept_language: ACCEPT_LANGUAGE.to_string(),
            revalidate_redirects: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_size_is_the_literal_byte_count() {
        assert_eq!(MAX_SIZE, 1_548_288);
        assert_eq!(FetchConfig::default().max_body_bytes, MAX_SIZE);
    }

    #[test]
    fn defaults_match_service_limits() {
        let config = PreviewConfig::default();
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.rate_limit_points, 10);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.fetch.timeout, Duration::from_millis(5000));
        assert_eq!(config.fetch.max_redirects, 3);
        assert!(config.fetch.revalidate_redirects);
        assert_eq!(config.allowed_origins.len(), 3);
    }
}
