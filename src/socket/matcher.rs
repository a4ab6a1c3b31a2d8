//! Non-proxy host matching.
//!
//! Accepts both the curl `NO_PROXY` style (`localhost,.corp.example,10.0.0.0/8`)
//! and the JVM `nonProxyHosts` style (`localhost|*.corp.example|192.168.*`).

use std::net::IpAddr;
use url::Url;

/// One exclusion entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    /// `*`: every host.
    Any,
    /// Exact host or any subdomain of it. A leading dot is ignored.
    Domain(String),
    /// Pattern with `*` wildcards, matched against the whole host.
    Glob(String),
    Ip(IpAddr),
    Cidr(IpAddr, u8),
}

impl HostPattern {
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        if entry == "*" {
            return Some(HostPattern::Any);
        }
        if let Some((ip, prefix)) = entry.split_once('/') {
            if let (Ok(ip), Ok(prefix)) = (ip.parse::<IpAddr>(), prefix.parse::<u8>()) {
                return Some(HostPattern::Cidr(ip, prefix));
            }
        }
        let bare = entry.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Some(HostPattern::Ip(ip));
        }
        let lower = entry.to_lowercase();
        // `*.example.com` reads the same as `.example.com`.
        if let Some(suffix) = lower.strip_prefix("*.") {
            if !suffix.contains('*') {
                return Some(HostPattern::Domain(suffix.to_string()));
            }
        }
        if lower.contains('*') {
            return Some(HostPattern::Glob(lower));
        }
        Some(HostPattern::Domain(
            lower.trim_start_matches('.').to_string(),
        ))
    }

    fn matches(&self, host: &str, ip: Option<IpAddr>) -> bool {
        match self {
            HostPattern::Any => true,
            HostPattern::Domain(domain) => {
                host == domain
                    || (host.len() > domain.len()
                        && host.ends_with(domain.as_str())
                        && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
            }
            HostPattern::Glob(pattern) => glob_match(pattern.as_bytes(), host.as_bytes()),
            HostPattern::Ip(expected) => ip == Some(*expected),
            HostPattern::Cidr(network, prefix) => {
                ip.is_some_and(|ip| cidr_contains(*network, *prefix, ip))
            }
        }
    }
}

/// Exclusion list for a proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyMatcher {
    patterns: Vec<HostPattern>,
}

impl ProxyMatcher {
    /// Read `NO_PROXY`, then `no_proxy`.
    pub fn from_env() -> Self {
        let raw = std::env::var("NO_PROXY")
            .or_else(|_| std::env::var("no_proxy"))
            .unwrap_or_default();
        Self::from_string(&raw)
    }

    /// Parse a list separated by `,`, `|` or whitespace.
    pub fn from_string(rules: &str) -> Self {
        Self {
            patterns: rules
                .split(|c: char| c == ',' || c == '|' || c.is_whitespace())
                .filter_map(HostPattern::parse)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether `host` goes direct instead of through the proxy.
    pub fn should_bypass(&self, host: &str) -> bool {
        let host = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .trim_end_matches('.')
            .to_lowercase();
        let ip = host.parse::<IpAddr>().ok();
        self.patterns.iter().any(|p| p.matches(&host, ip))
    }

    pub fn should_bypass_url(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|h| self.should_bypass(h))
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

fn cidr_contains(network: IpAddr, prefix: u8, addr: IpAddr) -> bool {
    match (network, addr) {
        (IpAddr::V4(net), IpAddr::V4(ip)) if prefix <= 32 => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            (u32::from(net) & mask) == (u32::from(ip) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) if prefix <= 128 => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            (u128::from(net) & mask) == (u128::from(ip) & mask)
        }
        _ => false,
    }
}
