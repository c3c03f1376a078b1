//! Network admission check
//!
//! Reusable SSRF guard for any executor that talks to the network. Only
//! `http`/`https` targets are admitted, and targets that resolve to loopback,
//! link-local, private or otherwise internal addresses are refused unless an
//! allow-list pattern matches the URL.
//!
//! The addresses a host resolved to during the check are handed back so the
//! caller can connect to exactly those, instead of resolving again.

use crate::config::ExecutionConfig;
use crate::error::{Error, GovernorError};
use regex::Regex;
use reqwest::Url;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// A target that passed admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmittedUrl {
    pub url: Url,
    /// Addresses vetted for a named host. Empty when nothing was resolved
    /// (IP literals, allow-list matches, blocking disabled).
    pub addrs: Vec<SocketAddr>,
}

impl AdmittedUrl {
    fn unpinned(url: Url) -> Self {
        Self {
            url,
            addrs: Vec::new(),
        }
    }

    /// Host name to pin to `addrs`, if the URL names a domain that was resolved
    pub fn pinned_host(&self) -> Option<&str> {
        if self.addrs.is_empty() {
            None
        } else {
            self.url.domain()
        }
    }
}

/// Compiled admission policy
#[derive(Debug, Clone)]
pub struct UrlAdmission {
    block_internal_ips: bool,
    allowed: Vec<Regex>,
}

impl UrlAdmission {
    /// Compile an admission policy. Fails with `Error::Config` on a bad pattern.
    pub fn new(block_internal_ips: bool, patterns: &[String]) -> crate::Result<Self> {
        let allowed = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    Error::Config(format!("invalid URL pattern '{}': {}", pattern, e))
                })
            })
            .collect::<crate::Result<Vec<_>>>()?;

        Ok(Self {
            block_internal_ips,
            allowed,
        })
    }

    pub fn from_config(config: &ExecutionConfig) -> crate::Result<Self> {
        Self::new(config.block_internal_ips, &config.allowed_url_patterns)
    }

    /// Admit or refuse a target URL, resolving host names when needed
    pub async fn check(&self, raw: &str) -> Result<AdmittedUrl, GovernorError> {
        let url = Url::parse(raw).map_err(|e| refuse(raw, format!("invalid URL: {}", e)))?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(refuse(raw, format!("scheme '{}' is not allowed", other))),
        }

        let host = url
            .host_str()
            .ok_or_else(|| refuse(raw, "URL has no host"))?
            .to_string();

        if !self.allowed.is_empty() {
            if self.allowed.iter().any(|p| p.is_match(url.as_str())) {
                tracing::debug!("🔓 URL admitted by allow-list: {}", url);
                return Ok(AdmittedUrl::unpinned(url));
            }
            return Err(refuse(raw, "URL does not match any allowed pattern"));
        }

        if !self.block_internal_ips {
            return Ok(AdmittedUrl::unpinned(url));
        }

        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = literal.parse::<IpAddr>() {
            return if is_internal(ip) {
                Err(refuse(raw, format!("address {} is internal", ip)))
            } else {
                Ok(AdmittedUrl::unpinned(url))
            };
        }

        let lowered = host.to_ascii_lowercase();
        if lowered == "localhost" || lowered.ends_with(".localhost") {
            return Err(refuse(raw, "localhost is internal"));
        }

        let port = url.port_or_known_default().unwrap_or(80);
        let resolved = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| refuse(raw, format!("could not resolve host '{}': {}", host, e)))?;

        let addrs: Vec<SocketAddr> = resolved.collect();
        for addr in &addrs {
            if is_internal(addr.ip()) {
                return Err(refuse(
                    raw,
                    format!("host '{}' resolves to internal address {}", host, addr.ip()),
                ));
            }
        }
        if addrs.is_empty() {
            return Err(refuse(raw, format!("host '{}' resolved to no addresses", host)));
        }

        Ok(AdmittedUrl { url, addrs })
    }
}

fn refuse(url: &str, reason: impl Into<String>) -> GovernorError {
    let reason = reason.into();
    tracing::warn!("🚫 Network admission refused for {}: {}", url, reason);
    GovernorError::NetworkAdmission {
        url: url.to_string(),
        reason,
    }
}

/// Loopback, link-local, private, unspecified, broadcast or shared address space
pub fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_internal_v4(v4),
        IpAddr::V6(v6) => is_internal_v6(v6),
    }
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (first & 0xffc0) == 0xfe80
}
