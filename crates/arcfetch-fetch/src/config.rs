//! Fetcher configuration and per-request limit resolution.

use std::time::Duration;

use arcfetch_core::FetchOverrides;
use arcfetch_verify::DigestAlgorithm;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, Result};

pub const DEFAULT_ACCEPT_HEADER: &str =
    "Accept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// How much of a server's TLS certificate is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslTrustLevel {
    /// Trust anything offered.
    #[default]
    Open,
    Loose,
    /// Valid chain; host name mismatch tolerated.
    Normal,
    Strict,
}

/// Decision taken once response headers are in, before the body is read.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "kebab-case")]
pub enum MidfetchRule {
    #[default]
    Accept,
    RejectMimePrefix {
        prefixes: Vec<String>,
    },
    RejectOverLength {
        max_bytes: u64,
    },
}

impl MidfetchRule {
    pub fn rejects(&self, headers: &HeaderMap) -> bool {
        match self {
            MidfetchRule::Accept => false,
            MidfetchRule::RejectMimePrefix { prefixes } => {
                let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
                else {
                    return false;
                };
                let content_type = content_type.trim().to_ascii_lowercase();
                prefixes.iter().any(|p| content_type.starts_with(&p.to_ascii_lowercase()))
            }
            MidfetchRule::RejectOverLength { max_bytes } => declared_length(headers)
                .is_some_and(|len| len > *max_bytes),
        }
    }
}

pub(crate) fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.trim().parse().ok()
}

/// Immutable limits for one fetch, resolved from the item's overrides and
/// the fetcher defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limits {
    /// 0 means unlimited.
    pub hard_max_bytes:    u64,
    pub timeout:           Option<Duration>,
    /// 0 means unlimited.
    pub max_bytes_per_sec: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Header lines, each `Name: value`.
    pub accept_headers:         Vec<String>,
    pub accept_compression:     bool,
    pub use_http11:             bool,
    pub send_connection_close:  bool,
    pub ignore_cookies:         bool,
    pub send_range:             bool,
    pub send_if_modified_since: bool,
    pub send_if_none_match:     bool,
    pub send_referer:           bool,
    pub digest_content:         bool,
    pub digest_algorithm:       DigestAlgorithm,
    pub max_fetch_kb_sec:       u64,
    pub timeout_seconds:        u64,
    pub socket_timeout_ms:      u64,
    pub max_length_bytes:       u64,
    pub ssl_trust_level:        SslTrustLevel,
    pub midfetch_rule:          MidfetchRule,
    pub user_agent:             Option<String>,
    pub http_proxy_host:        Option<String>,
    pub http_proxy_port:        Option<u16>,
    pub http_proxy_user:        Option<String>,
    pub http_proxy_password:    Option<String>,
    /// Fetch-history snapshots kept per item.
    pub history_length:         usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            accept_headers:         vec![DEFAULT_ACCEPT_HEADER.to_string()],
            accept_compression:     false,
            use_http11:             false,
            send_connection_close:  true,
            ignore_cookies:         false,
            send_range:             false,
            send_if_modified_since: true,
            send_if_none_match:     true,
            send_referer:           true,
            digest_content:         true,
            digest_algorithm:       DigestAlgorithm::Sha1,
            max_fetch_kb_sec:       0,
            timeout_seconds:        1200,
            socket_timeout_ms:      20_000,
            max_length_bytes:       0,
            ssl_trust_level:        SslTrustLevel::Open,
            midfetch_rule:          MidfetchRule::Accept,
            user_agent:             None,
            http_proxy_host:        None,
            http_proxy_port:        None,
            http_proxy_user:        None,
            http_proxy_password:    None,
            history_length:         2,
        }
    }
}

impl FetchConfig {
    /// Request-scoped overrides win over the configured defaults.
    pub fn resolve(&self, overrides: &FetchOverrides) -> Limits {
        let timeout_seconds = overrides.timeout_seconds.unwrap_or(self.timeout_seconds);
        let kb_sec = overrides.max_fetch_kb_sec.unwrap_or(self.max_fetch_kb_sec);
        Limits {
            hard_max_bytes:    overrides.max_length_bytes.unwrap_or(self.max_length_bytes),
            timeout:           (timeout_seconds > 0).then(|| Duration::from_secs(timeout_seconds)),
            max_bytes_per_sec: kb_sec.saturating_mul(1024),
        }
    }

    pub fn digest(&self) -> Option<DigestAlgorithm> {
        self.digest_content.then_some(self.digest_algorithm)
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        (self.socket_timeout_ms > 0).then(|| Duration::from_millis(self.socket_timeout_ms))
    }

    pub fn accept_header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for line in &self.accept_headers {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FetchError::Config(format!("accept header without ':': {line}")))?;
            let name = HeaderName::try_from(name.trim())
                .map_err(|e| FetchError::Config(format!("{line}: {e}")))?;
            let value = HeaderValue::try_from(value.trim())
                .map_err(|e| FetchError::Config(format!("{line}: {e}")))?;
            headers.append(name, value);
        }
        Ok(headers)
    }

    pub fn validate(&self) -> Result<()> {
        self.accept_header_map()?;
        if self.http_proxy_host.is_none()
            && (self.http_proxy_port.is_some() || self.http_proxy_user.is_some())
        {
            return Err(FetchError::Config("proxy port or user set without proxy host".into()));
        }
        if self.history_length == 0 {
            return Err(FetchError::Config("history_length must be at least 1".into()));
        }
        Ok(())
    }
}
