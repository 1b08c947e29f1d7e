//! The URL work item threaded through fetch and archival.

use std::collections::BTreeMap;
use std::fmt;

use arcfetch_verify::ContentDigest;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::history::DigestHistoryEntry;
use crate::record::RecordSet;
use crate::server::Credential;

pub const ANNOTATION_TIMER_TRUNC: &str = "timeTrunc";
pub const ANNOTATION_LENGTH_TRUNC: &str = "lenTrunc";
pub const ANNOTATION_MIDFETCH_ABORT: &str = "midFetchAbort";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FetchMethod {
    #[default]
    Get,
    Post,
}

impl fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMethod::Get => f.write_str("GET"),
            FetchMethod::Post => f.write_str("POST"),
        }
    }
}

/// Outcome code of the last fetch attempt. Negative codes are crawler-side
/// conditions the scheduler routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStatus {
    Http(u16),
    ConnectFailed,
    ConnectLost,
    DomainPrerequisiteFailure,
}

impl FetchStatus {
    pub fn code(&self) -> i32 {
        match self {
            FetchStatus::Http(code) => i32::from(*code),
            FetchStatus::ConnectFailed => -2,
            FetchStatus::ConnectLost => -3,
            FetchStatus::DomainPrerequisiteFailure => -6,
        }
    }

    pub fn http(&self) -> Option<u16> {
        match self {
            FetchStatus::Http(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool { matches!(self, FetchStatus::Http(200..=399)) }

    pub fn is_not_modified(&self) -> bool { *self == FetchStatus::Http(304) }
}

/// Per-request settings that take precedence over the fetcher's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOverrides {
    pub max_length_bytes:    Option<u64>,
    pub timeout_seconds:     Option<u64>,
    pub max_fetch_kb_sec:    Option<u64>,
}

/// What an earlier fetch of the same URL observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchHistory {
    pub status:           i32,
    pub fetched_at:       DateTime<Utc>,
    pub etag:             Option<String>,
    pub last_modified:    Option<String>,
    pub content_digest:   Option<ContentDigest>,
    pub reference_length: Option<u64>,
}

/// Byte layout of the recorded response: envelope (status line + headers)
/// followed by the body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordedTransfer {
    pub size:           u64,
    pub content_begin:  u64,
    pub request_length: u64,
}

impl RecordedTransfer {
    pub fn body_size(&self) -> u64 { self.size.saturating_sub(self.content_begin) }
}

#[derive(Debug, Clone)]
pub struct ResponseSummary {
    pub status:  u16,
    pub headers: HeaderMap,
}

/// Data scoped to one fetch attempt, discarded on retry.
#[derive(Debug, Clone, Default)]
pub struct FetchScoped {
    pub response:         Option<ResponseSummary>,
    pub recorded:         Option<RecordedTransfer>,
    /// Reference length carried forward so later 304s can report a
    /// virtual size.
    pub reference_length: Option<u64>,
    pub digest_history:   Option<DigestHistoryEntry>,
    pub records:          RecordSet,
}

#[derive(Debug, Clone)]
pub struct CrawlItem {
    url:             Url,
    method:          FetchMethod,
    via:             Option<Url>,
    prerequisite:    bool,
    overrides:       FetchOverrides,
    status:          Option<FetchStatus>,
    fetch_begin:     Option<DateTime<Utc>>,
    fetch_completed: Option<DateTime<Utc>>,
    content_size:    u64,
    content_type:    Option<String>,
    content_digest:  Option<ContentDigest>,

    pub annotations:          Vec<String>,
    /// Most recent first.
    pub fetch_history:        Vec<FetchHistory>,
    pub credentials:          Vec<Credential>,
    pub http_auth_challenges: BTreeMap<String, String>,
    pub non_fatal_failures:   Vec<String>,
    pub scoped:               FetchScoped,
}

impl CrawlItem {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: FetchMethod::Get,
            via: None,
            prerequisite: false,
            overrides: FetchOverrides::default(),
            status: None,
            fetch_begin: None,
            fetch_completed: None,
            content_size: 0,
            content_type: None,
            content_digest: None,
            annotations: Vec::new(),
            fetch_history: Vec::new(),
            credentials: Vec::new(),
            http_auth_challenges: BTreeMap::new(),
            non_fatal_failures: Vec::new(),
            scoped: FetchScoped::default(),
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: FetchMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_via(mut self, via: Url) -> Self {
        self.via = Some(via);
        self
    }

    /// Prerequisites (robots, DNS) are never aborted mid-fetch.
    #[must_use]
    pub fn as_prerequisite(mut self) -> Self {
        self.prerequisite = true;
        self
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: FetchOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn url(&self) -> &Url { &self.url }

    pub fn method(&self) -> FetchMethod { self.method }

    pub fn via(&self) -> Option<&Url> { self.via.as_ref() }

    pub fn is_prerequisite(&self) -> bool { self.prerequisite }

    pub fn overrides(&self) -> &FetchOverrides { &self.overrides }

    pub fn fetch_status(&self) -> Option<FetchStatus> { self.status }

    /// Records the attempt's status. A transport failure may replace an HTTP
    /// status observed earlier in the same attempt; nothing else may.
    pub fn set_fetch_status(&mut self, status: FetchStatus) {
        if let Some(previous @ FetchStatus::Http(_)) = self.status
            && matches!(status, FetchStatus::Http(_))
        {
            tracing::warn!(url = %self.url, ?previous, ?status, "fetch status set twice");
            return;
        }
        self.status = Some(status);
    }

    pub fn fetch_begin(&self) -> Option<DateTime<Utc>> { self.fetch_begin }

    pub fn set_fetch_begin(&mut self, t: DateTime<Utc>) {
        if self.fetch_begin.is_some() {
            tracing::warn!(url = %self.url, "fetch begin time set twice");
            return;
        }
        self.fetch_begin = Some(t);
    }

    pub fn fetch_completed(&self) -> Option<DateTime<Utc>> { self.fetch_completed }

    pub fn set_fetch_completed(&mut self, t: DateTime<Utc>) {
        if self.fetch_completed.is_some() {
            tracing::warn!(url = %self.url, "fetch completed time set twice");
            return;
        }
        self.fetch_completed = Some(t);
    }

    pub fn content_size(&self) -> u64 { self.content_size }

    pub fn set_content_size(&mut self, size: u64) { self.content_size = size; }

    pub fn content_type(&self) -> Option<&str> { self.content_type.as_deref() }

    pub fn set_content_type(&mut self, content_type: Option<String>) {
        self.content_type = content_type;
    }

    pub fn content_digest(&self) -> Option<&ContentDigest> { self.content_digest.as_ref() }

    pub fn set_content_digest(&mut self, digest: ContentDigest) {
        if self.content_digest.is_some() {
            tracing::warn!(url = %self.url, "content digest set twice");
            return;
        }
        self.content_digest = Some(digest);
    }

    pub fn annotate(&mut self, annotation: impl Into<String>) {
        self.annotations.push(annotation.into());
    }

    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.annotations.iter().any(|a| a == annotation)
    }

    /// The body was cut short by a length or time cap.
    pub fn is_truncated(&self) -> bool {
        self.has_annotation(ANNOTATION_LENGTH_TRUNC) || self.has_annotation(ANNOTATION_TIMER_TRUNC)
    }

    pub fn has_credentials(&self) -> bool { !self.credentials.is_empty() }

    /// Pushes a history snapshot, keeping at most `keep` of them.
    pub fn push_history(&mut self, snapshot: FetchHistory, keep: usize) {
        self.fetch_history.insert(0, snapshot);
        self.fetch_history.truncate(keep.max(1));
    }

    pub fn latest_history(&self) -> Option<&FetchHistory> { self.fetch_history.first() }

    /// Clears every attempt-scoped field, annotations included, so the
    /// scheduler can requeue the item. History, credentials, captured auth
    /// challenges and failure notes survive.
    pub fn reset_for_retry(&mut self) {
        self.annotations.clear();
        self.status = None;
        self.fetch_begin = None;
        self.fetch_completed = None;
        self.content_size = 0;
        self.content_type = None;
        self.content_digest = None;
        self.scoped = FetchScoped::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::from_epoch_millis;

    fn item() -> CrawlItem { CrawlItem::new(Url::parse("http://example.org/").unwrap()) }

    #[test]
    fn test_status_codes() {
        assert_eq!(FetchStatus::Http(304).code(), 304);
        assert_eq!(FetchStatus::ConnectFailed.code(), -2);
        assert_eq!(FetchStatus::ConnectLost.code(), -3);
        assert_eq!(FetchStatus::DomainPrerequisiteFailure.code(), -6);
        assert!(FetchStatus::Http(304).is_success());
        assert!(!FetchStatus::Http(404).is_success());
        assert!(!FetchStatus::ConnectLost.is_success());
    }

    #[test]
    fn test_begin_time_set_once() {
        let mut item = item();
        let first = from_epoch_millis(1_380_000_000_000).unwrap();
        item.set_fetch_begin(first);
        item.set_fetch_begin(from_epoch_millis(1_390_000_000_000).unwrap());
        assert_eq!(item.fetch_begin(), Some(first));
    }

    #[test]
    fn test_connect_lost_replaces_http_status() {
        let mut item = item();
        item.set_fetch_status(FetchStatus::Http(200));
        item.set_fetch_status(FetchStatus::Http(500));
        assert_eq!(item.fetch_status(), Some(FetchStatus::Http(200)));
        item.set_fetch_status(FetchStatus::ConnectLost);
        assert_eq!(item.fetch_status(), Some(FetchStatus::ConnectLost));
    }

    #[test]
    fn test_history_bounded_most_recent_first() {
        let mut item = item();
        for status in [200, 304, 200] {
            item.push_history(
                FetchHistory {
                    status,
                    fetched_at: Utc::now(),
                    etag: None,
                    last_modified: None,
                    content_digest: None,
                    reference_length: None,
                },
                2,
            );
        }
        let statuses: Vec<_> = item.fetch_history.iter().map(|h| h.status).collect();
        assert_eq!(statuses, vec![200, 304]);
    }

    #[test]
    fn test_reset_for_retry_discards_scoped_data() {
        let mut item = item();
        item.set_fetch_status(FetchStatus::ConnectLost);
        item.set_fetch_begin(Utc::now());
        item.non_fatal_failures.push("connection reset".to_string());
        item.scoped.reference_length = Some(10);
        item.annotate(ANNOTATION_LENGTH_TRUNC);
        item.annotate(ANNOTATION_MIDFETCH_ABORT);

        item.reset_for_retry();

        assert!(item.fetch_status().is_none());
        assert!(!item.is_truncated());
        assert!(!item.has_annotation(ANNOTATION_MIDFETCH_ABORT));
        assert!(item.fetch_begin().is_none());
        assert!(item.scoped.reference_length.is_none());
        assert_eq!(item.non_fatal_failures.len(), 1);
    }

    #[test]
    fn test_truncation_annotations() {
        let mut item = item();
        assert!(!item.is_truncated());
        item.annotate(ANNOTATION_LENGTH_TRUNC);
        assert!(item.is_truncated());
    }
}
