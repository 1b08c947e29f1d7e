//! Conditional request headers and the per-item fetch history they are
//! drawn from.

use arcfetch_core::{CrawlItem, FetchHistory};
use chrono::Utc;
use http::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use http::{HeaderMap, HeaderValue};

use crate::config::FetchConfig;

/// Adds `If-Modified-Since` / `If-None-Match` from the most recent snapshot.
pub fn apply_conditional_headers(config: &FetchConfig, item: &CrawlItem, headers: &mut HeaderMap) {
    let Some(previous) = item.latest_history() else {
        return;
    };
    if config.send_if_modified_since
        && let Some(value) = previous.last_modified.as_deref().and_then(header_value)
    {
        headers.insert(IF_MODIFIED_SINCE, value);
    }
    if config.send_if_none_match
        && let Some(value) = previous.etag.as_deref().and_then(header_value)
    {
        headers.insert(IF_NONE_MATCH, value);
    }
}

fn header_value(s: &str) -> Option<HeaderValue> { HeaderValue::from_str(s).ok() }

fn header_string(headers: &HeaderMap, name: http::HeaderName) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}

/// Pushes a snapshot of the attempt that just finished. A 304 carries the
/// previous digest and validators forward, since it has no body of its own.
pub fn record_fetch_history(item: &mut CrawlItem, keep: usize) {
    let Some(status) = item.fetch_status() else {
        return;
    };
    let headers = item.scoped.response.as_ref().map(|r| &r.headers);
    let mut etag = headers.and_then(|h| header_string(h, ETAG));
    let mut last_modified = headers.and_then(|h| header_string(h, LAST_MODIFIED));
    let mut content_digest = item.content_digest().cloned();

    if status.is_not_modified()
        && let Some(previous) = item.latest_history()
    {
        etag = etag.or_else(|| previous.etag.clone());
        last_modified = last_modified.or_else(|| previous.last_modified.clone());
        content_digest = previous.content_digest.clone();
    }

    let recorded = item.scoped.recorded.map(|r| r.size);
    let snapshot = FetchHistory {
        status: status.code(),
        fetched_at: item.fetch_begin().unwrap_or_else(Utc::now),
        etag,
        last_modified,
        content_digest,
        reference_length: item.scoped.reference_length.or(recorded),
    };
    item.push_history(snapshot, keep);
}
