//! Revisit record selection.
//!
//! A completed fetch becomes a revisit when the server answered 304, or when
//! the digest history reports the same payload was captured before (possibly
//! under another URL). The 304 rule wins when both apply.

use std::sync::Arc;

use arcfetch_core::record::{
    HEADER_KEY_ETAG, HEADER_KEY_LAST_MODIFIED, HEADER_KEY_PROFILE, HEADER_KEY_REFERS_TO,
    HEADER_KEY_REFERS_TO_DATE, HEADER_KEY_REFERS_TO_TARGET_URI, HEADER_KEY_TRUNCATED,
    HTTP_RESPONSE_MIMETYPE, NAMED_FIELD_TRUNCATED_VALUE_LENGTH, PROFILE_REVISIT_IDENTICAL_DIGEST,
    PROFILE_REVISIT_NOT_MODIFIED,
};
use arcfetch_core::time::warc_date;
use arcfetch_core::{
    ArchivalRecord, CrawlItem, DigestHistoryEntry, NamedFields, RecordIdGenerator, RecordRole, RecordType,
    UuidGenerator,
};
use chrono::Utc;
use http::header::{ETAG, LAST_MODIFIED};
use serde::Serialize;

pub const ANNOTATION_REVISIT_NOT_MODIFIED: &str = "warcRevisit:notModified";
pub const ANNOTATION_REVISIT_DIGEST: &str = "warcRevisit:uriAgnosticDigest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevisitKind {
    NotModified,
    IdenticalDigest,
}

pub struct RevisitSelector {
    ids: Arc<dyn RecordIdGenerator>,
}

impl Default for RevisitSelector {
    fn default() -> Self { Self::new(Arc::new(UuidGenerator)) }
}

impl RevisitSelector {
    pub fn new(ids: Arc<dyn RecordIdGenerator>) -> Self { Self { ids } }

    /// Attaches a revisit record as the item's principal record if a rule
    /// applies, and says which one did.
    pub fn select(&self, item: &mut CrawlItem) -> Option<RevisitKind> {
        if item.fetch_status().is_some_and(|s| s.is_not_modified()) {
            let record = self.not_modified_record(item);
            item.scoped.records.insert(RecordRole::Principal, record);
            item.annotate(ANNOTATION_REVISIT_NOT_MODIFIED);
            return Some(RevisitKind::NotModified);
        }

        let entry = item.scoped.digest_history.clone()?;
        if entry.original_url.is_empty() {
            return None;
        }
        let record = self.identical_digest_record(item, &entry);
        item.scoped.records.insert(RecordRole::Principal, record);
        item.annotate(ANNOTATION_REVISIT_DIGEST);
        Some(RevisitKind::IdenticalDigest)
    }

    /// Revisit backed by the server's own 304. The record holds the short
    /// 304 transaction as recorded.
    pub fn not_modified_record(&self, item: &CrawlItem) -> ArchivalRecord {
        let recorded = item.scoped.recorded.map(|r| r.size).unwrap_or(0);
        let mut fields = NamedFields::new();
        fields.add(HEADER_KEY_PROFILE, PROFILE_REVISIT_NOT_MODIFIED);

        if let Some(response) = &item.scoped.response {
            for (name, label) in [(ETAG, HEADER_KEY_ETAG), (LAST_MODIFIED, HEADER_KEY_LAST_MODIFIED)] {
                if let Some(value) = response.headers.get(name).and_then(|v| v.to_str().ok()) {
                    fields.add(label, value);
                }
            }
        }
        self.revisit(item, recorded, fields)
    }

    /// Revisit backed by a digest match. Only the response envelope is kept;
    /// the payload is a byte-for-byte duplicate of the referenced capture.
    pub fn identical_digest_record(&self, item: &CrawlItem, entry: &DigestHistoryEntry) -> ArchivalRecord {
        let envelope = item.scoped.recorded.map(|r| r.content_begin).unwrap_or(0);
        let mut fields = NamedFields::new();
        fields.add(HEADER_KEY_PROFILE, PROFILE_REVISIT_IDENTICAL_DIGEST);
        fields.add(HEADER_KEY_TRUNCATED, NAMED_FIELD_TRUNCATED_VALUE_LENGTH);
        fields.add(HEADER_KEY_REFERS_TO, format!("<{}>", entry.record_id));
        fields.add(HEADER_KEY_REFERS_TO_TARGET_URI, entry.original_url.as_str());
        fields.add(HEADER_KEY_REFERS_TO_DATE, warc_date(entry.original_date));
        self.revisit(item, envelope, fields)
    }

    fn revisit(&self, item: &CrawlItem, content_length: u64, extra_headers: NamedFields) -> ArchivalRecord {
        ArchivalRecord {
            record_type: RecordType::Revisit,
            url: item.url().to_string(),
            create_timestamp: warc_date(item.fetch_begin().unwrap_or_else(Utc::now)),
            record_id: self.ids.record_id(),
            mimetype: HTTP_RESPONSE_MIMETYPE.to_string(),
            content_length,
            enforce_length: true,
            extra_headers,
        }
    }
}
