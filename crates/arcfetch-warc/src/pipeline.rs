use std::sync::Arc;

use arcfetch_core::item::{ANNOTATION_LENGTH_TRUNC, ANNOTATION_TIMER_TRUNC};
use arcfetch_core::record::{
    HEADER_KEY_CONCURRENT_TO, HEADER_KEY_TRUNCATED, HTTP_REQUEST_MIMETYPE, HTTP_RESPONSE_MIMETYPE,
    NAMED_FIELD_TRUNCATED_VALUE_LENGTH,
};
use arcfetch_core::time::warc_date;
use arcfetch_core::{
    ArchivalRecord, CrawlItem, DigestHistory, NamedFields, RecordIdGenerator, RecordRole, RecordType, UuidGenerator,
};
use chrono::Utc;
use serde::Serialize;

use crate::dedup::DigestDedup;
use crate::revisit::{RevisitKind, RevisitSelector};

const NAMED_FIELD_TRUNCATED_VALUE_TIME: &str = "time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "revisit")]
pub enum ArchiveDecision {
    /// No HTTP response was recorded; nothing to archive.
    Skipped,
    Revisit(RevisitKind),
    Response,
}

/// Decides which record candidates a completed fetch produces and keeps the
/// digest history current.
pub struct ArchivePipeline {
    dedup:          DigestDedup,
    selector:       RevisitSelector,
    ids:            Arc<dyn RecordIdGenerator>,
    write_requests: bool,
}

impl ArchivePipeline {
    pub fn new(store: Arc<dyn DigestHistory>) -> Self {
        let ids: Arc<dyn RecordIdGenerator> = Arc::new(UuidGenerator);
        Self {
            dedup: DigestDedup::new(store),
            selector: RevisitSelector::new(Arc::clone(&ids)),
            ids,
            write_requests: false,
        }
    }

    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn RecordIdGenerator>) -> Self {
        self.selector = RevisitSelector::new(Arc::clone(&ids));
        self.ids = ids;
        self
    }

    #[must_use]
    pub fn key_by_length(mut self, on: bool) -> Self {
        self.dedup = self.dedup.key_by_length(on);
        self
    }

    /// Also emit a request record concurrent to each principal record.
    #[must_use]
    pub fn with_request_records(mut self, on: bool) -> Self {
        self.write_requests = on;
        self
    }

    pub fn history(&self) -> &Arc<dyn DigestHistory> { self.dedup.store() }

    pub fn process(&self, item: &mut CrawlItem) -> ArchiveDecision {
        if item.fetch_status().and_then(|s| s.http()).is_none() || item.scoped.recorded.is_none() {
            return ArchiveDecision::Skipped;
        }

        self.dedup.load(item);
        let decision = match self.selector.select(item) {
            Some(kind) => ArchiveDecision::Revisit(kind),
            None => {
                let record = self.response_record(item);
                let id = record.record_id.clone();
                item.scoped.records.insert(RecordRole::Principal, record);
                if let Some(entry) = self.dedup.record(item, &id) {
                    tracing::trace!(url = %item.url(), seen = entry.seen_count, "digest recorded");
                }
                ArchiveDecision::Response
            }
        };

        if self.write_requests
            && let Some(principal) = item.scoped.records.principal().map(|r| r.record_id.clone())
        {
            let record = self.request_record(item, &principal);
            item.scoped.records.insert(RecordRole::Request, record);
        }

        tracing::debug!(url = %item.url(), ?decision, records = item.scoped.records.len(), "archive decision");
        decision
    }

    fn response_record(&self, item: &CrawlItem) -> ArchivalRecord {
        let mut extra_headers = NamedFields::new();
        if item.has_annotation(ANNOTATION_LENGTH_TRUNC) {
            extra_headers.add(HEADER_KEY_TRUNCATED, NAMED_FIELD_TRUNCATED_VALUE_LENGTH);
        } else if item.has_annotation(ANNOTATION_TIMER_TRUNC) {
            extra_headers.add(HEADER_KEY_TRUNCATED, NAMED_FIELD_TRUNCATED_VALUE_TIME);
        }
        ArchivalRecord {
            record_type: RecordType::Response,
            url: item.url().to_string(),
            create_timestamp: warc_date(item.fetch_begin().unwrap_or_else(Utc::now)),
            record_id: self.ids.record_id(),
            mimetype: HTTP_RESPONSE_MIMETYPE.to_string(),
            content_length: item.scoped.recorded.map(|r| r.size).unwrap_or(0),
            enforce_length: false,
            extra_headers,
        }
    }

    fn request_record(&self, item: &CrawlItem, principal_id: &str) -> ArchivalRecord {
        let mut extra_headers = NamedFields::new();
        extra_headers.add(HEADER_KEY_CONCURRENT_TO, format!("<{principal_id}>"));
        ArchivalRecord {
            record_type: RecordType::Request,
            url: item.url().to_string(),
            create_timestamp: warc_date(item.fetch_begin().unwrap_or_else(Utc::now)),
            record_id: self.ids.record_id(),
            mimetype: HTTP_REQUEST_MIMETYPE.to_string(),
            content_length: item.scoped.recorded.map(|r| r.request_length).unwrap_or(0),
            enforce_length: true,
            extra_headers,
        }
    }
}
