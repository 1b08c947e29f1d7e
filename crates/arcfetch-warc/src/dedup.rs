//! Consulting and updating the content digest history for a fetched item.

use std::sync::Arc;

use arcfetch_core::item::ANNOTATION_MIDFETCH_ABORT;
use arcfetch_core::{Capture, CrawlItem, DigestHistory, DigestHistoryEntry, DigestKey};
use chrono::Utc;

/// Binds a [`DigestHistory`] store to the items flowing through the
/// pipeline.
#[derive(Clone)]
pub struct DigestDedup {
    store:         Arc<dyn DigestHistory>,
    key_by_length: bool,
}

impl DigestDedup {
    pub fn new(store: Arc<dyn DigestHistory>) -> Self { Self { store, key_by_length: false } }

    /// Qualify keys with the payload length as well as the digest.
    #[must_use]
    pub fn key_by_length(mut self, on: bool) -> Self {
        self.key_by_length = on;
        self
    }

    pub fn store(&self) -> &Arc<dyn DigestHistory> { &self.store }

    /// Complete, successful fetches with a digest. Truncated or aborted
    /// bodies are digested over partial bytes and never take part in
    /// deduplication.
    pub fn eligible(item: &CrawlItem) -> bool {
        item.content_digest().is_some()
            && !item.is_truncated()
            && !item.has_annotation(ANNOTATION_MIDFETCH_ABORT)
            && item.fetch_status().and_then(|s| s.http()).is_some_and(|c| (200..300).contains(&c))
    }

    pub fn key_for(&self, item: &CrawlItem) -> Option<DigestKey> {
        let digest = item.content_digest()?;
        Some(match (self.key_by_length, item.scoped.recorded) {
            (true, Some(recorded)) => DigestKey::with_length(digest, recorded.body_size()),
            _ => DigestKey::new(digest),
        })
    }

    /// Looks the item's digest up and stashes any earlier capture on the
    /// item. Returns true when one was found.
    pub fn load(&self, item: &mut CrawlItem) -> bool {
        if !Self::eligible(item) {
            return false;
        }
        let Some(key) = self.key_for(item) else {
            return false;
        };
        let entry = self.store.lookup(&key);
        if let Some(entry) = &entry {
            tracing::debug!(
                url = %item.url(),
                original = %entry.original_url,
                seen = entry.seen_count,
                "digest seen before"
            );
        }
        item.scoped.digest_history = entry;
        item.scoped.digest_history.is_some()
    }

    /// Records the item as a capture of its digest under `record_id`.
    pub fn record(&self, item: &CrawlItem, record_id: &str) -> Option<DigestHistoryEntry> {
        if !Self::eligible(item) {
            return None;
        }
        let key = self.key_for(item)?;
        let capture = Capture {
            url:       item.url().to_string(),
            date:      item.fetch_begin().unwrap_or_else(Utc::now),
            record_id: record_id.to_string(),
        };
        Some(self.store.record_or_update(&key, capture))
    }
}

#[cfg(test)]
mod tests {
    use arcfetch_core::item::ANNOTATION_TIMER_TRUNC;
    use arcfetch_core::{FetchStatus, MemoryDigestHistory, RecordedTransfer};
    use arcfetch_verify::DigestAlgorithm;
    use url::Url;

    use super::*;

    fn fetched(url: &str, status: u16, body: &[u8]) -> CrawlItem {
        let mut item = CrawlItem::new(Url::parse(url).unwrap());
        item.set_fetch_begin(Utc::now());
        item.set_fetch_status(FetchStatus::Http(status));
        item.set_content_digest(DigestAlgorithm::Sha1.digest(body));
        item.scoped.recorded =
            Some(RecordedTransfer { size: 40 + body.len() as u64, content_begin: 40, request_length: 0 });
        item
    }

    #[test]
    fn test_record_then_load_across_urls() {
        let dedup = DigestDedup::new(Arc::new(MemoryDigestHistory::new()));

        let mut first = fetched("http://a.example/", 200, b"same");
        assert!(!dedup.load(&mut first));
        dedup.record(&first, "urn:uuid:first").unwrap();

        let mut second = fetched("http://b.example/", 200, b"same");
        assert!(dedup.load(&mut second));
        let entry = second.scoped.digest_history.as_ref().unwrap();
        assert_eq!(entry.original_url, "http://a.example/");
        assert_eq!(entry.record_id, "urn:uuid:first");
    }

    #[test]
    fn test_ineligible_items_are_skipped() {
        let dedup = DigestDedup::new(Arc::new(MemoryDigestHistory::new()));

        let mut truncated = fetched("http://a.example/", 200, b"x");
        truncated.annotate(ANNOTATION_TIMER_TRUNC);
        assert!(dedup.record(&truncated, "urn:uuid:t").is_none());

        let mut aborted = fetched("http://a.example/", 200, b"");
        aborted.annotate(ANNOTATION_MIDFETCH_ABORT);
        assert!(!dedup.load(&mut aborted));
        assert!(dedup.record(&aborted, "urn:uuid:a").is_none());

        let not_found = fetched("http://a.example/", 404, b"x");
        assert!(dedup.record(&not_found, "urn:uuid:n").is_none());

        let mut undigested = CrawlItem::new(Url::parse("http://a.example/").unwrap());
        undigested.set_fetch_status(FetchStatus::Http(200));
        assert!(!dedup.load(&mut undigested));
    }

    #[test]
    fn test_length_qualified_keys() {
        let dedup = DigestDedup::new(Arc::new(MemoryDigestHistory::new())).key_by_length(true);
        let item = fetched("http://a.example/", 200, b"four");
        assert!(dedup.key_for(&item).unwrap().as_str().ends_with(":4"));
    }
}
