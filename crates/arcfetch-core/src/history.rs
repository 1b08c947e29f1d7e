//! Cross-crawl content digest history.
//!
//! The store maps a content digest to the first capture that produced it.
//! Lookups never mutate; `record_or_update` creates the entry or bumps its
//! repeat counter atomically under the store's own lock.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::Path;

use arcfetch_verify::ContentDigest;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("history snapshot is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not replace history snapshot: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Algorithm-qualified digest, optionally also qualified by content length
/// so two payloads sharing a truncated hash cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DigestKey(String);

impl DigestKey {
    pub fn new(digest: &ContentDigest) -> Self { Self(digest.to_string()) }

    pub fn with_length(digest: &ContentDigest, length: u64) -> Self {
        Self(format!("{digest}:{length}"))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for DigestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestHistoryEntry {
    pub original_url:  String,
    pub original_date: DateTime<Utc>,
    pub record_id:     String,
    pub seen_count:    u64,
}

/// The capture being recorded against a digest.
#[derive(Debug, Clone)]
pub struct Capture {
    pub url:       String,
    pub date:      DateTime<Utc>,
    pub record_id: String,
}

pub trait DigestHistory: Send + Sync {
    fn lookup(&self, key: &DigestKey) -> Option<DigestHistoryEntry>;

    /// Creates the entry for `key` from `capture`, or increments the repeat
    /// counter of an existing one. Returns the entry as stored.
    fn record_or_update(&self, key: &DigestKey, capture: Capture) -> DigestHistoryEntry;
}

#[derive(Debug, Default)]
pub struct MemoryDigestHistory {
    entries: RwLock<HashMap<DigestKey, DigestHistoryEntry>>,
}

impl MemoryDigestHistory {
    pub fn new() -> Self { Self::default() }

    /// Loads a snapshot written by [`persist`](Self::persist). A missing file
    /// yields an empty history.
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = std::fs::read(path)?;
        let entries: HashMap<DigestKey, DigestHistoryEntry> = serde_json::from_slice(&bytes)?;
        tracing::debug!(path = %path.display(), entries = entries.len(), "loaded digest history");
        Ok(Self { entries: RwLock::new(entries) })
    }

    /// Writes the snapshot next to `path` and renames it into place.
    pub fn persist(&self, path: &Path) -> Result<(), HistoryError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let entries = self.entries.read();
            serde_json::to_writer(&mut tmp, &*entries)?;
        }
        tmp.flush()?;
        tmp.persist(path)?;
        Ok(())
    }

    pub fn len(&self) -> usize { self.entries.read().len() }

    pub fn is_empty(&self) -> bool { self.entries.read().is_empty() }
}

impl DigestHistory for MemoryDigestHistory {
    fn lookup(&self, key: &DigestKey) -> Option<DigestHistoryEntry> {
        self.entries.read().get(key).cloned()
    }

    fn record_or_update(&self, key: &DigestKey, capture: Capture) -> DigestHistoryEntry {
        let mut entries = self.entries.write();
        entries
            .entry(key.clone())
            .and_modify(|e| e.seen_count += 1)
            .or_insert_with(|| DigestHistoryEntry {
                original_url:  capture.url,
                original_date: capture.date,
                record_id:     capture.record_id,
                seen_count:    1,
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arcfetch_verify::DigestAlgorithm;
    use tempfile::TempDir;

    use super::*;
    use crate::time::from_epoch_millis;

    fn capture(url: &str, id: &str) -> Capture {
        Capture {
            url:       url.to_string(),
            date:      from_epoch_millis(1_370_000_000_000).unwrap(),
            record_id: id.to_string(),
        }
    }

    #[test]
    fn test_first_capture_wins() {
        let store = MemoryDigestHistory::new();
        let key = DigestKey::new(&DigestAlgorithm::Sha1.digest(b"payload"));

        assert!(store.lookup(&key).is_none());
        let first = store.record_or_update(&key, capture("http://a/", "urn:uuid:1"));
        assert_eq!(first.seen_count, 1);

        let second = store.record_or_update(&key, capture("http://b/", "urn:uuid:2"));
        assert_eq!(second.original_url, "http://a/");
        assert_eq!(second.record_id, "urn:uuid:1");
        assert_eq!(second.seen_count, 2);
        assert_eq!(store.lookup(&key), Some(second));
    }

    #[test]
    fn test_length_qualified_keys_differ() {
        let digest = DigestAlgorithm::Sha1.digest(b"payload");
        assert_ne!(DigestKey::new(&digest), DigestKey::with_length(&digest, 7));
        assert!(DigestKey::with_length(&digest, 7).as_str().ends_with(":7"));
    }

    #[test]
    fn test_concurrent_updates_count_every_call() {
        let store = Arc::new(MemoryDigestHistory::new());
        let key = DigestKey::new(&DigestAlgorithm::Sha1.digest(b"same"));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let key = key.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        store.record_or_update(&key, capture("http://x/", &format!("{i}-{j}")));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.lookup(&key).unwrap().seen_count, 400);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");

        let store = MemoryDigestHistory::new();
        let key = DigestKey::new(&DigestAlgorithm::Sha1.digest(b"kept"));
        store.record_or_update(&key, capture("http://example.org/", "urn:uuid:k"));
        store.persist(&path).unwrap();

        let loaded = MemoryDigestHistory::load(&path).unwrap();
        assert_eq!(loaded.lookup(&key), store.lookup(&key));
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let loaded = MemoryDigestHistory::load(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_empty());
    }
}
