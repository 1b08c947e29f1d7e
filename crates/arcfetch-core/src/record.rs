//! Archival record candidates.
//!
//! Components that decide what to archive attach candidates to a work item
//! under a [`RecordRole`]; the archive writer later serializes the principal
//! record followed by its concurrent records.

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

pub const HTTP_RESPONSE_MIMETYPE: &str = "application/http; msgtype=response";
pub const HTTP_REQUEST_MIMETYPE: &str = "application/http; msgtype=request";

pub const HEADER_KEY_PROFILE: &str = "WARC-Profile";
pub const HEADER_KEY_TRUNCATED: &str = "WARC-Truncated";
pub const HEADER_KEY_REFERS_TO: &str = "WARC-Refers-To";
pub const HEADER_KEY_REFERS_TO_TARGET_URI: &str = "WARC-Refers-To-Target-URI";
pub const HEADER_KEY_REFERS_TO_DATE: &str = "WARC-Refers-To-Date";
pub const HEADER_KEY_CONCURRENT_TO: &str = "WARC-Concurrent-To";
pub const HEADER_KEY_ETAG: &str = "WARC-Etag";
pub const HEADER_KEY_LAST_MODIFIED: &str = "WARC-Last-Modified";

pub const PROFILE_REVISIT_NOT_MODIFIED: &str =
    "http://netpreserve.org/warc/1.0/revisit/server-not-modified";
pub const PROFILE_REVISIT_IDENTICAL_DIGEST: &str =
    "http://netpreserve.org/warc/1.0/revisit/identical-payload-digest";

pub const NAMED_FIELD_TRUNCATED_VALUE_LENGTH: &str = "length";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Response,
    Resource,
    Revisit,
    Request,
    Metadata,
}

/// Response, resource and revisit records are principal; request and
/// metadata records are concurrent to the principal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordRole {
    Principal,
    Request,
    Metadata,
}

impl RecordRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordRole::Principal => "principal-record",
            RecordRole::Request => "request-record",
            RecordRole::Metadata => "metadata-record",
        }
    }
}

/// Ordered label/value header block. Labels may repeat; lookups return the
/// first match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedFields(Vec<(String, String)>);

impl NamedFields {
    pub fn new() -> Self { Self::default() }

    pub fn add(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.0.push((label.into(), value.into()));
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.0.iter().find(|(l, _)| l == label).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, label: &str) -> bool { self.get(label).is_some() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(l, v)| (l.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl Serialize for NamedFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, value) in &self.0 {
            map.serialize_entry(label, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivalRecord {
    pub record_type:      RecordType,
    pub url:              String,
    /// Creation date in `yyyy-MM-ddTHH:mm:ssZ` form.
    pub create_timestamp: String,
    pub record_id:        String,
    pub mimetype:         String,
    pub content_length:   u64,
    /// Writer must emit exactly `content_length` bytes, truncating the
    /// recorded stream if it is longer.
    pub enforce_length:   bool,
    pub extra_headers:    NamedFields,
}

/// Role-keyed candidates in insertion order. Re-inserting a role replaces
/// the record but keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet(Vec<(RecordRole, ArchivalRecord)>);

impl RecordSet {
    pub fn insert(&mut self, role: RecordRole, record: ArchivalRecord) {
        match self.0.iter_mut().find(|(r, _)| *r == role) {
            Some(slot) => slot.1 = record,
            None => self.0.push((role, record)),
        }
    }

    pub fn get(&self, role: RecordRole) -> Option<&ArchivalRecord> {
        self.0.iter().find(|(r, _)| *r == role).map(|(_, rec)| rec)
    }

    pub fn principal(&self) -> Option<&ArchivalRecord> { self.get(RecordRole::Principal) }

    pub fn iter(&self) -> impl Iterator<Item = (RecordRole, &ArchivalRecord)> {
        self.0.iter().map(|(r, rec)| (*r, rec))
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl Serialize for RecordSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter().map(|(role, rec)| (role.as_str(), rec)))
    }
}

/// Mints record identifiers. Every call returns a fresh id.
pub trait RecordIdGenerator: Send + Sync {
    fn record_id(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl RecordIdGenerator for UuidGenerator {
    fn record_id(&self) -> String { format!("urn:uuid:{}", uuid::Uuid::new_v4()) }
}
