//! Shared crawl model for the arcfetch crates.
//!
//! - [`item`]: the per-URL work item the fetcher and archiver annotate
//! - [`record`]: archival record candidates keyed by role
//! - [`history`]: the cross-crawl content digest store
//! - [`server`]: host, server and credential state

pub mod history;
pub mod item;
pub mod record;
pub mod server;
pub mod time;

pub use history::{Capture, DigestHistory, DigestHistoryEntry, DigestKey, HistoryError, MemoryDigestHistory};
pub use item::{
    CrawlItem, FetchHistory, FetchMethod, FetchOverrides, FetchScoped, FetchStatus, RecordedTransfer,
    ResponseSummary,
};
pub use record::{ArchivalRecord, NamedFields, RecordIdGenerator, RecordRole, RecordSet, RecordType, UuidGenerator};
pub use server::{CrawlHost, CrawlServer, Credential, CredentialStore, MemoryServerCache, ServerCache};
