//! Archive decisions for completed fetches.
//!
//! [`ArchivePipeline`] looks the fetched payload up in the digest history,
//! lets [`RevisitSelector`] turn unchanged content into a revisit record,
//! and otherwise attaches a full response record and remembers the capture.

mod dedup;
mod pipeline;
mod revisit;

pub use dedup::DigestDedup;
pub use pipeline::{ArchiveDecision, ArchivePipeline};
pub use revisit::{ANNOTATION_REVISIT_DIGEST, ANNOTATION_REVISIT_NOT_MODIFIED, RevisitKind, RevisitSelector};
