//! Content digests for crawled payloads.
//!
//! Digests are computed incrementally while bytes stream to storage, so the
//! payload is only touched once. The algorithm is chosen by name at runtime
//! (`sha1` by default) and finished digests render as `algo:BASE32`.
//!
//! # Example
//!
//! ```
//! use arcfetch_verify::{DigestAlgorithm, Hasher};
//!
//! let mut hasher = DigestAlgorithm::Sha1.hasher();
//! hasher.update(b"hello ");
//! hasher.update(b"world");
//! let digest = hasher.finish();
//!
//! assert_eq!(digest, DigestAlgorithm::Sha1.digest(b"hello world"));
//! ```

pub use self::error::{Result, VerifyError};
pub use self::hasher::{ContentDigest, ContentHasher, DigestAlgorithm, DigestHasher, Hasher};

mod error;
mod hasher;
