use std::fmt;
use std::str::FromStr;

use digest::Digest;

use crate::{Result, VerifyError};

pub trait Hasher: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self) -> Vec<u8>;
}

pub struct DigestHasher<D: Digest + Send>(D);

impl<D: Digest + Send> DigestHasher<D> {
    pub fn new() -> Self { Self(D::new()) }
}

impl<D: Digest + Send> Default for DigestHasher<D> {
    fn default() -> Self { Self::new() }
}

impl<D: Digest + Send> Hasher for DigestHasher<D> {
    fn update(&mut self, data: &[u8]) { Digest::update(&mut self.0, data); }
    fn finalize(self) -> Vec<u8> { self.0.finalize().to_vec() }
}

/// Digest algorithms a crawl can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DigestAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Md5,
}

impl DigestAlgorithm {
    pub fn digest_length(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Md5 => 16,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Md5 => "md5",
        }
    }

    pub fn hasher(&self) -> ContentHasher {
        match self {
            DigestAlgorithm::Sha1 => ContentHasher::Sha1(DigestHasher::new()),
            DigestAlgorithm::Sha256 => ContentHasher::Sha256(DigestHasher::new()),
            DigestAlgorithm::Md5 => ContentHasher::Md5(DigestHasher::new()),
        }
    }

    /// One-shot digest of `data`.
    pub fn digest(&self, data: &[u8]) -> ContentDigest {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finish()
    }
}

impl FromStr for DigestAlgorithm {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(DigestAlgorithm::Sha1),
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            "md5" => Ok(DigestAlgorithm::Md5),
            other => Err(VerifyError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl From<DigestAlgorithm> for String {
    fn from(a: DigestAlgorithm) -> Self { a.as_str().to_string() }
}

impl TryFrom<String> for DigestAlgorithm {
    type Error = VerifyError;

    fn try_from(s: String) -> Result<Self> { s.parse() }
}

/// Running hasher for whichever algorithm was configured at open time.
pub enum ContentHasher {
    Sha1(DigestHasher<sha1::Sha1>),
    Sha256(DigestHasher<sha2::Sha256>),
    Md5(DigestHasher<md5::Md5>),
}

impl ContentHasher {
    pub fn algorithm(&self) -> DigestAlgorithm {
        match self {
            ContentHasher::Sha1(_) => DigestAlgorithm::Sha1,
            ContentHasher::Sha256(_) => DigestAlgorithm::Sha256,
            ContentHasher::Md5(_) => DigestAlgorithm::Md5,
        }
    }

    pub fn finish(self) -> ContentDigest {
        let algorithm = self.algorithm();
        ContentDigest { algorithm, value: self.finalize() }
    }
}

impl Hasher for ContentHasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Sha1(h) => h.update(data),
            ContentHasher::Sha256(h) => h.update(data),
            ContentHasher::Md5(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            ContentHasher::Sha1(h) => h.finalize(),
            ContentHasher::Sha256(h) => h.finalize(),
            ContentHasher::Md5(h) => h.finalize(),
        }
    }
}

/// A finished digest. Renders as `sha1:BASE32`, the form crawl logs and
/// dedup indexes use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentDigest {
    pub algorithm: DigestAlgorithm,
    pub value:     Vec<u8>,
}

impl ContentDigest {
    pub fn base32(&self) -> String { data_encoding::BASE32.encode(&self.value) }

    pub fn hex(&self) -> String { hex::encode(&self.value) }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.base32())
    }
}

impl FromStr for ContentDigest {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self> {
        let (algo, encoded) = s
            .split_once(':')
            .ok_or_else(|| VerifyError::Malformed(s.to_string()))?;
        let algorithm: DigestAlgorithm = algo.parse()?;
        let value = data_encoding::BASE32
            .decode(encoded.as_bytes())
            .map_err(|_| VerifyError::Malformed(s.to_string()))?;
        if value.len() != algorithm.digest_length() {
            return Err(VerifyError::Malformed(s.to_string()));
        }
        Ok(Self { algorithm, value })
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self { d.to_string() }
}

impl TryFrom<String> for ContentDigest {
    type Error = VerifyError;

    fn try_from(s: String) -> Result<Self> { s.parse() }
}
