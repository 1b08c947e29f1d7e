#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("malformed digest: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, VerifyError>;
