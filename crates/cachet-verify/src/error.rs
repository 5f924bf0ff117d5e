use std::io;

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("digest mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, VerificationError>;
