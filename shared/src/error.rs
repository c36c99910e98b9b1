use thiserror::Error;

/// Errors raised by the primitive crypto/hash layer shared across crates.
#[derive(Error, Debug)]
pub enum SharedError {
    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidHashLength { expected: usize, actual: usize },

    #[error("invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    #[error("invalid signature encoding")]
    InvalidSignature,

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("cryptographic error: {0}")]
    CryptographicError(String),
}

pub type Result<T> = std::result::Result<T, SharedError>;
