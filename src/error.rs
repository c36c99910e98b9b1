//! The binary crate's error type: composes the library crates' typed errors
//! via `#[from]` and is the only place this node maps an error to a process
//! exit code (see `main`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] ferrochain_core::CoreError),

    #[error(transparent)]
    Wallet(#[from] wallet::WalletError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message payload: {0}")]
    Decode(String),

    #[error("NODE_ID environment variable is required")]
    MissingNodeId,
}

impl From<bincode::error::DecodeError> for AppError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for AppError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Decode(err.to_string())
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
