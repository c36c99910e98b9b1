use thiserror::Error;

/// Errors surfaced by the chain store, transaction model, UTXO index, and
/// mining engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Crypto(#[from] shared::SharedError),

    #[error("invalid address: {0}")]
    InvalidAddress(#[from] wallet::WalletError),

    #[error("mining was stopped before a winning nonce was found")]
    MiningAborted,
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

impl From<rocksdb::Error> for CoreError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for CoreError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for CoreError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Serialization(err.to_string())
    }
}
