pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use crypto::{
    public_key_hash, KeyPair, MasterSigningKey, MasterVerifyingKey, PrivateKey, PublicKey,
    Signature,
};
pub use error::SharedError;
pub use hash::{Hash512, PowHash};
pub use types::{Amount, BlockHeight, BlockId, OutPoint, OutputIndex, Timestamp, TxId};

pub type Result<T> = std::result::Result<T, SharedError>;
