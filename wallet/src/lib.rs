//! The wallet/address facade (component I): key-pair generation, address
//! derivation, and the on-disk wallet file layout. Named an external
//! collaborator by the node's core — the core only ever calls [`lock_hash`]
//! to turn an address string into the public-key-hash it locks an output to.

pub mod address;
pub mod store;

pub use store::WalletStore;

use shared::KeyPair;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid address")]
    InvalidAddress,
    #[error("invalid address checksum")]
    InvalidChecksum,
    #[error("cryptographic error")]
    Crypto,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A generated or loaded key pair together with its derived address.
pub struct Wallet {
    pub keypair: KeyPair,
}

impl Wallet {
    #[must_use]
    pub fn generate() -> Self {
        Self {
            keypair: KeyPair::generate(),
        }
    }

    #[must_use]
    pub fn address(&self) -> String {
        let hash = shared::public_key_hash(self.keypair.public_key.as_bytes());
        address::encode(&hash)
    }
}

/// Decodes an address into the public-key-hash a future output is locked to.
/// This is the `lock(address)` operation of the transaction model; it is the
/// only address-decoding call the core makes, and always through this
/// function.
pub fn lock_hash(address: &str) -> Result<[u8; 20], WalletError> {
    address::decode(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_address_is_lockable_back_to_its_own_pubkey_hash() {
        let wallet = Wallet::generate();
        let address = wallet.address();
        let hash = lock_hash(&address).unwrap();
        assert_eq!(hash, shared::public_key_hash(wallet.keypair.public_key.as_bytes()));
    }
}
