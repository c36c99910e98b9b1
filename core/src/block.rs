//! Block model (component D): header, transaction list, and the binary
//! encoding that is the node's authoritative wire and on-disk
//! representation.

use crate::error::{CoreError, CoreResult};
use crate::merkle::merkle_root;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use shared::Hash512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub timestamp: u64,
    pub height: u64,
    /// Empty (`Hash512::zero()`) for the genesis block.
    pub prev_hash: Hash512,
    pub merkle_root: Hash512,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The block's content hash: the key it is stored under in the chain
    /// store. Distinct from the proof-of-work hash computed over `InitData`
    /// during mining (see `core::pow`), which is never persisted.
    #[must_use]
    pub fn hash(&self) -> Hash512 {
        Hash512::sha512(&self.encode_header())
    }

    fn encode_header(&self) -> Vec<u8> {
        bincode::serde::encode_to_vec(&self.header, bincode::config::standard())
            .expect("block header encoding is infallible for well-formed values")
    }

    #[must_use]
    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.prev_hash.is_zero()
    }

    fn transaction_blobs(&self) -> Vec<Vec<u8>> {
        self.transactions
            .iter()
            .map(|tx| {
                bincode::serde::encode_to_vec(tx, bincode::config::standard())
                    .expect("transaction encoding is infallible for well-formed values")
            })
            .collect()
    }

    #[must_use]
    pub fn compute_merkle_root(&self) -> Hash512 {
        merkle_root(&self.transaction_blobs())
    }

    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let (block, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(block)
    }

    /// Structural validation independent of PoW and the UTXO set: the
    /// merkle root matches the transaction list, and the first (only, for
    /// genesis) transaction is a coinbase while no later transaction is.
    pub fn validate_basic(&self) -> CoreResult<()> {
        if self.header.merkle_root != self.compute_merkle_root() {
            return Err(CoreError::InvalidBlock("merkle root mismatch".into()));
        }

        if self.transactions.is_empty() {
            return Err(CoreError::InvalidBlock("block has no transactions".into()));
        }

        if !self.transactions[0].is_coinbase() {
            return Err(CoreError::InvalidBlock(
                "first transaction must be coinbase".into(),
            ));
        }
        if self.transactions[1..].iter().any(Transaction::is_coinbase) {
            return Err(CoreError::InvalidBlock(
                "only the first transaction may be coinbase".into(),
            ));
        }

        for tx in &self.transactions {
            tx.validate_basic()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MasterSigningKey;

    fn sample_block() -> Block {
        let master = MasterSigningKey::generate();
        let coinbase = Transaction::coinbase([1u8; 20], b"", &master);
        let merkle = merkle_root(&[bincode::serde::encode_to_vec(
            &coinbase,
            bincode::config::standard(),
        )
        .unwrap()]);

        Block {
            header: BlockHeader {
                timestamp: 1_700_000_000,
                height: 0,
                prev_hash: Hash512::zero(),
                merkle_root: merkle,
                nonce: 0,
            },
            transactions: vec![coinbase],
        }
    }

    #[test]
    fn encode_then_decode_roundtrips() {
        let block = sample_block();
        let bytes = block.encode().unwrap();
        let decoded = Block::decode(&bytes).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn validate_basic_accepts_well_formed_genesis() {
        let block = sample_block();
        block.validate_basic().unwrap();
        assert!(block.is_genesis());
    }

    #[test]
    fn validate_basic_rejects_merkle_mismatch() {
        let mut block = sample_block();
        block.header.merkle_root = Hash512::zero();
        assert!(block.validate_basic().is_err());
    }

    #[test]
    fn hash_changes_when_nonce_changes() {
        let mut block = sample_block();
        let first = block.hash();
        block.header.nonce = 1;
        assert_ne!(first, block.hash());
    }
}
