//! Transaction model (component C): construction, canonical hashing,
//! trimmed-copy signing, and verification.

use crate::error::{CoreError, CoreResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use shared::{Hash512, KeyPair, MasterSigningKey, OutPoint, PublicKey, Signature};
use std::collections::HashMap;

/// Fixed coinbase reward, in the node's smallest unit. No fee market and no
/// reward schedule (non-goals); this is the only source of new value.
pub const COINBASE_REWARD: u64 = 100;

const COINBASE_PAYLOAD_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// The consumed output. For a coinbase input this is a sentinel: `txid`
    /// is the hash of the coinbase payload, `vout` is `-1`.
    pub previous_output: OutPoint,
    pub signature: Vec<u8>,
    /// The spender's raw public key (`X‖Y` for a regular input). Empty for
    /// a coinbase input.
    pub public_key: Vec<u8>,
}

impl TxInput {
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.previous_output.is_coinbase_sentinel()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    /// RIPEMD-160(SHA-512(pubkey)) of the owner allowed to spend this
    /// output.
    pub pubkey_hash: [u8; 20],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Hash512,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// A copy with the id cleared and every input's signature/public-key
    /// cleared, used only as a signing/verification base.
    #[must_use]
    fn trimmed_copy(&self) -> Self {
        Self {
            id: Hash512::zero(),
            inputs: self
                .inputs
                .iter()
                .map(|i| TxInput {
                    previous_output: i.previous_output,
                    signature: Vec::new(),
                    public_key: Vec::new(),
                })
                .collect(),
            outputs: self.outputs.clone(),
        }
    }

    fn canonical_bytes(&self) -> Vec<u8> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .expect("transaction encoding is infallible for well-formed values")
    }

    /// Recomputes and sets `self.id` from the current inputs/outputs. Must
    /// be called exactly once after a transaction's inputs/outputs are
    /// finalized (its id is a fixed point over everything else).
    pub fn finalize_id(&mut self) {
        self.id = Hash512::zero();
        let bytes = self.canonical_bytes();
        self.id = Hash512::sha512(&bytes);
    }

    /// Builds a coinbase transaction rewarding `recipient_pubkey_hash` with
    /// [`COINBASE_REWARD`]. `data` seeds the attested payload; if empty,
    /// 512 fresh random bytes are used instead (so two coinbases minted in
    /// the same millisecond still differ with overwhelming probability).
    pub fn coinbase(
        recipient_pubkey_hash: [u8; 20],
        data: &[u8],
        master_key: &MasterSigningKey,
    ) -> Self {
        let payload = if data.is_empty() {
            let mut buf = vec![0u8; COINBASE_PAYLOAD_LEN];
            rand::rngs::OsRng.fill_bytes(&mut buf);
            hex::encode(buf).into_bytes()
        } else {
            data.to_vec()
        };

        let payload_hash = Hash512::sha512(&payload);
        let signature = master_key.sign(payload_hash.as_bytes());

        let input = TxInput {
            previous_output: OutPoint::new(payload_hash, -1),
            signature: signature.to_bytes(),
            public_key: Vec::new(),
        };
        let output = TxOutput {
            value: COINBASE_REWARD,
            pubkey_hash: recipient_pubkey_hash,
        };

        let mut tx = Self {
            id: Hash512::zero(),
            inputs: vec![input],
            outputs: vec![output],
        };
        tx.finalize_id();
        tx
    }

    /// Signs every non-coinbase input in place. `previous_txs` resolves
    /// each input's `previous_output.txid` to the transaction that created
    /// the output being spent.
    pub fn sign(
        &mut self,
        keypair: &KeyPair,
        previous_txs: &HashMap<Hash512, Transaction>,
    ) -> CoreResult<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        for i in 0..self.inputs.len() {
            let lock_hash = self.locking_hash_for_input(i, previous_txs)?;

            let mut trimmed = self.trimmed_copy();
            trimmed.inputs[i].public_key = lock_hash.to_vec();
            let message = Hash512::sha512(&trimmed.canonical_bytes());

            let signature = keypair.sign_prehash(message.as_bytes())?;
            self.inputs[i].signature = signature.as_bytes().to_vec();
            self.inputs[i].public_key = keypair.public_key.as_bytes().to_vec();
        }

        Ok(())
    }

    /// Verifies every non-coinbase input. Coinbase transactions verify
    /// vacuously.
    pub fn verify(&self, previous_txs: &HashMap<Hash512, Transaction>) -> bool {
        if self.is_coinbase() {
            return true;
        }

        for i in 0..self.inputs.len() {
            let Ok(lock_hash) = self.locking_hash_for_input(i, previous_txs) else {
                return false;
            };

            let input = &self.inputs[i];
            if shared::public_key_hash(&input.public_key) != lock_hash {
                return false;
            }

            let mut trimmed = self.trimmed_copy();
            trimmed.inputs[i].public_key = lock_hash.to_vec();
            let message = Hash512::sha512(&trimmed.canonical_bytes());

            let Ok(public_key) = PublicKey::from_bytes(input.public_key.clone()) else {
                return false;
            };
            let Ok(signature) = Signature::from_bytes(input.signature.clone()) else {
                return false;
            };

            match signature.verify_prehash(message.as_bytes(), &public_key) {
                Ok(true) => {}
                _ => return false,
            }
        }

        true
    }

    fn locking_hash_for_input(
        &self,
        index: usize,
        previous_txs: &HashMap<Hash512, Transaction>,
    ) -> CoreResult<[u8; 20]> {
        let input = &self.inputs[index];
        let previous_tx = previous_txs.get(&input.previous_output.txid).ok_or_else(|| {
            CoreError::TransactionNotFound(hex::encode(input.previous_output.txid.as_bytes()))
        })?;
        let vout = usize::try_from(input.previous_output.vout).map_err(|_| {
            CoreError::InvalidTransaction("negative output index on non-coinbase input".into())
        })?;
        let output = previous_tx
            .outputs
            .get(vout)
            .ok_or_else(|| CoreError::InvalidTransaction("output index out of range".into()))?;
        Ok(output.pubkey_hash)
    }

    #[must_use]
    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Basic structural validation independent of the UTXO set: non-empty
    /// inputs/outputs, a canonical id, and (for coinbase) the single
    /// negative-index input shape.
    pub fn validate_basic(&self) -> CoreResult<()> {
        if self.outputs.is_empty() {
            return Err(CoreError::InvalidTransaction("no outputs".into()));
        }
        if self.is_coinbase() {
            if self.inputs.len() != 1 {
                return Err(CoreError::InvalidTransaction(
                    "coinbase must have exactly one input".into(),
                ));
            }
        } else if self.inputs.is_empty() {
            return Err(CoreError::InvalidTransaction("no inputs".into()));
        }

        let mut expected = self.clone();
        expected.finalize_id();
        if expected.id != self.id {
            return Err(CoreError::InvalidTransaction(
                "id does not match contents".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_spend(
        keypair: &KeyPair,
        previous: &Transaction,
        vout: i64,
        outputs: Vec<TxOutput>,
    ) -> Transaction {
        let input = TxInput {
            previous_output: OutPoint::new(previous.id, vout),
            signature: Vec::new(),
            public_key: Vec::new(),
        };
        let mut tx = Transaction {
            id: Hash512::zero(),
            inputs: vec![input],
            outputs,
        };
        let mut previous_txs = HashMap::new();
        previous_txs.insert(previous.id, previous.clone());
        tx.sign(keypair, &previous_txs).unwrap();
        tx.finalize_id();
        tx
    }

    #[test]
    fn coinbase_finalizes_with_matching_id() {
        let master = MasterSigningKey::generate();
        let tx = Transaction::coinbase([9u8; 20], b"", &master);
        tx.validate_basic().unwrap();
        assert!(tx.is_coinbase());
        assert_eq!(tx.total_output_value(), COINBASE_REWARD);
    }

    #[test]
    fn coinbase_verifies_vacuously() {
        let master = MasterSigningKey::generate();
        let tx = Transaction::coinbase([1u8; 20], b"", &master);
        assert!(tx.verify(&HashMap::new()));
    }

    #[test]
    fn two_empty_data_coinbases_differ() {
        let master = MasterSigningKey::generate();
        let a = Transaction::coinbase([1u8; 20], b"", &master);
        let b = Transaction::coinbase([1u8; 20], b"", &master);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn signed_spend_verifies_against_previous_tx() {
        let master = MasterSigningKey::generate();
        let spender = KeyPair::generate();
        let spender_hash = shared::public_key_hash(spender.public_key.as_bytes());

        let coinbase = Transaction::coinbase(spender_hash, b"", &master);
        let spend = signed_spend(
            &spender,
            &coinbase,
            0,
            vec![TxOutput {
                value: 20,
                pubkey_hash: [2u8; 20],
            }],
        );

        let mut previous_txs = HashMap::new();
        previous_txs.insert(coinbase.id, coinbase);
        assert!(spend.verify(&previous_txs));
    }

    #[test]
    fn signed_spend_passes_validate_basic() {
        // validate_basic recomputes the id over the current (signed) contents;
        // the id must therefore have been finalized *after* signing.
        let master = MasterSigningKey::generate();
        let spender = KeyPair::generate();
        let spender_hash = shared::public_key_hash(spender.public_key.as_bytes());

        let coinbase = Transaction::coinbase(spender_hash, b"", &master);
        let spend = signed_spend(
            &spender,
            &coinbase,
            0,
            vec![TxOutput {
                value: 20,
                pubkey_hash: [2u8; 20],
            }],
        );

        spend.validate_basic().unwrap();
    }

    #[test]
    fn spend_signed_by_wrong_key_fails_verification() {
        let master = MasterSigningKey::generate();
        let owner = KeyPair::generate();
        let attacker = KeyPair::generate();
        let owner_hash = shared::public_key_hash(owner.public_key.as_bytes());

        let coinbase = Transaction::coinbase(owner_hash, b"", &master);
        // Attacker signs a spend of the owner's output with their own key.
        let spend = signed_spend(
            &attacker,
            &coinbase,
            0,
            vec![TxOutput {
                value: 20,
                pubkey_hash: [3u8; 20],
            }],
        );

        let mut previous_txs = HashMap::new();
        previous_txs.insert(coinbase.id, coinbase);
        assert!(!spend.verify(&previous_txs));
    }

    #[test]
    fn tampering_with_outputs_breaks_verification() {
        let master = MasterSigningKey::generate();
        let spender = KeyPair::generate();
        let spender_hash = shared::public_key_hash(spender.public_key.as_bytes());

        let coinbase = Transaction::coinbase(spender_hash, b"", &master);
        let mut spend = signed_spend(
            &spender,
            &coinbase,
            0,
            vec![TxOutput {
                value: 20,
                pubkey_hash: [2u8; 20],
            }],
        );
        spend.outputs[0].value = 1_000_000;

        let mut previous_txs = HashMap::new();
        previous_txs.insert(coinbase.id, coinbase);
        assert!(!spend.verify(&previous_txs));
    }

    #[test]
    fn validate_basic_rejects_mismatched_id() {
        let master = MasterSigningKey::generate();
        let mut tx = Transaction::coinbase([1u8; 20], b"", &master);
        tx.id = Hash512::zero();
        assert!(tx.validate_basic().is_err());
    }
}
