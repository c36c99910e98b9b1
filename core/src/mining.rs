//! Mining loop (component G): verify mempool transactions against the UTXO
//! index, assemble a candidate block with a coinbase reward, drive the PoW
//! facade to a winning nonce, persist via the chain store, and fold the
//! result into the UTXO index.
//!
//! No dynamic difficulty adjustment: the target is the fixed
//! [`crate::pow::DIFFICULTY`] constant (non-goal).

use crate::block::Block;
use crate::chain::ChainStore;
use crate::error::CoreResult;
use crate::pow::PowEngine;
use crate::transaction::Transaction;
use crate::utxo::UtxoIndex;
use shared::MasterSigningKey;
use std::collections::{HashMap, HashSet};

/// Filters `candidates` down to transactions whose referenced outputs are
/// unspent in `utxo`, whose signatures verify against them, and which do not
/// double-spend an output another candidate earlier in the batch already
/// claimed. Accepted candidates are considered in order, and each accepted
/// candidate's inputs are removed from the view the rest of the batch is
/// checked against, so two transactions spending the same output can never
/// both survive.
pub fn select_valid(
    chain: &ChainStore,
    utxo: &UtxoIndex,
    candidates: Vec<Transaction>,
) -> CoreResult<Vec<Transaction>> {
    let mut valid = Vec::with_capacity(candidates.len());
    let mut claimed = HashSet::new();

    'next_tx: for tx in candidates {
        if tx.validate_basic().is_err() || tx.is_coinbase() {
            continue;
        }

        let mut previous_txs = HashMap::new();
        for input in &tx.inputs {
            let outpoint = input.previous_output;
            if claimed.contains(&outpoint) || !utxo.is_unspent(&outpoint)? {
                continue 'next_tx;
            }
            match chain.find_transaction(&outpoint.txid)? {
                Some(previous) => {
                    previous_txs.insert(previous.id, previous);
                }
                None => continue 'next_tx,
            }
        }

        if tx.verify(&previous_txs) {
            claimed.extend(tx.inputs.iter().map(|i| i.previous_output));
            valid.push(tx);
        }
    }

    Ok(valid)
}

/// Mines one block on top of the current tip from `mempool`, persists it,
/// and updates `utxo` incrementally. The caller owns `engine` for the
/// duration of the call and may reuse it across successive blocks to avoid
/// re-initializing the dataset within the same key epoch.
pub fn mine(
    chain: &ChainStore,
    utxo: &UtxoIndex,
    mempool: Vec<Transaction>,
    miner_pubkey_hash: [u8; 20],
    master_key: &MasterSigningKey,
    engine: &mut PowEngine,
) -> CoreResult<Block> {
    let txs = select_valid(chain, utxo, mempool)?;
    let block = chain.mine_block(txs, miner_pubkey_hash, master_key, engine)?;
    utxo.update(&block)?;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::COINBASE_REWARD;

    #[test]
    fn mining_an_empty_mempool_still_mints_a_coinbase() {
        let dir = tempfile::tempdir().unwrap();
        let master = MasterSigningKey::generate();
        let chain = ChainStore::create(dir.path().join("chain"), [1u8; 20], &master).unwrap();
        let utxo = UtxoIndex::open(dir.path().join("utxo")).unwrap();
        utxo.reindex(&chain).unwrap();

        let mut engine = PowEngine::new();
        let block = mine(&chain, &utxo, Vec::new(), [2u8; 20], &master, &mut engine).unwrap();

        assert_eq!(block.header.height, 1);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].total_output_value(), COINBASE_REWARD);

        let outputs = utxo.find_utxo(&[2u8; 20]).unwrap();
        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn select_valid_drops_transactions_with_unresolvable_inputs() {
        use crate::transaction::{TxInput, TxOutput};
        use shared::{Hash512, OutPoint};

        let dir = tempfile::tempdir().unwrap();
        let master = MasterSigningKey::generate();
        let chain = ChainStore::create(dir.path().join("chain"), [1u8; 20], &master).unwrap();
        let utxo = UtxoIndex::open(dir.path().join("utxo")).unwrap();
        utxo.reindex(&chain).unwrap();

        let spender = shared::KeyPair::generate();
        let mut unresolvable = Transaction {
            id: Hash512::zero(),
            inputs: vec![TxInput {
                previous_output: OutPoint::new(Hash512::sha512(b"no such transaction"), 0),
                signature: Vec::new(),
                public_key: spender.public_key.as_bytes().to_vec(),
            }],
            outputs: vec![TxOutput {
                value: 1,
                pubkey_hash: [2u8; 20],
            }],
        };
        unresolvable.finalize_id();

        let selected = select_valid(&chain, &utxo, vec![unresolvable]).unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn select_valid_keeps_only_one_of_two_transactions_spending_the_same_output() {
        use crate::transaction::TxOutput;
        use shared::OutPoint;

        let dir = tempfile::tempdir().unwrap();
        let master = MasterSigningKey::generate();
        let spender = shared::KeyPair::generate();
        let spender_hash = shared::public_key_hash(spender.public_key.as_bytes());

        let chain = ChainStore::create(dir.path().join("chain"), spender_hash, &master).unwrap();
        let utxo = UtxoIndex::open(dir.path().join("utxo")).unwrap();
        utxo.reindex(&chain).unwrap();

        let coinbase = chain.tip_block().unwrap().transactions[0].clone();
        let mut previous_txs = HashMap::new();
        previous_txs.insert(coinbase.id, coinbase.clone());

        let build_spend = |recipient: [u8; 20]| {
            let input = crate::transaction::TxInput {
                previous_output: OutPoint::new(coinbase.id, 0),
                signature: Vec::new(),
                public_key: Vec::new(),
            };
            let mut tx = Transaction {
                id: shared::Hash512::zero(),
                inputs: vec![input],
                outputs: vec![TxOutput {
                    value: COINBASE_REWARD,
                    pubkey_hash: recipient,
                }],
            };
            tx.sign(&spender, &previous_txs).unwrap();
            tx.finalize_id();
            tx
        };

        let first = build_spend([2u8; 20]);
        let second = build_spend([3u8; 20]);

        let selected = select_valid(&chain, &utxo, vec![first.clone(), second]).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, first.id);
    }
}
