//! UTXO index (component F): a RocksDB-backed secondary index over unspent
//! outputs, kept coherent with the chain store by full reindex or
//! incremental per-block update.

use crate::block::Block;
use crate::chain::ChainStore;
use crate::error::{CoreError, CoreResult};
use crate::transaction::TxOutput;
use rocksdb::{WriteBatch, DB};
use serde::{Deserialize, Serialize};
use shared::{Hash512, OutPoint};
use std::collections::{HashMap, HashSet};
use std::path::Path;

const UTXO_PREFIX: &str = "utxo-";

/// One surviving output of a transaction, keeping its original index so a
/// later spend can be addressed by `OutPoint`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UtxoRecord {
    index: i64,
    output: TxOutput,
}

fn utxo_key(txid: &Hash512) -> Vec<u8> {
    format!("{UTXO_PREFIX}{}", hex::encode(txid.as_bytes())).into_bytes()
}

/// Secondary index over unspent outputs. Borrows nothing from the chain
/// store; `reindex`/`update` take a `&ChainStore` only for the duration of
/// the call.
pub struct UtxoIndex {
    db: DB,
}

impl UtxoIndex {
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        std::fs::create_dir_all(path.as_ref()).map_err(|e| CoreError::Storage(e.to_string()))?;
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        Ok(Self {
            db: DB::open(&opts, path)?,
        })
    }

    fn records(&self, txid: &Hash512) -> CoreResult<Vec<UtxoRecord>> {
        match self.db.get(utxo_key(txid))? {
            Some(bytes) => {
                let (records, _) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
                Ok(records)
            }
            None => Ok(Vec::new()),
        }
    }

    fn put_records(batch: &mut WriteBatch, txid: &Hash512, records: &[UtxoRecord]) -> CoreResult<()> {
        if records.is_empty() {
            batch.delete(utxo_key(txid));
        } else {
            let bytes = bincode::serde::encode_to_vec(records, bincode::config::standard())?;
            batch.put(utxo_key(txid), bytes);
        }
        Ok(())
    }

    fn clear(&self) -> CoreResult<()> {
        let mut batch = WriteBatch::default();
        let prefix = UTXO_PREFIX.as_bytes();
        for item in self.db.prefix_iterator(prefix) {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            batch.delete(key);
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Rebuilds the index from scratch by walking `chain` tip-to-genesis,
    /// tracking which `(txid, index)` pairs are consumed by a later (i.e.
    /// earlier-visited, since the walk is reversed) transaction's inputs.
    /// Returns the number of surviving outputs indexed.
    pub fn reindex(&self, chain: &ChainStore) -> CoreResult<usize> {
        self.clear()?;

        let mut spent: HashMap<Hash512, HashSet<i64>> = HashMap::new();
        let mut batch = WriteBatch::default();
        let mut count = 0usize;

        for block in chain.iter()? {
            let block = block?;
            for tx in &block.transactions {
                let mut outs = Vec::new();
                for (index, output) in tx.outputs.iter().enumerate() {
                    let index = index as i64;
                    let already_spent = spent.get(&tx.id).is_some_and(|s| s.contains(&index));
                    if !already_spent {
                        outs.push(UtxoRecord {
                            index,
                            output: output.clone(),
                        });
                    }
                }

                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent
                            .entry(input.previous_output.txid)
                            .or_default()
                            .insert(input.previous_output.vout);
                    }
                }

                count += outs.len();
                Self::put_records(&mut batch, &tx.id, &outs)?;
            }
        }

        self.db.write(batch)?;
        Ok(count)
    }

    /// Incrementally applies one newly-accepted block: consumes every
    /// non-coinbase input's referenced output, then indexes the block's
    /// transactions' own outputs in full.
    pub fn update(&self, block: &Block) -> CoreResult<()> {
        let mut batch = WriteBatch::default();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let mut records = self.records(&input.previous_output.txid)?;
                    records.retain(|r| r.index != input.previous_output.vout);
                    Self::put_records(&mut batch, &input.previous_output.txid, &records)?;
                }
            }

            let records: Vec<UtxoRecord> = tx
                .outputs
                .iter()
                .enumerate()
                .map(|(index, output)| UtxoRecord {
                    index: index as i64,
                    output: output.clone(),
                })
                .collect();
            Self::put_records(&mut batch, &tx.id, &records)?;
        }

        self.db.write(batch)?;
        Ok(())
    }

    /// True if `outpoint` still names a surviving (unspent) output in the
    /// index. Used by the mining loop to reject a transaction whose input
    /// double-spends an output another selected transaction already claims.
    pub fn is_unspent(&self, outpoint: &OutPoint) -> CoreResult<bool> {
        let records = self.records(&outpoint.txid)?;
        Ok(records.iter().any(|r| r.index == outpoint.vout))
    }

    /// Every unspent output locked to `pk_hash`.
    pub fn find_utxo(&self, pk_hash: &[u8; 20]) -> CoreResult<Vec<TxOutput>> {
        let prefix = UTXO_PREFIX.as_bytes();
        let mut found = Vec::new();
        for item in self.db.prefix_iterator(prefix) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            let (records, _): (Vec<UtxoRecord>, _) =
                bincode::serde::decode_from_slice(&value, bincode::config::standard())?;
            found.extend(
                records
                    .into_iter()
                    .filter(|r| &r.output.pubkey_hash == pk_hash)
                    .map(|r| r.output),
            );
        }
        Ok(found)
    }

    /// Accumulates outputs locked to `pk_hash` until their total reaches
    /// `amount`, in store key order. Returns the accumulated total and, for
    /// each contributing transaction (hex-encoded id), the chosen output
    /// indices.
    pub fn find_spendable_outputs(
        &self,
        pk_hash: &[u8; 20],
        amount: u64,
    ) -> CoreResult<(u64, HashMap<String, Vec<i64>>)> {
        let prefix = UTXO_PREFIX.as_bytes();
        let mut total = 0u64;
        let mut chosen: HashMap<String, Vec<i64>> = HashMap::new();

        'scan: for item in self.db.prefix_iterator(prefix) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            let txid_hex = String::from_utf8_lossy(&key[UTXO_PREFIX.len()..]).into_owned();
            let (records, _): (Vec<UtxoRecord>, _) =
                bincode::serde::decode_from_slice(&value, bincode::config::standard())?;

            for record in records {
                if &record.output.pubkey_hash != pk_hash {
                    continue;
                }
                chosen.entry(txid_hex.clone()).or_default().push(record.index);
                total += record.output.value;
                if total >= amount {
                    break 'scan;
                }
            }
        }

        if total < amount {
            return Err(CoreError::InsufficientFunds);
        }
        Ok((total, chosen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::PowEngine;
    use shared::MasterSigningKey;

    fn setup() -> (tempfile::TempDir, ChainStore, UtxoIndex, [u8; 20]) {
        let dir = tempfile::tempdir().unwrap();
        let master = MasterSigningKey::generate();
        let pk_hash = [5u8; 20];
        let chain = ChainStore::create(dir.path().join("chain"), pk_hash, &master).unwrap();
        let utxo = UtxoIndex::open(dir.path().join("utxo")).unwrap();
        (dir, chain, utxo, pk_hash)
    }

    #[test]
    fn reindex_finds_the_genesis_coinbase_output() {
        let (_dir, chain, utxo, pk_hash) = setup();
        let count = utxo.reindex(&chain).unwrap();
        assert_eq!(count, 1);

        let outputs = utxo.find_utxo(&pk_hash).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].value, crate::transaction::COINBASE_REWARD);
    }

    #[test]
    fn is_unspent_reflects_the_indexed_outputs() {
        let (_dir, chain, utxo, _pk_hash) = setup();
        utxo.reindex(&chain).unwrap();

        let genesis_txid = chain.tip_block().unwrap().transactions[0].id;
        assert!(utxo.is_unspent(&OutPoint::new(genesis_txid, 0)).unwrap());
        assert!(!utxo.is_unspent(&OutPoint::new(genesis_txid, 1)).unwrap());
        assert!(!utxo
            .is_unspent(&OutPoint::new(Hash512::sha512(b"no such tx"), 0))
            .unwrap());
    }

    #[test]
    fn update_matches_reindex_after_mining_a_block() {
        let (_dir, chain, utxo, pk_hash) = setup();
        utxo.reindex(&chain).unwrap();

        let master = MasterSigningKey::generate();
        let mut engine = PowEngine::new();
        let block = chain
            .mine_block(Vec::new(), pk_hash, &master, &mut engine)
            .unwrap();
        utxo.update(&block).unwrap();

        let incremental = utxo.find_utxo(&pk_hash).unwrap();

        let rebuilt = UtxoIndex::open(tempfile::tempdir().unwrap().path()).unwrap();
        rebuilt.reindex(&chain).unwrap();
        let from_scratch = rebuilt.find_utxo(&pk_hash).unwrap();

        let mut a: Vec<u64> = incremental.iter().map(|o| o.value).collect();
        let mut b: Vec<u64> = from_scratch.iter().map(|o| o.value).collect();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
    }

    #[test]
    fn find_spendable_outputs_stops_once_amount_is_reached() {
        let (_dir, chain, utxo, pk_hash) = setup();
        utxo.reindex(&chain).unwrap();

        let (total, chosen) = utxo
            .find_spendable_outputs(&pk_hash, crate::transaction::COINBASE_REWARD)
            .unwrap();
        assert!(total >= crate::transaction::COINBASE_REWARD);
        assert_eq!(chosen.values().map(Vec::len).sum::<usize>(), 1);
    }

    #[test]
    fn find_spendable_outputs_errors_when_insufficient() {
        let (_dir, chain, utxo, pk_hash) = setup();
        utxo.reindex(&chain).unwrap();
        assert!(utxo
            .find_spendable_outputs(&pk_hash, crate::transaction::COINBASE_REWARD + 1)
            .is_err());
    }
}
