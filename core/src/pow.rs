//! Hash/PoW facade (component A): a keyed memory-hard hashing virtual
//! machine whose key rotates with block height, exposing the
//! setup/first/next/one-shot/teardown operations the mining loop and the
//! validator both drive.

use crate::error::{CoreError, CoreResult};
use randomx_rs::{RandomXCache, RandomXDataset, RandomXFlag, RandomXVM};
use shared::{Hash512, PowHash};
use std::sync::Arc;

/// Blocks per key epoch.
pub const EPOCH_LENGTH: u64 = 2048;
/// Blocks into a new epoch before its key becomes active, preventing races
/// between a miner and a validator at epoch boundaries.
pub const EPOCH_LAG: u64 = 64;

/// Compiled-in seed for key epoch 0.
pub const GENESIS_SEED_KEY: &[u8] =
    b"ferrochain-genesis-pow-seed-bc2bcbb0f927bac40faaf98a468f4de5e81b9395ba6c970634abb4d7b1cb007";

/// Fixed PoW difficulty: the number of required leading zero bits. No
/// dynamic adjustment (non-goal).
pub const DIFFICULTY: u32 = 20;

/// The epoch index whose key is active for a block at `height`.
#[must_use]
pub fn active_key_index(height: u64) -> u64 {
    let epoch = height / EPOCH_LENGTH;
    if epoch == 0 {
        return 0;
    }
    if height % EPOCH_LENGTH < EPOCH_LAG {
        epoch - 1
    } else {
        epoch
    }
}

/// The chain height whose content hash seeds key epoch `index` (`index` >
/// 0).
#[must_use]
pub fn key_source_height(index: u64) -> u64 {
    EPOCH_LENGTH * (index - 1)
}

/// Supplies the block hash the PoW facade needs to derive a non-zero key
/// epoch. Implemented by the chain store; kept as a trait so this module
/// never depends on the storage backend directly.
pub trait KeyRotationSource {
    fn block_hash_at_height(&self, height: u64) -> CoreResult<Option<Hash512>>;
}

/// `InitData` for nonce `n` over a candidate block: `prev_hash ‖
/// merkle_root ‖ be64(n) ‖ be64(difficulty)`.
#[must_use]
pub fn init_data(prev_hash: &Hash512, merkle_root: &Hash512, nonce: u64, difficulty: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + 64 + 8 + 8);
    buf.extend_from_slice(prev_hash.as_bytes());
    buf.extend_from_slice(merkle_root.as_bytes());
    buf.extend_from_slice(&nonce.to_be_bytes());
    buf.extend_from_slice(&u64::from(difficulty).to_be_bytes());
    buf
}

/// Owns the PoW VM and its keyed cache/dataset. Setup is expensive (full
/// dataset initialization); the engine caches the active key epoch and only
/// rebuilds when the epoch changes, matching the source's package-level key
/// cache relocated into an instance (see design notes on the key-rotation
/// cache).
pub struct PowEngine {
    flags: RandomXFlag,
    cache: Option<RandomXCache>,
    dataset: Option<Arc<RandomXDataset>>,
    vm: Option<RandomXVM>,
    active_key_index: Option<u64>,
}

impl PowEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            flags: RandomXFlag::get_recommended_flags(),
            cache: None,
            dataset: None,
            vm: None,
            active_key_index: None,
        }
    }

    /// Rebuilds the cache/dataset/VM for `seed_key` from scratch.
    pub fn setup(&mut self, seed_key: &[u8]) -> CoreResult<()> {
        let cache = RandomXCache::new(self.flags, seed_key)
            .map_err(|e| CoreError::Storage(format!("randomx cache init failed: {e}")))?;

        let dataset = build_dataset_parallel(self.flags, &cache)?;
        let vm = RandomXVM::new(self.flags, Some(cache.clone()), Some(dataset.clone()))
            .map_err(|e| CoreError::Storage(format!("randomx vm init failed: {e}")))?;

        self.cache = Some(cache);
        self.dataset = Some(Arc::new(dataset));
        self.vm = Some(vm);
        Ok(())
    }

    /// Ensures the VM is keyed for the epoch active at `height`, resolving
    /// non-zero epochs via `source`. A no-op if the epoch has not changed
    /// since the last call (refresh is monotonic: this node never
    /// reorganizes, so the active epoch only ever increases).
    pub fn ensure_key_for_height(
        &mut self,
        height: u64,
        source: &impl KeyRotationSource,
    ) -> CoreResult<()> {
        let index = active_key_index(height);
        if self.active_key_index == Some(index) && self.vm.is_some() {
            return Ok(());
        }

        let key_bytes = if index == 0 {
            GENESIS_SEED_KEY.to_vec()
        } else {
            let source_height = key_source_height(index);
            let hash = source.block_hash_at_height(source_height)?.ok_or_else(|| {
                CoreError::Storage(format!(
                    "missing key-epoch source block at height {source_height}"
                ))
            })?;
            hash.as_bytes().to_vec()
        };

        self.setup(&key_bytes)?;
        self.active_key_index = Some(index);
        Ok(())
    }

    fn vm_mut(&mut self) -> CoreResult<&mut RandomXVM> {
        self.vm
            .as_mut()
            .ok_or_else(|| CoreError::Storage("pow engine not set up".into()))
    }

    /// Initializes the VM's streaming hash with `InitData(0)`.
    pub fn first(&mut self, input: &[u8]) -> CoreResult<()> {
        self.vm_mut()?
            .calculate_hash_first(input)
            .map_err(|e| CoreError::Storage(format!("randomx hash_first failed: {e}")))
    }

    /// Feeds `input` and returns the hash of the *previous* input fed to
    /// the streaming VM.
    pub fn next(&mut self, input: &[u8]) -> CoreResult<PowHash> {
        let bytes = self
            .vm_mut()?
            .calculate_hash_next(input)
            .map_err(|e| CoreError::Storage(format!("randomx hash_next failed: {e}")))?;
        to_pow_hash(&bytes)
    }

    /// One-shot hash of `input`, used by the validator regardless of the
    /// streaming mode used while mining.
    pub fn one_shot(&mut self, input: &[u8]) -> CoreResult<PowHash> {
        let bytes = self
            .vm_mut()?
            .calculate_hash(input)
            .map_err(|e| CoreError::Storage(format!("randomx hash failed: {e}")))?;
        to_pow_hash(&bytes)
    }

    /// Releases the VM, dataset, and cache. Resources are also released on
    /// drop; this exists so a caller can free them deterministically
    /// between mining attempts.
    pub fn teardown(&mut self) {
        self.vm = None;
        self.dataset = None;
        self.cache = None;
        self.active_key_index = None;
    }

    /// Runs the streaming search for a nonce whose PoW hash meets
    /// `difficulty`, starting from `InitData(0)`. Returns `(n - 1, hash)`
    /// per the determinism contract: the qualifying nonce is the one fed
    /// *before* the hash that satisfied the target was read back.
    pub fn run(
        &mut self,
        prev_hash: &Hash512,
        merkle_root: &Hash512,
        difficulty: u32,
    ) -> CoreResult<(u64, PowHash)> {
        self.first(&init_data(prev_hash, merkle_root, 0, difficulty))?;

        let mut nonce: u64 = 1;
        loop {
            let input = init_data(prev_hash, merkle_root, nonce, difficulty);
            let hash = self.next(&input)?;
            if hash.meets_difficulty(difficulty) {
                return Ok((nonce - 1, hash));
            }
            nonce += 1;
        }
    }

    /// One-shot validation of a mined nonce.
    pub fn validate(
        &mut self,
        prev_hash: &Hash512,
        merkle_root: &Hash512,
        nonce: u64,
        difficulty: u32,
    ) -> CoreResult<bool> {
        let input = init_data(prev_hash, merkle_root, nonce, difficulty);
        let hash = self.one_shot(&input)?;
        Ok(hash.meets_difficulty(difficulty))
    }
}

impl Default for PowEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn to_pow_hash(bytes: &[u8]) -> CoreResult<PowHash> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CoreError::Storage("randomx returned a hash of unexpected length".into()))?;
    Ok(PowHash::from_bytes(arr))
}

/// Initializes the dataset across one worker per host CPU, each computing a
/// disjoint contiguous slice of the item range, mirroring the reference
/// implementation's chunked `InitDataset` workers.
fn build_dataset_parallel(flags: RandomXFlag, cache: &RandomXCache) -> CoreResult<RandomXDataset> {
    let dataset = RandomXDataset::allocate(flags)
        .map_err(|e| CoreError::Storage(format!("randomx dataset allocation failed: {e}")))?;

    let item_count = dataset.item_count();
    let worker_count = std::thread::available_parallelism()
        .map(|n| n.get() as u64)
        .unwrap_or(1)
        .max(1);

    std::thread::scope(|scope| -> CoreResult<()> {
        let mut handles = Vec::with_capacity(worker_count as usize);
        for worker in 0..worker_count {
            let start = item_count * worker / worker_count;
            let end = item_count * (worker + 1) / worker_count;
            let dataset = &dataset;
            let cache = &cache;
            handles.push(scope.spawn(move || dataset.init_range(cache, start, end - start)));
        }
        for handle in handles {
            handle
                .join()
                .map_err(|_| CoreError::Storage("dataset worker thread panicked".into()))?
                .map_err(|e| CoreError::Storage(format!("randomx dataset init failed: {e}")))?;
        }
        Ok(())
    })?;

    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_epoch_zero_covers_the_lag_window() {
        assert_eq!(active_key_index(0), 0);
        assert_eq!(active_key_index(2047), 0);
    }

    #[test]
    fn key_rotation_respects_the_lag_window() {
        // Block 2111 = 2048 + 63 is still within the lag window: key 0.
        assert_eq!(active_key_index(2111), 0);
        // Block 2112 = 2048 + 64 is the first block on the rotated key.
        assert_eq!(active_key_index(2112), 1);
    }

    #[test]
    fn key_source_height_is_the_epoch_start() {
        assert_eq!(key_source_height(1), 0);
        assert_eq!(key_source_height(2), 2048);
    }

    #[test]
    fn init_data_concatenates_fields_in_order() {
        let prev = Hash512::zero();
        let merkle = Hash512::sha512(b"x");
        let data = init_data(&prev, &merkle, 7, 20);
        assert_eq!(data.len(), 64 + 64 + 8 + 8);
        assert_eq!(&data[0..64], prev.as_bytes());
        assert_eq!(&data[64..128], merkle.as_bytes());
        assert_eq!(&data[128..136], &7u64.to_be_bytes());
        assert_eq!(&data[136..144], &20u64.to_be_bytes());
    }
}
