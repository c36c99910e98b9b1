//! Merkle root over an ordered list of transaction serializations (component
//! B). Leaves hash each transaction's serialized bytes; internal nodes hash
//! the concatenation of their two children's data. Odd-cardinality levels
//! duplicate the last node, at every level including the leaf level.

use shared::Hash512;

/// Computes the merkle root over already-serialized transaction blobs.
///
/// An empty transaction list (never valid for a real block, but convenient
/// for tests) hashes the empty byte string.
#[must_use]
pub fn merkle_root(tx_blobs: &[Vec<u8>]) -> Hash512 {
    if tx_blobs.is_empty() {
        return Hash512::sha512(&[]);
    }

    let mut level: Vec<Hash512> = tx_blobs.iter().map(|blob| Hash512::sha512(blob)).collect();

    while level.len() > 1 {
        if level.len() % 2 != 0 {
            level.push(*level.last().expect("checked non-empty above"));
        }

        level = level
            .chunks_exact(2)
            .map(|pair| {
                let mut combined = Vec::with_capacity(128);
                combined.extend_from_slice(pair[0].as_bytes());
                combined.extend_from_slice(pair[1].as_bytes());
                Hash512::sha512(&combined)
            })
            .collect();
    }

    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_leaf_root_is_its_own_hash() {
        let blob = b"only transaction".to_vec();
        assert_eq!(merkle_root(&[blob.clone()]), Hash512::sha512(&blob));
    }

    #[test]
    fn odd_level_duplicates_last_leaf() {
        let a = b"a".to_vec();
        let b = b"b".to_vec();
        let c = b"c".to_vec();

        let root_three = merkle_root(&[a.clone(), b.clone(), c.clone()]);
        let root_four = merkle_root(&[a, b, c.clone(), c]);
        assert_eq!(root_three, root_four);
    }

    #[test]
    fn order_is_significant() {
        let a = b"a".to_vec();
        let b = b"b".to_vec();
        assert_ne!(merkle_root(&[a.clone(), b.clone()]), merkle_root(&[b, a]));
    }

    #[test]
    fn empty_list_hashes_empty_input() {
        assert_eq!(merkle_root(&[]), Hash512::sha512(&[]));
    }
}
