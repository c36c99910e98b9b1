//! Primitive type aliases shared between the core library, the wallet
//! facade, and the gossip node.

use serde::{Deserialize, Serialize};

/// Transaction identifier: the 512-bit hash of its canonical serialization
/// with the id field cleared.
pub type TxId = crate::Hash512;

/// Block identifier: the 512-bit content hash of its serialization.
pub type BlockId = crate::Hash512;

/// Monetary amount, in the smallest indivisible unit.
pub type Amount = u64;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Block height, zero at genesis.
pub type BlockHeight = u64;

/// Output index within a transaction. Signed because a coinbase input uses
/// a negative index (`-1`) as its distinguishing sentinel.
pub type OutputIndex = i64;

/// Reference to a previously-created transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: OutputIndex,
}

impl OutPoint {
    #[must_use]
    pub const fn new(txid: TxId, vout: OutputIndex) -> Self {
        Self { txid, vout }
    }

    /// True for the sentinel reference carried by a coinbase input.
    #[must_use]
    pub const fn is_coinbase_sentinel(&self) -> bool {
        self.vout < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outpoint_roundtrips_fields() {
        let txid = crate::Hash512::zero();
        let outpoint = OutPoint::new(txid, 3);
        assert_eq!(outpoint.txid, txid);
        assert_eq!(outpoint.vout, 3);
        assert!(!outpoint.is_coinbase_sentinel());
    }

    #[test]
    fn negative_vout_is_coinbase_sentinel() {
        let outpoint = OutPoint::new(crate::Hash512::zero(), -1);
        assert!(outpoint.is_coinbase_sentinel());
    }
}
