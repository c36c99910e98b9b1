//! Base58 address encoding over a public-key-hash, with a double-SHA512
//! checksum (not bs58's built-in Base58Check, which hardcodes a double-SHA256
//! checksum and would not interoperate with this node's addresses).

use crate::WalletError;
use shared::Hash512;

const VERSION_BYTE: u8 = 0x00;
const CHECKSUM_LEN: usize = 4;

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let once = Hash512::sha512(payload);
    let twice = Hash512::sha512(once.as_bytes());
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&twice.as_bytes()[..CHECKSUM_LEN]);
    out
}

/// Encodes a 20-byte public-key-hash as a base58check-style address.
#[must_use]
pub fn encode(pubkey_hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(1 + pubkey_hash.len());
    payload.push(VERSION_BYTE);
    payload.extend_from_slice(pubkey_hash);

    let sum = checksum(&payload);
    payload.extend_from_slice(&sum);

    bs58::encode(payload).into_string()
}

/// Decodes an address back into its 20-byte public-key-hash, verifying the
/// version byte and checksum. This is `lock(address)` from the transaction
/// model: the only place the core touches address strings, via this facade.
pub fn decode(address: &str) -> Result<[u8; 20], WalletError> {
    let full = bs58::decode(address)
        .into_vec()
        .map_err(|_| WalletError::InvalidAddress)?;

    if full.len() != 1 + 20 + CHECKSUM_LEN {
        return Err(WalletError::InvalidAddress);
    }

    let (payload, sum) = full.split_at(full.len() - CHECKSUM_LEN);
    if payload[0] != VERSION_BYTE {
        return Err(WalletError::InvalidAddress);
    }
    if checksum(payload) != sum {
        return Err(WalletError::InvalidChecksum);
    }

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_roundtrips() {
        let hash = [7u8; 20];
        let address = encode(&hash);
        assert_eq!(decode(&address).unwrap(), hash);
    }

    #[test]
    fn decode_rejects_tampered_checksum() {
        let hash = [1u8; 20];
        let mut address = encode(&hash).into_bytes();
        let last = address.len() - 1;
        address[last] = address[last].wrapping_add(1);
        let address = String::from_utf8(address).unwrap();
        assert!(matches!(
            decode(&address),
            Err(WalletError::InvalidAddress) | Err(WalletError::InvalidChecksum)
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode("not a valid address").is_err());
    }
}
