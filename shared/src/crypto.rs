//! Transaction signing (P-521 ECDSA) and the coinbase master key (Ed448).
//!
//! Both key types sign a digest that the caller has already computed (the
//! trimmed-copy hash for transaction inputs, the coinbase payload hash for
//! the master key) rather than hashing a message internally a second time,
//! matching the "sign `m`" step of the transaction model.

use crate::error::{Result, SharedError};
use ed448_goldilocks::{Signature as Ed448Signature, SigningKey as Ed448SigningKey, VerifyingKey as Ed448VerifyingKey};
use p521::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p521::ecdsa::{Signature as P521Signature, SigningKey as P521SigningKey, VerifyingKey as P521VerifyingKey};
use p521::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use ripemd::{Digest, Ripemd160};
use serde::{Deserialize, Serialize};
use signature::Signer as Ed448Signer;
use signature::Verifier as Ed448Verifier;
use zeroize::Zeroize;

/// The locking public-key-hash used in output locking and address
/// derivation: `RIPEMD-160(SHA-512(pubkey))`.
#[must_use]
pub fn public_key_hash(public_key: &[u8]) -> [u8; 20] {
    let sha = crate::hash::Hash512::sha512(public_key);
    let mut hasher = Ripemd160::new();
    hasher.update(sha.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// Half the length, in bytes, of an uncompressed P-521 point (the field
/// element width); a public key is `X‖Y`, a signature is `r‖s`, both of
/// fixed width `FIELD_BYTES`.
pub const FIELD_BYTES: usize = 66;

/// A P-521 public key, stored in raw `X‖Y` form (no SEC1 tag byte) as the
/// transaction model requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(Vec<u8>);

/// A P-521 private (signing) key. Zeroized on drop.
#[derive(Clone)]
pub struct PrivateKey(P521SigningKey);

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// A `r‖s` encoded P-521 ECDSA signature, fixed at `2 * FIELD_BYTES` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(Vec<u8>);

impl PublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != FIELD_BYTES * 2 {
            return Err(SharedError::InvalidKeySize {
                expected: FIELD_BYTES * 2,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn to_verifying_key(&self) -> Result<P521VerifyingKey> {
        let mut sec1 = Vec::with_capacity(1 + self.0.len());
        sec1.push(0x04);
        sec1.extend_from_slice(&self.0);
        P521VerifyingKey::from_sec1_bytes(&sec1)
            .map_err(|e| SharedError::CryptographicError(e.to_string()))
    }
}

impl PrivateKey {
    /// Generates a fresh signing key using the OS random number generator.
    #[must_use]
    pub fn generate() -> Self {
        Self(P521SigningKey::random(&mut OsRng))
    }

    /// Reconstructs a signing key from its scalar bytes.
    pub fn from_scalar_bytes(bytes: &[u8]) -> Result<Self> {
        P521SigningKey::from_slice(bytes)
            .map(Self)
            .map_err(|e| SharedError::CryptographicError(e.to_string()))
    }

    /// Encodes this key as a SEC1/PKCS#8 DER document, the on-disk format of
    /// the wallet facade's `<address>.priv` file.
    pub fn to_sec1_der(&self) -> Result<Vec<u8>> {
        use p521::elliptic_curve::sec1::EncodeEcPrivateKey;
        self.0
            .to_sec1_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| SharedError::CryptographicError(e.to_string()))
    }

    /// Decodes a SEC1/PKCS#8 DER-encoded private key, the inverse of
    /// [`Self::to_sec1_der`].
    pub fn from_sec1_der(der: &[u8]) -> Result<Self> {
        use p521::elliptic_curve::sec1::DecodeEcPrivateKey;
        P521SigningKey::from_sec1_der(der)
            .map(Self)
            .map_err(|e| SharedError::CryptographicError(e.to_string()))
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        let point = self.0.verifying_key().to_encoded_point(false);
        // Strip the leading 0x04 uncompressed-point tag; the transaction
        // model stores public keys as a bare `X‖Y` concatenation.
        PublicKey(point.as_bytes()[1..].to_vec())
    }

    /// Signs a precomputed digest. `digest` is expected to already be the
    /// output of the node's general hash function, not a raw message.
    pub fn sign_prehash(&self, digest: &[u8]) -> Result<Signature> {
        let sig: P521Signature = self
            .0
            .sign_prehash(digest)
            .map_err(|e| SharedError::CryptographicError(e.to_string()))?;
        Ok(Signature(sig.to_bytes().to_vec()))
    }
}

impl Zeroize for PrivateKey {
    fn zeroize(&mut self) {
        // `p521::ecdsa::SigningKey` zeroizes its inner scalar on drop; this
        // impl exists so callers can request an eager wipe without waiting
        // for the value to go out of scope.
        let random = P521SigningKey::random(&mut OsRng);
        self.0 = random;
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl KeyPair {
    #[must_use]
    pub fn generate() -> Self {
        let private_key = PrivateKey::generate();
        let public_key = private_key.public_key();
        Self {
            public_key,
            private_key,
        }
    }

    pub fn sign_prehash(&self, digest: &[u8]) -> Result<Signature> {
        self.private_key.sign_prehash(digest)
    }
}

impl Signature {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != FIELD_BYTES * 2 {
            return Err(SharedError::InvalidSignature);
        }
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Verifies this signature against `digest` using `public_key`.
    pub fn verify_prehash(&self, digest: &[u8], public_key: &PublicKey) -> Result<bool> {
        let verifying_key = public_key.to_verifying_key()?;
        let sig = P521Signature::from_slice(&self.0).map_err(|_| SharedError::InvalidSignature)?;
        match verifying_key.verify_prehash(digest, &sig) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

/// The node-operator master key used to attest coinbase transactions. This
/// is a single, well-known Ed448 key pair read once at startup and threaded
/// through as configuration, never a global.
#[derive(Clone)]
pub struct MasterSigningKey(Ed448SigningKey);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterVerifyingKey(Ed448VerifyingKey);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterSignature(Ed448Signature);

impl MasterSigningKey {
    #[must_use]
    pub fn generate() -> Self {
        Self(Ed448SigningKey::generate(&mut OsRng))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ed448SigningKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| SharedError::CryptographicError(e.to_string()))
    }

    /// Raw scalar bytes, for persisting the operator's master key to disk.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }

    #[must_use]
    pub fn verifying_key(&self) -> MasterVerifyingKey {
        MasterVerifyingKey(self.0.verifying_key())
    }

    #[must_use]
    pub fn sign(&self, message: &[u8]) -> MasterSignature {
        MasterSignature(self.0.sign(message))
    }
}

impl MasterVerifyingKey {
    pub fn verify(&self, message: &[u8], signature: &MasterSignature) -> bool {
        self.0.verify(message, &signature.0).is_ok()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ed448VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| SharedError::CryptographicError(e.to_string()))
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }
}

impl MasterSignature {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ed448Signature::from_bytes(bytes)
            .map(Self)
            .map_err(|e| SharedError::CryptographicError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hash512;

    #[test]
    fn p521_roundtrip_sign_and_verify() {
        let keypair = KeyPair::generate();
        let digest = Hash512::sha512(b"ferrochain transaction");
        let sig = keypair.sign_prehash(digest.as_bytes()).unwrap();
        assert!(sig
            .verify_prehash(digest.as_bytes(), &keypair.public_key)
            .unwrap());
    }

    #[test]
    fn p521_signature_rejects_wrong_digest() {
        let keypair = KeyPair::generate();
        let digest = Hash512::sha512(b"ferrochain transaction");
        let other = Hash512::sha512(b"a different message");
        let sig = keypair.sign_prehash(digest.as_bytes()).unwrap();
        assert!(!sig
            .verify_prehash(other.as_bytes(), &keypair.public_key)
            .unwrap());
    }

    #[test]
    fn public_key_roundtrips_raw_xy_bytes() {
        let keypair = KeyPair::generate();
        let bytes = keypair.public_key.as_bytes().to_vec();
        let rebuilt = PublicKey::from_bytes(bytes).unwrap();
        assert_eq!(rebuilt, keypair.public_key);
    }

    #[test]
    fn ed448_master_key_signs_and_verifies() {
        let master = MasterSigningKey::generate();
        let payload = b"coinbase attestation payload";
        let sig = master.sign(payload);
        assert!(master.verifying_key().verify(payload, &sig));
    }

    #[test]
    fn ed448_master_key_rejects_tampered_payload() {
        let master = MasterSigningKey::generate();
        let sig = master.sign(b"original payload");
        assert!(!master.verifying_key().verify(b"tampered payload", &sig));
    }

    #[test]
    fn private_key_roundtrips_through_sec1_der() {
        let keypair = KeyPair::generate();
        let der = keypair.private_key.to_sec1_der().unwrap();
        let restored = PrivateKey::from_sec1_der(&der).unwrap();
        assert_eq!(restored.public_key(), keypair.public_key);
    }

    #[test]
    fn public_key_hash_is_deterministic_and_20_bytes() {
        let keypair = KeyPair::generate();
        let a = public_key_hash(keypair.public_key.as_bytes());
        let b = public_key_hash(keypair.public_key.as_bytes());
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }
}
