//! On-disk wallet layout: `<data_dir>/<address>.priv` (SEC1 DER) and
//! `<data_dir>/<address>.pub` (raw `X‖Y`), one pair per address.

use crate::{Wallet, WalletError};
use shared::{KeyPair, PrivateKey, PublicKey};
use std::fs;
use std::path::{Path, PathBuf};

pub struct WalletStore {
    dir: PathBuf,
}

impl WalletStore {
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn priv_path(&self, address: &str) -> PathBuf {
        self.dir.join(format!("{address}.priv"))
    }

    fn pub_path(&self, address: &str) -> PathBuf {
        self.dir.join(format!("{address}.pub"))
    }

    pub fn save(&self, wallet: &Wallet) -> Result<(), WalletError> {
        let address = wallet.address();
        let der = wallet
            .keypair
            .private_key
            .to_sec1_der()
            .map_err(|_| WalletError::Crypto)?;
        fs::write(self.priv_path(&address), der)?;
        fs::write(self.pub_path(&address), wallet.keypair.public_key.as_bytes())?;
        Ok(())
    }

    pub fn load(&self, address: &str) -> Result<Wallet, WalletError> {
        let der = fs::read(self.priv_path(address))?;
        let pub_bytes = fs::read(self.pub_path(address))?;

        let private_key = PrivateKey::from_sec1_der(&der).map_err(|_| WalletError::Crypto)?;
        let public_key = PublicKey::from_bytes(pub_bytes).map_err(|_| WalletError::Crypto)?;

        if private_key.public_key() != public_key {
            return Err(WalletError::Crypto);
        }

        Ok(Wallet {
            keypair: KeyPair {
                public_key,
                private_key,
            },
        })
    }

    /// Lists every address with a saved key pair in this store, derived from
    /// the `.priv` file stems present in the directory.
    pub fn list_addresses(&self) -> std::io::Result<Vec<String>> {
        let mut addresses = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("priv") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    addresses.push(stem.to_string());
                }
            }
        }
        addresses.sort();
        Ok(addresses)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_recovers_the_same_keypair() {
        let dir = tempfile::tempdir().unwrap();
        let store = WalletStore::open(dir.path()).unwrap();

        let wallet = Wallet::generate();
        let address = wallet.address();
        store.save(&wallet).unwrap();

        let loaded = store.load(&address).unwrap();
        assert_eq!(loaded.address(), address);
    }

    #[test]
    fn list_addresses_finds_saved_wallets() {
        let dir = tempfile::tempdir().unwrap();
        let store = WalletStore::open(dir.path()).unwrap();

        let a = Wallet::generate();
        let b = Wallet::generate();
        store.save(&a).unwrap();
        store.save(&b).unwrap();

        let mut addresses = store.list_addresses().unwrap();
        addresses.sort();
        let mut expected = vec![a.address(), b.address()];
        expected.sort();
        assert_eq!(addresses, expected);
    }
}
