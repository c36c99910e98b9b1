//! Ambient node configuration (§2a): the network identity, data-directory
//! layout, and the operator's master coinbase-attestation key, all derived
//! from a single `NODE_ID` and threaded explicitly rather than read from a
//! global.

use std::path::PathBuf;

/// The well-known coordination hub. Only this address acts as the seed that
/// re-inventories transactions to every other peer (see `network::handle_transaction`).
pub const SEED_ADDRESS: &str = "localhost:3000";

/// Handshake protocol version carried in every `vsn` payload. There is no
/// negotiation: peers that disagree on this value still interoperate, since
/// nothing currently branches on it besides its presence in the payload.
pub const PROTOCOL_VERSION: u32 = 1;

pub struct NodeConfig {
    pub node_id: String,
    pub bind_address: String,
    pub chain_dir: PathBuf,
    pub utxo_dir: PathBuf,
    pub wallet_dir: PathBuf,
    pub master_key_path: PathBuf,
}

impl NodeConfig {
    /// Reads `NODE_ID` from the environment and derives every directory and
    /// the bind address from it, per §6's external-interfaces layout.
    pub fn from_env() -> crate::error::AppResult<Self> {
        let node_id = std::env::var("NODE_ID").map_err(|_| crate::error::AppError::MissingNodeId)?;
        Ok(Self::for_node_id(node_id))
    }

    #[must_use]
    pub fn for_node_id(node_id: String) -> Self {
        let chain_dir = PathBuf::from(format!("./tmp/blocks_{node_id}"));
        let master_key_path = chain_dir.join("master.key");
        Self {
            bind_address: format!("localhost:{node_id}"),
            utxo_dir: chain_dir.join("utxo"),
            wallet_dir: PathBuf::from(format!("./tmp/wallets_{node_id}")),
            master_key_path,
            chain_dir,
            node_id,
        }
    }

    /// Loads the operator's Ed448 master key from `master_key_path`,
    /// generating and persisting a fresh one on first use. Read once per
    /// process and threaded through explicitly; never a global (§9 design
    /// note on the coinbase master key).
    pub fn load_or_create_master_key(&self) -> std::io::Result<shared::MasterSigningKey> {
        if let Ok(bytes) = std::fs::read(&self.master_key_path) {
            if let Ok(key) = shared::MasterSigningKey::from_bytes(&bytes) {
                return Ok(key);
            }
        }

        let key = shared::MasterSigningKey::generate();
        if let Some(parent) = self.master_key_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.master_key_path, key.to_bytes())?;
        Ok(key)
    }
}
