//! Gossip node (component H, §4.G): a raw-TCP listener keyed by a 6-byte
//! ASCII command tag, synchronizing blocks and transactions between peers.
//!
//! Framing mirrors the reference node's own wire convention: a message is
//! the command tag followed by a binary-encoded payload, read to EOF from a
//! single short-lived connection (the sender writes once and half-closes;
//! there is no persistent multiplexed session).

use crate::config::{NodeConfig, PROTOCOL_VERSION, SEED_ADDRESS};
use crate::error::{AppError, AppResult};
use ferrochain_core::{Block, ChainStore, PowEngine, Transaction, UtxoIndex};
use serde::{Deserialize, Serialize};
use shared::{Hash512, MasterSigningKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

const COMMAND_LEN: usize = 6;

fn cmd_bytes(tag: &str) -> [u8; COMMAND_LEN] {
    let mut buf = [0u8; COMMAND_LEN];
    let bytes = tag.as_bytes();
    buf[..bytes.len()].copy_from_slice(bytes);
    buf
}

fn cmd_str(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .to_string()
}

fn encode<T: Serialize>(value: &T) -> AppResult<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(value, bincode::config::standard())?)
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> AppResult<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum InvKind {
    Block,
    Tx,
}

#[derive(Serialize, Deserialize)]
struct VersionPayload {
    from: String,
    version: u32,
    top_height: u64,
}

#[derive(Serialize, Deserialize)]
struct GetBlocksPayload {
    from: String,
}

#[derive(Serialize, Deserialize)]
struct InventoryPayload {
    from: String,
    kind: InvKind,
    items: Vec<Hash512>,
}

#[derive(Serialize, Deserialize)]
struct GetDataPayload {
    from: String,
    kind: InvKind,
    id: Hash512,
}

#[derive(Serialize, Deserialize)]
struct BlockPayload {
    from: String,
    block_bytes: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct TxPayload {
    from: String,
    tx_bytes: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct AddressPayload {
    addresses: Vec<String>,
}

/// Owns every piece of mutable state the source kept as package-scoped
/// globals (§9 design note): the peer table, mempool, in-transit block list,
/// and the PoW engine used for local mining.
pub struct Node {
    address: String,
    miner_address: Option<[u8; 20]>,
    chain: ChainStore,
    utxo: UtxoIndex,
    master_key: MasterSigningKey,
    mempool: AsyncMutex<HashMap<String, Transaction>>,
    peers: StdMutex<Vec<String>>,
    blocks_in_transit: StdMutex<Vec<Hash512>>,
    engine: StdMutex<PowEngine>,
    mining: AsyncMutex<()>,
}

impl Node {
    fn is_seed(&self) -> bool {
        self.address == SEED_ADDRESS
    }

    fn add_peer(&self, addr: &str) {
        if addr == self.address || addr.is_empty() {
            return;
        }
        let mut peers = self.peers.lock().expect("peer table mutex poisoned");
        if !peers.iter().any(|p| p == addr) {
            peers.push(addr.to_string());
            info!(peer = addr, "added peer");
        }
    }

    fn remove_peer(&self, addr: &str) {
        let mut peers = self.peers.lock().expect("peer table mutex poisoned");
        let before = peers.len();
        peers.retain(|p| p != addr);
        if peers.len() != before {
            warn!(peer = addr, "removed unreachable peer");
        }
    }

    fn peer_snapshot(&self) -> Vec<String> {
        self.peers.lock().expect("peer table mutex poisoned").clone()
    }

    fn spawn_miner(self: &Arc<Self>, miner_hash: [u8; 20]) {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(_guard) = node.mining.try_lock() {
                mine_until_dry(&node, miner_hash).await;
            }
        });
    }
}

async fn send_data(node: &Node, address: &str, tag: &str, payload: Vec<u8>) {
    match TcpStream::connect(address).await {
        Ok(mut stream) => {
            let mut message = cmd_bytes(tag).to_vec();
            message.extend_from_slice(&payload);
            if let Err(e) = stream.write_all(&message).await {
                warn!(%address, error = %e, "failed writing to peer");
            }
            let _ = stream.shutdown().await;
        }
        Err(_) => {
            warn!(%address, "peer is not available");
            node.remove_peer(address);
        }
    }
}

async fn send_version(node: &Node, address: &str) {
    let top_height = node.chain.tip_block().map(|b| b.header.height).unwrap_or(0);
    let payload = VersionPayload {
        from: node.address.clone(),
        version: PROTOCOL_VERSION,
        top_height,
    };
    if let Ok(bytes) = encode(&payload) {
        send_data(node, address, "vsn", bytes).await;
    }
}

async fn send_get_blocks(node: &Node, address: &str) {
    let payload = GetBlocksPayload {
        from: node.address.clone(),
    };
    if let Ok(bytes) = encode(&payload) {
        send_data(node, address, "gbk", bytes).await;
    }
}

async fn send_inventory(node: &Node, address: &str, kind: InvKind, items: Vec<Hash512>) {
    let payload = InventoryPayload {
        from: node.address.clone(),
        kind,
        items,
    };
    if let Ok(bytes) = encode(&payload) {
        send_data(node, address, "inv", bytes).await;
    }
}

async fn send_get_data(node: &Node, address: &str, kind: InvKind, id: Hash512) {
    let payload = GetDataPayload {
        from: node.address.clone(),
        kind,
        id,
    };
    if let Ok(bytes) = encode(&payload) {
        send_data(node, address, "gdt", bytes).await;
    }
}

async fn send_block(node: &Node, address: &str, block: &Block) {
    let Ok(block_bytes) = block.encode() else {
        return;
    };
    let payload = BlockPayload {
        from: node.address.clone(),
        block_bytes,
    };
    if let Ok(bytes) = encode(&payload) {
        send_data(node, address, "blk", bytes).await;
    }
}

async fn send_transaction(node: &Node, address: &str, tx: &Transaction) {
    let Ok(tx_bytes) = encode(tx) else {
        return;
    };
    let payload = TxPayload {
        from: node.address.clone(),
        tx_bytes,
    };
    if let Ok(bytes) = encode(&payload) {
        send_data(node, address, "tnx", bytes).await;
    }
}

/// A one-shot submission used by the `send` CLI command, which has no
/// running `Node` of its own: it speaks the `tnx` message directly to the
/// seed, identifying itself by its own NODE_ID-derived address.
pub async fn submit_transaction(seed_address: &str, from_address: &str, tx: &Transaction) -> AppResult<()> {
    let tx_bytes = encode(tx)?;
    let payload = TxPayload {
        from: from_address.to_string(),
        tx_bytes,
    };
    let bytes = encode(&payload)?;
    let mut stream = TcpStream::connect(seed_address).await.map_err(AppError::Io)?;
    let mut message = cmd_bytes("tnx").to_vec();
    message.extend_from_slice(&bytes);
    stream.write_all(&message).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn handle_version(node: &Arc<Node>, payload: &[u8]) -> AppResult<()> {
    let msg: VersionPayload = decode(payload)?;
    let local_height = node.chain.tip_block()?.header.height;

    if local_height < msg.top_height {
        send_get_blocks(node, &msg.from).await;
    } else if local_height > msg.top_height {
        send_version(node, &msg.from).await;
    }

    node.add_peer(&msg.from);
    Ok(())
}

async fn handle_get_blocks(node: &Arc<Node>, payload: &[u8]) -> AppResult<()> {
    let msg: GetBlocksPayload = decode(payload)?;
    let mut hashes = Vec::new();
    for block in node.chain.iter()? {
        hashes.push(block?.hash());
    }
    send_inventory(node, &msg.from, InvKind::Block, hashes).await;
    Ok(())
}

async fn handle_inventory(node: &Arc<Node>, payload: &[u8]) -> AppResult<()> {
    let msg: InventoryPayload = decode(payload)?;
    match msg.kind {
        InvKind::Block => {
            let Some(&first) = msg.items.first() else {
                return Ok(());
            };
            {
                let mut transit = node
                    .blocks_in_transit
                    .lock()
                    .expect("blocks-in-transit mutex poisoned");
                *transit = msg.items.clone();
                transit.retain(|h| h != &first);
            }
            send_get_data(node, &msg.from, InvKind::Block, first).await;
        }
        InvKind::Tx => {
            let Some(&first) = msg.items.first() else {
                return Ok(());
            };
            let known = node.mempool.lock().await.contains_key(&hex::encode(first.as_bytes()));
            if !known {
                send_get_data(node, &msg.from, InvKind::Tx, first).await;
            }
        }
    }
    Ok(())
}

async fn handle_get_data(node: &Arc<Node>, payload: &[u8]) -> AppResult<()> {
    let msg: GetDataPayload = decode(payload)?;
    match msg.kind {
        InvKind::Block => {
            if let Some(block) = node.chain.get_block(&msg.id)? {
                send_block(node, &msg.from, &block).await;
            }
        }
        InvKind::Tx => {
            let key = hex::encode(msg.id.as_bytes());
            let tx = node.mempool.lock().await.get(&key).cloned();
            if let Some(tx) = tx {
                send_transaction(node, &msg.from, &tx).await;
            }
        }
    }
    Ok(())
}

async fn handle_block(node: &Arc<Node>, payload: &[u8]) -> AppResult<()> {
    let msg: BlockPayload = decode(payload)?;
    let block = Block::decode(&msg.block_bytes)?;
    info!(height = block.header.height, "new block received");
    node.chain.add_block(&block)?;

    let next = {
        let mut transit = node
            .blocks_in_transit
            .lock()
            .expect("blocks-in-transit mutex poisoned");
        if transit.is_empty() {
            None
        } else {
            Some(transit.remove(0))
        }
    };

    match next {
        Some(hash) => send_get_data(node, &msg.from, InvKind::Block, hash).await,
        None => {
            let count = node.utxo.reindex(&node.chain)?;
            info!(count, "utxo set reindexed after block drain");
        }
    }
    Ok(())
}

async fn handle_transaction(node: &Arc<Node>, payload: &[u8]) -> AppResult<()> {
    let msg: TxPayload = decode(payload)?;
    let tx: Transaction = decode(&msg.tx_bytes)?;
    let key = hex::encode(tx.id.as_bytes());
    node.mempool.lock().await.insert(key, tx.clone());

    if node.is_seed() {
        for peer in node.peer_snapshot() {
            if peer != node.address && peer != msg.from {
                send_inventory(node, &peer, InvKind::Tx, vec![tx.id]).await;
            }
        }
    } else if let Some(miner_hash) = node.miner_address {
        let has_work = !node.mempool.lock().await.is_empty();
        if has_work {
            node.spawn_miner(miner_hash);
        }
    }
    Ok(())
}

async fn handle_address(node: &Arc<Node>, payload: &[u8]) -> AppResult<()> {
    let msg: AddressPayload = decode(payload)?;
    for addr in msg.addresses {
        node.add_peer(&addr);
    }
    for peer in node.peer_snapshot() {
        send_get_blocks(node, &peer).await;
    }
    Ok(())
}

/// Mines repeatedly while the mempool still holds transactions that survive
/// verification (§4.H). Aborts the moment a round finds nothing to mine,
/// leaving whatever was already mined and broadcast in earlier rounds.
async fn mine_until_dry(node: &Arc<Node>, miner_hash: [u8; 20]) {
    loop {
        let candidates: Vec<Transaction> = {
            let pool = node.mempool.lock().await;
            pool.values().cloned().collect()
        };
        if candidates.is_empty() {
            return;
        }

        let valid = match ferrochain_core::select_valid(&node.chain, &node.utxo, candidates) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "mining round aborted while selecting transactions");
                return;
            }
        };
        if valid.is_empty() {
            warn!("no mempool transactions survived verification, aborting mining");
            return;
        }

        let included: Vec<String> = valid.iter().map(|tx| hex::encode(tx.id.as_bytes())).collect();

        let node_for_task = Arc::clone(node);
        let mine_result = tokio::task::spawn_blocking(move || {
            let mut engine = node_for_task.engine.lock().expect("pow engine mutex poisoned");
            node_for_task
                .chain
                .mine_block(valid, miner_hash, &node_for_task.master_key, &mut engine)
        })
        .await
        .expect("mining task panicked");

        let block = match mine_result {
            Ok(block) => block,
            Err(e) => {
                warn!(error = %e, "mining failed");
                return;
            }
        };
        info!(height = block.header.height, "mined new block");

        if let Err(e) = node.utxo.reindex(&node.chain) {
            warn!(error = %e, "utxo reindex after mining failed");
        }

        {
            let mut pool = node.mempool.lock().await;
            for id in &included {
                pool.remove(id);
            }
        }

        let hash = block.hash();
        for peer in node.peer_snapshot() {
            if peer != node.address {
                send_inventory(node, &peer, InvKind::Block, vec![hash]).await;
            }
        }
    }
}

async fn handle_connection(node: Arc<Node>, mut stream: TcpStream) {
    let mut buf = Vec::new();
    if let Err(e) = stream.read_to_end(&mut buf).await {
        warn!(error = %e, "failed reading connection");
        return;
    }
    if buf.len() < COMMAND_LEN {
        warn!("truncated command tag, closing connection");
        return;
    }

    let tag = cmd_str(&buf[..COMMAND_LEN]);
    let payload = &buf[COMMAND_LEN..];
    info!(command = %tag, "received command");

    let result = match tag.as_str() {
        "vsn" => handle_version(&node, payload).await,
        "gbk" => handle_get_blocks(&node, payload).await,
        "inv" => handle_inventory(&node, payload).await,
        "gdt" => handle_get_data(&node, payload).await,
        "blk" => handle_block(&node, payload).await,
        "tnx" => handle_transaction(&node, payload).await,
        "adr" => handle_address(&node, payload).await,
        other => {
            warn!(command = %other, "unknown command");
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(command = %tag, error = %e, "malformed message, closing connection");
    }
}

/// Starts the gossip node: binds the listener, announces itself to the seed
/// (unless it is the seed), and serves connections until a shutdown signal
/// is received, at which point the chain database is closed by simply
/// letting `node` drop.
pub async fn run(config: NodeConfig, miner_address: Option<[u8; 20]>) -> AppResult<()> {
    let chain = ChainStore::open(&config.chain_dir)?;
    let utxo = UtxoIndex::open(&config.utxo_dir)?;
    let master_key = config.load_or_create_master_key()?;

    let node = Arc::new(Node {
        address: config.bind_address.clone(),
        miner_address,
        chain,
        utxo,
        master_key,
        mempool: AsyncMutex::new(HashMap::new()),
        peers: StdMutex::new(vec![SEED_ADDRESS.to_string()]),
        blocks_in_transit: StdMutex::new(Vec::new()),
        engine: StdMutex::new(PowEngine::new()),
        mining: AsyncMutex::new(()),
    });

    let listener = TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "gossip node listening");

    if !node.is_seed() {
        send_version(&node, SEED_ADDRESS).await;
    }

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(AppError::Io)?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;
                info!(%peer_addr, "accepted connection");
                let node = Arc::clone(&node);
                tokio::spawn(async move {
                    handle_connection(node, stream).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received, closing chain database");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, closing chain database");
                break;
            }
        }
    }

    Ok(())
}
