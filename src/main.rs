//! Command-line entry point (§6a): chain administration, wallet
//! management, and the gossip node, all dispatched from one binary.

mod config;
mod error;
mod network;

use clap::{Parser, Subcommand};
use config::NodeConfig;
use ferrochain_core::{ChainStore, Transaction, UtxoIndex};
use error::{AppError, AppResult};
use std::collections::HashMap;
use tracing::info;
use wallet::{Wallet, WalletStore};

#[derive(Parser)]
#[command(name = "ferrochain", about = "Permissioned UTXO cryptocurrency node")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Creates the chain's genesis block, rewarding `address`.
    CreateChain { #[arg(long)] address: String },
    /// Prints every block from the tip back to genesis.
    PrintChain,
    /// Rebuilds the UTXO index from a full scan of the chain.
    ReindexUtxoSet,
    /// Generates a new wallet key pair and address.
    CreateWallet,
    /// Lists every address this node holds a key pair for.
    ListWallets,
    /// Reports the spendable balance of `address`.
    GetBalance { #[arg(long)] address: String },
    /// Builds, signs, and submits a transaction moving `amount` from `from`
    /// to `to`. Mines it locally when `--mine` is passed; otherwise submits
    /// it to the seed node over the gossip protocol.
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        mine: bool,
    },
    /// Starts the gossip node, serving peers until a shutdown signal.
    StartNode {
        #[arg(long)]
        miner: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::CreateChain { address } => create_chain(&address),
        Command::PrintChain => print_chain(),
        Command::ReindexUtxoSet => reindex_utxo_set(),
        Command::CreateWallet => create_wallet(),
        Command::ListWallets => list_wallets(),
        Command::GetBalance { address } => get_balance(&address),
        Command::Send { from, to, amount, mine } => send(&from, &to, amount, mine).await,
        Command::StartNode { miner } => start_node(miner).await,
    }
}

fn node_config() -> AppResult<NodeConfig> {
    NodeConfig::from_env()
}

fn create_chain(address: &str) -> AppResult<()> {
    let config = node_config()?;
    let recipient_hash = wallet::lock_hash(address)?;
    let master_key = config.load_or_create_master_key()?;
    let chain = ChainStore::create(&config.chain_dir, recipient_hash, &master_key)?;
    let utxo = UtxoIndex::open(&config.utxo_dir)?;
    let count = utxo.reindex(&chain)?;
    info!(count, "genesis chain created");
    println!("chain created, genesis coinbase paid to {address}");
    Ok(())
}

fn print_chain() -> AppResult<()> {
    let config = node_config()?;
    let chain = ChainStore::open(&config.chain_dir)?;
    for block in chain.iter()? {
        let block = block?;
        println!("height: {}", block.header.height);
        println!("hash: {}", block.hash());
        println!("prev hash: {}", block.header.prev_hash);
        println!("nonce: {}", block.header.nonce);
        for tx in &block.transactions {
            println!("  tx: {}", tx.id);
        }
        println!();
    }
    Ok(())
}

fn reindex_utxo_set() -> AppResult<()> {
    let config = node_config()?;
    let chain = ChainStore::open(&config.chain_dir)?;
    let utxo = UtxoIndex::open(&config.utxo_dir)?;
    let count = utxo.reindex(&chain)?;
    println!("utxo set reindexed: {count} outputs");
    Ok(())
}

fn create_wallet() -> AppResult<()> {
    let config = node_config()?;
    let store = WalletStore::open(&config.wallet_dir)?;
    let wallet = Wallet::generate();
    let address = wallet.address();
    store.save(&wallet)?;
    println!("new address: {address}");
    Ok(())
}

fn list_wallets() -> AppResult<()> {
    let config = node_config()?;
    let store = WalletStore::open(&config.wallet_dir)?;
    for address in store.list_addresses()? {
        println!("{address}");
    }
    Ok(())
}

fn get_balance(address: &str) -> AppResult<()> {
    let config = node_config()?;
    let utxo = UtxoIndex::open(&config.utxo_dir)?;
    let pk_hash = wallet::lock_hash(address)?;
    let outputs = utxo.find_utxo(&pk_hash)?;
    let balance: u64 = outputs.iter().map(|o| o.value).sum();
    println!("balance of {address}: {balance}");
    Ok(())
}

async fn send(from: &str, to: &str, amount: u64, mine: bool) -> AppResult<()> {
    let config = node_config()?;
    let chain = ChainStore::open(&config.chain_dir)?;
    let utxo = UtxoIndex::open(&config.utxo_dir)?;
    let wallet_store = WalletStore::open(&config.wallet_dir)?;

    let wallet = wallet_store.load(from)?;
    let from_hash = wallet::lock_hash(from)?;
    let to_hash = wallet::lock_hash(to)?;

    let (total, chosen) = utxo.find_spendable_outputs(&from_hash, amount)?;

    let mut previous_txs = HashMap::new();
    let mut inputs = Vec::new();
    for (txid_hex, indices) in &chosen {
        let txid_bytes = hex::decode(txid_hex)
            .map_err(|_| AppError::Decode(format!("malformed utxo txid {txid_hex}")))?;
        let txid = shared::Hash512::from_slice(&txid_bytes)
            .ok_or_else(|| AppError::Decode(format!("malformed utxo txid {txid_hex}")))?;
        let previous_tx = chain
            .find_transaction(&txid)?
            .ok_or_else(|| AppError::Decode(format!("referenced transaction {txid_hex} not found")))?;
        for &index in indices {
            inputs.push(ferrochain_core::TxInput {
                previous_output: shared::OutPoint::new(txid, index),
                signature: Vec::new(),
                public_key: Vec::new(),
            });
        }
        previous_txs.insert(txid, previous_tx);
    }

    let mut outputs = vec![ferrochain_core::TxOutput {
        value: amount,
        pubkey_hash: to_hash,
    }];
    if total > amount {
        outputs.push(ferrochain_core::TxOutput {
            value: total - amount,
            pubkey_hash: from_hash,
        });
    }

    let mut tx = Transaction {
        id: shared::Hash512::zero(),
        inputs,
        outputs,
    };
    // The id is a fixed point over the *final* contents, including the
    // signatures sign() is about to fill in, so it must be finalized last.
    tx.sign(&wallet.keypair, &previous_txs)?;
    tx.finalize_id();

    if mine {
        let valid = ferrochain_core::select_valid(&chain, &utxo, vec![tx])?;
        if valid.is_empty() {
            println!("transaction did not survive verification, nothing mined");
            return Ok(());
        }
        let master_key = config.load_or_create_master_key()?;
        let mut engine = ferrochain_core::PowEngine::new();
        let block = chain.mine_block(valid, from_hash, &master_key, &mut engine)?;
        utxo.reindex(&chain)?;
        println!("mined block at height {}", block.header.height);
    } else {
        network::submit_transaction(config::SEED_ADDRESS, &config.bind_address, &tx).await?;
        println!("transaction {} submitted to network", tx.id);
    }

    Ok(())
}

async fn start_node(miner: Option<String>) -> AppResult<()> {
    let config = node_config()?;
    std::fs::create_dir_all(&config.chain_dir).map_err(AppError::Io)?;

    let miner_hash = match miner {
        Some(address) => Some(wallet::lock_hash(&address)?),
        None => None,
    };

    network::run(config, miner_hash).await
}
