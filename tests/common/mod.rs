//! Shared helpers for integration tests: canned blocks, mock chains, and
//! seeded stores.

#![allow(dead_code)]

use std::sync::Once;

use fluxrevenue::{
    daemon_client::MockClient,
    storage::{StoredBlock, StoredTransaction},
    Block, BlockTx, TxInput, TxOutput,
};

/// Watched addresses used across tests.
pub const WATCHED: &str = "t1NodeOperator";
pub const WATCHED_2: &str = "t1SecondNode";

/// Average seconds between blocks on the mock chain.
pub const BLOCK_TIME: i64 = 120;

static INIT: Once = Once::new();

pub fn init_logger() {
    INIT.call_once(|| {
        env_logger::builder().is_test(true).try_init().ok();
    });
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Timestamp for `height` on a chain whose tip was mined just now.
pub fn chain_timestamp(tip: u64, height: u64) -> i64 {
    now() - (tip.saturating_sub(height) as i64) * BLOCK_TIME
}

pub fn empty_block(height: u64, timestamp: i64) -> Block {
    Block {
        hash: format!("hash{height:08}"),
        height,
        timestamp,
        confirmations: 1,
        tx: Vec::new(),
    }
}

pub fn inline_input(address: &str) -> TxInput {
    TxInput {
        address: Some(address.to_string()),
        txid: Some("ignored".to_string()),
        vout: Some(0),
        ..TxInput::default()
    }
}

pub fn prev_input(txid: &str, vout: u32) -> TxInput {
    TxInput {
        txid: Some(txid.to_string()),
        vout: Some(vout),
        ..TxInput::default()
    }
}

pub fn output(value: f64, address: &str) -> TxOutput {
    TxOutput {
        value,
        addresses: vec![address.to_string()],
        script_pub_key: None,
    }
}

/// A block containing a single one-output payment.
pub fn payment_block(
    height: u64,
    timestamp: i64,
    txid: &str,
    value: f64,
    to: &str,
    input: TxInput,
) -> Block {
    let mut block = empty_block(height, timestamp);
    block.tx.push(BlockTx {
        txid: txid.to_string(),
        vin: vec![input],
        vout: vec![output(value, to)],
    });
    block
}

/// A standalone transaction whose output `vout` pays `address`, used as the
/// target of sender resolution.
pub fn previous_transaction(txid: &str, vout: u32, address: &str) -> BlockTx {
    let mut outputs = vec![TxOutput::default(); vout as usize];
    outputs.push(output(1.0, address));
    BlockTx {
        txid: txid.to_string(),
        vin: Vec::new(),
        vout: outputs,
    }
}

/// Populate the mock chain with empty blocks over `heights`, timestamped as
/// if `tip` was mined just now.
pub fn seed_empty_blocks(
    client: &MockClient,
    heights: impl IntoIterator<Item = u64>,
    tip: u64,
) {
    for height in heights {
        client.add_block(empty_block(height, chain_timestamp(tip, height)));
    }
    client.set_tip(tip);
}

pub fn stored_block(height: u64, timestamp: i64) -> StoredBlock {
    StoredBlock {
        height,
        hash: format!("hash{height:08}"),
        timestamp,
        synced_at: now(),
    }
}

pub fn stored_transaction(
    block_height: u64,
    timestamp: i64,
    tx_hash: &str,
    vout_index: u32,
    address: &str,
    value: f64,
    from_address: Option<&str>,
) -> StoredTransaction {
    StoredTransaction {
        block_height,
        tx_hash: tx_hash.to_string(),
        vout_index,
        address: address.to_string(),
        from_address: from_address.map(ToString::to_string),
        value,
        timestamp,
    }
}
