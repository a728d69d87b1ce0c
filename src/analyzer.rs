//! Pure analysis of block bodies against the watched address set.
//!
//! [`analyze_block`] is deterministic and side-effect free: the same block
//! and watched set always produce the same payment list, which makes re-scans
//! after partial failures harmless.

use std::collections::HashSet;

use crate::block::{Block, BlockTx};

/// The sender of a payment, as far as a single block body can tell.
///
/// Inputs usually reference a previous output rather than naming an address,
/// so the analyzer frequently emits [`Sender::Unresolved`]; the sync engine
/// resolves those through the daemon before persisting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    /// The first input carried an inline address.
    Address(String),
    /// The first input references a previous output which must be looked up.
    Unresolved {
        /// Previous transaction id.
        txid: String,
        /// Output index within the previous transaction.
        vout: u32,
    },
    /// The sender could not be determined from the transaction alone.
    Unknown,
}

/// A single payment to a watched address, extracted from a block.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    /// Height of the containing block.
    pub block_height: u64,
    /// Hash of the containing block.
    pub block_hash: String,
    /// Timestamp of the containing block.
    pub timestamp: i64,
    /// Confirmations of the containing block at fetch time.
    pub confirmations: i64,
    /// Transaction the payment occurred in.
    pub tx_hash: String,
    /// Index of the paying output within the transaction.
    pub vout_index: u32,
    /// Watched address that received the payment.
    pub address: String,
    /// Amount received, in whole coins.
    pub value: f64,
    /// Provisional sender.
    pub sender: Sender,
}

/// Extract all payments to `watched` addresses from `block`.
///
/// Coinbase transactions are skipped. Every output address that intersects
/// the watched set emits one payment, so a single transaction can produce
/// several records (multiple outputs, or one output paying several watched
/// addresses).
#[must_use]
pub fn analyze_block(block: &Block, watched: &HashSet<String>) -> Vec<Payment> {
    let mut payments = Vec::new();
    if watched.is_empty() {
        return payments;
    }

    for tx in &block.tx {
        if tx.is_coinbase() {
            continue;
        }

        let mut sender = None;
        for (vout_index, output) in tx.vout.iter().enumerate() {
            for address in output.addresses() {
                if !watched.contains(address) {
                    continue;
                }
                let sender = sender.get_or_insert_with(|| provisional_sender(tx));
                payments.push(Payment {
                    block_height: block.height,
                    block_hash: block.hash.clone(),
                    timestamp: block.timestamp,
                    confirmations: block.confirmations,
                    tx_hash: tx.txid.clone(),
                    vout_index: vout_index as u32,
                    address: address.clone(),
                    value: output.value,
                    sender: sender.clone(),
                });
            }
        }
    }

    payments
}

/// Determine the provisional sender from a transaction's first input.
fn provisional_sender(tx: &BlockTx) -> Sender {
    let Some(input) = tx.vin.first() else {
        return Sender::Unknown;
    };
    if let Some(address) = &input.address {
        return Sender::Address(address.clone());
    }
    if let (Some(txid), Some(vout)) = (&input.txid, input.vout) {
        return Sender::Unresolved {
            txid: txid.clone(),
            vout,
        };
    }
    Sender::Unknown
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::{analyze_block, Sender};
    use crate::block::{Block, BlockTx, TxInput, TxOutput};

    fn watched(addresses: &[&str]) -> HashSet<String> {
        addresses.iter().map(ToString::to_string).collect()
    }

    fn output(value: f64, addresses: &[&str]) -> TxOutput {
        TxOutput {
            value,
            addresses: addresses.iter().map(ToString::to_string).collect(),
            script_pub_key: None,
        }
    }

    fn block_with_txs(txs: Vec<BlockTx>) -> Block {
        Block {
            hash: "00ff".to_string(),
            height: 1500,
            timestamp: 1_700_000_000,
            confirmations: 10,
            tx: txs,
        }
    }

    #[test]
    fn single_matching_output() {
        let block = block_with_txs(vec![BlockTx {
            txid: "tx1".to_string(),
            vin: vec![TxInput {
                txid: Some("prev1".to_string()),
                vout: Some(0),
                ..TxInput::default()
            }],
            vout: vec![
                output(1.25, &["tADDR1"]),
                output(0.0, &["tOTHER"]),
            ],
        }]);

        let payments = analyze_block(&block, &watched(&["tADDR1"]));
        assert_eq!(payments.len(), 1);
        let payment = &payments[0];
        assert_eq!(payment.block_height, 1500);
        assert_eq!(payment.address, "tADDR1");
        assert_eq!(payment.vout_index, 0);
        assert!((payment.value - 1.25).abs() < f64::EPSILON);
        assert_eq!(payment.timestamp, 1_700_000_000);
    }

    #[test]
    fn unresolved_sender_reference() {
        let block = block_with_txs(vec![BlockTx {
            txid: "tx1".to_string(),
            vin: vec![TxInput {
                txid: Some("A".to_string()),
                vout: Some(2),
                ..TxInput::default()
            }],
            vout: vec![output(3.0, &["tADDR1"])],
        }]);

        let payments = analyze_block(&block, &watched(&["tADDR1"]));
        assert_eq!(
            payments[0].sender,
            Sender::Unresolved {
                txid: "A".to_string(),
                vout: 2
            }
        );
    }

    #[test]
    fn inline_sender_address() {
        let block = block_with_txs(vec![BlockTx {
            txid: "tx1".to_string(),
            vin: vec![TxInput {
                address: Some("tSENDER".to_string()),
                txid: Some("A".to_string()),
                vout: Some(0),
                ..TxInput::default()
            }],
            vout: vec![output(3.0, &["tADDR1"])],
        }]);

        let payments = analyze_block(&block, &watched(&["tADDR1"]));
        assert_eq!(payments[0].sender, Sender::Address("tSENDER".to_string()));
    }

    #[test]
    fn bare_input_is_unknown_sender() {
        let block = block_with_txs(vec![BlockTx {
            txid: "tx1".to_string(),
            vin: vec![TxInput::default()],
            vout: vec![output(3.0, &["tADDR1"])],
        }]);

        let payments = analyze_block(&block, &watched(&["tADDR1"]));
        assert_eq!(payments[0].sender, Sender::Unknown);
    }

    #[test]
    fn coinbase_only_block_emits_nothing() {
        let block = block_with_txs(vec![BlockTx {
            txid: "cb".to_string(),
            vin: vec![TxInput {
                coinbase: Some("04ffff001d".to_string()),
                ..TxInput::default()
            }],
            vout: vec![output(37.5, &["tADDR1"])],
        }]);

        assert!(analyze_block(&block, &watched(&["tADDR1"])).is_empty());
    }

    #[test]
    fn empty_watched_set_emits_nothing() {
        let block = block_with_txs(vec![BlockTx {
            txid: "tx1".to_string(),
            vin: vec![TxInput::default()],
            vout: vec![output(1.0, &["tADDR1"])],
        }]);

        assert!(analyze_block(&block, &HashSet::new()).is_empty());
    }

    #[test]
    fn one_output_paying_two_watched_addresses() {
        let block = block_with_txs(vec![BlockTx {
            txid: "tx1".to_string(),
            vin: vec![TxInput::default()],
            vout: vec![output(2.0, &["tADDR1", "tADDR2"])],
        }]);

        let payments = analyze_block(&block, &watched(&["tADDR1", "tADDR2"]));
        assert_eq!(payments.len(), 2);
        assert_eq!(payments[0].vout_index, payments[1].vout_index);
    }

    #[test]
    fn analysis_is_deterministic() {
        let block = block_with_txs(vec![BlockTx {
            txid: "tx1".to_string(),
            vin: vec![TxInput {
                txid: Some("A".to_string()),
                vout: Some(1),
                ..TxInput::default()
            }],
            vout: vec![
                output(1.0, &["tADDR1"]),
                output(2.0, &["tADDR2"]),
            ],
        }]);
        let watched = watched(&["tADDR1", "tADDR2"]);

        assert_eq!(
            analyze_block(&block, &watched),
            analyze_block(&block, &watched)
        );
    }
}
