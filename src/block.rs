//! Data model for blocks and transactions as returned by the Flux daemon's
//! JSON API. Deserialization is intentionally tolerant: upstream explorers
//! disagree on where output addresses live, so [`TxOutput`] accepts both the
//! flat and the `scriptPubKey`-nested form.

use serde::{Deserialize, Serialize};

/// A block body as returned by `GET /daemon/getblock`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block hash, hex-encoded.
    pub hash: String,
    /// Block height.
    pub height: u64,
    /// Block timestamp in seconds since epoch.
    #[serde(rename = "time")]
    pub timestamp: i64,
    /// Confirmations at the time the block was fetched.
    #[serde(default)]
    pub confirmations: i64,
    /// Transactions contained in the block.
    #[serde(default)]
    pub tx: Vec<BlockTx>,
}

/// A transaction within a [`Block`], or a standalone transaction as returned
/// by `GET /daemon/getrawtransaction`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockTx {
    /// Chain-assigned transaction identifier.
    pub txid: String,
    /// Transaction inputs.
    #[serde(default)]
    pub vin: Vec<TxInput>,
    /// Transaction outputs.
    #[serde(default)]
    pub vout: Vec<TxOutput>,
}

impl BlockTx {
    /// Returns `true` if this is a coinbase transaction (its first input
    /// carries the coinbase marker).
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.vin.first().is_some_and(|input| input.coinbase.is_some())
    }
}

/// A transaction input. Which fields are present depends on the input kind:
/// coinbase inputs carry only `coinbase`, regular inputs carry the previous
/// output reference (`txid` + `vout`) and sometimes an inline `address`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    /// Coinbase marker, present only on coinbase inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
    /// Spending address, if the daemon inlined it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Previous transaction id this input spends from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    /// Output index within the previous transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
}

/// A transaction output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Output amount in whole coins.
    #[serde(default)]
    pub value: f64,
    /// Decoded output addresses, flat form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    /// Decoded output script, nested form.
    #[serde(
        default,
        rename = "scriptPubKey",
        skip_serializing_if = "Option::is_none"
    )]
    pub script_pub_key: Option<ScriptPubKey>,
}

impl TxOutput {
    /// The decoded addresses of this output, regardless of which form the
    /// daemon used.
    #[must_use]
    pub fn addresses(&self) -> &[String] {
        if !self.addresses.is_empty() {
            return &self.addresses;
        }
        self.script_pub_key
            .as_ref()
            .map_or(&[], |script| script.addresses.as_slice())
    }
}

/// The decoded script of a [`TxOutput`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    /// Addresses the output pays to.
    #[serde(default)]
    pub addresses: Vec<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use serde_json::json;

    use super::{Block, BlockTx, TxOutput};

    #[test]
    fn parse_block_with_flat_addresses() {
        let value = json!({
            "hash": "000000aabbcc",
            "height": 1500,
            "time": 1_700_000_000,
            "confirmations": 12,
            "tx": [{
                "txid": "abc123",
                "vin": [{"txid": "def456", "vout": 1}],
                "vout": [{"value": 1.25, "addresses": ["t1Example"]}],
            }],
        });

        let block: Block = serde_json::from_value(value).unwrap();
        assert_eq!(block.height, 1500);
        assert_eq!(block.timestamp, 1_700_000_000);
        assert_eq!(block.tx.len(), 1);
        assert!(!block.tx[0].is_coinbase());
        assert_eq!(block.tx[0].vout[0].addresses(), ["t1Example".to_string()]);
    }

    #[test]
    fn parse_output_with_script_pub_key() {
        let value = json!({
            "value": 0.5,
            "scriptPubKey": {"addresses": ["t1Nested"]},
        });

        let output: TxOutput = serde_json::from_value(value).unwrap();
        assert_eq!(output.addresses(), ["t1Nested".to_string()]);
    }

    #[test]
    fn coinbase_detection() {
        let value = json!({
            "txid": "cb",
            "vin": [{"coinbase": "04ffff001d"}],
            "vout": [{"value": 37.5, "addresses": ["t1Miner"]}],
        });

        let tx: BlockTx = serde_json::from_value(value).unwrap();
        assert!(tx.is_coinbase());
    }

    #[test]
    fn missing_fields_default() {
        let value = json!({
            "hash": "00",
            "height": 1,
            "time": 1_700_000_000,
        });

        let block: Block = serde_json::from_value(value).unwrap();
        assert!(block.tx.is_empty());
        assert_eq!(block.confirmations, 0);
    }
}
