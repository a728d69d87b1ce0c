//! Client for the Flux daemon's JSON API.
//!
//! All endpoints respond with a `{ "status": ..., "data": ... }` envelope
//! where `status` is `"success"` on the happy path; anything else is treated
//! as an error for that call. The client performs no internal retries:
//! per-call failures are reported to the caller, and the sync engine decides
//! retry policy at the batch level.

use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use futures::{stream, StreamExt};
use http_body_util::{BodyExt, Empty};
use hyper::{http::StatusCode, Method, Request, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client as HttpClient},
    rt::TokioExecutor,
};
use log::{debug, trace};
use thiserror::Error;
use tokio::time::{error, timeout};

use crate::{
    block::{Block, BlockTx},
    caching::TtlCache,
    stats::NodeTierCounts,
};

/// Sender string recorded when a previous output cannot be resolved.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Base units per whole coin reported by the explorer balance endpoint.
const COIN: f64 = 100_000_000.0;

/// Time-to-live for cached block bodies. Bounded so a reorged tip block does
/// not linger forever.
const BLOCK_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
/// Time-to-live for cached sender resolutions. Previous outputs are
/// immutable, so this is generous.
const SENDER_CACHE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Necessary methods for a Flux daemon client.
pub trait Client: Clone + Send + Sync {
    /// Fetch the current chain tip height.
    fn tip(&self) -> impl Future<Output = Result<u64, RpcError>> + Send;

    /// Fetch a block given its height.
    fn block(&self, height: u64) -> impl Future<Output = Result<Block, RpcError>> + Send;

    /// Fetch a transaction given its id.
    fn transaction(&self, txid: &str) -> impl Future<Output = Result<BlockTx, RpcError>> + Send;

    /// Fetch the balance of an address, in whole coins.
    fn balance(&self, address: &str) -> impl Future<Output = Result<f64, RpcError>> + Send;

    /// Fetch the fleet node counts by tier.
    fn node_counts(&self) -> impl Future<Output = Result<NodeTierCounts, RpcError>> + Send;

    /// Fetch fleet node records from the stats host, narrowed to the given
    /// projection.
    fn flux_info(
        &self,
        projection: &str,
    ) -> impl Future<Output = Result<serde_json::Value, RpcError>> + Send;

    /// The URL of the daemon.
    fn url(&self) -> String;

    /// Fetch many blocks with at most `max_concurrent` requests in flight.
    ///
    /// Results are order-preserving by input height and failures are
    /// per-element: one bad height does not poison the batch.
    fn fetch_blocks(
        &self,
        heights: Vec<u64>,
        max_concurrent: usize,
    ) -> impl Future<Output = Vec<(u64, Result<Block, RpcError>)>> + Send {
        async move {
            stream::iter(heights)
                .map(|height| async move { (height, self.block(height).await) })
                .buffered(max_concurrent.max(1))
                .collect()
                .await
        }
    }

    /// Resolve the address paid by output `vout` of a previous transaction.
    ///
    /// Returns [`UNKNOWN_SENDER`] on any failure; transport errors are not
    /// surfaced because a missing sender never blocks payment indexing.
    fn resolve_sender(
        &self,
        prev_txid: &str,
        vout: u32,
    ) -> impl Future<Output = String> + Send {
        async move {
            match self.transaction(prev_txid).await {
                Ok(tx) => sender_from_transaction(&tx, vout),
                Err(e) => {
                    debug!("Failed to resolve sender from {prev_txid}:{vout}: {e}");
                    UNKNOWN_SENDER.to_string()
                }
            }
        }
    }
}

fn sender_from_transaction(tx: &BlockTx, vout: u32) -> String {
    tx.vout
        .get(vout as usize)
        .and_then(|output| output.addresses().first().cloned())
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string())
}

/// A Flux daemon RPC client backed by hyper.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: HttpClient<HttpsConnector<HttpConnector>, Empty<Bytes>>,
    daemon_url: Uri,
    stats_url: Uri,
    timeout: Duration,
    block_cache: Arc<Mutex<TtlCache<u64, Block>>>,
    sender_cache: Arc<Mutex<TtlCache<(String, u32), String>>>,
}

impl RpcClient {
    /// Returns a client pointing at the specified Flux daemon and stats host.
    pub(crate) fn new(
        daemon_url: Uri,
        stats_url: Uri,
        total_timeout: Duration,
        connection_timeout: Duration,
        block_cache_size: usize,
        sender_cache_size: usize,
    ) -> RpcClient {
        let mut hyper_connector = HttpConnector::new();
        hyper_connector.set_connect_timeout(Some(connection_timeout));
        hyper_connector.enforce_http(false);
        hyper_connector.set_keepalive(Some(Duration::from_secs(25)));
        let rustls_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(hyper_connector);
        let client = HttpClient::builder(TokioExecutor::new()).build(rustls_connector);

        RpcClient {
            client,
            daemon_url,
            stats_url,
            timeout: total_timeout,
            block_cache: Arc::new(Mutex::new(TtlCache::with_ttl(
                block_cache_size,
                BLOCK_CACHE_TTL,
            ))),
            sender_cache: Arc::new(Mutex::new(TtlCache::with_ttl(
                sender_cache_size,
                SENDER_CACHE_TTL,
            ))),
        }
    }

    async fn request(
        &self,
        base: &Uri,
        path_and_query: &str,
    ) -> Result<serde_json::Value, RpcError> {
        let uri = base.to_string().trim_end_matches('/').to_owned() + path_and_query;
        let req = Request::builder()
            .method(Method::GET)
            .uri(&uri)
            .body(Empty::new())?;

        // Await the full response within the configured deadline.
        let response = timeout(self.timeout, self.client.request(req))
            .await?
            .map_err(|e| RpcError::Request(Box::new(e)))?;

        if response.status() != StatusCode::OK {
            return Err(RpcError::Status(response.status().as_u16()));
        }

        let (_parts, body) = response.into_parts();
        Ok(serde_json::from_slice(
            &body
                .collect()
                .await
                .map_err(|e| RpcError::Request(Box::new(e)))?
                .to_bytes(),
        )?)
    }

    /// Unwrap the `{ status, data }` envelope, returning `data`.
    async fn request_data(
        &self,
        base: &Uri,
        path_and_query: &str,
    ) -> Result<serde_json::Value, RpcError> {
        let mut res = self.request(base, path_and_query).await?;
        if res["status"].as_str() != Some("success") {
            return Err(RpcError::Envelope(
                res["status"].as_str().unwrap_or("<missing>").to_string(),
            ));
        }
        Ok(res["data"].take())
    }
}

impl Client for RpcClient {
    async fn tip(&self) -> Result<u64, RpcError> {
        trace!("Requesting current tip height");
        match self.request_data(&self.daemon_url, "/daemon/getinfo").await {
            Ok(data) => data["blocks"]
                .as_u64()
                .ok_or_else(|| RpcError::MissingData("{{ data: {{ blocks: ... }} }}".to_string())),
            Err(e) => {
                // getinfo occasionally fails on busy nodes; getblockcount is a
                // cheaper fallback that returns the height directly.
                debug!("getinfo failed ({e}), falling back to getblockcount");
                let data = self
                    .request_data(&self.daemon_url, "/daemon/getblockcount")
                    .await?;
                data.as_u64()
                    .ok_or_else(|| RpcError::MissingData("{{ data: <height> }}".to_string()))
            }
        }
    }

    async fn block(&self, height: u64) -> Result<Block, RpcError> {
        if let Some(block) = self
            .block_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&height)
        {
            trace!("Block {height} served from cache");
            return Ok(block);
        }

        trace!("Requesting block {height}");
        let data = self
            .request_data(
                &self.daemon_url,
                &format!("/daemon/getblock?hashheight={height}&verbosity=2"),
            )
            .await?;
        let block: Block = serde_json::from_value(data)?;

        self.block_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(height, block.clone());
        Ok(block)
    }

    async fn transaction(&self, txid: &str) -> Result<BlockTx, RpcError> {
        trace!("Requesting transaction {txid}");
        let data = self
            .request_data(
                &self.daemon_url,
                &format!("/daemon/getrawtransaction?txid={txid}&decrypt=1"),
            )
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn balance(&self, address: &str) -> Result<f64, RpcError> {
        trace!("Requesting balance of {address}");
        let data = self
            .request_data(&self.daemon_url, &format!("/explorer/balance/{address}"))
            .await?;
        let base_units = data
            .as_f64()
            .ok_or_else(|| RpcError::MissingData("{{ data: <balance> }}".to_string()))?;
        Ok(base_units / COIN)
    }

    async fn node_counts(&self) -> Result<NodeTierCounts, RpcError> {
        trace!("Requesting fleet node counts");
        let data = self
            .request_data(&self.daemon_url, "/daemon/getfluxnodecount")
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn flux_info(&self, projection: &str) -> Result<serde_json::Value, RpcError> {
        trace!("Requesting fluxinfo projection {projection}");
        self.request_data(&self.stats_url, &format!("/fluxinfo?projection={projection}"))
            .await
    }

    fn url(&self) -> String {
        self.daemon_url.to_string()
    }

    async fn resolve_sender(&self, prev_txid: &str, vout: u32) -> String {
        let key = (prev_txid.to_string(), vout);
        if let Some(address) = self
            .sender_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return address;
        }

        let resolved = match self.transaction(prev_txid).await {
            Ok(tx) => sender_from_transaction(&tx, vout),
            Err(e) => {
                debug!("Failed to resolve sender from {prev_txid}:{vout}: {e}");
                UNKNOWN_SENDER.to_string()
            }
        };

        self.sender_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, resolved.clone());
        resolved
    }
}

/// A programmable daemon client returning canned responses, for testing.
///
/// Cloning a `MockClient` shares its canned chain, so a handle kept by a test
/// can mutate what an indexer under test observes.
#[derive(Debug, Clone, Default)]
pub struct MockClient {
    chain: Arc<Mutex<MockChain>>,
}

#[derive(Debug, Default)]
struct MockChain {
    tip: u64,
    blocks: std::collections::HashMap<u64, Block>,
    transactions: std::collections::HashMap<String, BlockTx>,
    balances: std::collections::HashMap<String, f64>,
    node_counts: Option<NodeTierCounts>,
    flux_info: std::collections::HashMap<String, serde_json::Value>,
    fail_node_counts: bool,
    fail_flux_info: bool,
}

impl MockClient {
    /// Create an empty mock chain.
    #[must_use]
    pub fn new() -> MockClient {
        MockClient::default()
    }

    fn chain(&self) -> std::sync::MutexGuard<'_, MockChain> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the reported tip height.
    pub fn set_tip(&self, height: u64) {
        self.chain().tip = height;
    }

    /// Add a block, raising the tip if the block is above it.
    pub fn add_block(&self, block: Block) {
        let mut chain = self.chain();
        chain.tip = chain.tip.max(block.height);
        chain.blocks.insert(block.height, block);
    }

    /// Remove a block, simulating a daemon that cannot serve that height.
    pub fn remove_block(&self, height: u64) -> Option<Block> {
        self.chain().blocks.remove(&height)
    }

    /// Add a standalone transaction for `getrawtransaction` lookups.
    pub fn add_transaction(&self, tx: BlockTx) {
        self.chain().transactions.insert(tx.txid.clone(), tx);
    }

    /// Set the balance reported for an address, in whole coins.
    pub fn set_balance(&self, address: &str, balance: f64) {
        self.chain().balances.insert(address.to_string(), balance);
    }

    /// Set the fleet node counts.
    pub fn set_node_counts(&self, counts: NodeTierCounts) {
        self.chain().node_counts = Some(counts);
    }

    /// Set the response for a `fluxinfo` projection.
    pub fn set_flux_info(&self, projection: &str, value: serde_json::Value) {
        self.chain().flux_info.insert(projection.to_string(), value);
    }

    /// Make fleet stat endpoints fail, simulating a stats host outage.
    pub fn fail_network_stats(&self, fail: bool) {
        let mut chain = self.chain();
        chain.fail_node_counts = fail;
        chain.fail_flux_info = fail;
    }
}

impl Client for MockClient {
    async fn tip(&self) -> Result<u64, RpcError> {
        let tip = self.chain().tip;
        if tip == 0 {
            return Err(RpcError::MissingData("mock chain has no tip".to_string()));
        }
        Ok(tip)
    }

    async fn block(&self, height: u64) -> Result<Block, RpcError> {
        self.chain()
            .blocks
            .get(&height)
            .cloned()
            .ok_or_else(|| RpcError::MissingData(format!("mock chain has no block {height}")))
    }

    async fn transaction(&self, txid: &str) -> Result<BlockTx, RpcError> {
        self.chain()
            .transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| RpcError::MissingData(format!("mock chain has no transaction {txid}")))
    }

    async fn balance(&self, address: &str) -> Result<f64, RpcError> {
        Ok(self.chain().balances.get(address).copied().unwrap_or(0.0))
    }

    async fn node_counts(&self) -> Result<NodeTierCounts, RpcError> {
        let chain = self.chain();
        if chain.fail_node_counts {
            return Err(RpcError::Status(503));
        }
        chain
            .node_counts
            .clone()
            .ok_or_else(|| RpcError::MissingData("mock chain has no node counts".to_string()))
    }

    async fn flux_info(&self, projection: &str) -> Result<serde_json::Value, RpcError> {
        let chain = self.chain();
        if chain.fail_flux_info {
            return Err(RpcError::Status(503));
        }
        chain.flux_info.get(projection).cloned().ok_or_else(|| {
            RpcError::MissingData(format!("mock chain has no fluxinfo projection {projection}"))
        })
    }

    fn url(&self) -> String {
        "http://node.example.com".to_string()
    }
}

/// An error originating from the daemon client.
#[derive(Error, Debug)]
pub enum RpcError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Request(Box<dyn std::error::Error + Send + Sync>),
    /// Failed to build the HTTP request.
    #[error("failed to build HTTP request: {0}")]
    InvalidRequest(#[from] hyper::http::Error),
    /// HTTP request timed out.
    #[error("HTTP request timed out: {0}")]
    Timeout(#[from] error::Elapsed),
    /// Server returned a non-OK status code.
    #[error("HTTP response had unexpected status code {0}")]
    Status(u16),
    /// The response envelope did not indicate success.
    #[error("API response status was \"{0}\", expected \"success\"")]
    Envelope(String),
    /// Response is missing expected data.
    #[error("expected data was not present in API response: {0}")]
    MissingData(String),
    /// The response is not valid json, or has the wrong shape.
    #[error("failed to interpret response body as json: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use std::collections::HashSet;

    use super::{Client, MockClient, UNKNOWN_SENDER};
    use crate::block::{Block, BlockTx, TxOutput};

    fn block_at(height: u64) -> Block {
        Block {
            hash: format!("hash{height}"),
            height,
            timestamp: 1_700_000_000 + height as i64 * 120,
            confirmations: 1,
            tx: Vec::new(),
        }
    }

    #[tokio::test]
    async fn fetch_blocks_preserves_order_and_isolates_failures() {
        let client = MockClient::new();
        client.add_block(block_at(10));
        client.add_block(block_at(12));

        let results = client.fetch_blocks(vec![10, 11, 12], 2).await;
        assert_eq!(
            results.iter().map(|(h, _)| *h).collect::<Vec<_>>(),
            vec![10, 11, 12]
        );
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert!(results[2].1.is_ok());
    }

    #[tokio::test]
    async fn resolve_sender_reads_previous_output() {
        let client = MockClient::new();
        client.add_transaction(BlockTx {
            txid: "A".to_string(),
            vin: Vec::new(),
            vout: vec![
                TxOutput::default(),
                TxOutput::default(),
                TxOutput {
                    value: 1.0,
                    addresses: vec!["tSENDER".to_string()],
                    script_pub_key: None,
                },
            ],
        });

        assert_eq!(client.resolve_sender("A", 2).await, "tSENDER");
        assert_eq!(client.resolve_sender("A", 9).await, UNKNOWN_SENDER);
        assert_eq!(client.resolve_sender("missing", 0).await, UNKNOWN_SENDER);
    }

    #[tokio::test]
    async fn mock_tip_follows_added_blocks() {
        let client = MockClient::new();
        assert!(client.tip().await.is_err());

        client.add_block(block_at(100));
        assert_eq!(client.tip().await.unwrap(), 100);

        client.set_tip(105);
        assert_eq!(client.tip().await.unwrap(), 105);
    }

    #[test]
    fn unknown_sender_is_not_a_watched_address_shape() {
        // Addresses on this chain start with "t"; the sentinel must never
        // collide with one in the watched set.
        let watched: HashSet<String> = ["t1Example".to_string()].into();
        assert!(!watched.contains(UNKNOWN_SENDER));
    }
}
