use std::{
    collections::{BTreeMap, HashSet},
    ops::Deref,
    sync::Arc,
    time::Duration,
};

use hyper::Uri;
use log::{debug, error, info};
use tokio::{
    sync::{
        mpsc::{channel, error::TryRecvError, Receiver, Sender},
        Mutex as AsyncMutex,
    },
    task::{JoinError, JoinHandle},
    time::{self, MissedTickBehavior},
};

use crate::{
    aggregator::{
        Aggregator, AddressRevenue, BlockRangeRevenue, RevenueSummary, TransactionPage,
    },
    config::Config,
    daemon_client::{Client, MockClient, RpcClient},
    pubsub::{Publisher, Subscriber},
    stats::{NodeStatsSnapshot, StatsCollector, UtilizationSnapshot},
    storage::{Client as StorageClient, Storage},
    sync::{CycleOutcome, SyncEngine, SyncStatus, SyncTuning},
    FluxRevenueError,
};

const DEFAULT_DAEMON: &str = "https://api.runonflux.io";
const DEFAULT_STATS_HOST: &str = "https://stats.runonflux.io";
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(120);
/// Timeout for connection formation.
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for total call completion.
const DEFAULT_RPC_TOTAL_TIMEOUT: Duration = Duration::from_secs(10);
/// Outer deadline for one network statistics collection.
const DEFAULT_COLLECTION_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_BLOCK_CACHE_SIZE: usize = 64;
const DEFAULT_SENDER_CACHE_SIZE: usize = 10_000;

/// The `RevenueIndexer` keeps a local store of blocks and payments to watched
/// addresses synchronized with the chain, and serves aggregated revenue
/// queries over that store.
pub struct RevenueIndexer<S: Storage, C: Client = RpcClient>(
    pub(crate) Arc<RevenueIndexerInner<S, C>>,
);

#[doc(hidden)]
pub struct RevenueIndexerInner<S: Storage, C: Client = RpcClient> {
    client: C,
    store: StorageClient<S>,
    engine: Arc<SyncEngine<S, C>>,
    aggregator: Aggregator<S>,
    stats: StatsCollector<C>,
    sync_interval: Duration,
    publisher: Arc<Publisher>,
    loop_handle: AsyncMutex<Option<LoopHandle>>,
    /// Send commands to the sync loop.
    command_sender: Sender<MessageToLoop>,
    command_receiver: Arc<AsyncMutex<Receiver<MessageToLoop>>>,
}

impl<S: Storage, C: Client> Clone for RevenueIndexer<S, C> {
    fn clone(&self) -> Self {
        RevenueIndexer(self.0.clone())
    }
}

impl<S: Storage, C: Client> Deref for RevenueIndexer<S, C> {
    type Target = RevenueIndexerInner<S, C>;

    fn deref(&self) -> &RevenueIndexerInner<S, C> {
        &self.0
    }
}

impl<S: Storage + 'static, C: Client + 'static> RevenueIndexer<S, C> {
    /// Returns a builder used to create a new revenue indexer.
    #[must_use]
    pub fn builder(addresses: Vec<String>, store: S) -> RevenueIndexerBuilder<S> {
        RevenueIndexerBuilder::new(addresses, store)
    }

    /// Runs the indexer. This function spawns a task which periodically runs
    /// a sync cycle against the configured daemon, back to back while the
    /// index is behind and on the configured interval once caught up.
    ///
    /// # Errors
    ///
    /// Returns an [`FluxRevenueError::AlreadyRunning`] error if the sync loop
    /// is already running.
    pub async fn run(&self) -> Result<(), FluxRevenueError> {
        // Determine if the sync loop is already running.
        {
            let loop_handle = self.loop_handle.lock().await;
            if let Some(handle) = loop_handle.as_ref() {
                if !handle.is_finished() {
                    return Err(FluxRevenueError::AlreadyRunning);
                }
            }
        }

        let engine = self.engine.clone();
        let interval = self.sync_interval;
        let receiver = self.command_receiver.clone();

        info!("Starting sync loop");
        *self.loop_handle.lock().await = Some(LoopHandle::from(tokio::spawn(async move {
            let mut commands = receiver.lock().await;
            let mut timer = time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut catching_up = false;
            loop {
                if catching_up {
                    // Behind the chain: run again immediately, but still
                    // react to a stop request.
                    match commands.try_recv() {
                        Ok(MessageToLoop::Stop) => {
                            info!("Sync loop received stop signal");
                            break;
                        }
                        Err(TryRecvError::Empty) => {}
                        Err(TryRecvError::Disconnected) => {
                            error!("Sync loop lost connection to the indexer; stopping");
                            break;
                        }
                    }
                } else {
                    tokio::select! {
                        _ = timer.tick() => {}
                        command = commands.recv() => {
                            match command {
                                Some(MessageToLoop::Stop) => {
                                    info!("Sync loop received stop signal");
                                }
                                None => {
                                    error!("Sync loop lost connection to the indexer; stopping");
                                }
                            }
                            break;
                        }
                    }
                }

                match engine.run_cycle().await {
                    Ok(CycleOutcome::Completed(metrics)) => {
                        let budget = engine.tuning().max_blocks_per_sync;
                        catching_up =
                            !metrics.complete && budget > 0 && metrics.processed >= budget;
                        if catching_up {
                            debug!("Cycle used its full budget; continuing without waiting");
                        }
                    }
                    Ok(CycleOutcome::AlreadyRunning) => catching_up = false,
                    Err(e) => {
                        error!("Sync cycle failed: {e}");
                        catching_up = false;
                    }
                }
            }
            info!("Sync loop stopped");
        })));
        debug!("Sync loop started successfully");
        Ok(())
    }

    /// Returns the enum [`IndexerStatus`] describing whether the sync loop is
    /// running, not running, or has experienced an error.
    #[must_use]
    pub async fn status(&self) -> IndexerStatus {
        let finished = {
            let loop_handle = self.loop_handle.lock().await;
            match loop_handle.as_ref() {
                None => return IndexerStatus::NotRunning,
                Some(handle) => handle.is_finished(),
            }
        };
        if !finished {
            return IndexerStatus::Running;
        }
        match self.loop_handle.lock().await.take() {
            Some(handle) => match handle.join().await {
                Ok(()) => IndexerStatus::NotRunning,
                Err(e) => IndexerStatus::Error(FluxRevenueError::Threading(e)),
            },
            None => IndexerStatus::NotRunning,
        }
    }

    /// Stops the sync loop and flushes the store, blocking until complete.
    /// If the loop is not running, only the flush is performed.
    ///
    /// # Errors
    ///
    /// Returns an [`FluxRevenueError::StopSignal`] error if the loop could
    /// not be signalled, and a storage error if the final flush fails.
    pub async fn stop(&self) -> Result<(), FluxRevenueError> {
        match self.loop_handle.lock().await.take() {
            None => {}
            Some(handle) if handle.is_finished() => handle.join().await?,
            Some(handle) => {
                self.command_sender
                    .send(MessageToLoop::Stop)
                    .await
                    .map_err(|e| FluxRevenueError::StopSignal(e.to_string()))?;
                handle.join().await?;
            }
        }
        self.store.flush().await?;
        Ok(())
    }

    /// Run one sync cycle right now, without waiting for the next interval.
    /// Idempotent with respect to the running loop: if a cycle is already in
    /// flight this returns [`CycleOutcome::AlreadyRunning`] without error.
    ///
    /// # Errors
    ///
    /// Returns an error if the cycle aborts; partial progress made before the
    /// abort remains committed.
    pub async fn trigger_sync(&self) -> Result<CycleOutcome, FluxRevenueError> {
        Ok(self.engine.run_cycle().await?)
    }

    /// Re-resolve missing senders for up to `limit` stored payments,
    /// returning the number of payments updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects a read or write.
    pub async fn trigger_backfill(&self, limit: u64) -> Result<u64, FluxRevenueError> {
        Ok(self.engine.backfill_senders(limit).await?)
    }

    /// The latest synchronization status snapshot.
    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        self.publisher.latest()
    }

    /// Returns a [`Subscriber`] receiving a status update after every batch
    /// and cycle.
    #[must_use]
    pub fn subscribe(&self) -> Subscriber {
        self.publisher.subscribe()
    }

    /// Get the current chain tip height from the daemon.
    ///
    /// # Errors
    ///
    /// Returns an error if a connection can not be made to the daemon, or if
    /// the daemon's response cannot be parsed.
    pub async fn current_tip(&self) -> Result<u64, FluxRevenueError> {
        Ok(self.client.tip().await?)
    }

    /// Get the balance of an address in whole coins, from the explorer.
    ///
    /// # Errors
    ///
    /// Returns an error if a connection can not be made to the daemon, or if
    /// the daemon's response cannot be parsed.
    pub async fn balance(&self, address: &str) -> Result<f64, FluxRevenueError> {
        Ok(self.client.balance(address).await?)
    }

    /// Calendar-time revenue over the past `days` days. With an empty
    /// `addresses` slice, all watched addresses are included.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects a read.
    pub async fn revenue(
        &self,
        days: u64,
        addresses: &[String],
        breakdown: bool,
    ) -> Result<RevenueSummary, FluxRevenueError> {
        Ok(self.aggregator.revenue(days, addresses, breakdown).await?)
    }

    /// Revenue over the last `blocks` blocks, against the highest stored
    /// height. With `address = None`, all watched addresses are included.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects a read.
    pub async fn revenue_by_blocks(
        &self,
        blocks: u64,
        address: Option<&str>,
    ) -> Result<BlockRangeRevenue, FluxRevenueError> {
        Ok(self.aggregator.revenue_by_blocks(blocks, address).await?)
    }

    /// All-time totals and daily series for every watched address.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects a read.
    pub async fn address_breakdown(
        &self,
    ) -> Result<BTreeMap<String, AddressRevenue>, FluxRevenueError> {
        Ok(self.aggregator.address_breakdown().await?)
    }

    /// One page of stored payments, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects a read.
    pub async fn transactions(
        &self,
        address: Option<&str>,
        page: u64,
        limit: u64,
        search: Option<&str>,
    ) -> Result<TransactionPage, FluxRevenueError> {
        Ok(self
            .aggregator
            .transactions(address, page, limit, search)
            .await?)
    }

    /// Collect a network statistics snapshot pair and record it, unless one
    /// was already recorded within the last hour. The snapshot cadence is
    /// driven by an external scheduler; this is the entry point it calls.
    ///
    /// # Errors
    ///
    /// Returns an error if collection times out or the store rejects the
    /// write.
    pub async fn collect_network_stats(
        &self,
    ) -> Result<(NodeStatsSnapshot, UtilizationSnapshot), FluxRevenueError> {
        Ok(self.stats.collect_and_store(&self.store).await?)
    }

    /// Fleet composition snapshots taken at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects a read.
    pub async fn node_stats_since(
        &self,
        since: i64,
    ) -> Result<Vec<NodeStatsSnapshot>, FluxRevenueError> {
        Ok(self.store.node_stats_since(since).await?)
    }

    /// Resource utilization snapshots taken at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects a read.
    pub async fn utilization_stats_since(
        &self,
        since: i64,
    ) -> Result<Vec<UtilizationSnapshot>, FluxRevenueError> {
        Ok(self.store.utilization_stats_since(since).await?)
    }

    /// Returns URL of the configured daemon.
    #[must_use]
    pub fn daemon_url(&self) -> String {
        self.client.url()
    }
}

/// A builder for the revenue indexer. Used to configure the daemon, the
/// watched addresses, sync cadence, tuning, and so on.
///
/// # Examples
///
/// ```no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use fluxrevenue::{storage::stores::Sqlite, RevenueIndexerBuilder};
///
/// let store = Sqlite::new("fluxrevenue.db")?;
/// let indexer = RevenueIndexerBuilder::new(
///     vec!["t1NodeOperator".to_string()],
///     store,
/// )
/// .daemon_url("http://127.0.0.1:16127".to_string())
/// .build()
/// .await?;
///
/// indexer.run().await?;
/// #   Ok(())
/// # }
/// ```
pub struct RevenueIndexerBuilder<S> {
    addresses: Vec<String>,
    store: S,
    daemon_url: String,
    stats_url: String,
    rpc_timeout: Duration,
    connection_timeout: Duration,
    collection_timeout: Duration,
    sync_interval: Duration,
    tuning: SyncTuning,
    block_cache_size: usize,
    sender_cache_size: usize,
}

impl<S: Storage + 'static> RevenueIndexerBuilder<S> {
    /// Create a new revenue indexer builder watching the given addresses.
    #[must_use]
    pub fn new(addresses: Vec<String>, store: S) -> RevenueIndexerBuilder<S> {
        RevenueIndexerBuilder {
            addresses,
            store,
            daemon_url: DEFAULT_DAEMON.to_string(),
            stats_url: DEFAULT_STATS_HOST.to_string(),
            rpc_timeout: DEFAULT_RPC_TOTAL_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            collection_timeout: DEFAULT_COLLECTION_TIMEOUT,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            tuning: SyncTuning::default(),
            block_cache_size: DEFAULT_BLOCK_CACHE_SIZE,
            sender_cache_size: DEFAULT_SENDER_CACHE_SIZE,
        }
    }

    /// Create a builder with every knob taken from configuration.
    #[must_use]
    pub fn from_config(config: &Config, store: S) -> RevenueIndexerBuilder<S> {
        RevenueIndexerBuilder {
            addresses: config.addresses.clone(),
            store,
            daemon_url: config.daemon.url.to_string(),
            stats_url: config.daemon.stats_url.to_string(),
            rpc_timeout: config.daemon.rpc_timeout,
            connection_timeout: config.daemon.connection_timeout,
            collection_timeout: config.daemon.collection_timeout,
            sync_interval: config.sync.interval,
            tuning: SyncTuning {
                blocks_per_day: config.sync.blocks_per_day,
                retention_days: config.sync.retention_days,
                max_blocks_per_sync: config.sync.max_blocks_per_sync,
                batch_size: config.sync.batch_size,
                max_concurrent: config.daemon.max_concurrent,
                request_delay: config.daemon.request_delay,
                gap_check_threshold: config.sync.gap_check_threshold,
                ..SyncTuning::default()
            },
            block_cache_size: config.daemon.block_cache_size,
            sender_cache_size: config.daemon.sender_cache_size,
        }
    }

    /// Set the url and port of your preferred Flux daemon. Defaults to the
    /// public API gateway.
    #[must_use]
    pub fn daemon_url(mut self, url: String) -> RevenueIndexerBuilder<S> {
        self.daemon_url = url;
        self
    }

    /// Set the url of the network statistics host.
    #[must_use]
    pub fn stats_url(mut self, url: String) -> RevenueIndexerBuilder<S> {
        self.stats_url = url;
        self
    }

    /// Time before an API call times out. Defaults to 10 seconds.
    #[must_use]
    pub fn rpc_timeout(mut self, timeout: Duration) -> RevenueIndexerBuilder<S> {
        self.rpc_timeout = timeout;
        self
    }

    /// Time before an API call times out while failing to connect. Defaults
    /// to 5 seconds.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> RevenueIndexerBuilder<S> {
        self.connection_timeout = timeout;
        self
    }

    /// Outer deadline for one network statistics collection. Defaults to 60
    /// seconds.
    #[must_use]
    pub fn collection_timeout(mut self, timeout: Duration) -> RevenueIndexerBuilder<S> {
        self.collection_timeout = timeout;
        self
    }

    /// Set the minimum time between sync cycles. While the index is behind,
    /// cycles run back to back regardless. Defaults to 2 minutes.
    #[must_use]
    pub fn sync_interval(mut self, interval: Duration) -> RevenueIndexerBuilder<S> {
        self.sync_interval = interval;
        self
    }

    /// Set the sync tuning: budget, batch size, concurrency, retention.
    #[must_use]
    pub fn tuning(mut self, tuning: SyncTuning) -> RevenueIndexerBuilder<S> {
        self.tuning = tuning;
        self
    }

    /// Block bodies kept in the client cache. Defaults to 64.
    #[must_use]
    pub fn block_cache_size(mut self, size: usize) -> RevenueIndexerBuilder<S> {
        self.block_cache_size = size;
        self
    }

    /// Resolved senders kept in the client cache. Defaults to 10,000.
    #[must_use]
    pub fn sender_cache_size(mut self, size: usize) -> RevenueIndexerBuilder<S> {
        self.sender_cache_size = size;
        self
    }

    /// Build the revenue indexer.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon or stats URL cannot be parsed.
    pub async fn build(self) -> Result<RevenueIndexer<S>, FluxRevenueError> {
        let daemon_url = parse_uri(&self.daemon_url)?;
        let stats_url = parse_uri(&self.stats_url)?;
        let client = RpcClient::new(
            daemon_url,
            stats_url,
            self.rpc_timeout,
            self.connection_timeout,
            self.block_cache_size,
            self.sender_cache_size,
        );
        Ok(self.build_with_client(client).await)
    }

    /// Build a revenue indexer with a mocked daemon client for testing
    /// purposes. The returned [`MockClient`] handle shares the canned chain
    /// with the indexer.
    pub async fn build_with_mock_daemon(self) -> (RevenueIndexer<S, MockClient>, MockClient) {
        let client = MockClient::new();
        let indexer = self.build_with_client(client.clone()).await;
        (indexer, client)
    }

    /// Build the revenue indexer on top of any [`Client`] implementation.
    pub async fn build_with_client<C: Client + 'static>(
        self,
        client: C,
    ) -> RevenueIndexer<S, C> {
        let store = StorageClient::new(self.store);
        let publisher = Arc::new(Publisher::new());

        let watched: HashSet<String> = self.addresses.iter().cloned().collect();
        let engine = Arc::new(SyncEngine::new(
            client.clone(),
            store.clone(),
            watched,
            self.tuning,
            publisher.clone(),
        ));
        let aggregator = Aggregator::new(store.clone(), self.addresses.clone());
        let stats = StatsCollector::new(client.clone(), self.collection_timeout);

        let (command_sender, command_receiver) = channel(4);

        RevenueIndexer(Arc::new(RevenueIndexerInner {
            client,
            store,
            engine,
            aggregator,
            stats,
            sync_interval: self.sync_interval,
            publisher,
            loop_handle: AsyncMutex::new(None),
            command_sender,
            command_receiver: Arc::new(AsyncMutex::new(command_receiver)),
        }))
    }
}

fn parse_uri(input: &str) -> Result<Uri, FluxRevenueError> {
    input.parse::<Uri>().map_err(|e| FluxRevenueError::Parse {
        datatype: "Uri",
        input: input.to_string(),
        error: e.to_string(),
    })
}

/// Enumeration of possible indexer states.
#[derive(Debug)]
pub enum IndexerStatus {
    /// The sync loop is running.
    Running,
    /// The sync loop is not running.
    NotRunning,
    /// The sync loop encountered an error and had to stop.
    Error(FluxRevenueError),
}

pub(crate) struct LoopHandle(JoinHandle<()>);

impl LoopHandle {
    pub(crate) async fn join(self) -> Result<(), JoinError> {
        self.0.await
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl From<JoinHandle<()>> for LoopHandle {
    fn from(inner: JoinHandle<()>) -> Self {
        LoopHandle(inner)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub(crate) enum MessageToLoop {
    Stop,
}
