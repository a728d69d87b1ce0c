//! `fluxrevenue` can use a storage layer of your choosing. Consumers of this
//! library can use one of the existing storage layers found in [`stores`], or
//! can implement the [`Storage`] trait themselves for a custom storage
//! solution.

mod block_storage;
mod stats_storage;
pub mod stores;
mod transaction_storage;

pub use block_storage::BlockStorage;
use log::error;
pub use stats_storage::StatsStorage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
pub use transaction_storage::{
    DailyRevenue, RangeRevenue, RevenueTotal, TransactionFilter, TransactionStorage,
};

use crate::stats::{NodeStatsSnapshot, UtilizationSnapshot};

/// A stored block row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    /// Block height, the primary identifier.
    pub height: u64,
    /// Block hash, hex-encoded.
    pub hash: String,
    /// Block timestamp, seconds since epoch.
    pub timestamp: i64,
    /// Wall-clock seconds at which the row was inserted.
    pub synced_at: i64,
}

/// A stored payment row. The `(tx_hash, vout_index, address)` triple is
/// unique; re-inserting an existing triple is a no-op.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTransaction {
    /// Height of the containing block.
    pub block_height: u64,
    /// Chain-assigned transaction identifier.
    pub tx_hash: String,
    /// Index of the paying output within the transaction.
    pub vout_index: u32,
    /// Watched recipient address.
    pub address: String,
    /// Resolved sender address, or `None` while unresolved.
    pub from_address: Option<String>,
    /// Amount received, in whole coins.
    pub value: f64,
    /// Timestamp copied from the containing block.
    pub timestamp: i64,
}

/// The stored frontier: how many blocks are stored and the extremes of the
/// synced height range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Frontier {
    /// Number of stored block rows.
    pub count: u64,
    /// Highest stored height, if any blocks are stored.
    pub highest: Option<u64>,
    /// Lowest stored height, if any blocks are stored.
    pub lowest: Option<u64>,
}

/// The outcome of an atomic batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Block rows actually inserted.
    pub blocks_inserted: u64,
    /// Payment rows actually inserted.
    pub transactions_inserted: u64,
    /// Rows skipped because they already existed.
    pub duplicates_skipped: u64,
}

/// A supertrait of all necessary storage traits, plus the multi-row
/// operations that must execute atomically.
pub trait Storage: BlockStorage + TransactionStorage + StatsStorage {
    /// Error type for the storage layer.
    type Error: std::error::Error + Send + 'static;

    /// Insert blocks and payment rows as one atomic unit: either every row is
    /// durable afterwards, or none are. Rows that already exist are silently
    /// skipped and counted in the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be committed; no rows from the
    /// batch are durable in that case.
    fn batch_insert(
        &mut self,
        blocks: Vec<StoredBlock>,
        transactions: Vec<StoredTransaction>,
    ) -> Result<BatchOutcome, <Self as Storage>::Error>;

    /// Retention sweep: delete payment rows, then block rows, whose timestamp
    /// is strictly below `cutoff`. Transactions go first because they
    /// reference block heights; the reference is advisory, not enforced.
    ///
    /// # Errors
    ///
    /// Returns an error if the sweep could not be performed.
    fn prune_below(&mut self, cutoff: i64) -> Result<(u64, u64), <Self as Storage>::Error>;

    /// Flush all changes to disk. This method should be manually implemented
    /// for any storage layer that does not automatically flush on write. The
    /// default implementation does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if flush does not succeed.
    fn flush(&self) -> Result<(), <Self as Storage>::Error> {
        Ok(())
    }
}

/// The storage manager takes messages from a channel and runs the
/// corresponding storage method. This allows the blocking IO to be performed
/// on a dedicated task, and serializes all writes.
struct Manager<S: Storage> {
    store: S,
    receiver: mpsc::Receiver<Method<S>>,
}

impl<S: Storage> Manager<S> {
    #[allow(clippy::too_many_lines)]
    fn handle(&mut self, message: Method<S>) {
        match message {
            Method::BatchInsert {
                blocks,
                transactions,
                response,
            } => {
                let result = Storage::batch_insert(&mut self.store, blocks, transactions);
                if response.send(result).is_err() {
                    error!("Failed to send BatchInsert response to storage client.");
                }
            }
            Method::PruneBelow { cutoff, response } => {
                let result = Storage::prune_below(&mut self.store, cutoff);
                if response.send(result).is_err() {
                    error!("Failed to send PruneBelow response to storage client.");
                }
            }
            Method::Flush(response) => {
                if response.send(self.store.flush()).is_err() {
                    error!("Failed to send Flush response to storage client.");
                }
            }

            Method::Frontier(response) => {
                if response.send(self.store.frontier()).is_err() {
                    error!("Failed to send Frontier response to storage client.");
                }
            }
            Method::HeightsInRange {
                start,
                end,
                response,
            } => {
                if response
                    .send(self.store.heights_in_range(start, end))
                    .is_err()
                {
                    error!("Failed to send HeightsInRange response to storage client.");
                }
            }
            Method::BlockTimestamp { height, response } => {
                if response.send(self.store.block_timestamp(height)).is_err() {
                    error!("Failed to send BlockTimestamp response to storage client.");
                }
            }

            Method::SetSender {
                tx_hash,
                block_height,
                vout_index,
                sender,
                response,
            } => {
                let result =
                    self.store
                        .set_sender(&tx_hash, block_height, vout_index, &sender);
                if response.send(result).is_err() {
                    error!("Failed to send SetSender response to storage client.");
                }
            }
            Method::UnresolvedSenders { limit, response } => {
                if response.send(self.store.unresolved_senders(limit)).is_err() {
                    error!("Failed to send UnresolvedSenders response to storage client.");
                }
            }
            Method::DailyRevenue {
                address,
                since,
                response,
            } => {
                if response
                    .send(self.store.daily_revenue(&address, since))
                    .is_err()
                {
                    error!("Failed to send DailyRevenue response to storage client.");
                }
            }
            Method::TotalRevenue { address, response } => {
                if response.send(self.store.total_revenue(&address)).is_err() {
                    error!("Failed to send TotalRevenue response to storage client.");
                }
            }
            Method::RangeRevenue {
                address,
                start,
                end,
                response,
            } => {
                if response
                    .send(self.store.revenue_in_block_range(&address, start, end))
                    .is_err()
                {
                    error!("Failed to send RangeRevenue response to storage client.");
                }
            }
            Method::TransactionPage { filter, response } => {
                if response.send(self.store.transaction_page(&filter)).is_err() {
                    error!("Failed to send TransactionPage response to storage client.");
                }
            }
            Method::InsertNodeStats { snapshot, response } => {
                if response.send(self.store.insert_node_stats(snapshot)).is_err() {
                    error!("Failed to send InsertNodeStats response to storage client.");
                }
            }
            Method::InsertUtilizationStats { snapshot, response } => {
                if response
                    .send(self.store.insert_utilization_stats(snapshot))
                    .is_err()
                {
                    error!("Failed to send InsertUtilizationStats response to storage client.");
                }
            }
            Method::NodeStatsSince { since, response } => {
                if response.send(self.store.node_stats_since(since)).is_err() {
                    error!("Failed to send NodeStatsSince response to storage client.");
                }
            }
            Method::UtilizationStatsSince { since, response } => {
                if response
                    .send(self.store.utilization_stats_since(since))
                    .is_err()
                {
                    error!("Failed to send UtilizationStatsSince response to storage client.");
                }
            }
            Method::HasNodeStatsWithin {
                timestamp,
                tolerance,
                response,
            } => {
                if response
                    .send(self.store.has_node_stats_within(timestamp, tolerance))
                    .is_err()
                {
                    error!("Failed to send HasNodeStatsWithin response to storage client.");
                }
            }
            Method::HasUtilizationStatsWithin {
                timestamp,
                tolerance,
                response,
            } => {
                if response
                    .send(
                        self.store
                            .has_utilization_stats_within(timestamp, tolerance),
                    )
                    .is_err()
                {
                    error!("Failed to send HasUtilizationStatsWithin response to storage client.");
                }
            }
        }
    }
}

enum Method<S: Storage> {
    BatchInsert {
        blocks: Vec<StoredBlock>,
        transactions: Vec<StoredTransaction>,
        response: oneshot::Sender<Result<BatchOutcome, <S as Storage>::Error>>,
    },
    PruneBelow {
        cutoff: i64,
        response: oneshot::Sender<Result<(u64, u64), <S as Storage>::Error>>,
    },
    Flush(oneshot::Sender<Result<(), <S as Storage>::Error>>),
    Frontier(oneshot::Sender<Result<Frontier, <S as BlockStorage>::Error>>),
    HeightsInRange {
        start: u64,
        end: u64,
        response: oneshot::Sender<Result<Vec<u64>, <S as BlockStorage>::Error>>,
    },
    BlockTimestamp {
        height: u64,
        response: oneshot::Sender<Result<Option<i64>, <S as BlockStorage>::Error>>,
    },
    SetSender {
        tx_hash: String,
        block_height: u64,
        vout_index: u32,
        sender: String,
        response: oneshot::Sender<Result<bool, <S as TransactionStorage>::Error>>,
    },
    UnresolvedSenders {
        limit: u64,
        response:
            oneshot::Sender<Result<Vec<StoredTransaction>, <S as TransactionStorage>::Error>>,
    },
    DailyRevenue {
        address: String,
        since: i64,
        response: oneshot::Sender<Result<Vec<DailyRevenue>, <S as TransactionStorage>::Error>>,
    },
    TotalRevenue {
        address: String,
        response: oneshot::Sender<Result<RevenueTotal, <S as TransactionStorage>::Error>>,
    },
    RangeRevenue {
        address: String,
        start: u64,
        end: u64,
        response: oneshot::Sender<Result<RangeRevenue, <S as TransactionStorage>::Error>>,
    },
    TransactionPage {
        filter: TransactionFilter,
        response: oneshot::Sender<
            Result<(Vec<StoredTransaction>, u64), <S as TransactionStorage>::Error>,
        >,
    },
    InsertNodeStats {
        snapshot: NodeStatsSnapshot,
        response: oneshot::Sender<Result<(), <S as StatsStorage>::Error>>,
    },
    InsertUtilizationStats {
        snapshot: UtilizationSnapshot,
        response: oneshot::Sender<Result<(), <S as StatsStorage>::Error>>,
    },
    NodeStatsSince {
        since: i64,
        response: oneshot::Sender<Result<Vec<NodeStatsSnapshot>, <S as StatsStorage>::Error>>,
    },
    UtilizationStatsSince {
        since: i64,
        response:
            oneshot::Sender<Result<Vec<UtilizationSnapshot>, <S as StatsStorage>::Error>>,
    },
    HasNodeStatsWithin {
        timestamp: i64,
        tolerance: i64,
        response: oneshot::Sender<Result<bool, <S as StatsStorage>::Error>>,
    },
    HasUtilizationStatsWithin {
        timestamp: i64,
        tolerance: i64,
        response: oneshot::Sender<Result<bool, <S as StatsStorage>::Error>>,
    },
}

pub(crate) struct Client<S: Storage>(mpsc::Sender<Method<S>>);

impl<S: Storage + 'static> Client<S> {
    pub(crate) fn new(store: S) -> Self {
        let (sender, receiver) = mpsc::channel(64);
        let mut manager = Manager { store, receiver };

        tokio::spawn(async move {
            while let Some(message) = manager.receiver.recv().await {
                manager.handle(message);
            }
        });

        Self(sender)
    }

    async fn call<R>(
        &self,
        method: Method<S>,
        receiver: oneshot::Receiver<Result<R, impl std::error::Error + Send + 'static>>,
    ) -> Result<R, StorageError> {
        self.0
            .send(method)
            .await
            .map_err(|e| StorageError::Send(Box::new(e)))?;
        let response = receiver.await.map_err(|_| StorageError::Receive)?;
        response.map_err(|e| StorageError::Internal(Box::new(e)))
    }

    pub(crate) async fn batch_insert(
        &self,
        blocks: Vec<StoredBlock>,
        transactions: Vec<StoredTransaction>,
    ) -> Result<BatchOutcome, StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::BatchInsert {
                blocks,
                transactions,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn prune_below(&self, cutoff: i64) -> Result<(u64, u64), StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::PruneBelow {
                cutoff,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn flush(&self) -> Result<(), StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(Method::Flush(sender), receiver).await
    }

    pub(crate) async fn frontier(&self) -> Result<Frontier, StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(Method::Frontier(sender), receiver).await
    }

    pub(crate) async fn heights_in_range(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Vec<u64>, StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::HeightsInRange {
                start,
                end,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn block_timestamp(&self, height: u64) -> Result<Option<i64>, StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::BlockTimestamp {
                height,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn set_sender(
        &self,
        tx_hash: String,
        block_height: u64,
        vout_index: u32,
        sender_address: String,
    ) -> Result<bool, StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::SetSender {
                tx_hash,
                block_height,
                vout_index,
                sender: sender_address,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn unresolved_senders(
        &self,
        limit: u64,
    ) -> Result<Vec<StoredTransaction>, StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::UnresolvedSenders {
                limit,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn daily_revenue(
        &self,
        address: String,
        since: i64,
    ) -> Result<Vec<DailyRevenue>, StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::DailyRevenue {
                address,
                since,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn total_revenue(&self, address: String) -> Result<RevenueTotal, StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::TotalRevenue {
                address,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn revenue_in_block_range(
        &self,
        address: String,
        start: u64,
        end: u64,
    ) -> Result<RangeRevenue, StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::RangeRevenue {
                address,
                start,
                end,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn transaction_page(
        &self,
        filter: TransactionFilter,
    ) -> Result<(Vec<StoredTransaction>, u64), StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::TransactionPage {
                filter,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn insert_node_stats(
        &self,
        snapshot: NodeStatsSnapshot,
    ) -> Result<(), StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::InsertNodeStats {
                snapshot,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn insert_utilization_stats(
        &self,
        snapshot: UtilizationSnapshot,
    ) -> Result<(), StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::InsertUtilizationStats {
                snapshot,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn node_stats_since(
        &self,
        since: i64,
    ) -> Result<Vec<NodeStatsSnapshot>, StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::NodeStatsSince {
                since,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn utilization_stats_since(
        &self,
        since: i64,
    ) -> Result<Vec<UtilizationSnapshot>, StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::UtilizationStatsSince {
                since,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn has_node_stats_within(
        &self,
        timestamp: i64,
        tolerance: i64,
    ) -> Result<bool, StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::HasNodeStatsWithin {
                timestamp,
                tolerance,
                response: sender,
            },
            receiver,
        )
        .await
    }

    pub(crate) async fn has_utilization_stats_within(
        &self,
        timestamp: i64,
        tolerance: i64,
    ) -> Result<bool, StorageError> {
        let (sender, receiver) = oneshot::channel();
        self.call(
            Method::HasUtilizationStatsWithin {
                timestamp,
                tolerance,
                response: sender,
            },
            receiver,
        )
        .await
    }
}

impl<S: Storage> Clone for Client<S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// An error occurring while storing or retrieving values from a database.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to send message to the storage manager.
    #[error("failed to send message to the storage manager: {0}")]
    Send(Box<dyn std::error::Error + Send>),
    /// Failed to receive result from the storage manager.
    #[error("failed to receive result from the storage manager")]
    Receive,
    /// An error caused by the database, or some interaction with it.
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send>),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod test {
    use std::fmt::Debug;

    use test_case::test_case;

    use super::{
        stores::{InMemory, Sqlite},
        BlockStorage, Frontier, StatsStorage, Storage, StoredBlock, StoredTransaction,
        TransactionFilter, TransactionStorage,
    };
    use crate::stats::{DataSource, NodeStatsSnapshot};

    fn block(height: u64, timestamp: i64) -> StoredBlock {
        StoredBlock {
            height,
            hash: format!("hash{height}"),
            timestamp,
            synced_at: 1_700_100_000,
        }
    }

    fn transaction(
        height: u64,
        timestamp: i64,
        tx_hash: &str,
        vout_index: u32,
        address: &str,
        value: f64,
    ) -> StoredTransaction {
        StoredTransaction {
            block_height: height,
            tx_hash: tx_hash.to_string(),
            vout_index,
            address: address.to_string(),
            from_address: None,
            value,
            timestamp,
        }
    }

    fn node_snapshot(timestamp: i64) -> NodeStatsSnapshot {
        NodeStatsSnapshot {
            timestamp,
            cumulus: 5,
            nimbus: 3,
            stratus: 1,
            arcane: 2,
            total: 9,
            data_source: DataSource::Api,
            api_success_rate: 100.0,
            note: None,
        }
    }

    #[test_case(InMemory::new(); "in-memory")]
    #[test_case(Sqlite::new(":memory:").unwrap(); "sqlite")]
    fn batch_insert_is_idempotent<S>(mut store: S)
    where
        S: Storage + 'static,
        <S as Storage>::Error: Debug,
        <S as BlockStorage>::Error: Debug,
        <S as TransactionStorage>::Error: Debug,
    {
        let blocks = vec![block(10, 1_000), block(11, 1_120)];
        let transactions = vec![transaction(10, 1_000, "tx1", 0, "addr", 1.5)];

        let first = store
            .batch_insert(blocks.clone(), transactions.clone())
            .unwrap();
        assert_eq!(first.blocks_inserted, 2);
        assert_eq!(first.transactions_inserted, 1);
        assert_eq!(first.duplicates_skipped, 0);

        let second = store.batch_insert(blocks, transactions).unwrap();
        assert_eq!(second.blocks_inserted, 0);
        assert_eq!(second.transactions_inserted, 0);
        assert_eq!(second.duplicates_skipped, 3);

        assert_eq!(store.frontier().unwrap().count, 2);
        assert_eq!(store.transaction_count().unwrap(), 1);
    }

    #[test_case(InMemory::new(); "in-memory")]
    #[test_case(Sqlite::new(":memory:").unwrap(); "sqlite")]
    fn duplicate_triple_with_different_height_is_skipped<S>(mut store: S)
    where
        S: Storage + 'static,
        <S as Storage>::Error: Debug,
        <S as TransactionStorage>::Error: Debug,
    {
        let mut first = transaction(10, 1_000, "tx1", 0, "addr", 1.5);
        store.insert_transaction(first.clone()).unwrap();

        // Same (tx_hash, vout_index, address) triple, different block.
        first.block_height = 99;
        assert!(!store.insert_transaction(first).unwrap());
        assert_eq!(store.transaction_count().unwrap(), 1);
    }

    #[test_case(InMemory::new(); "in-memory")]
    #[test_case(Sqlite::new(":memory:").unwrap(); "sqlite")]
    fn frontier_tracks_extremes<S>(mut store: S)
    where
        S: Storage + 'static,
        <S as Storage>::Error: Debug,
        <S as BlockStorage>::Error: Debug,
    {
        assert_eq!(store.frontier().unwrap(), Frontier::default());

        store
            .batch_insert(
                vec![block(50, 1_000), block(10, 500), block(99, 2_000)],
                Vec::new(),
            )
            .unwrap();

        let frontier = store.frontier().unwrap();
        assert_eq!(frontier.count, 3);
        assert_eq!(frontier.highest, Some(99));
        assert_eq!(frontier.lowest, Some(10));

        assert_eq!(store.heights_in_range(10, 50).unwrap(), vec![10, 50]);
        assert_eq!(store.block_timestamp(50).unwrap(), Some(1_000));
        assert_eq!(store.block_timestamp(51).unwrap(), None);
    }

    #[test_case(InMemory::new(); "in-memory")]
    #[test_case(Sqlite::new(":memory:").unwrap(); "sqlite")]
    fn daily_revenue_sums_match_total<S>(mut store: S)
    where
        S: Storage + 'static,
        <S as Storage>::Error: Debug,
        <S as TransactionStorage>::Error: Debug,
    {
        let day = 86_400;
        store
            .batch_insert(
                Vec::new(),
                vec![
                    transaction(10, day, "tx1", 0, "addr", 1.5),
                    transaction(11, day + 60, "tx2", 0, "addr", 2.0),
                    transaction(12, 3 * day, "tx3", 0, "addr", 0.5),
                    transaction(12, 3 * day, "tx3", 1, "other", 9.0),
                ],
            )
            .unwrap();

        let daily = store.daily_revenue("addr", 0).unwrap();
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].count, 2);
        assert!((daily[0].total - 3.5).abs() < 1e-9);
        assert!(daily.windows(2).all(|pair| pair[0].date < pair[1].date));

        let total = store.total_revenue("addr").unwrap();
        assert_eq!(total.count, 3);
        assert!((total.total - 4.0).abs() < 1e-9);
        assert_eq!(total.first_timestamp, Some(day));
        assert_eq!(total.last_timestamp, Some(3 * day));

        let daily_sum: f64 = daily.iter().map(|d| d.total).sum();
        assert!((daily_sum - total.total).abs() < 1e-9);

        // A later cutoff narrows the series.
        let recent = store.daily_revenue("addr", 2 * day).unwrap();
        assert_eq!(recent.len(), 1);
        assert!((recent[0].total - 0.5).abs() < 1e-9);
    }

    #[test_case(InMemory::new(); "in-memory")]
    #[test_case(Sqlite::new(":memory:").unwrap(); "sqlite")]
    fn revenue_in_block_range_is_inclusive<S>(mut store: S)
    where
        S: Storage + 'static,
        <S as Storage>::Error: Debug,
        <S as TransactionStorage>::Error: Debug,
    {
        store
            .batch_insert(
                Vec::new(),
                vec![
                    transaction(10, 1_000, "tx1", 0, "addr", 1.0),
                    transaction(20, 2_000, "tx2", 0, "addr", 2.0),
                    transaction(30, 3_000, "tx3", 0, "addr", 4.0),
                ],
            )
            .unwrap();

        let range = store.revenue_in_block_range("addr", 10, 20).unwrap();
        assert_eq!(range.count, 2);
        assert!((range.total - 3.0).abs() < 1e-9);

        let empty = store.revenue_in_block_range("addr", 40, 50).unwrap();
        assert_eq!(empty.count, 0);
        assert!((empty.total).abs() < 1e-9);
    }

    #[test_case(InMemory::new(); "in-memory")]
    #[test_case(Sqlite::new(":memory:").unwrap(); "sqlite")]
    fn transaction_page_filters_and_paginates<S>(mut store: S)
    where
        S: Storage + 'static,
        <S as Storage>::Error: Debug,
        <S as TransactionStorage>::Error: Debug,
    {
        let mut rows = vec![
            transaction(10, 1_000, "aaa111", 0, "addr", 1.0),
            transaction(20, 2_000, "bbb222", 0, "addr", 2.5),
            transaction(30, 3_000, "ccc333", 0, "other", 4.0),
        ];
        rows[2].from_address = Some("tSENDER".to_string());
        store.batch_insert(Vec::new(), rows).unwrap();

        // Newest first, paginated.
        let (page, total) = store
            .transaction_page(&TransactionFilter {
                limit: 2,
                ..TransactionFilter::default()
            })
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].tx_hash, "ccc333");

        let (page, total) = store
            .transaction_page(&TransactionFilter {
                offset: 2,
                limit: 2,
                ..TransactionFilter::default()
            })
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);

        // By address.
        let (page, total) = store
            .transaction_page(&TransactionFilter {
                address: Some("addr".to_string()),
                limit: 10,
                ..TransactionFilter::default()
            })
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 2);

        // Substring search on hash, sender, and stringified value.
        for (needle, expected) in [("bbb", 1), ("tSENDER", 1), ("2.5", 1), ("zzz", 0)] {
            let (_, total) = store
                .transaction_page(&TransactionFilter {
                    search: Some(needle.to_string()),
                    limit: 10,
                    ..TransactionFilter::default()
                })
                .unwrap();
            assert_eq!(total, expected, "search for {needle}");
        }
    }

    #[test_case(InMemory::new(); "in-memory")]
    #[test_case(Sqlite::new(":memory:").unwrap(); "sqlite")]
    fn set_sender_targets_unresolved_rows<S>(mut store: S)
    where
        S: Storage + 'static,
        <S as Storage>::Error: Debug,
        <S as TransactionStorage>::Error: Debug,
    {
        store
            .batch_insert(
                Vec::new(),
                vec![
                    transaction(10, 1_000, "tx1", 0, "addr", 1.0),
                    transaction(20, 2_000, "tx2", 1, "addr", 2.0),
                ],
            )
            .unwrap();

        let unresolved = store.unresolved_senders(10).unwrap();
        assert_eq!(unresolved.len(), 2);
        // Newest first.
        assert_eq!(unresolved[0].block_height, 20);

        assert!(store.set_sender("tx2", 20, 1, "tFROM").unwrap());
        assert!(!store.set_sender("missing", 20, 1, "tFROM").unwrap());

        let unresolved = store.unresolved_senders(10).unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].tx_hash, "tx1");
    }

    #[test_case(InMemory::new(); "in-memory")]
    #[test_case(Sqlite::new(":memory:").unwrap(); "sqlite")]
    fn prune_removes_only_expired_rows<S>(mut store: S)
    where
        S: Storage + 'static,
        <S as Storage>::Error: Debug,
        <S as BlockStorage>::Error: Debug,
        <S as TransactionStorage>::Error: Debug,
    {
        store
            .batch_insert(
                vec![block(10, 1_000), block(20, 2_000), block(30, 3_000)],
                vec![
                    transaction(10, 1_000, "tx1", 0, "addr", 1.0),
                    transaction(30, 3_000, "tx3", 0, "addr", 3.0),
                ],
            )
            .unwrap();

        let (transactions, blocks) = store.prune_below(2_000).unwrap();
        assert_eq!(transactions, 1);
        assert_eq!(blocks, 1);

        // The boundary row (timestamp == cutoff) survives.
        let frontier = store.frontier().unwrap();
        assert_eq!(frontier.lowest, Some(20));
        assert_eq!(store.transaction_count().unwrap(), 1);
    }

    #[test_case(InMemory::new(); "in-memory")]
    #[test_case(Sqlite::new(":memory:").unwrap(); "sqlite")]
    fn stats_snapshots_round_trip_with_tolerance<S>(mut store: S)
    where
        S: Storage + 'static,
        <S as StatsStorage>::Error: Debug,
    {
        assert!(!store.has_node_stats_within(5_000, 3_600).unwrap());

        store.insert_node_stats(node_snapshot(5_000)).unwrap();
        assert!(store.has_node_stats_within(5_000, 3_600).unwrap());
        assert!(store.has_node_stats_within(8_000, 3_600).unwrap());
        assert!(!store.has_node_stats_within(9_000, 3_600).unwrap());

        let snapshots = store.node_stats_since(0).unwrap();
        assert_eq!(snapshots, vec![node_snapshot(5_000)]);
        assert!(store.node_stats_since(6_000).unwrap().is_empty());
    }
}
