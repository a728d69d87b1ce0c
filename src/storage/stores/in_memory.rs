use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    stats::{NodeStatsSnapshot, UtilizationSnapshot},
    storage::{
        BatchOutcome, BlockStorage, DailyRevenue, Frontier, RangeRevenue, RevenueTotal,
        StatsStorage, Storage, StoredBlock, StoredTransaction, TransactionFilter,
        TransactionStorage,
    },
};

/// In-memory store. Note that indexed data stored in memory will not be
/// recoverable on power loss; this store exists for testing and ephemeral
/// deployments.
pub struct InMemory {
    blocks: BTreeMap<u64, StoredBlock>,
    transactions: BTreeMap<(String, u32, String), StoredTransaction>,
    node_stats: BTreeMap<i64, NodeStatsSnapshot>,
    utilization_stats: BTreeMap<i64, UtilizationSnapshot>,
}

impl InMemory {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> InMemory {
        InMemory {
            blocks: BTreeMap::new(),
            transactions: BTreeMap::new(),
            node_stats: BTreeMap::new(),
            utilization_stats: BTreeMap::new(),
        }
    }
}

impl Default for InMemory {
    fn default() -> Self {
        Self::new()
    }
}

fn transaction_key(transaction: &StoredTransaction) -> (String, u32, String) {
    (
        transaction.tx_hash.clone(),
        transaction.vout_index,
        transaction.address.clone(),
    )
}

fn calendar_day(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map_or_else(|| "invalid-date".to_string(), |dt| dt.date_naive().to_string())
}

impl BlockStorage for InMemory {
    type Error = InMemoryStorageError;

    fn insert_block(&mut self, block: StoredBlock) -> Result<bool, Self::Error> {
        if self.blocks.contains_key(&block.height) {
            return Ok(false);
        }
        self.blocks.insert(block.height, block);
        Ok(true)
    }

    fn frontier(&self) -> Result<Frontier, Self::Error> {
        Ok(Frontier {
            count: self.blocks.len() as u64,
            highest: self.blocks.keys().next_back().copied(),
            lowest: self.blocks.keys().next().copied(),
        })
    }

    fn heights_in_range(&self, start: u64, end: u64) -> Result<Vec<u64>, Self::Error> {
        Ok(self.blocks.range(start..=end).map(|(height, _)| *height).collect())
    }

    fn block_timestamp(&self, height: u64) -> Result<Option<i64>, Self::Error> {
        Ok(self.blocks.get(&height).map(|block| block.timestamp))
    }

    fn prune_blocks_below(&mut self, cutoff: i64) -> Result<u64, Self::Error> {
        let before = self.blocks.len();
        self.blocks.retain(|_, block| block.timestamp >= cutoff);
        Ok((before - self.blocks.len()) as u64)
    }
}

impl TransactionStorage for InMemory {
    type Error = InMemoryStorageError;

    fn insert_transaction(
        &mut self,
        transaction: StoredTransaction,
    ) -> Result<bool, Self::Error> {
        let key = transaction_key(&transaction);
        if self.transactions.contains_key(&key) {
            return Ok(false);
        }
        self.transactions.insert(key, transaction);
        Ok(true)
    }

    fn set_sender(
        &mut self,
        tx_hash: &str,
        block_height: u64,
        vout_index: u32,
        sender: &str,
    ) -> Result<bool, Self::Error> {
        let mut updated = false;
        for transaction in self.transactions.values_mut() {
            if transaction.tx_hash == tx_hash
                && transaction.block_height == block_height
                && transaction.vout_index == vout_index
            {
                transaction.from_address = Some(sender.to_string());
                updated = true;
            }
        }
        Ok(updated)
    }

    fn unresolved_senders(&self, limit: u64) -> Result<Vec<StoredTransaction>, Self::Error> {
        let mut rows: Vec<StoredTransaction> = self
            .transactions
            .values()
            .filter(|transaction| transaction.from_address.is_none())
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.block_height.cmp(&a.block_height));
        rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(rows)
    }

    fn daily_revenue(
        &self,
        address: &str,
        since: i64,
    ) -> Result<Vec<DailyRevenue>, Self::Error> {
        let mut days: BTreeMap<String, (f64, u64)> = BTreeMap::new();
        for transaction in self.transactions.values() {
            if transaction.address != address || transaction.timestamp < since {
                continue;
            }
            let entry = days.entry(calendar_day(transaction.timestamp)).or_default();
            entry.0 += transaction.value;
            entry.1 += 1;
        }
        Ok(days
            .into_iter()
            .map(|(date, (total, count))| DailyRevenue { date, total, count })
            .collect())
    }

    fn total_revenue(&self, address: &str) -> Result<RevenueTotal, Self::Error> {
        let mut total = RevenueTotal::default();
        for transaction in self.transactions.values() {
            if transaction.address != address {
                continue;
            }
            total.total += transaction.value;
            total.count += 1;
            total.first_timestamp = Some(
                total
                    .first_timestamp
                    .map_or(transaction.timestamp, |first| first.min(transaction.timestamp)),
            );
            total.last_timestamp = Some(
                total
                    .last_timestamp
                    .map_or(transaction.timestamp, |last| last.max(transaction.timestamp)),
            );
        }
        Ok(total)
    }

    fn revenue_in_block_range(
        &self,
        address: &str,
        start: u64,
        end: u64,
    ) -> Result<RangeRevenue, Self::Error> {
        let mut range = RangeRevenue::default();
        for transaction in self.transactions.values() {
            if transaction.address == address
                && (start..=end).contains(&transaction.block_height)
            {
                range.total += transaction.value;
                range.count += 1;
            }
        }
        Ok(range)
    }

    fn transaction_page(
        &self,
        filter: &TransactionFilter,
    ) -> Result<(Vec<StoredTransaction>, u64), Self::Error> {
        let matches = |transaction: &StoredTransaction| {
            if let Some(address) = filter.address.as_deref() {
                if transaction.address != address {
                    return false;
                }
            }
            if let Some(search) = filter.search.as_deref() {
                let search = search.to_lowercase();
                let sender = transaction
                    .from_address
                    .as_deref()
                    .unwrap_or(crate::daemon_client::UNKNOWN_SENDER);
                return transaction.tx_hash.to_lowercase().contains(&search)
                    || sender.to_lowercase().contains(&search)
                    || transaction.value.to_string().contains(&search);
            }
            true
        };

        let mut rows: Vec<StoredTransaction> =
            self.transactions.values().filter(|tx| matches(tx)).cloned().collect();
        rows.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(b.block_height.cmp(&a.block_height))
                .then(a.vout_index.cmp(&b.vout_index))
        });
        let total = rows.len() as u64;

        let offset = usize::try_from(filter.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(filter.limit).unwrap_or(usize::MAX);
        let rows = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect();
        Ok((rows, total))
    }

    fn transaction_count(&self) -> Result<u64, Self::Error> {
        Ok(self.transactions.len() as u64)
    }

    fn prune_transactions_below(&mut self, cutoff: i64) -> Result<u64, Self::Error> {
        let before = self.transactions.len();
        self.transactions
            .retain(|_, transaction| transaction.timestamp >= cutoff);
        Ok((before - self.transactions.len()) as u64)
    }
}

impl StatsStorage for InMemory {
    type Error = InMemoryStorageError;

    fn insert_node_stats(&mut self, snapshot: NodeStatsSnapshot) -> Result<(), Self::Error> {
        self.node_stats.insert(snapshot.timestamp, snapshot);
        Ok(())
    }

    fn insert_utilization_stats(
        &mut self,
        snapshot: UtilizationSnapshot,
    ) -> Result<(), Self::Error> {
        self.utilization_stats.insert(snapshot.timestamp, snapshot);
        Ok(())
    }

    fn node_stats_since(&self, since: i64) -> Result<Vec<NodeStatsSnapshot>, Self::Error> {
        Ok(self.node_stats.range(since..).map(|(_, s)| s.clone()).collect())
    }

    fn utilization_stats_since(
        &self,
        since: i64,
    ) -> Result<Vec<UtilizationSnapshot>, Self::Error> {
        Ok(self
            .utilization_stats
            .range(since..)
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn has_node_stats_within(
        &self,
        timestamp: i64,
        tolerance: i64,
    ) -> Result<bool, Self::Error> {
        Ok(self
            .node_stats
            .range(timestamp.saturating_sub(tolerance)..=timestamp.saturating_add(tolerance))
            .next()
            .is_some())
    }

    fn has_utilization_stats_within(
        &self,
        timestamp: i64,
        tolerance: i64,
    ) -> Result<bool, Self::Error> {
        Ok(self
            .utilization_stats
            .range(timestamp.saturating_sub(tolerance)..=timestamp.saturating_add(tolerance))
            .next()
            .is_some())
    }
}

impl Storage for InMemory {
    type Error = InMemoryStorageError;

    fn batch_insert(
        &mut self,
        blocks: Vec<StoredBlock>,
        transactions: Vec<StoredTransaction>,
    ) -> Result<BatchOutcome, <Self as Storage>::Error> {
        // Nothing here can fail partway, so the batch is trivially atomic.
        let mut outcome = BatchOutcome::default();
        for block in blocks {
            if self.insert_block(block)? {
                outcome.blocks_inserted += 1;
            } else {
                outcome.duplicates_skipped += 1;
            }
        }
        for transaction in transactions {
            if self.insert_transaction(transaction)? {
                outcome.transactions_inserted += 1;
            } else {
                outcome.duplicates_skipped += 1;
            }
        }
        Ok(outcome)
    }

    fn prune_below(&mut self, cutoff: i64) -> Result<(u64, u64), <Self as Storage>::Error> {
        let transactions = self.prune_transactions_below(cutoff)?;
        let blocks = self.prune_blocks_below(cutoff)?;
        Ok((transactions, blocks))
    }
}

/// An error occurring while storing or retrieving values in memory. The
/// in-memory store has no failure modes, so this error is never constructed.
#[derive(Error, Debug)]
#[error("in-memory storage error")]
pub struct InMemoryStorageError;
