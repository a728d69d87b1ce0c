//! The synchronization engine.
//!
//! A cycle reads the tip and the stored frontier, plans forward/backward
//! phases under one block budget, then runs each phase as a sequence of
//! batches: fetch in parallel, analyze, resolve senders, commit atomically.
//! Partial failures never abort a cycle; missing heights are rediscovered by
//! the next cycle's planner and, near completion, by the gap-fill pass.

mod planner;
mod status;

use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Instant,
};

use futures::{stream, StreamExt};
use log::{debug, error, info, warn};
pub use planner::SyncTuning;
use planner::{derive_targets, plan_cycle, DerivedTargets, Phase};
use rayon::prelude::*;
pub use status::SyncStatus;
use status::RateTracker;
use thiserror::Error;

use crate::{
    analyzer::{analyze_block, Payment, Sender},
    block::Block,
    daemon_client::{Client, RpcError, UNKNOWN_SENDER},
    pubsub::Publisher,
    storage::{
        Client as StorageClient, Frontier, Storage, StorageError, StoredBlock, StoredTransaction,
    },
};

/// Cap on concurrent sender resolutions, independent of the fetch fan-out.
const MAX_SENDER_LOOKUPS: usize = 15;

/// Days of blocks re-scanned below the tip during gap detection.
const GAP_RECENT_DAYS: u64 = 3;
/// Days of blocks re-scanned below the lowest stored height during gap
/// detection.
const GAP_HISTORICAL_DAYS: u64 = 7;

/// Publish a progress update every this many batches.
const PROGRESS_EVERY_BATCHES: usize = 2;

/// Counters for one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleMetrics {
    /// Blocks the plan intended to fetch.
    pub planned: u64,
    /// Blocks accounted for, including failed ones.
    pub processed: u64,
    /// Block rows newly inserted.
    pub blocks_inserted: u64,
    /// Payment rows newly inserted.
    pub payments_inserted: u64,
    /// Heights that could not be fetched.
    pub failed: u64,
    /// Missing heights filled by gap detection.
    pub gaps_filled: u64,
    /// Payment rows removed by the retention sweep.
    pub transactions_pruned: u64,
    /// Block rows removed by the retention sweep.
    pub blocks_pruned: u64,
    /// Whether the retention window is fully indexed after this cycle.
    pub complete: bool,
}

/// The result of asking the engine to run a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle ran; counters describe what it did.
    Completed(CycleMetrics),
    /// Another cycle was already in flight, so this request did nothing.
    AlreadyRunning,
}

pub(crate) struct SyncEngine<S: Storage, C: Client> {
    client: C,
    store: StorageClient<S>,
    watched: Arc<HashSet<String>>,
    tuning: SyncTuning,
    publisher: Arc<Publisher>,
    running: AtomicBool,
    complete: AtomicBool,
    rate: Mutex<RateTracker>,
}

impl<S: Storage + 'static, C: Client> SyncEngine<S, C> {
    pub(crate) fn new(
        client: C,
        store: StorageClient<S>,
        watched: HashSet<String>,
        tuning: SyncTuning,
        publisher: Arc<Publisher>,
    ) -> SyncEngine<S, C> {
        if watched.is_empty() {
            warn!("No watched addresses configured; blocks will be indexed without payments");
        }
        SyncEngine {
            client,
            store,
            watched: Arc::new(watched),
            tuning,
            publisher,
            running: AtomicBool::new(false),
            complete: AtomicBool::new(false),
            rate: Mutex::new(RateTracker::new()),
        }
    }

    pub(crate) fn tuning(&self) -> &SyncTuning {
        &self.tuning
    }

    /// Run one sync cycle. At most one cycle is ever in flight: re-entry
    /// while running returns [`CycleOutcome::AlreadyRunning`] immediately.
    pub(crate) async fn run_cycle(&self) -> Result<CycleOutcome, SyncError> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Sync requested while a cycle is already in progress");
            return Ok(CycleOutcome::AlreadyRunning);
        }
        let result = self.cycle().await;
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = &result {
            self.publish_failure(&format!("Sync failed: {e}"));
        }
        result.map(CycleOutcome::Completed)
    }

    async fn cycle(&self) -> Result<CycleMetrics, SyncError> {
        let started = Instant::now();
        let mut metrics = CycleMetrics::default();

        // Without a tip there is nothing to plan against.
        let tip = match self.client.tip().await {
            Ok(tip) => tip,
            Err(e) => {
                self.publish_offline(&format!("Daemon unreachable: {e}")).await;
                return Err(SyncError::Rpc(e));
            }
        };

        let frontier = self.store.frontier().await?;
        let plan = plan_cycle(tip, &frontier, &self.tuning);
        metrics.planned = plan.total_blocks();
        debug!(
            "Planned cycle: tip {tip}, frontier {frontier:?}, {} blocks in {} phases",
            metrics.planned,
            plan.phases.len(),
        );
        self.publish(tip, true, &format!("Syncing {} blocks", metrics.planned))
            .await?;

        for phase in &plan.phases {
            self.execute_phase(tip, phase, &mut metrics).await?;
        }

        if plan.check_gaps {
            self.fill_gaps(tip, &mut metrics).await?;
        } else {
            self.complete.store(false, Ordering::Relaxed);
        }

        self.prune(&mut metrics).await?;

        metrics.complete = self.complete.load(Ordering::Relaxed);
        let message = cycle_message(&metrics);
        info!(
            "Sync cycle finished in {:.1?}: {message}",
            started.elapsed()
        );
        self.publish(tip, false, &message).await?;
        Ok(metrics)
    }

    async fn execute_phase(
        &self,
        tip: u64,
        phase: &Phase,
        metrics: &mut CycleMetrics,
    ) -> Result<(), SyncError> {
        let heights = phase.heights();
        let batches: Vec<&[u64]> = heights.chunks(self.tuning.batch_size.max(1)).collect();
        let batch_count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            match self.process_batch(batch).await {
                Ok(outcome) => {
                    metrics.blocks_inserted += outcome.blocks_inserted;
                    metrics.payments_inserted += outcome.payments_inserted;
                    metrics.failed += outcome.failed;
                }
                Err(SyncError::Storage(e)) => return Err(SyncError::Storage(e)),
                Err(e) => {
                    // Processed still advances so a flaky range cannot stall
                    // the cycle; the planner re-examines the frontier next
                    // cycle and the gap-fill pass sweeps up the remainder.
                    error!("Batch of {} blocks failed: {e}", batch.len());
                    metrics.failed += batch.len() as u64;
                }
            }
            metrics.processed += batch.len() as u64;
            self.rate
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(batch.len() as u64);

            if (index + 1) % PROGRESS_EVERY_BATCHES == 0 || index + 1 == batch_count {
                self.publish(
                    tip,
                    true,
                    &format!("Synced {} of {} blocks", metrics.processed, metrics.planned),
                )
                .await?;
            }

            if !self.tuning.request_delay.is_zero() && index + 1 < batch_count {
                tokio::time::sleep(self.tuning.request_delay).await;
            }
        }
        Ok(())
    }

    async fn process_batch(&self, heights: &[u64]) -> Result<BatchCounters, SyncError> {
        let results = self
            .client
            .fetch_blocks(heights.to_vec(), self.tuning.max_concurrent)
            .await;

        let mut blocks = Vec::with_capacity(results.len());
        let mut failed = 0;
        for (height, result) in results {
            match result {
                Ok(block) => blocks.push(block),
                Err(e) => {
                    warn!("Failed to fetch block {height}: {e}");
                    failed += 1;
                }
            }
        }

        let watched = self.watched.clone();
        let payments: Vec<Payment> = blocks
            .par_iter()
            .flat_map_iter(|block| analyze_block(block, &watched))
            .collect();

        let rows = self.resolve_payments(payments).await;
        let stored_blocks = blocks.iter().map(stored_block).collect();
        let outcome = self.store.batch_insert(stored_blocks, rows).await?;

        Ok(BatchCounters {
            blocks_inserted: outcome.blocks_inserted,
            payments_inserted: outcome.transactions_inserted,
            failed,
        })
    }

    /// Turn payments into storable rows, resolving referenced previous
    /// outputs through the daemon with a bounded fan-out.
    async fn resolve_payments(&self, payments: Vec<Payment>) -> Vec<StoredTransaction> {
        let lookup_cap = self.tuning.max_concurrent.min(MAX_SENDER_LOOKUPS).max(1);
        stream::iter(payments)
            .map(|payment| async move {
                let from_address = match &payment.sender {
                    Sender::Address(address) => Some(address.clone()),
                    Sender::Unknown => None,
                    Sender::Unresolved { txid, vout } => {
                        let resolved = self.client.resolve_sender(txid, *vout).await;
                        // The sentinel is stored as NULL so the backfill pass
                        // can retry it later.
                        (resolved != UNKNOWN_SENDER).then_some(resolved)
                    }
                };
                StoredTransaction {
                    block_height: payment.block_height,
                    tx_hash: payment.tx_hash,
                    vout_index: payment.vout_index,
                    address: payment.address,
                    from_address,
                    value: payment.value,
                    timestamp: payment.timestamp,
                }
            })
            .buffer_unordered(lookup_cap)
            .collect()
            .await
    }

    /// Detect and fill missing heights in two narrow ranges: a few days below
    /// the tip, and a window immediately below the lowest stored height.
    async fn fill_gaps(&self, tip: u64, metrics: &mut CycleMetrics) -> Result<(), SyncError> {
        let frontier = self.store.frontier().await?;
        let targets = derive_targets(tip, &frontier, &self.tuning);

        let mut missing = self.missing_heights(&frontier, tip, &targets).await?;
        missing.sort_unstable();
        missing.dedup();

        if !missing.is_empty() {
            info!("Gap detection found {} missing blocks", missing.len());
            for batch in missing.chunks(self.tuning.batch_size.max(1)) {
                match self.process_batch(batch).await {
                    Ok(outcome) => {
                        metrics.gaps_filled += outcome.blocks_inserted;
                        metrics.payments_inserted += outcome.payments_inserted;
                        metrics.failed += outcome.failed;
                    }
                    Err(SyncError::Storage(e)) => return Err(SyncError::Storage(e)),
                    Err(e) => {
                        error!("Gap-fill batch of {} blocks failed: {e}", batch.len());
                        metrics.failed += batch.len() as u64;
                    }
                }
                metrics.processed += batch.len() as u64;
            }
        }

        // Completion requires a clean re-check after filling.
        let frontier = self.store.frontier().await?;
        let targets = derive_targets(tip, &frontier, &self.tuning);
        let still_missing = self.missing_heights(&frontier, tip, &targets).await?;
        let complete = still_missing.is_empty() && targets.new_remaining == 0;
        self.complete.store(complete, Ordering::Relaxed);
        if complete {
            info!("Synchronization complete: no gaps and no new blocks remaining");
        }
        Ok(())
    }

    async fn missing_heights(
        &self,
        frontier: &Frontier,
        tip: u64,
        targets: &DerivedTargets,
    ) -> Result<Vec<u64>, SyncError> {
        let mut missing = Vec::new();

        let recent_start = tip
            .saturating_sub(GAP_RECENT_DAYS * self.tuning.blocks_per_day)
            .max(targets.target_lowest);
        missing.extend(self.missing_in_range(recent_start, tip).await?);

        if let Some(lowest) = frontier.lowest {
            if lowest > targets.target_lowest {
                let start = lowest
                    .saturating_sub(GAP_HISTORICAL_DAYS * self.tuning.blocks_per_day)
                    .max(targets.target_lowest);
                missing.extend(self.missing_in_range(start, lowest - 1).await?);
            }
        }
        Ok(missing)
    }

    async fn missing_in_range(&self, start: u64, end: u64) -> Result<Vec<u64>, SyncError> {
        if start > end {
            return Ok(Vec::new());
        }
        let stored = self.store.heights_in_range(start, end).await?;
        let mut stored = stored.into_iter().peekable();
        let mut missing = Vec::new();
        for height in start..=end {
            if stored.peek() == Some(&height) {
                stored.next();
            } else {
                missing.push(height);
            }
        }
        Ok(missing)
    }

    /// Retention sweep: drop payments and blocks older than the retention
    /// window, anchored at the newest stored block's timestamp.
    async fn prune(&self, metrics: &mut CycleMetrics) -> Result<(), SyncError> {
        let frontier = self.store.frontier().await?;
        let Some(highest) = frontier.highest else {
            return Ok(());
        };
        let Some(tip_timestamp) = self.store.block_timestamp(highest).await? else {
            return Ok(());
        };

        let retention_secs = i64::try_from(self.tuning.retention_days).unwrap_or(i64::MAX)
            .saturating_mul(86_400);
        let cutoff = tip_timestamp.saturating_sub(retention_secs);
        let (transactions, blocks) = self.store.prune_below(cutoff).await?;
        if transactions > 0 || blocks > 0 {
            info!("Retention sweep removed {transactions} payments and {blocks} blocks");
        }
        metrics.transactions_pruned = transactions;
        metrics.blocks_pruned = blocks;
        Ok(())
    }

    /// Re-resolve senders for up to `limit` stored payments that have none.
    ///
    /// Rows are grouped by height so each affected block is fetched once,
    /// re-analyzed, and its unresolved references looked up through the
    /// daemon. Returns the number of rows updated.
    pub(crate) async fn backfill_senders(&self, limit: u64) -> Result<u64, SyncError> {
        let rows = self.store.unresolved_senders(limit).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut by_height: BTreeMap<u64, Vec<StoredTransaction>> = BTreeMap::new();
        for row in rows {
            by_height.entry(row.block_height).or_default().push(row);
        }
        debug!(
            "Backfilling senders for {} blocks worth of payments",
            by_height.len()
        );

        let mut updated = 0;
        for (height, rows) in by_height {
            let block = match self.client.block(height).await {
                Ok(block) => block,
                Err(e) => {
                    warn!("Skipping sender backfill for block {height}: {e}");
                    continue;
                }
            };
            let payments = analyze_block(&block, &self.watched);
            for row in rows {
                let Some(payment) = payments.iter().find(|payment| {
                    payment.tx_hash == row.tx_hash
                        && payment.vout_index == row.vout_index
                        && payment.address == row.address
                }) else {
                    continue;
                };
                let resolved = match &payment.sender {
                    Sender::Address(address) => Some(address.clone()),
                    Sender::Unresolved { txid, vout } => {
                        let resolved = self.client.resolve_sender(txid, *vout).await;
                        (resolved != UNKNOWN_SENDER).then_some(resolved)
                    }
                    Sender::Unknown => None,
                };
                if let Some(address) = resolved {
                    if self
                        .store
                        .set_sender(row.tx_hash, row.block_height, row.vout_index, address)
                        .await?
                    {
                        updated += 1;
                    }
                }
            }
        }
        info!("Sender backfill updated {updated} payments");
        Ok(updated)
    }

    /// Assemble and publish a status snapshot from live store state.
    async fn publish(
        &self,
        tip: u64,
        is_syncing: bool,
        message: &str,
    ) -> Result<(), SyncError> {
        let frontier = self.store.frontier().await?;
        let targets = derive_targets(tip, &frontier, &self.tuning);
        let rate = self.rate.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = targets.new_remaining + targets.historical_remaining;

        let status = SyncStatus {
            current_height: tip,
            highest_synced: frontier.highest,
            lowest_synced: frontier.lowest,
            total_blocks_synced: frontier.count,
            total_blocks_remaining: remaining,
            new_blocks_remaining: targets.new_remaining,
            historical_blocks_remaining: targets.historical_remaining,
            sync_progress: targets.progress * 100.0,
            is_online: true,
            is_first_run: frontier.highest.is_none(),
            has_completed_initial_sync: frontier
                .highest
                .is_some_and(|highest| highest >= targets.initial_target),
            is_complete: self.complete.load(Ordering::Relaxed),
            is_syncing,
            last_sync_message: message.to_string(),
            sync_rate: rate.rate(),
            estimated_time_remaining: rate.eta(remaining),
        };
        drop(rate);
        self.publisher.publish(status);
        Ok(())
    }

    async fn publish_offline(&self, message: &str) {
        let mut status = self.publisher.latest();
        status.is_online = false;
        status.is_syncing = false;
        status.last_sync_message = message.to_string();
        self.publisher.publish(status);
    }

    fn publish_failure(&self, message: &str) {
        let mut status = self.publisher.latest();
        status.is_syncing = false;
        status.last_sync_message = message.to_string();
        self.publisher.publish(status);
    }
}

fn stored_block(block: &Block) -> StoredBlock {
    StoredBlock {
        height: block.height,
        hash: block.hash.clone(),
        timestamp: block.timestamp,
        synced_at: chrono::Utc::now().timestamp(),
    }
}

fn cycle_message(metrics: &CycleMetrics) -> String {
    if metrics.complete {
        "Fully synced; no new blocks".to_string()
    } else if metrics.blocks_inserted == 0 && metrics.gaps_filled == 0 {
        "No new blocks to sync".to_string()
    } else {
        let mut message = format!(
            "Synced {} blocks ({} payments)",
            metrics.blocks_inserted + metrics.gaps_filled,
            metrics.payments_inserted,
        );
        if metrics.failed > 0 {
            message.push_str(&format!(", {} failed", metrics.failed));
        }
        message
    }
}

struct BatchCounters {
    blocks_inserted: u64,
    payments_inserted: u64,
    failed: u64,
}

/// Errors that make a sync cycle abort.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The daemon could not be reached for data the cycle cannot proceed
    /// without.
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
    /// The store rejected a read or write.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
