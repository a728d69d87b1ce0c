use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use serde::Serialize;

/// How many recent batch completions feed the rolling sync-rate estimate.
const RATE_WINDOW: usize = 16;

/// A snapshot of synchronization progress, published after every status
/// change and served to HTTP handlers verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// The chain tip height last reported by the daemon.
    pub current_height: u64,
    /// Highest stored height, if any.
    pub highest_synced: Option<u64>,
    /// Lowest stored height, if any.
    pub lowest_synced: Option<u64>,
    /// Number of stored blocks.
    pub total_blocks_synced: u64,
    /// Blocks still missing from the retention window.
    pub total_blocks_remaining: u64,
    /// Blocks between the stored frontier and the tip.
    pub new_blocks_remaining: u64,
    /// Blocks between the lowest stored height and the retention floor.
    pub historical_blocks_remaining: u64,
    /// Progress through the retention window, in `[0, 100]`.
    pub sync_progress: f64,
    /// Whether the daemon answered the most recent tip request.
    pub is_online: bool,
    /// Whether the store has no blocks yet.
    pub is_first_run: bool,
    /// Whether the initial day of blocks behind the tip has been indexed.
    pub has_completed_initial_sync: bool,
    /// Whether the whole retention window is indexed with no gaps.
    pub is_complete: bool,
    /// Whether a sync cycle is currently executing.
    pub is_syncing: bool,
    /// Human-readable description of the last cycle's outcome.
    pub last_sync_message: String,
    /// Recent sync throughput in blocks per second.
    pub sync_rate: f64,
    /// Estimated seconds until the retention window is fully indexed.
    pub estimated_time_remaining: Option<u64>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            current_height: 0,
            highest_synced: None,
            lowest_synced: None,
            total_blocks_synced: 0,
            total_blocks_remaining: 0,
            new_blocks_remaining: 0,
            historical_blocks_remaining: 0,
            sync_progress: 0.0,
            is_online: false,
            is_first_run: true,
            has_completed_initial_sync: false,
            is_complete: false,
            is_syncing: false,
            last_sync_message: "Not yet synced".to_string(),
            sync_rate: 0.0,
            estimated_time_remaining: None,
        }
    }
}

/// Rolling blocks-per-second estimate over the most recent batches.
#[derive(Debug)]
pub(crate) struct RateTracker {
    samples: VecDeque<(Instant, u64)>,
}

impl RateTracker {
    pub(crate) fn new() -> RateTracker {
        RateTracker {
            samples: VecDeque::with_capacity(RATE_WINDOW + 1),
        }
    }

    pub(crate) fn record(&mut self, blocks: u64) {
        self.samples.push_back((Instant::now(), blocks));
        while self.samples.len() > RATE_WINDOW {
            self.samples.pop_front();
        }
    }

    pub(crate) fn rate(&self) -> f64 {
        let Some((first, _)) = self.samples.front() else {
            return 0.0;
        };
        let elapsed = first.elapsed().max(Duration::from_millis(1));
        let blocks: u64 = self.samples.iter().map(|(_, count)| count).sum();
        blocks as f64 / elapsed.as_secs_f64()
    }

    /// Seconds until `remaining` blocks are synced at the current rate.
    pub(crate) fn eta(&self, remaining: u64) -> Option<u64> {
        let rate = self.rate();
        if rate <= f64::EPSILON || remaining == 0 {
            return None;
        }
        Some((remaining as f64 / rate).round() as u64)
    }
}
