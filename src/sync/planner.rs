//! Cycle planning. A plan is computed from the tip, the stored frontier, and
//! the tuning parameters alone, which keeps the decision procedure a pure
//! function that can be tested without a daemon or a store.

use crate::storage::Frontier;

/// Tuning parameters for the sync engine, distilled from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncTuning {
    /// Expected blocks mined per day.
    pub blocks_per_day: u64,
    /// Days of history to index and retain.
    pub retention_days: u64,
    /// Maximum blocks a single cycle may fetch and commit.
    pub max_blocks_per_sync: u64,
    /// Heights fetched per batch.
    pub batch_size: usize,
    /// Maximum concurrent block fetches.
    pub max_concurrent: usize,
    /// Pause between block batches.
    pub request_delay: std::time::Duration,
    /// Progress fraction at which gap detection starts running.
    pub gap_check_threshold: f64,
    /// Forward cap per cycle once near completion.
    pub near_tip_forward_cap: u64,
    /// Backward cap per cycle once near completion.
    pub near_tip_backward_cap: u64,
}

impl Default for SyncTuning {
    fn default() -> Self {
        SyncTuning {
            blocks_per_day: 720,
            retention_days: 30,
            max_blocks_per_sync: 2000,
            batch_size: 50,
            max_concurrent: 10,
            request_delay: std::time::Duration::ZERO,
            gap_check_threshold: 0.95,
            near_tip_forward_cap: 500,
            near_tip_backward_cap: 1000,
        }
    }
}

impl SyncTuning {
    /// Blocks in the full retention window.
    pub(crate) fn window(&self) -> u64 {
        self.blocks_per_day * self.retention_days
    }
}

/// Quantities derived from the tip and the frontier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DerivedTargets {
    /// Lowest height the index is expected to reach.
    pub target_lowest: u64,
    /// Starting height for a first-run sync (one day behind tip).
    pub initial_target: u64,
    /// Blocks between the stored frontier and the tip.
    pub new_remaining: u64,
    /// Blocks between the lowest stored height and the retention floor.
    pub historical_remaining: u64,
    /// Fraction of the retention window stored, in `[0, 1]`.
    pub progress: f64,
}

pub(crate) fn derive_targets(tip: u64, frontier: &Frontier, tuning: &SyncTuning) -> DerivedTargets {
    let target_lowest = tip.saturating_sub(tuning.window());
    let initial_target = tip.saturating_sub(tuning.blocks_per_day);
    let new_remaining = frontier
        .highest
        .map_or(tip.saturating_sub(initial_target), |highest| {
            tip.saturating_sub(highest)
        });
    let historical_remaining = frontier
        .lowest
        .map_or(0, |lowest| lowest.saturating_sub(target_lowest));
    let window = tuning.window();
    let progress = if window == 0 {
        1.0
    } else {
        (frontier.count as f64 / window as f64).min(1.0)
    };
    DerivedTargets {
        target_lowest,
        initial_target,
        new_remaining,
        historical_remaining,
        progress,
    }
}

/// Direction of one sync phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Forward,
    Backward,
}

/// One contiguous range of heights to fetch, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Phase {
    pub direction: Direction,
    pub start: u64,
    pub end: u64,
}

impl Phase {
    pub(crate) fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Heights in fetch order: ascending for forward phases, descending for
    /// backward phases.
    pub(crate) fn heights(&self) -> Vec<u64> {
        match self.direction {
            Direction::Forward => (self.start..=self.end).collect(),
            Direction::Backward => (self.start..=self.end).rev().collect(),
        }
    }
}

/// Why this cycle's plan looks the way it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Priority {
    /// Nothing stored yet; index the most recent day first.
    Initial,
    /// Normal operation: new blocks first, remaining budget goes backward.
    Hybrid,
    /// The window is nearly full; small phases plus gap detection.
    NearComplete,
}

/// The plan for one sync cycle.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CyclePlan {
    pub phases: Vec<Phase>,
    pub priority: Priority,
    pub check_gaps: bool,
}

impl CyclePlan {
    pub(crate) fn total_blocks(&self) -> u64 {
        self.phases.iter().map(Phase::len).sum()
    }
}

/// Compute the plan for one cycle. Forward phases always precede backward
/// phases, and the combined phase sizes never exceed the cycle budget.
pub(crate) fn plan_cycle(tip: u64, frontier: &Frontier, tuning: &SyncTuning) -> CyclePlan {
    let budget = tuning.max_blocks_per_sync;
    let targets = derive_targets(tip, frontier, tuning);

    // First run, or a store whose block table was wiped.
    let Some(highest) = frontier.highest else {
        let mut phases = Vec::new();
        if budget > 0 && tip > 0 {
            let start = targets.initial_target.min(tip);
            let end = tip.min(start + budget - 1);
            phases.push(Phase {
                direction: Direction::Forward,
                start,
                end,
            });
        }
        return CyclePlan {
            phases,
            priority: Priority::Initial,
            check_gaps: false,
        };
    };
    let lowest = frontier.lowest.unwrap_or(highest);

    if targets.progress >= tuning.gap_check_threshold {
        let mut phases = Vec::new();
        if targets.new_remaining > 0 {
            let count = targets
                .new_remaining
                .min(tuning.near_tip_forward_cap)
                .min(budget);
            if count > 0 {
                phases.push(Phase {
                    direction: Direction::Forward,
                    start: highest + 1,
                    end: highest + count,
                });
            }
        } else if targets.historical_remaining > 0 {
            let count = targets
                .historical_remaining
                .min(tuning.near_tip_backward_cap)
                .min(budget);
            if count > 0 {
                phases.push(Phase {
                    direction: Direction::Backward,
                    start: lowest - count,
                    end: lowest - 1,
                });
            }
        }
        return CyclePlan {
            phases,
            priority: Priority::NearComplete,
            check_gaps: true,
        };
    }

    // Hybrid: forward gets the budget first, backward the remainder.
    let mut phases = Vec::new();
    let forward_count = targets.new_remaining.min(budget);
    if forward_count > 0 {
        phases.push(Phase {
            direction: Direction::Forward,
            start: highest + 1,
            end: highest + forward_count,
        });
    }
    let backward_count = targets
        .historical_remaining
        .min(budget - forward_count);
    if backward_count > 0 {
        phases.push(Phase {
            direction: Direction::Backward,
            start: lowest - backward_count,
            end: lowest - 1,
        });
    }
    CyclePlan {
        phases,
        priority: Priority::Hybrid,
        check_gaps: false,
    }
}
