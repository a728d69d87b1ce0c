use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use strum::{Display, EnumString};

use super::{env_var, ConfigError};

/// Sync cadence, budget, and retention configuration.
#[serde_as]
#[derive(Deserialize, PartialEq, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncConfig {
    /// Seconds between sync cycles.
    #[serde_as(as = "DurationSeconds")]
    pub interval: Duration,
    /// Maximum blocks one cycle may fetch and commit.
    pub max_blocks_per_sync: u64,
    /// Heights fetched per batch.
    pub batch_size: usize,
    /// Days of history to index and retain.
    pub retention_days: u64,
    /// Expected blocks mined per day.
    pub blocks_per_day: u64,
    /// Progress fraction at which gap detection starts running.
    pub gap_check_threshold: f64,
    /// Preset that overrides the throughput-related fields as a set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization: Option<OptimizationLevel>,
}

impl SyncConfig {
    pub(super) fn apply_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(secs) = env_var::<u64>("SYNC_INTERVAL")? {
            self.interval = Duration::from_secs(secs);
        }
        if let Some(budget) = env_var::<u64>("MAX_BLOCKS_PER_SYNC")? {
            self.max_blocks_per_sync = budget;
        }
        if let Some(size) = env_var::<usize>("BATCH_SIZE")? {
            self.batch_size = size;
        }
        if let Some(days) = env_var::<u64>("RETENTION_DAYS")? {
            self.retention_days = days;
        }
        if let Some(blocks) = env_var::<u64>("BLOCKS_PER_DAY")? {
            self.blocks_per_day = blocks;
        }
        if let Some(level) = env_var::<OptimizationLevel>("OPTIMIZATION_LEVEL")? {
            self.optimization = Some(level);
        }
        Ok(self)
    }

    pub(super) fn validate(&self) {
        assert!(self.batch_size > 0, "batch-size must be at least 1");
        assert!(self.blocks_per_day > 0, "blocks-per-day must be at least 1");
        assert!(self.retention_days > 0, "retention-days must be at least 1");
        assert!(
            self.gap_check_threshold > 0.0 && self.gap_check_threshold <= 1.0,
            "gap-check-threshold must be a fraction in (0, 1]"
        );
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            max_blocks_per_sync: 2000,
            batch_size: 50,
            retention_days: 30,
            blocks_per_day: 720,
            gap_check_threshold: 0.95,
            optimization: None,
        }
    }
}

/// Throughput presets. A preset overrides the individual tuning fields it
/// covers; explicit environment overrides still win because they are applied
/// after the preset.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, PartialEq, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    /// Gentle on public nodes.
    Conservative,
    /// Suited to a well-connected local node.
    Aggressive,
    /// For a dedicated local node only.
    Maximum,
}

impl OptimizationLevel {
    /// `(max_concurrent, batch_size, max_blocks_per_sync, request_delay)`
    /// for this preset.
    #[must_use]
    pub fn tuning(self) -> (usize, usize, u64, Duration) {
        match self {
            OptimizationLevel::Conservative => (5, 25, 1000, Duration::from_millis(200)),
            OptimizationLevel::Aggressive => (10, 50, 2500, Duration::from_millis(100)),
            OptimizationLevel::Maximum => (15, 100, 5000, Duration::from_millis(50)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use std::{panic::catch_unwind, str::FromStr};

    use super::{OptimizationLevel, SyncConfig};

    #[test]
    fn default_is_valid() {
        SyncConfig::default().validate();
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let config = SyncConfig {
            gap_check_threshold: 1.5,
            ..SyncConfig::default()
        };
        catch_unwind(|| config.validate()).expect_err("threshold above 1 should be invalid");
    }

    #[test]
    fn optimization_levels_parse_from_lowercase() {
        assert_eq!(
            OptimizationLevel::from_str("maximum").unwrap(),
            OptimizationLevel::Maximum
        );
        assert_eq!(OptimizationLevel::Conservative.to_string(), "conservative");
    }

    #[test]
    fn presets_scale_monotonically() {
        let (conservative, _, _, _) = OptimizationLevel::Conservative.tuning();
        let (aggressive, _, _, _) = OptimizationLevel::Aggressive.tuning();
        let (maximum, _, _, _) = OptimizationLevel::Maximum.tuning();
        assert!(conservative < aggressive && aggressive < maximum);
    }
}
