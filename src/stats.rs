//! Collection of network-wide fleet and utilization statistics.
//!
//! Each upstream endpoint has its own cache with its own time-to-live, and a
//! failed refresh falls back to the stale value rather than surfacing the
//! error. The twice-daily snapshot cadence is driven externally;
//! [`StatsCollector::collect_and_store`] is the entry point it calls.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use tokio::time::{error::Elapsed, timeout};

use crate::{
    caching::CachedValue,
    daemon_client::Client,
    storage::{Client as StorageClient, Storage, StorageError},
};

/// Time-to-live for the node-count cache.
const NODE_STATS_TTL: Duration = Duration::from_secs(5 * 60);
/// Time-to-live for the Arcane node count cache.
const ARCANE_STATS_TTL: Duration = Duration::from_secs(10 * 60);
/// Time-to-live for the resource utilization cache.
const UTILIZATION_TTL: Duration = Duration::from_secs(3 * 60);
/// Time-to-live for the combined snapshot cache.
const COMBINED_TTL: Duration = Duration::from_secs(5 * 60);
/// Time-to-live for the running-apps cache.
const RUNNING_APPS_TTL: Duration = Duration::from_secs(2 * 60);

/// Snapshots within this many seconds of an existing row are not recorded
/// again.
const SNAPSHOT_TOLERANCE_SECS: i64 = 3600;

/// Where the data in a snapshot came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// All fields were fetched live.
    Api,
    /// At least one field came from a stale cache entry.
    Cache,
    /// Some sources failed entirely; the snapshot is incomplete.
    Partial,
    /// Every source failed.
    Failed,
}

/// Fleet node counts by tier, as returned by `GET /daemon/getfluxnodecount`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTierCounts {
    /// Total node count.
    #[serde(default)]
    pub total: u64,
    /// Cumulus tier nodes.
    #[serde(default, alias = "cumulus-enabled", alias = "basic-enabled")]
    pub cumulus: u64,
    /// Nimbus tier nodes.
    #[serde(default, alias = "nimbus-enabled", alias = "super-enabled")]
    pub nimbus: u64,
    /// Stratus tier nodes.
    #[serde(default, alias = "stratus-enabled", alias = "bamf-enabled")]
    pub stratus: u64,
}

/// A point-in-time snapshot of fleet composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatsSnapshot {
    /// Snapshot time, seconds since epoch.
    pub timestamp: i64,
    /// Cumulus tier nodes.
    pub cumulus: u64,
    /// Nimbus tier nodes.
    pub nimbus: u64,
    /// Stratus tier nodes.
    pub stratus: u64,
    /// Nodes running ArcaneOS.
    pub arcane: u64,
    /// Total node count.
    pub total: u64,
    /// Where the data came from.
    pub data_source: DataSource,
    /// Share of live calls that succeeded, in `[0, 100]`.
    pub api_success_rate: f64,
    /// Free-form note, set when collection was degraded.
    pub note: Option<String>,
}

/// A point-in-time snapshot of fleet resources and their utilization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSnapshot {
    /// Snapshot time, seconds since epoch.
    pub timestamp: i64,
    /// Nodes contributing benchmark data.
    pub node_count: u64,
    /// Total fleet cores.
    pub total_cores: u64,
    /// Total fleet RAM in GB.
    pub total_ram_gb: f64,
    /// Total fleet SSD in GB.
    pub total_ssd_gb: f64,
    /// Cores reserved by running apps.
    pub utilized_cores: f64,
    /// RAM reserved by running apps, in GB.
    pub utilized_ram_gb: f64,
    /// SSD reserved by running apps, in GB.
    pub utilized_ssd_gb: f64,
    /// Core utilization in `[0, 100]`.
    pub cores_percent: f64,
    /// RAM utilization in `[0, 100]`.
    pub ram_percent: f64,
    /// SSD utilization in `[0, 100]`.
    pub ssd_percent: f64,
    /// Apps running across the fleet.
    pub running_apps: u64,
    /// Where the data came from.
    pub data_source: DataSource,
    /// Share of live calls that succeeded, in `[0, 100]`.
    pub api_success_rate: f64,
    /// Free-form note, set when collection was degraded.
    pub note: Option<String>,
}

/// Totals summed from the fleet benchmark records.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct UtilizationTotals {
    nodes: u64,
    cores: u64,
    ram_gb: f64,
    ssd_gb: f64,
}

/// Totals summed from the fleet app records.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RunningAppsTotals {
    apps: u64,
    cores: f64,
    ram_gb: f64,
    ssd_gb: f64,
}

struct StatsCaches {
    node_counts: CachedValue<NodeTierCounts>,
    arcane_nodes: CachedValue<u64>,
    utilization: CachedValue<UtilizationTotals>,
    running_apps: CachedValue<RunningAppsTotals>,
    combined: CachedValue<(NodeStatsSnapshot, UtilizationSnapshot)>,
}

/// Collects fleet statistics from the daemon and stats host.
pub struct StatsCollector<C: Client> {
    client: C,
    collection_timeout: Duration,
    caches: Arc<Mutex<StatsCaches>>,
}

impl<C: Client> StatsCollector<C> {
    pub(crate) fn new(client: C, collection_timeout: Duration) -> StatsCollector<C> {
        StatsCollector {
            client,
            collection_timeout,
            caches: Arc::new(Mutex::new(StatsCaches {
                node_counts: CachedValue::new(NODE_STATS_TTL),
                arcane_nodes: CachedValue::new(ARCANE_STATS_TTL),
                utilization: CachedValue::new(UTILIZATION_TTL),
                running_apps: CachedValue::new(RUNNING_APPS_TTL),
                combined: CachedValue::new(COMBINED_TTL),
            })),
        }
    }

    fn caches(&self) -> std::sync::MutexGuard<'_, StatsCaches> {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Collect one snapshot pair, bounded by the collection timeout.
    ///
    /// Collection itself never fails outright: sources that cannot be reached
    /// degrade the snapshot's `data_source` and `api_success_rate` instead.
    ///
    /// # Errors
    ///
    /// Returns an error only if the outer collection deadline elapses.
    pub async fn collect(
        &self,
    ) -> Result<(NodeStatsSnapshot, UtilizationSnapshot), StatsError> {
        if let Some(pair) = self.caches().combined.fresh() {
            debug!("Serving combined network stats snapshot from cache");
            return Ok(pair);
        }

        let pair = timeout(self.collection_timeout, self.collect_uncached()).await?;
        self.caches().combined.set(pair.clone());
        Ok(pair)
    }

    async fn collect_uncached(&self) -> (NodeStatsSnapshot, UtilizationSnapshot) {
        let mut outcome = SourceOutcome::default();

        let node_counts = self.node_counts(&mut outcome).await;
        let arcane = self.arcane_nodes(&mut outcome).await;
        let utilization = self.utilization(&mut outcome).await;
        let running_apps = self.running_apps(&mut outcome).await;

        let timestamp = chrono::Utc::now().timestamp();
        let data_source = outcome.data_source();
        let api_success_rate = outcome.success_rate();
        let note = outcome.note();

        let counts = node_counts.unwrap_or_default();
        let node_snapshot = NodeStatsSnapshot {
            timestamp,
            cumulus: counts.cumulus,
            nimbus: counts.nimbus,
            stratus: counts.stratus,
            arcane: arcane.unwrap_or(0),
            total: counts.total,
            data_source,
            api_success_rate,
            note: note.clone(),
        };

        let totals = utilization.unwrap_or_default();
        let apps = running_apps.unwrap_or_default();
        let utilization_snapshot = UtilizationSnapshot {
            timestamp,
            node_count: totals.nodes,
            total_cores: totals.cores,
            total_ram_gb: totals.ram_gb,
            total_ssd_gb: totals.ssd_gb,
            utilized_cores: apps.cores,
            utilized_ram_gb: apps.ram_gb,
            utilized_ssd_gb: apps.ssd_gb,
            cores_percent: percent(apps.cores, totals.cores as f64),
            ram_percent: percent(apps.ram_gb, totals.ram_gb),
            ssd_percent: percent(apps.ssd_gb, totals.ssd_gb),
            running_apps: apps.apps,
            data_source,
            api_success_rate,
            note,
        };

        (node_snapshot, utilization_snapshot)
    }

    async fn node_counts(&self, outcome: &mut SourceOutcome) -> Option<NodeTierCounts> {
        if let Some(counts) = self.caches().node_counts.fresh() {
            outcome.live_ok();
            return Some(counts);
        }
        match self.client.node_counts().await {
            Ok(counts) => {
                self.caches().node_counts.set(counts.clone());
                outcome.live_ok();
                Some(counts)
            }
            Err(e) => match self.caches().node_counts.stale() {
                // The cache stamp is deliberately not refreshed here, so the
                // next collection tries the live endpoint again.
                Some(counts) => {
                    warn!("Node count refresh failed, using stale value: {e}");
                    outcome.stale("node counts");
                    Some(counts)
                }
                None => {
                    warn!("Node count refresh failed with no cached value: {e}");
                    outcome.failed("node counts");
                    None
                }
            },
        }
    }

    async fn arcane_nodes(&self, outcome: &mut SourceOutcome) -> Option<u64> {
        if let Some(count) = self.caches().arcane_nodes.fresh() {
            outcome.live_ok();
            return Some(count);
        }
        match self.client.flux_info("flux").await {
            Ok(records) => {
                let count = count_arcane_nodes(&records);
                self.caches().arcane_nodes.set(count);
                outcome.live_ok();
                Some(count)
            }
            Err(e) => match self.caches().arcane_nodes.stale() {
                Some(count) => {
                    warn!("Arcane node count refresh failed, using stale value: {e}");
                    outcome.stale("arcane nodes");
                    Some(count)
                }
                None => {
                    warn!("Arcane node count refresh failed with no cached value: {e}");
                    outcome.failed("arcane nodes");
                    None
                }
            },
        }
    }

    async fn utilization(&self, outcome: &mut SourceOutcome) -> Option<UtilizationTotals> {
        if let Some(totals) = self.caches().utilization.fresh() {
            outcome.live_ok();
            return Some(totals);
        }
        match self.client.flux_info("benchmark").await {
            Ok(records) => {
                let totals = sum_benchmarks(&records);
                self.caches().utilization.set(totals);
                outcome.live_ok();
                Some(totals)
            }
            Err(e) => match self.caches().utilization.stale() {
                Some(totals) => {
                    warn!("Utilization refresh failed, using stale value: {e}");
                    outcome.stale("utilization");
                    Some(totals)
                }
                None => {
                    warn!("Utilization refresh failed with no cached value: {e}");
                    outcome.failed("utilization");
                    None
                }
            },
        }
    }

    async fn running_apps(&self, outcome: &mut SourceOutcome) -> Option<RunningAppsTotals> {
        if let Some(totals) = self.caches().running_apps.fresh() {
            outcome.live_ok();
            return Some(totals);
        }
        match self.client.flux_info("apps").await {
            Ok(records) => {
                let totals = sum_running_apps(&records);
                self.caches().running_apps.set(totals);
                outcome.live_ok();
                Some(totals)
            }
            Err(e) => match self.caches().running_apps.stale() {
                Some(totals) => {
                    warn!("Running apps refresh failed, using stale value: {e}");
                    outcome.stale("running apps");
                    Some(totals)
                }
                None => {
                    warn!("Running apps refresh failed with no cached value: {e}");
                    outcome.failed("running apps");
                    None
                }
            },
        }
    }

    /// Collect a snapshot pair and record it, unless a snapshot already
    /// exists within one hour of now.
    pub(crate) async fn collect_and_store<S: Storage + 'static>(
        &self,
        store: &StorageClient<S>,
    ) -> Result<(NodeStatsSnapshot, UtilizationSnapshot), StatsError> {
        let (node_snapshot, utilization_snapshot) = self.collect().await?;

        if store
            .has_node_stats_within(node_snapshot.timestamp, SNAPSHOT_TOLERANCE_SECS)
            .await?
        {
            debug!("Node stats snapshot already recorded within the last hour; skipping");
        } else {
            store.insert_node_stats(node_snapshot.clone()).await?;
        }

        if store
            .has_utilization_stats_within(utilization_snapshot.timestamp, SNAPSHOT_TOLERANCE_SECS)
            .await?
        {
            debug!("Utilization snapshot already recorded within the last hour; skipping");
        } else {
            store
                .insert_utilization_stats(utilization_snapshot.clone())
                .await?;
        }

        Ok((node_snapshot, utilization_snapshot))
    }
}

/// Tracks per-source outcomes of one collection pass.
#[derive(Default)]
struct SourceOutcome {
    live_successes: u32,
    stale_fallbacks: u32,
    failures: u32,
    notes: Vec<String>,
}

impl SourceOutcome {
    fn live_ok(&mut self) {
        self.live_successes += 1;
    }

    fn stale(&mut self, source: &str) {
        self.stale_fallbacks += 1;
        self.notes.push(format!("{source}: stale cache"));
    }

    fn failed(&mut self, source: &str) {
        self.failures += 1;
        self.notes.push(format!("{source}: unavailable"));
    }

    fn attempts(&self) -> u32 {
        self.live_successes + self.stale_fallbacks + self.failures
    }

    fn success_rate(&self) -> f64 {
        if self.attempts() == 0 {
            return 0.0;
        }
        f64::from(self.live_successes) / f64::from(self.attempts()) * 100.0
    }

    fn data_source(&self) -> DataSource {
        if self.attempts() == self.live_successes {
            DataSource::Api
        } else if self.live_successes == 0 && self.stale_fallbacks == 0 {
            DataSource::Failed
        } else if self.failures > 0 {
            DataSource::Partial
        } else {
            DataSource::Cache
        }
    }

    fn note(&self) -> Option<String> {
        if self.notes.is_empty() {
            None
        } else {
            Some(self.notes.join("; "))
        }
    }
}

fn percent(used: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    (used / total * 100.0).clamp(0.0, 100.0)
}

fn count_arcane_nodes(records: &serde_json::Value) -> u64 {
    let Some(nodes) = records.as_array() else {
        return 0;
    };
    nodes
        .iter()
        .filter(|node| {
            let flux = &node["flux"];
            flux["arcaneVersion"]
                .as_str()
                .or_else(|| node["arcaneVersion"].as_str())
                .is_some_and(|version| !version.is_empty())
        })
        .count() as u64
}

fn sum_benchmarks(records: &serde_json::Value) -> UtilizationTotals {
    let mut totals = UtilizationTotals::default();
    let Some(nodes) = records.as_array() else {
        return totals;
    };
    for node in nodes {
        let bench = if node["benchmark"]["bench"].is_object() {
            &node["benchmark"]["bench"]
        } else {
            &node["benchmark"]
        };
        if !bench.is_object() {
            continue;
        }
        totals.nodes += 1;
        totals.cores += bench["cores"].as_u64().unwrap_or(0);
        totals.ram_gb += bench["ram"].as_f64().unwrap_or(0.0);
        totals.ssd_gb += bench["ssd"].as_f64().unwrap_or(0.0);
    }
    totals
}

fn sum_running_apps(records: &serde_json::Value) -> RunningAppsTotals {
    let mut totals = RunningAppsTotals::default();
    let Some(nodes) = records.as_array() else {
        return totals;
    };
    for node in nodes {
        let Some(apps) = node["apps"]["runningapps"].as_array() else {
            continue;
        };
        totals.apps += apps.len() as u64;
        for app in apps {
            totals.cores += app["cpu"].as_f64().unwrap_or(0.0);
            totals.ram_gb += app["ram"].as_f64().unwrap_or(0.0) / 1000.0;
            totals.ssd_gb += app["hdd"].as_f64().unwrap_or(0.0);
        }
    }
    totals
}

/// An error occurring while collecting or recording network statistics.
#[derive(Error, Debug)]
pub enum StatsError {
    /// Collection did not finish within the configured deadline.
    #[error("network statistics collection timed out: {0}")]
    Timeout(#[from] Elapsed),
    /// The snapshot could not be recorded.
    #[error("failed to record network statistics snapshot: {0}")]
    Storage(#[from] StorageError),
}
