use crate::stats::{NodeStatsSnapshot, UtilizationSnapshot};

/// The [`StatsStorage`] trait describes how network statistics snapshots are
/// stored. Snapshots are produced by the external snapshot scheduler; the
/// store only records and serves them.
pub trait StatsStorage: Send + Sync {
    /// Error type for the storage layer.
    type Error: std::error::Error + Send + 'static;

    /// Record a fleet composition snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot could not be recorded.
    fn insert_node_stats(&mut self, snapshot: NodeStatsSnapshot) -> Result<(), Self::Error>;

    /// Record a resource utilization snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot could not be recorded.
    fn insert_utilization_stats(
        &mut self,
        snapshot: UtilizationSnapshot,
    ) -> Result<(), Self::Error>;

    /// All fleet composition snapshots taken at or after `since`, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshots could not be read.
    fn node_stats_since(&self, since: i64) -> Result<Vec<NodeStatsSnapshot>, Self::Error>;

    /// All utilization snapshots taken at or after `since`, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshots could not be read.
    fn utilization_stats_since(
        &self,
        since: i64,
    ) -> Result<Vec<UtilizationSnapshot>, Self::Error>;

    /// Whether a fleet composition snapshot exists within `tolerance` seconds
    /// of `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if existence could not be determined.
    fn has_node_stats_within(&self, timestamp: i64, tolerance: i64)
        -> Result<bool, Self::Error>;

    /// Whether a utilization snapshot exists within `tolerance` seconds of
    /// `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if existence could not be determined.
    fn has_utilization_stats_within(
        &self,
        timestamp: i64,
        tolerance: i64,
    ) -> Result<bool, Self::Error>;
}
