use crate::storage::{Frontier, StoredBlock};

/// The [`BlockStorage`] trait describes how synced block rows are stored.
pub trait BlockStorage: Send + Sync {
    /// Error type for the storage layer.
    type Error: std::error::Error + Send + 'static;

    /// Insert a block row. Returns `false` if a row for that height already
    /// existed, in which case the store is unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the block could not be inserted.
    fn insert_block(&mut self, block: StoredBlock) -> Result<bool, Self::Error>;

    /// The stored frontier: row count plus highest and lowest stored heights.
    ///
    /// # Errors
    ///
    /// Returns an error if the frontier could not be read.
    fn frontier(&self) -> Result<Frontier, Self::Error>;

    /// All stored heights within `[start, end]`, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the heights could not be read.
    fn heights_in_range(&self, start: u64, end: u64) -> Result<Vec<u64>, Self::Error>;

    /// The timestamp of the block at `height`, if stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the block could not be read.
    fn block_timestamp(&self, height: u64) -> Result<Option<i64>, Self::Error>;

    /// Delete blocks with a timestamp strictly below `cutoff`, returning the
    /// number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the sweep could not be performed.
    fn prune_blocks_below(&mut self, cutoff: i64) -> Result<u64, Self::Error>;
}
