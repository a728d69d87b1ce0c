//! # `fluxrevenue`: Index Revenue to Your Flux Addresses
//!
//! This library keeps a local store of blocks and payments to a set of
//! watched addresses synchronized with a Flux daemon, and serves aggregated
//! revenue queries (per address, per calendar day, per block window) over
//! that store.
//!
//! The [`RevenueIndexer`] maintains two moving frontiers at once: new blocks
//! behind the chain tip, and historical blocks back to the retention floor.
//! Each sync cycle fetches a bounded budget of blocks in parallel batches,
//! extracts payments to the watched addresses, resolves senders through the
//! daemon, and commits each batch atomically. Once the retention window is
//! nearly full, a gap-detection pass re-scans the edges of the window and
//! fills anything missing.
//!
//! ## Reliability
//!
//! Per-block fetch failures never abort a cycle: failed heights are logged,
//! the cycle moves on, and the next cycle's planner (and eventually the
//! gap-fill pass) rediscovers whatever is missing. Inserts are idempotent,
//! so re-scanning a range after a crash or partial failure is harmless. The
//! store is the only durable state; deleting the database file is a clean
//! reset.
//!
//! ## Performance
//!
//! It is strongly recommended that you run your own Flux node and point the
//! indexer at it. The public API gateway works, but rate limits make the
//! initial backfill slow; the `conservative` optimization preset exists for
//! exactly that situation.
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use fluxrevenue::{storage::stores::Sqlite, RevenueIndexerBuilder};
//!
//! let store = Sqlite::new("fluxrevenue.db")?;
//!
//! let indexer = RevenueIndexerBuilder::new(
//!     vec!["t1YourNodeAddress".to_string()],
//!     store,
//! )
//! .daemon_url("http://127.0.0.1:16127".to_string())
//! .build()
//! .await?;
//!
//! indexer.run().await?;
//! #   Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! ### `sqlite`
//!
//! Enabled by default. Provides the durable
//! [`Sqlite`](storage::stores::Sqlite) storage implementation used by the
//! `fluxrevenued` binary.
//!
//! ### `in-memory`
//!
//! Enables the [`InMemory`](storage::stores::InMemory) storage
//! implementation, useful for tests and ephemeral deployments.

#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![warn(clippy::cargo)]
#![warn(clippy::panic)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::module_name_repetitions)]

mod aggregator;
mod analyzer;
mod block;
mod caching;
pub mod config;
pub mod daemon_client;
mod indexer;
mod pubsub;
pub mod stats;
pub mod storage;
mod sync;

pub use aggregator::{
    AddressRevenue, BlockPeriod, BlockRangeRevenue, Pagination, RevenueSummary, TransactionPage,
    TransactionRecord,
};
pub use analyzer::{analyze_block, Payment, Sender};
pub use block::{Block, BlockTx, ScriptPubKey, TxInput, TxOutput};
use daemon_client::RpcError;
pub use indexer::{IndexerStatus, RevenueIndexer, RevenueIndexerBuilder};
pub use pubsub::{Subscriber, SubscriberError};
use stats::StatsError;
use storage::StorageError;
pub use sync::{CycleMetrics, CycleOutcome, SyncError, SyncStatus, SyncTuning};
use thiserror::Error;

/// Library's custom error type.
#[derive(Error, Debug)]
pub enum FluxRevenueError {
    /// An error originating from a daemon API call.
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
    /// An error storing/retrieving indexed data.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// A sync cycle aborted.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
    /// Network statistics collection failed.
    #[error("network statistics error: {0}")]
    Stats(#[from] StatsError),
    /// Failure to parse a configured value.
    #[error("failed to parse {datatype} from \"{input}\": {error}")]
    Parse {
        /// Type to parse.
        datatype: &'static str,
        /// Input to parse.
        input: String,
        /// Error encountered.
        error: String,
    },
    /// The sync loop is already running.
    #[error("sync loop is already running")]
    AlreadyRunning,
    /// The sync loop exited with a panic.
    #[error("sync loop exited abnormally: {0}")]
    Threading(#[from] tokio::task::JoinError),
    /// The sync loop could not be stopped because the stop signal was not
    /// sent.
    #[error("sync loop could not be stopped because the stop signal was not sent: {0}")]
    StopSignal(String),
}
