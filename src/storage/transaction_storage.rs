use crate::storage::StoredTransaction;

/// One calendar day of revenue for an address.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DailyRevenue {
    /// Calendar day, `YYYY-MM-DD`, derived from the payment timestamps.
    pub date: String,
    /// Sum of payment values on that day.
    pub total: f64,
    /// Number of payments on that day.
    pub count: u64,
}

/// All-time revenue aggregate for an address.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct RevenueTotal {
    /// Sum of payment values.
    pub total: f64,
    /// Number of payments.
    pub count: u64,
    /// Timestamp of the earliest payment, if any.
    pub first_timestamp: Option<i64>,
    /// Timestamp of the latest payment, if any.
    pub last_timestamp: Option<i64>,
}

/// Revenue aggregate over a block height range.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct RangeRevenue {
    /// Sum of payment values in the range.
    pub total: f64,
    /// Number of payments in the range.
    pub count: u64,
}

/// Filter for paginated transaction listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    /// Restrict to a single recipient address.
    pub address: Option<String>,
    /// Case-insensitive substring matched against the transaction hash, the
    /// sender address, and the stringified value.
    pub search: Option<String>,
    /// Rows to skip.
    pub offset: u64,
    /// Maximum rows to return.
    pub limit: u64,
}

/// The [`TransactionStorage`] trait describes how payment rows are stored
/// and aggregated.
pub trait TransactionStorage: Send + Sync {
    /// Error type for the storage layer.
    type Error: std::error::Error + Send + 'static;

    /// Insert a payment row. Returns `false` if a row with the same
    /// `(tx_hash, vout_index, address)` triple already existed, in which case
    /// the store is unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the row could not be inserted.
    fn insert_transaction(&mut self, transaction: StoredTransaction)
        -> Result<bool, Self::Error>;

    /// Set the sender of the rows matching `(tx_hash, block_height,
    /// vout_index)`. Returns `false` if no row matched.
    ///
    /// # Errors
    ///
    /// Returns an error if the update could not be performed.
    fn set_sender(
        &mut self,
        tx_hash: &str,
        block_height: u64,
        vout_index: u32,
        sender: &str,
    ) -> Result<bool, Self::Error>;

    /// Up to `limit` rows with no resolved sender, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows could not be read.
    fn unresolved_senders(&self, limit: u64) -> Result<Vec<StoredTransaction>, Self::Error>;

    /// Per-calendar-day revenue for `address` since `since`, ascending by
    /// date.
    ///
    /// # Errors
    ///
    /// Returns an error if the aggregate could not be computed.
    fn daily_revenue(&self, address: &str, since: i64)
        -> Result<Vec<DailyRevenue>, Self::Error>;

    /// All-time revenue aggregate for `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the aggregate could not be computed.
    fn total_revenue(&self, address: &str) -> Result<RevenueTotal, Self::Error>;

    /// Revenue for `address` over block heights `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the aggregate could not be computed.
    fn revenue_in_block_range(
        &self,
        address: &str,
        start: u64,
        end: u64,
    ) -> Result<RangeRevenue, Self::Error>;

    /// One page of payment rows matching `filter`, newest first, along with
    /// the total number of matching rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows could not be read.
    fn transaction_page(
        &self,
        filter: &TransactionFilter,
    ) -> Result<(Vec<StoredTransaction>, u64), Self::Error>;

    /// Total number of stored payment rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the count could not be read.
    fn transaction_count(&self) -> Result<u64, Self::Error>;

    /// Delete payment rows with a timestamp strictly below `cutoff`,
    /// returning the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the sweep could not be performed.
    fn prune_transactions_below(&mut self, cutoff: i64) -> Result<u64, Self::Error>;
}
