//! Read-side composition of store queries into the shapes the HTTP handlers
//! serve. Everything here is a thin layer over the storage client; partial
//! data is never withheld, so an empty result set is a legitimate answer
//! while sync has not yet reached a range.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    daemon_client::UNKNOWN_SENDER,
    storage::{
        Client as StorageClient, DailyRevenue, RangeRevenue, RevenueTotal, Storage, StorageError,
        TransactionFilter,
    },
};

/// Block windows used by block-based period queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BlockPeriod {
    /// One day of blocks.
    Day,
    /// One week of blocks.
    Week,
    /// One month of blocks.
    Month,
    /// One year of blocks.
    Year,
}

impl BlockPeriod {
    /// The number of blocks in this period, at 720 blocks per day.
    #[must_use]
    pub fn blocks(self) -> u64 {
        match self {
            BlockPeriod::Day => 720,
            BlockPeriod::Week => 5_040,
            BlockPeriod::Month => 21_600,
            BlockPeriod::Year => 262_800,
        }
    }

    fn from_blocks(blocks: u64) -> Option<BlockPeriod> {
        [
            BlockPeriod::Day,
            BlockPeriod::Week,
            BlockPeriod::Month,
            BlockPeriod::Year,
        ]
        .into_iter()
        .find(|period| period.blocks() == blocks)
    }
}

/// Revenue of one address over all time, with its daily series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AddressRevenue {
    /// All-time totals.
    #[serde(flatten)]
    pub total: RevenueTotal,
    /// Per-day series within the queried window.
    pub daily: Vec<DailyRevenue>,
}

/// A calendar-time revenue report over one or more addresses.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RevenueSummary {
    /// Combined daily series, summed across addresses and sorted by date.
    pub daily: Vec<DailyRevenue>,
    /// Sum over the daily series.
    pub total: f64,
    /// Payment count over the daily series.
    pub count: u64,
    /// Per-address breakdown, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<BTreeMap<String, AddressRevenue>>,
}

/// A block-window revenue report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlockRangeRevenue {
    /// First height of the window, inclusive.
    pub start_height: u64,
    /// Last height of the window, inclusive.
    pub end_height: u64,
    /// Human-readable period description, e.g. `"week"` or `"1234 blocks"`.
    pub period: String,
    /// Sum over all queried addresses.
    pub total: f64,
    /// Payment count over all queried addresses.
    pub count: u64,
    /// Per-address totals within the window.
    pub addresses: BTreeMap<String, RangeRevenue>,
}

/// One row of the paginated transaction listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Height of the containing block.
    pub block_height: u64,
    /// Chain-assigned transaction identifier.
    pub tx_hash: String,
    /// Index of the paying output.
    pub vout_index: u32,
    /// Watched recipient address.
    pub address: String,
    /// Sender address, or `"Unknown"` while unresolved.
    pub from_address: String,
    /// Amount received, in whole coins.
    pub value: f64,
    /// Timestamp of the containing block.
    pub timestamp: i64,
}

/// Pagination details accompanying a transaction listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Pagination {
    /// 1-based page number.
    pub page: u64,
    /// Page size.
    pub limit: u64,
    /// Matching rows across all pages.
    pub total: u64,
    /// Total pages.
    pub pages: u64,
}

/// A page of transactions plus its pagination envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransactionPage {
    /// Rows on this page, newest first.
    pub transactions: Vec<TransactionRecord>,
    /// Pagination details.
    pub pagination: Pagination,
}

/// Largest accepted page size.
const MAX_PAGE_LIMIT: u64 = 500;

pub(crate) struct Aggregator<S: Storage> {
    store: StorageClient<S>,
    watched: Vec<String>,
}

impl<S: Storage + 'static> Aggregator<S> {
    pub(crate) fn new(store: StorageClient<S>, watched: Vec<String>) -> Aggregator<S> {
        Aggregator { store, watched }
    }

    /// Calendar-time revenue over the past `days` days. With no explicit
    /// `addresses`, all watched addresses are included.
    pub(crate) async fn revenue(
        &self,
        days: u64,
        addresses: &[String],
        breakdown: bool,
    ) -> Result<RevenueSummary, StorageError> {
        let addresses = self.select_addresses(addresses);
        let since = chrono::Utc::now().timestamp()
            - i64::try_from(days).unwrap_or(i64::MAX).saturating_mul(86_400);

        // Sum per-address daily rows into one combined series keyed by date.
        let mut combined: BTreeMap<String, (f64, u64)> = BTreeMap::new();
        let mut details = BTreeMap::new();
        for address in &addresses {
            let daily = self.store.daily_revenue(address.clone(), since).await?;
            for day in &daily {
                let entry = combined.entry(day.date.clone()).or_default();
                entry.0 += day.total;
                entry.1 += day.count;
            }
            if breakdown {
                let total = self.store.total_revenue(address.clone()).await?;
                details.insert(address.clone(), AddressRevenue { total, daily });
            }
        }

        let daily: Vec<DailyRevenue> = combined
            .into_iter()
            .map(|(date, (total, count))| DailyRevenue { date, total, count })
            .collect();
        let total = daily.iter().map(|day| day.total).sum();
        let count = daily.iter().map(|day| day.count).sum();

        Ok(RevenueSummary {
            daily,
            total,
            count,
            breakdown: breakdown.then_some(details),
        })
    }

    /// Revenue over the last `blocks` blocks, resolved against the highest
    /// stored height at query time.
    pub(crate) async fn revenue_by_blocks(
        &self,
        blocks: u64,
        address: Option<&str>,
    ) -> Result<BlockRangeRevenue, StorageError> {
        let frontier = self.store.frontier().await?;
        let end_height = frontier.highest.unwrap_or(0);
        let start_height = end_height.saturating_sub(blocks);
        let period = BlockPeriod::from_blocks(blocks)
            .map_or_else(|| format!("{blocks} blocks"), |period| period.to_string());

        let addresses = match address {
            Some(address) => vec![address.to_string()],
            None => self.watched.clone(),
        };

        let mut report = BlockRangeRevenue {
            start_height,
            end_height,
            period,
            ..BlockRangeRevenue::default()
        };
        for address in addresses {
            let range = self
                .store
                .revenue_in_block_range(address.clone(), start_height, end_height)
                .await?;
            report.total += range.total;
            report.count += range.count;
            report.addresses.insert(address, range);
        }
        Ok(report)
    }

    /// All-time totals and daily series for every watched address.
    pub(crate) async fn address_breakdown(
        &self,
    ) -> Result<BTreeMap<String, AddressRevenue>, StorageError> {
        let mut breakdown = BTreeMap::new();
        for address in &self.watched {
            let total = self.store.total_revenue(address.clone()).await?;
            let daily = self.store.daily_revenue(address.clone(), 0).await?;
            breakdown.insert(address.clone(), AddressRevenue { total, daily });
        }
        Ok(breakdown)
    }

    /// One page of stored payments, newest first. `page` is 1-based; `limit`
    /// is clamped to a sane range. `search` matches substrings of the
    /// transaction hash, the sender, or the stringified value.
    pub(crate) async fn transactions(
        &self,
        address: Option<&str>,
        page: u64,
        limit: u64,
        search: Option<&str>,
    ) -> Result<TransactionPage, StorageError> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let filter = TransactionFilter {
            address: address.map(ToString::to_string),
            search: search
                .map(str::trim)
                .filter(|search| !search.is_empty())
                .map(ToString::to_string),
            offset: (page - 1) * limit,
            limit,
        };

        let (rows, total) = self.store.transaction_page(filter).await?;
        let transactions = rows
            .into_iter()
            .map(|row| TransactionRecord {
                block_height: row.block_height,
                tx_hash: row.tx_hash,
                vout_index: row.vout_index,
                address: row.address,
                from_address: row
                    .from_address
                    .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
                value: row.value,
                timestamp: row.timestamp,
            })
            .collect();

        Ok(TransactionPage {
            transactions,
            pagination: Pagination {
                page,
                limit,
                total,
                pages: total.div_ceil(limit),
            },
        })
    }

    fn select_addresses(&self, requested: &[String]) -> Vec<String> {
        if requested.is_empty() {
            self.watched.clone()
        } else {
            requested.to_vec()
        }
    }
}
