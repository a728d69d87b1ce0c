use std::str::FromStr;

use log::{debug, warn};
use sqlite::{Connection, ConnectionThreadSafe, Row, State, Value};
use thiserror::Error;

use crate::{
    stats::{DataSource, NodeStatsSnapshot, UtilizationSnapshot},
    storage::{
        BatchOutcome, BlockStorage, DailyRevenue, Frontier, RangeRevenue, RevenueTotal,
        StatsStorage, Storage, StoredBlock, StoredTransaction, TransactionFilter,
        TransactionStorage,
    },
};

/// `SQLite` database.
pub struct Sqlite {
    db: ConnectionThreadSafe,
}

impl Sqlite {
    /// Open a [`SQLite`](sqlite) database at the specified location, creating
    /// a new database if one does not exist. Pass `":memory:"` for a
    /// transient in-process database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database could not be opened at the specified
    /// path, or if the schema could not be prepared.
    pub fn new(path: &str) -> Result<Sqlite, SqliteStorageError> {
        let db = Connection::open_thread_safe(path)?;
        debug!("Connection to SQLite database at {path} established");

        // Performance pragmas; correctness does not depend on them.
        db.execute("PRAGMA journal_mode = WAL;")?;
        db.execute("PRAGMA synchronous = NORMAL;")?;
        db.execute("PRAGMA cache_size = -65536;")?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                height    INTEGER NOT NULL PRIMARY KEY,
                hash      TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                synced_at INTEGER NOT NULL
            );",
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                block_height INTEGER NOT NULL,
                tx_hash      TEXT NOT NULL,
                vout_index   INTEGER NOT NULL,
                address      TEXT NOT NULL,
                from_address TEXT,
                value        REAL NOT NULL,
                timestamp    INTEGER NOT NULL,
                PRIMARY KEY (tx_hash, vout_index, address)
            );",
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_address_timestamp
                ON transactions (address, timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_transactions_address_height
                ON transactions (address, block_height DESC);
            CREATE INDEX IF NOT EXISTS idx_transactions_height
                ON transactions (block_height);
            CREATE INDEX IF NOT EXISTS idx_transactions_hash_vout
                ON transactions (tx_hash, vout_index);",
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS network_node_stats (
                timestamp        INTEGER NOT NULL PRIMARY KEY,
                cumulus          INTEGER NOT NULL,
                nimbus           INTEGER NOT NULL,
                stratus          INTEGER NOT NULL,
                arcane           INTEGER NOT NULL,
                total            INTEGER NOT NULL,
                data_source      TEXT NOT NULL,
                api_success_rate REAL NOT NULL,
                note             TEXT
            );",
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS network_utilization_stats (
                timestamp        INTEGER NOT NULL PRIMARY KEY,
                node_count       INTEGER NOT NULL,
                total_cores      INTEGER NOT NULL,
                total_ram_gb     REAL NOT NULL,
                total_ssd_gb     REAL NOT NULL,
                utilized_cores   REAL NOT NULL,
                utilized_ram_gb  REAL NOT NULL,
                utilized_ssd_gb  REAL NOT NULL,
                cores_percent    REAL NOT NULL,
                ram_percent      REAL NOT NULL,
                ssd_percent      REAL NOT NULL,
                running_apps     INTEGER NOT NULL,
                data_source      TEXT NOT NULL,
                api_success_rate REAL NOT NULL,
                note             TEXT
            );",
        )?;

        Ok(Sqlite { db })
    }

    fn insert_block_row(&self, block: &StoredBlock) -> Result<bool, SqliteStorageError> {
        let mut statement = self.db.prepare(
            "INSERT OR IGNORE INTO blocks (height, hash, timestamp, synced_at)
            VALUES (:height, :hash, :timestamp, :synced_at);",
        )?;
        statement.bind::<&[(_, Value)]>(
            &[
                (":height", int64(block.height)?.into()),
                (":hash", block.hash.as_str().into()),
                (":timestamp", block.timestamp.into()),
                (":synced_at", block.synced_at.into()),
            ][..],
        )?;
        if statement.next()? == State::Row {
            warn!(
                "Block insertion returned an unexpected row: {:?}",
                statement.read::<Value, _>(0)?
            );
        }
        Ok(self.db.change_count() > 0)
    }

    fn insert_transaction_row(
        &self,
        transaction: &StoredTransaction,
    ) -> Result<bool, SqliteStorageError> {
        let mut statement = self.db.prepare(
            "INSERT OR IGNORE INTO transactions
                (block_height, tx_hash, vout_index, address, from_address, value, timestamp)
            VALUES (:height, :tx_hash, :vout_index, :address, :from_address, :value, :timestamp);",
        )?;
        statement.bind::<&[(_, Value)]>(
            &[
                (":height", int64(transaction.block_height)?.into()),
                (":tx_hash", transaction.tx_hash.as_str().into()),
                (":vout_index", i64::from(transaction.vout_index).into()),
                (":address", transaction.address.as_str().into()),
                (
                    ":from_address",
                    match transaction.from_address.as_deref() {
                        Some(from) => from.into(),
                        None => Value::Null,
                    },
                ),
                (":value", transaction.value.into()),
                (":timestamp", transaction.timestamp.into()),
            ][..],
        )?;
        if statement.next()? == State::Row {
            warn!(
                "Transaction insertion returned an unexpected row: {:?}",
                statement.read::<Value, _>(0)?
            );
        }
        Ok(self.db.change_count() > 0)
    }

    fn insert_all(
        &self,
        blocks: &[StoredBlock],
        transactions: &[StoredTransaction],
    ) -> Result<BatchOutcome, SqliteStorageError> {
        let mut outcome = BatchOutcome::default();
        for block in blocks {
            if self.insert_block_row(block)? {
                outcome.blocks_inserted += 1;
            } else {
                outcome.duplicates_skipped += 1;
            }
        }
        for transaction in transactions {
            if self.insert_transaction_row(transaction)? {
                outcome.transactions_inserted += 1;
            } else {
                outcome.duplicates_skipped += 1;
            }
        }
        Ok(outcome)
    }
}

/// Convert an unsigned height to the i64 `sqlite` binds.
fn int64(value: u64) -> Result<i64, SqliteStorageError> {
    i64::try_from(value).map_err(|_| SqliteStorageError::HeightRange(value))
}

impl BlockStorage for Sqlite {
    type Error = SqliteStorageError;

    fn insert_block(&mut self, block: StoredBlock) -> Result<bool, Self::Error> {
        self.insert_block_row(&block)
    }

    fn frontier(&self) -> Result<Frontier, Self::Error> {
        let mut statement = self
            .db
            .prepare("SELECT COUNT(*), MIN(height), MAX(height) FROM blocks;")?;
        if statement.next()? == State::Done {
            return Ok(Frontier::default());
        }
        let count = statement.read::<i64, _>(0)?;
        let lowest = statement.read::<Option<i64>, _>(1)?;
        let highest = statement.read::<Option<i64>, _>(2)?;
        Ok(Frontier {
            count: count.unsigned_abs(),
            highest: highest.map(i64::unsigned_abs),
            lowest: lowest.map(i64::unsigned_abs),
        })
    }

    fn heights_in_range(&self, start: u64, end: u64) -> Result<Vec<u64>, Self::Error> {
        let mut statement = self.db.prepare(
            "SELECT height FROM blocks
            WHERE height BETWEEN :start AND :end ORDER BY height;",
        )?;
        statement.bind::<&[(_, Value)]>(
            &[(":start", int64(start)?.into()), (":end", int64(end)?.into())][..],
        )?;

        let mut heights = Vec::new();
        while statement.next()? == State::Row {
            heights.push(statement.read::<i64, _>(0)?.unsigned_abs());
        }
        Ok(heights)
    }

    fn block_timestamp(&self, height: u64) -> Result<Option<i64>, Self::Error> {
        let mut statement = self
            .db
            .prepare("SELECT timestamp FROM blocks WHERE height = :height;")?;
        statement.bind((":height", int64(height)?))?;
        if statement.next()? == State::Done {
            return Ok(None);
        }
        Ok(Some(statement.read::<i64, _>(0)?))
    }

    fn prune_blocks_below(&mut self, cutoff: i64) -> Result<u64, Self::Error> {
        let mut statement = self
            .db
            .prepare("DELETE FROM blocks WHERE timestamp < :cutoff;")?;
        statement.bind((":cutoff", cutoff))?;
        while statement.next()? == State::Row {}
        Ok(self.db.change_count() as u64)
    }
}

impl TransactionStorage for Sqlite {
    type Error = SqliteStorageError;

    fn insert_transaction(
        &mut self,
        transaction: StoredTransaction,
    ) -> Result<bool, Self::Error> {
        self.insert_transaction_row(&transaction)
    }

    fn set_sender(
        &mut self,
        tx_hash: &str,
        block_height: u64,
        vout_index: u32,
        sender: &str,
    ) -> Result<bool, Self::Error> {
        let mut statement = self.db.prepare(
            "UPDATE transactions SET from_address = :from_address
            WHERE tx_hash = :tx_hash
                AND block_height = :height
                AND vout_index = :vout_index;",
        )?;
        statement.bind::<&[(_, Value)]>(
            &[
                (":from_address", sender.into()),
                (":tx_hash", tx_hash.into()),
                (":height", int64(block_height)?.into()),
                (":vout_index", i64::from(vout_index).into()),
            ][..],
        )?;
        while statement.next()? == State::Row {}
        Ok(self.db.change_count() > 0)
    }

    fn unresolved_senders(&self, limit: u64) -> Result<Vec<StoredTransaction>, Self::Error> {
        let mut statement = self.db.prepare(
            "SELECT block_height, tx_hash, vout_index, address, from_address, value, timestamp
            FROM transactions
            WHERE from_address IS NULL
            ORDER BY block_height DESC
            LIMIT :limit;",
        )?;
        statement.bind((":limit", int64(limit)?))?;

        let mut rows = Vec::new();
        while statement.next()? == State::Row {
            rows.push(read_transaction_row(&statement)?);
        }
        Ok(rows)
    }

    fn daily_revenue(
        &self,
        address: &str,
        since: i64,
    ) -> Result<Vec<DailyRevenue>, Self::Error> {
        let mut statement = self.db.prepare(
            "SELECT date(timestamp, 'unixepoch') AS day, SUM(value), COUNT(*)
            FROM transactions
            WHERE address = :address AND timestamp >= :since
            GROUP BY day
            ORDER BY day;",
        )?;
        statement.bind::<&[(_, Value)]>(
            &[(":address", address.into()), (":since", since.into())][..],
        )?;

        let mut days = Vec::new();
        while statement.next()? == State::Row {
            days.push(DailyRevenue {
                date: statement.read::<String, _>(0)?,
                total: statement.read::<f64, _>(1)?,
                count: statement.read::<i64, _>(2)?.unsigned_abs(),
            });
        }
        Ok(days)
    }

    fn total_revenue(&self, address: &str) -> Result<RevenueTotal, Self::Error> {
        let mut statement = self.db.prepare(
            "SELECT COALESCE(SUM(value), 0), COUNT(*), MIN(timestamp), MAX(timestamp)
            FROM transactions
            WHERE address = :address;",
        )?;
        statement.bind((":address", address))?;
        if statement.next()? == State::Done {
            return Ok(RevenueTotal::default());
        }
        Ok(RevenueTotal {
            total: statement.read::<f64, _>(0)?,
            count: statement.read::<i64, _>(1)?.unsigned_abs(),
            first_timestamp: statement.read::<Option<i64>, _>(2)?,
            last_timestamp: statement.read::<Option<i64>, _>(3)?,
        })
    }

    fn revenue_in_block_range(
        &self,
        address: &str,
        start: u64,
        end: u64,
    ) -> Result<RangeRevenue, Self::Error> {
        let mut statement = self.db.prepare(
            "SELECT COALESCE(SUM(value), 0), COUNT(*)
            FROM transactions
            WHERE address = :address AND block_height BETWEEN :start AND :end;",
        )?;
        statement.bind::<&[(_, Value)]>(
            &[
                (":address", address.into()),
                (":start", int64(start)?.into()),
                (":end", int64(end)?.into()),
            ][..],
        )?;
        if statement.next()? == State::Done {
            return Ok(RangeRevenue::default());
        }
        Ok(RangeRevenue {
            total: statement.read::<f64, _>(0)?,
            count: statement.read::<i64, _>(1)?.unsigned_abs(),
        })
    }

    fn transaction_page(
        &self,
        filter: &TransactionFilter,
    ) -> Result<(Vec<StoredTransaction>, u64), Self::Error> {
        // The WHERE clause is assembled from fixed fragments; only values are
        // bound, never user-controlled SQL.
        let mut clauses = Vec::new();
        let mut bindings: Vec<(&str, Value)> = Vec::new();
        if let Some(address) = filter.address.as_deref() {
            clauses.push("address = :address");
            bindings.push((":address", address.into()));
        }
        if let Some(search) = filter.search.as_deref() {
            clauses.push(
                "(tx_hash LIKE :search
                    OR COALESCE(from_address, 'Unknown') LIKE :search
                    OR CAST(value AS TEXT) LIKE :search)",
            );
            bindings.push((":search", format!("%{search}%").into()));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let mut count_statement = self
            .db
            .prepare(format!("SELECT COUNT(*) FROM transactions {where_clause};"))?;
        count_statement.bind::<&[(_, Value)]>(&bindings[..])?;
        let total = if count_statement.next()? == State::Row {
            count_statement.read::<i64, _>(0)?.unsigned_abs()
        } else {
            0
        };

        let mut statement = self.db.prepare(format!(
            "SELECT block_height, tx_hash, vout_index, address, from_address, value, timestamp
            FROM transactions {where_clause}
            ORDER BY timestamp DESC, block_height DESC, vout_index
            LIMIT :limit OFFSET :offset;"
        ))?;
        bindings.push((":limit", int64(filter.limit)?.into()));
        bindings.push((":offset", int64(filter.offset)?.into()));
        statement.bind::<&[(_, Value)]>(&bindings[..])?;

        let mut rows = Vec::new();
        while statement.next()? == State::Row {
            rows.push(read_transaction_row(&statement)?);
        }
        Ok((rows, total))
    }

    fn transaction_count(&self) -> Result<u64, Self::Error> {
        let mut statement = self.db.prepare("SELECT COUNT(*) FROM transactions;")?;
        if statement.next()? == State::Done {
            return Ok(0);
        }
        Ok(statement.read::<i64, _>(0)?.unsigned_abs())
    }

    fn prune_transactions_below(&mut self, cutoff: i64) -> Result<u64, Self::Error> {
        let mut statement = self
            .db
            .prepare("DELETE FROM transactions WHERE timestamp < :cutoff;")?;
        statement.bind((":cutoff", cutoff))?;
        while statement.next()? == State::Row {}
        Ok(self.db.change_count() as u64)
    }
}

fn read_transaction_row(
    statement: &sqlite::Statement<'_>,
) -> Result<StoredTransaction, SqliteStorageError> {
    Ok(StoredTransaction {
        block_height: statement.read::<i64, _>(0)?.unsigned_abs(),
        tx_hash: statement.read::<String, _>(1)?,
        vout_index: u32::try_from(statement.read::<i64, _>(2)?).unwrap_or(0),
        address: statement.read::<String, _>(3)?,
        from_address: statement.read::<Option<String>, _>(4)?,
        value: statement.read::<f64, _>(5)?,
        timestamp: statement.read::<i64, _>(6)?,
    })
}

impl StatsStorage for Sqlite {
    type Error = SqliteStorageError;

    fn insert_node_stats(&mut self, snapshot: NodeStatsSnapshot) -> Result<(), Self::Error> {
        let mut statement = self.db.prepare(
            "INSERT OR REPLACE INTO network_node_stats
                (timestamp, cumulus, nimbus, stratus, arcane, total,
                 data_source, api_success_rate, note)
            VALUES (:timestamp, :cumulus, :nimbus, :stratus, :arcane, :total,
                 :data_source, :api_success_rate, :note);",
        )?;
        statement.bind::<&[(_, Value)]>(
            &[
                (":timestamp", snapshot.timestamp.into()),
                (":cumulus", int64(snapshot.cumulus)?.into()),
                (":nimbus", int64(snapshot.nimbus)?.into()),
                (":stratus", int64(snapshot.stratus)?.into()),
                (":arcane", int64(snapshot.arcane)?.into()),
                (":total", int64(snapshot.total)?.into()),
                (":data_source", snapshot.data_source.to_string().into()),
                (":api_success_rate", snapshot.api_success_rate.into()),
                (
                    ":note",
                    match snapshot.note.as_deref() {
                        Some(note) => note.into(),
                        None => Value::Null,
                    },
                ),
            ][..],
        )?;
        while statement.next()? == State::Row {}
        Ok(())
    }

    fn insert_utilization_stats(
        &mut self,
        snapshot: UtilizationSnapshot,
    ) -> Result<(), Self::Error> {
        let mut statement = self.db.prepare(
            "INSERT OR REPLACE INTO network_utilization_stats
                (timestamp, node_count, total_cores, total_ram_gb, total_ssd_gb,
                 utilized_cores, utilized_ram_gb, utilized_ssd_gb,
                 cores_percent, ram_percent, ssd_percent, running_apps,
                 data_source, api_success_rate, note)
            VALUES (:timestamp, :node_count, :total_cores, :total_ram_gb, :total_ssd_gb,
                 :utilized_cores, :utilized_ram_gb, :utilized_ssd_gb,
                 :cores_percent, :ram_percent, :ssd_percent, :running_apps,
                 :data_source, :api_success_rate, :note);",
        )?;
        statement.bind::<&[(_, Value)]>(
            &[
                (":timestamp", snapshot.timestamp.into()),
                (":node_count", int64(snapshot.node_count)?.into()),
                (":total_cores", int64(snapshot.total_cores)?.into()),
                (":total_ram_gb", snapshot.total_ram_gb.into()),
                (":total_ssd_gb", snapshot.total_ssd_gb.into()),
                (":utilized_cores", snapshot.utilized_cores.into()),
                (":utilized_ram_gb", snapshot.utilized_ram_gb.into()),
                (":utilized_ssd_gb", snapshot.utilized_ssd_gb.into()),
                (":cores_percent", snapshot.cores_percent.into()),
                (":ram_percent", snapshot.ram_percent.into()),
                (":ssd_percent", snapshot.ssd_percent.into()),
                (":running_apps", int64(snapshot.running_apps)?.into()),
                (":data_source", snapshot.data_source.to_string().into()),
                (":api_success_rate", snapshot.api_success_rate.into()),
                (
                    ":note",
                    match snapshot.note.as_deref() {
                        Some(note) => note.into(),
                        None => Value::Null,
                    },
                ),
            ][..],
        )?;
        while statement.next()? == State::Row {}
        Ok(())
    }

    fn node_stats_since(&self, since: i64) -> Result<Vec<NodeStatsSnapshot>, Self::Error> {
        let mut statement = self.db.prepare(
            "SELECT timestamp, cumulus, nimbus, stratus, arcane, total,
                data_source, api_success_rate, note
            FROM network_node_stats
            WHERE timestamp >= :since
            ORDER BY timestamp;",
        )?;
        statement.bind((":since", since))?;

        let mut snapshots = Vec::new();
        while statement.next()? == State::Row {
            snapshots.push(NodeStatsSnapshot {
                timestamp: statement.read::<i64, _>(0)?,
                cumulus: statement.read::<i64, _>(1)?.unsigned_abs(),
                nimbus: statement.read::<i64, _>(2)?.unsigned_abs(),
                stratus: statement.read::<i64, _>(3)?.unsigned_abs(),
                arcane: statement.read::<i64, _>(4)?.unsigned_abs(),
                total: statement.read::<i64, _>(5)?.unsigned_abs(),
                data_source: read_data_source(&statement.read::<String, _>(6)?),
                api_success_rate: statement.read::<f64, _>(7)?,
                note: statement.read::<Option<String>, _>(8)?,
            });
        }
        Ok(snapshots)
    }

    fn utilization_stats_since(
        &self,
        since: i64,
    ) -> Result<Vec<UtilizationSnapshot>, Self::Error> {
        let mut statement = self.db.prepare(
            "SELECT timestamp, node_count, total_cores, total_ram_gb, total_ssd_gb,
                utilized_cores, utilized_ram_gb, utilized_ssd_gb,
                cores_percent, ram_percent, ssd_percent, running_apps,
                data_source, api_success_rate, note
            FROM network_utilization_stats
            WHERE timestamp >= :since
            ORDER BY timestamp;",
        )?;
        statement.bind((":since", since))?;

        let mut snapshots = Vec::new();
        while statement.next()? == State::Row {
            snapshots.push(UtilizationSnapshot {
                timestamp: statement.read::<i64, _>(0)?,
                node_count: statement.read::<i64, _>(1)?.unsigned_abs(),
                total_cores: statement.read::<i64, _>(2)?.unsigned_abs(),
                total_ram_gb: statement.read::<f64, _>(3)?,
                total_ssd_gb: statement.read::<f64, _>(4)?,
                utilized_cores: statement.read::<f64, _>(5)?,
                utilized_ram_gb: statement.read::<f64, _>(6)?,
                utilized_ssd_gb: statement.read::<f64, _>(7)?,
                cores_percent: statement.read::<f64, _>(8)?,
                ram_percent: statement.read::<f64, _>(9)?,
                ssd_percent: statement.read::<f64, _>(10)?,
                running_apps: statement.read::<i64, _>(11)?.unsigned_abs(),
                data_source: read_data_source(&statement.read::<String, _>(12)?),
                api_success_rate: statement.read::<f64, _>(13)?,
                note: statement.read::<Option<String>, _>(14)?,
            });
        }
        Ok(snapshots)
    }

    fn has_node_stats_within(
        &self,
        timestamp: i64,
        tolerance: i64,
    ) -> Result<bool, Self::Error> {
        let mut statement = self.db.prepare(
            "SELECT EXISTS (
                SELECT 1 FROM network_node_stats
                WHERE timestamp BETWEEN :low AND :high
            );",
        )?;
        statement.bind::<&[(_, Value)]>(
            &[
                (":low", (timestamp - tolerance).into()),
                (":high", (timestamp + tolerance).into()),
            ][..],
        )?;
        if statement.next()? == State::Done {
            return Ok(false);
        }
        Ok(statement.read::<i64, _>(0)? != 0)
    }

    fn has_utilization_stats_within(
        &self,
        timestamp: i64,
        tolerance: i64,
    ) -> Result<bool, Self::Error> {
        let mut statement = self.db.prepare(
            "SELECT EXISTS (
                SELECT 1 FROM network_utilization_stats
                WHERE timestamp BETWEEN :low AND :high
            );",
        )?;
        statement.bind::<&[(_, Value)]>(
            &[
                (":low", (timestamp - tolerance).into()),
                (":high", (timestamp + tolerance).into()),
            ][..],
        )?;
        if statement.next()? == State::Done {
            return Ok(false);
        }
        Ok(statement.read::<i64, _>(0)? != 0)
    }
}

/// Stored data-source tags are written by this crate, but tolerate manual
/// edits by falling back to `failed`.
fn read_data_source(raw: &str) -> DataSource {
    DataSource::from_str(raw).unwrap_or_else(|_| {
        warn!("Unrecognized data_source tag \"{raw}\" in database");
        DataSource::Failed
    })
}

impl Storage for Sqlite {
    type Error = SqliteStorageError;

    fn batch_insert(
        &mut self,
        blocks: Vec<StoredBlock>,
        transactions: Vec<StoredTransaction>,
    ) -> Result<BatchOutcome, <Self as Storage>::Error> {
        self.db.execute("BEGIN IMMEDIATE;")?;
        match self.insert_all(&blocks, &transactions) {
            Ok(outcome) => {
                self.db.execute("COMMIT;")?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback_err) = self.db.execute("ROLLBACK;") {
                    warn!("Failed to roll back batch insert: {rollback_err}");
                }
                Err(e)
            }
        }
    }

    fn prune_below(&mut self, cutoff: i64) -> Result<(u64, u64), <Self as Storage>::Error> {
        self.db.execute("BEGIN IMMEDIATE;")?;
        // Transactions first; they reference block heights.
        let result = self
            .prune_transactions_below(cutoff)
            .and_then(|transactions| {
                self.prune_blocks_below(cutoff)
                    .map(|blocks| (transactions, blocks))
            });
        match result {
            Ok(counts) => {
                self.db.execute("COMMIT;")?;
                Ok(counts)
            }
            Err(e) => {
                if let Err(rollback_err) = self.db.execute("ROLLBACK;") {
                    warn!("Failed to roll back retention sweep: {rollback_err}");
                }
                Err(e)
            }
        }
    }
}

/// An error occurring while storing or retrieving values from a `sqlite`
/// database.
#[derive(Error, Debug)]
pub enum SqliteStorageError {
    /// An error caused by the database, or some interaction with it.
    #[error("database error: {0}")]
    Database(#[from] sqlite::Error),
    /// A height or count does not fit in the database's integer type.
    #[error("value {0} does not fit in a database integer")]
    HeightRange(u64),
}
