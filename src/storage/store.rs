//! Candle store: SQLite-backed market data persistence.
//!
//! The store is the only shared mutable resource in the engine. The
//! uniqueness constraint on (exchange, symbol, timeframe, timestamp) makes
//! concurrent upserts from the historical and live paths commutative, so
//! callers need no external locking: `Ignore` keeps the first writer's row,
//! `Replace` lets the last writer win for a still-forming candle.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DatabaseSettings;
use crate::error::{ErrorCategory, ErrorClassification};
use crate::schema::{Candle, Gap, SeriesId, TradeRecord};

use super::schema::{ALL_INDEXES, ALL_TABLES};

/// Store errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorClassification for StoreError {
    fn category(&self) -> ErrorCategory {
        match self {
            StoreError::Database(_) => ErrorCategory::Transient,
            StoreError::Io(_) => ErrorCategory::Configuration,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Conflict policy for candle upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    /// Keep the existing row on conflict; used by the historical path.
    Ignore,
    /// Overwrite the existing row on conflict; used by the live path for
    /// still-forming candles.
    Replace,
}

impl UpsertMode {
    fn verb(&self) -> &'static str {
        match self {
            UpsertMode::Ignore => "INSERT OR IGNORE",
            UpsertMode::Replace => "INSERT OR REPLACE",
        }
    }
}

// 9 bind parameters per candle row; stay well under SQLite's variable limit.
const CANDLE_CHUNK: usize = 100;

/// SQLite-backed candle store.
pub struct CandleStore {
    pool: SqlitePool,
}

impl CandleStore {
    /// Open (creating if necessary) the database at the configured path and
    /// run the schema migration.
    pub async fn open(settings: &DatabaseSettings) -> StoreResult<Self> {
        if let Some(parent) = Path::new(&settings.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&settings.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(settings.busy_timeout_secs))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        debug!(path = %settings.path, "candle store opened");
        Ok(store)
    }

    /// In-memory store for tests. Single connection, never recycled, so the
    /// database lives as long as the pool.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        for table in ALL_TABLES {
            sqlx::query(table).execute(&self.pool).await?;
        }
        for group in ALL_INDEXES {
            for index in *group {
                sqlx::query(index).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upsert a batch of candles for one series.
    ///
    /// Candles failing validation are logged and skipped. Returns the
    /// number of rows actually written (with `Ignore`, duplicates count as
    /// zero).
    pub async fn upsert_candles(
        &self,
        series: &SeriesId,
        candles: &[Candle],
        mode: UpsertMode,
    ) -> StoreResult<u64> {
        let valid: Vec<&Candle> = candles
            .iter()
            .filter(|c| match c.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(series = %series, timestamp = c.timestamp_ms, error = %e,
                        "rejected candle at store boundary");
                    false
                }
            })
            .collect();

        if valid.is_empty() {
            return Ok(0);
        }

        let mut written = 0u64;
        for chunk in valid.chunks(CANDLE_CHUNK) {
            let mut sql = format!(
                "{} INTO ohlcv_data (exchange, symbol, timeframe, timestamp, open, high, low, close, volume) VALUES ",
                mode.verb()
            );
            for i in 0..chunk.len() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str("(?, ?, ?, ?, ?, ?, ?, ?, ?)");
            }

            let mut query = sqlx::query(&sql);
            for candle in chunk {
                query = query
                    .bind(series.exchange.as_str())
                    .bind(series.symbol.as_str())
                    .bind(series.timeframe.as_str())
                    .bind(candle.timestamp_ms)
                    .bind(candle.open)
                    .bind(candle.high)
                    .bind(candle.low)
                    .bind(candle.close)
                    .bind(candle.volume);
            }

            let result = query.execute(&self.pool).await?;
            written += result.rows_affected();
        }

        Ok(written)
    }

    /// Read candles for a series, ascending by timestamp.
    pub async fn get_candles(
        &self,
        series: &SeriesId,
        since_ms: Option<i64>,
        limit: Option<u32>,
    ) -> StoreResult<Vec<Candle>> {
        let mut sql = String::from(
            "SELECT timestamp, open, high, low, close, volume FROM ohlcv_data \
             WHERE exchange = ? AND symbol = ? AND timeframe = ?",
        );
        if since_ms.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        sql.push_str(" ORDER BY timestamp ASC");
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql)
            .bind(series.exchange.as_str())
            .bind(series.symbol.as_str())
            .bind(series.timeframe.as_str());
        if let Some(since) = since_ms {
            query = query.bind(since);
        }
        if let Some(limit) = limit {
            query = query.bind(limit as i64);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| {
                Candle::new(
                    row.get("timestamp"),
                    row.get("open"),
                    row.get("high"),
                    row.get("low"),
                    row.get("close"),
                    row.get("volume"),
                )
            })
            .collect())
    }

    /// Latest stored timestamp for a series, if any.
    pub async fn latest_timestamp(&self, series: &SeriesId) -> StoreResult<Option<i64>> {
        let row = sqlx::query(
            "SELECT MAX(timestamp) AS latest FROM ohlcv_data \
             WHERE exchange = ? AND symbol = ? AND timeframe = ?",
        )
        .bind(series.exchange.as_str())
        .bind(series.symbol.as_str())
        .bind(series.timeframe.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<Option<i64>, _>("latest"))
    }

    /// Earliest stored timestamp for a series, if any.
    pub async fn earliest_timestamp(&self, series: &SeriesId) -> StoreResult<Option<i64>> {
        let row = sqlx::query(
            "SELECT MIN(timestamp) AS earliest FROM ohlcv_data \
             WHERE exchange = ? AND symbol = ? AND timeframe = ?",
        )
        .bind(series.exchange.as_str())
        .bind(series.symbol.as_str())
        .bind(series.timeframe.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<Option<i64>, _>("earliest"))
    }

    /// Number of candles stored for a series.
    pub async fn count(&self, series: &SeriesId) -> StoreResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM ohlcv_data \
             WHERE exchange = ? AND symbol = ? AND timeframe = ?",
        )
        .bind(series.exchange.as_str())
        .bind(series.symbol.as_str())
        .bind(series.timeframe.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("count") as u64)
    }

    /// Find intervals between consecutive stored timestamps whose delta
    /// exceeds `threshold_ms`. Bounds are the stored timestamps on each
    /// side of the hole; result count is capped at `max_gaps`.
    pub async fn find_gaps(
        &self,
        series: &SeriesId,
        threshold_ms: i64,
        max_gaps: u32,
    ) -> StoreResult<Vec<Gap>> {
        let rows = sqlx::query(
            r#"
            WITH ordered AS (
                SELECT timestamp AS ts,
                       LEAD(timestamp) OVER (ORDER BY timestamp) AS next_ts
                FROM ohlcv_data
                WHERE exchange = ? AND symbol = ? AND timeframe = ?
            )
            SELECT ts AS gap_start, next_ts AS gap_end
            FROM ordered
            WHERE next_ts - ts > ?
            ORDER BY ts
            LIMIT ?
            "#,
        )
        .bind(series.exchange.as_str())
        .bind(series.symbol.as_str())
        .bind(series.timeframe.as_str())
        .bind(threshold_ms)
        .bind(max_gaps as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Gap {
                start_ms: row.get("gap_start"),
                end_ms: row.get("gap_end"),
            })
            .collect())
    }

    /// Exact-bounds lookup: has this interval been recorded as unfillable?
    pub async fn is_unfillable(
        &self,
        series: &SeriesId,
        start_ms: i64,
        end_ms: i64,
    ) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM unfillable_gaps \
             WHERE exchange = ? AND symbol = ? AND timeframe = ? \
             AND gap_start = ? AND gap_end = ?",
        )
        .bind(series.exchange.as_str())
        .bind(series.symbol.as_str())
        .bind(series.timeframe.as_str())
        .bind(start_ms)
        .bind(end_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("count") > 0)
    }

    /// Record an interval the source has proven it cannot supply.
    /// Idempotent; never auto-deleted.
    pub async fn mark_unfillable(&self, series: &SeriesId, gap: Gap) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO unfillable_gaps (exchange, symbol, timeframe, gap_start, gap_end) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(series.exchange.as_str())
        .bind(series.symbol.as_str())
        .bind(series.timeframe.as_str())
        .bind(gap.start_ms)
        .bind(gap.end_ms)
        .execute(&self.pool)
        .await?;

        debug!(series = %series, start = gap.start_ms, end = gap.end_ms,
            "marked gap as unfillable");
        Ok(())
    }

    /// Replace-upsert one ticker snapshot.
    pub async fn upsert_ticker(
        &self,
        exchange: &str,
        symbol: &str,
        timestamp_ms: i64,
        bid: f64,
        ask: f64,
        last: f64,
        volume_24h: f64,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO ticker_data (exchange, symbol, timestamp, bid, ask, last, volume_24h) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(exchange)
        .bind(symbol)
        .bind(timestamp_ms)
        .bind(bid)
        .bind(ask)
        .bind(last)
        .bind(volume_24h)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert trades, ignoring duplicates by (exchange, symbol, trade_id).
    /// Returns the number of new rows.
    pub async fn insert_trades(
        &self,
        exchange: &str,
        symbol: &str,
        trades: &[TradeRecord],
    ) -> StoreResult<u64> {
        let mut written = 0u64;
        for trade in trades {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO trades_stream \
                 (exchange, symbol, trade_id, timestamp, side, price, amount, cost, taker_or_maker, fee, fee_currency) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(exchange)
            .bind(symbol)
            .bind(trade.trade_id.as_str())
            .bind(trade.timestamp_ms)
            .bind(trade.side.as_str())
            .bind(trade.price)
            .bind(trade.amount)
            .bind(trade.cost)
            .bind(trade.taker_or_maker.as_deref())
            .bind(trade.fee)
            .bind(trade.fee_currency.as_deref())
            .execute(&self.pool)
            .await?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    /// Replace-upsert one order book snapshot. Bids and asks are JSON
    /// arrays of `[price, amount]` pairs.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_orderbook(
        &self,
        exchange: &str,
        symbol: &str,
        timestamp_ms: i64,
        bids_json: &str,
        asks_json: &str,
        bid_ask_spread: Option<f64>,
        mid_price: Option<f64>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO orderbook_data \
             (exchange, symbol, timestamp, bids, asks, bid_ask_spread, mid_price) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(exchange)
        .bind(symbol)
        .bind(timestamp_ms)
        .bind(bids_json)
        .bind(asks_json)
        .bind(bid_ask_spread)
        .bind(mid_price)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
