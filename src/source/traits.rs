//! Source capability contract and error taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{ErrorCategory, ErrorClassification};
use crate::schema::{Candle, OrderBookUpdate, TickerUpdate, TradeUpdate};
use crate::timeframe::Timeframe;

/// Source error types.
///
/// The engine distinguishes two failure classes: transient/connectivity
/// errors are retried with a pause, permanent/protocol errors abort the
/// current operation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("source rejected request: {0}")]
    Rejected(String),

    #[error("unsupported symbol or parameters: {0}")]
    Unsupported(String),

    #[error("subscription error: {0}")]
    Subscription(String),
}

impl ErrorClassification for SourceError {
    fn category(&self) -> ErrorCategory {
        match self {
            SourceError::Network(_) => ErrorCategory::Transient,
            SourceError::Timeout(_) => ErrorCategory::Transient,
            SourceError::RateLimited(_) => ErrorCategory::ResourceExhausted,
            SourceError::Rejected(_) => ErrorCategory::Permanent,
            SourceError::Unsupported(_) => ErrorCategory::Permanent,
            SourceError::Subscription(_) => ErrorCategory::Transient,
        }
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Capability contract for an external market-data source.
///
/// Pull access is a bounded page query from a cursor; push access blocks
/// until the next event for the subscribed symbol. Pages may contain data
/// outside the caller's logical window; callers filter before storing.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Source identifier, used as the `exchange` column in storage.
    fn name(&self) -> &str;

    /// Mandated minimum interval between consecutive pull requests.
    fn rate_limit(&self) -> Duration;

    /// Maximum candles the source returns per page.
    fn page_limit(&self) -> usize;

    /// Fetch up to `limit` candles at or after `since_ms`, ascending.
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> SourceResult<Vec<Candle>>;

    /// Await the next candle update batch for the symbol. The batch ends
    /// with the most recent (possibly still forming) candle.
    async fn watch_ohlcv(&self, symbol: &str, timeframe: Timeframe) -> SourceResult<Vec<Candle>>;

    /// Await the next ticker update for the symbol.
    async fn watch_ticker(&self, symbol: &str) -> SourceResult<TickerUpdate>;

    /// Await the next batch of executed trades for the symbol.
    async fn watch_trades(&self, symbol: &str) -> SourceResult<Vec<TradeUpdate>>;

    /// Await the next order book snapshot for the symbol.
    async fn watch_order_book(&self, symbol: &str) -> SourceResult<OrderBookUpdate>;
}
