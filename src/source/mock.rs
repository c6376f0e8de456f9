//! Scripted in-memory source for tests.
//!
//! Pull access serves pages from a fixed candle universe the way a real
//! exchange does: `fetch_ohlcv(since)` returns ascending candles at or
//! after `since`, capped by the page limit, and keeps returning its
//! earliest page when asked for history it does not have. Push access pops
//! scripted events and blocks forever once the script is exhausted, so
//! stream tasks sit in their receive call until shutdown.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::schema::{Candle, OrderBookUpdate, TickerUpdate, TradeUpdate};
use crate::timeframe::Timeframe;

use super::{MarketDataSource, SourceError, SourceResult};

/// In-memory source with a fixed candle universe and scripted push events.
pub struct MockSource {
    name: String,
    candles: Vec<Candle>,
    page_limit: usize,
    rate_limit: Duration,
    fail_transient: AtomicU32,
    fail_permanent: AtomicBool,
    requests: AtomicU32,
    live_candles: Mutex<VecDeque<Vec<Candle>>>,
    live_tickers: Mutex<VecDeque<TickerUpdate>>,
    live_trades: Mutex<VecDeque<Vec<TradeUpdate>>>,
    live_books: Mutex<VecDeque<OrderBookUpdate>>,
}

impl MockSource {
    /// Create a source with the given candle universe. Candles must be
    /// ascending by timestamp.
    pub fn new(name: impl Into<String>, candles: Vec<Candle>) -> Self {
        Self {
            name: name.into(),
            candles,
            page_limit: 1000,
            rate_limit: Duration::ZERO,
            fail_transient: AtomicU32::new(0),
            fail_permanent: AtomicBool::new(false),
            requests: AtomicU32::new(0),
            live_candles: Mutex::new(VecDeque::new()),
            live_tickers: Mutex::new(VecDeque::new()),
            live_trades: Mutex::new(VecDeque::new()),
            live_books: Mutex::new(VecDeque::new()),
        }
    }

    /// Empty source with no historical data.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit;
        self
    }

    /// Fail the next `n` pull requests with a transient network error.
    pub fn fail_transient(&self, n: u32) {
        self.fail_transient.store(n, Ordering::SeqCst);
    }

    /// Fail every pull request with a permanent protocol error.
    pub fn fail_permanent(&self) {
        self.fail_permanent.store(true, Ordering::SeqCst);
    }

    /// Number of pull requests served (including failed ones).
    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    pub async fn push_candles(&self, batch: Vec<Candle>) {
        self.live_candles.lock().await.push_back(batch);
    }

    pub async fn push_ticker(&self, ticker: TickerUpdate) {
        self.live_tickers.lock().await.push_back(ticker);
    }

    pub async fn push_trades(&self, trades: Vec<TradeUpdate>) {
        self.live_trades.lock().await.push_back(trades);
    }

    pub async fn push_order_book(&self, book: OrderBookUpdate) {
        self.live_books.lock().await.push_back(book);
    }

    async fn pop_or_park<T>(queue: &Mutex<VecDeque<T>>) -> T {
        if let Some(item) = queue.lock().await.pop_front() {
            return item;
        }
        // Script exhausted: behave like a quiet subscription.
        std::future::pending::<()>().await;
        unreachable!("pending future resolved")
    }
}

#[async_trait]
impl MarketDataSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn rate_limit(&self) -> Duration {
        self.rate_limit
    }

    fn page_limit(&self) -> usize {
        self.page_limit
    }

    async fn fetch_ohlcv(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        since_ms: i64,
        limit: usize,
    ) -> SourceResult<Vec<Candle>> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        if self.fail_permanent.load(Ordering::SeqCst) {
            return Err(SourceError::Rejected("scripted permanent error".to_string()));
        }
        if self
            .fail_transient
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SourceError::Network("scripted transient error".to_string()));
        }

        let limit = limit.min(self.page_limit);
        let page = self
            .candles
            .iter()
            .filter(|c| c.timestamp_ms >= since_ms)
            .take(limit)
            .copied()
            .collect();
        Ok(page)
    }

    async fn watch_ohlcv(&self, _symbol: &str, _timeframe: Timeframe) -> SourceResult<Vec<Candle>> {
        Ok(Self::pop_or_park(&self.live_candles).await)
    }

    async fn watch_ticker(&self, _symbol: &str) -> SourceResult<TickerUpdate> {
        Ok(Self::pop_or_park(&self.live_tickers).await)
    }

    async fn watch_trades(&self, _symbol: &str) -> SourceResult<Vec<TradeUpdate>> {
        Ok(Self::pop_or_park(&self.live_trades).await)
    }

    async fn watch_order_book(&self, _symbol: &str) -> SourceResult<OrderBookUpdate> {
        Ok(Self::pop_or_park(&self.live_books).await)
    }
}
