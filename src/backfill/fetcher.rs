//! Paginated range fetching.
//!
//! One fetch call retrieves everything the source has for a series inside
//! `[start, end]`, in one direction, writing pages idempotently as it goes.
//! The source's true data boundary is unknown in advance, so termination is
//! layered: window covered, source exhausted (consecutive empty pages),
//! convergence (backward pagination re-receiving already-seen data), walked
//! into owned history (consecutive zero-insert pages), and a hard iteration
//! cap against a misbehaving source.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::ErrorClassification;
use crate::schema::{Candle, SeriesId};
use crate::source::{MarketDataSource, SourceError};
use crate::storage::{CandleStore, UpsertMode};

/// Pagination direction for one fetch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDirection {
    /// Cursor starts at `start` and advances past each page.
    Forward,
    /// Cursor starts one page-span before `end` and retreats page by page.
    Backward,
}

/// Why a fetch call stopped.
///
/// Benign termination is data, not an error: callers only need to
/// distinguish "stop iterating" from "something broke" here, never via
/// error-type inspection.
#[derive(Debug)]
pub enum StopReason {
    /// The cursor covered the requested window.
    WindowCovered,
    /// Consecutive empty pages; the source has nothing more this direction.
    SourceExhausted,
    /// Backward pagination stopped advancing; the source's historical
    /// limit was reached.
    Converged,
    /// Consecutive non-empty pages inserted nothing new; the fetch walked
    /// into fully-stored history.
    AlreadyStored,
    /// Hard iteration cap reached.
    IterationCap,
    /// Shutdown was observed between pages.
    Cancelled,
    /// The source reported a permanent error; the report carries whatever
    /// was inserted before it.
    Fatal(SourceError),
}

impl StopReason {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StopReason::Fatal(_))
    }
}

/// Outcome of one fetch call.
#[derive(Debug)]
pub struct FetchReport {
    /// Rows actually inserted (duplicates ignored).
    pub inserted: u64,
    /// Non-empty pages processed.
    pub pages: u32,
    pub stop: StopReason,
}

/// Tunable pagination policy.
///
/// The consecutive-page heuristics are empirical, not semantically
/// meaningful; a source with legitimately sparse data near a boundary may
/// need larger values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchPolicy {
    /// Candles requested per page
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    /// Consecutive empty pages before the source counts as exhausted
    #[serde(default = "default_consecutive")]
    pub max_consecutive_empty: u32,
    /// Consecutive zero-insert pages before stopping in owned history
    #[serde(default = "default_consecutive")]
    pub max_consecutive_stale: u32,
    /// Hard cap on loop iterations per fetch call
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Pause before retrying a transient failure, seconds
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

fn default_page_limit() -> usize {
    1000
}

fn default_consecutive() -> u32 {
    3
}

fn default_max_iterations() -> u32 {
    10_000
}

fn default_retry_backoff_secs() -> u64 {
    5
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            page_limit: default_page_limit(),
            max_consecutive_empty: default_consecutive(),
            max_consecutive_stale: default_consecutive(),
            max_iterations: default_max_iterations(),
            retry_backoff_secs: default_retry_backoff_secs(),
        }
    }
}

impl FetchPolicy {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

/// Fetches one bounded window of candles and writes it idempotently.
pub struct RangeFetcher<S> {
    source: Arc<S>,
    store: Arc<CandleStore>,
    policy: FetchPolicy,
}

impl<S: MarketDataSource> RangeFetcher<S> {
    pub fn new(source: Arc<S>, store: Arc<CandleStore>, policy: FetchPolicy) -> Self {
        Self {
            source,
            store,
            policy,
        }
    }

    /// Fetch all available candles for `series` within `[start_ms, end_ms]`.
    ///
    /// Pages are requested and written in strict cursor order, so a crash
    /// mid-fetch leaves a contiguous prefix/suffix of the window. Transient
    /// source failures retry the same page after a backoff; permanent ones
    /// stop with [`StopReason::Fatal`] and the partial insert count.
    pub async fn fetch(
        &self,
        series: &SeriesId,
        start_ms: i64,
        end_ms: i64,
        direction: FetchDirection,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> FetchReport {
        let spacing = series.timeframe.spacing_ms();
        let page_span = self.policy.page_limit as i64 * spacing;

        let mut cursor = match direction {
            FetchDirection::Forward => start_ms,
            FetchDirection::Backward => end_ms - page_span,
        };

        let mut inserted_total = 0u64;
        let mut pages = 0u32;
        let mut iterations = 0u32;
        let mut consecutive_empty = 0u32;
        let mut consecutive_stale = 0u32;
        let mut prev_oldest: Option<i64> = None;

        let report = |inserted: u64, pages: u32, stop: StopReason| FetchReport {
            inserted,
            pages,
            stop,
        };

        loop {
            if iterations >= self.policy.max_iterations {
                warn!(series = %series, "fetch hit iteration cap");
                return report(inserted_total, pages, StopReason::IterationCap);
            }
            iterations += 1;

            if shutdown.try_recv().is_ok() {
                return report(inserted_total, pages, StopReason::Cancelled);
            }

            // Window covered: forward once the cursor passes `end`;
            // backward once the page at the cursor lies entirely below
            // `start` (the filter discards the sub-`start` remainder of the
            // final partial page).
            let covered = match direction {
                FetchDirection::Forward => cursor >= end_ms,
                FetchDirection::Backward => cursor + page_span <= start_ms,
            };
            if covered {
                return report(inserted_total, pages, StopReason::WindowCovered);
            }

            let page = match self
                .source
                .fetch_ohlcv(&series.symbol, series.timeframe, cursor, self.policy.page_limit)
                .await
            {
                Ok(page) => page,
                Err(e) if e.is_transient() => {
                    warn!(series = %series, error = %e, "transient source error, retrying page");
                    tokio::time::sleep(self.policy.retry_backoff()).await;
                    continue;
                }
                Err(e) => {
                    error!(series = %series, error = %e, "source error, aborting fetch");
                    return report(inserted_total, pages, StopReason::Fatal(e));
                }
            };

            if page.is_empty() {
                consecutive_empty += 1;
                if consecutive_empty >= self.policy.max_consecutive_empty {
                    return report(inserted_total, pages, StopReason::SourceExhausted);
                }
                match direction {
                    FetchDirection::Forward => cursor += spacing,
                    FetchDirection::Backward => cursor -= spacing,
                }
                tokio::time::sleep(self.source.rate_limit()).await;
                continue;
            }
            consecutive_empty = 0;

            let oldest = page.first().map(|c| c.timestamp_ms).unwrap_or(cursor);
            let newest = page.last().map(|c| c.timestamp_ms).unwrap_or(cursor);

            // Pages may overrun the requested bound; filter before storing.
            let batch: Vec<Candle> = page
                .into_iter()
                .filter(|c| c.timestamp_ms >= start_ms && c.timestamp_ms <= end_ms)
                .collect();

            let inserted = if batch.is_empty() {
                0
            } else {
                match self
                    .store
                    .upsert_candles(series, &batch, UpsertMode::Ignore)
                    .await
                {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(series = %series, error = %e, "store write failed, counting batch as zero");
                        0
                    }
                }
            };
            pages += 1;
            inserted_total += inserted;
            if inserted > 0 {
                debug!(series = %series, inserted, oldest, newest, "page stored");
            }

            if direction == FetchDirection::Backward {
                if let Some(prev) = prev_oldest {
                    if oldest >= prev {
                        info!(series = %series, oldest, "backward fetch converged at source history limit");
                        return report(inserted_total, pages, StopReason::Converged);
                    }
                }
                prev_oldest = Some(oldest);
            }

            if inserted == 0 {
                consecutive_stale += 1;
                if consecutive_stale >= self.policy.max_consecutive_stale {
                    return report(inserted_total, pages, StopReason::AlreadyStored);
                }
            } else {
                consecutive_stale = 0;
            }

            match direction {
                FetchDirection::Forward => cursor = newest + 1,
                FetchDirection::Backward => cursor = oldest - page_span,
            }

            tokio::time::sleep(self.source.rate_limit()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockSource;
    use crate::timeframe::Timeframe;

    fn series() -> SeriesId {
        SeriesId::new("mock", "BTC/USDT", Timeframe::M1)
    }

    fn minute_candles(start_ms: i64, count: usize) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                let ts = start_ms + i as i64 * 60_000;
                Candle::new(ts, 100.0, 101.0, 99.0, 100.5, 1.0)
            })
            .collect()
    }

    fn test_policy() -> FetchPolicy {
        FetchPolicy {
            page_limit: 10,
            retry_backoff_secs: 0,
            ..FetchPolicy::default()
        }
    }

    fn shutdown_channel() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
        broadcast::channel(1)
    }

    #[tokio::test]
    async fn test_forward_fetch_fills_window() {
        let store = Arc::new(CandleStore::in_memory().await.unwrap());
        let source = Arc::new(MockSource::new("mock", minute_candles(0, 20)));
        let fetcher = RangeFetcher::new(source, store.clone(), test_policy());
        let (_tx, mut shutdown) = shutdown_channel();

        let report = fetcher
            .fetch(&series(), 300_000, 600_000, FetchDirection::Forward, &mut shutdown)
            .await;

        // minutes 5..=10 inclusive
        assert_eq!(report.inserted, 6);
        let stored = store.get_candles(&series(), None, None).await.unwrap();
        assert_eq!(stored.first().unwrap().timestamp_ms, 300_000);
        assert_eq!(stored.last().unwrap().timestamp_ms, 600_000);
    }

    #[tokio::test]
    async fn test_empty_source_exhausts() {
        let store = Arc::new(CandleStore::in_memory().await.unwrap());
        let source = Arc::new(MockSource::empty("mock"));
        let fetcher = RangeFetcher::new(source.clone(), store, test_policy());
        let (_tx, mut shutdown) = shutdown_channel();

        let report = fetcher
            .fetch(&series(), 0, 3_600_000, FetchDirection::Forward, &mut shutdown)
            .await;

        assert_eq!(report.inserted, 0);
        assert!(matches!(report.stop, StopReason::SourceExhausted));
        assert_eq!(source.request_count(), 3);
    }

    #[tokio::test]
    async fn test_backward_convergence_terminates() {
        let store = Arc::new(CandleStore::in_memory().await.unwrap());
        // 40 minutes of data starting well above the window start
        let source = Arc::new(MockSource::new("mock", minute_candles(1_200_000, 40)));
        let fetcher = RangeFetcher::new(source.clone(), store.clone(), test_policy());
        let (_tx, mut shutdown) = shutdown_channel();

        let report = fetcher
            .fetch(&series(), 0, 3_600_000, FetchDirection::Backward, &mut shutdown)
            .await;

        assert_eq!(report.inserted, 40);
        assert!(matches!(report.stop, StopReason::Converged));
        // terminates in a handful of pages, nowhere near the iteration cap
        assert!(source.request_count() < 10);
        assert_eq!(store.count(&series()).await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_stale_pages_stop_in_owned_history() {
        let store = Arc::new(CandleStore::in_memory().await.unwrap());
        let universe = minute_candles(0, 40);
        store
            .upsert_candles(&series(), &universe, UpsertMode::Ignore)
            .await
            .unwrap();

        let source = Arc::new(MockSource::new("mock", universe));
        let fetcher = RangeFetcher::new(source, store, test_policy());
        let (_tx, mut shutdown) = shutdown_channel();

        let report = fetcher
            .fetch(&series(), 0, 40 * 60_000, FetchDirection::Forward, &mut shutdown)
            .await;

        assert_eq!(report.inserted, 0);
        assert!(matches!(report.stop, StopReason::AlreadyStored));
        assert_eq!(report.pages, 3);
    }

    #[tokio::test]
    async fn test_transient_errors_retry_same_page() {
        let store = Arc::new(CandleStore::in_memory().await.unwrap());
        let source = Arc::new(MockSource::new("mock", minute_candles(0, 5)));
        source.fail_transient(2);
        let fetcher = RangeFetcher::new(source.clone(), store, test_policy());
        let (_tx, mut shutdown) = shutdown_channel();

        let report = fetcher
            .fetch(&series(), 0, 5 * 60_000, FetchDirection::Forward, &mut shutdown)
            .await;

        assert_eq!(report.inserted, 5);
        // two failed requests plus the retried page(s)
        assert!(source.request_count() >= 3);
    }

    #[tokio::test]
    async fn test_permanent_error_aborts_with_partial() {
        let store = Arc::new(CandleStore::in_memory().await.unwrap());
        let source = Arc::new(MockSource::empty("mock"));
        source.fail_permanent();
        let fetcher = RangeFetcher::new(source, store, test_policy());
        let (_tx, mut shutdown) = shutdown_channel();

        let report = fetcher
            .fetch(&series(), 0, 3_600_000, FetchDirection::Forward, &mut shutdown)
            .await;

        assert_eq!(report.inserted, 0);
        assert!(report.stop.is_fatal());
    }

    #[tokio::test]
    async fn test_cancellation_between_pages() {
        let store = Arc::new(CandleStore::in_memory().await.unwrap());
        let source = Arc::new(MockSource::new("mock", minute_candles(0, 5)));
        let fetcher = RangeFetcher::new(source, store, test_policy());

        let (tx, mut rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        let report = fetcher
            .fetch(&series(), 0, 5 * 60_000, FetchDirection::Forward, &mut rx)
            .await;

        assert_eq!(report.inserted, 0);
        assert!(matches!(report.stop, StopReason::Cancelled));
    }

    #[tokio::test]
    async fn test_degenerate_window() {
        let store = Arc::new(CandleStore::in_memory().await.unwrap());
        let source = Arc::new(MockSource::new("mock", minute_candles(0, 5)));
        let fetcher = RangeFetcher::new(source, store, test_policy());
        let (_tx, mut shutdown) = shutdown_channel();

        let report = fetcher
            .fetch(&series(), 100, 100, FetchDirection::Forward, &mut shutdown)
            .await;
        assert!(matches!(report.stop, StopReason::WindowCovered));
        assert_eq!(report.inserted, 0);
    }
}
