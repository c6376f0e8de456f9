//! Three-phase backfill controller.
//!
//! Brings one series as close to fully populated as the source allows:
//! fill forward to now, repair detected gaps, fill backward toward the
//! configured origin. Phases are independent and derive their bounds from
//! the store, so a restarted process simply resumes; no checkpoint exists.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::BackfillSettings;
use crate::schema::SeriesId;
use crate::source::{MarketDataSource, SourceError};
use crate::storage::CandleStore;

use super::fetcher::{FetchDirection, FetchReport, RangeFetcher, StopReason};
use super::gaps::GapDetector;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct BackfillOptions {
    /// Limit how far back the backward phase reaches: `now - days` instead
    /// of the configured historical origin.
    pub days: Option<u32>,
}

/// Counts of work done by one backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Candles inserted by the forward phase
    pub forward_inserted: u64,
    /// Repairable gaps reported by the detector (memoized ones excluded)
    pub gaps_found: usize,
    /// Gaps that yielded at least one new candle
    pub gaps_filled: usize,
    /// Gaps recorded as unfillable this run
    pub gaps_unfillable: usize,
    /// Candles inserted by gap repair
    pub gap_inserted: u64,
    /// Candles inserted by the backward phase
    pub backward_inserted: u64,
}

impl BackfillReport {
    pub fn total_inserted(&self) -> u64 {
        self.forward_inserted + self.gap_inserted + self.backward_inserted
    }
}

/// Backfill failure. Benign termination (no data, converged) is not an
/// error; only a permanent source error aborts a run, and the partial
/// result rides along.
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("backfill aborted by source error: {source}")]
    Aborted {
        partial: BackfillReport,
        #[source]
        source: SourceError,
    },
}

enum PhaseFlow {
    Continue(u64),
    Cancelled(u64),
    Fatal(u64, SourceError),
}

fn settle(fetch: FetchReport) -> PhaseFlow {
    match fetch.stop {
        StopReason::Fatal(e) => PhaseFlow::Fatal(fetch.inserted, e),
        StopReason::Cancelled => PhaseFlow::Cancelled(fetch.inserted),
        _ => PhaseFlow::Continue(fetch.inserted),
    }
}

/// Orchestrates the three backfill phases for one series at a time.
pub struct BackfillController<S> {
    store: Arc<CandleStore>,
    settings: BackfillSettings,
    fetcher: RangeFetcher<S>,
    detector: GapDetector,
}

impl<S: MarketDataSource> BackfillController<S> {
    pub fn new(source: Arc<S>, store: Arc<CandleStore>, settings: BackfillSettings) -> Self {
        let fetcher = RangeFetcher::new(source, store.clone(), settings.fetch.clone());
        let detector = GapDetector::new(settings.gaps.clone());
        Self {
            store,
            settings,
            fetcher,
            detector,
        }
    }

    /// Run all three phases for one series.
    pub async fn run(
        &self,
        series: &SeriesId,
        opts: &BackfillOptions,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<BackfillReport, BackfillError> {
        let spacing = series.timeframe.spacing_ms();
        let page_span = self.settings.fetch.page_limit as i64 * spacing;
        let now = Utc::now().timestamp_millis();
        let mut report = BackfillReport::default();

        let latest = self.boundary(self.store.latest_timestamp(series).await, series);
        let earliest = self.boundary(self.store.earliest_timestamp(series).await, series);
        let existing = match self.store.count(series).await {
            Ok(n) => n,
            Err(e) => {
                warn!(series = %series, error = %e, "count query failed");
                0
            }
        };
        if existing > 0 {
            info!(series = %series, existing, earliest, latest, "existing series data");
        }

        // Phase 1: fill forward from the latest stored candle. An empty
        // series gets a seed window at the live edge; phase 3 extends it to
        // full history.
        let (fwd_start, fwd_end) = match latest {
            Some(latest_ts) => (latest_ts + 1, now),
            None => (now - page_span, now),
        };
        info!(series = %series, start = fwd_start, end = fwd_end, "phase 1: filling forward");
        let fetch = self
            .fetcher
            .fetch(series, fwd_start, fwd_end, FetchDirection::Forward, shutdown)
            .await;
        match settle(fetch) {
            PhaseFlow::Continue(n) => report.forward_inserted = n,
            PhaseFlow::Cancelled(n) => {
                report.forward_inserted = n;
                return Ok(report);
            }
            PhaseFlow::Fatal(n, e) => {
                report.forward_inserted = n;
                return Err(BackfillError::Aborted {
                    partial: report,
                    source: e,
                });
            }
        }
        info!(series = %series, inserted = report.forward_inserted, "phase 1 complete");

        // Phase 2: repair gaps. Only meaningful once the series has data.
        if existing > 0 {
            let gaps = match self.detector.scan(&self.store, series).await {
                Ok(gaps) => gaps,
                Err(e) => {
                    warn!(series = %series, error = %e, "gap scan failed, skipping repair");
                    Vec::new()
                }
            };
            report.gaps_found = gaps.len();
            if !gaps.is_empty() {
                info!(series = %series, gaps = gaps.len(), "phase 2: repairing gaps");
            }

            for (i, gap) in gaps.iter().enumerate() {
                info!(series = %series, gap = i + 1, total = gaps.len(),
                    start = gap.start_ms, end = gap.end_ms, "repairing gap");
                let fetch = self
                    .fetcher
                    .fetch(series, gap.start_ms, gap.end_ms, FetchDirection::Forward, shutdown)
                    .await;
                match settle(fetch) {
                    PhaseFlow::Continue(0) => {
                        warn!(series = %series, start = gap.start_ms, end = gap.end_ms,
                            "no data available, marking gap unfillable");
                        if let Err(e) = self.store.mark_unfillable(series, *gap).await {
                            warn!(series = %series, error = %e, "failed to record unfillable gap");
                        }
                        report.gaps_unfillable += 1;
                    }
                    PhaseFlow::Continue(n) => {
                        report.gaps_filled += 1;
                        report.gap_inserted += n;
                    }
                    PhaseFlow::Cancelled(n) => {
                        report.gap_inserted += n;
                        return Ok(report);
                    }
                    PhaseFlow::Fatal(n, e) => {
                        report.gap_inserted += n;
                        return Err(BackfillError::Aborted {
                            partial: report,
                            source: e,
                        });
                    }
                }
            }
            if report.gaps_found > 0 {
                info!(series = %series, filled = report.gaps_filled,
                    unfillable = report.gaps_unfillable, "phase 2 complete");
            }
        }

        // Phase 3: extend history backward toward the origin.
        let origin = match opts.days {
            Some(days) => now - days as i64 * DAY_MS,
            None => self.settings.origin_ms,
        };
        // Re-read the boundary: phase 1 may have seeded an empty series.
        let earliest = self.boundary(self.store.earliest_timestamp(series).await, series);
        let backward = match earliest {
            Some(earliest_ts) if earliest_ts <= origin => None,
            Some(earliest_ts) => Some((origin, earliest_ts)),
            None => Some((origin, now)),
        };
        if let Some((start, end)) = backward {
            info!(series = %series, start, end, "phase 3: filling backward");
            let fetch = self
                .fetcher
                .fetch(series, start, end, FetchDirection::Backward, shutdown)
                .await;
            match settle(fetch) {
                PhaseFlow::Continue(n) => report.backward_inserted = n,
                PhaseFlow::Cancelled(n) => {
                    report.backward_inserted = n;
                    return Ok(report);
                }
                PhaseFlow::Fatal(n, e) => {
                    report.backward_inserted = n;
                    return Err(BackfillError::Aborted {
                        partial: report,
                        source: e,
                    });
                }
            }
            info!(series = %series, inserted = report.backward_inserted, "phase 3 complete");
        }

        info!(series = %series, total = report.total_inserted(), "backfill complete");
        Ok(report)
    }

    /// Backfill several series in sequence. One series' failure never
    /// aborts the rest; each outcome is returned alongside its series.
    pub async fn run_many(
        &self,
        series_list: &[SeriesId],
        opts: &BackfillOptions,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Vec<(SeriesId, Result<BackfillReport, BackfillError>)> {
        let mut outcomes = Vec::with_capacity(series_list.len());
        for (i, series) in series_list.iter().enumerate() {
            info!(series = %series, n = i + 1, total = series_list.len(), "backfilling series");
            let result = self.run(series, opts, shutdown).await;
            if let Err(e) = &result {
                warn!(series = %series, error = %e, "series backfill failed, continuing");
            }
            let cancelled = shutdown.try_recv().is_ok();
            outcomes.push((series.clone(), result));
            if cancelled {
                break;
            }
            if i + 1 < series_list.len() {
                tokio::time::sleep(std::time::Duration::from_secs(
                    self.settings.series_pause_secs,
                ))
                .await;
            }
        }
        outcomes
    }

    fn boundary(&self, result: crate::storage::StoreResult<Option<i64>>, series: &SeriesId) -> Option<i64> {
        match result {
            Ok(v) => v,
            Err(e) => {
                warn!(series = %series, error = %e, "boundary query failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::FetchPolicy;
    use crate::source::MockSource;
    use crate::timeframe::Timeframe;

    fn series() -> SeriesId {
        SeriesId::new("mock", "BTC/USDT", Timeframe::M1)
    }

    fn test_settings() -> BackfillSettings {
        BackfillSettings {
            origin_ms: 0,
            fetch: FetchPolicy {
                page_limit: 10,
                retry_backoff_secs: 0,
                ..FetchPolicy::default()
            },
            series_pause_secs: 0,
            ..BackfillSettings::default()
        }
    }

    #[tokio::test]
    async fn test_empty_source_completes_with_nothing() {
        let store = Arc::new(CandleStore::in_memory().await.unwrap());
        let source = Arc::new(MockSource::empty("mock"));
        let controller = BackfillController::new(source, store, test_settings());
        let (_tx, mut shutdown) = broadcast::channel(1);

        let report = controller
            .run(&series(), &BackfillOptions::default(), &mut shutdown)
            .await
            .unwrap();
        assert_eq!(report.total_inserted(), 0);
        assert_eq!(report.gaps_found, 0);
    }

    #[tokio::test]
    async fn test_permanent_source_error_aborts_run() {
        let store = Arc::new(CandleStore::in_memory().await.unwrap());
        let source = Arc::new(MockSource::empty("mock"));
        source.fail_permanent();
        let controller = BackfillController::new(source, store, test_settings());
        let (_tx, mut shutdown) = broadcast::channel(1);

        let result = controller
            .run(&series(), &BackfillOptions::default(), &mut shutdown)
            .await;
        match result {
            Err(BackfillError::Aborted { partial, source }) => {
                assert_eq!(partial.total_inserted(), 0);
                assert!(matches!(source, SourceError::Rejected(_)));
            }
            other => panic!("expected abort, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_many_continues_after_failure() {
        let store = Arc::new(CandleStore::in_memory().await.unwrap());
        let source = Arc::new(MockSource::empty("mock"));
        source.fail_permanent();
        let controller = BackfillController::new(source, store, test_settings());
        let (_tx, mut shutdown) = broadcast::channel(1);

        let list = vec![
            series(),
            SeriesId::new("mock", "ETH/USDT", Timeframe::M1),
        ];
        let outcomes = controller
            .run_many(&list, &BackfillOptions::default(), &mut shutdown)
            .await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, r)| r.is_err()));
    }

    #[tokio::test]
    async fn test_cancelled_run_returns_partial_report() {
        let store = Arc::new(CandleStore::in_memory().await.unwrap());
        let source = Arc::new(MockSource::empty("mock"));
        let controller = BackfillController::new(source, store, test_settings());

        let (tx, mut shutdown) = broadcast::channel(1);
        tx.send(()).unwrap();

        let report = controller
            .run(&series(), &BackfillOptions::default(), &mut shutdown)
            .await
            .unwrap();
        assert_eq!(report.total_inserted(), 0);
    }
}
