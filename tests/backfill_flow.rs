//! End-to-end backfill scenarios over a scripted source and an in-memory
//! store.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;

use data_ingest::{
    BackfillController, BackfillError, BackfillOptions, BackfillSettings, Candle, CandleStore,
    FetchPolicy, MockSource, SeriesId, Timeframe, UpsertMode,
};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 86_400_000;

fn series() -> SeriesId {
    SeriesId::new("mock", "BTC/USDT", Timeframe::M1)
}

fn candle_at(ts: i64) -> Candle {
    Candle::new(ts, 100.0, 101.0, 99.0, 100.5, 1.0)
}

/// A contiguous run of candles ending at the most recent closed bucket.
fn recent_universe(timeframe: Timeframe, count: i64) -> Vec<Candle> {
    let spacing = timeframe.spacing_ms();
    let now = Utc::now().timestamp_millis();
    let last_bucket = (now / spacing) * spacing - spacing;
    (0..count)
        .map(|i| candle_at(last_bucket - (count - 1 - i) * spacing))
        .collect()
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
async fn test_full_history_then_resume_inserts_nothing() {
    let store = Arc::new(CandleStore::in_memory().await.unwrap());
    let universe = recent_universe(Timeframe::M1, 40);
    let source = Arc::new(MockSource::new("mock", universe.clone()));
    let controller = BackfillController::new(source, store.clone(), test_settings());
    let (_tx, mut shutdown) = broadcast::channel(1);

    let first = controller
        .run(&series(), &BackfillOptions::default(), &mut shutdown)
        .await
        .unwrap();
    assert_eq!(first.total_inserted(), 40);
    assert_eq!(store.count(&series()).await.unwrap(), 40);
    assert_eq!(
        store.earliest_timestamp(&series()).await.unwrap(),
        Some(universe[0].timestamp_ms)
    );

    // No new source data between runs: the second run is a no-op.
    let second = controller
        .run(&series(), &BackfillOptions::default(), &mut shutdown)
        .await
        .unwrap();
    assert_eq!(second.total_inserted(), 0);
    assert_eq!(second.gaps_found, 0);
    assert_eq!(store.count(&series()).await.unwrap(), 40);
}

#[tokio::test]
async fn test_unfillable_gap_scenario() {
    // Series has candles at 0ms, 60000ms, 240000ms: minutes 2 and 3 are
    // missing and the source cannot supply them.
    let store = Arc::new(CandleStore::in_memory().await.unwrap());
    let seeded = vec![candle_at(0), candle_at(60_000), candle_at(240_000)];
    store
        .upsert_candles(&series(), &seeded, UpsertMode::Ignore)
        .await
        .unwrap();

    let source = Arc::new(MockSource::new("mock", seeded));
    let controller = BackfillController::new(source, store.clone(), test_settings());
    let (_tx, mut shutdown) = broadcast::channel(1);

    let report = controller
        .run(&series(), &BackfillOptions::default(), &mut shutdown)
        .await
        .unwrap();

    assert_eq!(report.gaps_found, 1);
    assert_eq!(report.gaps_filled, 0);
    assert_eq!(report.gaps_unfillable, 1);
    assert!(store.is_unfillable(&series(), 60_000, 240_000).await.unwrap());

    // Memoized: the next run's scan reports nothing and re-requests nothing.
    let report = controller
        .run(&series(), &BackfillOptions::default(), &mut shutdown)
        .await
        .unwrap();
    assert_eq!(report.gaps_found, 0);
    assert_eq!(report.gaps_unfillable, 0);
}

#[tokio::test]
async fn test_gap_repair_inserts_missing_candles() {
    // Hole at minutes 3..=4; the source has the full series.
    let store = Arc::new(CandleStore::in_memory().await.unwrap());
    let full: Vec<Candle> = (0..10).map(|m| candle_at(m * MINUTE_MS)).collect();
    let holey: Vec<Candle> = full
        .iter()
        .filter(|c| c.timestamp_ms < 3 * MINUTE_MS || c.timestamp_ms > 4 * MINUTE_MS)
        .copied()
        .collect();
    store
        .upsert_candles(&series(), &holey, UpsertMode::Ignore)
        .await
        .unwrap();

    let source = Arc::new(MockSource::new("mock", full));
    let controller = BackfillController::new(source, store.clone(), test_settings());
    let (_tx, mut shutdown) = broadcast::channel(1);

    let report = controller
        .run(&series(), &BackfillOptions::default(), &mut shutdown)
        .await
        .unwrap();

    assert_eq!(report.gaps_found, 1);
    assert_eq!(report.gaps_filled, 1);
    assert_eq!(report.gap_inserted, 2);
    assert_eq!(store.count(&series()).await.unwrap(), 10);
    assert!(!store.is_unfillable(&series(), 2 * MINUTE_MS, 5 * MINUTE_MS).await.unwrap());
}

#[tokio::test]
async fn test_days_horizon_limits_backward_reach() {
    let hourly = SeriesId::new("mock", "BTC/USDT", Timeframe::H1);
    let store = Arc::new(CandleStore::in_memory().await.unwrap());
    // four days of hourly candles available upstream
    let universe = recent_universe(Timeframe::H1, 4 * 24);
    let source = Arc::new(MockSource::new("mock", universe));
    let controller = BackfillController::new(source, store.clone(), test_settings());
    let (_tx, mut shutdown) = broadcast::channel(1);

    let opts = BackfillOptions { days: Some(2) };
    let report = controller.run(&hourly, &opts, &mut shutdown).await.unwrap();
    assert!(report.total_inserted() > 0);

    let now = Utc::now().timestamp_millis();
    let horizon = now - 2 * DAY_MS;
    let earliest = store.earliest_timestamp(&hourly).await.unwrap().unwrap();
    // never fetches past the horizon, and reaches (almost) down to it
    assert!(earliest >= horizon);
    assert!(earliest - horizon <= 2 * HOUR_MS);

    // the horizon is already satisfied, so a re-run stays put
    let report = controller.run(&hourly, &opts, &mut shutdown).await.unwrap();
    assert_eq!(report.backward_inserted, 0);
}

#[tokio::test]
async fn test_forward_phase_extends_live_edge() {
    let store = Arc::new(CandleStore::in_memory().await.unwrap());
    let universe = recent_universe(Timeframe::M1, 30);

    // Pretend an earlier run stored everything except the newest 5 candles.
    let older = &universe[..25];
    store
        .upsert_candles(&series(), older, UpsertMode::Ignore)
        .await
        .unwrap();

    let source = Arc::new(MockSource::new("mock", universe.clone()));
    let controller = BackfillController::new(source, store.clone(), test_settings());
    let (_tx, mut shutdown) = broadcast::channel(1);

    let report = controller
        .run(&series(), &BackfillOptions::default(), &mut shutdown)
        .await
        .unwrap();

    assert_eq!(report.forward_inserted, 5);
    assert_eq!(report.gaps_found, 0);
    assert_eq!(store.count(&series()).await.unwrap(), 30);
    assert_eq!(
        store.latest_timestamp(&series()).await.unwrap(),
        Some(universe.last().unwrap().timestamp_ms)
    );
}

#[tokio::test]
async fn test_permanent_error_propagates_partial_report() {
    let store = Arc::new(CandleStore::in_memory().await.unwrap());
    let source = Arc::new(MockSource::new("mock", recent_universe(Timeframe::M1, 10)));
    source.fail_permanent();
    let controller = BackfillController::new(source, store, test_settings());
    let (_tx, mut shutdown) = broadcast::channel(1);

    match controller
        .run(&series(), &BackfillOptions::default(), &mut shutdown)
        .await
    {
        Err(BackfillError::Aborted { partial, .. }) => {
            assert_eq!(partial.total_inserted(), 0);
        }
        other => panic!("expected aborted run, got {:?}", other),
    }
}
