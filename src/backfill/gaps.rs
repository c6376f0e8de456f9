//! Gap detection over the candle store.
//!
//! A gap is an interval between consecutively stored timestamps wider than
//! a multiple of the series' nominal spacing; the multiplier tolerates
//! minor source jitter without false positives. Intervals already recorded
//! as unfillable are suppressed, so a permanently missing range is not
//! re-requested on every run. Read-only; no side effects.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::schema::{Gap, SeriesId};
use crate::storage::{CandleStore, StoreResult};

/// Gap detection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapPolicy {
    /// Cap on reported gaps per scan, keeping repair work incremental
    #[serde(default = "default_max_gaps")]
    pub max_gaps: u32,
    /// Gap threshold as a multiple of the nominal spacing
    #[serde(default = "default_spacing_multiplier")]
    pub spacing_multiplier: i64,
}

fn default_max_gaps() -> u32 {
    100
}

fn default_spacing_multiplier() -> i64 {
    2
}

impl Default for GapPolicy {
    fn default() -> Self {
        Self {
            max_gaps: default_max_gaps(),
            spacing_multiplier: default_spacing_multiplier(),
        }
    }
}

/// Scans a series for repairable gaps.
pub struct GapDetector {
    policy: GapPolicy,
}

impl GapDetector {
    pub fn new(policy: GapPolicy) -> Self {
        Self { policy }
    }

    /// Report gaps for the series, excluding intervals recorded as
    /// unfillable.
    pub async fn scan(&self, store: &CandleStore, series: &SeriesId) -> StoreResult<Vec<Gap>> {
        let threshold = series.timeframe.spacing_ms() * self.policy.spacing_multiplier;
        let raw = store
            .find_gaps(series, threshold, self.policy.max_gaps)
            .await?;

        let mut gaps = Vec::with_capacity(raw.len());
        let mut suppressed = 0usize;
        for gap in raw {
            if store
                .is_unfillable(series, gap.start_ms, gap.end_ms)
                .await?
            {
                suppressed += 1;
                continue;
            }
            gaps.push(gap);
        }

        if suppressed > 0 {
            debug!(series = %series, suppressed, "skipped known unfillable gap(s)");
        }
        Ok(gaps)
    }
}
