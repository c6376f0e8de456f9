//! Normalized market data types.
//!
//! The candle is the canonical unit of the engine: one fixed-duration
//! price/volume summary, unique per (exchange, symbol, timeframe,
//! timestamp). Validation happens here, at the store boundary, not in the
//! ingestion paths.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timeframe::Timeframe;

/// Identity of one independently ingested time series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesId {
    /// Exchange name (e.g. `mexc`, `binance`)
    pub exchange: String,
    /// Trading pair (e.g. `BTC/USDT`)
    pub symbol: String,
    /// Candle timeframe
    pub timeframe: Timeframe,
}

impl SeriesId {
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl std::fmt::Display for SeriesId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.exchange, self.symbol, self.timeframe)
    }
}

/// One OHLCV candle.
///
/// Series identity is carried separately; a candle only knows its bucket
/// timestamp and prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket open time, UTC epoch milliseconds
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Candle rejected at the store boundary.
#[derive(Debug, Error, PartialEq)]
pub enum CandleValidationError {
    #[error("negative timestamp: {0}")]
    NegativeTimestamp(i64),
    #[error("non-finite price or volume field")]
    NonFinite,
    #[error("OHLC ordering violated: low {low} high {high} open {open} close {close}")]
    OhlcOrdering {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
    #[error("negative volume: {0}")]
    NegativeVolume(f64),
}

impl Candle {
    pub fn new(timestamp_ms: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp_ms,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Check the candle invariants: `low <= open,close <= high`,
    /// `volume >= 0`, all fields finite, non-negative timestamp.
    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if self.timestamp_ms < 0 {
            return Err(CandleValidationError::NegativeTimestamp(self.timestamp_ms));
        }
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(CandleValidationError::NonFinite);
        }
        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }
        let in_range = |p: f64| self.low <= p && p <= self.high;
        if !in_range(self.open) || !in_range(self.close) {
            return Err(CandleValidationError::OhlcOrdering {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }
        Ok(())
    }
}

/// Missing interval in a series, bounded by the stored timestamps on each
/// side of the hole. Half-open `[start, end)`; computed, not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Trade aggressor side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live ticker push update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickerUpdate {
    /// Source timestamp, if the source provides one
    pub timestamp_ms: Option<i64>,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume_24h: f64,
}

/// Live trade push update, as delivered by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeUpdate {
    /// Source trade id; absent or empty on some venues
    pub id: Option<String>,
    pub timestamp_ms: i64,
    pub side: TradeSide,
    pub price: f64,
    pub amount: f64,
    /// Quote cost; derived as `price * amount` when absent
    pub cost: Option<f64>,
    pub taker_or_maker: Option<String>,
    pub fee: Option<f64>,
    pub fee_currency: Option<String>,
}

/// Trade row ready for storage, with a guaranteed stable identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub trade_id: String,
    pub timestamp_ms: i64,
    pub side: TradeSide,
    pub price: f64,
    pub amount: f64,
    pub cost: f64,
    pub taker_or_maker: Option<String>,
    pub fee: Option<f64>,
    pub fee_currency: Option<String>,
}

/// Live order book push update. Levels are `(price, amount)` pairs, best
/// level first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookUpdate {
    /// Source timestamp, if the source provides one
    pub timestamp_ms: Option<i64>,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_candle() {
        let candle = Candle::new(60_000, 100.0, 105.0, 99.0, 102.0, 12.5);
        assert!(candle.validate().is_ok());
    }

    #[test]
    fn test_flat_candle_is_valid() {
        let candle = Candle::new(0, 100.0, 100.0, 100.0, 100.0, 0.0);
        assert!(candle.validate().is_ok());
    }

    #[test]
    fn test_rejects_ohlc_ordering_violation() {
        // close above high
        let candle = Candle::new(0, 100.0, 105.0, 99.0, 110.0, 1.0);
        assert!(matches!(
            candle.validate(),
            Err(CandleValidationError::OhlcOrdering { .. })
        ));
        // open below low
        let candle = Candle::new(0, 95.0, 105.0, 99.0, 100.0, 1.0);
        assert!(candle.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_volume() {
        let candle = Candle::new(0, 100.0, 105.0, 99.0, 102.0, -1.0);
        assert_eq!(
            candle.validate(),
            Err(CandleValidationError::NegativeVolume(-1.0))
        );
    }

    #[test]
    fn test_rejects_nan() {
        let candle = Candle::new(0, f64::NAN, 105.0, 99.0, 102.0, 1.0);
        assert_eq!(candle.validate(), Err(CandleValidationError::NonFinite));
    }

    #[test]
    fn test_rejects_negative_timestamp() {
        let candle = Candle::new(-1, 100.0, 105.0, 99.0, 102.0, 1.0);
        assert_eq!(
            candle.validate(),
            Err(CandleValidationError::NegativeTimestamp(-1))
        );
    }
}
