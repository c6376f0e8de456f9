//! Canonical market data types.
//!
//! Source-specific payloads are normalized to these types before storage or
//! distribution.

mod market_data;

pub use market_data::{
    Candle, CandleValidationError, Gap, OrderBookUpdate, SeriesId, TickerUpdate, TradeRecord,
    TradeSide, TradeUpdate,
};
