//! Live stream ingestion: long-lived per-(symbol, kind) subscription tasks
//! writing push updates into the candle store.

mod events;
mod rate_limiter;
mod writer;

pub use events::{CandleEvents, CandleUpdate};
pub use rate_limiter::{ReconnectLimiter, ReconnectLimiterConfig};
pub use writer::{StreamPlan, StreamWriter};
