//! Persistent market data storage.

mod schema;
mod store;

pub use store::{CandleStore, StoreError, StoreResult, UpsertMode};
