//! External market-data source abstraction.
//!
//! The engine never talks to an exchange directly; it depends on the
//! [`MarketDataSource`] capability contract. Authentication, wire protocol,
//! and venue quirks live in the implementing client, outside this crate.

pub mod mock;
mod traits;

pub use mock::MockSource;
pub use traits::{MarketDataSource, SourceError, SourceResult};
