//! Candle event hand-off to downstream consumers.
//!
//! The writer publishes one event per stored candle update on a broadcast
//! channel instead of invoking a synchronous callback: a slow or failing
//! consumer lags and loses messages, it never stalls ingestion.

use tokio::sync::broadcast;

use crate::schema::{Candle, SeriesId};

/// One closed or updated candle, published after its store write succeeds.
#[derive(Debug, Clone)]
pub struct CandleUpdate {
    pub series: SeriesId,
    pub candle: Candle,
}

/// Broadcast hub for candle updates.
pub struct CandleEvents {
    tx: broadcast::Sender<CandleUpdate>,
}

impl CandleEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to candle updates from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<CandleUpdate> {
        self.tx.subscribe()
    }

    /// Publish an update. Fire-and-forget: having no subscribers is fine.
    pub fn publish(&self, update: CandleUpdate) {
        let _ = self.tx.send(update);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
