//! Live stream writer.
//!
//! One long-lived task per (symbol, data kind): candles per subscribed
//! timeframe, ticker, trades, order book depth. Each task loops on the
//! source's push call, writes updates into the store under the same
//! uniqueness keys as the historical path, and resumes the same
//! subscription after any error. A task only exits when shutdown is
//! observed between messages; in-flight receives complete first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::StreamSettings;
use crate::schema::{OrderBookUpdate, SeriesId, TradeRecord, TradeUpdate};
use crate::source::MarketDataSource;
use crate::storage::{CandleStore, UpsertMode};
use crate::timeframe::Timeframe;

use super::events::{CandleEvents, CandleUpdate};
use super::rate_limiter::{ReconnectLimiter, ReconnectLimiterConfig};

/// Which streams to run for which symbols.
#[derive(Debug, Clone)]
pub struct StreamPlan {
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub orderbook: bool,
    pub trades: bool,
}

impl StreamPlan {
    pub fn new(symbols: Vec<String>, timeframes: Vec<Timeframe>, settings: &StreamSettings) -> Self {
        Self {
            symbols,
            timeframes,
            orderbook: settings.enable_orderbook,
            trades: settings.enable_trades,
        }
    }
}

/// Per-stream counters.
#[derive(Debug, Clone, Default)]
pub struct StreamStat {
    pub messages: u64,
    pub last_ms: Option<i64>,
}

/// Maintains live subscriptions and reconciles push updates into the store.
pub struct StreamWriter<S> {
    source: Arc<S>,
    store: Arc<CandleStore>,
    settings: StreamSettings,
    events: CandleEvents,
    limiter: ReconnectLimiter,
    stats: RwLock<HashMap<String, StreamStat>>,
}

impl<S: MarketDataSource + 'static> StreamWriter<S> {
    pub fn new(source: Arc<S>, store: Arc<CandleStore>, settings: StreamSettings) -> Self {
        let events = CandleEvents::new(settings.event_buffer);
        let limiter = ReconnectLimiter::new(ReconnectLimiterConfig::from(&settings.reconnect));
        Self {
            source,
            store,
            settings,
            events,
            limiter,
            stats: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to candle updates published after store writes.
    pub fn subscribe(&self) -> broadcast::Receiver<CandleUpdate> {
        self.events.subscribe()
    }

    /// Snapshot of per-stream counters.
    pub fn stats(&self) -> HashMap<String, StreamStat> {
        self.stats.read().clone()
    }

    /// Spawn all subscription tasks for the plan and run until shutdown.
    pub async fn run(self: Arc<Self>, plan: StreamPlan, shutdown: broadcast::Receiver<()>) {
        let mut tasks = JoinSet::new();

        for symbol in &plan.symbols {
            for tf in &plan.timeframes {
                tasks.spawn(Self::candle_loop(
                    self.clone(),
                    symbol.clone(),
                    *tf,
                    shutdown.resubscribe(),
                ));
            }
            tasks.spawn(Self::ticker_loop(
                self.clone(),
                symbol.clone(),
                shutdown.resubscribe(),
            ));
            if plan.orderbook {
                tasks.spawn(Self::book_loop(
                    self.clone(),
                    symbol.clone(),
                    shutdown.resubscribe(),
                ));
            }
            if plan.trades {
                tasks.spawn(Self::trades_loop(
                    self.clone(),
                    symbol.clone(),
                    shutdown.resubscribe(),
                ));
            }
        }
        drop(shutdown);

        info!(tasks = tasks.len(), "stream writer started");
        while tasks.join_next().await.is_some() {}
        info!("stream writer stopped");
    }

    async fn candle_loop(
        writer: Arc<Self>,
        symbol: String,
        timeframe: Timeframe,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let series = SeriesId::new(writer.source.name(), symbol.clone(), timeframe);
        let key = format!("{}:candles:{}", symbol, timeframe);
        info!(stream = %key, "watching candles");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                result = writer.source.watch_ohlcv(&symbol, timeframe) => match result {
                    Ok(batch) if batch.is_empty() => {}
                    Ok(batch) => {
                        // Replace semantics: the most recent push for a
                        // still-forming timestamp overwrites the prior row.
                        match writer
                            .store
                            .upsert_candles(&series, &batch, UpsertMode::Replace)
                            .await
                        {
                            Ok(_) => {
                                if let Some(&latest) = batch.last() {
                                    writer.record(&key, latest.timestamp_ms);
                                    if latest.validate().is_ok() {
                                        writer.events.publish(CandleUpdate {
                                            series: series.clone(),
                                            candle: latest,
                                        });
                                    }
                                }
                            }
                            Err(e) => warn!(stream = %key, error = %e, "store write failed"),
                        }
                    }
                    Err(e) => {
                        warn!(stream = %key, error = %e, "stream error, resuming");
                        writer.backoff().await;
                    }
                }
            }
        }
        info!(stream = %key, "stream stopped");
    }

    async fn ticker_loop(writer: Arc<Self>, symbol: String, mut shutdown: broadcast::Receiver<()>) {
        let exchange = writer.source.name().to_string();
        let key = format!("{}:ticker", symbol);
        info!(stream = %key, "watching ticker");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                result = writer.source.watch_ticker(&symbol) => match result {
                    Ok(ticker) => {
                        // Only store updates carrying a usable last price.
                        if ticker.last > 0.0 {
                            let ts = ticker
                                .timestamp_ms
                                .unwrap_or_else(|| Utc::now().timestamp_millis());
                            match writer
                                .store
                                .upsert_ticker(
                                    &exchange,
                                    &symbol,
                                    ts,
                                    ticker.bid,
                                    ticker.ask,
                                    ticker.last,
                                    ticker.volume_24h,
                                )
                                .await
                            {
                                Ok(()) => writer.record(&key, ts),
                                Err(e) => warn!(stream = %key, error = %e, "store write failed"),
                            }
                        }
                    }
                    Err(e) => {
                        warn!(stream = %key, error = %e, "stream error, resuming");
                        writer.backoff().await;
                    }
                }
            }
        }
        info!(stream = %key, "stream stopped");
    }

    async fn trades_loop(writer: Arc<Self>, symbol: String, mut shutdown: broadcast::Receiver<()>) {
        let exchange = writer.source.name().to_string();
        let key = format!("{}:trades", symbol);
        info!(stream = %key, "watching trades");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                result = writer.source.watch_trades(&symbol) => match result {
                    Ok(trades) if trades.is_empty() => {}
                    Ok(trades) => {
                        let records: Vec<TradeRecord> = trades.iter().map(trade_record).collect();
                        match writer.store.insert_trades(&exchange, &symbol, &records).await {
                            Ok(_) => {
                                let last_ts = records.last().map(|r| r.timestamp_ms).unwrap_or(0);
                                writer.record(&key, last_ts);
                            }
                            Err(e) => warn!(stream = %key, error = %e, "store write failed"),
                        }
                    }
                    Err(e) => {
                        warn!(stream = %key, error = %e, "stream error, resuming");
                        writer.backoff().await;
                    }
                }
            }
        }
        info!(stream = %key, "stream stopped");
    }

    async fn book_loop(writer: Arc<Self>, symbol: String, mut shutdown: broadcast::Receiver<()>) {
        let exchange = writer.source.name().to_string();
        let key = format!("{}:book", symbol);
        let depth = writer.settings.orderbook_depth;
        info!(stream = %key, depth, "watching order book");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                result = writer.source.watch_order_book(&symbol) => match result {
                    Ok(book) => {
                        let snapshot = book_metrics(&book, depth);
                        let ts = book
                            .timestamp_ms
                            .unwrap_or_else(|| Utc::now().timestamp_millis());
                        let bids_json = serde_json::to_string(&snapshot.bids)
                            .unwrap_or_else(|_| "[]".to_string());
                        let asks_json = serde_json::to_string(&snapshot.asks)
                            .unwrap_or_else(|_| "[]".to_string());
                        match writer
                            .store
                            .upsert_orderbook(
                                &exchange,
                                &symbol,
                                ts,
                                &bids_json,
                                &asks_json,
                                snapshot.spread,
                                snapshot.mid_price,
                            )
                            .await
                        {
                            Ok(()) => writer.record(&key, ts),
                            Err(e) => warn!(stream = %key, error = %e, "store write failed"),
                        }
                    }
                    Err(e) => {
                        warn!(stream = %key, error = %e, "stream error, resuming");
                        writer.backoff().await;
                    }
                }
            }
        }
        info!(stream = %key, "stream stopped");
    }

    fn record(&self, key: &str, timestamp_ms: i64) {
        let mut stats = self.stats.write();
        let entry = stats.entry(key.to_string()).or_default();
        entry.messages += 1;
        entry.last_ms = Some(timestamp_ms);
    }

    async fn backoff(&self) {
        if !self.limiter.allow() {
            warn!("reconnect quota exhausted, cooling down");
            tokio::time::sleep(self.limiter.cooldown()).await;
        }
        tokio::time::sleep(Duration::from_secs(self.settings.retry_delay_secs)).await;
    }
}

/// Normalize a push trade into a storable record, synthesizing a stable
/// identifier from timestamp, price, and amount when the source omits one.
fn trade_record(trade: &TradeUpdate) -> TradeRecord {
    let trade_id = match &trade.id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => format!(
            "{}-{:.8}-{:.8}",
            trade.timestamp_ms, trade.price, trade.amount
        ),
    };
    TradeRecord {
        trade_id,
        timestamp_ms: trade.timestamp_ms,
        side: trade.side,
        price: trade.price,
        amount: trade.amount,
        cost: trade.cost.unwrap_or(trade.price * trade.amount),
        taker_or_maker: trade.taker_or_maker.clone(),
        fee: trade.fee,
        fee_currency: trade.fee_currency.clone(),
    }
}

struct BookSnapshot {
    bids: Vec<(f64, f64)>,
    asks: Vec<(f64, f64)>,
    mid_price: Option<f64>,
    spread: Option<f64>,
}

/// Truncate a book to `depth` levels per side and derive mid price and
/// spread from the best bid/ask. An inverted book (ask below bid) has its
/// sides swapped before the derivation.
fn book_metrics(update: &OrderBookUpdate, depth: usize) -> BookSnapshot {
    let mut bids: Vec<(f64, f64)> = update.bids.iter().take(depth).copied().collect();
    let mut asks: Vec<(f64, f64)> = update.asks.iter().take(depth).copied().collect();

    let best_bid = bids.first().map(|l| l.0);
    let best_ask = asks.first().map(|l| l.0);

    let (mut mid_price, mut spread) = (None, None);
    if let (Some(bid), Some(ask)) = (best_bid, best_ask) {
        let (bid, ask) = if ask < bid {
            std::mem::swap(&mut bids, &mut asks);
            (ask, bid)
        } else {
            (bid, ask)
        };
        mid_price = Some((bid + ask) / 2.0);
        spread = Some(ask - bid);
    }

    BookSnapshot {
        bids,
        asks,
        mid_price,
        spread,
    }
}
