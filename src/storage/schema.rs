//! SQLite schema for the market data tables.
//!
//! All tables share the exchange/symbol/timestamp keying discipline; the
//! uniqueness constraints make concurrent upserts from the historical and
//! live paths commutative.

pub const CREATE_OHLCV_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ohlcv_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exchange TEXT NOT NULL,
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),

    UNIQUE(exchange, symbol, timeframe, timestamp)
);
"#;

pub const CREATE_OHLCV_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_ohlcv_lookup ON ohlcv_data(exchange, symbol, timeframe, timestamp);",
    "CREATE INDEX IF NOT EXISTS idx_ohlcv_time ON ohlcv_data(timestamp);",
];

pub const CREATE_TICKER_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ticker_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exchange TEXT NOT NULL,
    symbol TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    bid REAL NOT NULL,
    ask REAL NOT NULL,
    last REAL NOT NULL,
    volume_24h REAL,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),

    UNIQUE(exchange, symbol, timestamp)
);
"#;

pub const CREATE_TICKER_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_ticker_lookup ON ticker_data(exchange, symbol, timestamp DESC);",
];

pub const CREATE_TRADES_STREAM_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS trades_stream (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exchange TEXT NOT NULL,
    symbol TEXT NOT NULL,
    trade_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    side TEXT NOT NULL,
    price REAL NOT NULL,
    amount REAL NOT NULL,
    cost REAL NOT NULL,
    taker_or_maker TEXT,
    fee REAL,
    fee_currency TEXT,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),

    UNIQUE(exchange, symbol, trade_id)
);
"#;

pub const CREATE_TRADES_STREAM_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_trades_stream_lookup ON trades_stream(exchange, symbol, timestamp DESC);",
];

pub const CREATE_ORDERBOOK_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS orderbook_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exchange TEXT NOT NULL,
    symbol TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    bids TEXT NOT NULL,
    asks TEXT NOT NULL,
    bid_ask_spread REAL,
    mid_price REAL,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),

    UNIQUE(exchange, symbol, timestamp)
);
"#;

pub const CREATE_ORDERBOOK_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_orderbook_lookup ON orderbook_data(exchange, symbol, timestamp DESC);",
];

pub const CREATE_UNFILLABLE_GAPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS unfillable_gaps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exchange TEXT NOT NULL,
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    gap_start INTEGER NOT NULL,
    gap_end INTEGER NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),

    UNIQUE(exchange, symbol, timeframe, gap_start, gap_end)
);
"#;

/// All tables in creation order.
pub const ALL_TABLES: &[&str] = &[
    CREATE_OHLCV_TABLE,
    CREATE_TICKER_TABLE,
    CREATE_TRADES_STREAM_TABLE,
    CREATE_ORDERBOOK_TABLE,
    CREATE_UNFILLABLE_GAPS_TABLE,
];

/// All index groups in creation order.
pub const ALL_INDEXES: &[&[&str]] = &[
    CREATE_OHLCV_INDEXES,
    CREATE_TICKER_INDEXES,
    CREATE_TRADES_STREAM_INDEXES,
    CREATE_ORDERBOOK_INDEXES,
];
