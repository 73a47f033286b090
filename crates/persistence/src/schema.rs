//! Database schema definitions

/// SQL to create all tables
/// NOTE: All timestamps are unix seconds (INTEGER); metric values are nullable REAL
/// because the upstream provider may omit any field.
pub const CREATE_TABLES: &str = r#"
-- Tracked coins
CREATE TABLE IF NOT EXISTS watchlist (
    coin_id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    name TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    added_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

-- One row per full pipeline pass
CREATE TABLE IF NOT EXISTS pipeline_runs (
    run_id TEXT PRIMARY KEY,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    coins_processed INTEGER NOT NULL DEFAULT 0,
    errors_encountered INTEGER NOT NULL DEFAULT 0,
    alerts_generated INTEGER NOT NULL DEFAULT 0,
    execution_time_seconds REAL,
    status TEXT NOT NULL DEFAULT 'running'
        CHECK (status IN ('running', 'completed', 'failed')),
    error_details TEXT,
    CHECK ((status = 'running') = (completed_at IS NULL))
);

-- Per-coin time series, one row per coin per run
CREATE TABLE IF NOT EXISTS snapshots (
    snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES pipeline_runs(run_id) ON DELETE CASCADE,
    coin_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    name TEXT NOT NULL,
    price_usd REAL,
    market_cap REAL,
    volume_24h REAL,
    change_1h REAL,
    change_24h REAL,
    change_7d REAL,
    change_30d REAL,
    supply_circulating REAL,
    supply_total REAL,
    recorded_at INTEGER NOT NULL,
    UNIQUE (run_id, coin_id)
);

-- Configured alert thresholds
CREATE TABLE IF NOT EXISTS alert_rules (
    alert_id INTEGER PRIMARY KEY AUTOINCREMENT,
    coin_id TEXT NOT NULL,
    alert_type TEXT NOT NULL
        CHECK (alert_type IN ('price_change', 'volume_spike', 'market_cap_change')),
    threshold_value REAL NOT NULL,
    comparison TEXT NOT NULL
        CHECK (comparison IN ('above', 'below', 'change_percent')),
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

-- Append-only log of triggered rules
CREATE TABLE IF NOT EXISTS alert_events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id INTEGER NOT NULL,
    coin_id TEXT NOT NULL,
    run_id TEXT,
    triggered_at INTEGER NOT NULL,
    observed_value REAL NOT NULL,
    message TEXT NOT NULL
);

-- Data quality side channel, one row per coin per run
CREATE TABLE IF NOT EXISTS quality_metrics (
    run_id TEXT NOT NULL REFERENCES pipeline_runs(run_id) ON DELETE CASCADE,
    coin_id TEXT NOT NULL,
    completeness_score REAL NOT NULL
        CHECK (completeness_score >= 0.0 AND completeness_score <= 1.0),
    response_time_ms INTEGER NOT NULL,
    recorded_at INTEGER NOT NULL,
    PRIMARY KEY (run_id, coin_id)
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_watchlist_priority ON watchlist(priority DESC, coin_id ASC);
CREATE INDEX IF NOT EXISTS idx_runs_started ON pipeline_runs(started_at);
CREATE INDEX IF NOT EXISTS idx_snapshots_coin ON snapshots(coin_id, recorded_at DESC);
CREATE INDEX IF NOT EXISTS idx_snapshots_recorded ON snapshots(recorded_at);
CREATE INDEX IF NOT EXISTS idx_rules_coin ON alert_rules(coin_id, enabled);
CREATE INDEX IF NOT EXISTS idx_events_coin ON alert_events(coin_id, triggered_at DESC);
CREATE INDEX IF NOT EXISTS idx_quality_recorded ON quality_metrics(recorded_at)
"#;

/// Additive column migrations, tolerated when the column already exists
pub const MIGRATIONS: &[&str] = &[];
