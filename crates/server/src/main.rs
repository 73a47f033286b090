//! Coin-Pulse: scheduled crypto metrics collection and alerting
//!
//! Usage:
//!   coin-pulse serve --port 3001            Run the scheduler plus HTTP API
//!   coin-pulse run                          One full pipeline run, then exit
//!   coin-pulse add-coin bitcoin BTC Bitcoin --priority 10

mod api;

use clap::{Parser, Subcommand};
use engine::{
    CoinGeckoClient, Collector, PipelineConfig, PipelineRunner, RetentionManager, RunStatus,
    Scheduler, SchedulerState, DEFAULT_RULES,
};
use persistence::repository::{AlertRepository, RunRepository, WatchlistRepository};
use persistence::{DbResult, SqlitePool};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

pub(crate) const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "coin-pulse")]
#[command(about = "Scheduled crypto metrics collection and alerting", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
        /// Serve the API only; no timers
        #[arg(long)]
        no_scheduler: bool,
    },
    /// Run one full pipeline pass from the CLI
    Run,
    /// Re-evaluate alert rules against the latest stored snapshots
    CheckAlerts,
    /// Apply the retention policy now
    Purge,
    /// Add a coin to the watchlist
    AddCoin {
        /// Provider coin id (e.g. "bitcoin")
        coin_id: String,
        /// Ticker symbol (e.g. "BTC")
        symbol: String,
        /// Display name
        name: String,
        /// Higher priorities are collected first
        #[arg(long, default_value_t = 0)]
        priority: i64,
        #[arg(long)]
        notes: Option<String>,
        /// Skip the starter price/volume/market-cap rules
        #[arg(long)]
        no_default_rules: bool,
    },
    /// List recent pipeline runs
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,coin_pulse=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,coin_pulse=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve {
            host,
            port,
            no_scheduler,
        } => {
            cmd_serve(&host, port, no_scheduler).await?;
        }
        Commands::Run => cmd_run().await?,
        Commands::CheckAlerts => cmd_check_alerts().await?,
        Commands::Purge => cmd_purge().await?,
        Commands::AddCoin {
            coin_id,
            symbol,
            name,
            priority,
            notes,
            no_default_rules,
        } => {
            cmd_add_coin(&coin_id, &symbol, &name, priority, notes.as_deref(), !no_default_rules)
                .await?;
        }
        Commands::Runs { limit } => cmd_runs(limit).await?,
    }

    Ok(())
}

// ============================================================================
// Shared setup
// ============================================================================

async fn open_database() -> anyhow::Result<(persistence::Database, String)> {
    let db_path =
        std::env::var("COIN_PULSE_DB_PATH").unwrap_or_else(|_| "data/coin_pulse.db".to_string());
    let db = persistence::Database::new(&db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", db_path);
    Ok((db, db_path))
}

fn build_runner(pool: SqlitePool, config: &PipelineConfig) -> anyhow::Result<PipelineRunner> {
    let base_url = std::env::var("COINGECKO_BASE_URL")
        .unwrap_or_else(|_| engine::api::coingecko::DEFAULT_BASE_URL.to_string());
    let api_key = std::env::var("COINGECKO_API_KEY")
        .ok()
        .filter(|k| !k.is_empty());

    let provider = CoinGeckoClient::with_base_url(&base_url, api_key, config.request_timeout())?;
    let collector = Collector::from_config(Arc::new(provider), config);
    Ok(PipelineRunner::new(pool, collector, config))
}

/// Attach the starter rules to a coin, returning the new alert ids
pub(crate) async fn create_default_rules(pool: &SqlitePool, coin_id: &str) -> DbResult<Vec<i64>> {
    let repo = AlertRepository::new(pool);
    let mut ids = Vec::with_capacity(DEFAULT_RULES.len());
    for (alert_type, threshold, comparison) in DEFAULT_RULES {
        ids.push(
            repo.create_rule(coin_id, alert_type.as_str(), threshold, comparison.as_str(), true)
                .await?,
        );
    }
    Ok(ids)
}

// ============================================================================
// Serve command: scheduler + Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16, no_scheduler: bool) -> anyhow::Result<()> {
    info!("Coin-Pulse v{} starting...", APP_VERSION);

    let config = PipelineConfig::from_env()?;
    let (db, db_path) = open_database().await?;
    let runner = Arc::new(build_runner(db.pool_clone(), &config)?);

    if let Err(e) = runner.recover_orphaned_runs().await {
        warn!("Could not recover interrupted runs: {}", e);
    }

    let scheduler = Arc::new(Scheduler::new(
        runner,
        Arc::new(SchedulerState::new()),
        config.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = if no_scheduler {
        info!("Scheduler disabled, serving API only");
        None
    } else {
        let scheduler = scheduler.clone();
        Some(tokio::spawn(async move { scheduler.run(shutdown_rx).await }))
    };

    let state = api::AppState {
        db: Arc::new(db),
        scheduler,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = axum::Router::new()
        .nest("/api", api::routes(state))
        .layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Coin-Pulse v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!(
        "Full run every {} min, alert check every {} min, retention {} days",
        config.update_interval_minutes,
        config.alert_check_interval_minutes,
        config.data_retention_days
    );
    println!("\nEndpoints:");
    println!("  GET    /api/health                  - Health check");
    println!("  GET    /api/status                  - Scheduler status and last run");
    println!("  POST   /api/pipeline/run            - Trigger a full run");
    println!("  POST   /api/alerts/check            - Trigger an alert-only pass");
    println!("  GET    /api/runs                    - Recent runs");
    println!("  GET    /api/runs/:run_id            - Run detail");
    println!("  GET    /api/watchlist               - Watched coins");
    println!("  POST   /api/watchlist               - Add a coin");
    println!("  PATCH  /api/watchlist/:coin_id      - Update priority/notes");
    println!("  DELETE /api/watchlist/:coin_id      - Stop watching a coin");
    println!("  GET    /api/rules                   - Alert rules");
    println!("  POST   /api/rules                   - Create a rule");
    println!("  POST   /api/rules/:id/enabled       - Enable/disable a rule");
    println!("  GET    /api/alerts/events           - Alert events (?since=ID)");
    println!("  GET    /api/snapshots/:coin_id      - Snapshot history");
    println!("\n  Database: {}", db_path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl+C received, shutting down...");
        })
        .await?;

    // An in-flight run finishes before the worker observes the signal
    shutdown_tx.send(true).ok();
    if let Some(worker) = worker {
        worker.await.ok();
    }

    Ok(())
}

// ============================================================================
// One-shot commands
// ============================================================================

async fn cmd_run() -> anyhow::Result<()> {
    println!("\n=== Coin-Pulse v{} ===", APP_VERSION);

    let config = PipelineConfig::from_env()?;
    let (db, _) = open_database().await?;
    let runner = build_runner(db.pool_clone(), &config)?;

    let watched = WatchlistRepository::new(db.pool()).list_by_priority().await?;
    println!("Collecting {} coin(s)...", watched.len());

    // A `serve` process may own a run right now; orphan recovery is its job
    let Some(summary) = runner.run_if_idle().await? else {
        println!("Another pipeline run is in progress, skipping");
        return Ok(());
    };
    println!("\nRun {}: {}", summary.run_id, summary.status);
    println!(
        "  Coins: {} | Errors: {} | Alerts: {} | Time: {:.1}s",
        summary.coins_processed,
        summary.errors_encountered,
        summary.alerts_generated,
        summary.execution_time_seconds
    );
    if let Some(purge) = summary.purge {
        if purge.total() > 0 {
            println!(
                "  Purged: {} snapshots, {} quality rows, {} runs",
                purge.snapshots_deleted, purge.quality_deleted, purge.runs_deleted
            );
        }
    }
    if let Some(details) = &summary.error_details {
        println!("  Error: {}", details);
    }

    if summary.status == RunStatus::Failed {
        anyhow::bail!("pipeline run {} failed", summary.run_id);
    }
    Ok(())
}

async fn cmd_check_alerts() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env()?;
    let (db, _) = open_database().await?;
    let runner = build_runner(db.pool_clone(), &config)?;

    let summary = runner.check_alerts().await?;
    println!(
        "Checked {} coin(s), {} alert(s) triggered",
        summary.coins_checked, summary.alerts_generated
    );
    for event in &summary.events {
        println!("  [{}] {}", event.coin_id, event.message);
    }
    Ok(())
}

async fn cmd_purge() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env()?;
    let (db, _) = open_database().await?;

    info!("Applying retention: {} days", config.data_retention_days);
    let report = RetentionManager::new(db.pool_clone(), config.data_retention_days)
        .purge(chrono::Utc::now())
        .await?;

    info!(
        "Done! Deleted {} snapshots, {} quality rows, {} runs.",
        report.snapshots_deleted, report.quality_deleted, report.runs_deleted
    );
    Ok(())
}

async fn cmd_add_coin(
    coin_id: &str,
    symbol: &str,
    name: &str,
    priority: i64,
    notes: Option<&str>,
    default_rules: bool,
) -> anyhow::Result<()> {
    let (db, _) = open_database().await?;

    let added = WatchlistRepository::new(db.pool())
        .add(coin_id, symbol, name, priority, notes)
        .await?;
    if !added {
        println!("{} is already on the watchlist", coin_id);
        return Ok(());
    }

    if default_rules {
        let ids = create_default_rules(db.pool(), coin_id).await?;
        println!("Added {} ({}) with {} starter rule(s)", name, symbol, ids.len());
    } else {
        println!("Added {} ({})", name, symbol);
    }
    Ok(())
}

async fn cmd_runs(limit: i64) -> anyhow::Result<()> {
    let (db, _) = open_database().await?;
    let runs = RunRepository::new(db.pool()).recent(limit).await?;

    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    println!(
        "  {:<24} {:<10} {:>6} {:>6} {:>6} {:>8}",
        "Run", "Status", "Coins", "Errors", "Alerts", "Secs"
    );
    println!("  {}", "-".repeat(66));
    for run in &runs {
        println!(
            "  {:<24} {:<10} {:>6} {:>6} {:>6} {:>8.1}",
            run.run_id,
            run.status,
            run.coins_processed,
            run.errors_encountered,
            run.alerts_generated,
            run.execution_time_seconds.unwrap_or_default(),
        );
    }
    Ok(())
}
