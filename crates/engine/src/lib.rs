//! Coin Pulse Engine: scheduled market-data collection and alerting
//!
//! Provides:
//! - CoinGecko client behind the `MarketDataProvider` seam
//! - Collector with per-request timeout and bounded retries
//! - Data quality scoring and the alert rule engine
//! - Pipeline runner (collect → evaluate → retention) with a guaranteed
//!   terminal status per run
//! - Two-timer scheduler with in-process run exclusion

pub mod api;
pub mod collector;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod quality;
pub mod retention;
pub mod rules;
pub mod scheduler;
pub mod types;

// Re-exports for convenience
pub use api::{CoinGeckoClient, MarketDataProvider, ProviderError, ProviderQuote};
pub use collector::{Collected, Collector};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{AlertCheckSummary, PipelineRunner, RunSummary, StartedRun};
pub use quality::{completeness_score, QualitySample};
pub use retention::{PurgeReport, RetentionManager};
pub use rules::{evaluate, DEFAULT_RULES};
pub use scheduler::{RunGuard, Scheduler, SchedulerState, SchedulerStatus, TriggerOutcome};
pub use types::*;
