//! Pipeline Runner: one end-to-end collection pass
//!
//! `Idle → Running → {Completed, Failed}`:
//! 1. Start: persist a `running` run row
//! 2. Collect: fetch every watched coin in priority order, persisting a
//!    snapshot and a quality row per success
//! 3. Evaluate: run the rule engine over this run's snapshots
//! 4. Retention: best-effort purge
//! 5. Finish: record counters and the terminal status
//!
//! Per-coin failures are counted and skipped. Only orchestration failures
//! (the watchlist or rules cannot be read, the datastore is gone) fail the run.

use crate::collector::{Collected, Collector};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::retention::{PurgeReport, RetentionManager};
use crate::rules;
use crate::types::{AlertEvent, AlertRule, MetricRecord, RunStatus};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use persistence::repository::{
    AlertRepository, QualityRecord, QualityRepository, RunCompletion, RunRepository,
    SnapshotRepository, WatchlistRepository,
};
use persistence::SqlitePool;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{error, info, warn};

const FINISH_WRITE_ATTEMPTS: u32 = 3;

/// A run whose `running` row has been persisted
#[derive(Debug, Clone)]
pub struct StartedRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
}

/// Outcome of a full pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub coins_processed: u32,
    pub errors_encountered: u32,
    pub alerts_generated: u32,
    pub execution_time_seconds: f64,
    pub error_details: Option<String>,
    pub purge: Option<PurgeReport>,
}

/// Outcome of an alert-only pass
#[derive(Debug, Clone, Serialize)]
pub struct AlertCheckSummary {
    pub coins_checked: usize,
    pub alerts_generated: u32,
    pub events: Vec<AlertEvent>,
}

#[derive(Debug, Default)]
struct RunCounters {
    coins_processed: u32,
    errors_encountered: u32,
    alerts_generated: u32,
    purge: Option<PurgeReport>,
}

pub struct PipelineRunner {
    pool: SqlitePool,
    collector: Collector,
    retention: RetentionManager,
    rate_limit_delay: Duration,
}

impl PipelineRunner {
    pub fn new(pool: SqlitePool, collector: Collector, config: &PipelineConfig) -> Self {
        Self {
            retention: RetentionManager::new(pool.clone(), config.data_retention_days),
            pool,
            collector,
            rate_limit_delay: config.rate_limit_delay(),
        }
    }

    /// Millisecond timestamp plus a random suffix, sortable by start time
    pub fn new_run_id() -> String {
        format!(
            "{}-{:08x}",
            Utc::now().timestamp_millis(),
            rand::random::<u32>()
        )
    }

    /// Start and execute a run
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let started = self.start().await?;
        Ok(self.execute(started).await)
    }

    /// Start and execute a run unless any run in the store is still
    /// `running`, whichever process owns it. `None` when skipped.
    pub async fn run_if_idle(&self) -> Result<Option<RunSummary>, PipelineError> {
        match self.start_if_idle().await? {
            Some(started) => Ok(Some(self.execute(started).await)),
            None => Ok(None),
        }
    }

    /// Persist a new `running` row. Nothing is persisted on error.
    pub async fn start(&self) -> Result<StartedRun, PipelineError> {
        let run = StartedRun {
            run_id: Self::new_run_id(),
            started_at: Utc::now(),
        };

        RunRepository::new(&self.pool)
            .create_running(&run.run_id, run.started_at.timestamp())
            .await
            .map_err(|e| PipelineError::orchestration("creating run record", e))?;

        info!(run_id = %run.run_id, "Pipeline run started");
        Ok(run)
    }

    async fn start_if_idle(&self) -> Result<Option<StartedRun>, PipelineError> {
        let run = StartedRun {
            run_id: Self::new_run_id(),
            started_at: Utc::now(),
        };

        let repo = RunRepository::new(&self.pool);
        let created = repo
            .create_running_if_idle(&run.run_id, run.started_at.timestamp())
            .await
            .map_err(|e| PipelineError::orchestration("creating run record", e))?;

        if !created {
            let active_run_id = repo
                .running_run_id()
                .await
                .map_err(|e| PipelineError::orchestration("reading active run", e))?;
            info!(active_run_id = ?active_run_id, "Another run is in progress, skipping");
            return Ok(None);
        }

        info!(run_id = %run.run_id, "Pipeline run started");
        Ok(Some(run))
    }

    /// Drive a started run to a terminal status.
    ///
    /// Phase errors and panics both end in `failed`; the terminal write is
    /// always attempted.
    pub async fn execute(&self, run: StartedRun) -> RunSummary {
        let mut counters = RunCounters::default();

        let outcome = AssertUnwindSafe(self.run_phases(&run, &mut counters))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!("pipeline panicked: {}", panic_message(panic.as_ref()))),
        };

        self.finish(&run, counters, failure).await
    }

    async fn run_phases(
        &self,
        run: &StartedRun,
        counters: &mut RunCounters,
    ) -> Result<(), PipelineError> {
        self.collect_phase(run, counters).await?;
        counters.alerts_generated = self.evaluate_phase(run).await?;

        match self.retention.purge(Utc::now()).await {
            Ok(report) => counters.purge = Some(report),
            Err(e) => warn!(run_id = %run.run_id, error = %e, "Retention failed (non-fatal)"),
        }

        Ok(())
    }

    async fn collect_phase(
        &self,
        run: &StartedRun,
        counters: &mut RunCounters,
    ) -> Result<(), PipelineError> {
        let entries = WatchlistRepository::new(&self.pool)
            .list_by_priority()
            .await
            .map_err(|e| PipelineError::orchestration("loading watchlist", e))?;

        if entries.is_empty() {
            warn!(run_id = %run.run_id, "Watchlist is empty, nothing to collect");
            return Ok(());
        }
        info!(run_id = %run.run_id, coins = entries.len(), "Collecting metrics");

        for (i, entry) in entries.iter().enumerate() {
            // Politeness delay between provider calls
            if i > 0 && !self.rate_limit_delay.is_zero() {
                tokio::time::sleep(self.rate_limit_delay).await;
            }

            let collected = match self.collector.fetch(entry).await {
                Ok(c) => c,
                Err(e) => {
                    counters.errors_encountered += 1;
                    warn!(run_id = %run.run_id, coin_id = %entry.coin_id, error = %e, "Fetch failed, continuing");
                    continue;
                }
            };
            match self.persist_collected(run, &collected).await {
                Ok(()) => counters.coins_processed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    counters.errors_encountered += 1;
                    warn!(run_id = %run.run_id, coin_id = %entry.coin_id, error = %e, "Persisting metrics failed, continuing");
                }
            }
        }

        Ok(())
    }

    async fn persist_collected(
        &self,
        run: &StartedRun,
        collected: &Collected,
    ) -> Result<(), PipelineError> {
        let recorded_at = Utc::now();
        let coin_id = &collected.record.coin_id;

        let inserted = SnapshotRepository::new(&self.pool)
            .insert(&collected.record.to_snapshot(&run.run_id, recorded_at))
            .await
            .map_err(|e| PipelineError::escalate_if_unavailable(e, "writing snapshot"))?;
        if !inserted {
            warn!(run_id = %run.run_id, coin_id = %coin_id, "Snapshot already recorded for this run");
        }

        let inserted = QualityRepository::new(&self.pool)
            .insert(&QualityRecord {
                run_id: run.run_id.clone(),
                coin_id: coin_id.clone(),
                completeness_score: collected.quality.completeness_score,
                response_time_ms: collected.quality.response_time_ms as i64,
                recorded_at: recorded_at.timestamp(),
            })
            .await
            .map_err(|e| PipelineError::escalate_if_unavailable(e, "writing quality record"))?;
        if !inserted {
            warn!(run_id = %run.run_id, coin_id = %coin_id, "Quality already recorded for this run");
        }

        Ok(())
    }

    /// Evaluate this run's snapshots (read back from the store) and persist events
    async fn evaluate_phase(&self, run: &StartedRun) -> Result<u32, PipelineError> {
        let rules = self.load_enabled_rules().await?;
        let snapshots = SnapshotRepository::new(&self.pool)
            .for_run(&run.run_id)
            .await
            .map_err(|e| PipelineError::orchestration("reading run snapshots", e))?;

        let now = Utc::now();
        let mut generated = 0u32;
        for snapshot in &snapshots {
            let record = MetricRecord::from(snapshot);
            for event in rules::evaluate(&record, &rules, now) {
                if self.persist_event(&event, Some(&run.run_id)).await? {
                    generated += 1;
                }
            }
        }

        if generated > 0 {
            info!(run_id = %run.run_id, alerts = generated, "Alerts generated");
        }
        Ok(generated)
    }

    /// Alert-only pass: re-evaluate the latest snapshot of every watched coin.
    /// No collection, no run row; events carry no run_id.
    pub async fn check_alerts(&self) -> Result<AlertCheckSummary, PipelineError> {
        let rules = self.load_enabled_rules().await?;
        let snapshots = SnapshotRepository::new(&self.pool)
            .latest_per_watched_coin()
            .await
            .map_err(|e| PipelineError::orchestration("reading latest snapshots", e))?;

        let now = Utc::now();
        let mut events = Vec::new();
        for snapshot in &snapshots {
            let record = MetricRecord::from(snapshot);
            for event in rules::evaluate(&record, &rules, now) {
                if self.persist_event(&event, None).await? {
                    events.push(event);
                }
            }
        }

        info!(
            coins = snapshots.len(),
            alerts = events.len(),
            "Alert check complete"
        );
        Ok(AlertCheckSummary {
            coins_checked: snapshots.len(),
            alerts_generated: events.len() as u32,
            events,
        })
    }

    /// Mark runs left `running` by a previous process as failed
    pub async fn recover_orphaned_runs(&self) -> Result<u64, PipelineError> {
        let recovered = RunRepository::new(&self.pool)
            .fail_orphaned(Utc::now().timestamp(), "interrupted before completion")
            .await
            .map_err(|e| PipelineError::orchestration("recovering orphaned runs", e))?;

        if recovered > 0 {
            warn!(count = recovered, "Marked interrupted runs as failed");
        }
        Ok(recovered)
    }

    /// Point-in-time read of enabled rules; malformed rows are skipped
    async fn load_enabled_rules(&self) -> Result<Vec<AlertRule>, PipelineError> {
        let records = AlertRepository::new(&self.pool)
            .list_enabled_rules()
            .await
            .map_err(|e| PipelineError::orchestration("loading alert rules", e))?;

        Ok(records
            .iter()
            .filter_map(|r| match AlertRule::try_from(r) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(alert_id = r.alert_id, error = %e, "Skipping malformed alert rule");
                    None
                }
            })
            .collect())
    }

    /// Returns Ok(false) when a single write was rejected (logged, skipped)
    async fn persist_event(
        &self,
        event: &AlertEvent,
        run_id: Option<&str>,
    ) -> Result<bool, PipelineError> {
        match AlertRepository::new(&self.pool)
            .insert_event(&event.to_record(run_id))
            .await
        {
            Ok(_) => {
                info!(alert_id = event.alert_id, coin_id = %event.coin_id, message = %event.message, "Alert triggered");
                Ok(true)
            }
            Err(e) => match PipelineError::escalate_if_unavailable(e, "writing alert event") {
                fatal if fatal.is_fatal() => Err(fatal),
                e => {
                    warn!(alert_id = event.alert_id, error = %e, "Dropping alert event");
                    Ok(false)
                }
            },
        }
    }

    async fn finish(
        &self,
        run: &StartedRun,
        counters: RunCounters,
        failure: Option<String>,
    ) -> RunSummary {
        let completed_at = Utc::now();
        let execution_time_seconds =
            (completed_at - run.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        let status = if failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        let completion = RunCompletion {
            status: status.as_str(),
            completed_at: completed_at.timestamp(),
            coins_processed: i64::from(counters.coins_processed),
            errors_encountered: i64::from(counters.errors_encountered),
            alerts_generated: i64::from(counters.alerts_generated),
            execution_time_seconds,
            error_details: failure.as_deref(),
        };

        let repo = RunRepository::new(&self.pool);
        for attempt in 1..=FINISH_WRITE_ATTEMPTS {
            match repo.finish(&run.run_id, &completion).await {
                Ok(true) => break,
                Ok(false) => {
                    warn!(run_id = %run.run_id, "Run was already terminal");
                    break;
                }
                Err(e) if attempt < FINISH_WRITE_ATTEMPTS => {
                    warn!(run_id = %run.run_id, attempt, error = %e, "Recording run outcome failed, retrying");
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(e) => {
                    // Left `running`; startup recovery marks it failed
                    error!(run_id = %run.run_id, error = %e, "Could not record run outcome");
                }
            }
        }

        match &failure {
            None => info!(
                run_id = %run.run_id,
                coins = counters.coins_processed,
                errors = counters.errors_encountered,
                alerts = counters.alerts_generated,
                secs = execution_time_seconds,
                "Pipeline run completed"
            ),
            Some(details) => error!(run_id = %run.run_id, error = %details, "Pipeline run failed"),
        }

        RunSummary {
            run_id: run.run_id.clone(),
            status,
            coins_processed: counters.coins_processed,
            errors_encountered: counters.errors_encountered,
            alerts_generated: counters.alerts_generated,
            execution_time_seconds,
            error_details: failure,
            purge: counters.purge,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
