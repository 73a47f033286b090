//! Scheduler: drive full runs and alert-only passes on two timers
//!
//! One worker owns both timers, so scheduled work never overlaps itself.
//! Manual triggers go through the same [`SchedulerState`] gate: a full run
//! requested while another is active is skipped, never queued.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::{AlertCheckSummary, PipelineRunner, RunSummary};
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Debug, Default)]
struct StateInner {
    running: bool,
    current_run_id: Option<String>,
    last_run: Option<RunSummary>,
    last_alert_check: Option<i64>,
    runs_skipped: u64,
}

/// Exclusion flag plus a little bookkeeping for status reporting
#[derive(Debug, Default)]
pub struct SchedulerState {
    inner: Mutex<StateInner>,
}

/// Snapshot of [`SchedulerState`] for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub current_run_id: Option<String>,
    pub last_run: Option<RunSummary>,
    pub last_alert_check: Option<i64>,
    pub runs_skipped: u64,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the running slot. `None` when a run is already active.
    pub fn try_begin(self: &Arc<Self>) -> Option<RunGuard> {
        let mut inner = self.lock();
        if inner.running {
            inner.runs_skipped += 1;
            return None;
        }
        inner.running = true;
        inner.current_run_id = None;
        Some(RunGuard {
            state: Arc::clone(self),
        })
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn current_run_id(&self) -> Option<String> {
        self.lock().current_run_id.clone()
    }

    pub fn status(&self) -> SchedulerStatus {
        let inner = self.lock();
        SchedulerStatus {
            running: inner.running,
            current_run_id: inner.current_run_id.clone(),
            last_run: inner.last_run.clone(),
            last_alert_check: inner.last_alert_check,
            runs_skipped: inner.runs_skipped,
        }
    }

    fn record_alert_check(&self) {
        self.lock().last_alert_check = Some(Utc::now().timestamp());
    }
}

/// Held for the duration of a full run; releases the slot on drop
pub struct RunGuard {
    state: Arc<SchedulerState>,
}

impl RunGuard {
    pub fn set_run_id(&self, run_id: &str) {
        self.state.lock().current_run_id = Some(run_id.to_string());
    }

    fn record(&self, summary: &RunSummary) {
        self.state.lock().last_run = Some(summary.clone());
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut inner = self.state.lock();
        inner.running = false;
        inner.current_run_id = None;
    }
}

/// Result of asking for a full run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// Another run holds the slot
    Skipped { active_run_id: Option<String> },
    Finished(RunSummary),
    /// The run row could not be created; nothing was persisted
    StartFailed { error: String },
}

pub struct Scheduler {
    runner: Arc<PipelineRunner>,
    state: Arc<SchedulerState>,
    config: PipelineConfig,
}

impl Scheduler {
    pub fn new(runner: Arc<PipelineRunner>, state: Arc<SchedulerState>, config: PipelineConfig) -> Self {
        Self {
            runner,
            state,
            config,
        }
    }

    pub fn state(&self) -> &Arc<SchedulerState> {
        &self.state
    }

    /// Run the full pipeline now unless one is already in progress
    pub async fn run_now(&self) -> TriggerOutcome {
        let Some(guard) = self.state.try_begin() else {
            let active_run_id = self.state.current_run_id();
            info!(active_run_id = ?active_run_id, "Pipeline already running, skipping");
            return TriggerOutcome::Skipped { active_run_id };
        };
        self.run_with_guard(guard).await
    }

    /// Run the full pipeline in a slot the caller already claimed with
    /// [`SchedulerState::try_begin`]. The slot is released when this returns.
    pub async fn run_with_guard(&self, guard: RunGuard) -> TriggerOutcome {
        let started = match self.runner.start().await {
            Ok(started) => started,
            Err(e) => {
                error!(error = %e, "Could not start pipeline run");
                return TriggerOutcome::StartFailed {
                    error: e.to_string(),
                };
            }
        };
        guard.set_run_id(&started.run_id);

        let summary = self.runner.execute(started).await;
        guard.record(&summary);
        TriggerOutcome::Finished(summary)
    }

    /// Alert-only pass over the latest stored snapshots
    pub async fn check_alerts(&self) -> Result<AlertCheckSummary, PipelineError> {
        let summary = self.runner.check_alerts().await?;
        self.state.record_alert_check();
        Ok(summary)
    }

    /// Drive both timers until `shutdown` flips to true.
    ///
    /// The full-run timer fires immediately; the alert timer waits one
    /// period. Ticks missed while busy are dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut full_timer = interval(self.config.update_interval());
        full_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let alert_period = self.config.alert_check_interval();
        let first_alert = Instant::now()
            .checked_add(alert_period)
            .unwrap_or_else(Instant::now);
        let mut alert_timer = interval_at(first_alert, alert_period);
        alert_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            update_every_min = self.config.update_interval_minutes,
            alert_every_min = self.config.alert_check_interval_minutes,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = full_timer.tick() => {
                    match self.run_now().await {
                        TriggerOutcome::Finished(_) | TriggerOutcome::Skipped { .. } => {}
                        TriggerOutcome::StartFailed { error } => {
                            warn!(error = %error, "Scheduled run did not start");
                        }
                    }
                }
                _ = alert_timer.tick() => {
                    if let Err(e) = self.check_alerts().await {
                        warn!(error = %e, "Scheduled alert check failed");
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::tests::{bitcoin_quote, StubProvider};
    use crate::collector::Collector;
    use crate::types::RunStatus;
    use persistence::repository::{AlertRepository, RunRepository, WatchlistRepository};
    use persistence::Database;
    use std::time::Duration;

    fn config() -> PipelineConfig {
        PipelineConfig {
            max_retries: 0,
            retry_delay_seconds: 0,
            rate_limit_delay_ms: 0,
            ..PipelineConfig::default()
        }
    }

    async fn scheduler(db: &Database, provider: StubProvider) -> Scheduler {
        WatchlistRepository::new(db.pool())
            .add("bitcoin", "BTC", "Bitcoin", 1, None)
            .await
            .unwrap();
        let collector = Collector::new(Arc::new(provider), Duration::from_secs(1), 0, Duration::ZERO);
        let runner = Arc::new(PipelineRunner::new(db.pool_clone(), collector, &config()));
        Scheduler::new(runner, Arc::new(SchedulerState::new()), config())
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let state = Arc::new(SchedulerState::new());
        let guard = state.try_begin().unwrap();
        guard.set_run_id("r1");
        assert!(state.is_running());
        assert_eq!(state.current_run_id().as_deref(), Some("r1"));
        assert!(state.try_begin().is_none());

        drop(guard);
        assert!(!state.is_running());
        assert!(state.current_run_id().is_none());
        assert!(state.try_begin().is_some());
        assert_eq!(state.status().runs_skipped, 1);
    }

    #[tokio::test]
    async fn test_run_now_skips_while_another_run_is_active() {
        let db = Database::in_memory().await.unwrap();
        let scheduler = scheduler(&db, StubProvider::new().respond("bitcoin", Ok(bitcoin_quote()))).await;

        let guard = scheduler.state().try_begin().unwrap();
        guard.set_run_id("in-flight");

        match scheduler.run_now().await {
            TriggerOutcome::Skipped { active_run_id } => {
                assert_eq!(active_run_id.as_deref(), Some("in-flight"))
            }
            other => panic!("expected skip, got {other:?}"),
        }
        assert_eq!(RunRepository::new(db.pool()).count().await.unwrap(), 0);

        drop(guard);
        match scheduler.run_now().await {
            TriggerOutcome::Finished(summary) => assert_eq!(summary.status, RunStatus::Completed),
            other => panic!("expected a run, got {other:?}"),
        }
        assert_eq!(RunRepository::new(db.pool()).count().await.unwrap(), 1);
        assert!(scheduler.state().status().last_run.is_some());
        assert!(!scheduler.state().is_running());
    }

    #[tokio::test]
    async fn test_claimed_slot_is_held_until_the_run_finishes() {
        let db = Database::in_memory().await.unwrap();
        let provider = StubProvider::with_delay(Duration::from_millis(100))
            .respond("bitcoin", Ok(bitcoin_quote()));
        let scheduler = Arc::new(scheduler(&db, provider).await);

        // Claim first, then hand the guard to the spawned run
        let guard = scheduler.state().try_begin().unwrap();
        let handle = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run_with_guard(guard).await })
        };

        assert!(scheduler.state().try_begin().is_none());
        assert!(matches!(
            scheduler.run_now().await,
            TriggerOutcome::Skipped { .. }
        ));

        match handle.await.unwrap() {
            TriggerOutcome::Finished(summary) => assert_eq!(summary.status, RunStatus::Completed),
            other => panic!("expected a run, got {other:?}"),
        }
        assert!(!scheduler.state().is_running());
        assert_eq!(scheduler.state().status().runs_skipped, 2);
        assert_eq!(RunRepository::new(db.pool()).count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_produce_one_run() {
        let db = Database::in_memory().await.unwrap();
        let provider = StubProvider::with_delay(Duration::from_millis(100))
            .respond("bitcoin", Ok(bitcoin_quote()));
        let scheduler = scheduler(&db, provider).await;

        let (a, b) = tokio::join!(scheduler.run_now(), scheduler.run_now());
        let finished = [&a, &b]
            .iter()
            .filter(|o| matches!(o, TriggerOutcome::Finished(_)))
            .count();
        assert_eq!(finished, 1);
        assert_eq!(RunRepository::new(db.pool()).count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_check_alerts_creates_no_run_rows() {
        let db = Database::in_memory().await.unwrap();
        let scheduler = scheduler(&db, StubProvider::new().respond("bitcoin", Ok(bitcoin_quote()))).await;
        scheduler.run_now().await;
        AlertRepository::new(db.pool())
            .create_rule("bitcoin", "price_change", 1.0, "change_percent", true)
            .await
            .unwrap();

        let summary = scheduler.check_alerts().await.unwrap();
        assert_eq!(summary.alerts_generated, 1);
        assert_eq!(RunRepository::new(db.pool()).count().await.unwrap(), 1);
        assert!(scheduler.state().status().last_alert_check.is_some());
    }

    #[tokio::test]
    async fn test_worker_runs_at_startup_and_stops_on_shutdown() {
        let db = Database::in_memory().await.unwrap();
        let scheduler = Arc::new(
            scheduler(&db, StubProvider::new().respond("bitcoin", Ok(bitcoin_quote()))).await,
        );
        let state = Arc::clone(scheduler.state());
        let (tx, rx) = watch::channel(false);

        let worker = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run(rx).await })
        };
        for _ in 0..50 {
            if state.status().last_run.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(state.status().last_run.is_some());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .expect("worker should stop")
            .unwrap();
        assert_eq!(RunRepository::new(db.pool()).count().await.unwrap(), 1);
    }
}
