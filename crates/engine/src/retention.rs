//! Retention Manager: prune old snapshots, quality rows and runs

use crate::error::PipelineError;
use chrono::{DateTime, Duration, Utc};
use persistence::repository::{QualityRepository, RunRepository, SnapshotRepository};
use persistence::SqlitePool;
use serde::Serialize;
use tracing::info;

/// Rows removed per table by one purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub snapshots_deleted: u64,
    pub quality_deleted: u64,
    pub runs_deleted: u64,
}

impl PurgeReport {
    pub fn total(&self) -> u64 {
        self.snapshots_deleted + self.quality_deleted + self.runs_deleted
    }
}

pub struct RetentionManager {
    pool: SqlitePool,
    retention_days: u32,
}

impl RetentionManager {
    pub fn new(pool: SqlitePool, retention_days: u32) -> Self {
        Self {
            pool,
            retention_days,
        }
    }

    /// Delete rows older than the retention window relative to `now`.
    ///
    /// Snapshots and quality rows go after `retention_days`; run rows are kept
    /// for twice as long. Rows exactly at the cutoff are kept.
    pub async fn purge(&self, now: DateTime<Utc>) -> Result<PurgeReport, PipelineError> {
        let row_cutoff = cutoff(now, i64::from(self.retention_days))?;
        let run_cutoff = cutoff(now, i64::from(self.retention_days) * 2)?;

        let snapshots_deleted = SnapshotRepository::new(&self.pool)
            .delete_recorded_before(row_cutoff)
            .await
            .map_err(|e| PipelineError::Retention(format!("snapshots: {e}")))?;

        let quality_deleted = QualityRepository::new(&self.pool)
            .delete_recorded_before(row_cutoff)
            .await
            .map_err(|e| PipelineError::Retention(format!("quality_metrics: {e}")))?;

        let runs_deleted = RunRepository::new(&self.pool)
            .delete_started_before(run_cutoff)
            .await
            .map_err(|e| PipelineError::Retention(format!("pipeline_runs: {e}")))?;

        let report = PurgeReport {
            snapshots_deleted,
            quality_deleted,
            runs_deleted,
        };

        if report.total() > 0 {
            info!(
                snapshots = snapshots_deleted,
                quality = quality_deleted,
                runs = runs_deleted,
                retention_days = self.retention_days,
                "Retention purge removed old rows"
            );
        }

        Ok(report)
    }
}

/// `now - days`, or a retention error when that leaves chrono's range
fn cutoff(now: DateTime<Utc>, days: i64) -> Result<i64, PipelineError> {
    Duration::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .map(|at| at.timestamp())
        .ok_or_else(|| PipelineError::Retention(format!("retention window of {days} days is out of range")))
}
