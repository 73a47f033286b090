//! Pipeline run repository: lifecycle rows for full pipeline passes

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PipelineRunRecord {
    pub run_id: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub coins_processed: i64,
    pub errors_encountered: i64,
    pub alerts_generated: i64,
    pub execution_time_seconds: Option<f64>,
    /// running | completed | failed
    pub status: String,
    pub error_details: Option<String>,
}

/// Terminal values written when a run leaves `running`
#[derive(Debug, Clone)]
pub struct RunCompletion<'s> {
    pub status: &'s str,
    pub completed_at: i64,
    pub coins_processed: i64,
    pub errors_encountered: i64,
    pub alerts_generated: i64,
    pub execution_time_seconds: f64,
    pub error_details: Option<&'s str>,
}

/// Repository for pipeline runs
pub struct RunRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RunRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new run in `running` state
    pub async fn create_running(&self, run_id: &str, started_at: i64) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO pipeline_runs (run_id, started_at, status) VALUES (?1, ?2, 'running')",
        )
        .bind(run_id)
        .bind(started_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Insert a `running` row only when no other run is `running`.
    /// Returns false, inserting nothing, when one is.
    pub async fn create_running_if_idle(&self, run_id: &str, started_at: i64) -> DbResult<bool> {
        let result = sqlx::query(
            r#"INSERT INTO pipeline_runs (run_id, started_at, status)
               SELECT ?1, ?2, 'running'
               WHERE NOT EXISTS (SELECT 1 FROM pipeline_runs WHERE status = 'running')"#,
        )
        .bind(run_id)
        .bind(started_at)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Oldest run still `running`, if any
    pub async fn running_run_id(&self) -> DbResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT run_id FROM pipeline_runs WHERE status = 'running' ORDER BY started_at ASC LIMIT 1",
        )
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(run_id,)| run_id))
    }

    /// Move a running run to its terminal state. Returns false if the run was
    /// not found or had already left `running`; terminal rows are never rewritten.
    pub async fn finish(&self, run_id: &str, completion: &RunCompletion<'_>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"UPDATE pipeline_runs SET
                 status = ?1,
                 completed_at = ?2,
                 coins_processed = ?3,
                 errors_encountered = ?4,
                 alerts_generated = ?5,
                 execution_time_seconds = ?6,
                 error_details = ?7
               WHERE run_id = ?8 AND status = 'running'"#,
        )
        .bind(completion.status)
        .bind(completion.completed_at)
        .bind(completion.coins_processed)
        .bind(completion.errors_encountered)
        .bind(completion.alerts_generated)
        .bind(completion.execution_time_seconds)
        .bind(completion.error_details)
        .bind(run_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark runs left `running` by a previous process as failed.
    /// Returns the number of runs updated.
    pub async fn fail_orphaned(&self, now: i64, details: &str) -> DbResult<u64> {
        let result = sqlx::query(
            r#"UPDATE pipeline_runs SET
                 status = 'failed',
                 completed_at = ?1,
                 execution_time_seconds = CAST(?1 - started_at AS REAL),
                 error_details = ?2
               WHERE status = 'running'"#,
        )
        .bind(now)
        .bind(details)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn get(&self, run_id: &str) -> DbResult<Option<PipelineRunRecord>> {
        let record =
            sqlx::query_as::<_, PipelineRunRecord>("SELECT * FROM pipeline_runs WHERE run_id = ?1")
                .bind(run_id)
                .fetch_optional(self.pool)
                .await?;

        Ok(record)
    }

    /// Most recent runs first
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<PipelineRunRecord>> {
        let records = sqlx::query_as::<_, PipelineRunRecord>(
            "SELECT * FROM pipeline_runs ORDER BY started_at DESC, run_id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pipeline_runs")
            .fetch_one(self.pool)
            .await?;

        Ok(count)
    }

    /// Delete runs started before `cutoff`. Returns the number of rows removed.
    pub async fn delete_started_before(&self, cutoff: i64) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM pipeline_runs WHERE started_at < ?1")
            .bind(cutoff)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn completed(at: i64) -> RunCompletion<'static> {
        RunCompletion {
            status: "completed",
            completed_at: at,
            coins_processed: 3,
            errors_encountered: 1,
            alerts_generated: 2,
            execution_time_seconds: 4.5,
            error_details: None,
        }
    }

    #[tokio::test]
    async fn test_finish_is_write_once() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(db.pool());

        repo.create_running("run-1", 1_700_000_000).await.unwrap();
        let run = repo.get("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, "running");
        assert!(run.completed_at.is_none());

        assert!(repo.finish("run-1", &completed(1_700_000_005)).await.unwrap());

        let failed = RunCompletion {
            status: "failed",
            error_details: Some("late"),
            ..completed(1_700_000_009)
        };
        assert!(!repo.finish("run-1", &failed).await.unwrap());

        let run = repo.get("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, "completed");
        assert_eq!(run.completed_at, Some(1_700_000_005));
        assert_eq!(run.coins_processed, 3);
        assert_eq!(run.alerts_generated, 2);
    }

    #[tokio::test]
    async fn test_terminal_invariant_enforced_by_schema() {
        let db = Database::in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO pipeline_runs (run_id, started_at, status) VALUES ('bad', 1, 'completed')",
        )
        .execute(db.pool())
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_create_running_if_idle_refuses_while_a_run_is_active() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(db.pool());

        assert!(repo.running_run_id().await.unwrap().is_none());
        assert!(repo.create_running_if_idle("first", 100).await.unwrap());
        assert_eq!(repo.running_run_id().await.unwrap().as_deref(), Some("first"));

        assert!(!repo.create_running_if_idle("second", 110).await.unwrap());
        assert!(repo.get("second").await.unwrap().is_none());

        repo.finish("first", &completed(120)).await.unwrap();
        assert!(repo.running_run_id().await.unwrap().is_none());
        assert!(repo.create_running_if_idle("second", 130).await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fail_orphaned_only_touches_running() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(db.pool());

        repo.create_running("done", 100).await.unwrap();
        repo.finish("done", &completed(110)).await.unwrap();
        repo.create_running("orphan", 200).await.unwrap();

        assert_eq!(repo.fail_orphaned(260, "interrupted").await.unwrap(), 1);

        let orphan = repo.get("orphan").await.unwrap().unwrap();
        assert_eq!(orphan.status, "failed");
        assert_eq!(orphan.completed_at, Some(260));
        assert_eq!(orphan.execution_time_seconds, Some(60.0));
        assert_eq!(repo.get("done").await.unwrap().unwrap().status, "completed");
    }

    #[tokio::test]
    async fn test_recent_and_delete_started_before() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(db.pool());

        for (id, at) in [("a", 100), ("b", 200), ("c", 300)] {
            repo.create_running(id, at).await.unwrap();
        }

        let recent: Vec<String> = repo
            .recent(2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.run_id)
            .collect();
        assert_eq!(recent, vec!["c", "b"]);

        assert_eq!(repo.delete_started_before(250).await.unwrap(), 2);
        assert_eq!(repo.delete_started_before(250).await.unwrap(), 0);
        assert_eq!(repo.count().await.unwrap(), 1);
    }
}
