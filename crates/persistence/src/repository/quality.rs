//! Quality metrics repository

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Completeness and latency of one coin's fetch within one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QualityRecord {
    pub run_id: String,
    pub coin_id: String,
    pub completeness_score: f64,
    pub response_time_ms: i64,
    pub recorded_at: i64,
}

pub struct QualityRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> QualityRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Write-once insert keyed by (run_id, coin_id). Returns false on duplicates.
    pub async fn insert(&self, record: &QualityRecord) -> DbResult<bool> {
        let result = sqlx::query(
            r#"INSERT INTO quality_metrics
                (run_id, coin_id, completeness_score, response_time_ms, recorded_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(run_id, coin_id) DO NOTHING"#,
        )
        .bind(&record.run_id)
        .bind(&record.coin_id)
        .bind(record.completeness_score)
        .bind(record.response_time_ms)
        .bind(record.recorded_at)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn for_run(&self, run_id: &str) -> DbResult<Vec<QualityRecord>> {
        let records = sqlx::query_as::<_, QualityRecord>(
            r#"SELECT run_id, coin_id, completeness_score, response_time_ms, recorded_at
               FROM quality_metrics
               WHERE run_id = ?1
               ORDER BY coin_id ASC"#,
        )
        .bind(run_id)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Delete rows recorded before `cutoff`. Returns the number of rows removed.
    pub async fn delete_recorded_before(&self, cutoff: i64) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM quality_metrics WHERE recorded_at < ?1")
            .bind(cutoff)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RunRepository;
    use crate::Database;

    #[tokio::test]
    async fn test_score_outside_unit_interval_is_rejected() {
        let db = Database::in_memory().await.unwrap();
        RunRepository::new(db.pool()).create_running("r1", 1).await.unwrap();
        let repo = QualityRepository::new(db.pool());

        let mut record = QualityRecord {
            run_id: "r1".into(),
            coin_id: "bitcoin".into(),
            completeness_score: 1.5,
            response_time_ms: 120,
            recorded_at: 2,
        };
        assert!(repo.insert(&record).await.is_err());

        record.completeness_score = 0.75;
        assert!(repo.insert(&record).await.unwrap());
        assert!(!repo.insert(&record).await.unwrap());
        assert_eq!(repo.for_run("r1").await.unwrap(), vec![record]);
    }
}
