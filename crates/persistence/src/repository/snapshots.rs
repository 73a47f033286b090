//! Snapshot repository: per-coin time series written once per pipeline run

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted snapshot row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SnapshotRecord {
    pub snapshot_id: Option<i64>,
    pub run_id: String,
    pub coin_id: String,
    pub symbol: String,
    pub name: String,
    pub price_usd: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    pub change_1h: Option<f64>,
    pub change_24h: Option<f64>,
    pub change_7d: Option<f64>,
    pub change_30d: Option<f64>,
    pub supply_circulating: Option<f64>,
    pub supply_total: Option<f64>,
    pub recorded_at: i64,
}

const SNAPSHOT_COLUMNS: &str = r#"snapshot_id, run_id, coin_id, symbol, name,
    price_usd, market_cap, volume_24h, change_1h, change_24h, change_7d, change_30d,
    supply_circulating, supply_total, recorded_at"#;

/// Repository for snapshots
pub struct SnapshotRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SnapshotRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a snapshot. Returns false if this run already holds a snapshot
    /// for the coin (the existing row is left untouched).
    pub async fn insert(&self, record: &SnapshotRecord) -> DbResult<bool> {
        let result = sqlx::query(
            r#"INSERT INTO snapshots
                (run_id, coin_id, symbol, name,
                 price_usd, market_cap, volume_24h, change_1h, change_24h, change_7d, change_30d,
                 supply_circulating, supply_total, recorded_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
               ON CONFLICT(run_id, coin_id) DO NOTHING"#,
        )
        .bind(&record.run_id)
        .bind(&record.coin_id)
        .bind(&record.symbol)
        .bind(&record.name)
        .bind(record.price_usd)
        .bind(record.market_cap)
        .bind(record.volume_24h)
        .bind(record.change_1h)
        .bind(record.change_24h)
        .bind(record.change_7d)
        .bind(record.change_30d)
        .bind(record.supply_circulating)
        .bind(record.supply_total)
        .bind(record.recorded_at)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All snapshots written by one run, in insertion order
    pub async fn for_run(&self, run_id: &str) -> DbResult<Vec<SnapshotRecord>> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE run_id = ?1 ORDER BY snapshot_id ASC"
        );
        let records = sqlx::query_as::<_, SnapshotRecord>(&sql)
            .bind(run_id)
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }

    /// The most recent snapshot of every coin currently on the watchlist
    pub async fn latest_per_watched_coin(&self) -> DbResult<Vec<SnapshotRecord>> {
        let sql = format!(
            r#"
            WITH ranked AS (
              SELECT s.snapshot_id,
                ROW_NUMBER() OVER (
                  PARTITION BY s.coin_id ORDER BY s.recorded_at DESC, s.snapshot_id DESC
                ) AS rn
              FROM snapshots s
              JOIN watchlist w ON w.coin_id = s.coin_id
            )
            SELECT {SNAPSHOT_COLUMNS}
            FROM snapshots
            WHERE snapshot_id IN (SELECT snapshot_id FROM ranked WHERE rn = 1)
            ORDER BY coin_id ASC
            "#
        );
        let records = sqlx::query_as::<_, SnapshotRecord>(&sql)
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }

    /// Most recent `limit` snapshots for one coin, newest first
    pub async fn recent_for_coin(&self, coin_id: &str, limit: i64) -> DbResult<Vec<SnapshotRecord>> {
        let sql = format!(
            r#"SELECT {SNAPSHOT_COLUMNS} FROM snapshots
               WHERE coin_id = ?1
               ORDER BY recorded_at DESC, snapshot_id DESC
               LIMIT ?2"#
        );
        let records = sqlx::query_as::<_, SnapshotRecord>(&sql)
            .bind(coin_id)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }

    /// Delete snapshots recorded before `cutoff`. Returns the number of rows removed.
    pub async fn delete_recorded_before(&self, cutoff: i64) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM snapshots WHERE recorded_at < ?1")
            .bind(cutoff)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{RunRepository, WatchlistRepository};
    use crate::Database;

    fn snapshot(run_id: &str, coin_id: &str, price: f64, recorded_at: i64) -> SnapshotRecord {
        SnapshotRecord {
            snapshot_id: None,
            run_id: run_id.into(),
            coin_id: coin_id.into(),
            symbol: coin_id.to_uppercase(),
            name: coin_id.into(),
            price_usd: Some(price),
            market_cap: None,
            volume_24h: None,
            change_1h: None,
            change_24h: Some(1.0),
            change_7d: None,
            change_30d: None,
            supply_circulating: None,
            supply_total: None,
            recorded_at,
        }
    }

    #[tokio::test]
    async fn test_one_snapshot_per_run_and_coin() {
        let db = Database::in_memory().await.unwrap();
        RunRepository::new(db.pool()).create_running("r1", 100).await.unwrap();
        let repo = SnapshotRepository::new(db.pool());

        assert!(repo.insert(&snapshot("r1", "bitcoin", 45000.0, 101)).await.unwrap());
        assert!(!repo.insert(&snapshot("r1", "bitcoin", 1.0, 102)).await.unwrap());

        let rows = repo.for_run("r1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price_usd, Some(45000.0));
    }

    #[tokio::test]
    async fn test_snapshot_requires_existing_run() {
        let db = Database::in_memory().await.unwrap();
        let repo = SnapshotRepository::new(db.pool());

        assert!(repo.insert(&snapshot("ghost", "bitcoin", 1.0, 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_latest_per_watched_coin() {
        let db = Database::in_memory().await.unwrap();
        let runs = RunRepository::new(db.pool());
        runs.create_running("r1", 100).await.unwrap();
        runs.create_running("r2", 200).await.unwrap();
        let watchlist = WatchlistRepository::new(db.pool());
        watchlist.add("bitcoin", "BTC", "Bitcoin", 1, None).await.unwrap();
        watchlist.add("sonic", "S", "Sonic", 1, None).await.unwrap();

        let repo = SnapshotRepository::new(db.pool());
        repo.insert(&snapshot("r1", "bitcoin", 40000.0, 100)).await.unwrap();
        repo.insert(&snapshot("r2", "bitcoin", 45000.0, 200)).await.unwrap();
        repo.insert(&snapshot("r1", "sonic", 0.5, 100)).await.unwrap();
        // No longer watched
        repo.insert(&snapshot("r2", "dogecoin", 0.1, 200)).await.unwrap();

        let latest = repo.latest_per_watched_coin().await.unwrap();
        let summary: Vec<(String, Option<f64>)> = latest
            .into_iter()
            .map(|s| (s.coin_id, s.price_usd))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("bitcoin".to_string(), Some(45000.0)),
                ("sonic".to_string(), Some(0.5)),
            ]
        );

        let history = repo.recent_for_coin("bitcoin", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].run_id, "r2");
    }
}
