//! Watchlist repository: the set of coins the pipeline collects data for

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A tracked coin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WatchlistEntry {
    pub coin_id: String,
    pub symbol: String,
    pub name: String,
    /// Higher = collected earlier
    pub priority: i64,
    pub notes: Option<String>,
    pub added_at: i64,
}

/// Repository for the watchlist table
pub struct WatchlistRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> WatchlistRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Add a coin. Returns false (and changes nothing) if `coin_id` is already watched.
    pub async fn add(
        &self,
        coin_id: &str,
        symbol: &str,
        name: &str,
        priority: i64,
        notes: Option<&str>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"INSERT INTO watchlist (coin_id, symbol, name, priority, notes, added_at)
               VALUES (?1, ?2, ?3, ?4, ?5, strftime('%s', 'now'))
               ON CONFLICT(coin_id) DO NOTHING"#,
        )
        .bind(coin_id)
        .bind(symbol)
        .bind(name)
        .bind(priority)
        .bind(notes)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, coin_id: &str) -> DbResult<Option<WatchlistEntry>> {
        let entry = sqlx::query_as::<_, WatchlistEntry>(
            "SELECT coin_id, symbol, name, priority, notes, added_at FROM watchlist WHERE coin_id = ?1",
        )
        .bind(coin_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(entry)
    }

    /// All entries in collection order: priority descending, then coin_id ascending
    pub async fn list_by_priority(&self) -> DbResult<Vec<WatchlistEntry>> {
        let entries = sqlx::query_as::<_, WatchlistEntry>(
            r#"SELECT coin_id, symbol, name, priority, notes, added_at
               FROM watchlist
               ORDER BY priority DESC, coin_id ASC"#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(entries)
    }

    /// Returns false if the coin is not on the watchlist
    pub async fn update_priority(&self, coin_id: &str, priority: i64) -> DbResult<bool> {
        let result = sqlx::query("UPDATE watchlist SET priority = ?1 WHERE coin_id = ?2")
            .bind(priority)
            .bind(coin_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns false if the coin is not on the watchlist
    pub async fn update_notes(&self, coin_id: &str, notes: Option<&str>) -> DbResult<bool> {
        let result = sqlx::query("UPDATE watchlist SET notes = ?1 WHERE coin_id = ?2")
            .bind(notes)
            .bind(coin_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Administrative removal. Historical snapshots for the coin are kept.
    pub async fn remove(&self, coin_id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM watchlist WHERE coin_id = ?1")
            .bind(coin_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn test_add_is_unique_by_coin_id() {
        let db = Database::in_memory().await.unwrap();
        let repo = WatchlistRepository::new(db.pool());

        assert!(repo.add("bitcoin", "BTC", "Bitcoin", 10, None).await.unwrap());
        assert!(!repo.add("bitcoin", "XBT", "Other", 1, None).await.unwrap());

        let entry = repo.get("bitcoin").await.unwrap().unwrap();
        assert_eq!(entry.symbol, "BTC");
        assert_eq!(entry.priority, 10);
    }

    #[tokio::test]
    async fn test_list_orders_by_priority_then_coin_id() {
        let db = Database::in_memory().await.unwrap();
        let repo = WatchlistRepository::new(db.pool());

        repo.add("solana", "SOL", "Solana", 5, None).await.unwrap();
        repo.add("bitcoin", "BTC", "Bitcoin", 10, None).await.unwrap();
        repo.add("cardano", "ADA", "Cardano", 5, None).await.unwrap();
        repo.add("sonic", "S", "Sonic", 1, Some("new listing")).await.unwrap();

        let ids: Vec<String> = repo
            .list_by_priority()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.coin_id)
            .collect();
        assert_eq!(ids, vec!["bitcoin", "cardano", "solana", "sonic"]);
    }

    #[tokio::test]
    async fn test_updates_and_remove() {
        let db = Database::in_memory().await.unwrap();
        let repo = WatchlistRepository::new(db.pool());
        repo.add("ethereum", "ETH", "Ethereum", 1, None).await.unwrap();

        assert!(repo.update_priority("ethereum", 7).await.unwrap());
        assert!(repo.update_notes("ethereum", Some("core")).await.unwrap());
        assert!(!repo.update_priority("missing", 7).await.unwrap());

        let entry = repo.get("ethereum").await.unwrap().unwrap();
        assert_eq!(entry.priority, 7);
        assert_eq!(entry.notes.as_deref(), Some("core"));

        assert!(repo.remove("ethereum").await.unwrap());
        assert!(repo.get("ethereum").await.unwrap().is_none());
    }
}
