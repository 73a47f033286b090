//! Alert repository: configured rules and the append-only event log

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted alert rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AlertRuleRecord {
    pub alert_id: i64,
    pub coin_id: String,
    /// price_change | volume_spike | market_cap_change
    pub alert_type: String,
    pub threshold_value: f64,
    /// above | below | change_percent
    pub comparison: String,
    pub enabled: bool,
}

/// A triggered alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AlertEventRecord {
    pub event_id: Option<i64>,
    pub alert_id: i64,
    pub coin_id: String,
    /// None for events produced by the alert-only pass
    pub run_id: Option<String>,
    pub triggered_at: i64,
    pub observed_value: f64,
    pub message: String,
}

pub struct AlertRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AlertRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    // ---------------------------------------------------------------------
    // Rules
    // ---------------------------------------------------------------------

    /// Create a rule and return its alert_id
    pub async fn create_rule(
        &self,
        coin_id: &str,
        alert_type: &str,
        threshold_value: f64,
        comparison: &str,
        enabled: bool,
    ) -> DbResult<i64> {
        let result = sqlx::query(
            r#"INSERT INTO alert_rules (coin_id, alert_type, threshold_value, comparison, enabled)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
        )
        .bind(coin_id)
        .bind(alert_type)
        .bind(threshold_value)
        .bind(comparison)
        .bind(enabled)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_rule(&self, alert_id: i64) -> DbResult<Option<AlertRuleRecord>> {
        let rule = sqlx::query_as::<_, AlertRuleRecord>(
            r#"SELECT alert_id, coin_id, alert_type, threshold_value, comparison, enabled
               FROM alert_rules WHERE alert_id = ?1"#,
        )
        .bind(alert_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(rule)
    }

    /// Every rule, optionally restricted to one coin
    pub async fn list_rules(&self, coin_id: Option<&str>) -> DbResult<Vec<AlertRuleRecord>> {
        let rules = sqlx::query_as::<_, AlertRuleRecord>(
            r#"SELECT alert_id, coin_id, alert_type, threshold_value, comparison, enabled
               FROM alert_rules
               WHERE ?1 IS NULL OR coin_id = ?1
               ORDER BY alert_id ASC"#,
        )
        .bind(coin_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rules)
    }

    /// Point-in-time read of all enabled rules
    pub async fn list_enabled_rules(&self) -> DbResult<Vec<AlertRuleRecord>> {
        let rules = sqlx::query_as::<_, AlertRuleRecord>(
            r#"SELECT alert_id, coin_id, alert_type, threshold_value, comparison, enabled
               FROM alert_rules
               WHERE enabled = 1
               ORDER BY alert_id ASC"#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rules)
    }

    /// Returns false if the rule does not exist
    pub async fn set_enabled(&self, alert_id: i64, enabled: bool) -> DbResult<bool> {
        let result = sqlx::query("UPDATE alert_rules SET enabled = ?1 WHERE alert_id = ?2")
            .bind(enabled)
            .bind(alert_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    /// Append an event and return its event_id
    pub async fn insert_event(&self, event: &AlertEventRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"INSERT INTO alert_events
                (alert_id, coin_id, run_id, triggered_at, observed_value, message)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
        )
        .bind(event.alert_id)
        .bind(&event.coin_id)
        .bind(&event.run_id)
        .bind(event.triggered_at)
        .bind(event.observed_value)
        .bind(&event.message)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Events with an id greater than `after_event_id`, oldest first.
    /// Lets a notification consumer poll for new rows.
    pub async fn events_since(&self, after_event_id: i64, limit: i64) -> DbResult<Vec<AlertEventRecord>> {
        let events = sqlx::query_as::<_, AlertEventRecord>(
            r#"SELECT event_id, alert_id, coin_id, run_id, triggered_at, observed_value, message
               FROM alert_events
               WHERE event_id > ?1
               ORDER BY event_id ASC
               LIMIT ?2"#,
        )
        .bind(after_event_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(events)
    }

    /// Most recent events first
    pub async fn recent_events(&self, limit: i64) -> DbResult<Vec<AlertEventRecord>> {
        let events = sqlx::query_as::<_, AlertEventRecord>(
            r#"SELECT event_id, alert_id, coin_id, run_id, triggered_at, observed_value, message
               FROM alert_events
               ORDER BY event_id DESC
               LIMIT ?1"#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(events)
    }

    pub async fn events_for_run(&self, run_id: &str) -> DbResult<Vec<AlertEventRecord>> {
        let events = sqlx::query_as::<_, AlertEventRecord>(
            r#"SELECT event_id, alert_id, coin_id, run_id, triggered_at, observed_value, message
               FROM alert_events
               WHERE run_id = ?1
               ORDER BY event_id ASC"#,
        )
        .bind(run_id)
        .fetch_all(self.pool)
        .await?;

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn test_rule_lifecycle() {
        let db = Database::in_memory().await.unwrap();
        let repo = AlertRepository::new(db.pool());

        let sonic = repo
            .create_rule("sonic", "price_change", 15.0, "change_percent", true)
            .await
            .unwrap();
        repo.create_rule("bitcoin", "volume_spike", 10.0, "change_percent", true)
            .await
            .unwrap();

        assert_eq!(repo.list_enabled_rules().await.unwrap().len(), 2);
        assert_eq!(repo.list_rules(Some("sonic")).await.unwrap().len(), 1);
        assert_eq!(repo.list_rules(None).await.unwrap().len(), 2);

        assert!(repo.set_enabled(sonic, false).await.unwrap());
        assert!(!repo.set_enabled(9999, false).await.unwrap());

        let enabled = repo.list_enabled_rules().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].coin_id, "bitcoin");
        assert!(!repo.get_rule(sonic).await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn test_unknown_alert_type_is_rejected() {
        let db = Database::in_memory().await.unwrap();
        let repo = AlertRepository::new(db.pool());

        let result = repo
            .create_rule("bitcoin", "moon_shot", 1.0, "change_percent", true)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_events_since_polls_forward() {
        let db = Database::in_memory().await.unwrap();
        let repo = AlertRepository::new(db.pool());

        let mut last = 0;
        for i in 0..3 {
            last = repo
                .insert_event(&AlertEventRecord {
                    event_id: None,
                    alert_id: 1,
                    coin_id: "sonic".into(),
                    run_id: Some("r1".into()),
                    triggered_at: 100 + i,
                    observed_value: -16.2,
                    message: format!("event {i}"),
                })
                .await
                .unwrap();
        }

        assert_eq!(repo.events_since(0, 10).await.unwrap().len(), 3);
        assert!(repo.events_since(last, 10).await.unwrap().is_empty());
        assert_eq!(repo.recent_events(1).await.unwrap()[0].message, "event 2");
        assert_eq!(repo.events_for_run("r1").await.unwrap().len(), 3);
    }
}
