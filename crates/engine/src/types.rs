//! Domain types for the collection and alerting pipeline

use chrono::{DateTime, Utc};
use persistence::repository::{AlertEventRecord, AlertRuleRecord, SnapshotRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Point-in-time metrics for one coin.
///
/// Every metric is optional: the provider may omit any field and the record
/// is still accepted (the quality scorer reflects the gaps).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub coin_id: String,
    /// Display label copied from the watchlist
    pub symbol: String,
    /// Display label copied from the watchlist
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
}

impl MetricRecord {
    pub fn to_snapshot(&self, run_id: &str, recorded_at: DateTime<Utc>) -> SnapshotRecord {
        SnapshotRecord {
            snapshot_id: None,
            run_id: run_id.to_string(),
            coin_id: self.coin_id.clone(),
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            price_usd: self.price_usd,
            market_cap: self.market_cap,
            volume_24h: self.volume_24h,
            change_1h: self.change_1h,
            change_24h: self.change_24h,
            change_7d: self.change_7d,
            change_30d: self.change_30d,
            supply_circulating: self.supply_circulating,
            supply_total: self.supply_total,
            recorded_at: recorded_at.timestamp(),
        }
    }
}

impl From<&SnapshotRecord> for MetricRecord {
    fn from(s: &SnapshotRecord) -> Self {
        Self {
            coin_id: s.coin_id.clone(),
            symbol: s.symbol.clone(),
            name: s.name.clone(),
            price_usd: s.price_usd,
            market_cap: s.market_cap,
            volume_24h: s.volume_24h,
            change_1h: s.change_1h,
            change_24h: s.change_24h,
            change_7d: s.change_7d,
            change_30d: s.change_30d,
            supply_circulating: s.supply_circulating,
            supply_total: s.supply_total,
        }
    }
}

/// Lifecycle status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown run status: {s}")),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which market signal a rule watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PriceChange,
    VolumeSpike,
    MarketCapChange,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceChange => "price_change",
            Self::VolumeSpike => "volume_spike",
            Self::MarketCapChange => "market_cap_change",
        }
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "price_change" => Ok(Self::PriceChange),
            "volume_spike" => Ok(Self::VolumeSpike),
            "market_cap_change" => Ok(Self::MarketCapChange),
            _ => Err(format!("unknown alert type: {s}")),
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a rule's threshold is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Above,
    Below,
    ChangePercent,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Above => "above",
            Self::Below => "below",
            Self::ChangePercent => "change_percent",
        }
    }
}

impl FromStr for Comparison {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "above" => Ok(Self::Above),
            "below" => Ok(Self::Below),
            "change_percent" => Ok(Self::ChangePercent),
            _ => Err(format!("unknown comparison: {s}")),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed alert rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub alert_id: i64,
    pub coin_id: String,
    pub alert_type: AlertType,
    pub threshold_value: f64,
    pub comparison: Comparison,
    pub enabled: bool,
}

impl TryFrom<&AlertRuleRecord> for AlertRule {
    type Error = String;

    fn try_from(r: &AlertRuleRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            alert_id: r.alert_id,
            coin_id: r.coin_id.clone(),
            alert_type: r.alert_type.parse()?,
            threshold_value: r.threshold_value,
            comparison: r.comparison.parse()?,
            enabled: r.enabled,
        })
    }
}

/// A rule that fired for a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_id: i64,
    pub coin_id: String,
    pub triggered_at: DateTime<Utc>,
    pub observed_value: f64,
    pub message: String,
}

impl AlertEvent {
    pub fn to_record(&self, run_id: Option<&str>) -> AlertEventRecord {
        AlertEventRecord {
            event_id: None,
            alert_id: self.alert_id,
            coin_id: self.coin_id.clone(),
            run_id: run_id.map(str::to_string),
            triggered_at: self.triggered_at.timestamp(),
            observed_value: self.observed_value,
            message: self.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_strings_round_trip_through_storage_names() {
        for t in [AlertType::PriceChange, AlertType::VolumeSpike, AlertType::MarketCapChange] {
            assert_eq!(t.as_str().parse::<AlertType>().unwrap(), t);
        }
        assert_eq!("change_percent".parse::<Comparison>().unwrap(), Comparison::ChangePercent);
        assert!("sideways".parse::<Comparison>().is_err());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_rule_record_with_unknown_type_is_rejected() {
        let record = AlertRuleRecord {
            alert_id: 1,
            coin_id: "bitcoin".into(),
            alert_type: "whale_watch".into(),
            threshold_value: 1.0,
            comparison: "above".into(),
            enabled: true,
        };
        assert!(AlertRule::try_from(&record).is_err());
    }

    #[test]
    fn test_snapshot_conversion_keeps_metrics() {
        let record = MetricRecord {
            coin_id: "bitcoin".into(),
            symbol: "BTC".into(),
            name: "Bitcoin".into(),
            price_usd: Some(45000.0),
            change_24h: Some(2.1),
            ..Default::default()
        };
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let snapshot = record.to_snapshot("run-1", at);
        assert_eq!(snapshot.recorded_at, 1_700_000_000);
        assert_eq!(MetricRecord::from(&snapshot), record);
    }
}
