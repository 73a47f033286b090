//! Rule Engine: evaluate a metric record against configured alert rules
//!
//! Evaluation is a pure function of the record, the rule set and the
//! timestamp stamped onto events: no history lookback, no deduplication
//! across calls. A breached threshold fires every time it is evaluated.

use crate::types::{AlertEvent, AlertRule, AlertType, Comparison, MetricRecord};
use chrono::{DateTime, Utc};

/// `volume_spike` fires when 24h volume exceeds this share of market cap
pub const VOLUME_SPIKE_MARKET_CAP_RATIO: f64 = 0.10;

/// Evaluate every enabled rule for the record's coin
pub fn evaluate(
    record: &MetricRecord,
    rules: &[AlertRule],
    triggered_at: DateTime<Utc>,
) -> Vec<AlertEvent> {
    rules
        .iter()
        .filter(|rule| rule.enabled && rule.coin_id == record.coin_id)
        .filter_map(|rule| {
            let observed = check(rule, record)?;
            Some(AlertEvent {
                alert_id: rule.alert_id,
                coin_id: record.coin_id.clone(),
                triggered_at,
                observed_value: observed,
                message: render_message(rule, record, observed),
            })
        })
        .collect()
}

/// Returns the observed value when the rule's condition holds
fn check(rule: &AlertRule, record: &MetricRecord) -> Option<f64> {
    match (rule.alert_type, rule.comparison) {
        (AlertType::PriceChange | AlertType::MarketCapChange, Comparison::ChangePercent) => {
            // 24h change doubles as the market-cap movement proxy
            let change = record.change_24h?;
            (change.abs() >= rule.threshold_value).then_some(change)
        }
        (AlertType::VolumeSpike, Comparison::ChangePercent) => {
            // Fixed heuristic; the configured threshold is informational only
            let volume = record.volume_24h?;
            let market_cap = record.market_cap.filter(|cap| *cap > 0.0)?;
            (volume > market_cap * VOLUME_SPIKE_MARKET_CAP_RATIO).then_some(volume)
        }
        (alert_type, Comparison::Above) => {
            let level = level_metric(alert_type, record)?;
            (level >= rule.threshold_value).then_some(level)
        }
        (alert_type, Comparison::Below) => {
            let level = level_metric(alert_type, record)?;
            (level <= rule.threshold_value).then_some(level)
        }
    }
}

/// The absolute level an above/below rule compares against
fn level_metric(alert_type: AlertType, record: &MetricRecord) -> Option<f64> {
    match alert_type {
        AlertType::PriceChange => record.price_usd,
        AlertType::VolumeSpike => record.volume_24h,
        AlertType::MarketCapChange => record.market_cap,
    }
}

fn render_message(rule: &AlertRule, record: &MetricRecord, observed: f64) -> String {
    let label = format!("{} ({})", record.name, record.symbol);
    let threshold = rule.threshold_value;

    match (rule.alert_type, rule.comparison) {
        (AlertType::PriceChange, Comparison::ChangePercent) => format!(
            "{label} price changed {observed:.2}% (threshold: {threshold}%)"
        ),
        (AlertType::MarketCapChange, Comparison::ChangePercent) => format!(
            "{label} market cap moved {observed:.2}% in 24h (threshold: {threshold}%)"
        ),
        (AlertType::VolumeSpike, Comparison::ChangePercent) => {
            let ratio = record
                .market_cap
                .filter(|cap| *cap > 0.0)
                .map(|cap| observed / cap * 100.0)
                .unwrap_or_default();
            format!("{label} volume spike: ${observed:.0} traded in 24h ({ratio:.1}% of market cap)")
        }
        (alert_type, comparison) => {
            let metric = match alert_type {
                AlertType::PriceChange => "price",
                AlertType::VolumeSpike => "24h volume",
                AlertType::MarketCapChange => "market cap",
            };
            let direction = if comparison == Comparison::Below { "below" } else { "above" };
            format!("{label} {metric} is {direction} {threshold} (current: {observed})")
        }
    }
}

/// Starter rules attached to a newly watched coin: (type, threshold, comparison)
pub const DEFAULT_RULES: [(AlertType, f64, Comparison); 3] = [
    (AlertType::PriceChange, 10.0, Comparison::ChangePercent),
    (AlertType::VolumeSpike, 10.0, Comparison::ChangePercent),
    (AlertType::MarketCapChange, 15.0, Comparison::ChangePercent),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(alert_id: i64, coin_id: &str, alert_type: AlertType, threshold: f64, comparison: Comparison) -> AlertRule {
        AlertRule {
            alert_id,
            coin_id: coin_id.into(),
            alert_type,
            threshold_value: threshold,
            comparison,
            enabled: true,
        }
    }

    fn record(coin_id: &str) -> MetricRecord {
        MetricRecord {
            coin_id: coin_id.into(),
            symbol: "S".into(),
            name: "Sonic".into(),
            ..Default::default()
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_price_change_threshold_is_inclusive() {
        let rules = [rule(1, "bitcoin", AlertType::PriceChange, 10.0, Comparison::ChangePercent)];
        let mut rec = record("bitcoin");

        rec.change_24h = Some(10.0);
        assert_eq!(evaluate(&rec, &rules, now()).len(), 1);

        rec.change_24h = Some(9.99);
        assert!(evaluate(&rec, &rules, now()).is_empty());
    }

    #[test]
    fn test_negative_change_uses_magnitude() {
        let rules = [rule(7, "sonic", AlertType::PriceChange, 15.0, Comparison::ChangePercent)];
        let rec = MetricRecord {
            change_24h: Some(-16.2),
            ..record("sonic")
        };

        let events = evaluate(&rec, &rules, now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].coin_id, "sonic");
        assert_eq!(events[0].alert_id, 7);
        assert_eq!(events[0].observed_value, -16.2);
        assert_eq!(
            events[0].message,
            "Sonic (S) price changed -16.20% (threshold: 15%)"
        );
    }

    #[test]
    fn test_volume_spike_ignores_threshold_value() {
        // Threshold 500 would never be met if it were honoured
        let rules = [rule(2, "bitcoin", AlertType::VolumeSpike, 500.0, Comparison::ChangePercent)];
        let mut rec = MetricRecord {
            market_cap: Some(1_000.0),
            volume_24h: Some(101.0),
            ..record("bitcoin")
        };
        assert_eq!(evaluate(&rec, &rules, now()).len(), 1);

        // Strictly greater than 10%
        rec.volume_24h = Some(100.0);
        assert!(evaluate(&rec, &rules, now()).is_empty());

        // No usable market cap, no spike
        rec.volume_24h = Some(101.0);
        rec.market_cap = Some(0.0);
        assert!(evaluate(&rec, &rules, now()).is_empty());
    }

    #[test]
    fn test_market_cap_change_uses_24h_change() {
        let rules = [rule(3, "bitcoin", AlertType::MarketCapChange, 5.0, Comparison::ChangePercent)];
        let rec = MetricRecord {
            change_24h: Some(5.5),
            ..record("bitcoin")
        };
        let events = evaluate(&rec, &rules, now());
        assert_eq!(events.len(), 1);
        assert!(events[0].message.contains("market cap moved 5.50%"));
    }

    #[test]
    fn test_above_and_below_compare_levels() {
        let rules = [
            rule(4, "bitcoin", AlertType::PriceChange, 40000.0, Comparison::Above),
            rule(5, "bitcoin", AlertType::PriceChange, 50000.0, Comparison::Below),
            rule(6, "bitcoin", AlertType::MarketCapChange, 1e12, Comparison::Above),
        ];
        let rec = MetricRecord {
            price_usd: Some(45000.0),
            market_cap: Some(8.5e11),
            ..record("bitcoin")
        };

        let fired: Vec<i64> = evaluate(&rec, &rules, now()).iter().map(|e| e.alert_id).collect();
        assert_eq!(fired, vec![4, 5]);
    }

    #[test]
    fn test_disabled_and_foreign_rules_are_skipped() {
        let mut disabled = rule(1, "bitcoin", AlertType::PriceChange, 1.0, Comparison::ChangePercent);
        disabled.enabled = false;
        let other_coin = rule(2, "ethereum", AlertType::PriceChange, 1.0, Comparison::ChangePercent);
        let rec = MetricRecord {
            change_24h: Some(50.0),
            ..record("bitcoin")
        };

        assert!(evaluate(&rec, &[disabled, other_coin], now()).is_empty());
    }

    #[test]
    fn test_missing_metric_never_triggers() {
        let rules = [
            rule(1, "bitcoin", AlertType::PriceChange, 0.0, Comparison::ChangePercent),
            rule(2, "bitcoin", AlertType::PriceChange, 0.0, Comparison::Above),
        ];
        assert!(evaluate(&record("bitcoin"), &rules, now()).is_empty());
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let rules = [rule(1, "sonic", AlertType::PriceChange, 15.0, Comparison::ChangePercent)];
        let rec = MetricRecord {
            change_24h: Some(-16.2),
            ..record("sonic")
        };
        assert_eq!(evaluate(&rec, &rules, now()), evaluate(&rec, &rules, now()));
    }
}
