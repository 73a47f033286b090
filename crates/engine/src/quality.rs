//! Data quality scoring for fetched records

use crate::types::MetricRecord;
use serde::Serialize;

/// Number of required fields a complete record carries
pub const REQUIRED_FIELD_COUNT: usize = 4;

/// Quality of one fetch, before it is tied to a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualitySample {
    /// Fraction of required fields present and non-zero, in [0, 1]
    pub completeness_score: f64,
    /// Wall-clock latency of the fetch call
    pub response_time_ms: u64,
}

/// Completeness over `price_usd`, `market_cap`, `volume_24h` and `change_24h`.
///
/// A field counts when it is present, finite and non-zero. A record whose
/// 24h change is exactly zero therefore scores at most 0.75.
pub fn completeness_score(record: &MetricRecord) -> f64 {
    let required = [
        record.price_usd,
        record.market_cap,
        record.volume_24h,
        record.change_24h,
    ];
    let present = required
        .iter()
        .filter(|v| matches!(v, Some(x) if x.is_finite() && *x != 0.0))
        .count();

    present as f64 / REQUIRED_FIELD_COUNT as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_record_scores_one() {
        let record = MetricRecord {
            price_usd: Some(45000.0),
            market_cap: Some(8.5e11),
            volume_24h: Some(2.5e10),
            change_24h: Some(2.1),
            ..Default::default()
        };
        assert_eq!(completeness_score(&record), 1.0);
    }

    #[test]
    fn test_missing_zero_and_nan_fields_do_not_count() {
        let record = MetricRecord {
            price_usd: Some(1.0),
            market_cap: Some(0.0),
            volume_24h: Some(f64::NAN),
            change_24h: None,
            // Optional fields never count
            change_7d: Some(3.0),
            ..Default::default()
        };
        assert_eq!(completeness_score(&record), 0.25);
    }

    #[test]
    fn test_empty_record_scores_zero() {
        assert_eq!(completeness_score(&MetricRecord::default()), 0.0);
    }

    #[test]
    fn test_score_always_within_unit_interval() {
        let values = [None, Some(0.0), Some(-5.0), Some(f64::INFINITY), Some(12.0)];
        for a in values {
            for b in values {
                let record = MetricRecord {
                    price_usd: a,
                    market_cap: b,
                    volume_24h: a,
                    change_24h: b,
                    ..Default::default()
                };
                let score = completeness_score(&record);
                assert!((0.0..=1.0).contains(&score), "score {score} out of range");
            }
        }
    }
}
