//! Pipeline configuration, loaded once at startup

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "COIN_PULSE_";

/// One year
const MAX_INTERVAL_MINUTES: u64 = 525_600;
/// One hundred years
const MAX_RETENTION_DAYS: u32 = 36_500;
const MAX_RETRY_DELAY_SECONDS: u64 = 3_600;

/// Scheduling, retry and retention knobs for the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Full collection pass interval (Timer A)
    pub update_interval_minutes: u64,
    /// Alert-only pass interval (Timer B)
    pub alert_check_interval_minutes: u64,
    /// Snapshot and quality rows older than this are purged; runs after twice this
    pub data_retention_days: u32,
    /// Extra attempts for transient provider errors
    pub max_retries: u32,
    /// Base backoff between attempts (multiplied by the attempt number)
    pub retry_delay_seconds: u64,
    /// Per-attempt provider timeout
    pub request_timeout_secs: u64,
    /// Pause between successive coins within one run
    pub rate_limit_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            update_interval_minutes: 60,
            alert_check_interval_minutes: 15,
            data_retention_days: 30,
            max_retries: 3,
            retry_delay_seconds: 5,
            request_timeout_secs: 10,
            rate_limit_delay_ms: 1000,
        }
    }
}

impl PipelineConfig {
    /// Load from `COIN_PULSE_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup (keys carry the `COIN_PULSE_` prefix)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            update_interval_minutes: read(&lookup, "UPDATE_INTERVAL_MINUTES", defaults.update_interval_minutes)?,
            alert_check_interval_minutes: read(
                &lookup,
                "ALERT_CHECK_INTERVAL_MINUTES",
                defaults.alert_check_interval_minutes,
            )?,
            data_retention_days: read(&lookup, "DATA_RETENTION_DAYS", defaults.data_retention_days)?,
            max_retries: read(&lookup, "MAX_RETRIES", defaults.max_retries)?,
            retry_delay_seconds: read(&lookup, "RETRY_DELAY_SECONDS", defaults.retry_delay_seconds)?,
            request_timeout_secs: read(&lookup, "REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            rate_limit_delay_ms: read(&lookup, "RATE_LIMIT_DELAY_MS", defaults.rate_limit_delay_ms)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.update_interval_minutes == 0 {
            anyhow::bail!("{ENV_PREFIX}UPDATE_INTERVAL_MINUTES must be at least 1");
        }
        if self.alert_check_interval_minutes == 0 {
            anyhow::bail!("{ENV_PREFIX}ALERT_CHECK_INTERVAL_MINUTES must be at least 1");
        }
        if self.update_interval_minutes > MAX_INTERVAL_MINUTES {
            anyhow::bail!("{ENV_PREFIX}UPDATE_INTERVAL_MINUTES must be at most {MAX_INTERVAL_MINUTES}");
        }
        if self.alert_check_interval_minutes > MAX_INTERVAL_MINUTES {
            anyhow::bail!("{ENV_PREFIX}ALERT_CHECK_INTERVAL_MINUTES must be at most {MAX_INTERVAL_MINUTES}");
        }
        if self.data_retention_days == 0 {
            anyhow::bail!("{ENV_PREFIX}DATA_RETENTION_DAYS must be at least 1");
        }
        if self.data_retention_days > MAX_RETENTION_DAYS {
            anyhow::bail!("{ENV_PREFIX}DATA_RETENTION_DAYS must be at most {MAX_RETENTION_DAYS}");
        }
        if self.retry_delay_seconds > MAX_RETRY_DELAY_SECONDS {
            anyhow::bail!("{ENV_PREFIX}RETRY_DELAY_SECONDS must be at most {MAX_RETRY_DELAY_SECONDS}");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("{ENV_PREFIX}REQUEST_TIMEOUT_SECS must be at least 1");
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_minutes.saturating_mul(60))
    }

    pub fn alert_check_interval(&self) -> Duration {
        Duration::from_secs(self.alert_check_interval_minutes.saturating_mul(60))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

fn read<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let key = format!("{ENV_PREFIX}{name}");
    match lookup(&key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        _ => Ok(default),
    }
}
