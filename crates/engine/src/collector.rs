//! Collector: fetch one watched coin's metrics with a timeout and bounded retries

use crate::api::{MarketDataProvider, ProviderError, ProviderQuote};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::quality::{completeness_score, QualitySample};
use crate::types::MetricRecord;
use persistence::repository::WatchlistEntry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of a successful fetch
#[derive(Debug, Clone)]
pub struct Collected {
    pub record: MetricRecord,
    pub quality: QualitySample,
}

#[derive(Clone)]
pub struct Collector {
    provider: Arc<dyn MarketDataProvider>,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl Collector {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        timeout: Duration,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            provider,
            timeout,
            max_retries,
            retry_delay,
        }
    }

    pub fn from_config(provider: Arc<dyn MarketDataProvider>, config: &PipelineConfig) -> Self {
        Self::new(
            provider,
            config.request_timeout(),
            config.max_retries,
            config.retry_delay(),
        )
    }

    /// Fetch current metrics for a watched coin.
    ///
    /// Each attempt is bounded by the timeout. Transient errors are retried up
    /// to `max_retries` times with a linear backoff; anything else surfaces as
    /// `FetchFailed` straight away. Does not touch the store.
    pub async fn fetch(&self, entry: &WatchlistEntry) -> Result<Collected, PipelineError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        let quote = loop {
            match self.attempt(&entry.coin_id).await {
                Ok(quote) => break quote,
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.retry_delay * attempt;
                    warn!(
                        coin_id = %entry.coin_id,
                        attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient fetch error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return Err(PipelineError::FetchFailed {
                        coin_id: entry.coin_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        };

        let record = MetricRecord {
            coin_id: entry.coin_id.clone(),
            symbol: entry.symbol.clone(),
            name: entry.name.clone(),
            price_usd: quote.price_usd,
            market_cap: quote.market_cap,
            volume_24h: quote.volume_24h,
            change_1h: quote.change_1h,
            change_24h: quote.change_24h,
            change_7d: quote.change_7d,
            change_30d: quote.change_30d,
            supply_circulating: quote.supply_circulating,
            supply_total: quote.supply_total,
        };
        let quality = QualitySample {
            completeness_score: completeness_score(&record),
            response_time_ms: started.elapsed().as_millis() as u64,
        };

        debug!(
            coin_id = %entry.coin_id,
            completeness = quality.completeness_score,
            response_time_ms = quality.response_time_ms,
            retries = attempt,
            "Fetched metrics"
        );

        Ok(Collected { record, quality })
    }

    async fn attempt(&self, coin_id: &str) -> Result<ProviderQuote, ProviderError> {
        match tokio::time::timeout(self.timeout, self.provider.fetch_quote(coin_id)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.timeout)),
        }
    }
}
