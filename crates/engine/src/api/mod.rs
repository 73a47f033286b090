//! Upstream market-data providers

pub mod coingecko;

pub use coingecko::CoinGeckoClient;

use async_trait::async_trait;
use thiserror::Error;

/// Raw metrics returned by a provider for one coin. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderQuote {
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

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Transport failures, timeouts, rate limiting and server errors are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// "Get metrics for coin X" against some upstream source
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_quote(&self, coin_id: &str) -> Result<ProviderQuote, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Transport("reset".into()).is_transient());
        assert!(ProviderError::Timeout(std::time::Duration::from_secs(10)).is_transient());
        assert!(ProviderError::Status { status: 429, body: String::new() }.is_transient());
        assert!(ProviderError::Status { status: 503, body: String::new() }.is_transient());
        assert!(!ProviderError::Status { status: 404, body: String::new() }.is_transient());
        assert!(!ProviderError::Decode("eof".into()).is_transient());
    }
}
