//! CoinGecko public API client for coin market data

use super::{MarketDataProvider, ProviderError, ProviderQuote};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const API_KEY_HEADER: &str = "x-cg-demo-api-key";
const COIN_QUERY: &str =
    "localization=false&tickers=false&market_data=true&community_data=false&developer_data=false&sparkline=false";

/// CoinGecko market data client
#[derive(Clone)]
pub struct CoinGeckoClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

/// `GET /coins/{id}` response (only the fields we read).
/// Any field, map-valued ones included, may be absent or `null`.
#[derive(Debug, Deserialize)]
struct CoinResponse {
    #[serde(default)]
    market_data: Option<MarketData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MarketData {
    current_price: Option<CurrencyMap>,
    market_cap: Option<CurrencyMap>,
    total_volume: Option<CurrencyMap>,
    price_change_percentage_1h_in_currency: Option<CurrencyMap>,
    price_change_percentage_24h: Option<f64>,
    price_change_percentage_7d: Option<f64>,
    price_change_percentage_30d: Option<f64>,
    circulating_supply: Option<f64>,
    total_supply: Option<f64>,
}

type CurrencyMap = HashMap<String, Option<f64>>;

fn usd(map: &Option<CurrencyMap>) -> Option<f64> {
    map.as_ref()?.get("usd").copied().flatten()
}

impl From<CoinResponse> for ProviderQuote {
    fn from(resp: CoinResponse) -> Self {
        let md = resp.market_data.unwrap_or_default();
        Self {
            price_usd: usd(&md.current_price),
            market_cap: usd(&md.market_cap),
            volume_24h: usd(&md.total_volume),
            change_1h: usd(&md.price_change_percentage_1h_in_currency),
            change_24h: md.price_change_percentage_24h,
            change_7d: md.price_change_percentage_7d,
            change_30d: md.price_change_percentage_30d,
            supply_circulating: md.circulating_supply,
            supply_total: md.total_supply,
        }
    }
}

impl CoinGeckoClient {
    /// Create a client with a per-request timeout
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, None, timeout)
    }

    /// Create a client against a custom base URL (pro endpoint, proxy, or mock)
    pub fn with_base_url(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("CoinGecko base URL must be hierarchical: {base_url}");
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("coin-pulse/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            timeout,
        })
    }

    /// `{base}/coins/{coin_id}` with the id percent-encoded as one segment
    fn coin_url(&self, coin_id: &str) -> Url {
        let mut url = self.base_url.clone();
        // Checked hierarchical in the constructor
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("coins").push(coin_id);
        }
        url.set_query(Some(COIN_QUERY));
        url
    }
}

#[async_trait]
impl MarketDataProvider for CoinGeckoClient {
    /// GET /coins/{id}: current market data
    async fn fetch_quote(&self, coin_id: &str) -> Result<ProviderQuote, ProviderError> {
        let url = self.coin_url(coin_id);
        debug!(coin_id, "Fetching coin market data");

        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::Transport(e.to_string())
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let parsed: CoinResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(parsed.into())
    }
}
