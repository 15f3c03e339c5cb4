use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::CoreError;
use crate::models::settings::{ProviderKind, Settings};
use super::traits::QuoteProvider;

const BASE_URL: &str = "https://api.twelvedata.com";

/// Upper bound on a single price request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Twelve Data quote provider.
///
/// - **Endpoint**: `GET {base}/price?symbol=<symbol>&apikey=<key>`
/// - **Requires**: API key (taken from `Settings::api_key` on every call).
/// - **Coverage**: global equities; IDX tickers use the `.JK` suffix.
///
/// The API reports some failures (bad symbol, exhausted quota) as a 200 with
/// `{"status":"error", ...}`; those have no `price` field and are treated like
/// any other malformed response.
pub struct TwelveDataProvider {
    client: Client,
    base_url: String,
}

impl TwelveDataProvider {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Point the provider at another host (a proxy or a local test server).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(client, base_url)
    }

    /// Use a preconfigured client. The client is responsible for bounding
    /// request duration.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for TwelveDataProvider {
    fn default() -> Self {
        Self::new()
    }
}

// ── Twelve Data API response types ──────────────────────────────────

#[derive(Deserialize)]
struct PriceResponse {
    price: Option<PriceField>,
    message: Option<String>,
}

/// Twelve Data sends the price as a string, but accept a bare number too.
#[derive(Deserialize)]
#[serde(untagged)]
enum PriceField {
    Text(String),
    Number(f64),
}

/// Extract the price from a `/price` response body.
pub fn parse_price_response(symbol: &str, body: &str) -> Result<f64, CoreError> {
    let resp: PriceResponse = serde_json::from_str(body).map_err(|e| CoreError::Api {
        provider: "Twelve Data".into(),
        message: format!("Failed to parse price for {symbol}: {e}"),
    })?;

    let price = match resp.price {
        Some(PriceField::Number(n)) => n,
        Some(PriceField::Text(text)) => text.trim().parse().map_err(|e| CoreError::Api {
            provider: "Twelve Data".into(),
            message: format!("Invalid price format for {symbol}: {e}"),
        })?,
        None => {
            let detail = resp.message.unwrap_or_else(|| "no price field".into());
            return Err(CoreError::Api {
                provider: "Twelve Data".into(),
                message: format!("No price for {symbol}: {detail}"),
            });
        }
    };

    if !price.is_finite() {
        return Err(CoreError::Api {
            provider: "Twelve Data".into(),
            message: format!("Non-finite price for {symbol}"),
        });
    }
    Ok(price)
}

#[async_trait]
impl QuoteProvider for TwelveDataProvider {
    fn name(&self) -> &str {
        "Twelve Data"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::TwelveData
    }

    async fn fetch_price(&self, symbol: &str, settings: &Settings) -> Result<f64, CoreError> {
        if settings.api_key.is_empty() {
            return Err(CoreError::Configuration(
                "Twelve Data requires an API key".into(),
            ));
        }

        let response = self
            .client
            .get(format!("{}/price", self.base_url))
            .query(&[("symbol", symbol), ("apikey", settings.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Network(format!(
                "Twelve Data returned HTTP {status} for {symbol}"
            )));
        }

        let body = response.text().await?;
        parse_price_response(symbol, &body)
    }
}
