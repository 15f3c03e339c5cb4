use log::warn;

use crate::errors::CoreError;
use crate::models::quote::{PriceLookup, UnavailableReason};
use crate::models::settings::Settings;
use crate::providers::registry::QuoteProviderRegistry;

/// Separator marking a symbol that already carries an exchange qualifier.
pub const SYMBOL_SEPARATOR: char = '.';

/// Build the provider-facing symbol: append `suffix` unless the symbol already
/// contains a `.`.
///
/// ```
/// use equity_tracker_core::services::price_service::normalize_symbol;
/// assert_eq!(normalize_symbol("BMRI", ".JK"), "BMRI.JK");
/// assert_eq!(normalize_symbol("BMRI.JK", ".JK"), "BMRI.JK");
/// ```
#[must_use]
pub fn normalize_symbol(symbol: &str, suffix: &str) -> String {
    if symbol.contains(SYMBOL_SEPARATOR) {
        symbol.to_string()
    } else {
        format!("{symbol}{suffix}")
    }
}

/// Resolves the current price of one symbol through the configured provider.
///
/// Stateless apart from the provider registry. `fetch` never returns an
/// error: configuration, transport and parse failures all come back as
/// `PriceLookup::Unavailable`.
pub struct PriceFetcher {
    registry: QuoteProviderRegistry,
}

impl PriceFetcher {
    pub fn new(registry: QuoteProviderRegistry) -> Self {
        Self { registry }
    }

    /// Check if a provider is registered for the configured tag.
    pub fn has_provider_for(&self, settings: &Settings) -> bool {
        self.registry.get(&settings.provider).is_some()
    }

    /// Names of all registered providers.
    pub fn provider_names(&self) -> Vec<String> {
        self.registry.provider_names()
    }

    /// Fetch the current price for `symbol` under `settings`.
    pub async fn fetch(&self, symbol: &str, settings: &Settings) -> PriceLookup {
        match self.fetch_price(symbol, settings).await {
            Ok(price) => PriceLookup::Available(price),
            Err(e) => {
                warn!("No price for {symbol} this cycle: {e}");
                PriceLookup::Unavailable(UnavailableReason::from(e))
            }
        }
    }

    async fn fetch_price(&self, symbol: &str, settings: &Settings) -> Result<f64, CoreError> {
        let provider = self
            .registry
            .get(&settings.provider)
            .ok_or_else(|| CoreError::UnsupportedProvider(settings.provider.to_string()))?;

        let query_symbol = normalize_symbol(symbol, &settings.price_suffix);
        let price = provider.fetch_price(&query_symbol, settings).await?;

        // Providers may hand back anything; a price must be finite and non-negative.
        if !price.is_finite() || price < 0.0 {
            return Err(CoreError::Api {
                provider: provider.name().to_string(),
                message: format!(
                    "Invalid price returned for {query_symbol}: {price} (must be finite and non-negative)"
                ),
            });
        }
        Ok(price)
    }
}
