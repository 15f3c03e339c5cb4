use crate::models::settings::ProviderKind;

use super::traits::QuoteProvider;
use super::twelvedata::TwelveDataProvider;

/// Registry of all available quote providers.
///
/// Routes requests to the provider matching `Settings::provider`.
/// New providers can be added without modifying existing code.
pub struct QuoteProviderRegistry {
    providers: Vec<Box<dyn QuoteProvider>>,
}

impl QuoteProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Create a registry with all built-in providers.
    pub fn new_with_defaults() -> Self {
        let mut registry = Self::new();

        // Twelve Data: equities, API key read from settings per call
        registry.register(Box::new(TwelveDataProvider::new()));

        registry
    }

    /// Register a provider. A later registration for the same kind replaces
    /// the earlier one.
    pub fn register(&mut self, provider: Box<dyn QuoteProvider>) {
        let kind = provider.kind();
        self.providers.retain(|p| p.kind() != kind);
        self.providers.push(provider);
    }

    /// Find the provider for a settings tag.
    pub fn get(&self, kind: &ProviderKind) -> Option<&dyn QuoteProvider> {
        self.providers
            .iter()
            .find(|p| &p.kind() == kind)
            .map(|p| p.as_ref())
    }

    /// Names of all registered providers, in registration order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }
}

impl Default for QuoteProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
