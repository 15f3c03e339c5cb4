use async_trait::async_trait;

use crate::errors::CoreError;
use crate::models::settings::{ProviderKind, Settings};

/// Trait abstraction for all quote providers.
///
/// Each quote source implements this trait once. Adding a source means adding
/// a `ProviderKind` variant and one implementation registered in
/// `QuoteProviderRegistry`; nothing else in the refresh path changes.
///
/// Implementations must bound the duration of every call (e.g. an HTTP
/// timeout): a refresh cycle waits for every fetch to settle.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Human-readable name of this provider (for logs/errors).
    fn name(&self) -> &str;

    /// The settings tag this provider answers to.
    fn kind(&self) -> ProviderKind;

    /// Get the current price of an already-normalized symbol.
    ///
    /// `settings` carries per-user configuration such as the API key.
    async fn fetch_price(&self, symbol: &str, settings: &Settings) -> Result<f64, CoreError>;
}
