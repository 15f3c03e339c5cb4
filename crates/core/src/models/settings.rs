use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// Default exchange suffix (Indonesia Stock Exchange).
pub const DEFAULT_PRICE_SUFFIX: &str = ".JK";

/// Default refresh interval in seconds.
pub const DEFAULT_REFRESH_INTERVAL_SEC: u64 = 60;

/// Quote source identifier.
///
/// Serialized as its bare tag string. Tags this build does not know are kept
/// as `Other` so a settings record written by a newer version still loads;
/// fetching through an `Other` provider always yields no price.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderKind {
    /// Twelve Data (`api.twelvedata.com`)
    TwelveData,
    /// Any provider tag not implemented here
    Other(String),
}

impl ProviderKind {
    pub fn as_str(&self) -> &str {
        match self {
            ProviderKind::TwelveData => "twelvedata",
            ProviderKind::Other(tag) => tag,
        }
    }
}

impl From<String> for ProviderKind {
    fn from(tag: String) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "twelvedata" => ProviderKind::TwelveData,
            _ => ProviderKind::Other(tag),
        }
    }
}

impl From<&str> for ProviderKind {
    fn from(tag: &str) -> Self {
        ProviderKind::from(tag.to_string())
    }
}

impl From<ProviderKind> for String {
    fn from(kind: ProviderKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refresh configuration, persisted under the `settings` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Which quote source to ask for prices.
    pub provider: ProviderKind,

    /// API key for the provider. Empty disables fetching without failing.
    pub api_key: String,

    /// Appended to symbols without a `.` to form the provider-facing symbol.
    pub price_suffix: String,

    /// Period of the refresh timer, in seconds (always positive).
    pub refresh_interval_sec: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::TwelveData,
            api_key: String::new(),
            price_suffix: DEFAULT_PRICE_SUFFIX.to_string(),
            refresh_interval_sec: DEFAULT_REFRESH_INTERVAL_SEC,
        }
    }
}

/// A single-field change to [`Settings`], as issued by the settings form.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingChange {
    Provider(ProviderKind),
    ApiKey(String),
    PriceSuffix(String),
    RefreshIntervalSec(u64),
}

impl Settings {
    /// Apply a change, returning the new settings. Does not touch `self`
    /// on validation failure.
    pub fn with_change(&self, change: SettingChange) -> Result<Settings, CoreError> {
        let mut next = self.clone();
        match change {
            SettingChange::Provider(provider) => next.provider = provider,
            SettingChange::ApiKey(key) => next.api_key = key.trim().to_string(),
            SettingChange::PriceSuffix(suffix) => next.price_suffix = suffix.trim().to_string(),
            SettingChange::RefreshIntervalSec(0) => {
                return Err(CoreError::ValidationError(
                    "Refresh interval must be at least 1 second".into(),
                ));
            }
            SettingChange::RefreshIntervalSec(secs) => next.refresh_interval_sec = secs,
        }
        Ok(next)
    }
}
