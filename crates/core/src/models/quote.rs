use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// Why a price could not be obtained for a symbol this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnavailableReason {
    /// Provider is missing required configuration (e.g. empty API key).
    Configuration(String),
    /// Network failure, timeout or non-2xx response.
    Transport(String),
    /// Response arrived but carried no usable price.
    Parse(String),
    /// The configured provider has no implementation.
    UnsupportedProvider(String),
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnavailableReason::Configuration(msg) => write!(f, "configuration: {msg}"),
            UnavailableReason::Transport(msg) => write!(f, "transport: {msg}"),
            UnavailableReason::Parse(msg) => write!(f, "parse: {msg}"),
            UnavailableReason::UnsupportedProvider(tag) => write!(f, "unsupported provider: {tag}"),
        }
    }
}

impl From<CoreError> for UnavailableReason {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Configuration(msg) => UnavailableReason::Configuration(msg),
            CoreError::UnsupportedProvider(tag) => UnavailableReason::UnsupportedProvider(tag),
            CoreError::Network(msg) | CoreError::FileIO(msg) => UnavailableReason::Transport(msg),
            other => UnavailableReason::Parse(other.to_string()),
        }
    }
}

/// Result of one price lookup. Never an error: every failure is folded into
/// `Unavailable` so a refresh cycle treats them all the same way.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceLookup {
    Available(f64),
    Unavailable(UnavailableReason),
}

impl PriceLookup {
    #[must_use]
    pub fn price(&self) -> Option<f64> {
        match self {
            PriceLookup::Available(price) => Some(*price),
            PriceLookup::Unavailable(_) => None,
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, PriceLookup::Available(_))
    }
}

/// Scheduler state, for the loading indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// What happened during one completed refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Holdings in the snapshot
    pub requested: usize,
    /// Holdings whose `last_price` was rewritten
    pub updated: usize,
    /// Symbols with no price this cycle, in snapshot order
    pub unavailable: Vec<(String, UnavailableReason)>,
}

/// Outcome of a refresh request.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// The cycle started by this request merged its prices. Coalesced
    /// follow-ups may still be running.
    Completed(CycleReport),
    /// Ledger was empty, nothing fetched, state never left `Idle`.
    Skipped,
    /// A cycle was already running; this request was folded into one
    /// follow-up cycle that runs when the current one finishes.
    Coalesced,
}
