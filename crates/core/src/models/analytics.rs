use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Portfolio-level figures computed from one ledger snapshot.
///
/// `holdings` has one entry per ledger row, in ledger order. Lots of the same
/// symbol are reported separately; callers wanting a per-symbol view must sum
/// the rows that share a symbol themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioAggregates {
    /// Σ qty × price_buy
    pub total_modal: f64,

    /// Σ qty × (last_price, or price_buy when no quote yet)
    pub total_value: f64,

    /// total_value − total_modal
    pub total_pl: f64,

    /// total_pl / total_modal as a fraction (0.125 = 12.5%); 0 when
    /// total_modal is 0
    pub total_pl_percent: f64,

    /// Per-row breakdown
    pub holdings: Vec<HoldingMetrics>,
}

/// Figures for a single ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingMetrics {
    pub id: Uuid,
    pub symbol: String,

    /// qty × (last_price, or price_buy)
    pub value_now: f64,

    /// value_now − qty × price_buy
    pub pl_rp: f64,

    /// pl_rp / (qty × price_buy), or 0 when price_buy is not positive
    pub pl_pct: f64,

    /// value_now / total_value, or 0 when total_value is 0
    pub composition: f64,
}

impl PortfolioAggregates {
    /// Share of total value per ledger row, keyed by symbol.
    #[must_use]
    pub fn composition(&self) -> Vec<(&str, f64)> {
        self.holdings
            .iter()
            .map(|h| (h.symbol.as_str(), h.composition))
            .collect()
    }

    /// Absolute profit/loss per ledger row, keyed by symbol.
    #[must_use]
    pub fn profit_series(&self) -> Vec<(&str, f64)> {
        self.holdings
            .iter()
            .map(|h| (h.symbol.as_str(), h.pl_rp))
            .collect()
    }
}
