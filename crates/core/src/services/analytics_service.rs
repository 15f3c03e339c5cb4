use crate::models::analytics::{HoldingMetrics, PortfolioAggregates};
use crate::models::holding::Holding;

/// Compute portfolio aggregates for a ledger snapshot.
///
/// Pure: no I/O, no clock, same input gives the same output. Cost basis is
/// always recomputed as `qty * price_buy`; the stored `total_buy` is ignored.
/// Holdings that never received a quote are valued at their buy price.
///
/// Rows are reported as they appear in the ledger. Two lots of the same
/// symbol produce two `HoldingMetrics` entries with separate composition
/// shares.
#[must_use]
pub fn aggregate(holdings: &[Holding]) -> PortfolioAggregates {
    let total_modal: f64 = holdings.iter().map(Holding::cost_basis).sum();
    let total_value: f64 = holdings.iter().map(Holding::value_now).sum();
    let total_pl = total_value - total_modal;
    let total_pl_percent = if total_modal > 0.0 {
        total_pl / total_modal
    } else {
        0.0
    };

    let holdings = holdings
        .iter()
        .map(|h| {
            let cost = h.cost_basis();
            let value_now = h.value_now();
            let pl_rp = value_now - cost;
            let pl_pct = if h.price_buy > 0.0 && cost > 0.0 {
                pl_rp / cost
            } else {
                0.0
            };
            let composition = if total_value != 0.0 {
                value_now / total_value
            } else {
                0.0
            };
            HoldingMetrics {
                id: h.id,
                symbol: h.symbol.clone(),
                value_now,
                pl_rp,
                pl_pct,
                composition,
            }
        })
        .collect();

    PortfolioAggregates {
        total_modal,
        total_value,
        total_pl,
        total_pl_percent,
        holdings,
    }
}
