use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label used for `name` and `sector` when none is given.
pub const UNLABELED: &str = "-";

/// One recorded purchase lot of a symbol.
///
/// The ledger places no uniqueness constraint on `symbol`: buying the same
/// stock twice produces two holdings. `id`, `symbol`, `qty` and `price_buy`
/// never change after creation; only `last_price` is rewritten, and only by a
/// successful quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    /// Unique identifier
    pub id: Uuid,

    /// Ticker, trimmed and uppercased (e.g., "BBRI", "BMRI.JK")
    pub symbol: String,

    #[serde(default = "unlabeled")]
    pub name: String,

    #[serde(default = "unlabeled")]
    pub sector: String,

    /// Number of units bought (always positive)
    pub qty: f64,

    /// Cost basis per unit (always positive)
    pub price_buy: f64,

    /// Purchase date (no time component)
    pub date_buy: NaiveDate,

    /// `qty * price_buy` at creation. Display only; calculations use
    /// [`Holding::cost_basis`]. A record without it still loads.
    #[serde(default)]
    pub total_buy: f64,

    /// Latest known market price, `None` until the first successful fetch.
    #[serde(default)]
    pub last_price: Option<f64>,
}

fn unlabeled() -> String {
    UNLABELED.to_string()
}

impl Holding {
    /// Total paid for this lot, always recomputed from `qty * price_buy`.
    #[must_use]
    pub fn cost_basis(&self) -> f64 {
        self.qty * self.price_buy
    }

    /// Price used for valuation: the last quote, or the buy price if no
    /// quote has ever succeeded.
    #[must_use]
    pub fn effective_price(&self) -> f64 {
        self.last_price.unwrap_or(self.price_buy)
    }

    /// Current market value of this lot.
    #[must_use]
    pub fn value_now(&self) -> f64 {
        self.qty * self.effective_price()
    }
}

/// User input for a new holding, before validation.
///
/// Optional labels default to `"-"`, and a missing `date_buy` defaults to
/// today's date (UTC).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHolding {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    pub qty: f64,
    pub price_buy: f64,
    #[serde(default)]
    pub date_buy: Option<NaiveDate>,
}

impl NewHolding {
    pub fn new(symbol: impl Into<String>, qty: f64, price_buy: f64) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            price_buy,
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    pub fn date_buy(mut self, date: NaiveDate) -> Self {
        self.date_buy = Some(date);
        self
    }

    /// Build the stored record. Callers validate first; see
    /// `PortfolioService::create_holding`.
    pub(crate) fn into_holding(self) -> Holding {
        let symbol = self.symbol.trim().to_uppercase();
        let label = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(unlabeled)
        };
        Holding {
            id: Uuid::new_v4(),
            symbol,
            name: label(self.name),
            sector: label(self.sector),
            qty: self.qty,
            price_buy: self.price_buy,
            date_buy: self.date_buy.unwrap_or_else(|| Utc::now().date_naive()),
            total_buy: self.qty * self.price_buy,
            last_price: None,
        }
    }
}
