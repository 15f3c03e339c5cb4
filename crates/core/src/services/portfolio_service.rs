use std::collections::HashMap;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::holding::{Holding, NewHolding};

/// Ledger rules: validating new holdings, removing them, and folding fetched
/// quotes back in.
///
/// Pure business logic, no I/O.
pub struct PortfolioService;

impl PortfolioService {
    pub fn new() -> Self {
        Self
    }

    /// Validate user input and build the stored holding.
    ///
    /// Rules:
    /// - Symbol must be non-empty after trimming
    /// - Quantity and buy price must be finite and positive
    pub fn create_holding(&self, input: NewHolding) -> Result<Holding, CoreError> {
        if input.symbol.trim().is_empty() {
            return Err(CoreError::ValidationError("Symbol is required".into()));
        }
        if !input.qty.is_finite() || input.qty <= 0.0 {
            return Err(CoreError::ValidationError(format!(
                "Quantity must be positive, got {}",
                input.qty
            )));
        }
        if !input.price_buy.is_finite() || input.price_buy <= 0.0 {
            return Err(CoreError::ValidationError(format!(
                "Buy price must be positive, got {}",
                input.price_buy
            )));
        }
        Ok(input.into_holding())
    }

    /// Append a validated holding to the ledger.
    pub fn add_holding(&self, ledger: &mut Vec<Holding>, input: NewHolding) -> Result<Holding, CoreError> {
        let holding = self.create_holding(input)?;
        ledger.push(holding.clone());
        Ok(holding)
    }

    /// Remove a holding by its UUID, returning it.
    pub fn remove_holding(&self, ledger: &mut Vec<Holding>, id: Uuid) -> Result<Holding, CoreError> {
        let idx = ledger
            .iter()
            .position(|h| h.id == id)
            .ok_or_else(|| CoreError::HoldingNotFound(id.to_string()))?;
        Ok(ledger.remove(idx))
    }

    /// Write fetched prices into the ledger, matched by holding id.
    ///
    /// Holdings without an entry in `prices` keep their previous
    /// `last_price`; a known price is never cleared. Ids in `prices` that are
    /// no longer in the ledger are ignored. Returns the number of holdings
    /// updated.
    pub fn apply_quotes(&self, ledger: &mut [Holding], prices: &HashMap<Uuid, f64>) -> usize {
        let mut updated = 0;
        for holding in ledger.iter_mut() {
            if let Some(&price) = prices.get(&holding.id) {
                holding.last_price = Some(price);
                updated += 1;
            }
        }
        updated
    }
}

impl Default for PortfolioService {
    fn default() -> Self {
        Self::new()
    }
}
