pub mod errors;
pub mod models;
pub mod providers;
pub mod services;
pub mod storage;

use chrono::{DateTime, Utc};
use models::{
    analytics::PortfolioAggregates,
    holding::{Holding, NewHolding},
    quote::{RefreshOutcome, RefreshState},
    settings::{SettingChange, Settings},
};
use providers::registry::QuoteProviderRegistry;
use services::{
    analytics_service, portfolio_service::PortfolioService, price_service::PriceFetcher,
    refresh_scheduler::RefreshScheduler,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storage::backend::{FileStore, KeyValueStore, MemoryStore};
use storage::manager::{HoldingsStore, SettingsStore};
use tokio::sync::watch;
use uuid::Uuid;

use errors::CoreError;

/// Main entry point for the Equity Tracker core library.
///
/// Owns the holdings ledger, the refresh settings and the refresh scheduler.
/// The only mutating entry points are [`add_holding`](Self::add_holding),
/// [`remove_holding`](Self::remove_holding),
/// [`update_setting`](Self::update_setting) and
/// [`fetch_all_prices`](Self::fetch_all_prices); each persists before it
/// returns. All methods take `&self`, so the tracker can be shared behind an
/// `Arc`.
#[must_use]
pub struct PortfolioTracker {
    holdings: Arc<HoldingsStore>,
    settings: Arc<SettingsStore>,
    portfolio_service: PortfolioService,
    price_fetcher: Arc<PriceFetcher>,
    scheduler: RefreshScheduler,
    /// Set by `start()`; settings changes only re-arm the timer once mounted.
    started: AtomicBool,
}

impl std::fmt::Debug for PortfolioTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioTracker")
            .field("holdings", &self.holdings.get().len())
            .field("provider", &self.settings.get().provider)
            .field("refresh_state", &self.scheduler.state())
            .field("started", &self.started.load(Ordering::Acquire))
            .finish()
    }
}

impl PortfolioTracker {
    /// Load holdings and settings from `backend` (defaults when absent or
    /// corrupt) with the built-in quote providers.
    pub fn init(backend: Arc<dyn KeyValueStore>) -> Self {
        Self::init_with_registry(backend, QuoteProviderRegistry::new_with_defaults())
    }

    /// Like [`init`](Self::init) but with a caller-supplied provider registry.
    pub fn init_with_registry(backend: Arc<dyn KeyValueStore>, registry: QuoteProviderRegistry) -> Self {
        let holdings = Arc::new(HoldingsStore::load_holdings(Arc::clone(&backend)));
        let settings = Arc::new(SettingsStore::load_settings(backend));
        let price_fetcher = Arc::new(PriceFetcher::new(registry));
        let scheduler = RefreshScheduler::new(
            Arc::clone(&holdings),
            Arc::clone(&settings),
            Arc::clone(&price_fetcher),
        );

        Self {
            holdings,
            settings,
            portfolio_service: PortfolioService::new(),
            price_fetcher,
            scheduler,
            started: AtomicBool::new(false),
        }
    }

    /// Open a tracker persisted as JSON files under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CoreError> {
        let store = FileStore::open(dir)?;
        Ok(Self::init(Arc::new(store)))
    }

    /// A tracker that keeps its state in memory only.
    pub fn in_memory() -> Self {
        Self::init(Arc::new(MemoryStore::new()))
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Mount the refresher: refresh immediately, then every
    /// `refresh_interval_sec`. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
        self.scheduler
            .reschedule(self.settings.get().refresh_interval_sec);
    }

    /// Stop the periodic refresh. In-flight cycles finish normally.
    pub fn stop(&self) {
        self.started.store(false, Ordering::Release);
        self.scheduler.shutdown();
    }

    /// Whether the periodic refresh timer is armed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.scheduler.is_armed()
    }

    // ── Holdings ────────────────────────────────────────────────────

    /// Validate and append a holding. Invalid input leaves the ledger
    /// untouched and returns `CoreError::ValidationError`.
    pub fn add_holding(&self, input: NewHolding) -> Result<Holding, CoreError> {
        self.holdings
            .try_update(|ledger| self.portfolio_service.add_holding(ledger, input))
    }

    /// Remove a holding by its ID, returning the removed record.
    pub fn remove_holding(&self, id: Uuid) -> Result<Holding, CoreError> {
        self.holdings
            .try_update(|ledger| self.portfolio_service.remove_holding(ledger, id))
    }

    /// Snapshot of the ledger, in insertion order.
    #[must_use]
    pub fn holdings(&self) -> Vec<Holding> {
        self.holdings.get()
    }

    /// Get a single holding by its ID.
    #[must_use]
    pub fn get_holding(&self, id: Uuid) -> Option<Holding> {
        self.holdings.get().into_iter().find(|h| h.id == id)
    }

    /// All lots of one symbol (case-insensitive), in ledger order.
    #[must_use]
    pub fn holdings_for_symbol(&self, symbol: &str) -> Vec<Holding> {
        let upper = symbol.trim().to_uppercase();
        self.holdings
            .get()
            .into_iter()
            .filter(|h| h.symbol == upper)
            .collect()
    }

    /// Portfolio aggregates for the current ledger snapshot.
    #[must_use]
    pub fn aggregate(&self) -> PortfolioAggregates {
        analytics_service::aggregate(&self.holdings.get())
    }

    // ── Settings ────────────────────────────────────────────────────

    #[must_use]
    pub fn settings(&self) -> Settings {
        self.settings.get()
    }

    /// Change one setting and persist it. Once started, any change cancels
    /// the refresh timer, refreshes immediately and re-arms the timer with
    /// the (possibly new) interval.
    pub fn update_setting(&self, change: SettingChange) -> Result<Settings, CoreError> {
        let next = self.settings.try_update(|settings| {
            *settings = settings.with_change(change)?;
            Ok(settings.clone())
        })?;

        if self.started.load(Ordering::Acquire) {
            self.scheduler.reschedule(next.refresh_interval_sec);
        }
        Ok(next)
    }

    /// Whether the configured provider has an implementation.
    #[must_use]
    pub fn is_provider_available(&self) -> bool {
        self.price_fetcher.has_provider_for(&self.settings.get())
    }

    /// Names of all registered quote providers.
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.price_fetcher.provider_names()
    }

    // ── Refresh ─────────────────────────────────────────────────────

    /// Refresh every holding's price now and wait for the cycle.
    pub async fn fetch_all_prices(&self) -> RefreshOutcome {
        self.scheduler.refresh_now().await
    }

    #[must_use]
    pub fn refresh_state(&self) -> RefreshState {
        self.scheduler.state()
    }

    /// Watch `Idle`/`Refreshing` transitions.
    pub fn subscribe_refresh_state(&self) -> watch::Receiver<RefreshState> {
        self.scheduler.subscribe()
    }

    /// When the most recent refresh cycle finished.
    #[must_use]
    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.scheduler.last_refreshed()
    }

    // ── Export ──────────────────────────────────────────────────────

    /// Export the ledger as a JSON string (same shape as the persisted record).
    pub fn export_holdings_to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string_pretty(&self.holdings.get())
            .map_err(|e| CoreError::Serialization(format!("Failed to serialize holdings to JSON: {e}")))
    }

    /// Export the ledger as CSV.
    /// Columns: id, symbol, name, sector, qty, price_buy, date_buy, total_buy, last_price
    #[must_use]
    pub fn export_holdings_to_csv(&self) -> String {
        let mut csv = String::from("id,symbol,name,sector,qty,price_buy,date_buy,total_buy,last_price\n");
        for h in &self.holdings.get() {
            let last_price = h.last_price.map(|p| p.to_string()).unwrap_or_default();
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{}\n",
                h.id,
                csv_field(&h.symbol),
                csv_field(&h.name),
                csv_field(&h.sector),
                h.qty,
                h.price_buy,
                h.date_buy,
                h.cost_basis(),
                last_price,
            ));
        }
        csv
    }
}

/// Quote a CSV field containing commas, quotes or newlines.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
