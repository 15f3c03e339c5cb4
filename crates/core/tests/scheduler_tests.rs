// ═══════════════════════════════════════════════════════════════════
// Scheduler Tests — refresh cycles, stale-price fallback, overlap
// policy, periodic timer
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use equity_tracker_core::errors::CoreError;
use equity_tracker_core::models::holding::{Holding, NewHolding};
use equity_tracker_core::models::quote::{
    CycleReport, RefreshOutcome, RefreshState, UnavailableReason,
};
use equity_tracker_core::models::settings::{ProviderKind, Settings};
use equity_tracker_core::providers::registry::QuoteProviderRegistry;
use equity_tracker_core::providers::traits::QuoteProvider;
use equity_tracker_core::services::portfolio_service::PortfolioService;
use equity_tracker_core::services::price_service::PriceFetcher;
use equity_tracker_core::services::refresh_scheduler::RefreshScheduler;
use equity_tracker_core::storage::backend::{FileStore, MemoryStore};
use equity_tracker_core::storage::manager::{HoldingsStore, SettingsStore};

// ═══════════════════════════════════════════════════════════════════
// Test Helpers
// ═══════════════════════════════════════════════════════════════════

/// Price table provider; counts calls and optionally sleeps before answering.
struct MockProvider {
    prices: Arc<Mutex<HashMap<String, f64>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

#[async_trait]
impl QuoteProvider for MockProvider {
    fn name(&self) -> &str {
        "Mock"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::TwelveData
    }

    async fn fetch_price(&self, symbol: &str, _settings: &Settings) -> Result<f64, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let price = self.prices.lock().unwrap().get(symbol).copied();
        price.ok_or_else(|| CoreError::Network(format!("timeout for {symbol}")))
    }
}

struct Harness {
    backend: Arc<MemoryStore>,
    holdings: Arc<HoldingsStore>,
    scheduler: Arc<RefreshScheduler>,
    prices: Arc<Mutex<HashMap<String, f64>>>,
    calls: Arc<AtomicUsize>,
}

impl Harness {
    fn new(ledger: Vec<Holding>, prices: &[(&str, f64)], delay: Option<Duration>) -> Self {
        let backend = Arc::new(MemoryStore::new());
        let holdings = Arc::new(HoldingsStore::load_holdings(backend.clone()));
        holdings.save(ledger).unwrap();
        let settings = Arc::new(SettingsStore::load_settings(backend.clone()));
        settings
            .update(|s| Settings {
                api_key: "demo".into(),
                ..s.clone()
            })
            .unwrap();

        let prices: Arc<Mutex<HashMap<String, f64>>> = Arc::new(Mutex::new(
            prices.iter().map(|(s, p)| (s.to_string(), *p)).collect(),
        ));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = QuoteProviderRegistry::new();
        registry.register(Box::new(MockProvider {
            prices: Arc::clone(&prices),
            calls: Arc::clone(&calls),
            delay,
        }));

        let scheduler = Arc::new(RefreshScheduler::new(
            Arc::clone(&holdings),
            settings,
            Arc::new(PriceFetcher::new(registry)),
        ));

        Self {
            backend,
            holdings,
            scheduler,
            prices,
            calls,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn price_of(&self, symbol: &str) -> Option<f64> {
        self.holdings
            .get()
            .into_iter()
            .find(|h| h.symbol == symbol)
            .and_then(|h| h.last_price)
    }

    /// Wait until the scheduler reports `Refreshing`.
    async fn wait_refreshing(&self) {
        self.wait_for(RefreshState::Refreshing).await;
    }

    async fn wait_idle(&self) {
        self.wait_for(RefreshState::Idle).await;
    }

    async fn wait_for(&self, state: RefreshState) {
        let mut rx = self.scheduler.subscribe();
        while *rx.borrow() != state {
            rx.changed().await.unwrap();
        }
    }
}

fn lot(symbol: &str, qty: f64, price_buy: f64, last_price: Option<f64>) -> Holding {
    let h = PortfolioService::new()
        .create_holding(NewHolding::new(symbol, qty, price_buy))
        .unwrap();
    Holding { last_price, ..h }
}

fn completed(outcome: RefreshOutcome) -> CycleReport {
    match outcome {
        RefreshOutcome::Completed(report) => report,
        other => panic!("expected a completed cycle, got {other:?}"),
    }
}

// ═══════════════════════════════════════════════════════════════════
// Single cycle
// ═══════════════════════════════════════════════════════════════════

mod single_cycle {
    use super::*;

    #[tokio::test]
    async fn partial_failure_keeps_previous_price() {
        let h = Harness::new(
            vec![
                lot("BBRI", 100.0, 4000.0, Some(4100.0)),
                lot("TLKM", 200.0, 3000.0, Some(3050.0)),
            ],
            &[("BBRI.JK", 4500.0)],
            None,
        );

        let report = completed(h.scheduler.refresh_now().await);

        assert_eq!(h.price_of("BBRI"), Some(4500.0));
        assert_eq!(h.price_of("TLKM"), Some(3050.0));
        assert_eq!(report.requested, 2);
        assert_eq!(report.updated, 1);
        assert_eq!(report.unavailable.len(), 1);
        assert_eq!(report.unavailable[0].0, "TLKM");
        assert!(matches!(report.unavailable[0].1, UnavailableReason::Transport(_)));
    }

    #[tokio::test]
    async fn failure_never_clears_to_none_and_none_stays_none() {
        let h = Harness::new(vec![lot("ASII", 10.0, 5000.0, None)], &[], None);
        let report = completed(h.scheduler.refresh_now().await);
        assert_eq!(report.updated, 0);
        assert_eq!(h.price_of("ASII"), None);
    }

    #[tokio::test]
    async fn one_fetch_per_holding_including_duplicate_symbols() {
        let h = Harness::new(
            vec![
                lot("BBRI", 100.0, 4000.0, None),
                lot("BBRI", 50.0, 4200.0, None),
                lot("BMRI.JK", 10.0, 6000.0, None),
            ],
            &[("BBRI.JK", 4500.0), ("BMRI.JK", 6100.0)],
            None,
        );

        let report = completed(h.scheduler.refresh_now().await);
        assert_eq!(h.calls(), 3);
        assert_eq!(report.updated, 3);
        assert!(h.holdings.get().iter().all(|lot| lot.last_price.is_some()));
    }

    #[tokio::test]
    async fn merged_ledger_is_persisted() {
        let h = Harness::new(vec![lot("BBRI", 1.0, 1.0, None)], &[("BBRI.JK", 4500.0)], None);
        h.scheduler.refresh_now().await;

        let reloaded = HoldingsStore::load_holdings(h.backend.clone());
        assert_eq!(reloaded.get()[0].last_price, Some(4500.0));
    }

    #[tokio::test]
    async fn merge_persists_through_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileStore::open(dir.path()).unwrap());
        let holdings = Arc::new(HoldingsStore::load_holdings(backend.clone()));
        holdings.save(vec![lot("BBRI", 1.0, 1.0, None)]).unwrap();
        let settings = Arc::new(SettingsStore::load_settings(backend));
        settings
            .update(|s| Settings {
                api_key: "demo".into(),
                ..s.clone()
            })
            .unwrap();

        let mut registry = QuoteProviderRegistry::new();
        registry.register(Box::new(MockProvider {
            prices: Arc::new(Mutex::new(HashMap::from([("BBRI.JK".to_string(), 4500.0)]))),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }));
        let scheduler =
            RefreshScheduler::new(holdings, settings, Arc::new(PriceFetcher::new(registry)));

        assert_eq!(completed(scheduler.refresh_now().await).updated, 1);

        let reopened = Arc::new(FileStore::open(dir.path()).unwrap());
        let reloaded = HoldingsStore::load_holdings(reopened);
        assert_eq!(reloaded.get()[0].last_price, Some(4500.0));
    }

    #[tokio::test]
    async fn completion_time_is_recorded() {
        let h = Harness::new(vec![lot("BBRI", 1.0, 1.0, None)], &[], None);
        assert_eq!(h.scheduler.last_refreshed(), None);

        let report = completed(h.scheduler.refresh_now().await);
        assert_eq!(h.scheduler.last_refreshed(), Some(report.finished_at));
        assert!(report.started_at <= report.finished_at);
    }

    #[tokio::test]
    async fn empty_ledger_is_skipped_without_leaving_idle() {
        let h = Harness::new(vec![], &[("BBRI.JK", 1.0)], None);
        let rx = h.scheduler.subscribe();

        assert_eq!(h.scheduler.refresh_now().await, RefreshOutcome::Skipped);
        assert_eq!(h.calls(), 0);
        assert_eq!(h.scheduler.state(), RefreshState::Idle);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(h.scheduler.last_refreshed(), None);
    }

    #[tokio::test]
    async fn returns_to_idle_after_cycle() {
        let h = Harness::new(vec![lot("BBRI", 1.0, 1.0, None)], &[("BBRI.JK", 2.0)], None);
        let mut rx = h.scheduler.subscribe();

        h.scheduler.refresh_now().await;

        assert_eq!(h.scheduler.state(), RefreshState::Idle);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn later_cycle_picks_up_new_prices() {
        let h = Harness::new(vec![lot("BBRI", 1.0, 1.0, None)], &[("BBRI.JK", 4500.0)], None);
        h.scheduler.refresh_now().await;
        h.prices.lock().unwrap().insert("BBRI.JK".into(), 4600.0);
        h.scheduler.refresh_now().await;
        assert_eq!(h.price_of("BBRI"), Some(4600.0));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Overlapping requests
// ═══════════════════════════════════════════════════════════════════

mod overlap {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn requests_during_a_cycle_coalesce_into_one_follow_up() {
        let h = Harness::new(
            vec![lot("BBRI", 1.0, 1.0, None), lot("TLKM", 1.0, 1.0, None)],
            &[("BBRI.JK", 4500.0), ("TLKM.JK", 3000.0)],
            Some(Duration::from_secs(5)),
        );

        let scheduler = Arc::clone(&h.scheduler);
        let first = tokio::spawn(async move { scheduler.refresh_now().await });
        h.wait_refreshing().await;

        assert_eq!(h.scheduler.refresh_now().await, RefreshOutcome::Coalesced);
        assert_eq!(h.scheduler.refresh_now().await, RefreshOutcome::Coalesced);
        assert_eq!(h.scheduler.state(), RefreshState::Refreshing);

        // The first caller is answered after its own cycle, while the
        // follow-up is still fetching.
        let report = completed(first.await.unwrap());
        assert_eq!(report.updated, 2);
        assert_eq!(h.scheduler.state(), RefreshState::Refreshing);

        h.wait_idle().await;
        // Original cycle plus exactly one follow-up, two holdings each.
        assert_eq!(h.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_request_still_finishes_its_cycle() {
        let h = Harness::new(
            vec![lot("BBRI", 1.0, 1.0, None)],
            &[("BBRI.JK", 4500.0)],
            Some(Duration::from_secs(10)),
        );

        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), h.scheduler.refresh_now()).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.scheduler.state(), RefreshState::Idle);
        assert_eq!(h.price_of("BBRI"), Some(4500.0));

        h.prices.lock().unwrap().insert("BBRI.JK".into(), 4600.0);
        let report = completed(h.scheduler.refresh_now().await);
        assert_eq!(report.updated, 1);
        assert_eq!(h.calls(), 2);
        assert_eq!(h.price_of("BBRI"), Some(4600.0));
    }

    #[tokio::test(start_paused = true)]
    async fn holding_removed_mid_cycle_is_not_resurrected() {
        let keep = lot("BBRI", 1.0, 1.0, None);
        let gone = lot("TLKM", 1.0, 1.0, None);
        let gone_id = gone.id;
        let h = Harness::new(
            vec![keep, gone],
            &[("BBRI.JK", 4500.0), ("TLKM.JK", 3000.0)],
            Some(Duration::from_secs(5)),
        );

        let scheduler = Arc::clone(&h.scheduler);
        let cycle = tokio::spawn(async move { scheduler.refresh_now().await });
        h.wait_refreshing().await;

        h.holdings
            .try_update(|ledger| PortfolioService::new().remove_holding(ledger, gone_id))
            .unwrap();
        let added = h
            .holdings
            .try_update(|ledger| {
                PortfolioService::new().add_holding(ledger, NewHolding::new("ASII", 1.0, 1.0))
            })
            .unwrap();

        let report = completed(cycle.await.unwrap());
        let ledger = h.holdings.get();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.iter().all(|l| l.id != gone_id));
        assert_eq!(h.price_of("BBRI"), Some(4500.0));
        assert_eq!(ledger.iter().find(|l| l.id == added.id).unwrap().last_price, None);
        assert_eq!(report.updated, 1);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Periodic timer
// ═══════════════════════════════════════════════════════════════════

mod timer {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_immediate_then_periodic() {
        let h = Harness::new(vec![lot("BBRI", 1.0, 1.0, None)], &[("BBRI.JK", 4500.0)], None);

        h.scheduler.reschedule(60);
        assert!(h.scheduler.is_armed());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.calls(), 1);
        assert_eq!(h.price_of("BBRI"), Some(4500.0));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.calls(), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_previous_timer() {
        let h = Harness::new(vec![lot("BBRI", 1.0, 1.0, None)], &[("BBRI.JK", 1.0)], None);

        h.scheduler.reschedule(60);
        tokio::time::sleep(Duration::from_secs(1)).await; // t=1
        assert_eq!(h.calls(), 1);
        tokio::time::sleep(Duration::from_secs(60)).await; // t=61, tick at 60
        assert_eq!(h.calls(), 2);

        h.scheduler.reschedule(30); // immediate tick at 61, then 91, 121
        tokio::time::sleep(Duration::from_secs(1)).await; // t=62
        assert_eq!(h.calls(), 3);
        tokio::time::sleep(Duration::from_secs(30)).await; // t=92
        assert_eq!(h.calls(), 4);
        // The old 60s timer would have fired at t=120.
        tokio::time::sleep(Duration::from_secs(30)).await; // t=122
        assert_eq!(h.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_ticks() {
        let h = Harness::new(vec![lot("BBRI", 1.0, 1.0, None)], &[("BBRI.JK", 1.0)], None);

        h.scheduler.reschedule(10);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.calls(), 1);

        h.scheduler.shutdown();
        assert!(!h.scheduler.is_armed());
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(h.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_does_not_cancel_in_flight_cycle() {
        let h = Harness::new(
            vec![lot("BBRI", 1.0, 1.0, None)],
            &[("BBRI.JK", 4500.0)],
            Some(Duration::from_secs(5)),
        );

        h.scheduler.reschedule(60);
        h.wait_refreshing().await;
        h.scheduler.shutdown();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.price_of("BBRI"), Some(4500.0));
        assert_eq!(h.scheduler.state(), RefreshState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_scheduler_stops_timer() {
        let h = Harness::new(vec![lot("BBRI", 1.0, 1.0, None)], &[("BBRI.JK", 1.0)], None);
        let calls = Arc::clone(&h.calls);

        h.scheduler.reschedule(10);
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(h);

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_empty_ledger_do_nothing() {
        let h = Harness::new(vec![], &[], None);
        h.scheduler.reschedule(5);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.calls(), 0);
        assert_eq!(h.scheduler.state(), RefreshState::Idle);
    }
}
