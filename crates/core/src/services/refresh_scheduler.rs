use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::{self, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};

use crate::models::quote::{CycleReport, PriceLookup, RefreshOutcome, RefreshState};
use crate::services::portfolio_service::PortfolioService;
use crate::services::price_service::PriceFetcher;
use crate::storage::manager::{HoldingsStore, SettingsStore};

/// Drives price refresh cycles, on demand and on a periodic timer.
///
/// A cycle snapshots the ledger, fetches every holding's price concurrently,
/// waits for all of them, then merges the successful prices back into the
/// holdings store. Failed lookups leave the holding's previous price alone.
///
/// Only one cycle runs at a time. A request that arrives mid-cycle is folded
/// into a single follow-up cycle started as soon as the current one ends, so
/// any number of overlapping requests costs at most one extra cycle.
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

struct SchedulerInner {
    holdings: Arc<HoldingsStore>,
    settings: Arc<SettingsStore>,
    fetcher: Arc<PriceFetcher>,
    refreshing: AtomicBool,
    pending: AtomicBool,
    state_tx: watch::Sender<RefreshState>,
    last_refreshed: RwLock<Option<DateTime<Utc>>>,
}

impl RefreshScheduler {
    pub fn new(
        holdings: Arc<HoldingsStore>,
        settings: Arc<SettingsStore>,
        fetcher: Arc<PriceFetcher>,
    ) -> Self {
        let (state_tx, _) = watch::channel(RefreshState::Idle);
        Self {
            inner: Arc::new(SchedulerInner {
                holdings,
                settings,
                fetcher,
                refreshing: AtomicBool::new(false),
                pending: AtomicBool::new(false),
                state_tx,
                last_refreshed: RwLock::new(None),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Run a refresh cycle now and wait for it. Must be called from within a
    /// Tokio runtime. Dropping the future does not cancel the cycle.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.inner.refresh().await
    }

    /// Cancel the current timer (if any) and arm a new one firing every
    /// `interval_secs` seconds. The first tick fires immediately.
    ///
    /// Each tick spawns its cycle as a separate task, so cancelling the timer
    /// never interrupts a cycle already in flight. Must be called from within
    /// a Tokio runtime.
    pub fn reschedule(&self, interval_secs: u64) {
        let period = Duration::from_secs(interval_secs.max(1));
        let mut timer = self.lock_timer();
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        let inner = Arc::clone(&self.inner);
        *timer = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    inner.refresh().await;
                });
            }
        }));
        info!("Price refresh timer armed every {}s", period.as_secs());
    }

    /// Cancel the periodic timer. In-flight cycles run to completion.
    pub fn shutdown(&self) {
        if let Some(handle) = self.lock_timer().take() {
            handle.abort();
            info!("Price refresh timer stopped");
        }
    }

    /// Whether a periodic timer is currently armed.
    pub fn is_armed(&self) -> bool {
        self.lock_timer()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn state(&self) -> RefreshState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state transitions (e.g. to drive a loading indicator).
    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.inner.state_tx.subscribe()
    }

    /// When the most recent cycle finished.
    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        *self
            .inner
            .last_refreshed
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_timer(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_timer().take() {
            handle.abort();
        }
    }
}

impl SchedulerInner {
    /// Start a refresh and wait for the caller's own cycle.
    ///
    /// The cycle loop runs in its own task: dropping the returned future
    /// (timeout, `select!`, aborted caller) detaches from it but never
    /// leaves the scheduler stuck in `Refreshing`. The caller is answered as
    /// soon as its cycle has merged, even if coalesced follow-ups keep the
    /// loop going.
    async fn refresh(self: &Arc<Self>) -> RefreshOutcome {
        // An empty ledger never enters `Refreshing`.
        if self.holdings.get().is_empty() {
            debug!("Refresh skipped: no holdings");
            return RefreshOutcome::Skipped;
        }

        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.pending.store(true, Ordering::Release);
            debug!("Refresh already running, queued one follow-up cycle");
            return RefreshOutcome::Coalesced;
        }
        self.state_tx.send_replace(RefreshState::Refreshing);

        let (reply_tx, reply_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(self).drive(reply_tx));

        match reply_rx.await {
            Ok(Some(report)) => RefreshOutcome::Completed(report),
            Ok(None) => RefreshOutcome::Skipped,
            Err(_) => {
                error!("Refresh cycle task ended without a report");
                RefreshOutcome::Skipped
            }
        }
    }

    /// Run cycles until no follow-up is pending, then go back to `Idle`.
    /// Holds the `refreshing` flag on entry.
    async fn drive(self: Arc<Self>, reply: oneshot::Sender<Option<CycleReport>>) {
        let mut reply = Some(reply);
        loop {
            let report = self.run_cycle().await;
            if self.pending.swap(false, Ordering::AcqRel) {
                answer(&mut reply, report);
                continue;
            }

            self.state_tx.send_replace(RefreshState::Idle);
            self.refreshing.store(false, Ordering::Release);

            // A request may have queued itself between the swap and the store.
            if self.pending.swap(false, Ordering::AcqRel)
                && self
                    .refreshing
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                self.state_tx.send_replace(RefreshState::Refreshing);
                answer(&mut reply, report);
                continue;
            }
            answer(&mut reply, report);
            break;
        }
    }

    /// One fan-out-and-merge pass. `None` if the ledger was empty.
    async fn run_cycle(&self) -> Option<CycleReport> {
        let snapshot = self.holdings.get();
        if snapshot.is_empty() {
            return None;
        }
        let settings = self.settings.get();
        let started_at = Utc::now();
        info!(
            "Refreshing prices for {} holdings via {}",
            snapshot.len(),
            settings.provider
        );

        let lookups = join_all(
            snapshot
                .iter()
                .map(|holding| self.fetcher.fetch(&holding.symbol, &settings)),
        )
        .await;

        let mut prices = HashMap::new();
        let mut unavailable = Vec::new();
        for (holding, lookup) in snapshot.iter().zip(lookups) {
            match lookup {
                PriceLookup::Available(price) => {
                    prices.insert(holding.id, price);
                }
                PriceLookup::Unavailable(reason) => {
                    unavailable.push((holding.symbol.clone(), reason));
                }
            }
        }

        // Merge against the ledger as it is now: holdings added or removed
        // while the fetches were in flight are respected.
        // Persisting may hit the filesystem, so keep it off the async workers.
        let holdings = Arc::clone(&self.holdings);
        let merged = task::spawn_blocking(move || {
            holdings.try_update(|ledger| Ok(PortfolioService::new().apply_quotes(ledger, &prices)))
        })
        .await;
        let updated = match merged {
            Ok(Ok(updated)) => updated,
            Ok(Err(e)) => {
                error!("Failed to persist refreshed prices: {e}");
                0
            }
            Err(e) => {
                error!("Price merge task failed: {e}");
                0
            }
        };

        let finished_at = Utc::now();
        *self
            .last_refreshed
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(finished_at);

        info!(
            "Price refresh finished: {updated}/{} updated, {} unavailable",
            snapshot.len(),
            unavailable.len()
        );

        Some(CycleReport {
            started_at,
            finished_at,
            requested: snapshot.len(),
            updated,
            unavailable,
        })
    }
}

/// Hand the first finished cycle's report to the waiting caller.
fn answer(reply: &mut Option<oneshot::Sender<Option<CycleReport>>>, report: Option<CycleReport>) {
    if let Some(tx) = reply.take() {
        // The caller may have stopped waiting.
        let _ = tx.send(report);
    }
}
