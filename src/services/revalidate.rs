//! Revalidation controller.
//!
//! Holds one [`CacheEntry`] per source key, seeded from the prefetch
//! [`FallbackSnapshot`], and keeps each one fresh on its own schedule:
//!
//! - Mount, interval, focus and reconnect triggers start a fetch unless the
//!   entry is already validating or its previous fetch started less than
//!   `dedupWindowMs` ago. Manual triggers always start one.
//! - A fetch makes at most `maxRetries + 1` attempts, each bounded by
//!   `clientTimeoutMs`, with `retryBackoffMs` between attempts.
//! - Every fetch carries the entry's generation. A result whose generation is
//!   no longer current (a manual trigger superseded it) is discarded.
//! - After retries are exhausted the entry records the error and keeps its
//!   last data, so stale-but-present always wins over an error state.
//! - An estimated bundle is a failed attempt. Only real upstream data
//!   replaces an entry's data; estimates reach it only through the seed.
//!
//! State lives in `Arc<Inner>`; the controller is a cheap clonable handle held
//! in the axum state and by the background run loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use utoipa::ToSchema;

use crate::errors::{UpstreamError, UpstreamErrorBody};
use crate::models::{FallbackSnapshot, SourceBundle, SourceKey};
use crate::services::clock::Clock;
use crate::services::fetcher::SourceFetcher;
use crate::services::freshness::PolicyTable;
use crate::services::scheduler::{ClientEvent, Scheduler, Trigger};
use crate::services::trend::{compute_trend, LevelHistory, TrendAnnotation};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Shortest sleep of the run loop between ticks (seconds).
const RUN_LOOP_MIN_SLEEP_SECS: u64 = 1;

/// Longest sleep of the run loop between ticks (seconds).
const RUN_LOOP_MAX_SLEEP_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Cache entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntryPhase {
    Uninitialized,
    /// Holding prefetch data, not yet fetched independently.
    Seeded,
    Validating,
    Fresh,
    Errored,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Option<SourceBundle>,
    error: Option<UpstreamError>,
    phase: EntryPhase,
    last_fetched_at: Option<DateTime<Utc>>,
    last_started_at: Option<DateTime<Utc>>,
    generation: u64,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            data: None,
            error: None,
            phase: EntryPhase::Uninitialized,
            last_fetched_at: None,
            last_started_at: None,
            generation: 0,
        }
    }
}

#[derive(Debug)]
struct Entries {
    lake_level: RwLock<CacheEntry>,
    outflow: RwLock<CacheEntry>,
    weather: RwLock<CacheEntry>,
}

impl Entries {
    fn get(&self, key: SourceKey) -> &RwLock<CacheEntry> {
        match key {
            SourceKey::LakeLevel => &self.lake_level,
            SourceKey::Outflow => &self.outflow,
            SourceKey::Weather => &self.weather,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes and read model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum DropReason {
    /// A fetch for this key is already running.
    InFlight,
    /// The previous fetch started less than the dedup window ago.
    WithinDedupWindow,
    /// The key's policy does not listen for this event.
    NotSubscribed,
}

/// Result of asking for a revalidation without waiting for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum TriggerOutcome {
    Started { generation: u64 },
    Dropped { reason: DropReason },
}

/// Result of a revalidation run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RevalidateOutcome {
    Fresh,
    Errored,
    /// A newer fetch replaced this one; its result was discarded.
    Superseded,
    Dropped { reason: DropReason },
}

/// Permission to run one fetch for one key.
#[derive(Debug, Clone, Copy)]
struct Ticket {
    key: SourceKey,
    generation: u64,
    trigger: Trigger,
}

/// What the presentation layer reads for one source.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceState {
    pub key: SourceKey,
    #[schema(value_type = Option<Object>)]
    pub data: Option<SourceBundle>,
    pub error: Option<UpstreamErrorBody>,
    /// True only while no data at all exists (neither seeded nor fetched).
    pub is_loading: bool,
    /// True whenever a fetch is in flight, even if data is shown.
    pub is_validating: bool,
    pub phase: EntryPhase,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub next_revalidation_at: Option<DateTime<Utc>>,
}

/// Dashboard view model: every source plus derived annotations.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub sources: Vec<SourceState>,
    pub level_trend: Option<TrendAnnotation>,
    pub online: bool,
    pub generated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

struct Inner {
    entries: Entries,
    scheduler: Mutex<Scheduler>,
    history: Mutex<LevelHistory>,
    fetcher: Arc<dyn SourceFetcher>,
    clock: Arc<dyn Clock>,
    policies: PolicyTable,
    trend_steady_threshold: f64,
    online: AtomicBool,
    reconnect_pending: AtomicBool,
    wake: Notify,
}

#[derive(Clone)]
pub struct RevalidationController {
    inner: Arc<Inner>,
}

impl RevalidationController {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        policies: PolicyTable,
        clock: Arc<dyn Clock>,
        trend_steady_threshold: f64,
    ) -> Self {
        let scheduler = Scheduler::new(&policies, clock.now());
        Self {
            inner: Arc::new(Inner {
                entries: Entries {
                    lake_level: RwLock::new(CacheEntry::new()),
                    outflow: RwLock::new(CacheEntry::new()),
                    weather: RwLock::new(CacheEntry::new()),
                },
                scheduler: Mutex::new(scheduler),
                history: Mutex::new(LevelHistory::new()),
                fetcher,
                clock,
                policies,
                trend_steady_threshold,
                online: AtomicBool::new(true),
                reconnect_pending: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        }
    }

    /// Copy each available snapshot bundle into its still-uninitialized entry.
    pub async fn seed(&self, snapshot: &FallbackSnapshot) {
        for key in SourceKey::ALL {
            let Some(bundle) = snapshot.get(key) else {
                continue;
            };
            let mut entry = self.inner.entries.get(key).write().await;
            if entry.phase != EntryPhase::Uninitialized {
                continue;
            }
            self.record_level(&bundle).await;
            entry.data = Some(bundle);
            entry.phase = EntryPhase::Seeded;
        }
        tracing::debug!(
            "Seeded {} of {} entries from prefetch at {}",
            snapshot.available().len(),
            SourceKey::ALL.len(),
            snapshot.captured_at()
        );
    }

    // --- starting and finishing fetches ---

    async fn begin(&self, key: SourceKey, trigger: Trigger) -> Result<Ticket, DropReason> {
        let policy = self.inner.policies.get(key);
        let now = self.inner.clock.now();

        let generation = {
            let mut entry = self.inner.entries.get(key).write().await;
            if trigger != Trigger::Manual {
                if entry.phase == EntryPhase::Validating {
                    return Err(DropReason::InFlight);
                }
                if let Some(started) = entry.last_started_at {
                    let since = (now - started).to_std().unwrap_or_default();
                    if since < policy.dedup_window() {
                        return Err(DropReason::WithinDedupWindow);
                    }
                }
            }
            entry.generation += 1;
            entry.phase = EntryPhase::Validating;
            entry.last_started_at = Some(now);
            entry.generation
        };

        self.inner.scheduler.lock().await.clear(key);
        tracing::debug!("{}: revalidating ({:?}, generation {})", key, trigger, generation);

        Ok(Ticket {
            key,
            generation,
            trigger,
        })
    }

    async fn is_current(&self, ticket: &Ticket) -> bool {
        self.inner.entries.get(ticket.key).read().await.generation == ticket.generation
    }

    /// Run the fetch for a ticket through retries and commit the result.
    async fn complete(&self, ticket: Ticket) -> RevalidateOutcome {
        let policy = self.inner.policies.get(ticket.key);
        let timeout = policy.client_timeout();
        let mut attempt: u32 = 0;

        let error = loop {
            if !self.is_current(&ticket).await {
                tracing::debug!("{}: generation {} superseded", ticket.key, ticket.generation);
                return RevalidateOutcome::Superseded;
            }

            attempt += 1;
            let result =
                match tokio::time::timeout(timeout, self.inner.fetcher.fetch(ticket.key)).await {
                    Ok(Ok(bundle)) if bundle.is_estimated() => Err(UpstreamError::Estimated),
                    Ok(result) => result,
                    Err(_) => Err(UpstreamError::Timeout(timeout)),
                };

            match result {
                Ok(bundle) => return self.commit_success(&ticket, bundle).await,
                Err(e) => {
                    if matches!(e, UpstreamError::NetworkUnavailable(_))
                        && self.inner.online.swap(false, Ordering::SeqCst)
                    {
                        tracing::warn!("Network unavailable, waiting for reconnect");
                    }
                    if attempt > policy.max_retries {
                        break e;
                    }
                    tracing::warn!(
                        "{}: attempt {}/{} failed: {}",
                        ticket.key,
                        attempt,
                        policy.max_retries + 1,
                        e
                    );
                    tokio::time::sleep(policy.retry_backoff()).await;
                }
            }
        };

        self.commit_error(&ticket, error).await
    }

    async fn commit_success(&self, ticket: &Ticket, bundle: SourceBundle) -> RevalidateOutcome {
        let now = self.inner.clock.now();
        {
            let mut entry = self.inner.entries.get(ticket.key).write().await;
            if entry.generation != ticket.generation {
                tracing::debug!("{}: discarding late result", ticket.key);
                return RevalidateOutcome::Superseded;
            }
            self.record_level(&bundle).await;
            entry.data = Some(bundle);
            entry.error = None;
            entry.phase = EntryPhase::Fresh;
            entry.last_fetched_at = Some(now);
        }
        self.settle(ticket.key, now).await;

        if !self.inner.online.swap(true, Ordering::SeqCst) {
            tracing::info!("Network restored, broadcasting reconnect");
            self.inner.reconnect_pending.store(true, Ordering::SeqCst);
            self.inner.wake.notify_one();
        }

        tracing::debug!("{}: fresh ({:?})", ticket.key, ticket.trigger);
        RevalidateOutcome::Fresh
    }

    async fn commit_error(&self, ticket: &Ticket, error: UpstreamError) -> RevalidateOutcome {
        let now = self.inner.clock.now();
        {
            let mut entry = self.inner.entries.get(ticket.key).write().await;
            if entry.generation != ticket.generation {
                return RevalidateOutcome::Superseded;
            }
            tracing::warn!(
                "{}: revalidation failed, keeping {} data: {}",
                ticket.key,
                if entry.data.is_some() { "existing" } else { "no" },
                error
            );
            entry.error = Some(error);
            entry.phase = EntryPhase::Errored;
        }
        self.settle(ticket.key, now).await;
        RevalidateOutcome::Errored
    }

    async fn settle(&self, key: SourceKey, now: DateTime<Utc>) {
        self.inner.scheduler.lock().await.settle(key, now);
        self.inner.wake.notify_one();
    }

    async fn record_level(&self, bundle: &SourceBundle) {
        let Some(lake) = bundle.as_lake_level() else {
            return;
        };
        if lake.estimated {
            return;
        }
        if let Some(level) = lake.level.value {
            self.inner
                .history
                .lock()
                .await
                .record(lake.level.observed_at, level);
        }
    }

    // --- public triggers ---

    /// Revalidate one key and wait for the outcome.
    pub async fn revalidate(&self, key: SourceKey, trigger: Trigger) -> RevalidateOutcome {
        match self.begin(key, trigger).await {
            Ok(ticket) => self.complete(ticket).await,
            Err(reason) => RevalidateOutcome::Dropped { reason },
        }
    }

    /// Start a revalidation in the background.
    pub async fn trigger(&self, key: SourceKey, trigger: Trigger) -> TriggerOutcome {
        match self.begin(key, trigger).await {
            Ok(ticket) => {
                let this = self.clone();
                tokio::spawn(async move {
                    let outcome = this.complete(ticket).await;
                    tracing::debug!("{}: {:?} revalidation finished: {:?}", key, trigger, outcome);
                });
                TriggerOutcome::Started {
                    generation: ticket.generation,
                }
            }
            Err(reason) => {
                tracing::debug!("{}: {:?} trigger dropped ({:?})", key, trigger, reason);
                TriggerOutcome::Dropped { reason }
            }
        }
    }

    /// Deliver a client event to every key; unsubscribed keys are dropped.
    pub async fn notify(&self, event: ClientEvent) -> Vec<(SourceKey, TriggerOutcome)> {
        let subscribers = self.inner.scheduler.lock().await.subscribers(event);
        let mut outcomes = Vec::with_capacity(SourceKey::ALL.len());
        for key in SourceKey::ALL {
            let outcome = if subscribers.contains(&key) {
                self.trigger(key, event.into()).await
            } else {
                TriggerOutcome::Dropped {
                    reason: DropReason::NotSubscribed,
                }
            };
            outcomes.push((key, outcome));
        }
        outcomes
    }

    /// One pass of the run loop: pending reconnect broadcast, then every key
    /// whose schedule is due.
    pub async fn tick(&self) -> Vec<(SourceKey, Trigger, TriggerOutcome)> {
        let mut fired = Vec::new();

        if self.inner.reconnect_pending.swap(false, Ordering::SeqCst) {
            for (key, outcome) in self.notify(ClientEvent::Reconnect).await {
                fired.push((key, Trigger::Reconnect, outcome));
            }
        }

        let now = self.inner.clock.now();
        let due = self.inner.scheduler.lock().await.due(now);
        for (key, trigger) in due {
            let outcome = self.trigger(key, trigger).await;
            if let TriggerOutcome::Dropped {
                reason: DropReason::WithinDedupWindow,
            } = outcome
            {
                let started = self
                    .inner
                    .entries
                    .get(key)
                    .read()
                    .await
                    .last_started_at
                    .unwrap_or(now);
                let retry_at = started
                    + chrono::Duration::from_std(self.inner.policies.get(key).dedup_window())
                        .unwrap_or_default();
                self.inner.scheduler.lock().await.defer(key, retry_at);
            }
            fired.push((key, trigger, outcome));
        }

        fired
    }

    /// Drive the schedule until process exit.
    ///
    /// Should be spawned via `tokio::spawn(controller.run())`.
    pub async fn run(self) {
        tracing::info!("Revalidation controller started");

        loop {
            let fired = self.tick().await;
            if !fired.is_empty() {
                tracing::info!(
                    "Revalidation tick: {}",
                    fired
                        .iter()
                        .map(|(key, trigger, _)| format!("{}({:?})", key, trigger))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }

            let secs = {
                let now = self.inner.clock.now();
                match self.inner.scheduler.lock().await.next_deadline() {
                    Some(at) => (at - now).num_seconds().max(0) as u64,
                    None => RUN_LOOP_MAX_SLEEP_SECS,
                }
            }
            .clamp(RUN_LOOP_MIN_SLEEP_SECS, RUN_LOOP_MAX_SLEEP_SECS);

            tokio::select! {
                _ = sleep_secs(secs) => {}
                _ = self.inner.wake.notified() => {}
            }
        }
    }

    // --- read side ---

    pub async fn get_state(&self, key: SourceKey) -> SourceState {
        let entry = self.inner.entries.get(key).read().await.clone();
        let next_revalidation_at = self.inner.scheduler.lock().await.next_fire_at(key);
        SourceState {
            key,
            is_loading: entry.data.is_none(),
            is_validating: entry.phase == EntryPhase::Validating,
            error: entry.error.as_ref().map(UpstreamErrorBody::from),
            data: entry.data,
            phase: entry.phase,
            last_fetched_at: entry.last_fetched_at,
            next_revalidation_at,
        }
    }

    /// Change in lake level against a sample from about 24 hours earlier.
    /// `None` without real (non-estimated) data or without a prior sample.
    pub async fn level_trend(&self) -> Option<TrendAnnotation> {
        let (current, observed_at) = {
            let entry = self.inner.entries.lake_level.read().await;
            let lake = entry.data.as_ref()?.as_lake_level()?;
            if lake.estimated {
                return None;
            }
            (lake.level.value?, lake.level.observed_at)
        };
        let prior = self.inner.history.lock().await.prior_sample(observed_at)?;
        Some(compute_trend(
            current,
            prior,
            self.inner.trend_steady_threshold,
        ))
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub async fn dashboard(&self) -> DashboardView {
        let mut sources = Vec::with_capacity(SourceKey::ALL.len());
        for key in SourceKey::ALL {
            sources.push(self.get_state(key).await);
        }
        DashboardView {
            sources,
            level_trend: self.level_trend().await,
            online: self.is_online(),
            generated_at: self.inner.clock.now(),
        }
    }
}

async fn sleep_secs(secs: u64) {
    tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
}
