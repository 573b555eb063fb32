//! Purge coordinator
//!
//! Turns many independent purge requests into as few provider calls as
//! possible. URL requests are either dispatched immediately (synchronous mode)
//! or merged into a pending set behind a trailing-edge debounce timer
//! (background mode). Every dispatch is split into batches no larger than the
//! configured batch size.
//!
//! # State machine
//!
//! ```text
//! Idle --request--> Accumulating --request--> Accumulating (timer replaced)
//!                        |
//!                    timer fires
//!                        v
//!                    Draining --dispatch done (ok or err)--> Idle
//! ```
//!
//! The pending set and the timer handle live under one mutex. The lock is
//! held only for the merge/rearm and swap/capture steps, never across a
//! network call.

use crate::client::PurgeApi;
use crate::config::PurgeConfig;
use crate::error::{PurgeError, Result};
use crate::models::{
    into_batches, BackgroundFailure, PendingSet, PurgeKind, PurgeOutcome, PurgeReport,
};
use crate::purge_metrics::PurgeMetrics;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Capacity of the background failure channel
const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// Tunables read by the coordinator on every request
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    /// Maximum items per provider call
    pub batch_size: usize,
    /// Debounce delay for background URL purges
    pub delay: Duration,
    /// Mode used when a caller passes `background: None`
    pub background_default: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            batch_size: crate::client::MAX_ITEMS_PER_REQUEST,
            delay: Duration::ZERO,
            background_default: true,
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &PurgeConfig) -> Self {
        Self {
            batch_size: config.purge_batch_size,
            delay: config.purge_delay(),
            background_default: config.background_purge,
        }
    }
}

/// Externally observable coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Nothing pending, nothing in flight
    Idle,
    /// URLs pending behind an armed timer
    Accumulating,
    /// A timer-fired drain is talking to the provider
    Draining,
}

/// Holds the draining count up until dropped, including on panic or abort
struct DrainGuard(Arc<AtomicUsize>);

impl DrainGuard {
    fn enter(draining: &Arc<AtomicUsize>) -> Self {
        draining.fetch_add(1, Ordering::SeqCst);
        DrainGuard(draining.clone())
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct PendingState {
    urls: PendingSet,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every rearm; a timer that wakes with an older value is stale
    generation: u64,
}

/// Deduplicating, debouncing, batching front end to a [`PurgeApi`]
///
/// Cloning is cheap and every clone shares the same pending state.
#[derive(Clone)]
pub struct PurgeCoordinator {
    client: Arc<dyn PurgeApi>,
    settings: Arc<CoordinatorSettings>,
    state: Arc<Mutex<PendingState>>,
    draining: Arc<AtomicUsize>,
    failures: broadcast::Sender<BackgroundFailure>,
    metrics: Option<Arc<PurgeMetrics>>,
}

impl PurgeCoordinator {
    /// Create a coordinator in front of `client`
    pub fn new(client: Arc<dyn PurgeApi>, settings: CoordinatorSettings) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            client,
            settings: Arc::new(settings),
            state: Arc::new(Mutex::new(PendingState::default())),
            draining: Arc::new(AtomicUsize::new(0)),
            failures,
            metrics: None,
        }
    }

    /// Create a coordinator using the batch/delay/mode settings in `config`
    pub fn from_config(client: Arc<dyn PurgeApi>, config: &PurgeConfig) -> Self {
        Self::new(client, CoordinatorSettings::from_config(config))
    }

    /// Enable Prometheus metrics
    pub fn with_metrics(mut self, metrics: Arc<PurgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Receive failures of detached dispatches (timer drains and background
    /// purges). Failures that happen while nobody is subscribed are only logged.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<BackgroundFailure> {
        self.failures.subscribe()
    }

    /// Snapshot of the URLs waiting for the timer, in first-seen order
    pub fn pending_urls(&self) -> Vec<String> {
        self.lock_state().urls.as_slice().to_vec()
    }

    pub fn state(&self) -> CoordinatorState {
        let state = self.lock_state();
        if !state.urls.is_empty() || state.timer.is_some() {
            CoordinatorState::Accumulating
        } else if self.draining.load(Ordering::SeqCst) > 0 {
            CoordinatorState::Draining
        } else {
            CoordinatorState::Idle
        }
    }

    /// Purge a set of URLs
    ///
    /// # Returns
    /// * `Ok(Some(report))` after a synchronous dispatch
    /// * `Ok(None)` when the URLs were queued, or the input was empty
    /// * `Err(PurgeError)` if any synchronous batch failed
    pub async fn request_purge<I, S>(
        &self,
        urls: I,
        background: Option<bool>,
    ) -> Result<Option<PurgeReport>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: PendingSet = urls.into_iter().map(Into::into).collect();
        if urls.is_empty() {
            debug!("Ignoring purge request with no URLs");
            return Ok(None);
        }

        self.record_request(PurgeKind::Urls);

        if background.unwrap_or(self.settings.background_default) {
            self.schedule(urls);
            return Ok(None);
        }

        self.dispatch_batched(PurgeKind::Urls, urls.into_vec())
            .await
            .map(Some)
    }

    /// Purge all cached content, bypassing the pending set
    ///
    /// In background mode the call runs on a detached task and failures are
    /// reported through [`subscribe_failures`](Self::subscribe_failures).
    pub async fn purge_everything(&self, background: Option<bool>) -> Result<Option<PurgeOutcome>> {
        self.record_request(PurgeKind::Everything);

        if background.unwrap_or(self.settings.background_default) {
            let coordinator = self.clone();
            tokio::spawn(async move {
                if let Err(e) = coordinator.do_purge_everything().await {
                    coordinator.report_failure(PurgeKind::Everything, 0, e);
                }
            });
            return Ok(None);
        }

        self.do_purge_everything().await.map(Some)
    }

    /// Purge by cache tag; batched but not debounced
    pub async fn purge_tags<I, S>(&self, tags: I, background: Option<bool>) -> Result<Option<PurgeReport>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.purge_direct(PurgeKind::Tags, tags, background).await
    }

    /// Purge by URL prefix; batched but not debounced
    pub async fn purge_prefixes<I, S>(
        &self,
        prefixes: I,
        background: Option<bool>,
    ) -> Result<Option<PurgeReport>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.purge_direct(PurgeKind::Prefixes, prefixes, background).await
    }

    /// Cancel the armed timer and dispatch whatever is pending right now
    ///
    /// Unlike a timer-fired drain, the result goes back to the caller.
    pub async fn flush_pending(&self) -> Result<Option<PurgeReport>> {
        let urls = {
            let mut state = self.lock_state();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.generation = state.generation.wrapping_add(1);
            std::mem::take(&mut state.urls)
        };
        self.set_pending_gauge(0);

        if urls.is_empty() {
            return Ok(None);
        }

        info!("Flushing {} pending URLs", urls.len());
        self.dispatch_batched(PurgeKind::Urls, urls.into_vec())
            .await
            .map(Some)
    }

    async fn purge_direct<I, S>(
        &self,
        kind: PurgeKind,
        items: I,
        background: Option<bool>,
    ) -> Result<Option<PurgeReport>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = items
            .into_iter()
            .map(Into::into)
            .collect::<PendingSet>()
            .into_vec();
        if items.is_empty() {
            debug!("Ignoring purge {} request with no items", kind);
            return Ok(None);
        }

        self.record_request(kind);

        if background.unwrap_or(self.settings.background_default) {
            let coordinator = self.clone();
            let count = items.len();
            tokio::spawn(async move {
                if let Err(e) = coordinator.dispatch_batched(kind, items).await {
                    coordinator.report_failure(kind, count, e);
                }
            });
            return Ok(None);
        }

        self.dispatch_batched(kind, items).await.map(Some)
    }

    /// Merge URLs into the pending set and replace the debounce timer
    fn schedule(&self, urls: PendingSet) {
        let requested = urls.len();
        let (added, pending) = {
            let mut state = self.lock_state();
            let added = state.urls.extend(urls.into_vec());

            if let Some(previous) = state.timer.take() {
                previous.abort();
            }
            state.generation = state.generation.wrapping_add(1);

            let generation = state.generation;
            let delay = self.settings.delay;
            let coordinator = self.clone();
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                coordinator.flush_now(generation).await;
            }));

            (added, state.urls.len())
        };

        self.set_pending_gauge(pending);
        debug!(
            "Scheduled background purge for {} URLs ({} new, {} pending)",
            requested, added, pending
        );
    }

    /// Timer callback: swap out the pending set and dispatch it
    async fn flush_now(&self, generation: u64) {
        let (_drain, urls) = {
            let mut state = self.lock_state();
            if state.generation != generation {
                // Superseded by a later request between wake-up and lock.
                return;
            }
            state.timer = None;
            (DrainGuard::enter(&self.draining), std::mem::take(&mut state.urls))
        };
        self.set_pending_gauge(0);

        let count = urls.len();
        if count > 0 {
            match self.dispatch_batched(PurgeKind::Urls, urls.into_vec()).await {
                Ok(report) => info!(
                    "Background purge completed for {} URLs in {} batches",
                    count,
                    report.batch_count()
                ),
                Err(e) => self.report_failure(PurgeKind::Urls, count, e),
            }
        }
    }

    /// Split `items` into batches and call the provider once per batch
    ///
    /// Stops at the first failing batch. Batches already sent stay sent.
    async fn dispatch_batched(&self, kind: PurgeKind, items: Vec<String>) -> Result<PurgeReport> {
        let batches = into_batches(&items, self.settings.batch_size);
        let mut report = PurgeReport::default();

        for (index, batch) in batches.iter().enumerate() {
            debug!(
                "Dispatching purge {} batch {}/{} ({} items)",
                kind,
                index + 1,
                batches.len(),
                batch.len()
            );

            let outcome = match kind {
                PurgeKind::Urls => self.observe(kind, batch.len(), self.client.purge_urls(batch)).await,
                PurgeKind::Tags => self.observe(kind, batch.len(), self.client.purge_tags(batch)).await,
                PurgeKind::Prefixes => {
                    self.observe(kind, batch.len(), self.client.purge_prefixes(batch)).await
                }
                PurgeKind::Everything => Err(PurgeError::Internal(format!(
                    "{} is not a batched operation",
                    kind
                ))),
            };

            match outcome {
                Ok(outcome) => {
                    report.item_count += batch.len();
                    report.outcomes.push(outcome);
                }
                Err(e) => {
                    error!(
                        "Failed to purge {} (batch {}/{}): {}",
                        kind,
                        index + 1,
                        batches.len(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        Ok(report)
    }

    async fn do_purge_everything(&self) -> Result<PurgeOutcome> {
        match self
            .observe(PurgeKind::Everything, 0, self.client.purge_everything())
            .await
        {
            Ok(outcome) => {
                info!("Full cache purge completed");
                Ok(outcome)
            }
            Err(e) => {
                error!("Full cache purge failed: {}", e);
                Err(e)
            }
        }
    }

    /// Time one provider call and record it
    async fn observe<F>(&self, kind: PurgeKind, items: usize, call: F) -> Result<PurgeOutcome>
    where
        F: Future<Output = Result<PurgeOutcome>>,
    {
        let start = Instant::now();
        let result = call.await;
        if let Some(metrics) = &self.metrics {
            metrics.record_provider_call(
                kind.as_str(),
                result.is_ok(),
                items,
                start.elapsed().as_secs_f64(),
            );
        }
        result
    }

    fn report_failure(&self, kind: PurgeKind, item_count: usize, error: PurgeError) {
        error!(
            "Background purge {} failed for {} items: {}",
            kind, item_count, error
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_background_failure(kind.as_str());
        }
        // No subscribers is fine; the log line above is the record.
        let _ = self.failures.send(BackgroundFailure {
            kind,
            item_count,
            error,
        });
    }

    fn record_request(&self, kind: PurgeKind) {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(kind.as_str());
        }
    }

    fn set_pending_gauge(&self, count: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.set_pending(count);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PendingState> {
        // A panic elsewhere must not wedge future purges.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
