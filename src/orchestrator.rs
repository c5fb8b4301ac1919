//! The poll loop: list, filter through the tracker, download new items one
//! at a time, persist, sleep. Runs on a single task; the only concurrency is
//! the cancellation token observed at every suspension point.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::catalog::{CatalogClient, CatalogError};
use crate::download::DownloadService;
use crate::item::{ItemDescriptor, ItemRef};
use crate::rate_limit::{RateLimiter, RateLimiterStats};
use crate::state::{StateManager, StateSummary};
use crate::storage::MetadataStore;
use crate::tracker::{Tracker, TrackerStats};

/// Back-off after a 429 that carried no usable `Retry-After`.
const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Polling,
    Processing,
    Sleeping,
    ShuttingDown,
    Stopped,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::Polling => "polling",
            Phase::Processing => "processing",
            Phase::Sleeping => "sleeping",
            Phase::ShuttingDown => "shutting_down",
            Phase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub max_items_per_poll: usize,
    /// Pause after a cycle-level failure before polling again.
    pub error_cooldown: Duration,
    /// Run a single cycle, persist, and stop.
    pub run_once: bool,
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// A listing actually came back from the catalog.
    pub polled: bool,
    pub listed: usize,
    /// Items that passed the tracker filter.
    pub new_items: usize,
    pub successful: u64,
    pub failed: u64,
    /// Shutdown was requested before every new item was processed.
    pub interrupted: bool,
}

#[derive(Debug, Clone)]
pub struct OrchestratorStats {
    pub phase: Phase,
    pub poll_count: u64,
    pub tracker: TrackerStats,
    pub state: StateSummary,
    pub rate_limiter: RateLimiterStats,
}

pub struct Orchestrator {
    client: Arc<dyn CatalogClient>,
    downloads: DownloadService,
    metadata: MetadataStore,
    tracker: Tracker,
    state: StateManager,
    rate_limiter: RateLimiter,
    config: OrchestratorConfig,
    phase: Phase,
    poll_count: u64,
}

impl Orchestrator {
    /// Wire up collaborators and hydrate the tracker from persisted state.
    pub fn new(
        client: Arc<dyn CatalogClient>,
        downloads: DownloadService,
        metadata: MetadataStore,
        mut state: StateManager,
        rate_limiter: RateLimiter,
        config: OrchestratorConfig,
    ) -> Self {
        let mut tracker = Tracker::new();
        tracker.load(state.load());
        Self {
            client,
            downloads,
            metadata,
            tracker,
            state,
            rate_limiter,
            config,
            phase: Phase::Initializing,
            poll_count: 0,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    #[cfg(test)]
    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Drive the poll loop until `shutdown` is cancelled (or after one cycle
    /// in run-once mode). Only an authentication failure at startup is
    /// returned as an error; everything later is logged and survived.
    pub async fn run(&mut self, shutdown: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(
            platform = self.client.platform_name(),
            interval_secs = self.config.poll_interval.as_secs(),
            max_items = self.config.max_items_per_poll,
            "Starting ingestion"
        );

        if let Err(e) = self.client.authenticate().await {
            self.phase = Phase::Stopped;
            let what = if e.is_authentication() {
                "Catalog rejected the configured credentials"
            } else {
                "Failed to authenticate with catalog"
            };
            return Err(e).context(what);
        }

        let mut last_error = None;
        while !shutdown.is_cancelled() {
            self.poll_count += 1;
            tracing::info!("=== Starting poll cycle #{} ===", self.poll_count);

            match self.poll_once(&shutdown).await {
                Ok(report) if !report.polled => {
                    tracing::info!("Poll cycle #{} ended before listing", self.poll_count);
                    self.persist();
                }
                Ok(report) => {
                    tracing::info!(
                        listed = report.listed,
                        new = report.new_items,
                        successful = report.successful,
                        failed = report.failed,
                        interrupted = report.interrupted,
                        "=== Poll cycle #{} complete ===",
                        self.poll_count
                    );
                    self.state.update_poll_timestamp();
                    self.persist();
                    last_error = None;
                }
                Err(e) => {
                    tracing::error!("Error in poll cycle #{}: {}", self.poll_count, e);
                    if self.config.run_once {
                        last_error = Some(e);
                        break;
                    }
                    tracing::info!(
                        "Waiting {}s before retrying",
                        self.config.error_cooldown.as_secs()
                    );
                    self.phase = Phase::Sleeping;
                    if !self.sleep_or_cancel(self.config.error_cooldown, &shutdown).await {
                        break;
                    }
                    continue;
                }
            }

            if self.config.run_once {
                break;
            }

            self.phase = Phase::Sleeping;
            tracing::info!(
                "Waiting {}s until next poll",
                self.config.poll_interval.as_secs()
            );
            if !self.sleep_or_cancel(self.config.poll_interval, &shutdown).await {
                break;
            }
        }

        self.shutdown();
        match last_error {
            Some(e) => Err(e).context("Poll cycle failed"),
            None => Ok(()),
        }
    }

    /// Returns false when the sleep was cut short by shutdown.
    async fn sleep_or_cancel(&self, duration: Duration, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = shutdown.cancelled() => {
                tracing::info!("Shutdown requested, skipping wait");
                false
            }
        }
    }

    /// One list/filter/process pass. Statistics are recorded on the state
    /// manager but not persisted; [`run`](Self::run) saves after each cycle.
    pub async fn poll_once(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<CycleReport, CatalogError> {
        self.phase = Phase::Polling;
        let Some(listed) = self.list_candidates(shutdown).await? else {
            return Ok(CycleReport {
                interrupted: true,
                ..CycleReport::default()
            });
        };

        let mut report = CycleReport {
            polled: true,
            listed: listed.len(),
            ..CycleReport::default()
        };

        let mut seen: HashSet<ItemRef> = HashSet::new();
        let new_items: Vec<ItemDescriptor> = listed
            .into_iter()
            .filter(|item| self.tracker.is_new(&item.reference) && seen.insert(item.reference.clone()))
            .collect();
        report.new_items = new_items.len();

        if new_items.is_empty() {
            tracing::info!(listed = report.listed, "No new items found");
            return Ok(report);
        }
        tracing::info!(count = new_items.len(), "Found new items to process");

        self.phase = Phase::Processing;
        let total = new_items.len();
        for (idx, mut item) in new_items.into_iter().enumerate() {
            if shutdown.is_cancelled() {
                tracing::info!(
                    remaining = total - idx,
                    "Shutdown requested, leaving remaining items for the next run"
                );
                report.interrupted = true;
                break;
            }
            tracing::info!(item = %item.reference, "Processing item {}/{}", idx + 1, total);
            if self.process_item(&mut item).await {
                report.successful += 1;
            } else {
                report.failed += 1;
            }
        }

        self.state.record_cycle(report.successful, report.failed);
        tracing::info!(
            successful = report.successful,
            failed = report.failed,
            "Processing complete"
        );
        Ok(report)
    }

    /// Rate-limited listing. A single 429 is absorbed by backing off and
    /// asking once more. `None` means shutdown cut the back-off short and
    /// nothing was listed.
    async fn list_candidates(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<Option<Vec<ItemDescriptor>>, CatalogError> {
        let max = self.config.max_items_per_poll;
        self.rate_limiter.wait_if_needed().await;
        match self.client.list_recent_items(max, 1).await {
            Err(CatalogError::RateLimited { retry_after_secs }) => {
                let wait = retry_after_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_RATE_LIMIT_BACKOFF);
                tokio::select! {
                    _ = self.rate_limiter.handle_rate_limit_error(wait) => {}
                    _ = shutdown.cancelled() => {
                        tracing::info!("Shutdown requested during rate-limit back-off");
                        return Ok(None);
                    }
                }
                // The back-off already restarted the limiter clock.
                self.rate_limiter.record_request();
                self.client.list_recent_items(max, 1).await.map(Some)
            }
            other => other.map(Some),
        }
    }

    /// Download, then record metadata and mark processed. Failed items are
    /// marked processed too, so they are not retried every cycle; their
    /// reason goes to the state's failure records instead.
    async fn process_item(&mut self, item: &mut ItemDescriptor) -> bool {
        let reference = item.reference.clone();
        let ok = self.downloads.download(item).await;
        if ok {
            if let Err(e) = self.metadata.save(item) {
                tracing::warn!(item = %reference, error = %e, "Failed to save metadata");
            }
            self.state.clear_failure(&reference);
        } else {
            let reason = item.error_message.as_deref().unwrap_or("unknown: no error recorded");
            self.state.record_failure(&reference, reason);
        }
        self.tracker.mark_processed(&reference);
        ok
    }

    /// Save the tracker and counters. Failures are logged, never fatal.
    pub fn persist(&mut self) -> bool {
        let processed = self.tracker.all_processed();
        self.state.save(&processed, None, None).is_ok()
    }

    fn shutdown(&mut self) {
        self.phase = Phase::ShuttingDown;
        tracing::info!("Saving final state...");
        self.persist();

        let stats = self.stats();
        let storage = self.downloads.store().stats();
        tracing::info!(
            phase = %stats.phase,
            polls = stats.poll_count,
            processed = stats.tracker.total_processed,
            persisted = stats.state.total_processed,
            successful = stats.state.successful_downloads,
            failed = stats.state.failed_downloads,
            stored_items = storage.total_items,
            stored_bytes = storage.total_bytes,
            listing_requests = stats.rate_limiter.total_requests,
            rate_limit_wait_secs = stats.rate_limiter.total_wait.as_secs(),
            min_request_interval_ms = stats.rate_limiter.min_interval.as_millis() as u64,
            "Final statistics"
        );
        self.phase = Phase::Stopped;
        tracing::info!("Shutdown complete");
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            phase: self.phase,
            poll_count: self.poll_count,
            tracker: self.tracker.stats(),
            state: self.state.summary(),
            rate_limiter: self.rate_limiter.stats(),
        }
    }
}
