//! Orchestration loop.
//!
//! Drives the relay: each cycle visits the sources in their fixed order,
//! collects new candidates, fans every candidate out through the dispatcher,
//! then applies retention to the dedup store. Between cycles the loop sleeps
//! for the cycle interval, or for the error backoff after a failed cycle.
//!
//! [`LoopControl`] is the handle the rest of the process holds: it can cut a
//! sleep short, stop the loop and report what the loop is doing.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::metrics::RelayMetrics;
use crate::relay::dedup::DedupStore;
use crate::relay::dispatcher::Dispatcher;
use crate::relay::error::CycleError;
use crate::relay::rules::RuleProvider;
use crate::relay::types::{Candidate, SourceKind};
use crate::sources::{CollectContext, MediaStore, SourceCollector, DEFAULT_GRACE_PERIOD_SECONDS};

pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(120);
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(60);
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Timing and retention knobs of the loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub cycle_interval: Duration,
    pub error_backoff: Duration,
    pub grace: chrono::Duration,
    pub retention_days: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            cycle_interval: DEFAULT_CYCLE_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            grace: chrono::Duration::seconds(DEFAULT_GRACE_PERIOD_SECONDS),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

/// What the loop is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "source", rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    RunningSource(SourceKind),
    Sleeping,
    Stopped,
}

/// Shared handle for triggering, stopping and observing the loop.
#[derive(Clone)]
pub struct LoopControl {
    trigger: Arc<Notify>,
    cancel: CancellationToken,
    state: Arc<RwLock<LoopState>>,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopControl {
    pub fn new() -> Self {
        Self {
            trigger: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            state: Arc::new(RwLock::new(LoopState::Idle)),
        }
    }

    /// Wake the loop from its sleep. A trigger that arrives while a cycle is
    /// running starts the next cycle right after it.
    pub fn trigger_cycle_now(&self) {
        self.trigger.notify_one();
    }

    /// Ask the loop to stop. The send in flight completes; no new source or
    /// candidate is started.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn state(&self) -> LoopState {
        *self.state.read().await
    }

    async fn set_state(&self, state: LoopState) {
        *self.state.write().await = state;
    }
}

/// Summary of one cycle.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    pub candidates: usize,
    pub deliveries: usize,
    pub swept: u64,
    pub failed_sources: Vec<SourceKind>,
    pub cancelled: bool,
}

pub struct Orchestrator {
    collectors: Vec<Arc<dyn SourceCollector>>,
    rules: Arc<dyn RuleProvider>,
    dedup: Arc<dyn DedupStore>,
    dispatcher: Dispatcher,
    media: Option<Arc<dyn MediaStore>>,
    settings: LoopSettings,
    metrics: Arc<RelayMetrics>,
}

impl Orchestrator {
    /// Collectors are visited in [`SourceKind::ALL`] order regardless of the
    /// order they are passed in.
    pub fn new(
        mut collectors: Vec<Arc<dyn SourceCollector>>,
        rules: Arc<dyn RuleProvider>,
        dedup: Arc<dyn DedupStore>,
        dispatcher: Dispatcher,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        collectors.sort_by_key(|c| c.source());
        Self {
            collectors,
            rules,
            dedup,
            dispatcher,
            media: None,
            settings: LoopSettings::default(),
            metrics,
        }
    }

    /// Media store used to unlink files of swept records and of candidates
    /// that were not delivered.
    pub fn with_media(mut self, media: Arc<dyn MediaStore>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Run cycles until `control` is stopped.
    pub async fn run(&self, control: LoopControl) {
        tracing::info!(
            "Relay loop started (interval: {}s, backoff: {}s)",
            self.settings.cycle_interval.as_secs(),
            self.settings.error_backoff.as_secs()
        );

        while !control.is_stopped() {
            let pause = match self.run_cycle(&control).await {
                Ok(report) => {
                    tracing::info!(
                        candidates = report.candidates,
                        deliveries = report.deliveries,
                        swept = report.swept,
                        "cycle finished"
                    );
                    self.settings.cycle_interval
                }
                Err(err) => {
                    self.metrics.cycle_errors_total.inc();
                    tracing::error!("cycle failed, backing off: {}", err);
                    self.settings.error_backoff
                }
            };

            if control.is_stopped() {
                break;
            }

            control.set_state(LoopState::Sleeping).await;
            tokio::select! {
                _ = control.cancel.cancelled() => break,
                _ = control.trigger.notified() => {
                    tracing::info!("cycle triggered manually");
                }
                _ = time::sleep(pause) => {}
            }
        }

        control.set_state(LoopState::Stopped).await;
        tracing::info!("Relay loop stopped cleanly");
    }

    /// Execute a single cycle. Extracted for `--once` and for tests.
    pub async fn run_cycle(&self, control: &LoopControl) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        let mut report = CycleReport::default();

        'sources: for collector in &self.collectors {
            if control.is_stopped() {
                report.cancelled = true;
                break;
            }

            let source = collector.source();
            if !self.rules.source_settings(source).await.enabled {
                tracing::debug!(source = %source, "source disabled, skipping");
                continue;
            }

            control.set_state(LoopState::RunningSource(source)).await;
            let ctx = CollectContext::new(self.rules.as_ref(), self.dedup.as_ref(), self.settings.grace);
            let candidates = match collector.collect(&ctx).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    self.metrics
                        .collector_errors_total
                        .with_label_values(&[source.as_str()])
                        .inc();
                    tracing::error!(source = %source, "collection failed: {}", err);
                    report.failed_sources.push(source);
                    continue;
                }
            };

            self.metrics
                .candidates_total
                .with_label_values(&[source.as_str()])
                .inc_by(candidates.len() as f64);
            report.candidates += candidates.len();
            tracing::info!(source = %source, "{} new candidates", candidates.len());

            for (index, candidate) in candidates.iter().enumerate() {
                if control.is_stopped() {
                    report.cancelled = true;
                    self.discard_media(&candidates[index..]).await;
                    break 'sources;
                }
                match self.dispatcher.dispatch(candidate, &control.cancel).await {
                    // unrecorded, so the next cycle downloads the media again
                    Ok(0) => self.discard_media(std::slice::from_ref(candidate)).await,
                    Ok(delivered) => report.deliveries += delivered,
                    Err(err) => {
                        self.discard_media(&candidates[index..]).await;
                        return Err(err.into());
                    }
                }
            }
        }

        if !report.cancelled {
            report.swept = self.apply_retention().await?;
            control.set_state(LoopState::Idle).await;
        }

        self.metrics.cycles_total.inc();
        self.metrics
            .last_cycle_duration_seconds
            .set(started.elapsed().as_secs_f64());
        Ok(report)
    }

    async fn apply_retention(&self) -> Result<u64, CycleError> {
        let outcome = self.dedup.sweep(self.settings.retention_days).await?;
        for path in &outcome.media_paths {
            self.unlink(path).await;
        }
        if outcome.removed > 0 {
            self.metrics.records_swept_total.inc_by(outcome.removed as f64);
            tracing::info!("retention removed {} delivery records", outcome.removed);
        }
        Ok(outcome.removed)
    }

    /// Remove downloaded media of candidates that left the cycle unrecorded.
    async fn discard_media(&self, candidates: &[Candidate]) {
        for path in candidates.iter().filter_map(|c| c.media_path.as_deref()) {
            self.unlink(path).await;
        }
    }

    async fn unlink(&self, path: &Path) {
        if let Some(media) = &self.media {
            if let Err(err) = media.discard(path).await {
                tracing::warn!(path = %path.display(), "cannot remove media file: {}", err);
            }
        }
    }
}
