//! The engine: seeding, the scheduler/worker loop, stats and admin actions.
//!
//! [`Engine`] owns the injectable run state (ledger, stall monitor, clock)
//! and wires the scheduler to the processing pipeline. Front-ends drive it
//! with [`Engine::run_once`] or [`Engine::run_loop`] and observe progress
//! through a [`RunObserver`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use refscout_crawler::{FetchOptions, Fetcher, HttpFetcher};
use refscout_discovery::{DiscoveryOptions, OriginSource, WikiSource};
use refscout_shared::{AppConfig, Candidate, OriginDocument, RefScoutError, Result};
use refscout_storage::{ReclaimReport, StatusCounts, Storage};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::clock::{Clock, SystemClock, delta};
use crate::guards::{GuardName, PassReport};
use crate::ledger::{HostStats, Ledger};
use crate::monitor::{HealthSignal, MonitorSnapshot, ReseedDecision, StallMonitor};
use crate::notify::{Notifier, OutboxNotifier};
use crate::pipeline::{Pipeline, ProcessingOutcome};
use crate::scheduler::{PullOutcome, Scheduler};
use crate::scorer::{BridgeScorer, RelevanceScorer};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// The external capabilities the engine consumes.
pub struct Collaborators {
    pub source: Arc<dyn OriginSource>,
    pub fetcher: Arc<dyn Fetcher>,
    pub scorer: Arc<dyn RelevanceScorer>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Production wiring: HTTP discovery and fetching, the scorer bridge
    /// and the durable notification outbox.
    pub fn from_config(config: &AppConfig, storage: Arc<Storage>) -> Result<Self> {
        Ok(Self {
            source: Arc::new(WikiSource::new(DiscoveryOptions::from(&config.discovery))?),
            fetcher: Arc::new(HttpFetcher::new(FetchOptions::from(&config.pipeline))?),
            scorer: Arc::new(BridgeScorer::new(config.scorer.clone())),
            notifier: Arc::new(OutboxNotifier::new(storage)),
        })
    }
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Trait for reporting run progress to the caller (CLI progress bar, tests).
pub trait RunObserver: Send + Sync {
    /// A candidate was claimed and handed to a worker.
    fn dispatched(&self, candidate: &Candidate, relaxed: &[GuardName]);
    /// A worker finished a candidate.
    fn finished(&self, outcome: &ProcessingOutcome);
    /// A pass admitted nothing.
    fn stalled(&self, report: &PassReport);
    /// Origin documents were re-extracted.
    fn reseeded(&self, report: &SeedReport);
    /// The stall monitor raised a throughput warning.
    fn health(&self, signal: &HealthSignal);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl RunObserver for SilentObserver {
    fn dispatched(&self, _candidate: &Candidate, _relaxed: &[GuardName]) {}
    fn finished(&self, _outcome: &ProcessingOutcome) {}
    fn stalled(&self, _report: &PassReport) {}
    fn reseeded(&self, _report: &SeedReport) {}
    fn health(&self, _signal: &HealthSignal) {}
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Links enqueued from origin documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub documents: usize,
    pub links: usize,
    /// New candidates.
    pub inserted: usize,
    /// Already-known URLs; only provenance was recorded.
    pub duplicates: usize,
    /// Links that could not be normalized.
    pub skipped: usize,
    /// Origin documents that could not be read.
    pub failed_documents: usize,
}

impl SeedReport {
    pub fn merge(&mut self, other: SeedReport) {
        self.documents += other.documents;
        self.links += other.links;
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
        self.failed_documents += other.failed_documents;
    }
}

/// What one [`Engine::run_once`] call did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "tick", rename_all = "snake_case")]
pub enum TickOutcome {
    Processed(ProcessingOutcome),
    Stalled(PassReport),
    Reseeded(SeedReport),
    /// Nothing to do: leases are still in flight or reseeding is exhausted.
    Idle,
}

/// Options for [`Engine::run_loop`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunLoopOptions {
    /// Return once the frontier is empty and reseeding found nothing new.
    pub stop_when_idle: bool,
    /// Upper bound on scheduling ticks.
    pub max_ticks: Option<usize>,
}

/// Totals for one [`Engine::run_loop`] call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub ticks: usize,
    pub dispatched: u64,
    pub saved: u64,
    pub denied: u64,
    pub requeued: u64,
    pub lease_lost: u64,
    pub stalls: u64,
    pub reseeds: u64,
    /// Workers that failed on storage errors or panicked.
    pub errors: u64,
    /// Stopped by the shutdown signal.
    pub interrupted: bool,
    pub elapsed_secs: i64,
}

impl RunSummary {
    fn record(&mut self, outcome: &ProcessingOutcome) {
        if outcome.saved {
            self.saved += 1;
        } else if outcome.requeued {
            self.requeued += 1;
        } else if outcome.lease_lost {
            self.lease_lost += 1;
        } else {
            self.denied += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Persisted state, readable without a running engine.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub frontier: StatusCounts,
    pub denial_reasons: BTreeMap<String, u64>,
    pub content_records: u64,
    pub origin_documents: usize,
}

/// Guard bank state for operators.
#[derive(Debug, Clone, Serialize)]
pub struct GuardStats {
    pub order: Vec<GuardName>,
    pub classes_seen: usize,
    pub min_distinct_classes: usize,
    pub class_cooldown_until: Option<DateTime<Utc>>,
    pub contested_attempt_ratio: Option<f64>,
    pub contested_save_ratio: Option<f64>,
    /// Operator relaxations still in force, with their expiry.
    pub relaxations: BTreeMap<GuardName, DateTime<Utc>>,
    /// Share of the frontier each guard blocked in the last stalled pass.
    pub last_stall_pressure: BTreeMap<GuardName, f64>,
}

/// Full in-process snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub attempts: u64,
    pub saves: u64,
    pub denials: u64,
    pub store: StoreStats,
    pub guards: GuardStats,
    pub monitor: MonitorSnapshot,
    pub hosts: BTreeMap<String, HostStats>,
}

/// Stats from the store alone.
pub async fn store_stats(storage: &Storage) -> Result<StoreStats> {
    Ok(StoreStats {
        frontier: storage.status_counts().await?,
        denial_reasons: storage.denial_breakdown().await?.into_iter().collect(),
        content_records: storage.content_count().await?,
        origin_documents: storage.list_origin_documents().await?.len(),
    })
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Discovers, schedules and processes candidates against one store.
pub struct Engine {
    config: AppConfig,
    storage: Arc<Storage>,
    source: Arc<dyn OriginSource>,
    scorer: Arc<dyn RelevanceScorer>,
    clock: Arc<dyn Clock>,
    ledger: Arc<Ledger>,
    monitor: Arc<StallMonitor>,
    scheduler: Scheduler,
    pipeline: Pipeline,
    contested_keywords: Vec<String>,
}

impl Engine {
    pub fn new(config: AppConfig, storage: Arc<Storage>, collaborators: Collaborators) -> Result<Self> {
        Self::with_clock(config, storage, collaborators, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: AppConfig,
        storage: Arc<Storage>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let ledger = Arc::new(Ledger::new(config.guards.clone()));
        let monitor = Arc::new(StallMonitor::new(&config.monitor, &config.scheduler, clock.now()));
        let scheduler = Scheduler::new(
            &config,
            Arc::clone(&storage),
            Arc::clone(&ledger),
            Arc::clone(&monitor),
            Arc::clone(&clock),
        );
        let pipeline = Pipeline::new(
            &config,
            Arc::clone(&storage),
            collaborators.fetcher,
            Arc::clone(&collaborators.scorer),
            collaborators.notifier,
            Arc::clone(&clock),
        )?;
        let contested_keywords = config
            .guards
            .contested
            .keywords
            .iter()
            .map(|k| k.to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        Ok(Self {
            storage,
            source: collaborators.source,
            scorer: collaborators.scorer,
            clock,
            ledger,
            monitor,
            scheduler,
            pipeline,
            contested_keywords,
            config,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // -----------------------------------------------------------------------
    // Seeding
    // -----------------------------------------------------------------------

    /// Register an origin document and enqueue the links it lists.
    #[instrument(skip(self))]
    pub async fn seed(&self, url: &str, contested: bool) -> Result<SeedReport> {
        let doc = self.storage.upsert_origin_document(url, contested).await?;
        self.extract_links(&doc).await
    }

    /// Seed every `[[seeds]]` entry. A document that cannot be read is
    /// logged and counted, not fatal.
    pub async fn seed_configured(&self) -> Result<SeedReport> {
        let mut total = SeedReport::default();
        for entry in &self.config.seeds {
            match self.seed(&entry.url, entry.contested).await {
                Ok(report) => total.merge(report),
                Err(e @ (RefScoutError::Network(_) | RefScoutError::Parse { .. })) => {
                    warn!(url = %entry.url, error = %e, "seed document skipped");
                    total.failed_documents += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// Re-extract links from every registered origin document.
    pub async fn reseed(&self) -> Result<SeedReport> {
        let mut total = SeedReport::default();
        for doc in self.storage.list_origin_documents().await? {
            match self.extract_links(&doc).await {
                Ok(report) => total.merge(report),
                Err(e @ (RefScoutError::Network(_) | RefScoutError::Parse { .. })) => {
                    warn!(url = %doc.url, error = %e, "origin document unreadable during reseed");
                    total.failed_documents += 1;
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            documents = total.documents,
            inserted = total.inserted,
            duplicates = total.duplicates,
            "reseed finished"
        );
        Ok(total)
    }

    async fn extract_links(&self, doc: &OriginDocument) -> Result<SeedReport> {
        let links = self.source.list_links(doc).await?;
        let mut report = SeedReport {
            documents: 1,
            links: links.len(),
            ..SeedReport::default()
        };

        for link in &links {
            let contested = doc.contested || self.is_contested_url(&link.url);
            match self.storage.enqueue(&link.url, doc, link.ordinal, contested).await {
                Ok(outcome) if outcome.is_new() => report.inserted += 1,
                Ok(_) => report.duplicates += 1,
                Err(RefScoutError::Parse { message }) => {
                    debug!(href = %link.url, %message, "link skipped");
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.storage.mark_seeded(&doc.id, links.len() as u32).await?;
        info!(
            url = %doc.url,
            links = report.links,
            inserted = report.inserted,
            duplicates = report.duplicates,
            "origin document seeded"
        );
        Ok(report)
    }

    fn is_contested_url(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        self.contested_keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    /// One scheduling tick, processed inline: reclaim stale leases, pull,
    /// then process the admitted candidate or handle an empty frontier.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<TickOutcome> {
        self.reclaim_stale_leases().await?;
        self.check_health();
        match self.scheduler.pull().await? {
            PullOutcome::Admitted { candidate, .. } => {
                Ok(TickOutcome::Processed(self.process(*candidate).await?))
            }
            PullOutcome::Stalled(report) => Ok(TickOutcome::Stalled(report)),
            PullOutcome::NoWorkAvailable => self.on_empty_frontier().await,
        }
    }

    /// Drive the scheduler with up to `scheduler.workers` concurrent
    /// pipeline runs until `shutdown` resolves (or, with
    /// `stop_when_idle`, the work runs out). In-flight workers always
    /// finish before this returns.
    pub async fn run_loop<F>(
        self: &Arc<Self>,
        options: RunLoopOptions,
        shutdown: F,
        observer: &dyn RunObserver,
    ) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let started = self.clock.now();
        let workers = Arc::new(Semaphore::new(self.config.scheduler.workers.max(1)));
        let mut tasks: JoinSet<Result<ProcessingOutcome>> = JoinSet::new();
        let mut summary = RunSummary::default();
        info!(workers = self.config.scheduler.workers, "run started");

        loop {
            while let Some(joined) = tasks.try_join_next() {
                reap(joined, &mut summary, observer);
            }
            if options.max_ticks.is_some_and(|max| summary.ticks >= max) {
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    summary.interrupted = true;
                    break;
                }
                permit = Arc::clone(&workers).acquire_owned() => permit
                    .map_err(|e| RefScoutError::InvalidState(format!("worker pool closed: {e}")))?,
            };
            summary.ticks += 1;

            self.reclaim_stale_leases().await?;
            if let Some(signal) = self.check_health() {
                observer.health(&signal);
            }

            match self.scheduler.pull().await? {
                PullOutcome::Admitted { candidate, relaxed } => {
                    observer.dispatched(&candidate, &relaxed);
                    summary.dispatched += 1;
                    let engine = Arc::clone(self);
                    tasks.spawn(async move {
                        let _permit = permit;
                        engine.process(*candidate).await
                    });
                    continue;
                }
                PullOutcome::Stalled(report) => {
                    drop(permit);
                    summary.stalls += 1;
                    observer.stalled(&report);
                }
                PullOutcome::NoWorkAvailable => {
                    drop(permit);
                    if !tasks.is_empty() {
                        // In-flight work may requeue candidates.
                        tokio::select! {
                            biased;
                            _ = &mut shutdown => {
                                summary.interrupted = true;
                                break;
                            }
                            Some(joined) = tasks.join_next() => reap(joined, &mut summary, observer),
                        }
                        continue;
                    }
                    if let TickOutcome::Reseeded(report) = self.on_empty_frontier().await? {
                        summary.reseeds += 1;
                        observer.reseeded(&report);
                        if report.inserted > 0 {
                            continue;
                        }
                    }
                    if options.stop_when_idle {
                        break;
                    }
                }
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    summary.interrupted = true;
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    reap(joined, &mut summary, observer);
                }
                _ = tokio::time::sleep(self.config.scheduler.idle_backoff()) => {}
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "waiting for workers to finish");
        }
        while let Some(joined) = tasks.join_next().await {
            reap(joined, &mut summary, observer);
        }
        self.pipeline.flush_notifications().await;
        self.scorer.shutdown().await;

        summary.elapsed_secs = (self.clock.now() - started).num_seconds();
        info!(
            ticks = summary.ticks,
            dispatched = summary.dispatched,
            saved = summary.saved,
            denied = summary.denied,
            requeued = summary.requeued,
            stalls = summary.stalls,
            interrupted = summary.interrupted,
            "run finished"
        );
        Ok(summary)
    }

    /// Run the pipeline for an admitted candidate and fold the outcome into
    /// the ledger.
    async fn process(&self, candidate: Candidate) -> Result<ProcessingOutcome> {
        let outcome = self.pipeline.process(candidate.clone()).await?;
        self.ledger.record_outcome(&candidate, &outcome, self.clock.now());
        Ok(outcome)
    }

    async fn on_empty_frontier(&self) -> Result<TickOutcome> {
        if self.storage.leased_count().await? > 0 {
            return Ok(TickOutcome::Idle);
        }
        match self.monitor.note_frontier_empty() {
            ReseedDecision::Reseed { attempt } => {
                info!(attempt, "frontier empty, reseeding from origin documents");
                self.ledger.note_reseed(attempt);
                Ok(TickOutcome::Reseeded(self.reseed().await?))
            }
            ReseedDecision::Exhausted => Ok(TickOutcome::Idle),
        }
    }

    fn check_health(&self) -> Option<HealthSignal> {
        let guard = self.ledger.snapshot().guard;
        self.monitor.check_health(&guard, self.clock.now())
    }

    // -----------------------------------------------------------------------
    // Admin
    // -----------------------------------------------------------------------

    /// Return expired leases to the frontier.
    pub async fn reclaim_stale_leases(&self) -> Result<ReclaimReport> {
        let cutoff = self.clock.now() - delta(self.config.scheduler.lease_timeout());
        self.storage
            .reclaim_stale_leases(cutoff, self.config.scheduler.max_attempts_per_candidate)
            .await
    }

    /// Re-admit relevance denials scored at least `min_score`.
    pub async fn reprocess_denied(&self, min_score: f64) -> Result<u64> {
        self.storage.reprocess_denied(min_score).await
    }

    /// Clear a host's attempt count. Returns whether the host was known.
    pub fn reset_host_cap(&self, host: &str) -> bool {
        self.ledger.reset_host_cap(host)
    }

    /// Disable `guard` for `duration`.
    pub fn relax_guard(&self, guard: GuardName, duration: Duration) {
        self.ledger.relax(guard, duration, self.clock.now());
    }

    /// In-process snapshot of the store, guards, monitor and hosts.
    pub async fn stats(&self) -> Result<EngineStats> {
        let now = self.clock.now();
        let store = store_stats(&self.storage).await?;
        let active = self.ledger.active_relaxations(now);
        let snapshot = self.ledger.snapshot();
        let state = &snapshot.guard;

        let last_stall_pressure: BTreeMap<GuardName, f64> = self
            .scheduler
            .last_stall()
            .map(|report| {
                report
                    .blocked
                    .keys()
                    .map(|g| (*g, report.pressure(*g)))
                    .collect()
            })
            .unwrap_or_default();

        let guards = GuardStats {
            order: self.scheduler.guard_order(),
            classes_seen: state.classes_seen.len(),
            min_distinct_classes: self.config.guards.min_distinct_classes,
            class_cooldown_until: state.class_cooldown_until.filter(|until| now < *until),
            contested_attempt_ratio: state.contested_attempt_ratio(),
            contested_save_ratio: state.contested_save_ratio(),
            relaxations: snapshot
                .relaxations
                .iter()
                .filter(|(g, _)| active.contains(g))
                .map(|(g, until)| (*g, *until))
                .collect(),
            last_stall_pressure,
        };

        Ok(EngineStats {
            attempts: state.total_attempts,
            saves: state.total_saves,
            denials: state.total_denials,
            store,
            guards,
            monitor: self.monitor.snapshot(now),
            hosts: snapshot.hosts.clone(),
        })
    }
}

fn reap(
    joined: std::result::Result<Result<ProcessingOutcome>, JoinError>,
    summary: &mut RunSummary,
    observer: &dyn RunObserver,
) {
    match joined {
        Ok(Ok(outcome)) => {
            summary.record(&outcome);
            observer.finished(&outcome);
        }
        Ok(Err(e)) => {
            summary.errors += 1;
            error!(error = %e, "worker failed, lease left for reclaim");
        }
        Err(e) => {
            summary.errors += 1;
            error!(error = %e, "worker task aborted");
        }
    }
}
