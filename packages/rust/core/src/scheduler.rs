//! Frontier selection: `pull_candidate_with_bias`.
//!
//! One pass reads a ranked slice of the frontier, re-ranks it with the
//! host-health bias, and walks it through the guard bank until a candidate
//! is admitted and claimed. A pass that admits nothing is a stall; the stall
//! monitor decides when a stall earns an escape, which retries the pass while
//! lifting blocking soft guards one at a time.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use refscout_shared::{AppConfig, Candidate, Result, ScanStatus, SchedulerConfig};
use refscout_storage::{EligibilityFilter, Storage};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::clock::Clock;
use crate::guards::{GuardBank, GuardContext, GuardName, GuardScope, GuardVerdict, PassReport};
use crate::ledger::{Ledger, LedgerSnapshot};
use crate::monitor::StallMonitor;

/// Result of one scheduling call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PullOutcome {
    /// Claimed for processing; the candidate is already `verifying`.
    Admitted {
        candidate: Box<Candidate>,
        /// Soft guards the escape valve bypassed for this admission, in the
        /// order they were lifted. Empty for a normal admission.
        relaxed: Vec<GuardName>,
    },
    /// Work exists but nothing was admissible right now.
    Stalled(PassReport),
    /// No attemptable candidate remains in the store.
    NoWorkAvailable,
}

/// Chooses the next candidate to process.
pub struct Scheduler {
    storage: Arc<Storage>,
    ledger: Arc<Ledger>,
    monitor: Arc<StallMonitor>,
    clock: Arc<dyn Clock>,
    bank: GuardBank,
    config: SchedulerConfig,
    /// Passes are serialized; claims stay atomic in storage regardless.
    pull_lock: tokio::sync::Mutex<()>,
    last_pass: Mutex<Option<PassReport>>,
}

impl Scheduler {
    pub fn new(
        config: &AppConfig,
        storage: Arc<Storage>,
        ledger: Arc<Ledger>,
        monitor: Arc<StallMonitor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            ledger,
            monitor,
            clock,
            bank: GuardBank::standard(),
            config: config.scheduler.clone(),
            pull_lock: tokio::sync::Mutex::new(()),
            last_pass: Mutex::new(None),
        }
    }

    pub fn guard_order(&self) -> Vec<GuardName> {
        self.bank.order()
    }

    /// Report of the most recent pass that admitted nothing.
    pub fn last_stall(&self) -> Option<PassReport> {
        self.last_pass.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Pull with the configured `max_tries`.
    pub async fn pull(&self) -> Result<PullOutcome> {
        self.pull_candidate_with_bias(self.config.max_tries).await
    }

    /// Evaluate up to `max_tries` ranked candidates and claim the first one
    /// every guard admits.
    ///
    /// Candidates skipped because an earlier one of the same class or host
    /// was already blocked do not use up a try.
    #[instrument(skip(self))]
    pub async fn pull_candidate_with_bias(&self, max_tries: usize) -> Result<PullOutcome> {
        let _serialized = self.pull_lock.lock().await;
        let now = self.clock.now();
        let max_tries = max_tries.max(1);
        let max_attempts = self.config.max_attempts_per_candidate;

        let cooled = self.ledger.cooled_down_hosts(now);
        let filter = EligibilityFilter {
            excluded_hosts: cooled.clone(),
            max_attempts,
            default_priority: self.config.default_priority,
        };
        let limit = max_tries.saturating_mul(self.config.rank_window.max(1));
        let mut rows = self.storage.ranked_eligible(&filter, limit).await?;

        if rows.is_empty() {
            if self.storage.pending_count(max_attempts).await? == 0 {
                return Ok(PullOutcome::NoWorkAvailable);
            }
            let report = PassReport {
                cooled_down: cooled.len() as u64,
                ..PassReport::default()
            };
            debug!(hosts = cooled.len(), "all pending work is on cooled-down hosts");
            self.monitor.record_stall(&report, now);
            return Ok(self.stalled(report));
        }

        let snapshot = self.ledger.snapshot();
        let relaxed = self.ledger.active_relaxations(now);
        self.rerank(&mut rows, &snapshot, now);

        let (admitted, mut report) = self
            .pass(&rows, &snapshot, &relaxed, max_tries, now)
            .await?;
        report.cooled_down = cooled.len() as u64;
        if let Some(candidate) = admitted {
            return Ok(self.admit(candidate, Vec::new(), now));
        }

        if let Some(guard) = self.monitor.record_stall(&report, now) {
            if let Some((candidate, lifted)) = self
                .escape(&rows, &snapshot, relaxed, guard, max_tries, now)
                .await?
            {
                return Ok(self.admit(candidate, lifted, now));
            }
        }

        Ok(self.stalled(report))
    }

    /// Retry the pass with `first` lifted. While nothing is admitted, also
    /// lift the soft guard blocking most of the latest retry. Every lifted
    /// guard is restored when this returns.
    async fn escape(
        &self,
        rows: &[Candidate],
        snapshot: &LedgerSnapshot,
        mut relaxed: BTreeSet<GuardName>,
        first: GuardName,
        max_tries: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<(Candidate, Vec<GuardName>)>> {
        let mut lifted = vec![first];
        relaxed.insert(first);
        loop {
            let (admitted, report) = self.pass(rows, snapshot, &relaxed, max_tries, now).await?;
            if let Some(candidate) = admitted {
                info!(guards = ?lifted, "escape pass admitted, guards restored");
                return Ok(Some((candidate, lifted)));
            }
            match report.most_restrictive_soft() {
                Some(next) if relaxed.insert(next) => {
                    debug!(guard = %next, pressure = report.pressure(next), "escape pass still blocked, lifting");
                    lifted.push(next);
                }
                _ => {
                    info!(guards = ?lifted, "escape pass admitted nothing, guards restored");
                    return Ok(None);
                }
            }
        }
    }

    /// Stable re-sort by stored priority times the bank's priority factor.
    fn rerank(&self, rows: &mut [Candidate], snapshot: &LedgerSnapshot, now: DateTime<Utc>) {
        let config = self.ledger.config();
        let effective = |c: &Candidate| {
            let ctx = GuardContext {
                candidate: c,
                state: &snapshot.guard,
                host: snapshot.hosts.get(&c.host),
                config,
                now,
            };
            c.priority_score.unwrap_or(self.config.default_priority) * self.bank.priority_factor(&ctx)
        };
        rows.sort_by(|a, b| effective(b).total_cmp(&effective(a)));
    }

    async fn pass(
        &self,
        rows: &[Candidate],
        snapshot: &LedgerSnapshot,
        relaxed: &BTreeSet<GuardName>,
        max_tries: usize,
        now: DateTime<Utc>,
    ) -> Result<(Option<Candidate>, PassReport)> {
        let config = self.ledger.config();
        let mut report = PassReport::default();
        let mut blocked_classes: HashMap<&str, GuardName> = HashMap::new();
        let mut blocked_hosts: HashMap<&str, GuardName> = HashMap::new();
        let mut tries = 0;

        for candidate in rows {
            if tries >= max_tries {
                break;
            }
            let known = blocked_classes
                .get(candidate.class_key.as_str())
                .or_else(|| blocked_hosts.get(candidate.host.as_str()))
                .copied();
            if let Some(guard) = known {
                report.record_blocked(guard);
                continue;
            }
            tries += 1;

            let ctx = GuardContext {
                candidate,
                state: &snapshot.guard,
                host: snapshot.hosts.get(&candidate.host),
                config,
                now,
            };
            match self.bank.evaluate(&ctx, relaxed) {
                GuardVerdict::Blocked(guard) => {
                    debug!(url = %candidate.url, %guard, "guard blocked candidate");
                    report.record_blocked(guard);
                    match guard.scope() {
                        GuardScope::Class => {
                            blocked_classes.insert(candidate.class_key.as_str(), guard);
                        }
                        GuardScope::Host => {
                            blocked_hosts.insert(candidate.host.as_str(), guard);
                        }
                        GuardScope::Candidate => {}
                    }
                }
                GuardVerdict::Admitted { priority_factor } => {
                    report.considered += 1;
                    let max_attempts = self.config.max_attempts_per_candidate;
                    if let Some(generation) = self.storage.claim(&candidate.id, now, max_attempts).await? {
                        debug!(url = %candidate.url, priority_factor, generation, "candidate claimed");
                        let mut claimed = candidate.clone();
                        claimed.lease_generation = generation;
                        return Ok((Some(claimed), report));
                    }
                    debug!(url = %candidate.url, "claim lost to another worker");
                }
            }
        }
        Ok((None, report))
    }

    fn admit(&self, mut candidate: Candidate, relaxed: Vec<GuardName>, now: DateTime<Utc>) -> PullOutcome {
        self.ledger.note_dispatch(&candidate, now);
        self.monitor.record_admission();
        candidate.scan_status = ScanStatus::Verifying;
        candidate.lease_at = Some(now);
        candidate.last_attempt_at = Some(now);
        info!(
            candidate_id = %candidate.id,
            url = %candidate.url,
            class = %candidate.class_key,
            relaxed = ?relaxed,
            "dispatched"
        );
        PullOutcome::Admitted {
            candidate: Box::new(candidate),
            relaxed,
        }
    }

    fn stalled(&self, report: PassReport) -> PullOutcome {
        *self.last_pass.lock().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());
        PullOutcome::Stalled(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use refscout_shared::ErrorKind;

    use super::*;
    use crate::clock::ManualClock;
    use crate::pipeline::ProcessingOutcome;
    use crate::testing::{candidate_on, seed_links, temp_storage, test_config};

    struct Harness {
        storage: Arc<Storage>,
        ledger: Arc<Ledger>,
        clock: Arc<ManualClock>,
        scheduler: Scheduler,
    }

    async fn harness(config: &AppConfig) -> Harness {
        let storage = temp_storage().await;
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = Arc::new(Ledger::new(config.guards.clone()));
        let monitor = Arc::new(StallMonitor::new(&config.monitor, &config.scheduler, clock.now()));
        let scheduler = Scheduler::new(
            config,
            Arc::clone(&storage),
            Arc::clone(&ledger),
            monitor,
            clock.clone(),
        );
        Harness {
            storage,
            ledger,
            clock,
            scheduler,
        }
    }

    fn admitted(outcome: PullOutcome) -> (Candidate, Vec<GuardName>) {
        match outcome {
            PullOutcome::Admitted { candidate, relaxed } => (*candidate, relaxed),
            other => panic!("expected admission, got {other:?}"),
        }
    }

    fn verified(candidate: &Candidate) -> ProcessingOutcome {
        let mut outcome = ProcessingOutcome::new(candidate.id.clone());
        outcome.verified = true;
        outcome
    }

    #[tokio::test]
    async fn empty_store_is_no_work() {
        let h = harness(&test_config()).await;
        assert!(matches!(
            h.scheduler.pull().await.unwrap(),
            PullOutcome::NoWorkAvailable
        ));
    }

    #[tokio::test]
    async fn admission_claims_the_candidate() {
        let h = harness(&test_config()).await;
        seed_links(&h.storage, "https://en.wikipedia.org/wiki/Tide", &["https://noaa.gov/tides"]).await;

        let (candidate, relaxed) = admitted(h.scheduler.pull().await.unwrap());
        assert!(relaxed.is_empty());
        assert_eq!(candidate.scan_status, ScanStatus::Verifying);
        let stored = h.storage.get(&candidate.id).await.unwrap().unwrap();
        assert_eq!(stored.scan_status, ScanStatus::Verifying);
        assert!(stored.lease_at.is_some());
        assert_eq!(h.ledger.host("noaa.gov").unwrap().attempt_count, 1);

        // The only candidate is leased now; nothing attemptable remains.
        assert!(matches!(
            h.scheduler.pull().await.unwrap(),
            PullOutcome::NoWorkAvailable
        ));
    }

    #[tokio::test]
    async fn concurrent_pulls_never_share_a_candidate() {
        let mut config = test_config();
        config.guards.min_distinct_classes = 0;
        let h = harness(&config).await;
        let links: Vec<String> = (0..20).map(|i| format!("https://site{i}.example/article")).collect();
        let refs: Vec<&str> = links.iter().map(String::as_str).collect();
        seed_links(&h.storage, "https://en.wikipedia.org/wiki/Tide", &refs).await;

        let scheduler = Arc::new(h.scheduler);
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..30 {
            let scheduler = Arc::clone(&scheduler);
            tasks.spawn(async move { scheduler.pull().await.unwrap() });
        }

        let mut ids = HashSet::new();
        let mut admissions = 0;
        while let Some(outcome) = tasks.join_next().await {
            if let PullOutcome::Admitted { candidate, .. } = outcome.unwrap() {
                admissions += 1;
                assert!(ids.insert(candidate.id.clone()), "{} dispatched twice", candidate.url);
            }
        }
        assert_eq!(admissions, 20);
        assert_eq!(h.storage.leased_count().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn unhealthy_host_ranks_below_healthy_one() {
        let mut config = test_config();
        config.guards.min_distinct_classes = 0;
        let h = harness(&config).await;
        seed_links(
            &h.storage,
            "https://en.wikipedia.org/wiki/Tide",
            &["https://sick.example/a", "https://sick.example/b", "https://well.example/a"],
        )
        .await;

        // Take sick.example/a and fail it repeatedly.
        let (first, _) = admitted(h.scheduler.pull().await.unwrap());
        assert_eq!(first.host, "sick.example");
        let mut failed = ProcessingOutcome::new(first.id.clone());
        failed.error_kind = Some(ErrorKind::NotFound);
        for _ in 0..4 {
            h.ledger.record_outcome(&first, &failed, h.clock.now());
        }
        assert!(h.ledger.host("sick.example").unwrap().success_rate_ema < config.guards.health_floor);
        h.clock.advance(Duration::from_secs(1));

        let (next, _) = admitted(h.scheduler.pull().await.unwrap());
        assert_eq!(next.host, "well.example");
    }

    #[tokio::test]
    async fn host_cap_blocks_until_reset() {
        let mut config = test_config();
        config.guards.min_distinct_classes = 0;
        config.guards.host_cap = 2;
        let h = harness(&config).await;
        seed_links(
            &h.storage,
            "https://en.wikipedia.org/wiki/Tide",
            &["https://noaa.gov/a", "https://noaa.gov/b", "https://noaa.gov/c"],
        )
        .await;

        for _ in 0..2 {
            admitted(h.scheduler.pull().await.unwrap());
            h.clock.advance(Duration::from_secs(1));
        }
        match h.scheduler.pull().await.unwrap() {
            PullOutcome::Stalled(report) => {
                assert_eq!(report.blocked.get(&GuardName::HostCap), Some(&1));
            }
            other => panic!("expected stall, got {other:?}"),
        }
        assert_eq!(h.ledger.host("noaa.gov").unwrap().attempt_count, 2);

        assert!(h.ledger.reset_host_cap("noaa.gov"));
        let (candidate, _) = admitted(h.scheduler.pull().await.unwrap());
        assert_eq!(candidate.url, "https://noaa.gov/c");
    }

    #[tokio::test]
    async fn retry_backoff_hides_host_without_reporting_no_work() {
        let mut config = test_config();
        config.guards.min_distinct_classes = 0;
        let h = harness(&config).await;
        seed_links(
            &h.storage,
            "https://en.wikipedia.org/wiki/Tide",
            &["https://slow.example/a", "https://slow.example/b"],
        )
        .await;

        let (first, _) = admitted(h.scheduler.pull().await.unwrap());
        let mut timeout = ProcessingOutcome::new(first.id.clone());
        timeout.error_kind = Some(ErrorKind::Timeout);
        timeout.requeued = true;
        h.ledger.record_outcome(&first, &timeout, h.clock.now());

        match h.scheduler.pull().await.unwrap() {
            PullOutcome::Stalled(report) => {
                assert_eq!(report.cooled_down, 1);
                assert_eq!(report.considered, 0);
            }
            other => panic!("expected stall, got {other:?}"),
        }

        h.clock.advance(config.guards.retry_backoff() + Duration::from_secs(1));
        let (next, _) = admitted(h.scheduler.pull().await.unwrap());
        assert_eq!(next.url, "https://slow.example/b");
    }

    #[tokio::test]
    async fn stall_escapes_after_threshold_and_grace() {
        let mut config = test_config();
        config.scheduler.grace_period_secs = 120;
        config.scheduler.stall_threshold = 2;
        let h = harness(&config).await;
        let origin = "https://encyclopedia.example/wiki/Tide";
        seed_links(
            &h.storage,
            origin,
            &["https://encyclopedia.example/wiki/Moon", "https://encyclopedia.example/wiki/Sun"],
        )
        .await;

        admitted(h.scheduler.pull().await.unwrap());
        h.clock.advance(Duration::from_secs(1));

        // Within the grace period every pass stalls on topic coherence.
        for _ in 0..4 {
            match h.scheduler.pull().await.unwrap() {
                PullOutcome::Stalled(report) => {
                    assert_eq!(report.most_restrictive_soft(), Some(GuardName::TopicCoherence));
                }
                other => panic!("expected stall, got {other:?}"),
            }
        }
        assert!(h.scheduler.last_stall().is_some());

        h.clock.advance(Duration::from_secs(121));
        // One more stall reaches the threshold again, now past the grace period.
        let outcome = match h.scheduler.pull().await.unwrap() {
            PullOutcome::Stalled(_) => h.scheduler.pull().await.unwrap(),
            other => other,
        };
        let (candidate, relaxed) = admitted(outcome);
        assert_eq!(relaxed, vec![GuardName::TopicCoherence]);
        assert_eq!(candidate.url, "https://encyclopedia.example/wiki/Sun");
    }

    #[tokio::test]
    async fn internal_links_yield_to_external_classes() {
        let mut config = test_config();
        config.guards.min_distinct_classes = 3;
        config.scheduler.rank_window = 5;
        let h = harness(&config).await;

        let origin = "https://encyclopedia.example/wiki/Tide";
        let mut links: Vec<String> = (0..50)
            .map(|i| format!("https://encyclopedia.example/wiki/Topic_{i}"))
            .collect();
        links.push("https://noaa.gov/tides".into());
        links.push("https://oceanservice.example/facts".into());
        let refs: Vec<&str> = links.iter().map(String::as_str).collect();
        seed_links(&h.storage, origin, &refs).await;

        // First internal link opens the internal class.
        let (first, _) = admitted(h.scheduler.pull().await.unwrap());
        assert_eq!(first.class_key, "origin:encyclopedia.example");
        h.clock.advance(Duration::from_secs(1));

        // Forced passes: only the external classes are admissible.
        let (second, _) = admitted(h.scheduler.pull().await.unwrap());
        h.clock.advance(Duration::from_secs(1));
        let (third, _) = admitted(h.scheduler.pull().await.unwrap());
        h.clock.advance(Duration::from_secs(1));
        let externals: HashSet<_> = [second.host.as_str(), third.host.as_str()].into_iter().collect();
        assert_eq!(externals, HashSet::from(["noaa.gov", "oceanservice.example"]));

        // Nothing else is admissible until classes verify.
        assert!(matches!(h.scheduler.pull().await.unwrap(), PullOutcome::Stalled(_)));

        for candidate in [&first, &second, &third] {
            h.ledger.record_outcome(candidate, &verified(candidate), h.clock.now());
        }
        h.clock.advance(Duration::from_secs(1));
        let (next, relaxed) = admitted(h.scheduler.pull().await.unwrap());
        assert!(relaxed.is_empty());
        assert_eq!(next.class_key, "origin:encyclopedia.example");
    }

    #[tokio::test]
    async fn single_class_frontier_escapes_after_grace() {
        let mut config = test_config();
        config.guards.min_distinct_classes = 3;
        config.scheduler.grace_period_secs = 120;
        let h = harness(&config).await;
        let links: Vec<String> = (0..50)
            .map(|i| format!("https://encyclopedia.example/wiki/Topic_{i}"))
            .collect();
        let refs: Vec<&str> = links.iter().map(String::as_str).collect();
        seed_links(&h.storage, "https://encyclopedia.example/wiki/Tide", &refs).await;

        let (first, _) = admitted(h.scheduler.pull().await.unwrap());
        h.ledger.record_outcome(&first, &verified(&first), h.clock.now());
        h.clock.advance(Duration::from_secs(121));

        let mut escaped = None;
        for _ in 0..config.scheduler.stall_threshold {
            if let PullOutcome::Admitted { candidate, relaxed } = h.scheduler.pull().await.unwrap() {
                escaped = Some((candidate, relaxed));
            }
        }
        let (candidate, relaxed) = escaped.expect("escape valve admits an internal link");
        assert_eq!(relaxed, vec![GuardName::TopicCoherence]);
        assert_eq!(candidate.class_key, "origin:encyclopedia.example");
    }

    #[tokio::test]
    async fn escape_lifts_every_soft_guard_blocking_together() {
        let mut config = test_config();
        config.guards.min_distinct_classes = 3;
        config.guards.contested.enabled = true;
        config.scheduler.grace_period_secs = 120;
        config.scheduler.stall_threshold = 2;
        let h = harness(&config).await;
        let links: Vec<String> = (0..20)
            .map(|i| format!("https://encyclopedia.example/wiki/Topic_{i}"))
            .collect();
        let refs: Vec<&str> = links.iter().map(String::as_str).collect();
        seed_links(&h.storage, "https://encyclopedia.example/wiki/Tide", &refs).await;

        // Earlier uncontested dispatches in the same class: topic coherence
        // blocks the class and the contested share is below target.
        for i in 0..config.guards.contested.min_sample {
            let earlier = candidate_on(
                &format!("https://encyclopedia.example/wiki/Earlier_{i}"),
                "origin:encyclopedia.example",
            );
            h.ledger.note_dispatch(&earlier, h.clock.now());
        }
        h.clock.advance(Duration::from_secs(300));

        let mut escaped = None;
        for _ in 0..config.scheduler.stall_threshold {
            match h.scheduler.pull().await.unwrap() {
                PullOutcome::Admitted { candidate, relaxed } => {
                    escaped = Some((*candidate, relaxed));
                    break;
                }
                PullOutcome::Stalled(report) => {
                    assert_eq!(report.most_restrictive_soft(), Some(GuardName::TopicCoherence));
                }
                PullOutcome::NoWorkAvailable => panic!("frontier is not empty"),
            }
        }
        let (candidate, relaxed) = escaped.expect("escape admits despite two blocking guards");
        assert_eq!(relaxed, vec![GuardName::TopicCoherence, GuardName::CategoryBalance]);
        assert_eq!(candidate.class_key, "origin:encyclopedia.example");
        assert_eq!(h.scheduler.monitor.snapshot(h.clock.now()).escapes, 1);

        // Both guards are back in force for the next pass.
        h.clock.advance(Duration::from_secs(1));
        match h.scheduler.pull().await.unwrap() {
            PullOutcome::Stalled(report) => {
                assert!(report.blocked.contains_key(&GuardName::TopicCoherence));
            }
            other => panic!("expected stall, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn claimed_candidate_carries_its_lease_generation() {
        let h = harness(&test_config()).await;
        seed_links(&h.storage, "https://en.wikipedia.org/wiki/Tide", &["https://noaa.gov/tides"]).await;

        let (candidate, _) = admitted(h.scheduler.pull().await.unwrap());
        let stored = h.storage.get(&candidate.id).await.unwrap().unwrap();
        assert_eq!(candidate.lease_generation, 1);
        assert_eq!(candidate.lease_generation, stored.lease_generation);
    }

    #[tokio::test]
    async fn operator_relaxation_skips_guard_until_expiry() {
        let mut config = test_config();
        config.guards.min_distinct_classes = 0;
        config.guards.host_cap = 1;
        let h = harness(&config).await;
        seed_links(
            &h.storage,
            "https://en.wikipedia.org/wiki/Tide",
            &["https://noaa.gov/a", "https://noaa.gov/b", "https://noaa.gov/c"],
        )
        .await;

        admitted(h.scheduler.pull().await.unwrap());
        h.clock.advance(Duration::from_secs(1));
        assert!(matches!(h.scheduler.pull().await.unwrap(), PullOutcome::Stalled(_)));

        h.ledger
            .relax(GuardName::HostCap, Duration::from_secs(60), h.clock.now());
        admitted(h.scheduler.pull().await.unwrap());

        h.clock.advance(Duration::from_secs(61));
        assert!(matches!(h.scheduler.pull().await.unwrap(), PullOutcome::Stalled(_)));
    }
}
