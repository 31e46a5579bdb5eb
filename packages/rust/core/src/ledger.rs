//! Shared attempt statistics: per-host [`HostStats`] and the bank-wide
//! [`GuardState`].
//!
//! The [`Ledger`] is the only mutable state the guards read. It is an
//! injectable object rather than a global, so parallel tests get their own.
//! Every update happens under one short-lived lock that is never held across
//! an `.await`, which keeps concurrent increments linearizable.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use refscout_shared::{Candidate, GuardConfig};
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::delta;
use crate::guards::{GuardName, in_cooldown_class};
use crate::pipeline::ProcessingOutcome;

// ---------------------------------------------------------------------------
// HostStats
// ---------------------------------------------------------------------------

/// Rolling counters for one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostStats {
    pub attempt_count: u32,
    pub success_count: u32,
    /// Exponential moving average of verification success, starting at 1.
    pub success_rate_ema: f64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Retry backoff: the host is skipped entirely until then.
    pub throttled_until: Option<DateTime<Utc>>,
}

impl HostStats {
    pub fn new() -> Self {
        Self {
            attempt_count: 0,
            success_count: 0,
            success_rate_ema: 1.0,
            last_attempt_at: None,
            throttled_until: None,
        }
    }
}

impl Default for HostStats {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// GuardState
// ---------------------------------------------------------------------------

/// Bank-wide counters the guards consult.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GuardState {
    /// Classes with at least one attempt that reached the host.
    pub classes_seen: BTreeSet<String>,
    /// Dispatches per class.
    pub class_attempts: BTreeMap<String, u64>,
    /// End of the active class cooldown, if any.
    pub class_cooldown_until: Option<DateTime<Utc>>,
    pub contested_attempts: u64,
    pub contested_saves: u64,
    pub total_attempts: u64,
    pub total_saves: u64,
    pub total_denials: u64,
    pub reseed_attempt_count: u32,
    pub last_save_at: Option<DateTime<Utc>>,
    /// Trailing dispatch window for the class cooldown: `(at, in_class)`.
    #[serde(skip)]
    pub recent: VecDeque<(DateTime<Utc>, bool)>,
}

impl GuardState {
    /// Share of attempts spent on contested candidates.
    pub fn contested_attempt_ratio(&self) -> Option<f64> {
        (self.total_attempts > 0)
            .then(|| self.contested_attempts as f64 / self.total_attempts as f64)
    }

    /// Share of saves that were contested. `None` before the first save.
    pub fn contested_save_ratio(&self) -> Option<f64> {
        (self.total_saves > 0).then(|| self.contested_saves as f64 / self.total_saves as f64)
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Point-in-time copy of the ledger.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerSnapshot {
    pub hosts: BTreeMap<String, HostStats>,
    pub guard: GuardState,
    /// Guards relaxed by an operator, with their expiry.
    pub relaxations: BTreeMap<GuardName, DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    hosts: HashMap<String, HostStats>,
    guard: GuardState,
    relaxations: BTreeMap<GuardName, DateTime<Utc>>,
}

/// Process-wide HostStats and GuardState.
#[derive(Debug)]
pub struct Ledger {
    config: GuardConfig,
    inner: Mutex<LedgerInner>,
}

impl Ledger {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(LedgerInner::default()),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let inner = self.lock();
        LedgerSnapshot {
            hosts: inner
                .hosts
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            guard: inner.guard.clone(),
            relaxations: inner.relaxations.clone(),
        }
    }

    pub fn host(&self, host: &str) -> Option<HostStats> {
        self.lock().hosts.get(host).cloned()
    }

    /// Count a dispatch. Called once per successful claim.
    pub fn note_dispatch(&self, candidate: &Candidate, now: DateTime<Utc>) {
        let mut inner = self.lock();
        let host = inner
            .hosts
            .entry(candidate.host.clone())
            .or_insert_with(HostStats::new);
        host.attempt_count += 1;
        host.last_attempt_at = Some(now);

        let state = &mut inner.guard;
        state.total_attempts += 1;
        if candidate.contested {
            state.contested_attempts += 1;
        }
        *state
            .class_attempts
            .entry(candidate.class_key.clone())
            .or_default() += 1;

        let cooldown = &self.config.class_cooldown;
        let in_class = in_cooldown_class(&candidate.host, &cooldown.host_patterns);
        state.recent.push_back((now, in_class));
        let horizon = now - delta(cooldown.window());
        while state.recent.front().is_some_and(|(at, _)| *at < horizon) {
            state.recent.pop_front();
        }

        let active = state.class_cooldown_until.is_some_and(|until| now < until);
        let total = state.recent.len();
        if !active && total >= cooldown.min_window_attempts {
            let hits = state.recent.iter().filter(|(_, c)| *c).count();
            let share = hits as f64 / total as f64;
            if share > cooldown.max_share {
                let until = now + delta(cooldown.cooldown());
                state.class_cooldown_until = Some(until);
                info!(share, %until, "class cooldown engaged");
            }
        }
    }

    /// Fold a finished pipeline run into the counters.
    pub fn record_outcome(&self, candidate: &Candidate, outcome: &ProcessingOutcome, now: DateTime<Utc>) {
        if outcome.lease_lost {
            return;
        }
        let decay = self.config.ema_decay;
        let mut inner = self.lock();

        let host = inner
            .hosts
            .entry(candidate.host.clone())
            .or_insert_with(HostStats::new);
        let hit = if outcome.verified { 1.0 } else { 0.0 };
        host.success_rate_ema = decay * host.success_rate_ema + (1.0 - decay) * hit;
        if outcome.verified {
            host.success_count += 1;
        }
        if outcome.error_kind.is_some_and(|k| k.is_retriable()) {
            host.throttled_until = Some(now + delta(self.config.retry_backoff()));
        }

        let state = &mut inner.guard;
        if outcome.verified {
            state.classes_seen.insert(candidate.class_key.clone());
        }
        if outcome.saved {
            state.total_saves += 1;
            if candidate.contested {
                state.contested_saves += 1;
            }
            state.last_save_at = Some(now);
        } else if outcome.is_denied() {
            state.total_denials += 1;
        }
    }

    /// Forget a host's attempt count so the cap stops blocking it.
    /// Returns whether the host was known.
    pub fn reset_host_cap(&self, host: &str) -> bool {
        let mut inner = self.lock();
        match inner.hosts.get_mut(host) {
            Some(stats) => {
                info!(host, attempts = stats.attempt_count, "host cap reset");
                stats.attempt_count = 0;
                true
            }
            None => false,
        }
    }

    /// Disable a guard until `now + duration`.
    pub fn relax(&self, guard: GuardName, duration: Duration, now: DateTime<Utc>) {
        let until = now + delta(duration);
        warn!(%guard, %until, "guard relaxed by operator");
        self.lock().relaxations.insert(guard, until);
    }

    /// Operator relaxations still in force; expired ones are dropped.
    pub fn active_relaxations(&self, now: DateTime<Utc>) -> BTreeSet<GuardName> {
        let mut inner = self.lock();
        inner.relaxations.retain(|guard, until| {
            let live = now < *until;
            if !live {
                info!(%guard, "guard relaxation expired");
            }
            live
        });
        inner.relaxations.keys().copied().collect()
    }

    /// Hosts on retry backoff.
    pub fn cooled_down_hosts(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .lock()
            .hosts
            .iter()
            .filter(|(_, s)| s.throttled_until.is_some_and(|until| now < until))
            .map(|(h, _)| h.clone())
            .collect();
        hosts.sort();
        hosts
    }

    pub fn note_reseed(&self, attempt: u32) {
        self.lock().guard.reseed_attempt_count = attempt;
    }
}
