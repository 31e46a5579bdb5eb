//! The Guard Bank: admission-control predicates evaluated in a fixed order.
//!
//! Guards are pure functions of a candidate plus a snapshot of the shared
//! [`GuardState`] and the candidate host's [`HostStats`]. The first guard
//! that refuses blocks the candidate; the candidate itself is never
//! mutated. Order (and therefore which guard gets the blame) is:
//!
//! 1. [`GuardName::TopicCoherence`]
//! 2. [`GuardName::HostCap`]
//! 3. [`GuardName::ClassCooldown`]
//! 4. [`GuardName::HostHealth`] (priority only, never blocks)
//! 5. [`GuardName::CategoryBalance`]
//! 6. [`GuardName::RateThrottle`]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use refscout_shared::{Candidate, GuardConfig, RefScoutError};
use serde::{Deserialize, Serialize};

use crate::clock::delta;
use crate::ledger::{GuardState, HostStats};

// ---------------------------------------------------------------------------
// Guard names
// ---------------------------------------------------------------------------

/// Identifies one guard of the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardName {
    TopicCoherence,
    HostCap,
    ClassCooldown,
    HostHealth,
    CategoryBalance,
    RateThrottle,
}

/// What a guard's verdict depends on, used to reuse a block within one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuardScope {
    /// Same verdict for every candidate of the class.
    Class,
    /// Same verdict for every candidate on the host.
    Host,
    /// Depends on the candidate itself.
    Candidate,
}

impl GuardName {
    /// Evaluation order.
    pub const ALL: [GuardName; 6] = [
        Self::TopicCoherence,
        Self::HostCap,
        Self::ClassCooldown,
        Self::HostHealth,
        Self::CategoryBalance,
        Self::RateThrottle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopicCoherence => "topic_coherence",
            Self::HostCap => "host_cap",
            Self::ClassCooldown => "class_cooldown",
            Self::HostHealth => "host_health",
            Self::CategoryBalance => "category_balance",
            Self::RateThrottle => "rate_throttle",
        }
    }

    /// Fairness targets the escape valve may relax. Politeness limits
    /// (host cap, rate throttle) are never relaxed automatically.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::TopicCoherence | Self::ClassCooldown | Self::CategoryBalance
        )
    }

    pub(crate) fn scope(&self) -> GuardScope {
        match self {
            Self::TopicCoherence => GuardScope::Class,
            Self::HostCap | Self::ClassCooldown | Self::HostHealth | Self::RateThrottle => {
                GuardScope::Host
            }
            Self::CategoryBalance => GuardScope::Candidate,
        }
    }
}

impl fmt::Display for GuardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GuardName {
    type Err = RefScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|g| g.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|g| g.as_str()).collect();
                RefScoutError::validation(format!(
                    "unknown guard '{s}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Guard trait
// ---------------------------------------------------------------------------

/// Everything a guard may look at.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub candidate: &'a Candidate,
    pub state: &'a GuardState,
    /// `None` until the host has been attempted once.
    pub host: Option<&'a HostStats>,
    pub config: &'a GuardConfig,
    pub now: DateTime<Utc>,
}

/// One admission-control policy.
pub trait Guard: Send + Sync {
    fn name(&self) -> GuardName;

    /// Whether the candidate may be attempted now.
    fn allow(&self, ctx: &GuardContext<'_>) -> bool;

    /// Multiplier applied to the candidate's ranking priority.
    fn priority_factor(&self, _ctx: &GuardContext<'_>) -> f64 {
        1.0
    }
}

/// Whether `host` belongs to the class governed by the temporary cooldown.
pub(crate) fn in_cooldown_class(host: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| {
        let p = p.trim_start_matches('.');
        host == p || host.strip_suffix(p).is_some_and(|rest| rest.ends_with('.'))
    })
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// Blocks classes that were already attempted until enough distinct classes
/// have been attempted successfully.
struct TopicCoherence;

impl Guard for TopicCoherence {
    fn name(&self) -> GuardName {
        GuardName::TopicCoherence
    }

    fn allow(&self, ctx: &GuardContext<'_>) -> bool {
        if ctx.state.classes_seen.len() >= ctx.config.min_distinct_classes {
            return true;
        }
        ctx.state
            .class_attempts
            .get(&ctx.candidate.class_key)
            .copied()
            .unwrap_or(0)
            == 0
    }
}

/// Hard per-host attempt budget.
struct HostCap;

impl Guard for HostCap {
    fn name(&self) -> GuardName {
        GuardName::HostCap
    }

    fn allow(&self, ctx: &GuardContext<'_>) -> bool {
        ctx.host
            .is_none_or(|h| h.attempt_count < ctx.config.host_cap)
    }
}

/// Blocks a whole class of hosts while its cooldown is active.
struct ClassCooldown;

impl Guard for ClassCooldown {
    fn name(&self) -> GuardName {
        GuardName::ClassCooldown
    }

    fn allow(&self, ctx: &GuardContext<'_>) -> bool {
        let active = ctx
            .state
            .class_cooldown_until
            .is_some_and(|until| ctx.now < until);
        !(active
            && in_cooldown_class(
                &ctx.candidate.host,
                &ctx.config.class_cooldown.host_patterns,
            ))
    }
}

/// Deprioritizes hosts whose success rate has sunk below the floor.
struct HostHealth;

impl Guard for HostHealth {
    fn name(&self) -> GuardName {
        GuardName::HostHealth
    }

    fn allow(&self, _ctx: &GuardContext<'_>) -> bool {
        true
    }

    fn priority_factor(&self, ctx: &GuardContext<'_>) -> f64 {
        match ctx.host {
            Some(h) if h.attempt_count > 0 && h.success_rate_ema < ctx.config.health_floor => {
                ctx.config.health_penalty
            }
            _ => 1.0,
        }
    }
}

/// Holds back non-contested candidates while the contested share is low.
struct CategoryBalance;

impl Guard for CategoryBalance {
    fn name(&self) -> GuardName {
        GuardName::CategoryBalance
    }

    fn allow(&self, ctx: &GuardContext<'_>) -> bool {
        let policy = &ctx.config.contested;
        if !policy.enabled || ctx.candidate.contested {
            return true;
        }
        if ctx.state.total_attempts < policy.min_sample {
            return true;
        }
        let attempts_ok = ctx
            .state
            .contested_attempt_ratio()
            .is_none_or(|r| r >= policy.min_attempt_ratio);
        let saves_ok = ctx
            .state
            .contested_save_ratio()
            .is_none_or(|r| r >= policy.min_save_ratio);
        attempts_ok && saves_ok
    }
}

/// Minimum spacing between attempts on one host, plus retry backoff.
struct RateThrottle;

impl Guard for RateThrottle {
    fn name(&self) -> GuardName {
        GuardName::RateThrottle
    }

    fn allow(&self, ctx: &GuardContext<'_>) -> bool {
        let Some(host) = ctx.host else {
            return true;
        };
        if host.throttled_until.is_some_and(|until| ctx.now < until) {
            return false;
        }
        host.last_attempt_at
            .is_none_or(|last| ctx.now - last >= delta(ctx.config.host_spacing()))
    }
}

// ---------------------------------------------------------------------------
// Guard bank
// ---------------------------------------------------------------------------

/// Verdict of a full bank evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GuardVerdict {
    Admitted { priority_factor: f64 },
    Blocked(GuardName),
}

/// The ordered set of guards.
pub struct GuardBank {
    guards: Vec<Box<dyn Guard>>,
}

impl Default for GuardBank {
    fn default() -> Self {
        Self::standard()
    }
}

impl GuardBank {
    /// All six guards in evaluation order.
    pub fn standard() -> Self {
        Self {
            guards: vec![
                Box::new(TopicCoherence),
                Box::new(HostCap),
                Box::new(ClassCooldown),
                Box::new(HostHealth),
                Box::new(CategoryBalance),
                Box::new(RateThrottle),
            ],
        }
    }

    pub fn order(&self) -> Vec<GuardName> {
        self.guards.iter().map(|g| g.name()).collect()
    }

    /// Run the guards in order, skipping any in `relaxed`.
    pub fn evaluate(&self, ctx: &GuardContext<'_>, relaxed: &BTreeSet<GuardName>) -> GuardVerdict {
        for guard in &self.guards {
            if relaxed.contains(&guard.name()) {
                continue;
            }
            if !guard.allow(ctx) {
                return GuardVerdict::Blocked(guard.name());
            }
        }
        GuardVerdict::Admitted {
            priority_factor: self.priority_factor(ctx),
        }
    }

    /// Product of every guard's priority adjustment.
    pub fn priority_factor(&self, ctx: &GuardContext<'_>) -> f64 {
        self.guards.iter().map(|g| g.priority_factor(ctx)).product()
    }
}

// ---------------------------------------------------------------------------
// Pass report
// ---------------------------------------------------------------------------

/// What happened during one scheduling pass over the ranked frontier.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassReport {
    /// Candidates looked at, including ones skipped because an earlier
    /// candidate of the same class or host was already blocked.
    pub considered: usize,
    /// Blocks attributed to each guard.
    pub blocked: BTreeMap<GuardName, usize>,
    /// Hosts on retry backoff, excluded before ranking.
    pub cooled_down: u64,
}

impl PassReport {
    pub(crate) fn record_blocked(&mut self, guard: GuardName) {
        self.considered += 1;
        *self.blocked.entry(guard).or_default() += 1;
    }

    /// Fraction of the considered frontier blocked by `guard`.
    pub fn pressure(&self, guard: GuardName) -> f64 {
        if self.considered == 0 {
            return 0.0;
        }
        self.blocked.get(&guard).copied().unwrap_or(0) as f64 / self.considered as f64
    }

    /// The soft guard blocking the largest share of the frontier. Ties go to
    /// the guard evaluated first.
    pub fn most_restrictive_soft(&self) -> Option<GuardName> {
        GuardName::ALL
            .into_iter()
            .filter(|g| g.is_soft())
            .filter(|g| self.blocked.get(g).copied().unwrap_or(0) > 0)
            .fold(None, |best: Option<GuardName>, g| match best {
                Some(b) if self.blocked[&b] >= self.blocked[&g] => Some(b),
                _ => Some(g),
            })
    }
}
