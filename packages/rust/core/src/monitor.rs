//! Stall and throughput monitoring.
//!
//! Three mechanisms keep the engine live:
//! - the escape valve, once the scheduler has stalled long enough, names the
//!   soft guard that blocked the largest share of the stalled pass (the
//!   earliest in evaluation order on a tie). The scheduler lifts it and keeps
//!   lifting whichever soft guard blocks the retry next, until a candidate
//!   is admitted or no soft guard is left blocking;
//! - the reseed circuit breaker bounds how often an empty frontier triggers
//!   re-extraction from origin documents;
//! - the zero-save watchdog warns when nothing is being persisted.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, TimeDelta, Utc};
use refscout_shared::{MonitorConfig, SchedulerConfig};
use serde::Serialize;
use tracing::warn;

use crate::clock::delta;
use crate::guards::{GuardName, PassReport};
use crate::ledger::GuardState;

/// What to do about an empty frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReseedDecision {
    Reseed { attempt: u32 },
    /// The reseed budget is spent; keep running without new work.
    Exhausted,
}

/// Throughput warnings raised to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum HealthSignal {
    /// No save at all after the minimum runtime and attempt count.
    ZeroSave { attempts: u64, runtime_secs: i64 },
    /// Saves happened once but not within the save window.
    SaveDrought { last_save_at: DateTime<Utc>, idle_secs: i64 },
}

impl fmt::Display for HealthSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSave { attempts, runtime_secs } => {
                write!(f, "nothing saved after {attempts} attempts in {runtime_secs}s")
            }
            Self::SaveDrought { idle_secs, .. } => write!(f, "no save in the last {idle_secs}s"),
        }
    }
}

/// Monitor counters for the stats snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorSnapshot {
    pub consecutive_stalls: u32,
    pub escapes: u64,
    pub reseed_attempts: u32,
    pub uptime_secs: i64,
}

#[derive(Debug, Default)]
struct MonitorState {
    consecutive_stalls: u32,
    escapes: u64,
    reseed_attempts: u32,
    reseed_exhausted_logged: bool,
    zero_save_warned: bool,
    drought_warned_for: Option<DateTime<Utc>>,
}

/// Detects zero-throughput conditions and decides recovery actions.
#[derive(Debug)]
pub struct StallMonitor {
    config: MonitorConfig,
    stall_threshold: u32,
    grace_period: TimeDelta,
    started_at: DateTime<Utc>,
    state: Mutex<MonitorState>,
}

impl StallMonitor {
    pub fn new(config: &MonitorConfig, scheduler: &SchedulerConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            config: config.clone(),
            stall_threshold: scheduler.stall_threshold.max(1),
            grace_period: delta(scheduler.grace_period()),
            started_at,
            state: Mutex::new(MonitorState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.started_at
    }

    /// A pass admitted a candidate.
    pub fn record_admission(&self) {
        self.lock().consecutive_stalls = 0;
    }

    /// A full pass admitted nothing. Once the stall threshold and grace
    /// period are both met, returns the first guard the escape should lift.
    pub fn record_stall(&self, report: &PassReport, now: DateTime<Utc>) -> Option<GuardName> {
        let mut state = self.lock();
        state.consecutive_stalls += 1;
        if state.consecutive_stalls < self.stall_threshold || self.uptime(now) < self.grace_period {
            return None;
        }
        let guard = report.most_restrictive_soft()?;
        state.consecutive_stalls = 0;
        state.escapes += 1;
        warn!(
            %guard,
            pressure = report.pressure(guard),
            considered = report.considered,
            "scheduler stalled, starting escape"
        );
        Some(guard)
    }

    /// The frontier ran dry.
    pub fn note_frontier_empty(&self) -> ReseedDecision {
        let mut state = self.lock();
        if state.reseed_attempts < self.config.max_reseed_attempts {
            state.reseed_attempts += 1;
            return ReseedDecision::Reseed {
                attempt: state.reseed_attempts,
            };
        }
        if !state.reseed_exhausted_logged {
            state.reseed_exhausted_logged = true;
            warn!(
                attempts = state.reseed_attempts,
                "reseed attempts exhausted, no new work will be discovered"
            );
        }
        ReseedDecision::Exhausted
    }

    /// Raise a throughput warning, once per condition.
    pub fn check_health(&self, guard: &GuardState, now: DateTime<Utc>) -> Option<HealthSignal> {
        let runtime = self.uptime(now);
        if runtime < delta(self.config.zero_save_min_runtime()) {
            return None;
        }
        let mut state = self.lock();

        match guard.last_save_at {
            None if guard.total_attempts >= self.config.zero_save_min_attempts => {
                if state.zero_save_warned {
                    return None;
                }
                state.zero_save_warned = true;
                warn!(
                    attempts = guard.total_attempts,
                    runtime_secs = runtime.num_seconds(),
                    "no content saved yet"
                );
                Some(HealthSignal::ZeroSave {
                    attempts: guard.total_attempts,
                    runtime_secs: runtime.num_seconds(),
                })
            }
            Some(last) if now - last > delta(self.config.save_window()) => {
                if state.drought_warned_for == Some(last) {
                    return None;
                }
                state.drought_warned_for = Some(last);
                let idle = (now - last).num_seconds();
                warn!(%last, idle_secs = idle, "no content saved within the save window");
                Some(HealthSignal::SaveDrought {
                    last_save_at: last,
                    idle_secs: idle,
                })
            }
            _ => None,
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> MonitorSnapshot {
        let state = self.lock();
        MonitorSnapshot {
            consecutive_stalls: state.consecutive_stalls,
            escapes: state.escapes,
            reseed_attempts: state.reseed_attempts,
            uptime_secs: self.uptime(now).num_seconds(),
        }
    }
}
