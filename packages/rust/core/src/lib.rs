//! Scheduling and processing for refscout.
//!
//! This crate decides which frontier candidate is fetched next (the guard
//! bank and [`scheduler::Scheduler`]), runs admitted candidates through
//! verify → extract → score → persist ([`pipeline::Pipeline`]) and watches
//! for stalls ([`monitor::StallMonitor`]). [`engine::Engine`] wires it all
//! to a store and the external collaborators.

pub mod clock;
pub mod engine;
pub mod guards;
pub mod ledger;
pub mod monitor;
pub mod notify;
pub mod pipeline;
pub mod scheduler;
pub mod scorer;

#[cfg(test)]
mod testing;

pub use engine::{
    Collaborators, Engine, EngineStats, RunLoopOptions, RunObserver, RunSummary, SeedReport, SilentObserver,
    TickOutcome, store_stats,
};
pub use guards::{GuardName, PassReport};
pub use monitor::HealthSignal;
pub use pipeline::ProcessingOutcome;
pub use scheduler::PullOutcome;
