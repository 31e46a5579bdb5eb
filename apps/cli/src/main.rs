//! refscout CLI: discover, schedule and process citation candidates.
//!
//! Seeds the frontier from origin documents, runs the scheduler/worker
//! loop against the local store and exposes the operator sweeps.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
