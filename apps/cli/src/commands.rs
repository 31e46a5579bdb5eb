//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use refscout_core::{
    Collaborators, Engine, GuardName, HealthSignal, PassReport, ProcessingOutcome, RunLoopOptions, RunObserver,
    SeedReport, TickOutcome, store_stats,
};
use refscout_shared::{AppConfig, Candidate, init_config, load_config, load_config_from};
use refscout_storage::Storage;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// refscout: find, vet and store the sources an article cites.
#[derive(Parser)]
#[command(
    name = "refscout",
    version,
    about = "Discover citation links, schedule them fairly across hosts and store the relevant ones.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.refscout/refscout.toml).
    #[arg(long, env = "REFSCOUT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Register origin documents and enqueue their citation links.
    Seed {
        /// Origin document URLs. Defaults to the configured `[[seeds]]`.
        urls: Vec<String>,

        /// Flag the given documents' links as contested.
        #[arg(long)]
        contested: bool,
    },

    /// Run the scheduler and workers until interrupted.
    Run {
        /// Disable a guard for a while, e.g. `class_cooldown=600`.
        #[arg(long = "relax-guard", value_name = "NAME=SECS", value_parser = parse_relaxation)]
        relax_guard: Vec<(GuardName, Duration)>,

        /// Clear a host's attempt count before starting.
        #[arg(long = "reset-host", value_name = "HOST")]
        reset_host: Vec<String>,

        /// Seed the configured origin documents first.
        #[arg(long)]
        seed: bool,

        /// Exit once the frontier is drained and reseeding finds nothing new.
        #[arg(long)]
        until_idle: bool,

        /// Stop after this many scheduling ticks.
        #[arg(long)]
        max_ticks: Option<usize>,
    },

    /// Run a single scheduling tick inline and print what happened.
    Once,

    /// Show frontier, denial and content counts.
    Stats {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Re-admit relevance denials that scored at least MIN_SCORE.
    ReprocessDenied {
        #[arg(long)]
        min_score: f64,
    },

    /// Return expired leases to the frontier.
    Reclaim,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Parse `NAME=SECS` for `--relax-guard`.
fn parse_relaxation(raw: &str) -> std::result::Result<(GuardName, Duration), String> {
    let (name, secs) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=SECS, got '{raw}'"))?;
    let guard: GuardName = name.parse().map_err(|e| format!("{e}"))?;
    let secs: u64 = secs
        .trim()
        .parse()
        .map_err(|e| format!("invalid duration '{secs}': {e}"))?;
    Ok((guard, Duration::from_secs(secs)))
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "refscout=info",
        1 => "refscout=debug",
        _ => "refscout=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Seed { urls, contested } => {
            cmd_seed(&open_engine(config_path).await?, &urls, contested).await
        }
        Command::Run {
            relax_guard,
            reset_host,
            seed,
            until_idle,
            max_ticks,
        } => {
            let engine = Arc::new(open_engine(config_path).await?);
            let options = RunLoopOptions {
                stop_when_idle: until_idle,
                max_ticks,
            };
            cmd_run(&engine, &relax_guard, &reset_host, seed, options).await
        }
        Command::Once => cmd_once(&open_engine(config_path).await?).await,
        Command::Stats { json } => cmd_stats(&resolve_config(config_path)?, json).await,
        Command::ReprocessDenied { min_score } => {
            cmd_reprocess(&open_engine(config_path).await?, min_score).await
        }
        Command::Reclaim => cmd_reclaim(&open_engine(config_path).await?).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

async fn open_engine(config_path: Option<&Path>) -> Result<Engine> {
    let config = resolve_config(config_path)?;
    let db_path = config.storage.resolve_db_path()?;
    let storage = Arc::new(Storage::open(&db_path).await?);
    info!(db = %db_path.display(), "store opened");
    let collaborators = Collaborators::from_config(&config, Arc::clone(&storage))?;
    Ok(Engine::new(config, storage, collaborators)?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_seed(engine: &Engine, urls: &[String], contested: bool) -> Result<()> {
    let report = if urls.is_empty() {
        if engine.config().seeds.is_empty() {
            return Err(eyre!("no URLs given and no [[seeds]] configured"));
        }
        engine.seed_configured().await?
    } else {
        let mut total = SeedReport::default();
        for url in urls {
            total.merge(engine.seed(url, contested).await?);
        }
        total
    };

    println!();
    println!("  Documents:  {}", report.documents);
    println!("  Links:      {}", report.links);
    println!("  New:        {}", report.inserted);
    println!("  Known:      {}", report.duplicates);
    println!("  Skipped:    {}", report.skipped);
    if report.failed_documents > 0 {
        println!("  Unreadable: {}", report.failed_documents);
    }
    println!();
    Ok(())
}

async fn cmd_run(
    engine: &Arc<Engine>,
    relaxations: &[(GuardName, Duration)],
    reset_hosts: &[String],
    seed: bool,
    options: RunLoopOptions,
) -> Result<()> {
    for (guard, duration) in relaxations {
        engine.relax_guard(*guard, *duration);
    }
    for host in reset_hosts {
        if !engine.reset_host_cap(host) {
            warn!(host = %host, "no attempts recorded for host yet");
        }
    }
    if seed {
        let report = engine.seed_configured().await?;
        info!(inserted = report.inserted, duplicates = report.duplicates, "configured seeds enqueued");
    }

    let observer = CliProgress::new();
    let summary = engine.run_loop(options, ctrl_c(), &observer).await?;
    observer.finish();

    println!();
    if summary.interrupted {
        println!("  Run interrupted.");
    } else {
        println!("  Run finished.");
    }
    println!("  Dispatched: {}", summary.dispatched);
    println!("  Saved:      {}", summary.saved);
    println!("  Denied:     {}", summary.denied);
    println!("  Requeued:   {}", summary.requeued);
    println!("  Stalls:     {}", summary.stalls);
    println!("  Reseeds:    {}", summary.reseeds);
    if summary.errors > 0 {
        println!("  Errors:     {}", summary.errors);
    }
    println!("  Time:       {}s", summary.elapsed_secs);
    println!();
    Ok(())
}

/// Resolves on the first Ctrl-C.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, finishing in-flight work");
}

async fn cmd_once(engine: &Engine) -> Result<()> {
    let tick = engine.run_once().await?;
    match &tick {
        TickOutcome::Processed(outcome) => info!(
            candidate_id = %outcome.candidate_id,
            saved = outcome.saved,
            "candidate processed"
        ),
        TickOutcome::Stalled(report) => info!(considered = report.considered, "pass stalled"),
        TickOutcome::Reseeded(report) => info!(inserted = report.inserted, "frontier reseeded"),
        TickOutcome::Idle => info!("nothing to do"),
    }
    println!("{}", serde_json::to_string_pretty(&tick)?);
    Ok(())
}

async fn cmd_stats(config: &AppConfig, json: bool) -> Result<()> {
    let db_path = config.storage.resolve_db_path()?;
    let storage = Storage::open_readonly(&db_path).await?;
    let stats = store_stats(&storage).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let f = &stats.frontier;
    println!();
    println!("  Origin documents: {}", stats.origin_documents);
    println!("  Not scanned:      {}", f.not_scanned);
    println!("  Verifying:        {}", f.verifying);
    println!("  Scanning:         {}", f.scanning);
    println!("  Saved:            {}", f.saved);
    println!("  Denied:           {}", f.denied);
    println!("  Content records:  {}", stats.content_records);
    if !stats.denial_reasons.is_empty() {
        println!();
        println!("  Denials by reason:");
        for (reason, count) in &stats.denial_reasons {
            println!("    {reason:<20} {count}");
        }
    }
    println!();
    Ok(())
}

async fn cmd_reprocess(engine: &Engine, min_score: f64) -> Result<()> {
    let readmitted = engine.reprocess_denied(min_score).await?;
    println!("Re-admitted {readmitted} denied candidate(s) scored at least {min_score}.");
    Ok(())
}

async fn cmd_reclaim(engine: &Engine) -> Result<()> {
    let report = engine.reclaim_stale_leases().await?;
    println!(
        "Requeued {} expired lease(s); {} exhausted their attempts.",
        report.requeued, report.exhausted
    );
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
    saved: AtomicU64,
    denied: AtomicU64,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} [{elapsed}] {msg}")
            .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self {
            spinner,
            saved: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        }
    }

    fn tally(&self) -> String {
        format!(
            "saved {} / denied {}",
            self.saved.load(Ordering::Relaxed),
            self.denied.load(Ordering::Relaxed)
        )
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl RunObserver for CliProgress {
    fn dispatched(&self, candidate: &Candidate, relaxed: &[GuardName]) {
        let note = if relaxed.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = relaxed.iter().map(|g| g.as_str()).collect();
            format!(" ({} relaxed)", names.join(", "))
        };
        self.spinner
            .set_message(format!("[{}] {}{note}", self.tally(), candidate.url));
    }

    fn finished(&self, outcome: &ProcessingOutcome) {
        if outcome.saved {
            self.saved.fetch_add(1, Ordering::Relaxed);
        } else if outcome.is_denied() {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn stalled(&self, report: &PassReport) {
        let blocker = report
            .blocked
            .iter()
            .max_by_key(|(_, n)| **n)
            .map(|(g, _)| g.as_str())
            .unwrap_or("nothing eligible");
        self.spinner
            .set_message(format!("[{}] waiting on {blocker}", self.tally()));
    }

    fn reseeded(&self, report: &SeedReport) {
        self.spinner.set_message(format!(
            "[{}] reseeded: {} new link(s)",
            self.tally(),
            report.inserted
        ));
    }

    fn health(&self, signal: &HealthSignal) {
        self.spinner.println(format!("  warning: {signal}"));
    }
}
