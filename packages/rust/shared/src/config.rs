//! Application configuration for refscout.
//!
//! User config lives at `~/.refscout/refscout.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RefScoutError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "refscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".refscout";

/// Default database file name inside the config directory.
const DB_FILE_NAME: &str = "refscout.db";

// ---------------------------------------------------------------------------
// Config structs (matching refscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Frontier selection and stall handling.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Admission guard thresholds.
    #[serde(default)]
    pub guards: GuardConfig,

    /// Origin document link extraction.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Verify/extract/score/persist settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Stall and throughput monitoring.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// External relevance scorer.
    #[serde(default)]
    pub scorer: ScorerConfig,

    /// Database location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Registered origin documents.
    #[serde(default)]
    pub seeds: Vec<SeedEntry>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ranked candidates examined per pull.
    #[serde(default = "default_max_tries")]
    pub max_tries: usize,

    /// Consecutive zero-admission passes before the escape valve may fire.
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: u32,

    /// Minimum run uptime before the escape valve may fire.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Attempts allowed before a retriable failure becomes permanent.
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_candidate: u32,

    /// Concurrent pipeline workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Leases older than this are reclaimed to the frontier. Must cover the
    /// slowest healthy run, see [`AppConfig::worst_case_run`].
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,

    /// Ranking priority for candidates that were never scored.
    #[serde(default = "default_priority")]
    pub default_priority: f64,

    /// Sleep between passes when nothing is admissible.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// The store returns `max_tries * rank_window` rows before health re-ranking.
    #[serde(default = "default_rank_window")]
    pub rank_window: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_tries: default_max_tries(),
            stall_threshold: default_stall_threshold(),
            grace_period_secs: default_grace_period_secs(),
            max_attempts_per_candidate: default_max_attempts(),
            workers: default_workers(),
            lease_timeout_secs: default_lease_timeout_secs(),
            default_priority: default_priority(),
            idle_backoff_ms: default_idle_backoff_ms(),
            rank_window: default_rank_window(),
        }
    }
}

impl SchedulerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

fn default_max_tries() -> usize {
    12
}
fn default_stall_threshold() -> u32 {
    2
}
fn default_grace_period_secs() -> u64 {
    120
}
fn default_max_attempts() -> u32 {
    3
}
fn default_workers() -> usize {
    4
}
fn default_lease_timeout_secs() -> u64 {
    180
}
fn default_priority() -> f64 {
    50.0
}
fn default_idle_backoff_ms() -> u64 {
    1000
}
fn default_rank_window() -> usize {
    4
}

/// `[guards]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Distinct classes that must succeed before a class may repeat.
    #[serde(default = "default_min_distinct_classes")]
    pub min_distinct_classes: usize,

    /// Attempts allowed per host until an explicit reset.
    #[serde(default = "default_host_cap")]
    pub host_cap: u32,

    /// Temporary block for a class of hosts (wiki mirrors by default).
    #[serde(default)]
    pub class_cooldown: ClassCooldownConfig,

    /// Success-rate EMA below which a host's priority is penalized.
    #[serde(default = "default_health_floor")]
    pub health_floor: f64,

    /// Priority multiplier for unhealthy hosts.
    #[serde(default = "default_health_penalty")]
    pub health_penalty: f64,

    /// Weight of history in the success-rate EMA.
    #[serde(default = "default_ema_decay")]
    pub ema_decay: f64,

    /// Contested-topic balance policy.
    #[serde(default)]
    pub contested: ContestedConfig,

    /// Requests per second allowed against a single host.
    #[serde(default = "default_qps_per_host")]
    pub qps_per_host: f64,

    /// Host cooldown after a retriable network failure.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            min_distinct_classes: default_min_distinct_classes(),
            host_cap: default_host_cap(),
            class_cooldown: ClassCooldownConfig::default(),
            health_floor: default_health_floor(),
            health_penalty: default_health_penalty(),
            ema_decay: default_ema_decay(),
            contested: ContestedConfig::default(),
            qps_per_host: default_qps_per_host(),
            retry_backoff_secs: default_retry_backoff_secs(),
        }
    }
}

impl GuardConfig {
    /// Minimum spacing between two attempts on the same host.
    pub fn host_spacing(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.qps_per_host)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

fn default_min_distinct_classes() -> usize {
    3
}
fn default_host_cap() -> u32 {
    40
}
fn default_health_floor() -> f64 {
    0.45
}
fn default_health_penalty() -> f64 {
    0.5
}
fn default_ema_decay() -> f64 {
    0.8
}
fn default_qps_per_host() -> f64 {
    0.5
}
fn default_retry_backoff_secs() -> u64 {
    30
}

/// `[guards.class_cooldown]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassCooldownConfig {
    /// Host suffixes that belong to the guarded class.
    #[serde(default = "default_class_hosts")]
    pub host_patterns: Vec<String>,

    /// Share of trailing-window attempts that triggers the cooldown.
    #[serde(default = "default_max_share")]
    pub max_share: f64,

    /// Trailing window over which the share is measured.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// How long the class stays blocked once triggered.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Attempts required in the window before the share is trusted.
    #[serde(default = "default_min_window_attempts")]
    pub min_window_attempts: usize,
}

impl Default for ClassCooldownConfig {
    fn default() -> Self {
        Self {
            host_patterns: default_class_hosts(),
            max_share: default_max_share(),
            window_secs: default_window_secs(),
            cooldown_secs: default_cooldown_secs(),
            min_window_attempts: default_min_window_attempts(),
        }
    }
}

impl ClassCooldownConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

fn default_class_hosts() -> Vec<String> {
    [
        "wikipedia.org",
        "wikimedia.org",
        "wikidata.org",
        "wikisource.org",
        "wiktionary.org",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_share() -> f64 {
    0.30
}
fn default_window_secs() -> u64 {
    30
}
fn default_cooldown_secs() -> u64 {
    120
}
fn default_min_window_attempts() -> usize {
    3
}

/// `[guards.contested]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestedConfig {
    /// Whether the balance policy is active.
    #[serde(default)]
    pub enabled: bool,

    /// URL substrings that mark a candidate as contested.
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Target share of attempts on contested candidates.
    #[serde(default = "default_min_attempt_ratio")]
    pub min_attempt_ratio: f64,

    /// Target share of saves on contested candidates.
    #[serde(default = "default_min_save_ratio")]
    pub min_save_ratio: f64,

    /// Attempts observed before the ratios are enforced.
    #[serde(default = "default_min_sample")]
    pub min_sample: u64,
}

impl Default for ContestedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            keywords: Vec::new(),
            min_attempt_ratio: default_min_attempt_ratio(),
            min_save_ratio: default_min_save_ratio(),
            min_sample: default_min_sample(),
        }
    }
}

fn default_min_attempt_ratio() -> f64 {
    0.5
}
fn default_min_save_ratio() -> f64 {
    0.4
}
fn default_min_sample() -> u64 {
    5
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Also enqueue same-site article links (ordinal 0), not only citations.
    #[serde(default = "default_include_internal")]
    pub include_internal_links: bool,

    /// Timeout for fetching an origin document.
    #[serde(default = "default_discovery_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include_internal_links: default_include_internal(),
            timeout_secs: default_discovery_timeout_secs(),
        }
    }
}

fn default_include_internal() -> bool {
    true
}
fn default_discovery_timeout_secs() -> u64 {
    15
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Extracted text shorter than this is denied before scoring.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,

    /// Scores at or above this are accepted regardless of the scorer's flag.
    #[serde(default = "default_high_confidence")]
    pub high_confidence_threshold: f64,

    /// Scores at or above this are accepted when the scorer's flag agrees.
    #[serde(default = "default_min_threshold")]
    pub min_threshold: f64,

    /// Per-request network timeout.
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,

    /// Bodies larger than this are rejected.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,

    /// Regexes matched against the URL to flag catalog/search/metadata pages.
    #[serde(default = "default_non_article_patterns")]
    pub non_article_url_patterns: Vec<String>,

    /// Pages with fewer paragraphs are checked against the DOM-shape heuristics.
    #[serde(default = "default_min_paragraphs")]
    pub min_paragraphs: usize,

    /// Permit private/loopback targets (local test servers only).
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_text_chars: default_min_text_chars(),
            high_confidence_threshold: default_high_confidence(),
            min_threshold: default_min_threshold(),
            network_timeout_secs: default_network_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
            non_article_url_patterns: default_non_article_patterns(),
            min_paragraphs: default_min_paragraphs(),
            allow_private_hosts: false,
        }
    }
}

impl PipelineConfig {
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }
}

fn default_min_text_chars() -> usize {
    500
}
fn default_high_confidence() -> f64 {
    70.0
}
fn default_min_threshold() -> f64 {
    50.0
}
fn default_network_timeout_secs() -> u64 {
    30
}
fn default_max_body_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_non_article_patterns() -> Vec<String> {
    [
        r"[?&](q|query|search|s)=",
        r"/search(/|$|\?)",
        r"/catalog(ue)?(/|$)",
        r"/(tag|tags|category|categories)/",
        r"(^|[/.])worldcat\.org/",
        r"(^|[/.])books\.google\.[a-z.]+/",
        r"/isbn/",
        r"(^|[/.])id\.loc\.gov/",
        r"(^|[/.])viaf\.org/",
        r"/(login|signin|register)(/|$|\?)",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_min_paragraphs() -> usize {
    2
}

/// `[monitor]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Reseeds from origin documents before giving up on manufacturing work.
    #[serde(default = "default_max_reseed_attempts")]
    pub max_reseed_attempts: u32,

    /// Runtime before a zero-save run is reported.
    #[serde(default = "default_zero_save_min_runtime_secs")]
    pub zero_save_min_runtime_secs: u64,

    /// Attempts before a zero-save run is reported.
    #[serde(default = "default_zero_save_min_attempts")]
    pub zero_save_min_attempts: u64,

    /// A run that saved before but not within this window is reported.
    #[serde(default = "default_save_window_secs")]
    pub save_window_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_reseed_attempts: default_max_reseed_attempts(),
            zero_save_min_runtime_secs: default_zero_save_min_runtime_secs(),
            zero_save_min_attempts: default_zero_save_min_attempts(),
            save_window_secs: default_save_window_secs(),
        }
    }
}

impl MonitorConfig {
    pub fn zero_save_min_runtime(&self) -> Duration {
        Duration::from_secs(self.zero_save_min_runtime_secs)
    }

    pub fn save_window(&self) -> Duration {
        Duration::from_secs(self.save_window_secs)
    }
}

fn default_max_reseed_attempts() -> u32 {
    10
}
fn default_zero_save_min_runtime_secs() -> u64 {
    120
}
fn default_zero_save_min_attempts() -> u64 {
    40
}
fn default_save_window_secs() -> u64 {
    600
}

/// `[scorer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// Scorer bridge command (e.g., "bun").
    #[serde(default = "default_bridge_cmd")]
    pub bridge_cmd: String,

    /// Arguments passed to the bridge command.
    #[serde(default = "default_bridge_args")]
    pub bridge_args: Vec<String>,

    /// Working directory for the bridge subprocess.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model the bridge should score with.
    #[serde(default = "default_model")]
    pub model: String,

    /// Text sent to the scorer is truncated to this many characters.
    #[serde(default = "default_scorer_max_chars")]
    pub max_chars: usize,

    /// How long to wait for a single verdict.
    #[serde(default = "default_scorer_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            bridge_cmd: default_bridge_cmd(),
            bridge_args: default_bridge_args(),
            working_dir: default_working_dir(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            max_chars: default_scorer_max_chars(),
            timeout_secs: default_scorer_timeout_secs(),
        }
    }
}

impl ScorerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_bridge_cmd() -> String {
    "bun".into()
}
fn default_bridge_args() -> Vec<String> {
    vec!["run".into(), "scorer/bridge.ts".into()]
}
fn default_working_dir() -> String {
    ".".into()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_scorer_max_chars() -> usize {
    12_000
}
fn default_scorer_timeout_secs() -> u64 {
    60
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database path; defaults to `~/.refscout/refscout.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

impl StorageConfig {
    /// Resolve the database path.
    pub fn resolve_db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(p) => Ok(PathBuf::from(p)),
            None => Ok(config_dir()?.join(DB_FILE_NAME)),
        }
    }
}

/// `[[seeds]]` entry: an origin document to extract citations from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedEntry {
    /// Page URL.
    pub url: String,
    /// Treat everything discovered here as contested-topic content.
    #[serde(default)]
    pub contested: bool,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Reject threshold combinations the scheduler cannot honor.
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.high_confidence_threshold <= p.min_threshold {
            return Err(RefScoutError::config(format!(
                "pipeline.high_confidence_threshold ({}) must exceed pipeline.min_threshold ({})",
                p.high_confidence_threshold, p.min_threshold
            )));
        }
        let g = &self.guards;
        if !(g.qps_per_host > 0.0) {
            return Err(RefScoutError::config("guards.qps_per_host must be positive"));
        }
        if !(g.ema_decay > 0.0 && g.ema_decay < 1.0) {
            return Err(RefScoutError::config("guards.ema_decay must be in (0, 1)"));
        }
        if !(g.class_cooldown.max_share > 0.0 && g.class_cooldown.max_share <= 1.0) {
            return Err(RefScoutError::config(
                "guards.class_cooldown.max_share must be in (0, 1]",
            ));
        }
        if !(g.health_penalty > 0.0 && g.health_penalty <= 1.0) {
            return Err(RefScoutError::config("guards.health_penalty must be in (0, 1]"));
        }
        let s = &self.scheduler;
        if s.max_tries == 0 || s.workers == 0 || s.max_attempts_per_candidate == 0 {
            return Err(RefScoutError::config(
                "scheduler.max_tries, scheduler.workers and scheduler.max_attempts_per_candidate must be at least 1",
            ));
        }
        let worst_case = self.worst_case_run();
        if s.lease_timeout() < worst_case {
            return Err(RefScoutError::config(format!(
                "scheduler.lease_timeout_secs ({}) is shorter than a worker's worst case of {}s \
                 (3 x pipeline.network_timeout_secs + scorer.timeout_secs)",
                s.lease_timeout_secs,
                worst_case.as_secs()
            )));
        }
        Ok(())
    }

    /// Longest a healthy pipeline run can take: HEAD, the GET fallback and
    /// the full fetch each up to the network timeout, then the scorer.
    pub fn worst_case_run(&self) -> Duration {
        self.pipeline.network_timeout() * 3 + self.scorer.timeout()
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.refscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RefScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.refscout/refscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RefScoutError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        RefScoutError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RefScoutError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RefScoutError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RefScoutError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the scorer's API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.scorer.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(RefScoutError::config(format!(
            "scorer API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_tries"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.scheduler.max_tries, 12);
        assert_eq!(parsed.guards.host_cap, 40);
        assert_eq!(parsed.guards.class_cooldown.cooldown_secs, 120);
        assert_eq!(parsed.pipeline.min_text_chars, 500);
        assert_eq!(parsed.monitor.max_reseed_attempts, 10);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.guards.min_distinct_classes, 3);
        assert_eq!(config.guards.host_spacing(), Duration::from_secs(2));
        assert_eq!(config.guards.contested.min_sample, 5);
        assert_eq!(config.pipeline.high_confidence_threshold, 70.0);
        assert_eq!(config.pipeline.min_threshold, 50.0);
        assert_eq!(config.scheduler.grace_period(), Duration::from_secs(120));
        assert_eq!(config.worst_case_run(), Duration::from_secs(150));
        assert!(config.scheduler.lease_timeout() >= config.worst_case_run());
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn lease_shorter_than_worst_case_run_rejected() {
        let mut config = AppConfig::default();
        config.scheduler.lease_timeout_secs = 90;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lease_timeout_secs"), "{err}");

        // A faster network budget brings the same lease back in range.
        config.pipeline.network_timeout_secs = 10;
        config.validate().expect("90s lease covers 3 x 10s + 60s");
    }

    #[test]
    fn config_with_seeds_and_partial_sections() {
        let toml_str = r#"
[guards]
host_cap = 10

[guards.contested]
enabled = true
keywords = ["climate"]

[[seeds]]
url = "https://en.wikipedia.org/wiki/Climate_change"
contested = true
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.guards.host_cap, 10);
        assert_eq!(config.guards.qps_per_host, 0.5);
        assert!(config.guards.contested.enabled);
        assert_eq!(config.seeds.len(), 1);
        assert!(config.seeds[0].contested);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.high_confidence_threshold = 40.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must exceed"));
    }

    #[test]
    fn zero_qps_rejected() {
        let mut config = AppConfig::default();
        config.guards.qps_per_host = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        config.scorer.api_key_env = "REFSCOUT_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
