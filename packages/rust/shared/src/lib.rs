//! Shared types, error model, and configuration for refscout.
//!
//! This crate is the foundation depended on by all other refscout crates.
//! It provides:
//! - [`RefScoutError`]: the unified error type
//! - Domain types ([`Candidate`], [`OriginDocument`], [`ErrorKind`], lifecycle states)
//! - URL normalization ([`normalize_url`], [`class_key`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod normalize;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ClassCooldownConfig, ContestedConfig, DiscoveryConfig, GuardConfig, MonitorConfig, PipelineConfig,
    SchedulerConfig, ScorerConfig, SeedEntry, StorageConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{RefScoutError, Result};
pub use normalize::{NormalizedUrl, class_key, normalize_url};
pub use types::{
    Candidate, CandidateId, CandidateUpdate, DiscoveredLink, ErrorKind, OriginDocument,
    RelevanceDecision, ScanStatus, VerificationStatus,
};
