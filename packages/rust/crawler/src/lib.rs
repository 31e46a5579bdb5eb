//! Network fetching, content extraction, and page classification.
//!
//! This crate provides:
//! - [`fetcher`]: the [`Fetcher`] seam and its reqwest implementation, with
//!   transport failures classified into retriable and terminal kinds
//! - [`extract`]: plain text plus structural signal from fetched HTML
//! - [`heuristics`]: the deterministic non-article classifier

pub mod extract;
pub mod fetcher;
pub mod heuristics;

pub use extract::{ExtractedText, content_hash, extract_text};
pub use fetcher::{FetchError, FetchOptions, FetchResponse, Fetcher, HttpFetcher};
pub use heuristics::{PageClassifier, PageVerdict};
