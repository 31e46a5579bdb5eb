//! Origin document link discovery.
//!
//! An origin document is a Wikipedia-style article whose numbered references
//! feed the candidate frontier. [`OriginSource`] is the seam the engine
//! consumes; [`WikiSource`] is the HTTP implementation.

mod parser;

use async_trait::async_trait;
use refscout_shared::{DiscoveredLink, DiscoveryConfig, OriginDocument, RefScoutError, Result};
use reqwest::Client;
use tracing::{debug, info, instrument};

pub use parser::ParsedCitations;

/// Maximum number of redirects to follow when fetching an origin document.
const MAX_REDIRECTS: usize = 5;

/// Maximum response size we consider valid (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("refscout/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// OriginSource
// ---------------------------------------------------------------------------

/// Supplies the raw links listed by an origin document.
#[async_trait]
pub trait OriginSource: Send + Sync {
    /// List `{url, ordinal}` pairs found on the document. URLs may be
    /// relative; callers normalize them against the document URL.
    async fn list_links(&self, doc: &OriginDocument) -> Result<Vec<DiscoveredLink>>;
}

// ---------------------------------------------------------------------------
// Discovery options
// ---------------------------------------------------------------------------

/// Configuration for the discovery process.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
    /// Report same-site article links alongside citations.
    pub include_internal: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        DiscoveryOptions::from(&DiscoveryConfig::default())
    }
}

impl From<&DiscoveryConfig> for DiscoveryOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            timeout_secs: config.timeout_secs,
            include_internal: config.include_internal_links,
        }
    }
}

// ---------------------------------------------------------------------------
// WikiSource
// ---------------------------------------------------------------------------

/// Fetches origin documents over HTTP and parses their reference lists.
pub struct WikiSource {
    client: Client,
    opts: DiscoveryOptions,
}

impl WikiSource {
    pub fn new(opts: DiscoveryOptions) -> Result<Self> {
        Ok(Self {
            client: build_client(&opts)?,
            opts,
        })
    }

    /// Fetch and parse one origin document.
    #[instrument(skip_all, fields(url = %doc.url))]
    pub async fn discover(&self, doc: &OriginDocument) -> Result<ParsedCitations> {
        let html = fetch_document(&self.client, &doc.url).await?;
        let parsed = parser::parse_citations(&html, self.opts.include_internal);

        info!(
            title = parsed.title.as_deref().unwrap_or(""),
            citations = parsed.citation_count(),
            links = parsed.links.len(),
            "origin document parsed"
        );
        Ok(parsed)
    }
}

#[async_trait]
impl OriginSource for WikiSource {
    async fn list_links(&self, doc: &OriginDocument) -> Result<Vec<DiscoveredLink>> {
        Ok(self.discover(doc).await?.links)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a reqwest client with appropriate settings.
fn build_client(opts: &DiscoveryOptions) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(std::time::Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| RefScoutError::Network(format!("failed to build HTTP client: {e}")))
}

/// Fetch an origin document's HTML.
async fn fetch_document(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| RefScoutError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(RefScoutError::Network(format!("{url}: HTTP {status}")));
    }

    // Check content-length if available
    if let Some(len) = response.content_length() {
        if len > MAX_RESPONSE_SIZE {
            return Err(RefScoutError::validation(format!(
                "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
            )));
        }
    }

    let body = response
        .text()
        .await
        .map_err(|e| RefScoutError::Network(format!("{url}: failed to read body: {e}")))?;

    debug!(bytes = body.len(), "origin document fetched");
    Ok(body)
}
