//! Network Fetcher: HEAD-or-GET existence checks and bounded full fetches.
//!
//! Transport failures are classified into [`ErrorKind`]s so the pipeline can
//! decide between requeue and terminal denial without inspecting strings.

use std::error::Error as _;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use refscout_shared::{ErrorKind, PipelineConfig, RefScoutError};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};
use url::Url;

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("refscout/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An HTTP answer, successful or not.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code of the final response.
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    /// Response body; `None` for existence checks.
    pub body: Option<String>,
    /// `Content-Type` header, if sent.
    pub content_type: Option<String>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A request that produced no usable HTTP answer.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

/// Network access consumed by the processing pipeline.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Confirm the URL resolves without downloading its content.
    async fn head_or_get(&self, url: &str) -> Result<FetchResponse, FetchError>;

    /// Download the full document.
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// Options for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub max_body_bytes: u64,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    pub allow_private_hosts: bool,
}

impl From<&PipelineConfig> for FetchOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            timeout: config.network_timeout(),
            max_body_bytes: config.max_body_bytes,
            allow_private_hosts: config.allow_private_hosts,
        }
    }
}

/// reqwest-backed [`Fetcher`].
pub struct HttpFetcher {
    client: Client,
    opts: FetchOptions,
}

impl HttpFetcher {
    /// Create a new fetcher with the given options.
    pub fn new(opts: FetchOptions) -> Result<Self, RefScoutError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(opts.timeout)
            .build()
            .map_err(|e| RefScoutError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, opts })
    }

    fn check_target(&self, url: &str) -> Result<Url, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::new(ErrorKind::MalformedUrl, format!("{url}: {e}")))?;
        if !self.opts.allow_private_hosts && is_ssrf_target(&parsed) {
            return Err(FetchError::new(
                ErrorKind::Blocked,
                format!("{url}: private or local address"),
            ));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn head_or_get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let target = self.check_target(url)?;

        let response = self
            .client
            .head(target.clone())
            .send()
            .await
            .map_err(|e| classify_error(url, &e))?;

        // Some servers refuse HEAD outright; retry as a GET and drop the body.
        let response = match response.status() {
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::FORBIDDEN | StatusCode::NOT_IMPLEMENTED => {
                debug!(status = response.status().as_u16(), "HEAD refused, retrying with GET");
                self.client
                    .get(target)
                    .send()
                    .await
                    .map_err(|e| classify_error(url, &e))?
            }
            _ => response,
        };

        Ok(FetchResponse {
            status: response.status().as_u16(),
            final_url: response.url().to_string(),
            body: None,
            content_type: content_type(&response),
        })
    }

    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let target = self.check_target(url)?;

        let mut response = self
            .client
            .get(target)
            .send()
            .await
            .map_err(|e| classify_error(url, &e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = content_type(&response);

        if let Some(len) = response.content_length() {
            if len > self.opts.max_body_bytes {
                return Err(FetchError::new(
                    ErrorKind::TooLarge,
                    format!("{url}: {len} bytes exceeds {}", self.opts.max_body_bytes),
                ));
            }
        }

        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| classify_error(url, &e))?
        {
            if (buf.len() + chunk.len()) as u64 > self.opts.max_body_bytes {
                return Err(FetchError::new(
                    ErrorKind::TooLarge,
                    format!("{url}: body exceeds {} bytes", self.opts.max_body_bytes),
                ));
            }
            buf.extend_from_slice(&chunk);
        }

        debug!(status, bytes = buf.len(), "fetched");
        Ok(FetchResponse {
            status,
            final_url,
            body: Some(String::from_utf8_lossy(&buf).into_owned()),
            content_type,
        })
    }
}

fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Map a reqwest transport error onto the failure taxonomy.
fn classify_error(url: &str, err: &reqwest::Error) -> FetchError {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_builder() {
        ErrorKind::MalformedUrl
    } else if err.is_redirect() {
        ErrorKind::ClientError
    } else if err.is_connect() {
        if mentions_dns(err) {
            ErrorKind::Dns
        } else {
            ErrorKind::Connect
        }
    } else if err.is_body() || err.is_decode() {
        ErrorKind::Body
    } else {
        ErrorKind::Connect
    };
    FetchError::new(kind, format!("{url}: {err}"))
}

fn mentions_dns(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("dns") || text.contains("failed to lookup address") {
            return true;
        }
        source = cause.source();
    }
    false
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    // Block non-HTTP schemes
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
