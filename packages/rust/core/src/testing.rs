//! Fixtures and in-process fakes for the collaborator traits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use refscout_crawler::{FetchError, FetchResponse, Fetcher};
use refscout_discovery::OriginSource;
use refscout_shared::{
    AppConfig, Candidate, CandidateId, DiscoveredLink, ErrorKind, OriginDocument, RefScoutError, Result,
    ScanStatus, VerificationStatus, normalize_url,
};
use refscout_storage::Storage;
use uuid::Uuid;

use crate::notify::{NotificationKind, Notifier};
use crate::pipeline::ProcessingOutcome;
use crate::scorer::{RelevanceScore, RelevanceScorer};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Defaults with politeness spacing short enough for tests.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.guards.qps_per_host = 1000.0;
    config.scheduler.idle_backoff_ms = 10;
    config.pipeline.allow_private_hosts = true;
    config
}

pub async fn temp_storage() -> Arc<Storage> {
    let path = std::env::temp_dir().join(format!("refscout_test_{}.db", Uuid::now_v7()));
    Arc::new(Storage::open(&path).await.unwrap())
}

/// A fresh, unstored candidate.
pub fn candidate_on(url: &str, class_key: &str) -> Candidate {
    let normalized = normalize_url(url, None).unwrap();
    Candidate {
        id: CandidateId::new(),
        url: normalized.url,
        origin_document_id: "origin".into(),
        source_ordinal: 1,
        host: normalized.host,
        class_key: class_key.into(),
        contested: false,
        discovered_at: Utc::now(),
        scan_status: ScanStatus::NotScanned,
        verification_status: VerificationStatus::Pending,
        relevance_decision: None,
        priority_score: None,
        attempts: 0,
        last_attempt_at: None,
        lease_at: None,
        lease_generation: 0,
        error_kind: None,
        denial_detail: None,
    }
}

/// An outcome with nothing set, to be filled in by the test.
pub fn outcome_for(candidate: &Candidate) -> ProcessingOutcome {
    ProcessingOutcome::new(candidate.id.clone())
}

/// Register `origin` and enqueue `links` with ordinals 1..
pub async fn seed_links(storage: &Storage, origin: &str, links: &[&str]) -> OriginDocument {
    let doc = storage.upsert_origin_document(origin, false).await.unwrap();
    for (i, link) in links.iter().enumerate() {
        storage.enqueue(link, &doc, i as u32 + 1, false).await.unwrap();
    }
    doc
}

/// Enqueue `url` (if needed) and claim it, as the scheduler would.
pub async fn claimed(storage: &Storage, url: &str) -> Candidate {
    let doc = storage
        .upsert_origin_document("https://en.wikipedia.org/wiki/Tide", false)
        .await
        .unwrap();
    let id = storage.enqueue(url, &doc, 1, false).await.unwrap().id().clone();
    assert!(storage.claim(&id, Utc::now(), 3).await.unwrap().is_some(), "claim {url}");
    storage.get(&id).await.unwrap().unwrap()
}

/// An article page long enough to pass the length and shape checks.
pub fn article_html(title: &str) -> String {
    let paragraph = format!(
        "<p>{title} are the rise and fall of sea levels caused by the combined effects of \
         the gravitational forces exerted by the Moon and the Sun and the rotation of the Earth. \
         Tide tables can be used for any given locale to find the predicted times and amplitude.</p>"
    );
    format!(
        "<html><head><title>{title}</title></head><body>\
         <nav><a href=\"/\">Home</a></nav>\
         <article><h1>{title}</h1>{paragraph}{paragraph}{paragraph}</article>\
         </body></html>"
    )
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Canned network behavior for one URL.
#[derive(Debug, Clone)]
pub enum FakeResponse {
    Page {
        status: u16,
        body: String,
        content_type: Option<String>,
    },
    Error(ErrorKind),
}

impl FakeResponse {
    pub fn html(body: String) -> Self {
        Self::Page {
            status: 200,
            body,
            content_type: Some("text/html; charset=utf-8".into()),
        }
    }

    pub fn status(status: u16) -> Self {
        Self::Page {
            status,
            body: String::new(),
            content_type: Some("text/html".into()),
        }
    }

    fn respond(&self, url: &str, with_body: bool) -> std::result::Result<FetchResponse, FetchError> {
        match self {
            Self::Page {
                status,
                body,
                content_type,
            } => Ok(FetchResponse {
                status: *status,
                final_url: url.to_string(),
                body: with_body.then(|| body.clone()),
                content_type: content_type.clone(),
            }),
            Self::Error(kind) => Err(FetchError::new(*kind, format!("simulated {kind}"))),
        }
    }
}

/// Serves canned responses; unknown URLs are 404 unless a fallback is set.
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, FakeResponse>,
    fetch_overrides: Mutex<HashMap<String, FakeResponse>>,
    fallback: Option<FakeResponse>,
    verify_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl FakeFetcher {
    /// Every URL is a valid article.
    pub fn serving_articles() -> Self {
        Self {
            fallback: Some(FakeResponse::html(article_html("Tides"))),
            ..Self::default()
        }
    }

    pub fn with(mut self, url: &str, response: FakeResponse) -> Self {
        self.pages.insert(url.to_string(), response);
        self
    }

    /// Make only the full fetch of `url` behave differently from verification.
    pub fn fail_fetch(&self, url: &str, response: FakeResponse) {
        self.fetch_overrides
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, url: &str) -> FakeResponse {
        self.pages
            .get(url)
            .or(self.fallback.as_ref())
            .cloned()
            .unwrap_or_else(|| FakeResponse::status(404))
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn head_or_get(&self, url: &str) -> std::result::Result<FetchResponse, FetchError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.lookup(url).respond(url, false)
    }

    async fn fetch(&self, url: &str) -> std::result::Result<FetchResponse, FetchError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let overridden = self.fetch_overrides.lock().unwrap().get(url).cloned();
        overridden
            .unwrap_or_else(|| self.lookup(url))
            .respond(url, true)
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Returns the same verdict for every text, or always fails.
pub struct FakeScorer {
    verdict: Option<RelevanceScore>,
    calls: AtomicUsize,
}

impl FakeScorer {
    pub fn fixed(priority_score: f64, is_relevant: bool) -> Self {
        Self {
            verdict: Some(RelevanceScore::new(priority_score, is_relevant)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            verdict: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelevanceScorer for FakeScorer {
    async fn score(&self, _text: &str) -> Result<RelevanceScore> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict
            .clone()
            .ok_or_else(|| RefScoutError::Scorer("scorer offline".into()))
    }
}

// ---------------------------------------------------------------------------
// Origin source
// ---------------------------------------------------------------------------

/// Lists fixed links per origin document URL.
#[derive(Default)]
pub struct FakeSource {
    links: HashMap<String, Vec<DiscoveredLink>>,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn with(mut self, origin: &str, links: &[&str]) -> Self {
        let links = links
            .iter()
            .enumerate()
            .map(|(i, url)| DiscoveredLink {
                url: url.to_string(),
                ordinal: i as u32 + 1,
            })
            .collect();
        self.links.insert(origin.to_string(), links);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OriginSource for FakeSource {
    async fn list_links(&self, doc: &OriginDocument) -> Result<Vec<DiscoveredLink>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.links
            .get(&doc.url)
            .cloned()
            .ok_or_else(|| RefScoutError::Network(format!("{}: HTTP 404", doc.url)))
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, NotificationKind)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, NotificationKind)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, content_id: &str, _url: &str, kind: NotificationKind) -> Result<()> {
        self.sent.lock().unwrap().push((content_id.to_string(), kind));
        Ok(())
    }
}
