//! Per-candidate processing: verify → extract → score → persist.
//!
//! A candidate enters [`Pipeline::process`] holding the `verifying` lease the
//! scheduler gave it. Every exit path ends in exactly one of:
//! - `scanned/saved` (content stored, notifications spawned);
//! - `scanned/denied` with a recorded [`ErrorKind`];
//! - `not_scanned` with one more attempt, for retriable network failures;
//! - a lost lease, when the reclaim sweep took the candidate back first.
//!
//! Each lifecycle write is a compare-and-set on the expected status and the
//! lease generation the claim returned, so a worker whose lease expired can
//! never overwrite the state of a later claim. Content is stored and
//! notifications go out only after the `saved` write succeeds.

use std::sync::{Arc, Mutex};

use refscout_crawler::{ExtractedText, Fetcher, PageClassifier, PageVerdict, content_hash, extract_text};
use refscout_shared::{
    AppConfig, Candidate, CandidateId, CandidateUpdate, ErrorKind, RefScoutError, Result, ScanStatus,
    VerificationStatus,
};
use refscout_storage::{ContentRecord, ContentUpsert, Storage};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::notify::{NotificationKind, Notifier};
use crate::scorer::{RelevanceScore, RelevanceScorer, Thresholds, decide};

/// Result of one pipeline run, folded into the candidate and the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingOutcome {
    pub candidate_id: CandidateId,
    /// The existence check succeeded.
    pub verified: bool,
    #[serde(skip)]
    pub extracted_text: Option<String>,
    pub score: Option<f64>,
    pub saved: bool,
    /// Failure or denial reason. For an exhausted retry this is the last
    /// network failure; the candidate records `retries_exhausted`.
    pub error_kind: Option<ErrorKind>,
    /// Returned to the frontier for another attempt.
    pub requeued: bool,
    /// Another writer reclaimed the candidate mid-run; nothing was written.
    pub lease_lost: bool,
    pub content_id: Option<String>,
}

impl ProcessingOutcome {
    pub fn new(candidate_id: CandidateId) -> Self {
        Self {
            candidate_id,
            verified: false,
            extracted_text: None,
            score: None,
            saved: false,
            error_kind: None,
            requeued: false,
            lease_lost: false,
            content_id: None,
        }
    }

    /// Terminal denial.
    pub fn is_denied(&self) -> bool {
        !self.saved && !self.requeued && !self.lease_lost
    }
}

/// Drives admitted candidates through the processing state machine.
pub struct Pipeline {
    storage: Arc<Storage>,
    fetcher: Arc<dyn Fetcher>,
    scorer: Arc<dyn RelevanceScorer>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    classifier: PageClassifier,
    thresholds: Thresholds,
    min_text_chars: usize,
    max_attempts: u32,
    notifications: Mutex<JoinSet<()>>,
}

impl Pipeline {
    pub fn new(
        config: &AppConfig,
        storage: Arc<Storage>,
        fetcher: Arc<dyn Fetcher>,
        scorer: Arc<dyn RelevanceScorer>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self {
            storage,
            fetcher,
            scorer,
            notifier,
            clock,
            classifier: PageClassifier::from_config(&config.pipeline)?,
            thresholds: Thresholds::from(&config.pipeline),
            min_text_chars: config.pipeline.min_text_chars,
            max_attempts: config.scheduler.max_attempts_per_candidate,
            notifications: Mutex::new(JoinSet::new()),
        })
    }

    /// Process one leased candidate to its next stable state.
    ///
    /// Only storage failures and invalid state are errors; every network,
    /// content or scorer problem is recorded on the candidate instead.
    #[instrument(skip_all, fields(candidate_id = %candidate.id, host = %candidate.host))]
    pub async fn process(&self, candidate: Candidate) -> Result<ProcessingOutcome> {
        if candidate.scan_status != ScanStatus::Verifying {
            return Err(RefScoutError::InvalidState(format!(
                "candidate {} is {}, expected verifying",
                candidate.id, candidate.scan_status
            )));
        }
        let mut outcome = ProcessingOutcome::new(candidate.id.clone());

        // --- Verify ---
        let failure = match self.fetcher.head_or_get(&candidate.url).await {
            Ok(resp) if resp.is_success() => None,
            Ok(resp) => Some((ErrorKind::from_status(resp.status), format!("HTTP {}", resp.status))),
            Err(e) => Some((e.kind, e.message)),
        };
        if let Some((kind, detail)) = failure {
            return self
                .fail(&candidate, ScanStatus::Verifying, kind, detail, outcome)
                .await;
        }
        outcome.verified = true;

        let update = CandidateUpdate::scanning(self.clock.now());
        let Some(candidate) = self
            .storage
            .transition_leased(&candidate.id, ScanStatus::Verifying, candidate.lease_generation, &update)
            .await?
        else {
            return Ok(lease_lost(outcome, ScanStatus::Verifying));
        };

        // --- Extract ---
        if let PageVerdict::NonArticle(reason) = self.classifier.classify_url(&candidate.url) {
            return self.deny(&candidate, ErrorKind::NonArticle, reason, None, outcome).await;
        }

        let response = match self.fetcher.fetch(&candidate.url).await {
            Ok(resp) if resp.is_success() => resp,
            Ok(resp) => {
                let kind = ErrorKind::from_status(resp.status);
                let detail = format!("HTTP {}", resp.status);
                return self.fail(&candidate, ScanStatus::Scanning, kind, detail, outcome).await;
            }
            Err(e) => {
                return self
                    .fail(&candidate, ScanStatus::Scanning, e.kind, e.message, outcome)
                    .await;
            }
        };

        if let PageVerdict::NonArticle(reason) = self
            .classifier
            .classify_content_type(response.content_type.as_deref())
        {
            return self.deny(&candidate, ErrorKind::NonArticle, reason, None, outcome).await;
        }

        let page = extract_text(response.body.as_deref().unwrap_or_default());
        outcome.extracted_text = Some(page.text.clone());
        debug!(
            chars = page.char_len,
            paragraphs = page.paragraph_count,
            "content extracted"
        );

        if page.char_len < self.min_text_chars {
            let detail = format!("{} chars, minimum {}", page.char_len, self.min_text_chars);
            return self.deny(&candidate, ErrorKind::TooShort, detail, None, outcome).await;
        }
        if let PageVerdict::NonArticle(reason) = self.classifier.classify_shape(&page) {
            return self.deny(&candidate, ErrorKind::NonArticle, reason, None, outcome).await;
        }

        // --- Score ---
        let score = match self.scorer.score(&page.text).await {
            Ok(score) => score,
            Err(e) => {
                warn!(error = %e, "scorer unavailable, using fallback verdict");
                RelevanceScore::fallback(&self.thresholds)
            }
        };
        outcome.score = Some(score.priority_score);

        if !decide(&score, &self.thresholds) {
            let detail = format!(
                "score {:.1}, relevant={}",
                score.priority_score, score.is_relevant
            );
            return self
                .deny(
                    &candidate,
                    ErrorKind::LowRelevance,
                    detail,
                    Some(score.priority_score),
                    outcome,
                )
                .await;
        }

        // --- Persist ---
        let update = CandidateUpdate::saved(score.priority_score);
        if self
            .storage
            .transition_leased(&candidate.id, ScanStatus::Scanning, candidate.lease_generation, &update)
            .await?
            .is_none()
        {
            return Ok(lease_lost(outcome, ScanStatus::Scanning));
        }
        let stored = self.persist(&candidate, &page, &score).await?;

        info!(
            url = %candidate.url,
            score = score.priority_score,
            content_id = %stored.content_id,
            "saved"
        );
        outcome.saved = true;
        outcome.content_id = Some(stored.content_id);
        Ok(outcome)
    }

    /// Store accepted content, keyed by the candidate's normalized URL.
    ///
    /// A repeated call for the same URL keeps the first record and does not
    /// notify again.
    pub async fn persist(
        &self,
        candidate: &Candidate,
        page: &ExtractedText,
        score: &RelevanceScore,
    ) -> Result<ContentUpsert> {
        let record = ContentRecord {
            url: candidate.url.clone(),
            candidate_id: candidate.id.clone(),
            title: page.title.clone(),
            body_text: page.text.clone(),
            content_hash: content_hash(&page.text),
            char_len: page.char_len,
            paragraph_count: page.paragraph_count,
            priority_score: score.priority_score,
            is_relevant: score.is_relevant,
        };
        let stored = self.storage.upsert_content(&record).await?;
        if stored.created {
            self.spawn_notifications(&stored.content_id, &candidate.url);
        } else {
            debug!(content_id = %stored.content_id, "content already stored");
        }
        Ok(stored)
    }

    /// Wait for spawned notifications to finish.
    pub async fn flush_notifications(&self) {
        let mut tasks = {
            let mut guard = self.notifications.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        while tasks.join_next().await.is_some() {}
    }

    fn spawn_notifications(&self, content_id: &str, url: &str) {
        let mut tasks = self.notifications.lock().unwrap_or_else(|e| e.into_inner());
        while tasks.try_join_next().is_some() {}
        for kind in NotificationKind::ALL {
            let notifier = Arc::clone(&self.notifier);
            let content_id = content_id.to_string();
            let url = url.to_string();
            tasks.spawn(async move {
                if let Err(e) = notifier.notify(&content_id, &url, kind).await {
                    warn!(%kind, content_id, error = %e, "notification failed");
                }
            });
        }
    }

    /// Record a network failure: retriable kinds requeue until the attempt
    /// budget runs out, everything else is a terminal denial.
    async fn fail(
        &self,
        candidate: &Candidate,
        stage: ScanStatus,
        kind: ErrorKind,
        detail: String,
        mut outcome: ProcessingOutcome,
    ) -> Result<ProcessingOutcome> {
        outcome.error_kind = Some(kind);
        let attempts = candidate.attempts + 1;

        let mut update = if !kind.is_retriable() {
            CandidateUpdate::denied(kind, detail.clone())
        } else if attempts < self.max_attempts {
            outcome.requeued = true;
            CandidateUpdate::requeue(attempts, kind, detail.clone())
        } else {
            let mut update =
                CandidateUpdate::denied(ErrorKind::RetriesExhausted, format!("{kind}: {detail}"));
            update.attempts = Some(attempts);
            update
        };
        if stage == ScanStatus::Verifying && !outcome.requeued {
            update = update.with_verification(VerificationStatus::Failed);
        }

        match self
            .storage
            .transition_leased(&candidate.id, stage, candidate.lease_generation, &update)
            .await?
        {
            Some(next) if outcome.requeued => {
                info!(%kind, attempts = next.attempts, %detail, "requeued after retriable failure");
                Ok(outcome)
            }
            Some(next) => {
                info!(
                    error_kind = next.error_kind.map(|k| k.as_str()).unwrap_or(""),
                    %detail,
                    "denied"
                );
                Ok(outcome)
            }
            None => Ok(lease_lost(outcome, stage)),
        }
    }

    async fn deny(
        &self,
        candidate: &Candidate,
        kind: ErrorKind,
        detail: String,
        score: Option<f64>,
        mut outcome: ProcessingOutcome,
    ) -> Result<ProcessingOutcome> {
        outcome.error_kind = Some(kind);
        let mut update = CandidateUpdate::denied(kind, detail.clone());
        if let Some(score) = score {
            update = update.with_score(score);
        }
        match self
            .storage
            .transition_leased(&candidate.id, ScanStatus::Scanning, candidate.lease_generation, &update)
            .await?
        {
            Some(_) => {
                info!(error_kind = %kind, %detail, "denied");
                Ok(outcome)
            }
            None => Ok(lease_lost(outcome, ScanStatus::Scanning)),
        }
    }
}

fn lease_lost(mut outcome: ProcessingOutcome, stage: ScanStatus) -> ProcessingOutcome {
    warn!(candidate_id = %outcome.candidate_id, %stage, "lease lost, dropping result");
    outcome.lease_lost = true;
    outcome
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use refscout_shared::RelevanceDecision;

    use super::*;
    use crate::clock::SystemClock;
    use crate::testing::{
        FakeFetcher, FakeResponse, FakeScorer, RecordingNotifier, article_html, claimed, temp_storage,
        test_config,
    };

    struct Harness {
        storage: Arc<Storage>,
        fetcher: Arc<FakeFetcher>,
        scorer: Arc<FakeScorer>,
        notifier: Arc<RecordingNotifier>,
        pipeline: Pipeline,
    }

    async fn harness(fetcher: FakeFetcher, scorer: FakeScorer) -> Harness {
        let storage = temp_storage().await;
        let fetcher = Arc::new(fetcher);
        let scorer = Arc::new(scorer);
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = Pipeline::new(
            &test_config(),
            Arc::clone(&storage),
            fetcher.clone(),
            scorer.clone(),
            notifier.clone(),
            Arc::new(SystemClock),
        )
        .unwrap();
        Harness {
            storage,
            fetcher,
            scorer,
            notifier,
            pipeline,
        }
    }

    const URL: &str = "https://noaa.gov/tides";

    #[tokio::test]
    async fn relevant_article_is_saved_and_notified() {
        let h = harness(
            FakeFetcher::default().with(URL, FakeResponse::html(article_html("Tides"))),
            FakeScorer::fixed(82.0, true),
        )
        .await;
        let candidate = claimed(&h.storage, URL).await;

        let outcome = h.pipeline.process(candidate.clone()).await.unwrap();
        assert!(outcome.verified && outcome.saved);
        assert_eq!(outcome.score, Some(82.0));
        assert!(outcome.extracted_text.unwrap().contains("Tides"));

        let stored = h.storage.get(&candidate.id).await.unwrap().unwrap();
        assert_eq!(stored.scan_status, ScanStatus::Scanned);
        assert_eq!(stored.relevance_decision, Some(RelevanceDecision::Saved));
        assert_eq!(stored.verification_status, VerificationStatus::Verified);
        assert_eq!(stored.priority_score, Some(82.0));
        assert!(stored.lease_at.is_none());
        assert_eq!(h.storage.content_count().await.unwrap(), 1);

        h.pipeline.flush_notifications().await;
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().any(|(_, kind)| *kind == NotificationKind::Feed));
        assert!(sent.iter().any(|(_, kind)| *kind == NotificationKind::Enrich));
    }

    #[tokio::test]
    async fn not_found_is_terminal_not_ghost() {
        let h = harness(
            FakeFetcher::default().with(URL, FakeResponse::status(404)),
            FakeScorer::fixed(90.0, true),
        )
        .await;
        let candidate = claimed(&h.storage, URL).await;

        let outcome = h.pipeline.process(candidate.clone()).await.unwrap();
        assert!(!outcome.verified);
        assert!(outcome.is_denied());
        assert_eq!(outcome.error_kind, Some(ErrorKind::NotFound));

        let stored = h.storage.get(&candidate.id).await.unwrap().unwrap();
        assert_eq!(stored.scan_status, ScanStatus::Scanned);
        assert_eq!(stored.relevance_decision, Some(RelevanceDecision::Denied));
        assert_eq!(stored.verification_status, VerificationStatus::Failed);
        assert_eq!(stored.error_kind, Some(ErrorKind::NotFound));
        assert_eq!(h.fetcher.fetch_calls(), 0);
        assert_eq!(h.scorer.calls(), 0);
    }

    #[tokio::test]
    async fn dns_failure_is_terminal() {
        let h = harness(
            FakeFetcher::default().with(URL, FakeResponse::Error(ErrorKind::Dns)),
            FakeScorer::fixed(90.0, true),
        )
        .await;
        let candidate = claimed(&h.storage, URL).await;
        let outcome = h.pipeline.process(candidate.clone()).await.unwrap();
        assert!(outcome.is_denied());
        let stored = h.storage.get(&candidate.id).await.unwrap().unwrap();
        assert_eq!(stored.error_kind, Some(ErrorKind::Dns));
        assert_eq!(stored.attempts, 0);
    }

    #[tokio::test]
    async fn timeout_requeues_until_budget_spent() {
        let h = harness(
            FakeFetcher::default().with(URL, FakeResponse::Error(ErrorKind::Timeout)),
            FakeScorer::fixed(90.0, true),
        )
        .await;
        let max = test_config().scheduler.max_attempts_per_candidate;

        for attempt in 1..max {
            let candidate = claimed(&h.storage, URL).await;
            let outcome = h.pipeline.process(candidate.clone()).await.unwrap();
            assert!(outcome.requeued);
            let stored = h.storage.get(&candidate.id).await.unwrap().unwrap();
            assert_eq!(stored.scan_status, ScanStatus::NotScanned);
            assert_eq!(stored.verification_status, VerificationStatus::Pending);
            assert!(stored.relevance_decision.is_none());
            assert_eq!(stored.attempts, attempt);
        }

        let candidate = claimed(&h.storage, URL).await;
        let outcome = h.pipeline.process(candidate.clone()).await.unwrap();
        assert!(outcome.is_denied());
        assert_eq!(outcome.error_kind, Some(ErrorKind::Timeout));
        let stored = h.storage.get(&candidate.id).await.unwrap().unwrap();
        assert_eq!(stored.scan_status, ScanStatus::Scanned);
        assert_eq!(stored.error_kind, Some(ErrorKind::RetriesExhausted));
        assert_eq!(stored.attempts, max);
    }

    #[tokio::test]
    async fn server_error_on_full_fetch_requeues() {
        let fetcher = FakeFetcher::default().with(URL, FakeResponse::html(article_html("Tides")));
        fetcher.fail_fetch(URL, FakeResponse::status(503));
        let h = harness(fetcher, FakeScorer::fixed(90.0, true)).await;
        let candidate = claimed(&h.storage, URL).await;

        let outcome = h.pipeline.process(candidate.clone()).await.unwrap();
        assert!(outcome.verified && outcome.requeued);
        assert_eq!(outcome.error_kind, Some(ErrorKind::ServerError));
        let stored = h.storage.get(&candidate.id).await.unwrap().unwrap();
        assert_eq!(stored.scan_status, ScanStatus::NotScanned);
        assert!(stored.lease_at.is_none());
    }

    #[tokio::test]
    async fn short_pages_are_denied_before_scoring() {
        let short = "<html><body><article><p>Tides.</p></article></body></html>";
        let h = harness(
            FakeFetcher::default().with(URL, FakeResponse::html(short.to_string())),
            FakeScorer::fixed(90.0, true),
        )
        .await;
        let candidate = claimed(&h.storage, URL).await;
        let outcome = h.pipeline.process(candidate).await.unwrap();
        assert_eq!(outcome.error_kind, Some(ErrorKind::TooShort));
        assert_eq!(h.scorer.calls(), 0);
    }

    #[tokio::test]
    async fn catalog_url_is_denied_without_full_fetch() {
        let url = "https://library.example/search?q=tides";
        let h = harness(
            FakeFetcher::default().with(url, FakeResponse::html(article_html("Results"))),
            FakeScorer::fixed(90.0, true),
        )
        .await;
        let candidate = claimed(&h.storage, url).await;
        let outcome = h.pipeline.process(candidate.clone()).await.unwrap();
        assert!(outcome.verified);
        assert_eq!(outcome.error_kind, Some(ErrorKind::NonArticle));
        assert_eq!(h.fetcher.fetch_calls(), 0);
        assert_eq!(h.scorer.calls(), 0);
        let stored = h.storage.get(&candidate.id).await.unwrap().unwrap();
        assert!(stored.denial_detail.unwrap().starts_with("url matches"));
    }

    #[tokio::test]
    async fn pdf_is_non_article() {
        let h = harness(
            FakeFetcher::default().with(
                URL,
                FakeResponse::Page {
                    status: 200,
                    body: "%PDF-1.7".into(),
                    content_type: Some("application/pdf".into()),
                },
            ),
            FakeScorer::fixed(90.0, true),
        )
        .await;
        let candidate = claimed(&h.storage, URL).await;
        let outcome = h.pipeline.process(candidate).await.unwrap();
        assert_eq!(outcome.error_kind, Some(ErrorKind::NonArticle));
    }

    #[tokio::test]
    async fn low_score_is_denied_with_score_recorded() {
        let h = harness(
            FakeFetcher::default().with(URL, FakeResponse::html(article_html("Tides"))),
            FakeScorer::fixed(55.0, false),
        )
        .await;
        let candidate = claimed(&h.storage, URL).await;
        let outcome = h.pipeline.process(candidate.clone()).await.unwrap();
        assert!(outcome.is_denied());
        assert_eq!(outcome.error_kind, Some(ErrorKind::LowRelevance));

        let stored = h.storage.get(&candidate.id).await.unwrap().unwrap();
        assert_eq!(stored.priority_score, Some(55.0));
        assert_eq!(stored.error_kind, Some(ErrorKind::LowRelevance));
        assert_eq!(h.storage.content_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scorer_outage_falls_back_without_error() {
        let h = harness(
            FakeFetcher::default().with(URL, FakeResponse::html(article_html("Tides"))),
            FakeScorer::failing(),
        )
        .await;
        let candidate = claimed(&h.storage, URL).await;
        let outcome = h.pipeline.process(candidate.clone()).await.unwrap();
        assert_eq!(outcome.score, Some(50.0));
        assert_eq!(outcome.error_kind, Some(ErrorKind::LowRelevance));
        let stored = h.storage.get(&candidate.id).await.unwrap().unwrap();
        assert_eq!(stored.relevance_decision, Some(RelevanceDecision::Denied));
    }

    #[tokio::test]
    async fn persist_twice_stores_one_record() {
        let h = harness(FakeFetcher::default(), FakeScorer::fixed(90.0, true)).await;
        let candidate = claimed(&h.storage, URL).await;
        let page = extract_text(&article_html("Tides"));
        let score = RelevanceScore::new(90.0, true);

        let first = h.pipeline.persist(&candidate, &page, &score).await.unwrap();
        let second = h.pipeline.persist(&candidate, &page, &score).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.content_id, second.content_id);
        assert_eq!(h.storage.content_count().await.unwrap(), 1);

        h.pipeline.flush_notifications().await;
        assert_eq!(h.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn rerun_after_reprocess_keeps_single_record() {
        let h = harness(
            FakeFetcher::default().with(URL, FakeResponse::html(article_html("Tides"))),
            FakeScorer::fixed(90.0, true),
        )
        .await;
        let candidate = claimed(&h.storage, URL).await;
        h.pipeline.process(candidate.clone()).await.unwrap();

        // Simulate a retried run of the same URL.
        h.storage
            .update(&candidate.id, &CandidateUpdate::requeue(0, ErrorKind::LeaseExpired, "test"))
            .await
            .unwrap();
        let again = claimed(&h.storage, URL).await;
        let outcome = h.pipeline.process(again).await.unwrap();
        assert!(outcome.saved);
        assert_eq!(h.storage.content_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn lost_lease_writes_nothing() {
        let h = harness(
            FakeFetcher::default().with(URL, FakeResponse::status(404)),
            FakeScorer::fixed(90.0, true),
        )
        .await;
        let candidate = claimed(&h.storage, URL).await;
        // The reclaim sweep takes the candidate back while the worker runs.
        h.storage
            .update(&candidate.id, &CandidateUpdate::requeue(1, ErrorKind::LeaseExpired, "lease expired"))
            .await
            .unwrap();

        let outcome = h.pipeline.process(candidate.clone()).await.unwrap();
        assert!(outcome.lease_lost);
        assert!(!outcome.is_denied());
        let stored = h.storage.get(&candidate.id).await.unwrap().unwrap();
        assert_eq!(stored.scan_status, ScanStatus::NotScanned);
        assert_eq!(stored.error_kind, Some(ErrorKind::LeaseExpired));
    }

    /// Reclaim every lease and claim `id` again as a second worker would.
    async fn take_over(storage: &Storage, id: &CandidateId, stage: ScanStatus) -> u32 {
        storage
            .reclaim_stale_leases(Utc::now() + chrono::Duration::minutes(1), 3)
            .await
            .unwrap();
        let generation = storage.claim(id, Utc::now(), 3).await.unwrap().expect("second claim");
        if stage == ScanStatus::Scanning {
            storage
                .transition_leased(id, ScanStatus::Verifying, generation, &CandidateUpdate::scanning(Utc::now()))
                .await
                .unwrap()
                .expect("second worker verifies");
        }
        generation
    }

    #[tokio::test]
    async fn requeued_then_claimed_again_rejects_first_worker() {
        let h = harness(
            FakeFetcher::default().with(URL, FakeResponse::status(404)),
            FakeScorer::fixed(90.0, true),
        )
        .await;
        let first = claimed(&h.storage, URL).await;
        let second = take_over(&h.storage, &first.id, ScanStatus::Verifying).await;
        assert!(second > first.lease_generation);

        // Status is `verifying` again, but under the second lease.
        let outcome = h.pipeline.process(first.clone()).await.unwrap();
        assert!(outcome.lease_lost);
        let stored = h.storage.get(&first.id).await.unwrap().unwrap();
        assert_eq!(stored.scan_status, ScanStatus::Verifying);
        assert_eq!(stored.verification_status, VerificationStatus::Pending);
        assert!(stored.relevance_decision.is_none());
        assert_eq!(stored.lease_generation, second);

        // The current holder still finishes normally.
        let outcome = h.pipeline.process(stored).await.unwrap();
        assert!(!outcome.lease_lost);
        assert!(outcome.is_denied());
    }

    /// Scores relevant, after a second worker has taken the lease over.
    struct TakeoverScorer {
        storage: Arc<Storage>,
        id: CandidateId,
    }

    #[async_trait::async_trait]
    impl RelevanceScorer for TakeoverScorer {
        async fn score(&self, _text: &str) -> Result<RelevanceScore> {
            take_over(&self.storage, &self.id, ScanStatus::Scanning).await;
            Ok(RelevanceScore::new(90.0, true))
        }
    }

    #[tokio::test]
    async fn lease_lost_before_save_stores_and_notifies_nothing() {
        let storage = temp_storage().await;
        let candidate = claimed(&storage, URL).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = Pipeline::new(
            &test_config(),
            Arc::clone(&storage),
            Arc::new(FakeFetcher::default().with(URL, FakeResponse::html(article_html("Tides")))),
            Arc::new(TakeoverScorer {
                storage: Arc::clone(&storage),
                id: candidate.id.clone(),
            }),
            notifier.clone(),
            Arc::new(SystemClock),
        )
        .unwrap();

        let outcome = pipeline.process(candidate.clone()).await.unwrap();
        assert!(outcome.lease_lost);
        assert!(!outcome.saved);
        assert_eq!(storage.content_count().await.unwrap(), 0);
        pipeline.flush_notifications().await;
        assert!(notifier.sent().is_empty());

        let stored = storage.get(&candidate.id).await.unwrap().unwrap();
        assert_eq!(stored.scan_status, ScanStatus::Scanning);
        assert!(stored.relevance_decision.is_none());
    }

    #[tokio::test]
    async fn unleased_candidate_is_rejected() {
        let h = harness(FakeFetcher::default(), FakeScorer::fixed(90.0, true)).await;
        let mut candidate = claimed(&h.storage, URL).await;
        candidate.scan_status = ScanStatus::NotScanned;
        let err = h.pipeline.process(candidate).await.unwrap_err();
        assert!(matches!(err, RefScoutError::InvalidState(_)));
    }
}
