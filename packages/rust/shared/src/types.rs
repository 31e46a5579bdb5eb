//! Core domain types: candidates, their lifecycle states, and failure kinds.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RefScoutError;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for candidate identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub Uuid);

impl CandidateId {
    /// Generate a new time-sortable candidate identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for CandidateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CandidateId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Lifecycle states
// ---------------------------------------------------------------------------

/// Generates `as_str` / `FromStr` for a snake_case state enum stored as TEXT.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Storage representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = RefScoutError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(RefScoutError::InvalidState(format!(
                        "unknown {} value '{other}'",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

/// Where a candidate is in the processing state machine.
///
/// `Verifying` and `Scanning` are leases: while a candidate holds one of
/// them, no other worker may dispatch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    NotScanned,
    Verifying,
    Scanning,
    Scanned,
}

text_enum!(ScanStatus {
    NotScanned => "not_scanned",
    Verifying => "verifying",
    Scanning => "scanning",
    Scanned => "scanned",
});

impl ScanStatus {
    /// Whether this status represents an active processing lease.
    pub fn is_leased(&self) -> bool {
        matches!(self, Self::Verifying | Self::Scanning)
    }
}

/// Result of the network existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Failed,
}

text_enum!(VerificationStatus {
    Pending => "pending",
    Verified => "verified",
    Failed => "failed",
});

/// Terminal relevance decision; only set once `scan_status = scanned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceDecision {
    Saved,
    Denied,
}

text_enum!(RelevanceDecision {
    Saved => "saved",
    Denied => "denied",
});

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Classified reason a candidate failed or was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request exceeded the network timeout.
    Timeout,
    /// Upstream answered 5xx.
    ServerError,
    /// Upstream answered 429.
    RateLimited,
    /// TCP/TLS connection could not be established.
    Connect,
    /// Response body could not be read to completion.
    Body,
    /// Upstream answered 404 or 410.
    NotFound,
    /// Any other 4xx.
    ClientError,
    /// Host name did not resolve.
    Dns,
    /// URL could not be parsed or uses an unsupported scheme.
    MalformedUrl,
    /// Target resolves to a private or loopback address.
    Blocked,
    /// Body exceeds the configured size limit.
    TooLarge,
    /// Extracted text is below the minimum length.
    TooShort,
    /// Page classified as catalog/search/metadata rather than an article.
    NonArticle,
    /// Scorer verdict below the acceptance thresholds.
    LowRelevance,
    /// Retriable failures exhausted `max_attempts_per_candidate`.
    RetriesExhausted,
    /// A worker's lease expired and the candidate was reclaimed.
    LeaseExpired,
}

text_enum!(ErrorKind {
    Timeout => "timeout",
    ServerError => "server_error",
    RateLimited => "rate_limited",
    Connect => "connect",
    Body => "body",
    NotFound => "not_found",
    ClientError => "client_error",
    Dns => "dns",
    MalformedUrl => "malformed_url",
    Blocked => "blocked",
    TooLarge => "too_large",
    TooShort => "too_short",
    NonArticle => "non_article",
    LowRelevance => "low_relevance",
    RetriesExhausted => "retries_exhausted",
    LeaseExpired => "lease_expired",
});

impl ErrorKind {
    /// Retriable failures requeue the candidate; everything else is terminal.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ServerError | Self::RateLimited | Self::Connect | Self::Body
        )
    }

    /// Classify an HTTP status code that is not a success.
    pub fn from_status(status: u16) -> Self {
        match status {
            404 | 410 => Self::NotFound,
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            _ => Self::ClientError,
        }
    }
}

// ---------------------------------------------------------------------------
// OriginDocument
// ---------------------------------------------------------------------------

/// A seed page whose citations feed the frontier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginDocument {
    /// Unique document identifier (UUID v7).
    pub id: String,
    /// Normalized page URL (also the base for relative citation links).
    pub url: String,
    /// Lowercase, www-stripped host of `url`.
    pub host: String,
    /// Whether everything discovered here counts as contested-topic content.
    pub contested: bool,
    /// When links were last extracted from this document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seeded_at: Option<DateTime<Utc>>,
    /// Number of links seen on the last extraction.
    pub link_count: u32,
}

/// A raw link listed by an origin document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredLink {
    /// The href as found (may be relative to the document).
    pub url: String,
    /// Citation number within the origin (0 for non-citation links).
    pub ordinal: u32,
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// One discovered URL and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    /// Normalized absolute URL; unique across the store.
    pub url: String,
    /// Origin document this URL was first discovered on.
    pub origin_document_id: String,
    /// Citation number within the first origin.
    pub source_ordinal: u32,
    /// Lowercase, www-stripped host.
    pub host: String,
    /// Diversity class: the host, or `origin:<host>` for same-site links.
    pub class_key: String,
    /// Counts toward the contested-topic balance.
    pub contested: bool,
    pub discovered_at: DateTime<Utc>,
    pub scan_status: ScanStatus,
    pub verification_status: VerificationStatus,
    pub relevance_decision: Option<RelevanceDecision>,
    /// External scorer output, 0–100.
    pub priority_score: Option<f64>,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the current lease was taken; `None` unless leased.
    pub lease_at: Option<DateTime<Utc>>,
    /// Bumped by every claim. Lifecycle writes carry the generation they
    /// were leased under and fail once a newer claim exists.
    #[serde(default)]
    pub lease_generation: u32,
    pub error_kind: Option<ErrorKind>,
    /// Free-form audit detail for denials (status line, heuristic reason).
    pub denial_detail: Option<String>,
}

impl Candidate {
    /// Check the lifecycle invariants that must hold after every write.
    pub fn check_invariants(&self) -> std::result::Result<(), RefScoutError> {
        if self.relevance_decision.is_some() && self.scan_status != ScanStatus::Scanned {
            return Err(RefScoutError::InvalidState(format!(
                "candidate {} has decision {:?} while {}",
                self.id, self.relevance_decision, self.scan_status
            )));
        }
        if self.scan_status == ScanStatus::Scanned && self.relevance_decision.is_none() {
            return Err(RefScoutError::InvalidState(format!(
                "candidate {} is scanned without a decision",
                self.id
            )));
        }
        if self.scan_status.is_leased() && self.lease_at.is_none() {
            return Err(RefScoutError::InvalidState(format!(
                "candidate {} is {} without a lease timestamp",
                self.id, self.scan_status
            )));
        }
        Ok(())
    }

    /// Whether the candidate reached a terminal classification.
    pub fn is_terminal(&self) -> bool {
        self.scan_status == ScanStatus::Scanned
    }
}

/// Partial state update applied by the processing pipeline.
///
/// `None` leaves a field unchanged; the nested `Option`s allow clearing.
#[derive(Debug, Clone, Default)]
pub struct CandidateUpdate {
    pub scan_status: Option<ScanStatus>,
    pub verification_status: Option<VerificationStatus>,
    pub relevance_decision: Option<Option<RelevanceDecision>>,
    pub priority_score: Option<Option<f64>>,
    pub attempts: Option<u32>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub lease_at: Option<DateTime<Utc>>,
    pub error_kind: Option<Option<ErrorKind>>,
    pub denial_detail: Option<Option<String>>,
}

impl CandidateUpdate {
    /// Verification passed; move on to content extraction under a fresh lease.
    pub fn scanning(now: DateTime<Utc>) -> Self {
        Self {
            scan_status: Some(ScanStatus::Scanning),
            verification_status: Some(VerificationStatus::Verified),
            lease_at: Some(now),
            ..Default::default()
        }
    }

    /// Return to the frontier after a retriable failure.
    pub fn requeue(attempts: u32, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            scan_status: Some(ScanStatus::NotScanned),
            verification_status: Some(VerificationStatus::Pending),
            relevance_decision: Some(None),
            attempts: Some(attempts),
            error_kind: Some(Some(kind)),
            denial_detail: Some(Some(detail.into())),
            ..Default::default()
        }
    }

    /// Terminal denial with a recorded reason.
    pub fn denied(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            scan_status: Some(ScanStatus::Scanned),
            relevance_decision: Some(Some(RelevanceDecision::Denied)),
            error_kind: Some(Some(kind)),
            denial_detail: Some(Some(detail.into())),
            ..Default::default()
        }
    }

    /// Terminal acceptance with the score that earned it.
    pub fn saved(score: f64) -> Self {
        Self {
            scan_status: Some(ScanStatus::Scanned),
            relevance_decision: Some(Some(RelevanceDecision::Saved)),
            priority_score: Some(Some(score)),
            error_kind: Some(None),
            denial_detail: Some(None),
            ..Default::default()
        }
    }

    /// Mark verification as failed (used together with a terminal denial).
    pub fn with_verification(mut self, status: VerificationStatus) -> Self {
        self.verification_status = Some(status);
        self
    }

    /// Record the scorer output alongside a denial.
    pub fn with_score(mut self, score: f64) -> Self {
        self.priority_score = Some(Some(score));
        self
    }

    /// Apply this update onto a candidate, producing the new state.
    pub fn apply(&self, current: &Candidate) -> Candidate {
        let mut next = current.clone();
        if let Some(status) = self.scan_status {
            next.scan_status = status;
        }
        if let Some(status) = self.verification_status {
            next.verification_status = status;
        }
        if let Some(decision) = self.relevance_decision {
            next.relevance_decision = decision;
        }
        if let Some(score) = self.priority_score {
            next.priority_score = score;
        }
        if let Some(attempts) = self.attempts {
            next.attempts = attempts;
        }
        if let Some(at) = self.last_attempt_at {
            next.last_attempt_at = Some(at);
        }
        if let Some(kind) = self.error_kind {
            next.error_kind = kind;
        }
        if let Some(detail) = &self.denial_detail {
            next.denial_detail = detail.clone();
        }
        next.lease_at = if next.scan_status.is_leased() {
            self.lease_at.or(current.lease_at)
        } else {
            None
        };
        next
    }
}
