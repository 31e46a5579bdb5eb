//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding origin documents,
//! the Candidate Store (with provenance), the Content Store and the
//! notification outbox.
//!
//! **Access rules:**
//! - `refscout run` and friends: read-write via [`Storage::open`]
//! - `refscout stats`: read-only via [`Storage::open_readonly`]
//!
//! Every lifecycle transition is a compare-and-set on `scan_status`, so
//! concurrent workers sharing one handle can never both win a lease.

mod migrations;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use refscout_shared::{
    Candidate, CandidateId, CandidateUpdate, ErrorKind, OriginDocument, RefScoutError, Result,
    ScanStatus, class_key, normalize_url,
};
use serde::Serialize;
use url::Url;
use uuid::Uuid;

const CANDIDATE_COLUMNS: &str = "id, url, origin_document_id, source_ordinal, host, class_key, \
     contested, discovered_at, scan_status, verification_status, relevance_decision, \
     priority_score, attempts, last_attempt_at, lease_at, error_kind, denial_detail, lease_generation";

const ORIGIN_COLUMNS: &str = "id, url, host, contested, last_seeded_at, link_count";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Result of [`Storage::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new candidate row was created.
    Inserted(CandidateId),
    /// The normalized URL was already known; only provenance was appended.
    Duplicate(CandidateId),
}

impl EnqueueOutcome {
    pub fn id(&self) -> &CandidateId {
        match self {
            Self::Inserted(id) | Self::Duplicate(id) => id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Frontier query parameters for [`Storage::ranked_eligible`].
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    /// Hosts on cooldown; their candidates are skipped.
    pub excluded_hosts: Vec<String>,
    /// Candidates with this many attempts are no longer eligible.
    pub max_attempts: u32,
    /// Ranking priority substituted for unscored candidates.
    pub default_priority: f64,
}

/// Counts returned by [`Storage::reclaim_stale_leases`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    /// Returned to `not_scanned` with one more attempt.
    pub requeued: u64,
    /// Moved to `scanned/denied` because the attempt budget ran out.
    pub exhausted: u64,
}

/// Candidate counts per lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub not_scanned: u64,
    pub verifying: u64,
    pub scanning: u64,
    pub saved: u64,
    pub denied: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.not_scanned + self.verifying + self.scanning + self.saved + self.denied
    }
}

/// Payload written to the Content Store on acceptance.
#[derive(Debug, Clone)]
pub struct ContentRecord {
    pub url: String,
    pub candidate_id: CandidateId,
    pub title: Option<String>,
    pub body_text: String,
    pub content_hash: String,
    pub char_len: usize,
    pub paragraph_count: usize,
    pub priority_score: f64,
    pub is_relevant: bool,
}

/// Result of [`Storage::upsert_content`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentUpsert {
    pub content_id: String,
    /// False when the URL already had a stored record.
    pub created: bool,
}

/// A row of the notification outbox.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub content_id: String,
    pub kind: String,
    pub url: String,
    pub created_at: String,
}

/// One sighting of a candidate on an origin document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub origin_document_id: String,
    pub ordinal: u32,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RefScoutError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| RefScoutError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| RefScoutError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (for stats reporting).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RefScoutError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| RefScoutError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| RefScoutError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        RefScoutError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(RefScoutError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Origin documents
    // -----------------------------------------------------------------------

    /// Register an origin document. Re-registering a known URL keeps its id
    /// and can only upgrade the contested flag.
    pub async fn upsert_origin_document(&self, raw_url: &str, contested: bool) -> Result<OriginDocument> {
        self.check_writable()?;
        let normalized = normalize_url(raw_url, None)?;
        let id = Uuid::now_v7().to_string();
        self.conn
            .execute(
                "INSERT INTO origin_documents (id, url, host, contested, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(url) DO UPDATE SET
                   contested = MAX(contested, excluded.contested)",
                params![
                    id.as_str(),
                    normalized.url.as_str(),
                    normalized.host.as_str(),
                    bool_to_int(contested),
                    timestamp(Utc::now()),
                ],
            )
            .await
            .map_err(db_err)?;

        self.get_origin_document_by_url(&normalized.url)
            .await?
            .ok_or_else(|| {
                RefScoutError::InvalidState(format!("origin document {} vanished", normalized.url))
            })
    }

    /// Get an origin document by id.
    pub async fn get_origin_document(&self, id: &str) -> Result<Option<OriginDocument>> {
        let sql = format!("SELECT {ORIGIN_COLUMNS} FROM origin_documents WHERE id = ?1");
        let mut rows = self.conn.query(&sql, params![id]).await.map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_origin(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_origin_document_by_url(&self, url: &str) -> Result<Option<OriginDocument>> {
        let sql = format!("SELECT {ORIGIN_COLUMNS} FROM origin_documents WHERE url = ?1");
        let mut rows = self.conn.query(&sql, params![url]).await.map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_origin(&row)?)),
            None => Ok(None),
        }
    }

    /// List all registered origin documents, oldest first.
    pub async fn list_origin_documents(&self) -> Result<Vec<OriginDocument>> {
        let sql = format!("SELECT {ORIGIN_COLUMNS} FROM origin_documents ORDER BY created_at, id");
        let mut rows = self.conn.query(&sql, params![]).await.map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_origin(&row)?);
        }
        Ok(results)
    }

    /// Record that links were just extracted from an origin document.
    pub async fn mark_seeded(&self, id: &str, link_count: u32) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE origin_documents SET last_seeded_at = ?1, link_count = ?2 WHERE id = ?3",
                params![timestamp(Utc::now()), link_count, id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Candidate Store
    // -----------------------------------------------------------------------

    /// Add a discovered link to the frontier.
    ///
    /// The raw href is normalized against the origin document's URL. A URL
    /// that is already known keeps its state untouched; the sighting is
    /// recorded as provenance and a contested origin upgrades the flag.
    pub async fn enqueue(
        &self,
        raw_url: &str,
        origin: &OriginDocument,
        ordinal: u32,
        contested: bool,
    ) -> Result<EnqueueOutcome> {
        self.check_writable()?;
        let base = Url::parse(&origin.url)
            .map_err(|e| RefScoutError::parse(format!("{}: {e}", origin.url)))?;
        let normalized = normalize_url(raw_url, Some(&base))?;
        let class = class_key(&normalized.host, &origin.host);
        let now = timestamp(Utc::now());
        let id = CandidateId::new();

        let inserted = self
            .conn
            .execute(
                "INSERT INTO candidates
                   (id, url, origin_document_id, source_ordinal, host, class_key, contested, discovered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(url) DO NOTHING",
                params![
                    id.to_string(),
                    normalized.url.as_str(),
                    origin.id.as_str(),
                    ordinal,
                    normalized.host.as_str(),
                    class.as_str(),
                    bool_to_int(contested),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;

        let outcome = if inserted == 1 {
            EnqueueOutcome::Inserted(id)
        } else {
            let existing = self.candidate_id_by_url(&normalized.url).await?.ok_or_else(|| {
                RefScoutError::InvalidState(format!("candidate {} vanished", normalized.url))
            })?;
            if contested {
                self.conn
                    .execute(
                        "UPDATE candidates SET contested = 1 WHERE id = ?1",
                        params![existing.to_string()],
                    )
                    .await
                    .map_err(db_err)?;
            }
            EnqueueOutcome::Duplicate(existing)
        };

        self.conn
            .execute(
                "INSERT OR IGNORE INTO candidate_provenance
                   (candidate_id, origin_document_id, ordinal, seen_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![outcome.id().to_string(), origin.id.as_str(), ordinal, now.as_str()],
            )
            .await
            .map_err(db_err)?;

        Ok(outcome)
    }

    async fn candidate_id_by_url(&self, url: &str) -> Result<Option<CandidateId>> {
        let mut rows = self
            .conn
            .query("SELECT id FROM candidates WHERE url = ?1", params![url])
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => {
                let id: String = row.get(0).map_err(db_err)?;
                Ok(Some(parse_candidate_id(&id)?))
            }
            None => Ok(None),
        }
    }

    /// Get a candidate by id.
    pub async fn get(&self, id: &CandidateId) -> Result<Option<Candidate>> {
        let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE id = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![id.to_string()])
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_candidate(&row)?)),
            None => Ok(None),
        }
    }

    /// Get a candidate by its normalized URL.
    pub async fn get_by_url(&self, url: &str) -> Result<Option<Candidate>> {
        let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE url = ?1");
        let mut rows = self.conn.query(&sql, params![url]).await.map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_candidate(&row)?)),
            None => Ok(None),
        }
    }

    /// All recorded sightings of a candidate.
    pub async fn provenance(&self, id: &CandidateId) -> Result<Vec<Provenance>> {
        let mut rows = self
            .conn
            .query(
                "SELECT origin_document_id, ordinal FROM candidate_provenance
                 WHERE candidate_id = ?1 ORDER BY seen_at, origin_document_id, ordinal",
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(Provenance {
                origin_document_id: row.get(0).map_err(db_err)?,
                ordinal: row.get(1).map_err(db_err)?,
            });
        }
        Ok(results)
    }

    /// Apply a partial update unconditionally. Returns the new state.
    pub async fn update(&self, id: &CandidateId, update: &CandidateUpdate) -> Result<Candidate> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| RefScoutError::InvalidState(format!("unknown candidate {id}")))?;
        self.transition(id, current.scan_status, update)
            .await?
            .ok_or_else(|| {
                RefScoutError::InvalidState(format!("candidate {id} changed during update"))
            })
    }

    /// Apply a partial update only if the candidate is still in `expected`.
    ///
    /// Returns `None` when another writer moved the candidate first. The
    /// merged state must satisfy the lifecycle invariants.
    pub async fn transition(
        &self,
        id: &CandidateId,
        expected: ScanStatus,
        update: &CandidateUpdate,
    ) -> Result<Option<Candidate>> {
        self.compare_and_set(id, expected, None, update).await
    }

    /// Like [`Storage::transition`], but also requires the lease taken by the
    /// claim that returned `generation`.
    ///
    /// Returns `None` when the lease was reclaimed, even if a later claim has
    /// since put the candidate back into `expected`.
    pub async fn transition_leased(
        &self,
        id: &CandidateId,
        expected: ScanStatus,
        generation: u32,
        update: &CandidateUpdate,
    ) -> Result<Option<Candidate>> {
        self.compare_and_set(id, expected, Some(generation), update).await
    }

    async fn compare_and_set(
        &self,
        id: &CandidateId,
        expected: ScanStatus,
        generation: Option<u32>,
        update: &CandidateUpdate,
    ) -> Result<Option<Candidate>> {
        self.check_writable()?;
        let Some(current) = self.get(id).await? else {
            return Err(RefScoutError::InvalidState(format!("unknown candidate {id}")));
        };
        if current.scan_status != expected {
            return Ok(None);
        }
        let generation = generation.unwrap_or(current.lease_generation);
        if current.lease_generation != generation {
            return Ok(None);
        }

        let next = update.apply(&current);
        next.check_invariants()?;

        let changed = self
            .conn
            .execute(
                "UPDATE candidates SET
                   scan_status = ?1,
                   verification_status = ?2,
                   relevance_decision = ?3,
                   priority_score = ?4,
                   attempts = ?5,
                   last_attempt_at = ?6,
                   lease_at = ?7,
                   error_kind = ?8,
                   denial_detail = ?9
                 WHERE id = ?10 AND scan_status = ?11 AND lease_generation = ?12",
                params![
                    next.scan_status.as_str(),
                    next.verification_status.as_str(),
                    next.relevance_decision.map(|d| d.as_str()),
                    next.priority_score,
                    next.attempts,
                    next.last_attempt_at.map(timestamp),
                    next.lease_at.map(timestamp),
                    next.error_kind.map(|k| k.as_str()),
                    next.denial_detail.clone(),
                    id.to_string(),
                    expected.as_str(),
                    generation,
                ],
            )
            .await
            .map_err(db_err)?;

        Ok((changed == 1).then_some(next))
    }

    /// Claim a candidate for processing: `not_scanned → verifying`.
    ///
    /// Succeeds for exactly one caller, returning the new lease generation;
    /// everyone else sees `None`.
    pub async fn claim(&self, id: &CandidateId, now: DateTime<Utc>, max_attempts: u32) -> Result<Option<u32>> {
        self.check_writable()?;
        let now = timestamp(now);
        let mut rows = self
            .conn
            .query(
                "UPDATE candidates SET
                   scan_status = 'verifying',
                   lease_at = ?2,
                   last_attempt_at = ?2,
                   lease_generation = lease_generation + 1
                 WHERE id = ?1 AND scan_status = 'not_scanned' AND attempts < ?3
                 RETURNING lease_generation",
                params![id.to_string(), now.as_str(), max_attempts],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row.get::<u32>(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    /// Frontier candidates in ranking order: priority (unscored candidates
    /// rank at the default), then earliest discovery.
    pub async fn ranked_eligible(&self, filter: &EligibilityFilter, limit: usize) -> Result<Vec<Candidate>> {
        let excluded = serde_json::to_string(&filter.excluded_hosts)
            .map_err(|e| RefScoutError::Storage(e.to_string()))?;
        let sql = format!(
            "SELECT {CANDIDATE_COLUMNS} FROM candidates
             WHERE scan_status = 'not_scanned'
               AND attempts < ?1
               AND host NOT IN (SELECT value FROM json_each(?2))
             ORDER BY COALESCE(priority_score, ?3) DESC, discovered_at ASC, rowid ASC
             LIMIT ?4"
        );
        let mut rows = self
            .conn
            .query(
                &sql,
                params![filter.max_attempts, excluded, filter.default_priority, limit as i64],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_candidate(&row)?);
        }
        Ok(results)
    }

    /// The single best eligible candidate, if any. A query, not a claim.
    pub async fn next_eligible(&self, filter: &EligibilityFilter) -> Result<Option<Candidate>> {
        Ok(self.ranked_eligible(filter, 1).await?.into_iter().next())
    }

    /// Candidates that are still attemptable, ignoring host cooldowns.
    pub async fn pending_count(&self, max_attempts: u32) -> Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM candidates WHERE scan_status = 'not_scanned' AND attempts < ?1",
            params![max_attempts],
        )
        .await
    }

    /// Candidates currently holding a lease.
    pub async fn leased_count(&self) -> Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM candidates WHERE scan_status IN ('verifying', 'scanning')",
            params![],
        )
        .await
    }

    /// Return candidates whose lease is older than `cutoff` to the frontier.
    ///
    /// The reclaim counts as an attempt; candidates that run out of attempts
    /// are denied with `retries_exhausted` instead of being requeued.
    pub async fn reclaim_stale_leases(&self, cutoff: DateTime<Utc>, max_attempts: u32) -> Result<ReclaimReport> {
        self.check_writable()?;
        let cutoff = timestamp(cutoff);

        let exhausted = self
            .conn
            .execute(
                "UPDATE candidates SET
                   scan_status = 'scanned',
                   relevance_decision = 'denied',
                   attempts = attempts + 1,
                   lease_at = NULL,
                   error_kind = 'retries_exhausted',
                   denial_detail = 'lease expired on final attempt'
                 WHERE scan_status IN ('verifying', 'scanning')
                   AND lease_at < ?1
                   AND attempts + 1 >= ?2",
                params![cutoff.as_str(), max_attempts],
            )
            .await
            .map_err(db_err)?;

        let requeued = self
            .conn
            .execute(
                "UPDATE candidates SET
                   scan_status = 'not_scanned',
                   verification_status = 'pending',
                   attempts = attempts + 1,
                   lease_at = NULL,
                   error_kind = 'lease_expired',
                   denial_detail = 'lease expired'
                 WHERE scan_status IN ('verifying', 'scanning')
                   AND lease_at < ?1",
                params![cutoff.as_str()],
            )
            .await
            .map_err(db_err)?;

        if exhausted + requeued > 0 {
            tracing::warn!(requeued, exhausted, "reclaimed stale leases");
        }
        Ok(ReclaimReport { requeued, exhausted })
    }

    /// Re-admit denied candidates whose recorded score is at least
    /// `min_score` and whose denial was a relevance verdict.
    pub async fn reprocess_denied(&self, min_score: f64) -> Result<u64> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE candidates SET
                   scan_status = 'not_scanned',
                   verification_status = 'pending',
                   relevance_decision = NULL,
                   attempts = 0,
                   lease_at = NULL,
                   error_kind = NULL,
                   denial_detail = NULL
                 WHERE scan_status = 'scanned'
                   AND relevance_decision = 'denied'
                   AND priority_score >= ?1
                   AND (error_kind IS NULL OR error_kind = ?2)",
                params![min_score, ErrorKind::LowRelevance.as_str()],
            )
            .await
            .map_err(db_err)?;
        tracing::info!(min_score, readmitted = changed, "reprocess sweep finished");
        Ok(changed)
    }

    /// Candidate counts per lifecycle state.
    pub async fn status_counts(&self) -> Result<StatusCounts> {
        let mut rows = self
            .conn
            .query(
                "SELECT scan_status, relevance_decision, COUNT(*) FROM candidates
                 GROUP BY scan_status, relevance_decision",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut counts = StatusCounts::default();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let status: String = row.get(0).map_err(db_err)?;
            let decision: Option<String> = row.get::<String>(1).ok();
            let n = row.get::<i64>(2).map_err(db_err)? as u64;
            match (status.as_str(), decision.as_deref()) {
                ("not_scanned", _) => counts.not_scanned += n,
                ("verifying", _) => counts.verifying += n,
                ("scanning", _) => counts.scanning += n,
                ("scanned", Some("saved")) => counts.saved += n,
                ("scanned", _) => counts.denied += n,
                (other, _) => {
                    return Err(RefScoutError::InvalidState(format!(
                        "unknown scan_status '{other}'"
                    )));
                }
            }
        }
        Ok(counts)
    }

    /// Denied candidates grouped by recorded reason, most frequent first.
    pub async fn denial_breakdown(&self) -> Result<Vec<(String, u64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(error_kind, 'unspecified'), COUNT(*) FROM candidates
                 WHERE relevance_decision = 'denied'
                 GROUP BY 1 ORDER BY 2 DESC, 1",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let kind: String = row.get(0).map_err(db_err)?;
            let n = row.get::<i64>(1).map_err(db_err)? as u64;
            results.push((kind, n));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Content Store
    // -----------------------------------------------------------------------

    /// Store accepted content keyed by normalized URL.
    ///
    /// A second write for the same URL keeps the first record and reports
    /// `created = false`.
    pub async fn upsert_content(&self, record: &ContentRecord) -> Result<ContentUpsert> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let inserted = self
            .conn
            .execute(
                "INSERT INTO content
                   (id, url, candidate_id, title, body_text, content_hash, char_len,
                    paragraph_count, priority_score, is_relevant, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(url) DO NOTHING",
                params![
                    id.as_str(),
                    record.url.as_str(),
                    record.candidate_id.to_string(),
                    record.title.as_deref(),
                    record.body_text.as_str(),
                    record.content_hash.as_str(),
                    record.char_len as i64,
                    record.paragraph_count as i64,
                    record.priority_score,
                    bool_to_int(record.is_relevant),
                    timestamp(Utc::now()),
                ],
            )
            .await
            .map_err(db_err)?;

        if inserted == 1 {
            return Ok(ContentUpsert {
                content_id: id,
                created: true,
            });
        }

        let mut rows = self
            .conn
            .query("SELECT id FROM content WHERE url = ?1", params![record.url.as_str()])
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(ContentUpsert {
                content_id: row.get(0).map_err(db_err)?,
                created: false,
            }),
            None => Err(RefScoutError::InvalidState(format!(
                "content for {} vanished",
                record.url
            ))),
        }
    }

    /// Number of stored content records.
    pub async fn content_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM content", params![]).await
    }

    // -----------------------------------------------------------------------
    // Notification outbox
    // -----------------------------------------------------------------------

    /// Queue a downstream notification for stored content.
    pub async fn insert_notification(&self, content_id: &str, kind: &str, url: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO notifications (content_id, kind, url, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![content_id, kind, url, timestamp(Utc::now())],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Undelivered notifications, oldest first.
    pub async fn pending_notifications(&self, limit: u32) -> Result<Vec<NotificationRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, content_id, kind, url, created_at FROM notifications
                 WHERE delivered_at IS NULL ORDER BY id LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(NotificationRecord {
                id: row.get(0).map_err(db_err)?,
                content_id: row.get(1).map_err(db_err)?,
                kind: row.get(2).map_err(db_err)?,
                url: row.get(3).map_err(db_err)?,
                created_at: row.get(4).map_err(db_err)?,
            });
        }
        Ok(results)
    }

    async fn count(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<u64> {
        let mut rows = self.conn.query(sql, params).await.map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(db_err)? as u64),
            None => Ok(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn db_err(e: libsql::Error) -> RefScoutError {
    RefScoutError::Storage(e.to_string())
}

fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RefScoutError::Storage(format!("invalid date '{s}': {e}")))
}

fn parse_optional_timestamp(row: &libsql::Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    row.get::<String>(idx)
        .ok()
        .map(|s| parse_timestamp(&s))
        .transpose()
}

fn parse_candidate_id(s: &str) -> Result<CandidateId> {
    s.parse()
        .map_err(|e| RefScoutError::Storage(format!("invalid candidate id '{s}': {e}")))
}

/// Convert a database row to an [`OriginDocument`].
fn row_to_origin(row: &libsql::Row) -> Result<OriginDocument> {
    Ok(OriginDocument {
        id: row.get::<String>(0).map_err(db_err)?,
        url: row.get::<String>(1).map_err(db_err)?,
        host: row.get::<String>(2).map_err(db_err)?,
        contested: row.get::<i64>(3).map_err(db_err)? != 0,
        last_seeded_at: parse_optional_timestamp(row, 4)?,
        link_count: row.get::<u32>(5).unwrap_or(0),
    })
}

/// Convert a database row to a [`Candidate`] (columns in `CANDIDATE_COLUMNS` order).
fn row_to_candidate(row: &libsql::Row) -> Result<Candidate> {
    let id: String = row.get(0).map_err(db_err)?;
    let scan_status: String = row.get(8).map_err(db_err)?;
    let verification_status: String = row.get(9).map_err(db_err)?;

    Ok(Candidate {
        id: parse_candidate_id(&id)?,
        url: row.get::<String>(1).map_err(db_err)?,
        origin_document_id: row.get::<String>(2).map_err(db_err)?,
        source_ordinal: row.get::<u32>(3).map_err(db_err)?,
        host: row.get::<String>(4).map_err(db_err)?,
        class_key: row.get::<String>(5).map_err(db_err)?,
        contested: row.get::<i64>(6).map_err(db_err)? != 0,
        discovered_at: parse_timestamp(&row.get::<String>(7).map_err(db_err)?)?,
        scan_status: scan_status.parse()?,
        verification_status: verification_status.parse()?,
        relevance_decision: row
            .get::<String>(10)
            .ok()
            .map(|s| s.parse())
            .transpose()?,
        priority_score: row.get::<f64>(11).ok(),
        attempts: row.get::<u32>(12).map_err(db_err)?,
        last_attempt_at: parse_optional_timestamp(row, 13)?,
        lease_at: parse_optional_timestamp(row, 14)?,
        error_kind: row.get::<String>(15).ok().map(|s| s.parse()).transpose()?,
        denial_detail: row.get::<String>(16).ok(),
        lease_generation: row.get::<u32>(17).map_err(db_err)?,
    })
}
