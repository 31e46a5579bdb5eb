//! SQL migration definitions for the refscout database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: origin_documents, candidates, candidate_provenance",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Seed pages whose citations feed the frontier
CREATE TABLE IF NOT EXISTS origin_documents (
    id             TEXT PRIMARY KEY,
    url            TEXT NOT NULL UNIQUE,
    host           TEXT NOT NULL,
    contested      INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL,
    last_seeded_at TEXT,
    link_count     INTEGER NOT NULL DEFAULT 0
);

-- One row per normalized URL
CREATE TABLE IF NOT EXISTS candidates (
    id                  TEXT PRIMARY KEY,
    url                 TEXT NOT NULL UNIQUE,
    origin_document_id  TEXT NOT NULL REFERENCES origin_documents(id),
    source_ordinal      INTEGER NOT NULL,
    host                TEXT NOT NULL,
    class_key           TEXT NOT NULL,
    contested           INTEGER NOT NULL DEFAULT 0,
    discovered_at       TEXT NOT NULL,
    scan_status         TEXT NOT NULL DEFAULT 'not_scanned',
    verification_status TEXT NOT NULL DEFAULT 'pending',
    relevance_decision  TEXT,
    priority_score      REAL,
    attempts            INTEGER NOT NULL DEFAULT 0,
    last_attempt_at     TEXT,
    lease_at            TEXT,
    error_kind          TEXT,
    denial_detail       TEXT,
    CHECK (relevance_decision IS NULL OR scan_status = 'scanned')
);

CREATE INDEX IF NOT EXISTS idx_candidates_frontier
    ON candidates(scan_status, attempts, priority_score DESC, discovered_at);
CREATE INDEX IF NOT EXISTS idx_candidates_host ON candidates(host);
CREATE INDEX IF NOT EXISTS idx_candidates_lease ON candidates(scan_status, lease_at);

-- Every sighting of a candidate on an origin document
CREATE TABLE IF NOT EXISTS candidate_provenance (
    candidate_id       TEXT NOT NULL REFERENCES candidates(id),
    origin_document_id TEXT NOT NULL REFERENCES origin_documents(id),
    ordinal            INTEGER NOT NULL,
    seen_at            TEXT NOT NULL,
    UNIQUE(candidate_id, origin_document_id, ordinal)
);

CREATE INDEX IF NOT EXISTS idx_provenance_candidate ON candidate_provenance(candidate_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Content store and notification outbox",
            sql: r#"
-- Accepted content, deduplicated by normalized URL
CREATE TABLE IF NOT EXISTS content (
    id              TEXT PRIMARY KEY,
    url             TEXT NOT NULL UNIQUE,
    candidate_id    TEXT NOT NULL REFERENCES candidates(id),
    title           TEXT,
    body_text       TEXT NOT NULL,
    content_hash    TEXT NOT NULL,
    char_len        INTEGER NOT NULL,
    paragraph_count INTEGER NOT NULL,
    priority_score  REAL NOT NULL,
    is_relevant     INTEGER NOT NULL,
    created_at      TEXT NOT NULL
);

-- Downstream feed/enrich requests
CREATE TABLE IF NOT EXISTS notifications (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    content_id   TEXT NOT NULL REFERENCES content(id),
    kind         TEXT NOT NULL,
    url          TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    delivered_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_notifications_pending ON notifications(kind, delivered_at);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
        Migration {
            version: 3,
            description: "Lease generation counter on candidates",
            sql: r#"
ALTER TABLE candidates ADD COLUMN lease_generation INTEGER NOT NULL DEFAULT 0;

INSERT INTO schema_migrations (version) VALUES (3);
"#,
        },
    ]
}
