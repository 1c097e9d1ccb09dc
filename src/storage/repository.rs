//! Repository traits and the SQLite implementation
//!
//! Trait-based repositories decouple pipeline logic from storage, so tests
//! can run against in-memory SQLite or plain mocks. The single [`Database`]
//! type implements every store trait over one WAL-mode connection.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::models::{
    Confidence, HeuristicsState, Impact, LearningEvent, ProductionOfc, ProductionVulnerability,
    StagedLink, StagedOfc, StagedVulnerability, Submission, SubmissionStatus, VulnerabilityOfcLink,
};
use crate::models::CandidateRecord;
use crate::taxonomy::{SectorNode, TaxonomyStore};

// ============================================================================
// Store Traits
// ============================================================================

/// Staging-side operations: submissions and their staged children
pub trait SubmissionStore: Send + Sync {
    /// Insert a submission with all staged children in one batch
    fn insert_staged(
        &self,
        submission: &Submission,
        vulnerabilities: &[StagedVulnerability],
        ofcs: &[StagedOfc],
        links: &[StagedLink],
    ) -> Result<()>;

    fn get_submission(&self, id: Uuid) -> Result<Option<Submission>>;

    fn list_by_status(&self, status: SubmissionStatus) -> Result<Vec<Submission>>;

    fn staged_vulnerabilities(&self, submission_id: Uuid) -> Result<Vec<StagedVulnerability>>;

    fn staged_ofcs(&self, submission_id: Uuid) -> Result<Vec<StagedOfc>>;

    fn staged_links(&self, submission_id: Uuid) -> Result<Vec<StagedLink>>;

    fn set_status(
        &self,
        id: Uuid,
        status: SubmissionStatus,
        reviewer: Option<&str>,
    ) -> Result<()>;

    /// Delete the submission and cascade to all staged children
    fn delete_cascade(&self, id: Uuid) -> Result<()>;
}

/// Production-side operations: canonical vulnerabilities, OFCs, links
pub trait ProductionStore: Send + Sync {
    fn find_vulnerability_by_key(&self, key: &str) -> Result<Option<ProductionVulnerability>>;

    fn insert_vulnerability(&self, vulnerability: &ProductionVulnerability) -> Result<()>;

    fn insert_ofc(&self, ofc: &ProductionOfc) -> Result<()>;

    fn insert_link(&self, link: &VulnerabilityOfcLink) -> Result<()>;

    /// Bounded, most-recent-first sample of production records for dedup
    /// comparison. Each record carries its first linked OFC text when one
    /// exists.
    fn reference_records(&self, limit: usize) -> Result<Vec<CandidateRecord>>;

    fn count_vulnerabilities(&self) -> Result<usize>;
}

/// Append-only learning event log plus best-effort cycle statistics
pub trait LearningStore: Send + Sync {
    fn append_event(&self, event: &LearningEvent) -> Result<()>;

    fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<LearningEvent>>;

    /// Most recent events, newest first, preferring the given document
    fn recent_events(&self, document_hint: &str, limit: usize) -> Result<Vec<LearningEvent>>;

    fn save_cycle_stats(&self, at: DateTime<Utc>, accept_rate: f64, total: usize) -> Result<()>;
}

/// Heuristics singleton persistence
pub trait HeuristicsStore: Send + Sync {
    /// Load the persisted state, or defaults on first run
    fn load(&self) -> Result<HeuristicsState>;

    fn save(&self, state: &HeuristicsState) -> Result<()>;
}

/// Taxonomy node persistence (read-mostly)
pub trait TaxonomyRepository: Send + Sync {
    fn seed(&self, store: &TaxonomyStore) -> Result<()>;

    fn load(&self) -> Result<TaxonomyStore>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite database implementing every store trait.
///
/// Uses a `Mutex` for connection thread-safety; the pipeline is
/// single-document-sequential so contention is not a concern.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite database initialized");
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_schema()?;
        Ok(db)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS submissions (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'pending_review',
                source_document TEXT NOT NULL,
                model_version TEXT NOT NULL,
                created_at TEXT NOT NULL,
                reviewed_at TEXT,
                reviewer TEXT
            );

            CREATE TABLE IF NOT EXISTS staged_vulnerabilities (
                id TEXT PRIMARY KEY,
                submission_id TEXT NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
                text TEXT NOT NULL,
                discipline TEXT,
                sector TEXT,
                subsector TEXT,
                confidence TEXT,
                impact TEXT,
                source_title TEXT NOT NULL,
                source_url TEXT,
                source_page INTEGER,
                dedupe_key TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS staged_ofcs (
                id TEXT PRIMARY KEY,
                submission_id TEXT NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
                text TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS staged_links (
                vulnerability_id TEXT NOT NULL REFERENCES staged_vulnerabilities(id) ON DELETE CASCADE,
                ofc_id TEXT NOT NULL REFERENCES staged_ofcs(id) ON DELETE CASCADE,
                link_type TEXT NOT NULL,
                confidence_score REAL NOT NULL,
                PRIMARY KEY (vulnerability_id, ofc_id)
            );

            CREATE INDEX IF NOT EXISTS idx_staged_vuln_submission
                ON staged_vulnerabilities(submission_id);

            CREATE INDEX IF NOT EXISTS idx_staged_ofc_submission
                ON staged_ofcs(submission_id);

            CREATE TABLE IF NOT EXISTS production_vulnerabilities (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                discipline TEXT,
                sector TEXT,
                subsector TEXT,
                impact TEXT,
                dedupe_key TEXT UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS production_ofcs (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vulnerability_ofc_links (
                vulnerability_id TEXT NOT NULL REFERENCES production_vulnerabilities(id),
                ofc_id TEXT NOT NULL REFERENCES production_ofcs(id),
                link_type TEXT NOT NULL,
                confidence_score REAL NOT NULL,
                PRIMARY KEY (vulnerability_id, ofc_id)
            );

            CREATE INDEX IF NOT EXISTS idx_production_vuln_key
                ON production_vulnerabilities(dedupe_key);

            CREATE TABLE IF NOT EXISTS learning_events (
                id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                approved INTEGER NOT NULL,
                confidence_score REAL,
                source_document TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT 'null',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_learning_events_created
                ON learning_events(created_at);

            CREATE TABLE IF NOT EXISTS learning_cycle_stats (
                cycle_at TEXT PRIMARY KEY,
                accept_rate REAL NOT NULL,
                total_events INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS heuristics_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                confidence_threshold REAL NOT NULL,
                high_confidence_threshold REAL NOT NULL,
                last_updated TEXT NOT NULL,
                adjustment_history TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sectors (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS subsectors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sector_id INTEGER NOT NULL REFERENCES sectors(id),
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS disciplines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );
            "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }
}

fn parse_uuid(s: String) -> Result<Uuid> {
    Uuid::parse_str(&s).with_context(|| format!("invalid UUID in database: {s}"))
}

fn parse_timestamp(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SubmissionStore for Database {
    fn insert_staged(
        &self,
        submission: &Submission,
        vulnerabilities: &[StagedVulnerability],
        ofcs: &[StagedOfc],
        links: &[StagedLink],
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO submissions (id, status, source_document, model_version, created_at, reviewed_at, reviewer)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                submission.id.to_string(),
                submission.status.as_str(),
                submission.source_document,
                submission.model_version,
                submission.created_at.to_rfc3339(),
                submission.reviewed_at.map(|t| t.to_rfc3339()),
                submission.reviewer,
            ],
        )?;

        for v in vulnerabilities {
            tx.execute(
                r#"
                INSERT INTO staged_vulnerabilities
                    (id, submission_id, text, discipline, sector, subsector, confidence, impact,
                     source_title, source_url, source_page, dedupe_key)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    v.id.to_string(),
                    v.submission_id.to_string(),
                    v.text,
                    v.discipline,
                    v.sector,
                    v.subsector,
                    v.confidence.map(|c| c.as_str()),
                    v.impact.map(|i| i.as_str()),
                    v.source_title,
                    v.source_url,
                    v.source_page,
                    v.dedupe_key,
                ],
            )?;
        }

        for o in ofcs {
            tx.execute(
                "INSERT INTO staged_ofcs (id, submission_id, text) VALUES (?1, ?2, ?3)",
                params![o.id.to_string(), o.submission_id.to_string(), o.text],
            )?;
        }

        for l in links {
            tx.execute(
                r#"
                INSERT INTO staged_links (vulnerability_id, ofc_id, link_type, confidence_score)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    l.vulnerability_id.to_string(),
                    l.ofc_id.to_string(),
                    l.link_type.as_str(),
                    l.confidence_score,
                ],
            )?;
        }

        tx.commit().context("Failed to commit staged submission")?;
        Ok(())
    }

    fn get_submission(&self, id: Uuid) -> Result<Option<Submission>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, status, source_document, model_version, created_at, reviewed_at, reviewer
                 FROM submissions WHERE id = ?1",
                params![id.to_string()],
                row_to_submission,
            )
            .optional()
            .context("Failed to get submission")?;

        Ok(row)
    }

    fn list_by_status(&self, status: SubmissionStatus) -> Result<Vec<Submission>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, status, source_document, model_version, created_at, reviewed_at, reviewer
             FROM submissions WHERE status = ?1 ORDER BY created_at DESC",
        )?;

        let submissions = stmt
            .query_map(params![status.as_str()], row_to_submission)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(submissions)
    }

    fn staged_vulnerabilities(&self, submission_id: Uuid) -> Result<Vec<StagedVulnerability>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, submission_id, text, discipline, sector, subsector, confidence, impact,
                   source_title, source_url, source_page, dedupe_key
            FROM staged_vulnerabilities WHERE submission_id = ?1 ORDER BY rowid
            "#,
        )?;

        let rows = stmt
            .query_map(params![submission_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, Option<u32>>(10)?,
                    row.get::<_, String>(11)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, sub_id, text, discipline, sector, subsector, confidence, impact, title, url, page, key)| {
                    Ok(StagedVulnerability {
                        id: parse_uuid(id)?,
                        submission_id: parse_uuid(sub_id)?,
                        text,
                        discipline,
                        sector,
                        subsector,
                        confidence: confidence.as_deref().and_then(Confidence::parse),
                        impact: impact.as_deref().and_then(Impact::parse),
                        source_title: title,
                        source_url: url,
                        source_page: page,
                        dedupe_key: key,
                    })
                },
            )
            .collect()
    }

    fn staged_ofcs(&self, submission_id: Uuid) -> Result<Vec<StagedOfc>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, submission_id, text FROM staged_ofcs WHERE submission_id = ?1 ORDER BY rowid",
        )?;

        let rows = stmt
            .query_map(params![submission_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, sub_id, text)| {
                Ok(StagedOfc {
                    id: parse_uuid(id)?,
                    submission_id: parse_uuid(sub_id)?,
                    text,
                })
            })
            .collect()
    }

    fn staged_links(&self, submission_id: Uuid) -> Result<Vec<StagedLink>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT l.vulnerability_id, l.ofc_id, l.link_type, l.confidence_score
            FROM staged_links l
            JOIN staged_vulnerabilities v ON v.id = l.vulnerability_id
            WHERE v.submission_id = ?1
            "#,
        )?;

        let rows = stmt
            .query_map(params![submission_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(vuln_id, ofc_id, link_type, score)| {
                Ok(StagedLink {
                    vulnerability_id: parse_uuid(vuln_id)?,
                    ofc_id: parse_uuid(ofc_id)?,
                    link_type: link_type
                        .parse()
                        .map_err(|e: String| anyhow::anyhow!(e))?,
                    confidence_score: score,
                })
            })
            .collect()
    }

    fn set_status(
        &self,
        id: Uuid,
        status: SubmissionStatus,
        reviewer: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE submissions SET status = ?1, reviewed_at = ?2, reviewer = ?3 WHERE id = ?4",
            params![
                status.as_str(),
                Utc::now().to_rfc3339(),
                reviewer,
                id.to_string()
            ],
        )
        .context("Failed to update submission status")?;
        Ok(())
    }

    fn delete_cascade(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        // Foreign keys cascade staged children
        conn.execute(
            "DELETE FROM submissions WHERE id = ?1",
            params![id.to_string()],
        )
        .context("Failed to delete submission")?;
        Ok(())
    }
}

fn row_to_submission(row: &rusqlite::Row<'_>) -> rusqlite::Result<Submission> {
    let id: String = row.get(0)?;
    let status: String = row.get(1)?;
    Ok(Submission {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        status: status.parse().unwrap_or(SubmissionStatus::PendingReview),
        source_document: row.get(2)?,
        model_version: row.get(3)?,
        created_at: parse_timestamp(row.get(4)?),
        reviewed_at: row.get::<_, Option<String>>(5)?.map(parse_timestamp),
        reviewer: row.get(6)?,
    })
}

impl ProductionStore for Database {
    fn find_vulnerability_by_key(&self, key: &str) -> Result<Option<ProductionVulnerability>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                r#"
                SELECT id, text, discipline, sector, subsector, impact, dedupe_key, created_at
                FROM production_vulnerabilities WHERE dedupe_key = ?1
                "#,
                params![key],
                row_to_production_vulnerability,
            )
            .optional()
            .context("Failed to look up vulnerability by dedupe key")?;

        Ok(row)
    }

    fn insert_vulnerability(&self, vulnerability: &ProductionVulnerability) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO production_vulnerabilities
                (id, text, discipline, sector, subsector, impact, dedupe_key, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                vulnerability.id.to_string(),
                vulnerability.text,
                vulnerability.discipline,
                vulnerability.sector,
                vulnerability.subsector,
                vulnerability.impact.map(|i| i.as_str()),
                vulnerability.dedupe_key,
                vulnerability.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert production vulnerability")?;
        Ok(())
    }

    fn insert_ofc(&self, ofc: &ProductionOfc) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO production_ofcs (id, text, created_at) VALUES (?1, ?2, ?3)",
            params![ofc.id.to_string(), ofc.text, ofc.created_at.to_rfc3339()],
        )
        .context("Failed to insert production OFC")?;
        Ok(())
    }

    fn insert_link(&self, link: &VulnerabilityOfcLink) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO vulnerability_ofc_links
                (vulnerability_id, ofc_id, link_type, confidence_score)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                link.vulnerability_id.to_string(),
                link.ofc_id.to_string(),
                link.link_type.as_str(),
                link.confidence_score,
            ],
        )
        .context("Failed to insert vulnerability/OFC link")?;
        Ok(())
    }

    fn reference_records(&self, limit: usize) -> Result<Vec<CandidateRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT v.text, v.dedupe_key,
                   (SELECT o.text FROM production_ofcs o
                    JOIN vulnerability_ofc_links l ON l.ofc_id = o.id
                    WHERE l.vulnerability_id = v.id
                    ORDER BY o.created_at LIMIT 1)
            FROM production_vulnerabilities v
            ORDER BY v.created_at DESC
            LIMIT ?1
            "#,
        )?;

        let records = stmt
            .query_map(params![limit as i64], |row| {
                let text: String = row.get(0)?;
                let key: String = row.get(1)?;
                let first_ofc: Option<String> = row.get(2)?;
                Ok(CandidateRecord {
                    text,
                    ofc_texts: first_ofc.into_iter().collect(),
                    dedupe_key: key,
                    ..Default::default()
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn count_vulnerabilities(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM production_vulnerabilities",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn row_to_production_vulnerability(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<ProductionVulnerability> {
    let id: String = row.get(0)?;
    let impact: Option<String> = row.get(5)?;
    Ok(ProductionVulnerability {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        text: row.get(1)?,
        discipline: row.get(2)?,
        sector: row.get(3)?,
        subsector: row.get(4)?,
        impact: impact.as_deref().and_then(Impact::parse),
        dedupe_key: row.get(6)?,
        created_at: parse_timestamp(row.get(7)?),
    })
}

impl LearningStore for Database {
    fn append_event(&self, event: &LearningEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO learning_events
                (id, event_type, approved, confidence_score, source_document, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                event.id.to_string(),
                event.event_type.as_str(),
                event.approved,
                event.confidence_score,
                event.source_document,
                serde_json::to_string(&event.metadata)?,
                event.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to append learning event")?;
        Ok(())
    }

    fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<LearningEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, event_type, approved, confidence_score, source_document, metadata, created_at
            FROM learning_events WHERE created_at > ?1 ORDER BY created_at
            "#,
        )?;

        let events = stmt
            .query_map(params![since.to_rfc3339()], row_to_learning_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }

    fn recent_events(&self, document_hint: &str, limit: usize) -> Result<Vec<LearningEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, event_type, approved, confidence_score, source_document, metadata, created_at
            FROM learning_events
            ORDER BY CASE WHEN source_document = ?1 THEN 0 ELSE 1 END, created_at DESC
            LIMIT ?2
            "#,
        )?;

        let events = stmt
            .query_map(params![document_hint, limit as i64], row_to_learning_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }

    fn save_cycle_stats(&self, at: DateTime<Utc>, accept_rate: f64, total: usize) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO learning_cycle_stats (cycle_at, accept_rate, total_events)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(cycle_at) DO UPDATE SET
                accept_rate = excluded.accept_rate,
                total_events = excluded.total_events
            "#,
            params![at.to_rfc3339(), accept_rate, total as i64],
        )
        .context("Failed to save cycle statistics")?;
        Ok(())
    }
}

fn row_to_learning_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<LearningEvent> {
    let id: String = row.get(0)?;
    let event_type: String = row.get(1)?;
    let metadata: String = row.get(5)?;
    Ok(LearningEvent {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        event_type: event_type
            .parse()
            .unwrap_or(crate::models::LearningEventType::Approval),
        approved: row.get(2)?,
        confidence_score: row.get(3)?,
        source_document: row.get(4)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: parse_timestamp(row.get(6)?),
    })
}

impl HeuristicsStore for Database {
    fn load(&self) -> Result<HeuristicsState> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                r#"
                SELECT confidence_threshold, high_confidence_threshold, last_updated, adjustment_history
                FROM heuristics_state WHERE id = 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("Failed to load heuristics state")?;

        match row {
            Some((threshold, high, updated, history)) => Ok(HeuristicsState {
                confidence_threshold: threshold,
                high_confidence_threshold: high,
                last_updated: parse_timestamp(updated),
                adjustment_history: serde_json::from_str(&history).unwrap_or_default(),
            }),
            None => Ok(HeuristicsState::default()),
        }
    }

    fn save(&self, state: &HeuristicsState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO heuristics_state
                (id, confidence_threshold, high_confidence_threshold, last_updated, adjustment_history)
            VALUES (1, ?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                confidence_threshold = excluded.confidence_threshold,
                high_confidence_threshold = excluded.high_confidence_threshold,
                last_updated = excluded.last_updated,
                adjustment_history = excluded.adjustment_history
            "#,
            params![
                state.confidence_threshold,
                state.high_confidence_threshold,
                state.last_updated.to_rfc3339(),
                serde_json::to_string(&state.adjustment_history)?,
            ],
        )
        .context("Failed to save heuristics state")?;
        Ok(())
    }
}

impl TaxonomyRepository for Database {
    fn seed(&self, store: &TaxonomyStore) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for sector in store.sectors() {
            tx.execute(
                "INSERT OR IGNORE INTO sectors (id, name, active) VALUES (?1, ?2, ?3)",
                params![sector.id, sector.name, sector.active],
            )?;
            for subsector in &sector.subsectors {
                tx.execute(
                    r#"
                    INSERT INTO subsectors (sector_id, name)
                    SELECT ?1, ?2
                    WHERE NOT EXISTS (
                        SELECT 1 FROM subsectors WHERE sector_id = ?1 AND name = ?2
                    )
                    "#,
                    params![sector.id, subsector],
                )?;
            }
        }

        for discipline in store.disciplines() {
            tx.execute(
                "INSERT OR IGNORE INTO disciplines (name) VALUES (?1)",
                params![discipline],
            )?;
        }

        tx.commit().context("Failed to seed taxonomy")?;
        Ok(())
    }

    fn load(&self) -> Result<TaxonomyStore> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare("SELECT id, name, active FROM sectors ORDER BY id")?;
        let mut sectors = stmt
            .query_map([], |row| {
                Ok(SectorNode {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    active: row.get(2)?,
                    subsectors: Vec::new(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut sub_stmt = conn.prepare("SELECT sector_id, name FROM subsectors ORDER BY id")?;
        let subsectors = sub_stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (sector_id, name) in subsectors {
            if let Some(sector) = sectors.iter_mut().find(|s| s.id == sector_id) {
                sector.subsectors.push(name);
            }
        }

        let mut disc_stmt = conn.prepare("SELECT name FROM disciplines ORDER BY id")?;
        let disciplines = disc_stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(TaxonomyStore::new(sectors, disciplines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LearningEventType, LinkType};

    fn staged_fixture(db: &Database) -> (Submission, StagedVulnerability, StagedOfc) {
        let submission = Submission::new("assessment.pdf", "model-1");
        let vuln = StagedVulnerability {
            id: Uuid::new_v4(),
            submission_id: submission.id,
            text: "Unsecured perimeter".to_string(),
            discipline: Some("Physical Security".to_string()),
            sector: Some("Education Facilities".to_string()),
            subsector: Some("K-12 Schools".to_string()),
            confidence: Some(Confidence::High),
            impact: Some(Impact::Moderate),
            source_title: "Assessment".to_string(),
            source_url: None,
            source_page: Some(4),
            dedupe_key: crate::models::dedupe_key("Unsecured perimeter", "Install fencing"),
        };
        let ofc = StagedOfc {
            id: Uuid::new_v4(),
            submission_id: submission.id,
            text: "Install fencing".to_string(),
        };
        let link = StagedLink {
            vulnerability_id: vuln.id,
            ofc_id: ofc.id,
            link_type: LinkType::Direct,
            confidence_score: 0.9,
        };
        db.insert_staged(&submission, &[vuln.clone()], &[ofc.clone()], &[link])
            .unwrap();
        (submission, vuln, ofc)
    }

    #[test]
    fn test_staged_round_trip() {
        let db = Database::in_memory().unwrap();
        let (submission, vuln, ofc) = staged_fixture(&db);

        let loaded = db.get_submission(submission.id).unwrap().unwrap();
        assert_eq!(loaded.status, SubmissionStatus::PendingReview);
        assert_eq!(loaded.source_document, "assessment.pdf");

        let vulns = db.staged_vulnerabilities(submission.id).unwrap();
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].id, vuln.id);
        assert_eq!(vulns[0].confidence, Some(Confidence::High));

        let ofcs = db.staged_ofcs(submission.id).unwrap();
        assert_eq!(ofcs.len(), 1);
        assert_eq!(ofcs[0].id, ofc.id);

        let links = db.staged_links(submission.id).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_type, LinkType::Direct);
    }

    #[test]
    fn test_delete_cascades_to_children() {
        let db = Database::in_memory().unwrap();
        let (submission, _, _) = staged_fixture(&db);

        db.delete_cascade(submission.id).unwrap();
        assert!(db.get_submission(submission.id).unwrap().is_none());
        assert!(db.staged_vulnerabilities(submission.id).unwrap().is_empty());
        assert!(db.staged_ofcs(submission.id).unwrap().is_empty());
    }

    #[test]
    fn test_production_dedupe_key_unique() {
        let db = Database::in_memory().unwrap();
        let key = crate::models::dedupe_key("Unsecured perimeter", "Install fencing");

        let first = ProductionVulnerability {
            id: Uuid::new_v4(),
            text: "Unsecured perimeter".to_string(),
            discipline: None,
            sector: None,
            subsector: None,
            impact: None,
            dedupe_key: Some(key.clone()),
            created_at: Utc::now(),
        };
        db.insert_vulnerability(&first).unwrap();

        let duplicate = ProductionVulnerability {
            id: Uuid::new_v4(),
            dedupe_key: Some(key.clone()),
            ..first.clone()
        };
        assert!(db.insert_vulnerability(&duplicate).is_err());

        let found = db.find_vulnerability_by_key(&key).unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[test]
    fn test_reference_records_bounded_with_first_ofc() {
        let db = Database::in_memory().unwrap();
        for i in 0..5 {
            let vuln = ProductionVulnerability {
                id: Uuid::new_v4(),
                text: format!("Vulnerability {i}"),
                discipline: None,
                sector: None,
                subsector: None,
                impact: None,
                dedupe_key: Some(format!("{i:064}")),
                created_at: Utc::now(),
            };
            db.insert_vulnerability(&vuln).unwrap();

            let ofc = ProductionOfc {
                id: Uuid::new_v4(),
                text: format!("Mitigation {i}"),
                created_at: Utc::now(),
            };
            db.insert_ofc(&ofc).unwrap();
            db.insert_link(&VulnerabilityOfcLink {
                vulnerability_id: vuln.id,
                ofc_id: ofc.id,
                link_type: LinkType::Direct,
                confidence_score: 1.0,
            })
            .unwrap();
        }

        let reference = db.reference_records(3).unwrap();
        assert_eq!(reference.len(), 3);
        assert!(reference.iter().all(|r| !r.ofc_texts.is_empty()));
        assert!(reference.iter().all(|r| r.dedupe_key.len() == 64));
    }

    #[test]
    fn test_learning_events_append_and_window() {
        let db = Database::in_memory().unwrap();
        let before = Utc::now() - chrono::Duration::seconds(5);

        let event = LearningEvent::new(LearningEventType::Approval, true, "doc.pdf");
        db.append_event(&event).unwrap();

        let events = db.events_since(before).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].approved);

        let none = db.events_since(Utc::now() + chrono::Duration::seconds(5)).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_heuristics_defaults_then_round_trip() {
        let db = Database::in_memory().unwrap();

        // First run: defaults
        let state = HeuristicsStore::load(&db).unwrap();
        assert!((state.confidence_threshold - 0.70).abs() < f64::EPSILON);

        let mut updated = state.clone();
        updated.record_adjustment(crate::models::ThresholdAdjustment {
            old_value: 0.70,
            new_value: 0.65,
            accept_rate: 0.92,
            reason: "accept rate above high-water mark".to_string(),
            adjusted_at: Utc::now(),
        });
        db.save(&updated).unwrap();

        let reloaded = HeuristicsStore::load(&db).unwrap();
        assert!((reloaded.confidence_threshold - 0.65).abs() < f64::EPSILON);
        assert_eq!(reloaded.adjustment_history.len(), 1);
    }

    #[test]
    fn test_taxonomy_seed_and_load() {
        let db = Database::in_memory().unwrap();
        db.seed(&TaxonomyStore::seeded()).unwrap();

        let loaded = TaxonomyRepository::load(&db).unwrap();
        assert_eq!(loaded.sectors().len(), 17);
        assert!(loaded.is_valid_pair("Education Facilities", Some("K-12 Schools")));
        assert!(!loaded.is_valid_pair("Education Facilities", Some("Courthouses")));

        // Seeding twice is a no-op
        db.seed(&TaxonomyStore::seeded()).unwrap();
        let reloaded = TaxonomyRepository::load(&db).unwrap();
        assert_eq!(reloaded.sectors().len(), 17);
    }
}
