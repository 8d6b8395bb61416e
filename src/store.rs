use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::classify::rules::default_bucket_names;
use crate::model::{ClassificationResult, Document, JobUpdate, OcrStatus};
use crate::pipeline::ResultSink;
use crate::util::{ensure_directory, sha256_bytes};
use crate::worker::CaseRecords;

#[derive(Debug, Clone, Serialize)]
pub struct CaseSummary {
    pub case_id: String,
    pub name: String,
    pub client: Option<String>,
    pub created_at: DateTime<Utc>,
    pub document_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketRecord {
    pub bucket_id: i64,
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredDocument {
    pub document_id: String,
    pub case_id: Option<String>,
    pub bucket_id: Option<i64>,
    pub filename: String,
    pub ocr_status: String,
    pub ocr_confidence: Option<f64>,
    pub class_bucket_key: Option<String>,
    pub class_confidence: Option<i64>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub jobs_by_status: BTreeMap<String, i64>,
    pub documents_by_status: BTreeMap<String, i64>,
    pub documents_by_bucket: BTreeMap<String, i64>,
}

pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        configure_connection(&connection)?;
        ensure_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory database")?;
        ensure_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| anyhow!("case store connection lock poisoned"))
    }

    pub fn create_case(&self, name: &str, client: Option<&str>) -> Result<CaseSummary> {
        let created_at = Utc::now();
        let seed = format!(
            "{name}|{}|{}",
            client.unwrap_or_default(),
            created_at.timestamp_nanos_opt().unwrap_or_default()
        );
        let case_id = format!("case-{}", &sha256_bytes(seed.as_bytes())[..12]);

        let mut connection = self.lock()?;
        let tx = connection
            .transaction()
            .context("failed to start case transaction")?;
        tx.execute(
            "INSERT INTO cases (case_id, name, client, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![case_id, name, client, created_at],
        )
        .with_context(|| format!("failed to insert case {name}"))?;

        for (order_index, (key, bucket_name)) in default_bucket_names().into_iter().enumerate() {
            tx.execute(
                "INSERT INTO buckets (case_id, key, name, order_index) VALUES (?1, ?2, ?3, ?4)",
                params![case_id, key, bucket_name, order_index as i64],
            )
            .with_context(|| format!("failed to seed bucket {key}"))?;
        }
        tx.commit().context("failed to commit case")?;

        Ok(CaseSummary {
            case_id,
            name: name.to_string(),
            client: client.map(str::to_string),
            created_at,
            document_count: 0,
        })
    }

    pub fn list_cases(&self) -> Result<Vec<CaseSummary>> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "
            SELECT c.case_id, c.name, c.client, c.created_at, COUNT(d.document_id)
            FROM cases c
            LEFT JOIN documents d ON d.case_id = c.case_id
            GROUP BY c.case_id
            ORDER BY c.created_at, c.case_id
            ",
        )?;

        let mut rows = statement.query([])?;
        let mut cases = Vec::new();
        while let Some(row) = rows.next()? {
            cases.push(CaseSummary {
                case_id: row.get(0)?,
                name: row.get(1)?,
                client: row.get(2)?,
                created_at: row.get(3)?,
                document_count: row.get(4)?,
            });
        }
        Ok(cases)
    }

    pub fn case_exists(&self, case_id: &str) -> Result<bool> {
        let connection = self.lock()?;
        let found = connection
            .query_row(
                "SELECT 1 FROM cases WHERE case_id = ?1",
                params![case_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn buckets(&self, case_id: &str) -> Result<Vec<BucketRecord>> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "SELECT bucket_id, key, name FROM buckets WHERE case_id = ?1 ORDER BY order_index",
        )?;
        let mut rows = statement.query(params![case_id])?;
        let mut buckets = Vec::new();
        while let Some(row) = rows.next()? {
            buckets.push(BucketRecord {
                bucket_id: row.get(0)?,
                key: row.get(1)?,
                name: row.get(2)?,
            });
        }
        Ok(buckets)
    }

    // New documents start in the case's review bucket.
    pub fn register_document(
        &self,
        document: &Document,
        case_id: Option<&str>,
        sha256: &str,
    ) -> Result<()> {
        let connection = self.lock()?;
        let now = Utc::now();
        connection
            .execute(
                "
                INSERT INTO documents (
                  document_id, case_id, bucket_id, source_ref, filename, media_type,
                  sha256, ocr_status, created_at, updated_at
                )
                VALUES (
                  ?1, ?2,
                  (SELECT bucket_id FROM buckets WHERE case_id = ?2 AND key = 'da_classificare'),
                  ?3, ?4, ?5, ?6, 'pending', ?7, ?7
                )
                ON CONFLICT(document_id) DO UPDATE SET
                  source_ref = excluded.source_ref,
                  media_type = excluded.media_type,
                  sha256 = excluded.sha256,
                  ocr_status = 'pending',
                  updated_at = excluded.updated_at
                ",
                params![
                    document.document_id,
                    case_id,
                    document.source_ref,
                    document.filename,
                    document.media_type,
                    sha256,
                    now
                ],
            )
            .with_context(|| format!("failed to register document {}", document.filename))?;
        Ok(())
    }

    pub fn create_job(&self, job_id: &str, document_id: &str) -> Result<()> {
        let connection = self.lock()?;
        let now = Utc::now();
        connection
            .execute(
                "INSERT INTO jobs (job_id, document_id, status, progress, created_at, updated_at)
                 VALUES (?1, ?2, 'pending', 0, ?3, ?3)",
                params![job_id, document_id, now],
            )
            .with_context(|| format!("failed to create job {job_id}"))?;
        Ok(())
    }

    pub fn document(&self, document_id: &str) -> Result<Option<StoredDocument>> {
        let connection = self.lock()?;
        let document = connection
            .query_row(
                "
                SELECT document_id, case_id, bucket_id, filename, ocr_status, ocr_confidence,
                       class_bucket_key, class_confidence, tags
                FROM documents WHERE document_id = ?1
                ",
                params![document_id],
                |row| {
                    let tags: Option<String> = row.get(8)?;
                    Ok(StoredDocument {
                        document_id: row.get(0)?,
                        case_id: row.get(1)?,
                        bucket_id: row.get(2)?,
                        filename: row.get(3)?,
                        ocr_status: row.get(4)?,
                        ocr_confidence: row.get(5)?,
                        class_bucket_key: row.get(6)?,
                        class_confidence: row.get(7)?,
                        tags: tags
                            .and_then(|raw| serde_json::from_str(&raw).ok())
                            .unwrap_or_default(),
                    })
                },
            )
            .optional()?;
        Ok(document)
    }

    pub fn status_report(&self) -> Result<StatusReport> {
        let connection = self.lock()?;
        Ok(StatusReport {
            jobs_by_status: grouped_counts(
                &connection,
                "SELECT status, COUNT(*) FROM jobs GROUP BY status",
            )?,
            documents_by_status: grouped_counts(
                &connection,
                "SELECT ocr_status, COUNT(*) FROM documents GROUP BY ocr_status",
            )?,
            documents_by_bucket: grouped_counts(
                &connection,
                "
                SELECT COALESCE(b.key, '(none)'), COUNT(*)
                FROM documents d
                LEFT JOIN buckets b ON b.bucket_id = d.bucket_id
                GROUP BY 1
                ",
            )?,
        })
    }
}

impl ResultSink for SqliteStore {
    fn publish(&self, job_id: &str, update: &JobUpdate) -> Result<()> {
        let connection = self.lock()?;
        let now = Utc::now();
        connection
            .execute(
                "UPDATE jobs SET status = ?2, progress = ?3, error = ?4, updated_at = ?5 WHERE job_id = ?1",
                params![
                    job_id,
                    job_status(update.status),
                    i64::from(update.progress),
                    update.error,
                    now
                ],
            )
            .with_context(|| format!("failed to update job {job_id}"))?;

        let layout = update
            .layout
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to serialize layout")?;
        connection
            .execute(
                "
                UPDATE documents SET
                  ocr_status = ?2,
                  ocr_text = COALESCE(?3, ocr_text),
                  ocr_confidence = COALESCE(?4, ocr_confidence),
                  ocr_layout = COALESCE(?5, ocr_layout),
                  updated_at = ?6
                WHERE document_id = (SELECT document_id FROM jobs WHERE job_id = ?1)
                ",
                params![
                    job_id,
                    update.status.as_str(),
                    update.text,
                    update.confidence,
                    layout,
                    now
                ],
            )
            .with_context(|| format!("failed to update document for job {job_id}"))?;
        Ok(())
    }
}

impl CaseRecords for SqliteStore {
    fn resolve_bucket(&self, case_id: &str, bucket_key: &str) -> Result<Option<i64>> {
        let connection = self.lock()?;
        let bucket_id = connection
            .query_row(
                "SELECT bucket_id FROM buckets WHERE case_id = ?1 AND key = ?2",
                params![case_id, bucket_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bucket_id)
    }

    fn record_classification(
        &self,
        document_id: &str,
        classification: &ClassificationResult,
        applied_bucket_id: Option<i64>,
    ) -> Result<()> {
        let tags = serde_json::to_string(&classification.tags).context("failed to serialize tags")?;
        let connection = self.lock()?;
        connection
            .execute(
                "
                UPDATE documents SET
                  class_bucket_key = ?2,
                  class_confidence = ?3,
                  class_why = ?4,
                  tags = ?5,
                  bucket_id = COALESCE(?6, bucket_id),
                  updated_at = ?7
                WHERE document_id = ?1
                ",
                params![
                    document_id,
                    classification.bucket_key,
                    i64::from(classification.confidence),
                    classification.rationale,
                    tags,
                    applied_bucket_id,
                    Utc::now()
                ],
            )
            .with_context(|| format!("failed to record classification for {document_id}"))?;
        Ok(())
    }
}

// Jobs track the queue lifecycle; OCR quality lives on the document.
fn job_status(status: OcrStatus) -> &'static str {
    match status {
        OcrStatus::Completed | OcrStatus::LowConfidence => "completed",
        other => other.as_str(),
    }
}

fn grouped_counts(connection: &Connection, sql: &str) -> Result<BTreeMap<String, i64>> {
    let mut statement = connection.prepare(sql)?;
    let mut rows = statement.query([])?;
    let mut counts = BTreeMap::new();
    while let Some(row) = rows.next()? {
        counts.insert(row.get(0)?, row.get(1)?);
    }
    Ok(counts)
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS cases (
              case_id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              client TEXT,
              created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS buckets (
              bucket_id INTEGER PRIMARY KEY AUTOINCREMENT,
              case_id TEXT NOT NULL,
              key TEXT NOT NULL,
              name TEXT NOT NULL,
              order_index INTEGER NOT NULL DEFAULT 0,
              UNIQUE(case_id, key),
              FOREIGN KEY(case_id) REFERENCES cases(case_id)
            );

            CREATE TABLE IF NOT EXISTS documents (
              document_id TEXT PRIMARY KEY,
              case_id TEXT,
              bucket_id INTEGER,
              source_ref TEXT NOT NULL,
              filename TEXT NOT NULL,
              media_type TEXT NOT NULL,
              sha256 TEXT NOT NULL,
              ocr_status TEXT NOT NULL DEFAULT 'pending',
              ocr_text TEXT,
              ocr_confidence REAL,
              ocr_layout TEXT,
              class_bucket_key TEXT,
              class_confidence INTEGER,
              class_why TEXT,
              tags TEXT,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              FOREIGN KEY(case_id) REFERENCES cases(case_id),
              FOREIGN KEY(bucket_id) REFERENCES buckets(bucket_id)
            );

            CREATE TABLE IF NOT EXISTS jobs (
              job_id TEXT PRIMARY KEY,
              document_id TEXT NOT NULL,
              status TEXT NOT NULL,
              progress INTEGER NOT NULL DEFAULT 0,
              error TEXT,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              FOREIGN KEY(document_id) REFERENCES documents(document_id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_case ON documents(case_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_document ON jobs(document_id);
            ",
        )
        .context("failed to ensure case store schema")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(id: &str) -> Document {
        Document {
            document_id: id.to_string(),
            source_ref: format!("/atti/{id}.pdf"),
            filename: format!("{id}.pdf"),
            media_type: "application/pdf".to_string(),
        }
    }

    fn classification(bucket_key: &str, confidence: u32) -> ClassificationResult {
        ClassificationResult {
            bucket_key: bucket_key.to_string(),
            tags: vec!["denuncia".to_string()],
            confidence,
            rationale: "Matched: keyword \"denuncia\"".to_string(),
        }
    }

    #[test]
    fn new_case_gets_the_ten_default_buckets() {
        let store = SqliteStore::open_in_memory().expect("store");
        let case = store.create_case("Rossi c. Bianchi", Some("Mario Rossi")).expect("case");

        let buckets = store.buckets(&case.case_id).expect("buckets");
        assert_eq!(buckets.len(), 10);
        assert_eq!(buckets[0].key, "da_classificare");
        assert!(buckets.iter().any(|bucket| bucket.key == "prove_allegati"));

        let cases = store.list_cases().expect("cases");
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].client.as_deref(), Some("Mario Rossi"));
        assert!(store.case_exists(&case.case_id).expect("exists"));
        assert!(!store.case_exists("case-missing").expect("exists"));
    }

    #[test]
    fn resolve_bucket_is_scoped_to_the_case() {
        let store = SqliteStore::open_in_memory().expect("store");
        let first = store.create_case("Primo", None).expect("case");
        let second = store.create_case("Secondo", None).expect("case");

        let a = store
            .resolve_bucket(&first.case_id, "perizie_consulenze")
            .expect("resolve")
            .expect("bucket");
        let b = store
            .resolve_bucket(&second.case_id, "perizie_consulenze")
            .expect("resolve")
            .expect("bucket");
        assert_ne!(a, b);
        assert_eq!(store.resolve_bucket(&first.case_id, "ignoto").expect("resolve"), None);
    }

    #[test]
    fn published_updates_land_on_job_and_document() {
        let store = SqliteStore::open_in_memory().expect("store");
        let case = store.create_case("Caso", None).expect("case");
        store
            .register_document(&document("doc1"), Some(&case.case_id), "abc")
            .expect("register");
        store.create_job("job-1", "doc1").expect("job");

        store
            .publish("job-1", &JobUpdate::progress(OcrStatus::Processing, 40))
            .expect("progress");
        store
            .publish(
                "job-1",
                &JobUpdate {
                    status: OcrStatus::LowConfidence,
                    progress: 100,
                    text: Some("testo".to_string()),
                    confidence: Some(52.5),
                    layout: Some(Vec::new()),
                    error: None,
                },
            )
            .expect("final");

        let stored = store.document("doc1").expect("query").expect("document");
        assert_eq!(stored.ocr_status, "low_confidence");
        assert_eq!(stored.ocr_confidence, Some(52.5));

        let report = store.status_report().expect("report");
        assert_eq!(report.jobs_by_status.get("completed"), Some(&1));
        assert_eq!(report.documents_by_status.get("low_confidence"), Some(&1));
        assert_eq!(report.documents_by_bucket.get("da_classificare"), Some(&1));
    }

    #[test]
    fn applied_classification_moves_the_document() {
        let store = SqliteStore::open_in_memory().expect("store");
        let case = store.create_case("Caso", None).expect("case");
        store
            .register_document(&document("doc1"), Some(&case.case_id), "abc")
            .expect("register");
        let review_bucket = store.document("doc1").expect("query").expect("doc").bucket_id;
        assert!(review_bucket.is_some());

        let target = store
            .resolve_bucket(&case.case_id, "denuncia_querela")
            .expect("resolve");
        store
            .record_classification("doc1", &classification("denuncia_querela", 100), target)
            .expect("record");

        let stored = store.document("doc1").expect("query").expect("doc");
        assert_eq!(stored.bucket_id, target);
        assert_eq!(stored.class_bucket_key.as_deref(), Some("denuncia_querela"));
        assert_eq!(stored.tags, vec!["denuncia"]);
    }

    #[test]
    fn unapplied_classification_keeps_the_bucket() {
        let store = SqliteStore::open_in_memory().expect("store");
        let case = store.create_case("Caso", None).expect("case");
        store
            .register_document(&document("doc1"), Some(&case.case_id), "abc")
            .expect("register");
        let before = store.document("doc1").expect("query").expect("doc").bucket_id;

        store
            .record_classification("doc1", &classification("da_classificare", 20), None)
            .expect("record");

        let stored = store.document("doc1").expect("query").expect("doc");
        assert_eq!(stored.bucket_id, before);
        assert_eq!(stored.class_confidence, Some(20));
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("cases.sqlite");
        let case_id = {
            let store = SqliteStore::open(&path).expect("open");
            store.create_case("Persistente", None).expect("case").case_id
        };
        let store = SqliteStore::open(&path).expect("reopen");
        assert_eq!(store.buckets(&case_id).expect("buckets").len(), 10);
    }
}
