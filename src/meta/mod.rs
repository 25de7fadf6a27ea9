//! System-of-record storage using SQLite
//!
//! This module owns all relational state: documents, per-page metadata,
//! chunks, jobs, and chat messages. The vector index is strictly a derived
//! projection of the chunk rows here and can always be rebuilt from them.

mod schema;

pub use schema::*;

use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Document processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    Uploaded,
    Processing,
    Ready,
    Failed,
}

impl std::fmt::Display for DocStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocStatus::Uploaded => write!(f, "uploaded"),
            DocStatus::Processing => write!(f, "processing"),
            DocStatus::Ready => write!(f, "ready"),
            DocStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for DocStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "uploaded" => Ok(DocStatus::Uploaded),
            "processing" => Ok(DocStatus::Processing),
            "ready" => Ok(DocStatus::Ready),
            "failed" => Ok(DocStatus::Failed),
            _ => Err(Error::Config(format!("Unknown document status: {}", s))),
        }
    }
}

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::InProgress => write!(f, "in_progress"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(Error::Config(format!("Unknown job status: {}", s))),
        }
    }
}

/// Derive the stable chunk identity from document and position.
///
/// Re-running ingestion on unchanged input reproduces identical ids, which
/// is what makes vector upserts idempotent.
pub fn chunk_id(doc_id: &str, chunk_index: usize) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", doc_id, chunk_index).as_bytes(),
    )
}

/// An uploaded document
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub workspace_id: String,
    pub filename: String,
    pub storage_uri: String,
    pub file_size: i64,
    pub content_hash: String,
    pub status: String,
    pub error: Option<String>,
    pub num_pages: Option<i64>,
    pub chunker_version: Option<String>,
    pub embed_model: Option<String>,
    pub embed_dim: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl Document {
    pub fn new(
        workspace_id: String,
        filename: String,
        storage_uri: String,
        file_size: i64,
        content_hash: String,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id,
            filename,
            storage_uri,
            file_size,
            content_hash,
            status: DocStatus::Uploaded.to_string(),
            error: None,
            num_pages: None,
            chunker_version: None,
            embed_model: None,
            embed_dim: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn get_status(&self) -> Result<DocStatus> {
        self.status.parse()
    }
}

/// Per-page metadata recorded by the parse job
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DocumentPage {
    pub doc_id: String,
    pub page: i64,
    pub char_count: i64,
    pub text_layer_available: bool,
}

/// A persisted chunk row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChunkRow {
    pub id: String,
    pub doc_id: String,
    pub chunk_index: i64,
    pub text_hash: String,
    pub text: String,
    pub page_start: i64,
    pub page_end: i64,
    pub char_start: i64,
    pub char_end: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl ChunkRow {
    pub fn new(
        doc_id: String,
        chunk_index: i64,
        text_hash: String,
        text: String,
        page_start: i64,
        page_end: i64,
        char_start: i64,
        char_end: i64,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: chunk_id(&doc_id, chunk_index as usize).to_string(),
            doc_id,
            chunk_index,
            text_hash,
            text,
            page_start,
            page_end,
            char_start,
            char_end,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// A durable job row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub workspace_id: String,
    pub doc_id: Option<String>,
    pub job_type: String,
    pub payload_json: String,
    pub status: String,
    pub attempt: i64,
    pub max_attempt: i64,
    pub progress: i64,
    pub error: Option<String>,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub not_before: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Job {
    pub fn get_status(&self) -> Result<JobStatus> {
        self.status.parse()
    }
}

/// A persisted chat message
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub workspace_id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub citations_json: Option<String>,
    pub context_json: Option<String>,
    pub created_at: String,
}

/// Outcome of failing a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Returned to pending for another attempt
    Retrying { attempt: i64 },
    /// Out of attempts (or structurally failed); surfaced for operator
    /// attention
    TerminallyFailed,
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Open (and auto-initialize) the database at the given path
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };

        if !db.is_initialized().await? {
            db.init_schema().await?;
        }

        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='documents'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    // ===== Document Operations =====

    /// Insert a new document row.
    ///
    /// A unique violation on `(workspace_id, content_hash)` means a
    /// concurrent upload of identical bytes won the race; the caller should
    /// re-select and reuse that row.
    pub async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, workspace_id, filename, storage_uri, file_size,
                content_hash, status, error, num_pages, chunker_version, embed_model,
                embed_dim, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.workspace_id)
        .bind(&doc.filename)
        .bind(&doc.storage_uri)
        .bind(doc.file_size)
        .bind(&doc.content_hash)
        .bind(&doc.status)
        .bind(&doc.error)
        .bind(doc.num_pages)
        .bind(&doc.chunker_version)
        .bind(&doc.embed_model)
        .bind(doc.embed_dim)
        .bind(&doc.created_at)
        .bind(&doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get document by ID
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    /// Dedup lookup: find a document by workspace and content hash
    pub async fn find_document_by_hash(
        &self,
        workspace_id: &str,
        content_hash: &str,
    ) -> Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>(
            "SELECT * FROM documents WHERE workspace_id = ? AND content_hash = ?",
        )
        .bind(workspace_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(doc)
    }

    /// List documents in a workspace
    pub async fn list_documents(&self, workspace_id: &str) -> Result<Vec<Document>> {
        let docs = sqlx::query_as::<_, Document>(
            "SELECT * FROM documents WHERE workspace_id = ? ORDER BY created_at DESC",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    /// Transition a document's status, recording a failure reason if any
    pub async fn set_document_status(
        &self,
        id: &str,
        status: DocStatus,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE documents SET status = ?, error = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(error)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record parse results and versioning fields when a document reaches
    /// ready
    pub async fn set_document_ready(
        &self,
        id: &str,
        num_pages: i64,
        chunker_version: &str,
        embed_model: &str,
        embed_dim: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents SET status = ?, error = NULL, num_pages = ?,
                chunker_version = ?, embed_model = ?, embed_dim = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(DocStatus::Ready.to_string())
        .bind(num_pages)
        .bind(chunker_version)
        .bind(embed_model)
        .bind(embed_dim)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a document with its pages and chunks
    pub async fn delete_document(&self, doc_id: &str) -> Result<Vec<String>> {
        let chunk_ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM chunks WHERE doc_id = ?")
                .bind(doc_id)
                .fetch_all(&self.pool)
                .await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM document_pages WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(chunk_ids)
    }

    // ===== Page Operations =====

    /// Replace the recorded pages for a document (parse job output)
    pub async fn replace_pages(&self, doc_id: &str, pages: &[DocumentPage]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM document_pages WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        for page in pages {
            sqlx::query(
                r#"
                INSERT INTO document_pages (doc_id, page, char_count, text_layer_available)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(doc_id)
            .bind(page.page)
            .bind(page.char_count)
            .bind(page.text_layer_available)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Get recorded pages for a document
    pub async fn get_pages(&self, doc_id: &str) -> Result<Vec<DocumentPage>> {
        let pages = sqlx::query_as::<_, DocumentPage>(
            "SELECT * FROM document_pages WHERE doc_id = ? ORDER BY page",
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(pages)
    }

    // ===== Chunk Operations =====

    /// Replace a document's chunk set in one transaction: upsert every new
    /// chunk by `(doc_id, chunk_index)` and delete superseded chunks whose
    /// index falls beyond the new count. Returns the ids of deleted chunks
    /// so their index entries can be removed too.
    pub async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[ChunkRow],
    ) -> Result<Vec<String>> {
        for chunk in chunks {
            if chunk.doc_id != doc_id {
                return Err(Error::Consistency(format!(
                    "chunk {} belongs to document {}, not {}",
                    chunk.id, chunk.doc_id, doc_id
                )));
            }
        }

        let superseded: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM chunks WHERE doc_id = ? AND chunk_index >= ?",
        )
        .bind(doc_id)
        .bind(chunks.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, doc_id, chunk_index, text_hash, text, page_start,
                    page_end, char_start, char_end, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(doc_id, chunk_index) DO UPDATE SET
                    text_hash = excluded.text_hash,
                    text = excluded.text,
                    page_start = excluded.page_start,
                    page_end = excluded.page_end,
                    char_start = excluded.char_start,
                    char_end = excluded.char_end,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.doc_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text_hash)
            .bind(&chunk.text)
            .bind(chunk.page_start)
            .bind(chunk.page_end)
            .bind(chunk.char_start)
            .bind(chunk.char_end)
            .bind(&chunk.created_at)
            .bind(&chunk.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM chunks WHERE doc_id = ? AND chunk_index >= ?")
            .bind(doc_id)
            .bind(chunks.len() as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(superseded)
    }

    /// Get chunks for a document in document order
    pub async fn get_chunks(&self, doc_id: &str) -> Result<Vec<ChunkRow>> {
        let chunks = sqlx::query_as::<_, ChunkRow>(
            "SELECT * FROM chunks WHERE doc_id = ? ORDER BY chunk_index",
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(chunks)
    }

    /// Get a single chunk by its derived id
    pub async fn get_chunk(&self, id: &str) -> Result<Option<ChunkRow>> {
        let chunk = sqlx::query_as::<_, ChunkRow>("SELECT * FROM chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(chunk)
    }

    /// List every chunk in a workspace, in (doc, index) order. Used by the
    /// rebuild operation to replay the derived index
    pub async fn list_workspace_chunks(&self, workspace_id: &str) -> Result<Vec<ChunkRow>> {
        let chunks = sqlx::query_as::<_, ChunkRow>(
            r#"
            SELECT c.* FROM chunks c
            JOIN documents d ON c.doc_id = d.id
            WHERE d.workspace_id = ?
            ORDER BY c.doc_id, c.chunk_index
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(chunks)
    }

    /// Count chunks for a document
    pub async fn count_chunks(&self, doc_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ===== Job Operations =====

    /// Insert a new pending job
    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, workspace_id, doc_id, job_type, payload_json, status,
                attempt, max_attempt, progress, error, worker_id, lease_expires_at,
                not_before, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.workspace_id)
        .bind(&job.doc_id)
        .bind(&job.job_type)
        .bind(&job.payload_json)
        .bind(&job.status)
        .bind(job.attempt)
        .bind(job.max_attempt)
        .bind(job.progress)
        .bind(&job.error)
        .bind(&job.worker_id)
        .bind(job.lease_expires_at)
        .bind(job.not_before)
        .bind(&job.created_at)
        .bind(&job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a job by id
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Atomically claim one eligible job for a worker.
    ///
    /// Eligible means pending (past any retry floor) or in progress with an
    /// expired lease (crashed worker). The single UPDATE statement is the
    /// exclusivity guarantee: SQLite serializes writers, so two workers can
    /// never take the same row.
    pub async fn claim_job(
        &self,
        worker_id: &str,
        now_unix: i64,
        lease_secs: i64,
    ) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs SET
                status = 'in_progress',
                worker_id = ?,
                lease_expires_at = ?,
                updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE (status = 'pending' AND not_before <= ?)
                   OR (status = 'in_progress' AND lease_expires_at < ?)
                ORDER BY created_at
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(now_unix + lease_secs)
        .bind(Utc::now().to_rfc3339())
        .bind(now_unix)
        .bind(now_unix)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    /// Mark a job completed
    pub async fn complete_job(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', progress = 100, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt: back to pending if attempts remain, terminal
    /// failed otherwise. `not_before` pushes the next attempt past a backoff
    /// floor so a flapping job doesn't hot-spin the workers.
    pub async fn fail_job(
        &self,
        id: &str,
        error: &str,
        not_before: i64,
    ) -> Result<JobOutcome> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs SET
                attempt = attempt + 1,
                status = CASE WHEN attempt + 1 >= max_attempt THEN 'failed' ELSE 'pending' END,
                error = ?,
                worker_id = NULL,
                lease_expires_at = NULL,
                not_before = ?,
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(error)
        .bind(not_before)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::Consistency(format!("failing unknown job {}", id)))?;

        match job.get_status()? {
            JobStatus::Failed => Ok(JobOutcome::TerminallyFailed),
            _ => Ok(JobOutcome::Retrying {
                attempt: job.attempt,
            }),
        }
    }

    /// Fail a job terminally regardless of remaining attempts. Used for
    /// structural errors that re-running the same bytes would reproduce
    pub async fn fail_job_terminal(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs SET status = 'failed', attempt = max_attempt, error = ?,
                worker_id = NULL, lease_expires_at = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update advisory progress (0-100)
    pub async fn set_job_progress(&self, id: &str, progress: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET progress = ?, updated_at = ? WHERE id = ?")
            .bind(progress.clamp(0, 100))
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Extend the claim lease for a long-running job
    pub async fn touch_job_lease(&self, id: &str, lease_expires_at: i64) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET lease_expires_at = ?, updated_at = ? WHERE id = ? AND status = 'in_progress'",
        )
        .bind(lease_expires_at)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count jobs by status (for status reporting)
    pub async fn count_jobs_by_status(&self, status: JobStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ===== Message Operations =====

    /// Persist a chat message with its citations and retrieval snapshot
    pub async fn insert_message(&self, message: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, workspace_id, session_id, role, content,
                citations_json, context_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.workspace_id)
        .bind(&message.session_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(&message.citations_json)
        .bind(&message.context_json)
        .bind(&message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// List a session's messages in order
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE session_id = ? ORDER BY created_at, id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup_test_db() -> (MetaDb, TempDir) {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("test.db")).await.unwrap();
        (db, tmp)
    }

    fn make_doc(workspace: &str, hash: &str) -> Document {
        Document::new(
            workspace.to_string(),
            "paper.pdf".to_string(),
            "local://ws/paper.pdf".to_string(),
            1024,
            hash.to_string(),
        )
    }

    fn make_job(workspace: &str, doc_id: &str, max_attempt: i64) -> Job {
        let now = Utc::now().to_rfc3339();
        Job {
            id: Uuid::new_v4().to_string(),
            workspace_id: workspace.to_string(),
            doc_id: Some(doc_id.to_string()),
            job_type: "parse_document".to_string(),
            payload_json: "{}".to_string(),
            status: JobStatus::Pending.to_string(),
            attempt: 0,
            max_attempt,
            progress: 0,
            error: None,
            worker_id: None,
            lease_expires_at: None,
            not_before: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_document_dedup_constraint() {
        let (db, _tmp) = setup_test_db().await;

        let doc = make_doc("ws1", "hash-a");
        db.insert_document(&doc).await.unwrap();

        // Same bytes, same workspace: unique violation
        let dup = make_doc("ws1", "hash-a");
        assert!(db.insert_document(&dup).await.is_err());

        // Same bytes, different workspace: fine
        let other = make_doc("ws2", "hash-a");
        db.insert_document(&other).await.unwrap();

        let found = db.find_document_by_hash("ws1", "hash-a").await.unwrap();
        assert_eq!(found.unwrap().id, doc.id);
    }

    #[tokio::test]
    async fn test_replace_chunks_supersedes() {
        let (db, _tmp) = setup_test_db().await;
        let doc = make_doc("ws1", "hash-b");
        db.insert_document(&doc).await.unwrap();

        let chunks: Vec<ChunkRow> = (0..3)
            .map(|i| {
                ChunkRow::new(
                    doc.id.clone(),
                    i,
                    format!("hash-{}", i),
                    format!("text {}", i),
                    1,
                    1,
                    0,
                    10,
                )
            })
            .collect();
        let deleted = db.replace_chunks(&doc.id, &chunks).await.unwrap();
        assert!(deleted.is_empty());
        assert_eq!(db.count_chunks(&doc.id).await.unwrap(), 3);

        // Re-chunking produced fewer chunks: index 2 is superseded
        let smaller = chunks[..2].to_vec();
        let deleted = db.replace_chunks(&doc.id, &smaller).await.unwrap();
        assert_eq!(deleted, vec![chunk_id(&doc.id, 2).to_string()]);
        assert_eq!(db.count_chunks(&doc.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_chunk_identity_is_stable() {
        let id1 = chunk_id("doc-1", 0);
        let id2 = chunk_id("doc-1", 0);
        let id3 = chunk_id("doc-1", 1);
        let id4 = chunk_id("doc-2", 0);

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
        assert_ne!(id1, id4);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (db, _tmp) = setup_test_db().await;
        let doc = make_doc("ws1", "hash-c");
        db.insert_document(&doc).await.unwrap();
        db.insert_job(&make_job("ws1", &doc.id, 3)).await.unwrap();

        let now = Utc::now().timestamp();
        let first = db.claim_job("worker-1", now, 300).await.unwrap();
        assert!(first.is_some());

        // Second claim finds nothing: only job is leased
        let second = db.claim_job("worker-2", now, 300).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable() {
        let (db, _tmp) = setup_test_db().await;
        let doc = make_doc("ws1", "hash-d");
        db.insert_document(&doc).await.unwrap();
        db.insert_job(&make_job("ws1", &doc.id, 3)).await.unwrap();

        let now = Utc::now().timestamp();
        let claimed = db.claim_job("worker-1", now, 10).await.unwrap().unwrap();

        // Simulate a crashed worker: time passes beyond the lease
        let later = now + 60;
        let reclaimed = db.claim_job("worker-2", later, 10).await.unwrap();
        assert_eq!(reclaimed.unwrap().id, claimed.id);
    }

    #[tokio::test]
    async fn test_fail_job_retry_bound() {
        let (db, _tmp) = setup_test_db().await;
        let doc = make_doc("ws1", "hash-e");
        db.insert_document(&doc).await.unwrap();
        let job = make_job("ws1", &doc.id, 2);
        db.insert_job(&job).await.unwrap();

        let now = Utc::now().timestamp();

        db.claim_job("w", now, 300).await.unwrap().unwrap();
        let outcome = db.fail_job(&job.id, "transient blip", 0).await.unwrap();
        assert_eq!(outcome, JobOutcome::Retrying { attempt: 1 });

        db.claim_job("w", now, 300).await.unwrap().unwrap();
        let outcome = db.fail_job(&job.id, "transient blip", 0).await.unwrap();
        assert_eq!(outcome, JobOutcome::TerminallyFailed);

        // Terminal: never claimable again
        let again = db.claim_job("w", now + 3600, 300).await.unwrap();
        assert!(again.is_none());

        let stored = db.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.get_status().unwrap(), JobStatus::Failed);
        assert_eq!(stored.attempt, 2);
    }

    #[tokio::test]
    async fn test_not_before_blocks_claims() {
        let (db, _tmp) = setup_test_db().await;
        let doc = make_doc("ws1", "hash-f");
        db.insert_document(&doc).await.unwrap();
        let job = make_job("ws1", &doc.id, 3);
        db.insert_job(&job).await.unwrap();

        let now = Utc::now().timestamp();
        db.claim_job("w", now, 300).await.unwrap().unwrap();
        db.fail_job(&job.id, "blip", now + 30).await.unwrap();

        assert!(db.claim_job("w", now, 300).await.unwrap().is_none());
        assert!(db.claim_job("w", now + 31, 300).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_message_roundtrip() {
        let (db, _tmp) = setup_test_db().await;

        let message = Message {
            id: Uuid::new_v4().to_string(),
            workspace_id: "ws1".to_string(),
            session_id: "session-1".to_string(),
            role: "assistant".to_string(),
            content: "Grounded answer [1].".to_string(),
            citations_json: Some(r#"[{"doc_id":"d","chunk_id":"c","page":3}]"#.to_string()),
            context_json: Some("{}".to_string()),
            created_at: Utc::now().to_rfc3339(),
        };
        db.insert_message(&message).await.unwrap();

        let messages = db.list_messages("session-1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Grounded answer [1].");
    }
}
