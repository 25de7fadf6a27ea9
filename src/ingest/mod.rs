//! Ingestion pipeline
//!
//! Upload is the synchronous half: validate, stream to storage while
//! hashing, dedup, record the document, enqueue a parse job. Processing is
//! the asynchronous half, run by workers: parse, chunk, embed, index, and
//! flip the document to ready. Every stage is idempotent so a retried job
//! converges on the same end state.

use crate::chunk::{chunk_document, CHUNKER_VERSION};
use crate::config::Config;
use crate::embed::{embed_in_batches, Embedder};
use crate::error::{Error, Result};
use crate::index::{ChunkPayload, IndexEntry, ScopeFilter, VectorIndex};
use crate::jobs::{worker::JobHandler, ClaimedJob, JobPayload, JobQueue};
use crate::meta::{chunk_id, ChunkRow, DocStatus, Document, DocumentPage, MetaDb};
use crate::parse::{is_pdf_magic, parse_pdf};
use crate::storage::BlobStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of an upload
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// A new document row was created and a parse job enqueued
    Created { document: Document, job_id: String },
    /// Identical bytes already exist in this workspace; nothing new stored
    Duplicate { document: Document },
}

impl UploadOutcome {
    pub fn document(&self) -> &Document {
        match self {
            UploadOutcome::Created { document, .. } => document,
            UploadOutcome::Duplicate { document } => document,
        }
    }
}

/// Drives uploads and processes ingestion jobs
pub struct IngestionOrchestrator {
    db: MetaDb,
    store: BlobStore,
    queue: JobQueue,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    config: Config,
}

impl IngestionOrchestrator {
    pub fn new(
        db: MetaDb,
        store: BlobStore,
        queue: JobQueue,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: Config,
    ) -> Self {
        Self {
            db,
            store,
            queue,
            embedder,
            index,
            config,
        }
    }

    /// Accept an uploaded file.
    ///
    /// The magic-byte check runs on the first bytes before anything is
    /// hashed or stored. Bytes then stream to blob storage while the content
    /// hash accumulates, one pass total. If the hash matches an existing
    /// document in the workspace the fresh blob is removed and the existing
    /// row returned unchanged.
    pub async fn upload<R: Read>(
        &self,
        workspace_id: &str,
        filename: &str,
        reader: R,
    ) -> Result<UploadOutcome> {
        let (header, reader) = read_header(reader)?;
        if header.is_empty() {
            return Err(Error::EmptyFile);
        }
        if !is_pdf_magic(&header) {
            return Err(Error::InvalidDocument(
                "file does not start with %PDF-".to_string(),
            ));
        }

        let doc_id = Uuid::new_v4().to_string();
        let blob_name = format!("{}_{}", doc_id, filename);
        let capped = CappedReader::new(
            std::io::Cursor::new(header).chain(reader),
            self.config.upload.max_file_size,
        );

        let blob = match self.store.put(
            workspace_id,
            &blob_name,
            capped,
            self.config.upload.io_block_size,
        ) {
            Ok(blob) => blob,
            Err(Error::Io(e)) => {
                if let Some(exceeded) = e
                    .get_ref()
                    .and_then(|inner| inner.downcast_ref::<SizeLimitExceeded>())
                {
                    return Err(Error::TooLarge {
                        size: exceeded.seen,
                        max: exceeded.max,
                    });
                }
                return Err(Error::Io(e));
            }
            Err(e) => return Err(e),
        };

        // Dedup on content hash within the workspace
        if let Some(existing) = self
            .db
            .find_document_by_hash(workspace_id, &blob.content_hash)
            .await?
        {
            debug!(doc_id = %existing.id, "Duplicate upload, reusing existing document");
            self.store.delete(&blob.uri)?;
            return Ok(UploadOutcome::Duplicate { document: existing });
        }

        let mut document = Document::new(
            workspace_id.to_string(),
            filename.to_string(),
            blob.uri.clone(),
            blob.size as i64,
            blob.content_hash.clone(),
        );
        document.id = doc_id;

        if let Err(e) = self.db.insert_document(&document).await {
            if is_unique_violation(&e) {
                // A concurrent identical upload won the race
                self.store.delete(&blob.uri)?;
                let existing = self
                    .db
                    .find_document_by_hash(workspace_id, &blob.content_hash)
                    .await?
                    .ok_or_else(|| {
                        Error::Consistency(
                            "duplicate document vanished during upload".to_string(),
                        )
                    })?;
                return Ok(UploadOutcome::Duplicate { document: existing });
            }
            return Err(e);
        }

        let job_id = self
            .queue
            .enqueue(
                workspace_id,
                &JobPayload::ParseDocument {
                    doc_id: document.id.clone(),
                },
            )
            .await?;

        info!(doc_id = %document.id, job_id = %job_id, "Accepted upload");
        Ok(UploadOutcome::Created { document, job_id })
    }

    /// Process a parse job: parse the stored bytes, persist pages and
    /// chunks, embed what changed, and flip the document to ready
    pub async fn process_document(&self, doc_id: &str, job_id: Option<&str>) -> Result<()> {
        let document = self
            .db
            .get_document(doc_id)
            .await?
            .ok_or_else(|| Error::DocumentNotFound(doc_id.to_string()))?;

        self.db
            .set_document_status(doc_id, DocStatus::Processing, None)
            .await?;

        let bytes = self.store.get(&document.storage_uri)?;
        let parsed = parse_pdf(&bytes)?;
        drop(bytes);

        let pages: Vec<DocumentPage> = parsed
            .pages
            .iter()
            .map(|p| DocumentPage {
                doc_id: doc_id.to_string(),
                page: p.page as i64,
                char_count: p.text.chars().count() as i64,
                text_layer_available: p.text_layer_available,
            })
            .collect();
        self.db.replace_pages(doc_id, &pages).await?;
        self.set_progress(job_id, 30).await;

        let chunks = chunk_document(&parsed, &self.config.chunk);
        debug!(doc_id = %doc_id, chunks = chunks.len(), "Chunked document");

        // Previous chunk hashes decide what must be re-embedded
        let previous: HashMap<i64, String> = self
            .db
            .get_chunks(doc_id)
            .await?
            .into_iter()
            .map(|c| (c.chunk_index, c.text_hash))
            .collect();

        let rows: Vec<ChunkRow> = chunks
            .iter()
            .map(|c| {
                ChunkRow::new(
                    doc_id.to_string(),
                    c.chunk_index as i64,
                    c.text_hash.clone(),
                    c.text.clone(),
                    c.page_start as i64,
                    c.page_end as i64,
                    c.char_start as i64,
                    c.char_end as i64,
                )
            })
            .collect();

        let superseded = self.db.replace_chunks(doc_id, &rows).await?;
        if !superseded.is_empty() {
            let stale: Vec<Uuid> = superseded
                .iter()
                .filter_map(|id| Uuid::try_parse(id).ok())
                .collect();
            self.index.delete(&stale).await?;
        }
        self.set_progress(job_id, 50).await;

        // Embed only chunks whose text changed or that are missing from the
        // index; unchanged, already-indexed chunks are skipped entirely
        let mut pending: Vec<&ChunkRow> = Vec::new();
        for row in &rows {
            let unchanged = previous.get(&row.chunk_index) == Some(&row.text_hash);
            let id = chunk_id(doc_id, row.chunk_index as usize);
            if unchanged && self.index.contains(&id).await? {
                continue;
            }
            pending.push(row);
        }
        debug!(
            doc_id = %doc_id,
            to_embed = pending.len(),
            skipped = rows.len() - pending.len(),
            "Embedding plan"
        );

        if !pending.is_empty() {
            let texts: Vec<String> = pending.iter().map(|r| r.text.clone()).collect();
            let embeddings = embed_in_batches(
                self.embedder.as_ref(),
                texts,
                self.config.embedding.batch_size,
            )
            .await?;

            let entries: Vec<IndexEntry> = pending
                .iter()
                .zip(embeddings)
                .map(|(row, embedding)| IndexEntry {
                    chunk_id: chunk_id(doc_id, row.chunk_index as usize),
                    embedding,
                    payload: ChunkPayload {
                        workspace_id: document.workspace_id.clone(),
                        doc_id: doc_id.to_string(),
                        chunk_index: row.chunk_index,
                        text_hash: row.text_hash.clone(),
                        page_start: row.page_start,
                    },
                })
                .collect();
            self.index.upsert(entries).await?;
        }
        self.set_progress(job_id, 90).await;

        self.db
            .set_document_ready(
                doc_id,
                parsed.num_pages() as i64,
                CHUNKER_VERSION,
                self.embedder.model_name(),
                self.embedder.dimension() as i64,
            )
            .await?;

        info!(doc_id = %doc_id, pages = parsed.num_pages(), chunks = rows.len(), "Document ready");
        Ok(())
    }

    /// Replay a workspace's chunk rows into the index. The index is a
    /// derived projection; after this it matches the relational store
    /// exactly
    pub async fn rebuild_index(&self, workspace_id: &str, job_id: Option<&str>) -> Result<()> {
        let scope = ScopeFilter::workspace(workspace_id);
        self.index.clear(&scope).await?;

        let chunks = self.db.list_workspace_chunks(workspace_id).await?;
        info!(workspace_id = %workspace_id, chunks = chunks.len(), "Rebuilding index");
        if chunks.is_empty() {
            return Ok(());
        }
        self.set_progress(job_id, 20).await;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embed_in_batches(
            self.embedder.as_ref(),
            texts,
            self.config.embedding.batch_size,
        )
        .await?;
        self.set_progress(job_id, 70).await;

        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(embeddings)
            .map(|(row, embedding)| IndexEntry {
                chunk_id: chunk_id(&row.doc_id, row.chunk_index as usize),
                embedding,
                payload: ChunkPayload {
                    workspace_id: workspace_id.to_string(),
                    doc_id: row.doc_id.clone(),
                    chunk_index: row.chunk_index,
                    text_hash: row.text_hash.clone(),
                    page_start: row.page_start,
                },
            })
            .collect();
        self.index.upsert(entries).await?;

        Ok(())
    }

    /// Record progress and extend the claim lease so long-running jobs are
    /// not reclaimed mid-run
    async fn set_progress(&self, job_id: Option<&str>, progress: i64) {
        if let Some(id) = job_id {
            if let Err(e) = self.queue.set_progress(id, progress).await {
                warn!(job_id = %id, "Failed to record progress: {}", e);
            }
            if let Err(e) = self.queue.touch(id).await {
                warn!(job_id = %id, "Failed to extend job lease: {}", e);
            }
        }
    }
}

#[async_trait]
impl JobHandler for IngestionOrchestrator {
    async fn handle(&self, claimed: &ClaimedJob) -> Result<()> {
        match &claimed.payload {
            JobPayload::ParseDocument { doc_id } => {
                self.process_document(doc_id, Some(&claimed.job.id)).await
            }
            JobPayload::RebuildIndex { workspace_id } => {
                self.rebuild_index(workspace_id, Some(&claimed.job.id)).await
            }
        }
    }

    async fn on_terminal_failure(&self, claimed: &ClaimedJob, error: &str) -> Result<()> {
        if let JobPayload::ParseDocument { doc_id } = &claimed.payload {
            warn!(doc_id = %doc_id, "Marking document failed: {}", error);
            self.db
                .set_document_status(doc_id, DocStatus::Failed, Some(error))
                .await?;
        }
        Ok(())
    }
}

/// Read up to the magic-byte length from the head of a stream
fn read_header<R: Read>(mut reader: R) -> Result<(Vec<u8>, R)> {
    let mut header = [0u8; crate::parse::PDF_MAGIC.len()];
    let mut filled = 0usize;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok((header[..filled].to_vec(), reader))
}

fn is_unique_violation(error: &Error) -> bool {
    match error {
        Error::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
        _ => false,
    }
}

#[derive(Debug)]
struct SizeLimitExceeded {
    seen: u64,
    max: u64,
}

impl std::fmt::Display for SizeLimitExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upload exceeds {} bytes (saw {})", self.max, self.seen)
    }
}

impl std::error::Error for SizeLimitExceeded {}

/// Reader that errors out once more than `max` bytes pass through, so an
/// oversized upload aborts mid-stream instead of filling the disk
struct CappedReader<R> {
    inner: R,
    seen: u64,
    max: u64,
}

impl<R: Read> CappedReader<R> {
    fn new(inner: R, max: u64) -> Self {
        Self {
            inner,
            seen: 0,
            max,
        }
    }
}

impl<R: Read> Read for CappedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.seen += n as u64;
        if self.seen > self.max {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                SizeLimitExceeded {
                    seen: self.seen,
                    max: self.max,
                },
            ));
        }
        Ok(n)
    }
}
