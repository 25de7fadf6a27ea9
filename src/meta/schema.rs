//! SQLite schema definition

/// SQL schema for the system-of-record database
pub const SCHEMA_SQL: &str = r#"
-- Documents: uploaded PDFs, deduplicated per workspace by content hash
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    storage_uri TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    error TEXT,
    num_pages INTEGER,
    chunker_version TEXT,
    embed_model TEXT,
    embed_dim INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(workspace_id, content_hash)
);

-- Document pages: per-page metadata filled in by the parse job
CREATE TABLE IF NOT EXISTS document_pages (
    doc_id TEXT NOT NULL REFERENCES documents(id),
    page INTEGER NOT NULL,
    char_count INTEGER NOT NULL,
    text_layer_available INTEGER NOT NULL,
    PRIMARY KEY (doc_id, page)
);

-- Chunks: the unit of retrieval and citation; identity is derived from
-- (doc_id, chunk_index), ordering by chunk_index reconstructs the document
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL REFERENCES documents(id),
    chunk_index INTEGER NOT NULL,
    text_hash TEXT NOT NULL,
    text TEXT NOT NULL,
    page_start INTEGER NOT NULL,
    page_end INTEGER NOT NULL,
    char_start INTEGER NOT NULL,
    char_end INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(doc_id, chunk_index)
);

-- Jobs: durable work items with bounded retry; terminal jobs are retained
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    doc_id TEXT,
    job_type TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    status TEXT NOT NULL,
    attempt INTEGER NOT NULL DEFAULT 0,
    max_attempt INTEGER NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    worker_id TEXT,
    lease_expires_at INTEGER,
    not_before INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Messages: chat turns with citations and the retrieval snapshot used
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    citations_json TEXT,
    context_json TEXT,
    created_at TEXT NOT NULL
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_documents_workspace ON documents(workspace_id);
CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(content_hash);
CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(doc_id);
CREATE INDEX IF NOT EXISTS idx_chunks_hash ON chunks(text_hash);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_doc ON jobs(doc_id);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
"#;
