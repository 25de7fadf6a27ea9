//! Default values for configuration

use std::path::PathBuf;

/// Default base directory for paperbase data
pub fn default_base_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("paperbase")
}

/// Default Qdrant gRPC URL for local development (port 6334, not 6333 REST)
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default collection name
pub fn default_collection_name() -> String {
    "paperbase_chunks".to_string()
}

/// Default embedding model (BAAI/bge-small-en-v1.5)
pub fn default_embedding_model() -> String {
    "BAAI/bge-small-en-v1.5".to_string()
}

/// Default embedding dimension for bge-small-en-v1.5
pub fn default_embedding_dimension() -> usize {
    384
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default maximum characters per chunk
pub fn default_chunk_max_chars() -> usize {
    1500
}

/// Default minimum characters per chunk
pub fn default_chunk_min_chars() -> usize {
    100
}

/// Default overlap characters between windowed chunks
pub fn default_chunk_overlap() -> usize {
    200
}

/// Default number of retrieved chunks per question
pub fn default_retrieval_top_k() -> usize {
    8
}

/// Default minimum cosine similarity for a chunk to count as evidence
pub fn default_retrieval_min_score() -> f32 {
    0.35
}

/// Default maximum upload size (100 MB)
pub fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

/// Default I/O block size for streaming hash/storage (4 MB)
pub fn default_io_block_size() -> usize {
    4 * 1024 * 1024
}

/// Default maximum job attempts
pub fn default_job_max_attempts() -> i32 {
    3
}

/// Default claim lease in seconds
pub fn default_job_lease_secs() -> i64 {
    300
}

/// Default worker poll interval in milliseconds
pub fn default_job_poll_interval_ms() -> u64 {
    500
}

/// Default number of ingestion workers
pub fn default_worker_count() -> usize {
    2
}

/// Default generator endpoint (OpenAI-compatible chat completions)
pub fn default_generator_url() -> String {
    std::env::var("PAPERBASE_GENERATOR_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:11434/v1/chat/completions".to_string())
}

/// Default generator model
pub fn default_generator_model() -> String {
    "gpt-4.1-mini".to_string()
}

/// Default generator request timeout in seconds
pub fn default_generator_timeout_secs() -> u64 {
    120
}
