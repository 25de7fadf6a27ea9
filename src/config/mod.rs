//! Configuration management for paperbase
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Qdrant collection name
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Ingestion job configuration
    #[serde(default)]
    pub jobs: JobConfig,

    /// Upload limits and streaming I/O
    #[serde(default)]
    pub upload: UploadConfig,

    /// Answer generation configuration
    #[serde(default)]
    pub answer: AnswerConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum characters per chunk
    #[serde(default = "default_chunk_max_chars")]
    pub max_chars: usize,

    /// Overlap characters between windowed chunks
    #[serde(default = "default_chunk_overlap")]
    pub overlap_chars: usize,

    /// Minimum chunk size (don't create tiny chunks)
    #[serde(default = "default_chunk_min_chars")]
    pub min_chars: usize,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved per question
    #[serde(default = "default_retrieval_top_k")]
    pub top_k: usize,

    /// Minimum cosine similarity for a chunk to count as evidence
    #[serde(default = "default_retrieval_min_score")]
    pub min_score: f32,
}

/// Job queue and worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Maximum attempts before a job is terminally failed
    #[serde(default = "default_job_max_attempts")]
    pub max_attempts: i32,

    /// How long a claimed job may sit in progress before it becomes
    /// reclaimable
    #[serde(default = "default_job_lease_secs")]
    pub lease_secs: i64,

    /// Worker poll interval in milliseconds
    #[serde(default = "default_job_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of ingestion workers
    #[serde(default = "default_worker_count")]
    pub workers: usize,
}

/// Upload limits and streaming I/O configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum file size in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Block size for streaming hash + storage writes
    #[serde(default = "default_io_block_size")]
    pub io_block_size: usize,
}

/// Answer generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerConfig {
    /// OpenAI-compatible chat completions endpoint
    #[serde(default = "default_generator_url")]
    pub generator_url: String,

    /// Generator model name
    #[serde(default = "default_generator_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for paperbase data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Directory for stored document blobs
    pub blob_dir: PathBuf,
}

impl PathsConfig {
    /// Derive all paths from a base directory
    pub fn from_base(base_dir: PathBuf) -> Self {
        Self {
            config_file: base_dir.join("config.toml"),
            db_file: base_dir.join("paperbase.db"),
            blob_dir: base_dir.join("blobs"),
            base_dir,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: default_chunk_max_chars(),
            overlap_chars: default_chunk_overlap(),
            min_chars: default_chunk_min_chars(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_retrieval_top_k(),
            min_score: default_retrieval_min_score(),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_job_max_attempts(),
            lease_secs: default_job_lease_secs(),
            poll_interval_ms: default_job_poll_interval_ms(),
            workers: default_worker_count(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            io_block_size: default_io_block_size(),
        }
    }
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            generator_url: default_generator_url(),
            model: default_generator_model(),
            timeout_secs: default_generator_timeout_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            collection_name: default_collection_name(),
            embedding: EmbeddingConfig::default(),
            chunk: ChunkConfig::default(),
            retrieval: RetrievalConfig::default(),
            jobs: JobConfig::default(),
            upload: UploadConfig::default(),
            answer: AnswerConfig::default(),
            paths: PathsConfig::from_base(default_base_dir()),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);

        if !path.exists() {
            return Err(Error::NotInitialized);
        }

        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(default_base_dir);
        config.paths = PathsConfig::from_base(base_dir);

        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, or fall back to defaults entirely
    pub fn load_or_default(path: Option<PathBuf>) -> Result<Self> {
        let config_file = path.unwrap_or_else(|| default_base_dir().join("config.toml"));
        if config_file.exists() {
            Self::load(&config_file)
        } else {
            let mut config = Config::default();
            if let Some(parent) = config_file.parent() {
                config.paths = PathsConfig::from_base(parent.to_path_buf());
            }
            Ok(config)
        }
    }

    /// Save configuration to its config file location
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(Error::Config("embedding.dimension must be > 0".to_string()));
        }
        if self.chunk.max_chars == 0 {
            return Err(Error::Config("chunk.max_chars must be > 0".to_string()));
        }
        if self.chunk.overlap_chars >= self.chunk.max_chars {
            return Err(Error::Config(
                "chunk.overlap_chars must be smaller than chunk.max_chars".to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::Config("retrieval.top_k must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_score) {
            return Err(Error::Config(
                "retrieval.min_score must be between 0 and 1".to_string(),
            ));
        }
        if self.jobs.max_attempts < 1 {
            return Err(Error::Config("jobs.max_attempts must be >= 1".to_string()));
        }
        if self.jobs.workers == 0 {
            return Err(Error::Config("jobs.workers must be >= 1".to_string()));
        }
        if self.upload.io_block_size == 0 {
            return Err(Error::Config("upload.io_block_size must be > 0".to_string()));
        }
        Ok(())
    }
}
