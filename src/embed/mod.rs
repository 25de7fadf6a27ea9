//! Embedding generation
//!
//! An abstraction over embedding backends: local fastembed models behind the
//! `local-embed` feature, plus a deterministic hash-seeded backend that keeps
//! the whole pipeline (including index rebuild equality) exercisable offline.

#[cfg(feature = "local-embed")]
mod fastembed_impl;

#[cfg(feature = "local-embed")]
pub use fastembed_impl::*;

use crate::config::EmbeddingConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    #[cfg(feature = "local-embed")]
    {
        if config.model != HashEmbedder::MODEL_NAME {
            let embedder = FastEmbedder::new(config)?;
            return Ok(Box::new(embedder));
        }
    }

    Ok(Box::new(HashEmbedder::new(config.dimension)))
}

/// Helper to embed in batches
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: Vec<String>,
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(batch_size.max(1)) {
        let batch_texts: Vec<String> = chunk.to_vec();
        let embeddings = embedder.embed(batch_texts).await?;
        all_embeddings.extend(embeddings);
    }

    Ok(all_embeddings)
}

/// Deterministic offline embedder.
///
/// Derives a pseudo-embedding from a blake3 XOF over the text and
/// L2-normalizes it. Identical text always yields the identical vector,
/// which is exactly the property the rebuild guarantee and the test suite
/// rely on. Not a semantic model; use a real backend for quality retrieval.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub const MODEL_NAME: &'static str = "hash/deterministic-v1";

    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let vectors = texts
            .iter()
            .map(|text| {
                let mut reader = blake3::Hasher::new()
                    .update(text.as_bytes())
                    .finalize_xof();
                let mut bytes = vec![0u8; self.dimension * 4];
                reader.fill(&mut bytes);

                let mut vector: Vec<f32> = bytes
                    .chunks_exact(4)
                    .map(|b| {
                        let raw = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                        // Map to [-1, 1)
                        (raw as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32
                    })
                    .collect();

                let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for v in vector.iter_mut() {
                        *v /= norm;
                    }
                }
                vector
            })
            .collect();

        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(64);

        let a = embedder.embed(vec!["same text".to_string()]).await.unwrap();
        let b = embedder.embed(vec!["same text".to_string()]).await.unwrap();
        let c = embedder
            .embed(vec!["different text".to_string()])
            .await
            .unwrap();

        assert_eq!(a[0], b[0]);
        assert_ne!(a[0], c[0]);
        assert_eq!(a[0].len(), 64);

        let norm: f32 = a[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_embed_in_batches_preserves_order() {
        let embedder = HashEmbedder::new(16);
        let texts: Vec<String> = (0..10).map(|i| format!("text {}", i)).collect();

        let batched = embed_in_batches(&embedder, texts.clone(), 3).await.unwrap();
        let single = embedder.embed(texts).await.unwrap();

        assert_eq!(batched.len(), 10);
        assert_eq!(batched, single);
    }
}
