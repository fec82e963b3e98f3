//! Text embedders.
//!
//! The embedding model is opaque to the rest of the crate: anything that
//! turns text into a fixed-length vector can implement [`Embedder`].

use anyhow::{Result, bail};
use sha2::{Digest, Sha256};

use crate::model::EMBEDDING_DIM;

/// Turns text into a fixed-length vector.
///
/// Object-safe so converters can hold `Arc<dyn Embedder>`.
pub trait Embedder: Send + Sync {
    /// Short identifier, logged with every conversion.
    fn name(&self) -> &str;

    /// Length of every vector returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Embedder) {}
};

// ---------------------------------------------------------------------------
// Feature hashing
// ---------------------------------------------------------------------------

/// Deterministic bag-of-words embedder.
///
/// Each lowercase token and each adjacent token pair is hashed with SHA-256
/// into one of `dimension` buckets with a pseudo-random sign; the result is
/// L2-normalised. Texts sharing vocabulary get a high cosine similarity,
/// which is enough for "find related plans" without a model download.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn accumulate(&self, feature: &str, weight: f32, out: &mut [f32]) {
        let digest = Sha256::digest(feature.as_bytes());
        let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
            % self.dimension;
        let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
        out[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "feature-hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.dimension == 0 {
            bail!("embedder configured with zero dimensions");
        }

        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();
        if tokens.is_empty() {
            bail!("nothing to embed: text has no alphanumeric tokens");
        }

        let mut vector = vec![0.0f32; self.dimension];
        for token in &tokens {
            self.accumulate(token, 1.0, &mut vector);
        }
        for pair in tokens.windows(2) {
            self.accumulate(&format!("{} {}", pair[0], pair[1]), 0.5, &mut vector);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

// ---------------------------------------------------------------------------
// fastembed (AllMiniLM-L6-v2)
// ---------------------------------------------------------------------------

#[cfg(feature = "fastembed")]
pub use self::minilm::FastEmbedder;

#[cfg(feature = "fastembed")]
mod minilm {
    use std::path::PathBuf;

    use anyhow::{Context, Result};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    use super::Embedder;
    use crate::model::EMBEDDING_DIM;

    /// Sentence embeddings from AllMiniLM-L6-v2 (384 dimensions).
    pub struct FastEmbedder {
        model: TextEmbedding,
    }

    impl FastEmbedder {
        /// Load the model, downloading it into `cache_dir` on first use.
        pub fn try_new(cache_dir: PathBuf) -> Result<Self> {
            std::fs::create_dir_all(&cache_dir).with_context(|| {
                format!("failed to create model cache {}", cache_dir.display())
            })?;
            let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(false);
            let model = TextEmbedding::try_new(options)
                .context("failed to initialise AllMiniLM-L6-v2")?;
            Ok(Self { model })
        }
    }

    impl Embedder for FastEmbedder {
        fn name(&self) -> &str {
            "all-minilm-l6-v2"
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIM
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut vectors = self
                .model
                .embed(vec![text], None)
                .context("embedding model failed")?;
            vectors.pop().context("embedding model returned no vector")
        }
    }
}
