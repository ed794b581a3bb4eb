//! Embedding generation boundary.
//!
//! The engine treats embedding generation as a black-box `text -> vector`
//! function behind [`EmbeddingProvider`]. The production implementation uses
//! fastembed with the AllMiniLML6V2 model (384 dimensions); tests supply
//! deterministic stubs.

use std::path::PathBuf;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use thiserror::Error;

use crate::vector::VectorDimension;

/// Errors from embedding generation.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error(
        "Failed to initialize embedding model: {0}\nSuggestion: Ensure you have internet connection for first-time model download"
    )]
    ModelInit(String),

    #[error("Failed to generate embedding: {0}")]
    Generation(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for turning free text into a fixed-length vector.
///
/// Implementations must be thread-safe; the recall pipeline and the capture
/// path may embed concurrently.
pub trait EmbeddingProvider: Send + Sync {
    /// Generates one embedding per input text.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// The dimension of vectors this provider produces.
    fn dimension(&self) -> VectorDimension;

    /// Generates an embedding for a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut embeddings = self.embed_batch(&[text])?;
        embeddings
            .pop()
            .ok_or_else(|| EmbeddingError::Generation("model returned no embedding".to_string()))
    }
}

/// FastEmbed implementation using the AllMiniLML6V2 model.
///
/// Produces 384-dimensional embeddings. The model handle lives behind a
/// mutex because fastembed requires `&mut` for inference.
pub struct FastEmbedProvider {
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("dimension", &self.dimension.get())
            .field("model", &"<TextEmbedding>")
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates a provider with the default model, caching model files under
    /// `cache_dir`.
    ///
    /// The first call downloads the model; pass `show_progress` to surface
    /// download progress to an interactive user.
    pub fn new(cache_dir: PathBuf, show_progress: bool) -> Result<Self, EmbeddingError> {
        let mut model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(show_progress),
        )
        .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;

        // Probe the model once to learn its output dimension
        let probe = model
            .embed(vec!["probe"], None)
            .map_err(|e| EmbeddingError::Generation(e.to_string()))?;
        let dim = probe
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Generation("model returned no embedding".to_string()))?
            .len();
        let dimension =
            VectorDimension::new(dim).map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;

        Ok(Self {
            model: Mutex::new(model),
            dimension,
        })
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let owned: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        let embeddings = self
            .model
            .lock()
            .embed(owned, None)
            .map_err(|e| EmbeddingError::Generation(e.to_string()))?;

        for embedding in &embeddings {
            if embedding.len() != self.dimension.get() {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension.get(),
                    actual: embedding.len(),
                });
            }
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}
