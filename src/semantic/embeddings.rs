//! Embedding providers.
//!
//! The ranking core only sees [`EmbeddingProvider`]: text in, vector of known
//! dimension out. Two implementations ship with the crate:
//! - [`LocalEmbeddings`]: fastembed model on the local machine
//! - [`OpenAiEmbeddings`](super::openai::OpenAiEmbeddings): remote API
//!
//! Both can be wrapped in [`Retrying`](super::retry::Retrying) to absorb
//! transient failures.

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    /// Worth retrying: network errors, rate limits, server errors.
    #[error("Transient embedding failure: {0}")]
    Transient(String),

    /// Deterministic failure: bad input, bad credentials.
    #[error("Embedding request rejected: {0}")]
    Rejected(String),

    #[error("Embedding has {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Provider returned {got} embeddings for {expected} texts")]
    CountMismatch { expected: usize, got: usize },
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::Transient(_))
    }
}

/// Text to vector function of fixed output dimension.
pub trait EmbeddingProvider: Send + Sync {
    /// Output dimension of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Generate an embedding for a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Generate embeddings for multiple texts, in input order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Check a provider result against the expected dimension.
pub fn check_dimensions(vector: &[f32], expected: usize) -> Result<(), EmbeddingError> {
    if vector.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            got: vector.len(),
        });
    }
    Ok(())
}

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbeddings;

#[cfg(feature = "local-embeddings")]
mod local {
    use fastembed::{InitOptions, TextEmbedding};
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::{EmbeddingError, EmbeddingProvider};

    /// Wrapper around fastembed's TextEmbedding model.
    /// Uses a Mutex because fastembed's embed() requires &mut self.
    pub struct LocalEmbeddings {
        model: Mutex<TextEmbedding>,
        model_name: String,
        dimensions: usize,
    }

    impl LocalEmbeddings {
        /// Load a model by name, downloading it into `cache_dir/models` on first use.
        pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
            let model_enum = Self::parse_model_name(model_name)?;

            let models_dir = cache_dir.join("models");
            std::fs::create_dir_all(&models_dir).map_err(|e| {
                EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
            })?;

            let options = InitOptions::new(model_enum)
                .with_cache_dir(models_dir)
                .with_show_download_progress(true);

            let mut model = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

            let dimensions = Self::detect_dimensions(&mut model)?;
            log::info!("loaded local embedding model={model_name} dimensions={dimensions}");

            Ok(Self {
                model: Mutex::new(model),
                model_name: model_name.to_string(),
                dimensions,
            })
        }

        pub fn name(&self) -> &str {
            &self.model_name
        }

        fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
            match name.to_lowercase().as_str() {
                "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
                "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
                "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
                "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
                _ => Err(EmbeddingError::InvalidModel(format!(
                    "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5",
                    name
                ))),
            }
        }

        fn detect_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
            let test_embeddings = model.embed(vec!["test"], None).map_err(|e| {
                EmbeddingError::InitFailed(format!("Failed to detect dimensions: {}", e))
            })?;

            test_embeddings
                .first()
                .map(|v| v.len())
                .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
        }
    }

    impl EmbeddingProvider for LocalEmbeddings {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut model = self.model.lock().map_err(|e| {
                EmbeddingError::Transient(format!("Failed to acquire model lock: {}", e))
            })?;

            let embeddings = model
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::Rejected(e.to_string()))?;

            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::Rejected("No embedding returned".to_string()))
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(vec![]);
            }

            let mut model = self.model.lock().map_err(|e| {
                EmbeddingError::Transient(format!("Failed to acquire model lock: {}", e))
            })?;

            model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbeddingError::Rejected(e.to_string()))
        }
    }

}
