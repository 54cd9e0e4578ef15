use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::semantic::{EmbeddingError, EmbeddingProvider, OpenAiEmbeddings, Retrying};

/// Build the configured provider wrapped in retries.
pub fn build_provider(
    config: &EmbeddingConfig,
    base_path: &std::path::Path,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let policy = config.retry_policy();

    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbeddingBackend::OpenAi => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                EmbeddingError::InitFailed(format!("{} is not set", config.api_key_env))
            })?;
            let inner = OpenAiEmbeddings::new(
                api_key,
                &config.model,
                config.dimensions,
                config.request_timeout(),
            )?;
            Arc::new(Retrying::new(inner, policy))
        }

        #[cfg(feature = "local-embeddings")]
        EmbeddingBackend::Local => {
            let inner = crate::semantic::LocalEmbeddings::new(&config.model, base_path.to_path_buf())?;
            Arc::new(Retrying::new(inner, policy))
        }

        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingBackend::Local => {
            let _ = base_path;
            return Err(EmbeddingError::InitFailed(
                "built without the local-embeddings feature".to_string(),
            ));
        }
    };

    if provider.dimensions() != config.dimensions {
        return Err(EmbeddingError::DimensionMismatch {
            expected: config.dimensions,
            got: provider.dimensions(),
        });
    }

    Ok(provider)
}

/// Defers loading the model until the first embedding request.
///
/// Commands that never hit the cold-start path don't pay for a model
/// download or need an API key.
pub struct LazyProvider {
    config: EmbeddingConfig,
    base_path: std::path::PathBuf,
    inner: OnceCell<Arc<dyn EmbeddingProvider>>,
}

impl LazyProvider {
    pub fn new(config: EmbeddingConfig, base_path: std::path::PathBuf) -> Self {
        Self {
            config,
            base_path,
            inner: OnceCell::new(),
        }
    }

    fn get(&self) -> Result<&Arc<dyn EmbeddingProvider>, EmbeddingError> {
        self.inner
            .get_or_try_init(|| build_provider(&self.config, &self.base_path))
    }
}

impl EmbeddingProvider for LazyProvider {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.get()?.embed(text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.get()?.embed_batch(texts)
    }
}
