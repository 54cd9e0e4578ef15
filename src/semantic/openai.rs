//! Remote embedding provider backed by the OpenAI embeddings endpoint.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::embeddings::{check_dimensions, EmbeddingError, EmbeddingProvider};

const EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Default model and its output dimension.
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_DIMENSIONS: usize = 1536;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbeddings {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbeddings {
    pub fn new(
        api_key: String,
        model: &str,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::InitFailed("OpenAI API key is empty".to_string()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            model: model.to_string(),
            dimensions,
        })
    }

    fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input,
            encoding_format: "float",
        };

        let resp = self
            .client
            .post(EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| EmbeddingError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            log::warn!("openai embeddings error: status={status} body={text}");
            return Err(classify_status(status, text));
        }

        let mut parsed: EmbeddingResponse = resp
            .json()
            .map_err(|e| EmbeddingError::Transient(format!("malformed response: {e}")))?;

        if parsed.data.len() != input.len() {
            return Err(EmbeddingError::Transient(format!(
                "expected {} embeddings, got {}",
                input.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        for v in &vectors {
            check_dimensions(v, self.dimensions)?;
        }
        Ok(vectors)
    }
}

/// Map an HTTP failure status to retryable or not.
fn classify_status(status: StatusCode, body: String) -> EmbeddingError {
    let msg = format!("{status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        EmbeddingError::Transient(msg)
    } else {
        EmbeddingError::Rejected(msg)
    }
}

impl EmbeddingProvider for OpenAiEmbeddings {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.request(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Transient("No embedding returned".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.request(texts)
    }
}
