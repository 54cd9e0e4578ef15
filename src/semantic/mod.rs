//! Vector retrieval infrastructure for event embeddings.
//!
//! # Architecture
//!
//! - `embeddings`: provider trait and the local fastembed provider
//! - `openai`: remote embedding provider
//! - `retry`: bounded exponential backoff around any provider
//! - `index`: in-memory vector index with cosine similarity search
//! - `preprocess`: text cleanup for embedding input

pub mod embeddings;
mod index;
pub mod openai;
mod preprocess;
mod retry;

#[cfg(feature = "local-embeddings")]
pub use embeddings::LocalEmbeddings;
pub use embeddings::{check_dimensions, EmbeddingError, EmbeddingProvider};
pub use index::{cosine_similarity, EventMetadata, EventVector, IndexError, SearchResult, VectorIndex};
pub use openai::OpenAiEmbeddings;
pub use preprocess::prepare_event_text;
pub use retry::{RetryPolicy, Retrying};

/// Default local embedding model name
pub const DEFAULT_LOCAL_MODEL: &str = "bge-base-en-v1.5";
