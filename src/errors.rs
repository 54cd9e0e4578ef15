use crate::semantic::{EmbeddingError, IndexError};
use crate::store::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum RankError {
    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("preferences for user {0} not found")]
    PreferencesNotFound(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl RankError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RankError::UserNotFound(_) | RankError::PreferencesNotFound(_)
        )
    }
}

pub type RankResult<T> = Result<T, RankError>;
