//! Persistent store boundary.
//!
//! The ranking core reads interaction history, preference rows, event details
//! and stored vectors through [`EventStore`]. Storage layout is the
//! implementation's business.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{
    CategoricalPreference, ClusterAssignment, ClusterTemplate, Event, Interaction,
};

mod csv;
#[cfg(test)]
pub mod memory;

pub use self::csv::CsvStore;

/// Errors that can occur while reading or writing the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// An event vector as persisted, before validation.
///
/// The embedding is kept as JSON text; turning it into a vector of the right
/// dimension is the loader's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVector {
    pub event_id: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    pub embedding: String,
}

impl StoredVector {
    pub fn new(
        event_id: impl Into<String>,
        category: Option<String>,
        created_at: Option<String>,
        embedding: &[f32],
    ) -> Result<Self, StoreError> {
        let embedding = serde_json::to_string(embedding)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        Ok(Self {
            event_id: event_id.into(),
            category,
            created_at,
            embedding,
        })
    }

    /// Decode the embedding. `None` when it is not a JSON array of numbers.
    pub fn parse_embedding(&self) -> Option<Vec<f32>> {
        serde_json::from_str::<Vec<f32>>(&self.embedding).ok()
    }
}

pub trait EventStore: Send + Sync {
    fn user_exists(&self, user_id: &str) -> Result<bool, StoreError>;

    /// Every known user id, in table order.
    fn user_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Interaction history of one user, oldest first.
    fn interactions(&self, user_id: &str) -> Result<Vec<Interaction>, StoreError>;

    fn preferences(&self, user_id: &str) -> Result<Option<CategoricalPreference>, StoreError>;

    fn all_preferences(&self) -> Result<Vec<CategoricalPreference>, StoreError>;

    fn event(&self, event_id: &str) -> Result<Option<Event>, StoreError>;

    fn events(&self) -> Result<Vec<Event>, StoreError>;

    /// Events whose event date is at or after `from`, soonest first.
    fn upcoming_events(&self, from: DateTime<Utc>, limit: usize) -> Result<Vec<Event>, StoreError>;

    fn stored_vectors(&self) -> Result<Vec<StoredVector>, StoreError>;

    /// Decoded vectors for the given events. Events without a decodable
    /// vector are simply absent from the map.
    fn vectors_for(&self, event_ids: &[String]) -> Result<HashMap<String, Vec<f32>>, StoreError> {
        let wanted: HashSet<&str> = event_ids.iter().map(String::as_str).collect();
        Ok(self
            .stored_vectors()?
            .into_iter()
            .filter(|row| wanted.contains(row.event_id.as_str()))
            .filter_map(|row| row.parse_embedding().map(|v| (row.event_id, v)))
            .collect())
    }

    fn append_interaction(&self, interaction: &Interaction) -> Result<(), StoreError>;

    /// Insert or replace the preference row of `pref.user_id`.
    fn save_preferences(&self, pref: &CategoricalPreference) -> Result<(), StoreError>;

    /// Insert or replace stored vectors by event id.
    fn save_vectors(&self, vectors: Vec<StoredVector>) -> Result<(), StoreError>;

    /// Users assigned to `cluster_id` by the last clustering run.
    fn cluster_members(&self, cluster_id: usize) -> Result<Vec<String>, StoreError>;

    /// Replace all cluster assignments and templates.
    fn save_clusters(
        &self,
        assignments: &[ClusterAssignment],
        templates: &[ClusterTemplate],
    ) -> Result<(), StoreError>;
}
