//! In-memory vector index with cosine similarity search.
//!
//! Stores event embeddings with their metadata and answers top-K queries by
//! scanning every entry. Corpus sizes are in the low thousands, so a linear
//! scan is all that is needed.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Metadata stored next to each event vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventMetadata {
    pub category: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// An event embedding with its metadata.
///
/// Construction checks length and finiteness, so a value of this type can
/// always be inserted into an index of the same dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct EventVector {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: EventMetadata,
}

impl EventVector {
    pub fn new(
        id: impl Into<String>,
        vector: Vec<f32>,
        metadata: EventMetadata,
        dimensions: usize,
    ) -> Result<Self, IndexError> {
        validate(&vector, dimensions)?;
        Ok(Self {
            id: id.into(),
            vector,
            metadata,
        })
    }
}

/// Search result from the vector index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Event ID
    pub id: String,
    /// Cosine similarity score (-1.0 to 1.0)
    pub score: f32,
    pub metadata: EventMetadata,
}

/// In-memory vector index for candidate retrieval.
///
/// Entries keep their insertion position, which is the tie-break between
/// equal similarity scores. Re-adding an existing ID replaces the vector in
/// place. Not synchronized: callers either own an instance or serialize
/// `load`-style writes against searches themselves.
pub struct VectorIndex {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    metadata: Vec<EventMetadata>,
    /// Event ID -> position in the parallel vectors above
    positions: HashMap<String, usize>,
    /// Expected embedding dimensions
    dimensions: usize,
}

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self::with_capacity(dimensions, 0)
    }

    /// Create an index with pre-allocated capacity.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
            vectors: Vec::with_capacity(capacity),
            metadata: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    /// Get the expected embedding dimensions.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Get the number of entries in the index.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Insert or replace an entry.
    ///
    /// Returns an error if the vector length differs from the index
    /// dimensions or any component is NaN or infinite.
    pub fn add(
        &mut self,
        id: impl Into<String>,
        vector: Vec<f32>,
        metadata: EventMetadata,
    ) -> Result<(), IndexError> {
        validate(&vector, self.dimensions)?;
        let id = id.into();

        if let Some(&pos) = self.positions.get(&id) {
            self.vectors[pos] = vector;
            self.metadata[pos] = metadata;
            return Ok(());
        }

        self.positions.insert(id.clone(), self.ids.len());
        self.ids.push(id);
        self.vectors.push(vector);
        self.metadata.push(metadata);
        Ok(())
    }

    /// Insert a pre-validated event vector.
    pub fn insert(&mut self, entry: EventVector) -> Result<(), IndexError> {
        self.add(entry.id, entry.vector, entry.metadata)
    }

    /// Remove an entry by event ID. No-op if absent.
    pub fn remove(&mut self, id: &str) {
        let Some(pos) = self.positions.remove(id) else {
            return;
        };

        // shift instead of swap so insertion order stays intact
        self.ids.remove(pos);
        self.vectors.remove(pos);
        self.metadata.remove(pos);
        for later in &self.ids[pos..] {
            if let Some(p) = self.positions.get_mut(later) {
                *p -= 1;
            }
        }
    }

    /// Check if an entry exists for the given ID.
    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// Get the vector and metadata stored for an ID.
    pub fn get(&self, id: &str) -> Option<(&[f32], &EventMetadata)> {
        self.positions
            .get(id)
            .map(|&pos| (self.vectors[pos].as_slice(), &self.metadata[pos]))
    }

    /// Get all event IDs in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.ids.iter().map(String::as_str)
    }

    /// Search for the `top_k` most similar vectors, skipping `exclude_ids`.
    ///
    /// A zero-norm or non-finite query has no direction and yields an empty
    /// result. Results are sorted by similarity (highest first); ties keep
    /// insertion order.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<SearchResult>, IndexError> {
        self.scan(query, top_k, |id, _| !exclude_ids.contains(id))
    }

    /// Like [`search`](Self::search), restricted to entries whose metadata
    /// satisfies `predicate`.
    pub fn search_with_filter<P>(
        &self,
        query: &[f32],
        top_k: usize,
        predicate: P,
    ) -> Result<Vec<SearchResult>, IndexError>
    where
        P: Fn(&EventMetadata) -> bool,
    {
        self.scan(query, top_k, |_, meta| predicate(meta))
    }

    fn scan<F>(&self, query: &[f32], top_k: usize, keep: F) -> Result<Vec<SearchResult>, IndexError>
    where
        F: Fn(&str, &EventMetadata) -> bool,
    {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        if top_k == 0 || !query_norm.is_finite() || query_norm < f32::EPSILON {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .iter()
            .enumerate()
            .filter(|(pos, _)| keep(&self.ids[*pos], &self.metadata[*pos]))
            .filter_map(|(pos, vector)| {
                let score = cosine_similarity_with_norm(query, vector, query_norm)?;
                Some((score, pos))
            })
            .collect();

        // stable sort: equal scores keep insertion order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, pos)| SearchResult {
                id: self.ids[pos].clone(),
                score,
                metadata: self.metadata[pos].clone(),
            })
            .collect())
    }

    /// Clear all entries from the index.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.vectors.clear();
        self.metadata.clear();
        self.positions.clear();
    }
}

/// Cosine similarity of two vectors.
///
/// Returns `None` when either vector has zero norm or the result is not finite.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    cosine_similarity_with_norm(a, b, l2_norm(a))
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity with the query norm precomputed.
fn cosine_similarity_with_norm(query: &[f32], target: &[f32], query_norm: f32) -> Option<f32> {
    let target_norm = l2_norm(target);
    if !target_norm.is_finite() || target_norm < f32::EPSILON || query_norm < f32::EPSILON {
        return None;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    let score = dot_product / (query_norm * target_norm);
    score.is_finite().then_some(score)
}

fn validate(vector: &[f32], dimensions: usize) -> Result<(), IndexError> {
    if vector.len() != dimensions {
        return Err(IndexError::DimensionMismatch {
            expected: dimensions,
            got: vector.len(),
        });
    }
    if let Some(position) = vector.iter().position(|x| !x.is_finite()) {
        return Err(IndexError::NonFiniteComponent { position });
    }
    Ok(())
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Vector component {position} is NaN or infinite")]
    NonFiniteComponent { position: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(category: &str) -> EventMetadata {
        EventMetadata {
            category: Some(category.to_string()),
            created_at: None,
        }
    }

    fn no_excludes() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn test_new_index() {
        let index = VectorIndex::new(384);
        assert_eq!(index.dimensions(), 384);
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_add_and_get() {
        let mut index = VectorIndex::new(3);
        index
            .add("a", vec![1.0, 0.0, 0.0], meta("arts_music"))
            .unwrap();

        assert_eq!(index.len(), 1);
        assert!(index.contains("a"));

        let (vector, metadata) = index.get("a").unwrap();
        assert_eq!(vector, &[1.0, 0.0, 0.0]);
        assert_eq!(metadata.category.as_deref(), Some("arts_music"));
    }

    #[test]
    fn test_add_dimension_mismatch() {
        let mut index = VectorIndex::new(3);
        let result = index.add("a", vec![1.0, 0.0, 0.0, 0.0], EventMetadata::default());
        assert_eq!(
            result,
            Err(IndexError::DimensionMismatch {
                expected: 3,
                got: 4
            })
        );
        assert!(index.is_empty());
    }

    #[test]
    fn test_add_non_finite_rejected() {
        let mut index = VectorIndex::new(3);
        let result = index.add("a", vec![1.0, f32::NAN, 0.0], EventMetadata::default());
        assert_eq!(result, Err(IndexError::NonFiniteComponent { position: 1 }));

        let result = index.add("b", vec![f32::INFINITY, 0.0, 0.0], EventMetadata::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_event_vector_validates() {
        assert!(EventVector::new("a", vec![1.0, 2.0], EventMetadata::default(), 3).is_err());
        let entry = EventVector::new("a", vec![1.0, 2.0, 3.0], EventMetadata::default(), 3).unwrap();

        let mut index = VectorIndex::new(3);
        index.insert(entry).unwrap();
        assert!(index.contains("a"));
    }

    #[test]
    fn test_add_replaces_existing_id() {
        let mut index = VectorIndex::new(3);
        index.add("a", vec![1.0, 0.0, 0.0], meta("arts_music")).unwrap();
        index.add("b", vec![0.0, 0.0, 1.0], meta("food_dining")).unwrap();
        index.add("a", vec![0.0, 1.0, 0.0], meta("tech_innovation")).unwrap();

        assert_eq!(index.len(), 2);

        let results = index.search(&[0.0, 1.0, 0.0], 1, &no_excludes()).unwrap();
        assert_eq!(results[0].id, "a");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(results[0].metadata.category.as_deref(), Some("tech_innovation"));

        // replaced entry keeps its original position
        let ids: Vec<&str> = index.ids().collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_remove() {
        let mut index = VectorIndex::new(3);
        index.add("a", vec![1.0, 0.0, 0.0], EventMetadata::default()).unwrap();
        index.add("b", vec![0.0, 1.0, 0.0], EventMetadata::default()).unwrap();
        index.add("c", vec![0.0, 0.0, 1.0], EventMetadata::default()).unwrap();

        index.remove("a");
        index.remove("missing");

        assert!(!index.contains("a"));
        assert_eq!(index.len(), 2);
        let ids: Vec<&str> = index.ids().collect();
        assert_eq!(ids, vec!["b", "c"]);

        // positions stay consistent after the shift
        assert_eq!(index.get("c").unwrap().0, &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_clear() {
        let mut index = VectorIndex::new(3);
        index.add("a", vec![1.0, 0.0, 0.0], EventMetadata::default()).unwrap();
        index.clear();
        assert!(index.is_empty());
        assert!(!index.contains("a"));
    }

    #[test]
    fn test_search_exact_match() {
        let mut index = VectorIndex::new(3);
        index.add("a", vec![1.0, 0.0, 0.0], EventMetadata::default()).unwrap();
        index.add("b", vec![0.0, 1.0, 0.0], EventMetadata::default()).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 1, &no_excludes()).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_sorted_descending() {
        let mut index = VectorIndex::new(3);
        index.add("far", vec![0.0, 1.0, 0.0], EventMetadata::default()).unwrap();
        index.add("near", vec![1.0, 0.1, 0.0], EventMetadata::default()).unwrap();
        index.add("mid", vec![1.0, 1.0, 0.0], EventMetadata::default()).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 10, &no_excludes()).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
    }

    #[test]
    fn test_search_ties_keep_insertion_order() {
        let mut index = VectorIndex::new(2);
        for id in ["x", "y", "z"] {
            index.add(id, vec![1.0, 1.0], EventMetadata::default()).unwrap();
        }

        let results = index.search(&[1.0, 1.0], 3, &no_excludes()).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_search_with_limit() {
        let mut index = VectorIndex::new(3);
        for i in 0..10 {
            index
                .add(format!("e{i}"), vec![1.0, i as f32 * 0.1, 0.0], EventMetadata::default())
                .unwrap();
        }

        let results = index.search(&[1.0, 0.0, 0.0], 3, &no_excludes()).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_search_never_returns_excluded() {
        let mut index = VectorIndex::new(3);
        index.add("a", vec![1.0, 0.0, 0.0], EventMetadata::default()).unwrap();
        index.add("b", vec![0.9, 0.1, 0.0], EventMetadata::default()).unwrap();
        index.add("c", vec![0.8, 0.2, 0.0], EventMetadata::default()).unwrap();

        let exclude: HashSet<String> = ["a".to_string(), "c".to_string()].into();
        let results = index.search(&[1.0, 0.0, 0.0], 10, &exclude).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
    }

    #[test]
    fn test_search_zero_norm_query_is_empty() {
        let mut index = VectorIndex::new(3);
        index.add("a", vec![1.0, 0.0, 0.0], EventMetadata::default()).unwrap();

        let results = index.search(&[0.0, 0.0, 0.0], 10, &no_excludes()).unwrap();
        assert!(results.is_empty());

        let results = index.search(&[f32::NAN, 0.0, 0.0], 10, &no_excludes()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_search_query_dimension_mismatch() {
        let index = VectorIndex::new(3);
        let result = index.search(&[1.0, 0.0], 10, &no_excludes());
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_search_skips_zero_norm_entries() {
        let mut index = VectorIndex::new(3);
        index.add("zero", vec![0.0, 0.0, 0.0], EventMetadata::default()).unwrap();
        index.add("a", vec![1.0, 0.0, 0.0], EventMetadata::default()).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 10, &no_excludes()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[test]
    fn test_search_with_filter() {
        let mut index = VectorIndex::new(3);
        index.add("a", vec![1.0, 0.0, 0.0], meta("tech_innovation")).unwrap();
        index.add("b", vec![0.9, 0.1, 0.0], meta("arts_music")).unwrap();
        index.add("c", vec![0.8, 0.2, 0.0], meta("arts_music")).unwrap();

        let results = index
            .search_with_filter(&[1.0, 0.0, 0.0], 10, |m| {
                m.category.as_deref() == Some("arts_music")
            })
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_cosine_similarity_self_is_max() {
        let a = [0.3, -1.2, 4.0];
        let b = [1.0, 1.0, 1.0];
        let self_sim = cosine_similarity(&a, &a).unwrap();
        assert!((self_sim - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).unwrap() <= self_sim);
        assert!(cosine_similarity(&a, &[0.0, 0.0, 0.0]).is_none());
    }
}
