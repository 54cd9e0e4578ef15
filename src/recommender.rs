//! Candidate retrieval and business-rule reranking.
//!
//! The recommender owns a [`VectorIndex`] of event embeddings. For each user
//! it over-fetches nearest candidates, drops already-seen and out-of-horizon
//! events, then reranks by similarity, recency and category diversity.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::categories;
use crate::config::RecommendationConfig;
use crate::errors::RankResult;
use crate::events::parse_timestamp;
use crate::preference::PreferenceModel;
use crate::semantic::{EventMetadata, EventVector, SearchResult, VectorIndex};
use crate::store::EventStore;

const UNKNOWN_CATEGORY: &str = "unknown";
const REASON_SEPARATOR: &str = " • ";
const DEFAULT_REASON: &str = "Recommended for you";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub event_id: String,
    pub similarity_score: f32,
    pub recency_score: f32,
    pub diversity_penalty: f32,
    pub final_score: f32,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// A retrieved event with everything the reranker needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub event_id: String,
    pub similarity: f32,
    pub category: Option<String>,
    /// Whole days between now and the event date, always non-negative
    pub age_days: i64,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub loaded: usize,
    pub skipped: usize,
}

pub struct Recommender {
    config: RecommendationConfig,
    index: VectorIndex,
    store: Arc<dyn EventStore>,
    preferences: PreferenceModel,
}

impl Recommender {
    pub fn new(
        config: RecommendationConfig,
        store: Arc<dyn EventStore>,
        preferences: PreferenceModel,
    ) -> Self {
        let index = VectorIndex::new(preferences.dimensions());
        Self {
            config,
            index,
            store,
            preferences,
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn preferences(&self) -> &PreferenceModel {
        &self.preferences
    }

    /// Replace the index contents with every valid stored event vector.
    ///
    /// Rows with undecodable embeddings, the wrong dimension or non-finite
    /// components are skipped.
    pub fn load_index(&mut self) -> RankResult<LoadStats> {
        let rows = self.store.stored_vectors()?;
        let mut index = VectorIndex::with_capacity(self.index.dimensions(), rows.len());
        let mut stats = LoadStats::default();

        for row in rows {
            let Some(vector) = row.parse_embedding() else {
                log::warn!("event={} has a malformed embedding, skipping", row.event_id);
                stats.skipped += 1;
                continue;
            };

            let metadata = EventMetadata {
                category: row
                    .category
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .map(categories::normalize),
                created_at: row.created_at.as_deref().and_then(parse_timestamp),
            };

            match EventVector::new(row.event_id.clone(), vector, metadata, index.dimensions()) {
                Ok(entry) => {
                    index.insert(entry)?;
                    stats.loaded += 1;
                }
                Err(e) => {
                    log::warn!("event={} skipped: {e}", row.event_id);
                    stats.skipped += 1;
                }
            }
        }

        self.index = index;
        log::info!(
            "loaded {} event vectors into index, skipped {}",
            stats.loaded,
            stats.skipped
        );
        Ok(stats)
    }

    pub fn get_recommendations(
        &self,
        user_id: &str,
        top_k: Option<usize>,
    ) -> RankResult<Vec<Recommendation>> {
        self.get_recommendations_at(user_id, top_k, Utc::now())
    }

    pub fn get_recommendations_at(
        &self,
        user_id: &str,
        top_k: Option<usize>,
        now: DateTime<Utc>,
    ) -> RankResult<Vec<Recommendation>> {
        let top_k = top_k.unwrap_or(self.config.top_k);
        if top_k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }

        let user = self.preferences.user_embedding_at(user_id, now)?;
        if user.vector.is_empty() {
            return Ok(Vec::new());
        }

        let seen: HashSet<String> = self
            .store
            .interactions(user_id)?
            .into_iter()
            .map(|i| i.event_id)
            .collect();

        let candidate_count = top_k.saturating_mul(self.config.candidate_multiplier);
        let hits = self.index.search(&user.vector, candidate_count, &seen)?;
        log::debug!(
            "user={user_id} source={:?} retrieved {} candidates",
            user.source,
            hits.len()
        );

        let candidates = self.resolve_candidates(hits, now)?;
        let mut ranked = rerank(&self.config, candidates);
        ranked.truncate(top_k);
        Ok(ranked)
    }

    /// Recommendations for several users. A failing user gets an empty list.
    pub fn get_batch_recommendations(
        &self,
        user_ids: &[String],
        top_k: Option<usize>,
    ) -> BTreeMap<String, Vec<Recommendation>> {
        let now = Utc::now();
        user_ids
            .iter()
            .map(|user_id| {
                let recs = self
                    .get_recommendations_at(user_id, top_k, now)
                    .unwrap_or_else(|e| {
                        log::warn!("user={user_id} recommendation failed: {e}");
                        Vec::new()
                    });
                (user_id.clone(), recs)
            })
            .collect()
    }

    /// Attach event details and drop candidates without a date or past the horizon.
    fn resolve_candidates(
        &self,
        hits: Vec<SearchResult>,
        now: DateTime<Utc>,
    ) -> RankResult<Vec<Candidate>> {
        let mut candidates = Vec::with_capacity(hits.len());

        for hit in hits {
            let event = self.store.event(&hit.id)?;
            let date = event
                .as_ref()
                .and_then(|e| e.date())
                .or(hit.metadata.created_at);
            let Some(date) = date else {
                log::debug!("event={} has no date, dropping candidate", hit.id);
                continue;
            };

            let age_days = (now - date).num_days().abs();
            if age_days > self.config.max_days_old {
                continue;
            }

            let category = event
                .as_ref()
                .and_then(|e| e.category.clone())
                .or(hit.metadata.category);

            candidates.push(Candidate {
                event_id: hit.id,
                similarity: hit.score,
                category,
                age_days,
                title: event.map(|e| e.title),
            });
        }

        Ok(candidates)
    }
}

/// Score and order candidates.
///
/// Diversity is counted in similarity order (ties by event id), so the order
/// candidates arrive in does not affect the result.
pub fn rerank(config: &RecommendationConfig, mut candidates: Vec<Candidate>) -> Vec<Recommendation> {
    candidates.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });

    let mut seen_categories: HashMap<String, usize> = HashMap::new();
    let mut ranked: Vec<Recommendation> = candidates
        .into_iter()
        .map(|c| {
            let recency = recency_score(c.age_days, config.max_days_old);

            let key = c.category.clone().unwrap_or_else(|| UNKNOWN_CATEGORY.to_string());
            let count = seen_categories.entry(key).or_insert(0);
            let diversity_penalty = *count as f32 * config.diversity_penalty;
            *count += 1;

            let final_score = c.similarity * config.similarity_weight
                + recency * config.recency_weight
                - diversity_penalty;

            Recommendation {
                reason: reason(c.similarity, recency, c.category.as_deref()),
                event_id: c.event_id,
                similarity_score: c.similarity,
                recency_score: recency,
                diversity_penalty,
                final_score,
                title: c.title,
                category: c.category,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.final_score
            .total_cmp(&a.final_score)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
    ranked
}

/// Linear decay from 1.0 today to 0.0 at `max_days_old`.
pub fn recency_score(age_days: i64, max_days_old: i64) -> f32 {
    if max_days_old <= 0 {
        return 0.0;
    }
    (1.0 - age_days as f32 / max_days_old as f32).max(0.0)
}

/// Human-readable explanation of why an event was recommended.
pub fn reason(similarity: f32, recency: f32, category: Option<&str>) -> String {
    let mut parts = Vec::new();

    if similarity > 0.8 {
        parts.push("Matches your interests closely".to_string());
    } else if similarity > 0.6 {
        parts.push("Related to topics you enjoy".to_string());
    }

    if let Some(cat) = category.filter(|c| !c.is_empty()) {
        parts.push(format!("Includes {} content", categories::display_name(cat)));
    }

    if recency > 0.8 {
        parts.push("Happening soon".to_string());
    }

    if parts.is_empty() {
        DEFAULT_REASON.to_string()
    } else {
        parts.join(REASON_SEPARATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreferenceConfig;
    use crate::events::{Action, Interaction};
    use crate::store::memory::MemoryStore;
    use crate::store::StoredVector;
    use crate::tests::support::{event, FakeEmbedder};
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        parse_timestamp("2030-06-01T12:00:00Z").unwrap()
    }

    fn recommender(store: MemoryStore, embedder: FakeEmbedder) -> Recommender {
        let store: Arc<dyn EventStore> = Arc::new(store);
        let prefs = PreferenceModel::new(
            PreferenceConfig::default(),
            store.clone(),
            Arc::new(embedder),
        );
        let mut rec = Recommender::new(RecommendationConfig::default(), store, prefs);
        rec.load_index().unwrap();
        rec
    }

    fn candidate(id: &str, similarity: f32, category: Option<&str>, age_days: i64) -> Candidate {
        Candidate {
            event_id: id.to_string(),
            similarity,
            category: category.map(str::to_string),
            age_days,
            title: None,
        }
    }

    #[test]
    fn test_recency_score_linear() {
        assert_eq!(recency_score(0, 365), 1.0);
        assert!((recency_score(73, 365) - 0.8).abs() < 1e-6);
        assert_eq!(recency_score(365, 365), 0.0);
        assert_eq!(recency_score(500, 365), 0.0);
    }

    #[test]
    fn test_reason_thresholds() {
        assert_eq!(
            reason(0.85, 0.9, Some("tech_innovation")),
            "Matches your interests closely • Includes tech innovation content • Happening soon"
        );
        assert_eq!(reason(0.7, 0.1, None), "Related to topics you enjoy");
        assert_eq!(reason(0.2, 0.1, Some("general")), "Includes general content");
        assert_eq!(reason(0.2, 0.1, Some("")), "Recommended for you");
        assert_eq!(reason(0.6, 0.8, None), "Recommended for you");
    }

    #[test]
    fn test_diversity_penalty_grows_per_category() {
        let config = RecommendationConfig::default();
        let ranked = rerank(
            &config,
            vec![
                candidate("a", 0.9, Some("arts_music"), 1),
                candidate("b", 0.8, Some("arts_music"), 1),
                candidate("c", 0.7, Some("arts_music"), 1),
                candidate("d", 0.75, Some("food_dining"), 1),
            ],
        );

        let penalty = |id: &str| {
            ranked
                .iter()
                .find(|r| r.event_id == id)
                .unwrap()
                .diversity_penalty
        };
        assert_eq!(penalty("a"), 0.0);
        assert!((penalty("b") - 0.1).abs() < 1e-6);
        assert!(penalty("c") > penalty("b"));
        assert_eq!(penalty("d"), 0.0);
    }

    #[test]
    fn test_final_score_formula() {
        let config = RecommendationConfig::default();
        let ranked = rerank(&config, vec![candidate("a", 0.5, None, 0)]);
        assert!((ranked[0].final_score - (0.5 * 0.7 + 1.0 * 0.3)).abs() < 1e-6);
    }

    #[test]
    fn test_rerank_is_order_independent() {
        let config = RecommendationConfig::default();
        let input = vec![
            candidate("x", 0.7, Some("arts_music"), 10),
            candidate("y", 0.7, Some("arts_music"), 10),
            candidate("z", 0.7, Some("arts_music"), 10),
            candidate("w", 0.9, None, 3),
        ];
        let mut reversed = input.clone();
        reversed.reverse();

        let ids = |recs: Vec<Recommendation>| -> Vec<String> {
            recs.into_iter().map(|r| r.event_id).collect()
        };
        assert_eq!(ids(rerank(&config, input)), ids(rerank(&config, reversed)));
    }

    #[test]
    fn test_load_index_skips_bad_rows() {
        let store = MemoryStore::new()
            .with_vector("ok", Some("arts_music"), &[1.0, 0.0, 0.0])
            .with_vector("short", None, &[1.0, 0.0])
            .with_raw_vector(StoredVector {
                event_id: "garbage".into(),
                category: None,
                created_at: None,
                embedding: "not json".into(),
            });
        let mut rec = recommender(store, FakeEmbedder::new(3));

        let stats = rec.load_index().unwrap();
        assert_eq!(stats, LoadStats { loaded: 1, skipped: 2 });
        assert_eq!(rec.index().len(), 1);

        // reloading replaces rather than duplicates
        rec.load_index().unwrap();
        assert_eq!(rec.index().len(), 1);
    }

    #[test]
    fn test_excludes_interacted_events_even_when_nearest() {
        let soon = Some(now() + Duration::days(2));
        let store = MemoryStore::new()
            .with_event(event("liked", Some("arts_music"), soon))
            .with_event(event("near", Some("arts_music"), soon))
            .with_event(event("far", Some("food_dining"), soon))
            .with_vector("liked", None, &[1.0, 0.0, 0.0])
            .with_vector("near", None, &[0.9, 0.1, 0.0])
            .with_vector("far", None, &[0.0, 0.0, 1.0])
            .with_interaction(
                Interaction::new("u1", "liked", Action::Like, Some(now())).unwrap(),
            );
        let rec = recommender(store, FakeEmbedder::new(3));

        let recs = rec.get_recommendations_at("u1", None, now()).unwrap();
        assert!(recs.iter().all(|r| r.event_id != "liked"));
        assert_eq!(recs[0].event_id, "near");
        assert!(recs.len() <= 10);
    }

    #[test]
    fn test_drops_undated_and_stale_candidates() {
        let store = MemoryStore::new()
            .with_event(event("fresh", None, Some(now() + Duration::days(1))))
            .with_event(event("stale", None, Some(now() - Duration::days(400))))
            .with_vector("fresh", None, &[1.0, 0.0])
            .with_vector("stale", None, &[1.0, 0.0])
            .with_vector("undated", None, &[1.0, 0.0]);
        let rec = recommender(store, FakeEmbedder::new(2).returning(vec![1.0, 0.0]));

        let recs = rec.get_recommendations_at("new-user", None, now()).unwrap();
        let ids: Vec<_> = recs.iter().map(|r| r.event_id.as_str()).collect();
        assert_eq!(ids, vec!["fresh"]);
    }

    #[test]
    fn test_cold_user_still_gets_results() {
        let store = MemoryStore::new()
            .with_event(event("e1", Some("arts_music"), Some(now())))
            .with_vector("e1", None, &[0.0, 1.0]);
        let rec = recommender(store, FakeEmbedder::new(2).returning(vec![0.2, 0.8]));

        let recs = rec.get_recommendations_at("stranger", Some(5), now()).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].title.as_deref(), Some("Event e1"));
    }

    #[test]
    fn test_batch_isolates_failures() {
        // batch runs against the wall clock
        let store = MemoryStore::new()
            .with_event(event("e1", None, Some(Utc::now())))
            .with_vector("e1", None, &[1.0, 0.0])
            .failing_for("broken");
        let rec = recommender(store, FakeEmbedder::new(2).returning(vec![1.0, 0.0]));

        let out = rec.get_batch_recommendations(&["broken".to_string(), "ok".to_string()], None);
        assert_eq!(out.len(), 2);
        assert!(out["broken"].is_empty());
        assert_eq!(out["ok"].len(), 1);
    }
}
