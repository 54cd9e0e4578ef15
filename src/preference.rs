//! User preference representations.
//!
//! Turns a user's interaction history into:
//! - a dense vector used for candidate retrieval (warm path from weighted
//!   event embeddings, cold path from declared interests)
//! - a per-category distribution with exponential time decay, used by the
//!   embedding-free scorer
//!
//! Interaction weight is `base_weight(action) * time_decay(age)` where the
//! decay halves every `half_life_days` and never changes sign.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::categories;
use crate::config::PreferenceConfig;
use crate::errors::RankResult;
use crate::events::{Action, CategoricalPreference, Interaction};
use crate::semantic::{check_dimensions, EmbeddingProvider};
use crate::store::EventStore;

const INTEREST_PREFIX: &str = "University student interested in";
const GENERIC_INTERESTS: &str = "general university events";

/// Exponential half-life decay: 1.0 at age 0, 0.5 at `half_life_days`.
///
/// Negative ages (timestamps in the future) count as age 0.
pub fn time_decay(age_days: f32, half_life_days: f32) -> f32 {
    let lambda = std::f32::consts::LN_2 / half_life_days;
    (-lambda * age_days.max(0.0)).exp()
}

/// Fractional days between `then` and `now`.
pub fn age_days(then: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    (now - then).num_seconds() as f32 / 86_400.0
}

/// Which path produced a user vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingSource {
    /// Weighted average of interacted event embeddings
    Warm,
    /// Embedded interest description
    Cold,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserEmbedding {
    pub vector: Vec<f32>,
    pub source: EmbeddingSource,
}

pub struct PreferenceModel {
    config: PreferenceConfig,
    dimensions: usize,
    store: Arc<dyn EventStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl PreferenceModel {
    pub fn new(
        config: PreferenceConfig,
        store: Arc<dyn EventStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let dimensions = embedder.dimensions();
        Self {
            config,
            dimensions,
            store,
            embedder,
        }
    }

    pub fn config(&self) -> &PreferenceConfig {
        &self.config
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Decay weight of an interaction. Missing timestamps are not decayed.
    pub fn decay_weight(&self, created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f32 {
        match created_at {
            Some(ts) => time_decay(age_days(ts, now), self.config.half_life_days),
            None => 1.0,
        }
    }

    /// Signed weight of one interaction.
    pub fn interaction_weight(&self, interaction: &Interaction, now: DateTime<Utc>) -> f32 {
        interaction.action.base_weight() * self.decay_weight(interaction.created_at, now)
    }

    pub fn user_embedding(&self, user_id: &str) -> RankResult<UserEmbedding> {
        self.user_embedding_at(user_id, Utc::now())
    }

    /// Compute the user vector through exactly one of the warm or cold paths.
    pub fn user_embedding_at(&self, user_id: &str, now: DateTime<Utc>) -> RankResult<UserEmbedding> {
        let interactions = self.store.interactions(user_id)?;

        if let Some(vector) = self.warm_embedding(&interactions, now)? {
            return Ok(UserEmbedding {
                vector,
                source: EmbeddingSource::Warm,
            });
        }

        if !interactions.is_empty() {
            log::info!(
                "user={user_id} interactions={} have no usable embeddings, using cold start",
                interactions.len()
            );
        }

        Ok(UserEmbedding {
            vector: self.cold_embedding(user_id)?,
            source: EmbeddingSource::Cold,
        })
    }

    /// `Σ wᵢ·eᵢ / Σ|wᵢ|` over interactions whose event vector is retrievable.
    ///
    /// Returns `None` when no interaction contributes any weight.
    pub fn warm_embedding(
        &self,
        interactions: &[Interaction],
        now: DateTime<Utc>,
    ) -> RankResult<Option<Vec<f32>>> {
        if interactions.is_empty() {
            return Ok(None);
        }

        let ids: Vec<String> = interactions
            .iter()
            .map(|i| i.event_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let vectors = self.store.vectors_for(&ids)?;

        let mut acc = vec![0.0f32; self.dimensions];
        let mut total = 0.0f32;
        let mut missing = 0usize;

        for interaction in interactions {
            let embedding = match vectors.get(&interaction.event_id) {
                Some(e) if e.len() == self.dimensions && e.iter().all(|x| x.is_finite()) => e,
                _ => {
                    missing += 1;
                    continue;
                }
            };

            let weight = self.interaction_weight(interaction, now);
            for (slot, value) in acc.iter_mut().zip(embedding) {
                *slot += weight * value;
            }
            total += weight.abs();
        }

        if missing > 0 {
            log::debug!("skipped {missing} interactions without a usable event embedding");
        }

        if total <= f32::EPSILON {
            return Ok(None);
        }

        Ok(Some(acc.into_iter().map(|v| v / total).collect()))
    }

    /// Interest description built from declared preferences above the threshold.
    pub fn cold_start_text(&self, pref: Option<&CategoricalPreference>) -> String {
        let interests: Vec<&str> = pref
            .map(|p| {
                categories::names()
                    .filter(|cat| {
                        p.score(cat)
                            .is_some_and(|s| s > self.config.cold_start_threshold)
                    })
                    .filter_map(categories::description)
                    .collect()
            })
            .unwrap_or_default();

        if interests.is_empty() {
            format!("{INTEREST_PREFIX} {GENERIC_INTERESTS}")
        } else {
            format!("{INTEREST_PREFIX}: {}", interests.join("; "))
        }
    }

    pub fn cold_embedding(&self, user_id: &str) -> RankResult<Vec<f32>> {
        let pref = self.store.preferences(user_id)?;
        let text = self.cold_start_text(pref.as_ref());
        log::debug!("user={user_id} cold start text={text:?}");

        let vector = self.embedder.embed(&text)?;
        check_dimensions(&vector, self.dimensions)?;
        Ok(vector)
    }

    pub fn decayed_preferences(&self, user_id: &str) -> RankResult<BTreeMap<String, f32>> {
        self.decayed_preferences_at(user_id, Utc::now())
    }

    pub fn decayed_preferences_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> RankResult<BTreeMap<String, f32>> {
        let interactions = self.store.interactions(user_id)?;
        self.decayed_distribution(&interactions, now)
    }

    /// Time-decayed category distribution over the full catalogue.
    ///
    /// Each interacted category gets an affinity
    /// `clamp((Σw·base / Σw + 1) / 2, 0, 1)` where 0.5 is neutral. Affinity is
    /// expressed relative to the uniform baseline (neutral = baseline,
    /// all-positive = twice the baseline), untouched categories sit at the
    /// baseline, and the whole distribution is rescaled to sum to 1.
    ///
    /// Returns an empty map when no interaction resolves to a known category.
    pub fn decayed_distribution(
        &self,
        interactions: &[Interaction],
        now: DateTime<Utc>,
    ) -> RankResult<BTreeMap<String, f32>> {
        let mut event_categories: HashMap<String, Option<String>> = HashMap::new();
        let mut weighted: HashMap<String, f32> = HashMap::new();
        let mut weights: HashMap<String, f32> = HashMap::new();

        for interaction in interactions {
            let category = match event_categories.get(&interaction.event_id) {
                Some(cached) => cached.clone(),
                None => {
                    let resolved = self
                        .store
                        .event(&interaction.event_id)?
                        .and_then(|e| e.category)
                        .filter(|c| categories::is_known(c));
                    event_categories.insert(interaction.event_id.clone(), resolved.clone());
                    resolved
                }
            };
            let Some(category) = category else {
                continue;
            };

            let decay = self.decay_weight(interaction.created_at, now);
            *weighted.entry(category.clone()).or_default() += interaction.action.base_weight() * decay;
            *weights.entry(category).or_default() += decay.abs();
        }

        if weighted.is_empty() {
            return Ok(BTreeMap::new());
        }

        let baseline = categories::UNIFORM_BASELINE;
        let raw: BTreeMap<String, f32> = categories::names()
            .map(|cat| {
                let value = match (weighted.get(cat), weights.get(cat)) {
                    (Some(ws), Some(w)) => {
                        let affinity = if *w > f32::EPSILON {
                            ((ws / w + 1.0) / 2.0).clamp(0.0, 1.0)
                        } else {
                            0.5
                        };
                        affinity * 2.0 * baseline
                    }
                    _ => baseline,
                };
                (cat.to_string(), value)
            })
            .collect();

        let total: f32 = raw.values().sum();
        if total <= f32::EPSILON {
            // every interacted category fully negative and nothing else: uniform
            return Ok(categories::names()
                .map(|cat| (cat.to_string(), baseline))
                .collect());
        }

        Ok(raw.into_iter().map(|(cat, v)| (cat, v / total)).collect())
    }

    /// Incremental update of a stored preference row after one interaction.
    ///
    /// Returns `None` when the update is skipped: `general` or unknown
    /// category, or feedback on an email sent outside the feedback window.
    /// A missing row starts from the uniform baseline.
    pub fn apply_feedback(
        &self,
        current: Option<CategoricalPreference>,
        user_id: &str,
        category: &str,
        action: Action,
        email_sent_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<CategoricalPreference> {
        if !categories::is_known(category) {
            return None;
        }

        if let Some(sent) = email_sent_at {
            let age = now - sent;
            if age > chrono::Duration::days(self.config.feedback_window_days) {
                log::info!(
                    "skipping preference update: email older than {} days",
                    self.config.feedback_window_days
                );
                return None;
            }
        }

        let mut pref = current.unwrap_or_else(|| CategoricalPreference::uniform(user_id));
        let before = pref.score(category).unwrap_or(categories::UNIFORM_BASELINE);
        let delta = self.config.score_increment * action.base_weight();
        pref.set(category, before + delta);
        Some(pref)
    }

    /// Append an interaction and update the stored preference row.
    ///
    /// The category is taken from the event when not given. Returns whether
    /// the preference row changed.
    pub fn record_feedback(
        &self,
        interaction: &Interaction,
        category: Option<&str>,
        email_sent_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> RankResult<bool> {
        self.store.append_interaction(interaction)?;

        let category = match category {
            Some(c) => categories::normalize(c),
            None => self
                .store
                .event(&interaction.event_id)?
                .and_then(|e| e.category)
                .unwrap_or_else(|| categories::GENERAL.to_string()),
        };

        let current = self.store.preferences(&interaction.user_id)?;
        match self.apply_feedback(
            current,
            &interaction.user_id,
            &category,
            interaction.action,
            email_sent_at,
            now,
        ) {
            Some(updated) => {
                self.store.save_preferences(&updated)?;
                log::debug!(
                    "updated preference user={} category={category} score={:?}",
                    interaction.user_id,
                    updated.score(&category)
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
