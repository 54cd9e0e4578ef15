//! Embedding-free event ranking.
//!
//! `score = cluster_match × cluster_match_weight + urgency`, where
//! `cluster_match` is the user's preference for the event's category and
//! urgency grows as the event date approaches.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::categories;
use crate::config::ScoringConfig;
use crate::errors::{RankError, RankResult};
use crate::events::{CategoricalPreference, Event};
use crate::preference::PreferenceModel;
use crate::store::EventStore;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEvent {
    pub event_id: String,
    pub score: f32,
    pub cluster_match: f32,
    pub urgency_score: f32,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_date: Option<DateTime<Utc>>,
}

pub struct Scorer {
    config: ScoringConfig,
    store: Arc<dyn EventStore>,
    preferences: PreferenceModel,
}

impl Scorer {
    pub fn new(config: ScoringConfig, store: Arc<dyn EventStore>, preferences: PreferenceModel) -> Self {
        Self {
            config,
            store,
            preferences,
        }
    }

    pub fn rank_events_for_user(&self, user_id: &str, limit: usize) -> RankResult<Vec<ScoredEvent>> {
        self.rank_events_for_user_at(user_id, limit, Utc::now())
    }

    /// Rank upcoming events for one user.
    ///
    /// Fails when the user or their preference row does not exist.
    pub fn rank_events_for_user_at(
        &self,
        user_id: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> RankResult<Vec<ScoredEvent>> {
        if !self.store.user_exists(user_id)? {
            return Err(RankError::UserNotFound(user_id.to_string()));
        }
        let stored = self
            .store
            .preferences(user_id)?
            .ok_or_else(|| RankError::PreferencesNotFound(user_id.to_string()))?;

        let decayed = self.preferences.decayed_preferences_at(user_id, now)?;
        let events = self.store.upcoming_events(now, self.config.upcoming_limit)?;

        let mut scored: Vec<ScoredEvent> = events
            .into_iter()
            .map(|event| self.score_event(event, &stored, &decayed, now))
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Rank for several users. Failing users are logged and left out.
    pub fn rank_events_for_users(
        &self,
        user_ids: &[String],
        limit: usize,
    ) -> BTreeMap<String, Vec<ScoredEvent>> {
        self.rank_events_for_users_at(user_ids, limit, Utc::now())
    }

    pub fn rank_events_for_users_at(
        &self,
        user_ids: &[String],
        limit: usize,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, Vec<ScoredEvent>> {
        let mut results = BTreeMap::new();

        for user_id in user_ids {
            match self.rank_events_for_user_at(user_id, limit, now) {
                Ok(ranked) => {
                    results.insert(user_id.clone(), ranked);
                }
                Err(e) => log::warn!("user={user_id} ranking failed: {e}"),
            }
        }

        results
    }

    pub fn rank_events_for_cluster(
        &self,
        cluster_id: usize,
        limit: usize,
    ) -> RankResult<BTreeMap<String, Vec<ScoredEvent>>> {
        self.rank_events_for_cluster_at(cluster_id, limit, Utc::now())
    }

    /// Rank for every member of a stored cluster. An unknown cluster has no
    /// members and yields an empty map; failing members are left out.
    pub fn rank_events_for_cluster_at(
        &self,
        cluster_id: usize,
        limit: usize,
        now: DateTime<Utc>,
    ) -> RankResult<BTreeMap<String, Vec<ScoredEvent>>> {
        let members = self.store.cluster_members(cluster_id)?;
        log::debug!("cluster={cluster_id} has {} members", members.len());
        Ok(self.rank_events_for_users_at(&members, limit, now))
    }

    fn score_event(
        &self,
        event: Event,
        stored: &CategoricalPreference,
        decayed: &BTreeMap<String, f32>,
        now: DateTime<Utc>,
    ) -> ScoredEvent {
        let cluster_match = cluster_match(event.category.as_deref(), stored, decayed);
        let urgency_score = event
            .event_date
            .map(|date| urgency_score(date, now, self.config.max_urgency_score))
            .unwrap_or(0.0);

        ScoredEvent {
            score: cluster_match * self.config.cluster_match_weight + urgency_score,
            event_id: event.id,
            cluster_match,
            urgency_score,
            title: event.title,
            category: event.category,
            event_date: event.event_date,
        }
    }
}

/// Preference for a category: decayed distribution first, then the stored
/// row, then the uniform baseline. Missing or unknown categories get the
/// baseline.
pub fn cluster_match(
    category: Option<&str>,
    stored: &CategoricalPreference,
    decayed: &BTreeMap<String, f32>,
) -> f32 {
    let Some(category) = category.filter(|c| categories::is_known(c)) else {
        return categories::UNIFORM_BASELINE;
    };

    decayed
        .get(category)
        .copied()
        .or_else(|| stored.score(category))
        .unwrap_or(categories::UNIFORM_BASELINE)
}

/// `max(0, max_score - days_until)` with `days_until` floored to whole days.
///
/// Overdue events have negative `days_until` and score above `max_score`.
pub fn urgency_score(event_date: DateTime<Utc>, now: DateTime<Utc>, max_score: f32) -> f32 {
    let days_until = (event_date - now).num_seconds().div_euclid(SECONDS_PER_DAY);
    (max_score - days_until as f32).max(0.0)
}
