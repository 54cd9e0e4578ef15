//! Validated records shared by the ranking core.
//!
//! Rows coming out of the store are checked here once, so the preference
//! model, recommender and scorer only ever see well-formed values.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::categories;

/// Errors raised while constructing records.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RecordError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("unknown interaction action: {0}")]
    UnknownAction(String),
}

/// Parse the timestamp formats found in event and interaction rows.
///
/// Accepts RFC 3339 (`2024-01-15T10:30:00Z`, offsets, fractional seconds),
/// naive date-times treated as UTC, and bare dates at midnight UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Kind of feedback a user gave on an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Like,
    Dislike,
    Click,
}

impl Action {
    /// Signed contribution of one interaction before time decay.
    pub fn base_weight(self) -> f32 {
        match self {
            Action::Like => 1.0,
            Action::Click => 0.5,
            Action::Dislike => -0.5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Like => "like",
            Action::Dislike => "dislike",
            Action::Click => "click",
        }
    }
}

impl FromStr for Action {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "like" => Ok(Action::Like),
            "dislike" => Ok(Action::Dislike),
            "click" => Ok(Action::Click),
            other => Err(RecordError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only interaction log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interaction {
    pub user_id: String,
    pub event_id: String,
    pub action: Action,
    /// `None` when the stored timestamp could not be parsed.
    pub created_at: Option<DateTime<Utc>>,
}

impl Interaction {
    pub fn new(
        user_id: impl Into<String>,
        event_id: impl Into<String>,
        action: Action,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Self, RecordError> {
        let user_id = user_id.into();
        let event_id = event_id.into();
        if user_id.trim().is_empty() {
            return Err(RecordError::EmptyField("user_id"));
        }
        if event_id.trim().is_empty() {
            return Err(RecordError::EmptyField("event_id"));
        }

        Ok(Self {
            user_id,
            event_id,
            action,
            created_at,
        })
    }
}

/// Event details needed for ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub event_date: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Date used for recency: the event date, falling back to creation time.
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.event_date.or(self.created_at)
    }

    /// Text that gets embedded for this event.
    pub fn embedding_text(&self) -> String {
        let title = self.title.trim();
        let description = self.description.trim();
        if title.is_empty() {
            description.to_string()
        } else if description.is_empty() {
            title.to_string()
        } else {
            format!("{}\n{}", title, description)
        }
    }
}

/// Per-user category scores, each in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoricalPreference {
    pub user_id: String,
    scores: BTreeMap<String, f32>,
}

impl CategoricalPreference {
    /// Build a row, dropping unknown categories and clamping scores into [0, 1].
    pub fn new(
        user_id: impl Into<String>,
        scores: impl IntoIterator<Item = (String, f32)>,
    ) -> Self {
        let scores = scores
            .into_iter()
            .filter(|(cat, score)| categories::is_known(cat) && score.is_finite())
            .map(|(cat, score)| (cat, score.clamp(0.0, 1.0)))
            .collect();

        Self {
            user_id: user_id.into(),
            scores,
        }
    }

    /// Row with every category at the uniform baseline.
    pub fn uniform(user_id: impl Into<String>) -> Self {
        Self::new(
            user_id,
            categories::names().map(|c| (c.to_string(), categories::UNIFORM_BASELINE)),
        )
    }

    pub fn score(&self, category: &str) -> Option<f32> {
        self.scores.get(category).copied()
    }

    /// Set a score, clamped into [0, 1]. Unknown categories are ignored.
    pub fn set(&mut self, category: &str, score: f32) {
        if categories::is_known(category) && score.is_finite() {
            self.scores
                .insert(category.to_string(), score.clamp(0.0, 1.0));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.scores.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Cluster a user was assigned to by the last clustering run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub user_id: String,
    pub cluster_id: usize,
}

/// Mean preference row of one cluster's members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterTemplate {
    pub cluster_id: usize,
    pub member_count: usize,
    pub avg_preferences: BTreeMap<String, f32>,
}
