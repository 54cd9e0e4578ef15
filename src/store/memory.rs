//! In-memory store for tests.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{EventStore, StoreError, StoredVector};
use crate::events::{
    CategoricalPreference, ClusterAssignment, ClusterTemplate, Event, Interaction,
};

#[derive(Default)]
pub struct MemoryStore {
    pub users: Mutex<Vec<String>>,
    pub events: Mutex<Vec<Event>>,
    pub interactions: Mutex<Vec<Interaction>>,
    pub preferences: Mutex<Vec<CategoricalPreference>>,
    pub vectors: Mutex<Vec<StoredVector>>,
    pub clusters: Mutex<Vec<ClusterAssignment>>,
    pub templates: Mutex<Vec<ClusterTemplate>>,
    /// Users whose reads fail, to exercise error isolation.
    pub failing_users: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, id: &str) -> Self {
        self.users.lock().unwrap().push(id.to_string());
        self
    }

    pub fn with_event(self, event: Event) -> Self {
        self.events.lock().unwrap().push(event);
        self
    }

    pub fn with_interaction(self, interaction: Interaction) -> Self {
        self.interactions.lock().unwrap().push(interaction);
        self
    }

    pub fn with_preferences(self, pref: CategoricalPreference) -> Self {
        self.preferences.lock().unwrap().push(pref);
        self
    }

    pub fn with_vector(self, event_id: &str, category: Option<&str>, embedding: &[f32]) -> Self {
        let row = StoredVector::new(event_id, category.map(str::to_string), None, embedding).unwrap();
        self.vectors.lock().unwrap().push(row);
        self
    }

    pub fn with_raw_vector(self, row: StoredVector) -> Self {
        self.vectors.lock().unwrap().push(row);
        self
    }

    pub fn with_cluster(self, user_id: &str, cluster_id: usize) -> Self {
        self.clusters.lock().unwrap().push(ClusterAssignment {
            user_id: user_id.to_string(),
            cluster_id,
        });
        self
    }

    pub fn failing_for(self, user_id: &str) -> Self {
        self.failing_users.lock().unwrap().push(user_id.to_string());
        self
    }

    fn check(&self, user_id: &str) -> Result<(), StoreError> {
        if self.failing_users.lock().unwrap().iter().any(|u| u == user_id) {
            return Err(StoreError::Malformed(format!("simulated failure for {user_id}")));
        }
        Ok(())
    }
}

impl EventStore for MemoryStore {
    fn user_exists(&self, user_id: &str) -> Result<bool, StoreError> {
        self.check(user_id)?;
        Ok(self.users.lock().unwrap().iter().any(|u| u == user_id))
    }

    fn user_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.users.lock().unwrap().clone())
    }

    fn interactions(&self, user_id: &str) -> Result<Vec<Interaction>, StoreError> {
        self.check(user_id)?;
        Ok(self
            .interactions
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect())
    }

    fn preferences(&self, user_id: &str) -> Result<Option<CategoricalPreference>, StoreError> {
        self.check(user_id)?;
        Ok(self
            .preferences
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.user_id == user_id)
            .cloned())
    }

    fn all_preferences(&self) -> Result<Vec<CategoricalPreference>, StoreError> {
        Ok(self.preferences.lock().unwrap().clone())
    }

    fn event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == event_id)
            .cloned())
    }

    fn events(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self.events.lock().unwrap().clone())
    }

    fn upcoming_events(&self, from: DateTime<Utc>, limit: usize) -> Result<Vec<Event>, StoreError> {
        let mut upcoming: Vec<Event> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_date.is_some_and(|d| d >= from))
            .cloned()
            .collect();
        upcoming.sort_by_key(|e| e.event_date);
        upcoming.truncate(limit);
        Ok(upcoming)
    }

    fn stored_vectors(&self) -> Result<Vec<StoredVector>, StoreError> {
        Ok(self.vectors.lock().unwrap().clone())
    }

    fn append_interaction(&self, interaction: &Interaction) -> Result<(), StoreError> {
        self.interactions.lock().unwrap().push(interaction.clone());
        Ok(())
    }

    fn save_preferences(&self, pref: &CategoricalPreference) -> Result<(), StoreError> {
        let mut prefs = self.preferences.lock().unwrap();
        match prefs.iter_mut().find(|p| p.user_id == pref.user_id) {
            Some(existing) => *existing = pref.clone(),
            None => prefs.push(pref.clone()),
        }
        Ok(())
    }

    fn save_vectors(&self, vectors: Vec<StoredVector>) -> Result<(), StoreError> {
        let mut stored = self.vectors.lock().unwrap();
        for row in vectors {
            match stored.iter_mut().find(|v| v.event_id == row.event_id) {
                Some(existing) => *existing = row,
                None => stored.push(row),
            }
        }
        Ok(())
    }

    fn cluster_members(&self, cluster_id: usize) -> Result<Vec<String>, StoreError> {
        Ok(self
            .clusters
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.cluster_id == cluster_id)
            .map(|a| a.user_id.clone())
            .collect())
    }

    fn save_clusters(
        &self,
        assignments: &[ClusterAssignment],
        templates: &[ClusterTemplate],
    ) -> Result<(), StoreError> {
        *self.clusters.lock().unwrap() = assignments.to_vec();
        *self.templates.lock().unwrap() = templates.to_vec();
        Ok(())
    }
}
