//! CSV-backed store: one file per table in a data directory.
//!
//! Tables are read once at open and kept in memory. Writes update memory
//! and rewrite the table through a temp file + rename.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::{EventStore, StoreError, StoredVector};
use crate::categories;
use crate::events::{
    parse_timestamp, Action, CategoricalPreference, ClusterAssignment, ClusterTemplate, Event,
    Interaction,
};

const USERS_FILE: &str = "users.csv";
const EVENTS_FILE: &str = "events.csv";
const INTERACTIONS_FILE: &str = "interactions.csv";
const PREFERENCES_FILE: &str = "preferences.csv";
const VECTORS_FILE: &str = "event_vectors.csv";
const CLUSTERS_FILE: &str = "clusters.csv";
const TEMPLATES_FILE: &str = "cluster_templates.csv";

#[derive(Debug, Deserialize)]
struct UserRow {
    id: String,
}

#[derive(Debug, Deserialize)]
struct EventRow {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    event_date: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct InteractionRow {
    user_id: String,
    event_id: String,
    action: String,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Default)]
struct Tables {
    users: Vec<String>,
    events: Vec<Event>,
    interactions: Vec<Interaction>,
    preferences: Vec<CategoricalPreference>,
    vectors: Vec<StoredVector>,
    clusters: Vec<ClusterAssignment>,
}

pub struct CsvStore {
    dir: PathBuf,
    tables: RwLock<Tables>,
}

impl CsvStore {
    /// Open a data directory. Missing table files read as empty tables.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        let now = Instant::now();

        let users = read_rows::<UserRow>(&dir.join(USERS_FILE))?
            .into_iter()
            .map(|row| row.id)
            .collect();

        let events = read_rows::<EventRow>(&dir.join(EVENTS_FILE))?
            .into_iter()
            .map(|row| Event {
                id: row.id,
                title: row.title,
                description: row.description,
                category: row
                    .category
                    .filter(|c| !c.trim().is_empty())
                    .map(|c| categories::normalize(&c)),
                event_date: row.event_date.as_deref().and_then(parse_timestamp),
                created_at: row.created_at.as_deref().and_then(parse_timestamp),
            })
            .collect();

        let interactions = read_rows::<InteractionRow>(&dir.join(INTERACTIONS_FILE))?
            .into_iter()
            .filter_map(|row| {
                let action = match row.action.parse::<Action>() {
                    Ok(action) => action,
                    Err(e) => {
                        log::warn!("skipping interaction event={} err={e}", row.event_id);
                        return None;
                    }
                };
                let created_at = row.created_at.as_deref().and_then(|raw| {
                    let parsed = parse_timestamp(raw);
                    if parsed.is_none() {
                        log::debug!("unparsable interaction timestamp={raw:?}");
                    }
                    parsed
                });
                match Interaction::new(row.user_id, row.event_id, action, created_at) {
                    Ok(interaction) => Some(interaction),
                    Err(e) => {
                        log::warn!("skipping interaction err={e}");
                        None
                    }
                }
            })
            .collect();

        let preferences = read_preferences(&dir.join(PREFERENCES_FILE))?;
        let vectors = read_rows::<StoredVector>(&dir.join(VECTORS_FILE))?;
        let clusters = read_rows::<ClusterAssignment>(&dir.join(CLUSTERS_FILE))?;

        log::debug!(
            "took {}ms to read data dir {}",
            now.elapsed().as_micros() as f64 / 1000.0,
            dir.display()
        );

        Ok(Self {
            dir,
            tables: RwLock::new(Tables {
                users,
                events,
                interactions,
                preferences,
                vectors,
                clusters,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }
}

/// Open a table for reading. `None` when the file does not exist.
fn open_reader(path: &Path) -> Result<Option<csv::Reader<std::fs::File>>, StoreError> {
    match csv::ReaderBuilder::new().flexible(true).from_path(path) {
        Ok(reader) => Ok(Some(reader)),
        Err(err) => {
            if let csv::ErrorKind::Io(io) = err.kind() {
                if io.kind() == ErrorKind::NotFound {
                    return Ok(None);
                }
            }
            Err(err.into())
        }
    }
}

/// Read every row of a table. Rows that fail to deserialize are logged and
/// skipped so one bad line does not take the whole table down.
fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, StoreError> {
    let Some(mut reader) = open_reader(path)? else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        match record {
            Ok(row) => rows.push(row),
            Err(e) => log::warn!("skipping malformed row in {}: {e}", path.display()),
        }
    }
    Ok(rows)
}

/// Preference rows: `user_id` followed by one column per category.
fn read_preferences(path: &Path) -> Result<Vec<CategoricalPreference>, StoreError> {
    let Some(mut reader) = open_reader(path)? else {
        return Ok(Vec::new());
    };

    let headers = reader.headers()?.clone();
    let user_col = headers
        .iter()
        .position(|h| h == "user_id")
        .ok_or_else(|| StoreError::Malformed("preferences.csv has no user_id column".into()))?;

    let mut prefs = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                log::warn!("skipping malformed row in {}: {e}", path.display());
                continue;
            }
        };
        let user_id = record.get(user_col).unwrap_or_default().to_string();
        if user_id.is_empty() {
            continue;
        }

        let scores = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| categories::is_known(header))
            .filter_map(|(header, value)| {
                value
                    .trim()
                    .parse::<f32>()
                    .ok()
                    .map(|score| (header.to_string(), score))
            });

        prefs.push(CategoricalPreference::new(user_id, scores));
    }
    Ok(prefs)
}

/// Write a table atomically: temp file then rename.
fn write_table<F>(path: &Path, fill: F) -> Result<(), StoreError>
where
    F: FnOnce(&mut csv::Writer<std::fs::File>) -> Result<(), StoreError>,
{
    let temp_path = path.with_extension("csv-tmp");
    let mut writer = csv::Writer::from_path(&temp_path)?;
    fill(&mut writer)?;
    writer.flush()?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

impl EventStore for CsvStore {
    fn user_exists(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.read()?.users.iter().any(|id| id == user_id))
    }

    fn user_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read()?.users.clone())
    }

    fn interactions(&self, user_id: &str) -> Result<Vec<Interaction>, StoreError> {
        Ok(self
            .read()?
            .interactions
            .iter()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect())
    }

    fn preferences(&self, user_id: &str) -> Result<Option<CategoricalPreference>, StoreError> {
        Ok(self
            .read()?
            .preferences
            .iter()
            .find(|p| p.user_id == user_id)
            .cloned())
    }

    fn all_preferences(&self) -> Result<Vec<CategoricalPreference>, StoreError> {
        Ok(self.read()?.preferences.clone())
    }

    fn event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        Ok(self.read()?.events.iter().find(|e| e.id == event_id).cloned())
    }

    fn events(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self.read()?.events.clone())
    }

    fn upcoming_events(&self, from: DateTime<Utc>, limit: usize) -> Result<Vec<Event>, StoreError> {
        let mut upcoming: Vec<Event> = self
            .read()?
            .events
            .iter()
            .filter(|e| e.event_date.is_some_and(|d| d >= from))
            .cloned()
            .collect();
        upcoming.sort_by_key(|e| e.event_date);
        upcoming.truncate(limit);
        Ok(upcoming)
    }

    fn stored_vectors(&self) -> Result<Vec<StoredVector>, StoreError> {
        Ok(self.read()?.vectors.clone())
    }

    fn append_interaction(&self, interaction: &Interaction) -> Result<(), StoreError> {
        let mut tables = self.write()?;

        // memory only changes once the file does
        write_table(&self.dir.join(INTERACTIONS_FILE), |w| {
            for i in tables.interactions.iter().chain(std::iter::once(interaction)) {
                w.serialize(InteractionRow {
                    user_id: i.user_id.clone(),
                    event_id: i.event_id.clone(),
                    action: i.action.to_string(),
                    created_at: Some(format_timestamp(i.created_at)),
                })?;
            }
            Ok(())
        })?;

        tables.interactions.push(interaction.clone());
        Ok(())
    }

    fn save_preferences(&self, pref: &CategoricalPreference) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let mut preferences = tables.preferences.clone();
        match preferences.iter_mut().find(|p| p.user_id == pref.user_id) {
            Some(existing) => *existing = pref.clone(),
            None => preferences.push(pref.clone()),
        }

        write_table(&self.dir.join(PREFERENCES_FILE), |w| {
            let mut header = vec!["user_id"];
            header.extend(categories::names());
            w.write_record(&header)?;

            for p in &preferences {
                let mut record = vec![p.user_id.clone()];
                record.extend(
                    categories::names()
                        .map(|cat| p.score(cat).map(|s| s.to_string()).unwrap_or_default()),
                );
                w.write_record(&record)?;
            }
            Ok(())
        })?;

        tables.preferences = preferences;
        Ok(())
    }

    fn save_vectors(&self, vectors: Vec<StoredVector>) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let mut merged = tables.vectors.clone();
        let mut positions: HashMap<String, usize> = merged
            .iter()
            .enumerate()
            .map(|(pos, v)| (v.event_id.clone(), pos))
            .collect();

        for row in vectors {
            match positions.get(&row.event_id) {
                Some(&pos) => merged[pos] = row,
                None => {
                    positions.insert(row.event_id.clone(), merged.len());
                    merged.push(row);
                }
            }
        }

        write_table(&self.dir.join(VECTORS_FILE), |w| {
            for v in &merged {
                w.serialize(v)?;
            }
            Ok(())
        })?;

        tables.vectors = merged;
        Ok(())
    }

    fn cluster_members(&self, cluster_id: usize) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read()?
            .clusters
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
        let mut tables = self.write()?;

        write_table(&self.dir.join(CLUSTERS_FILE), |w| {
            for a in assignments {
                w.serialize(a)?;
            }
            Ok(())
        })?;

        write_table(&self.dir.join(TEMPLATES_FILE), |w| {
            let mut header = vec!["cluster_id", "member_count"];
            header.extend(categories::names());
            w.write_record(&header)?;

            for t in templates {
                let mut record = vec![t.cluster_id.to_string(), t.member_count.to_string()];
                record.extend(categories::names().map(|cat| {
                    t.avg_preferences
                        .get(cat)
                        .map(|s| s.to_string())
                        .unwrap_or_default()
                }));
                w.write_record(&record)?;
            }
            Ok(())
        })?;

        tables.clusters = assignments.to_vec();
        Ok(())
    }
}
