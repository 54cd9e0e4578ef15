use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::Serialize;

use super::provider::{build_provider, LazyProvider};
use crate::clustering::UserClusterer;
use crate::config::Config;
use crate::events::{parse_timestamp, Action, CategoricalPreference, Interaction};
use crate::indexing;
use crate::preference::PreferenceModel;
use crate::recommender::Recommender;
use crate::scoring::Scorer;
use crate::semantic::EmbeddingProvider;
use crate::store::{CsvStore, EventStore};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<dyn EventStore>> {
    let store = CsvStore::open(config.base_path())
        .with_context(|| format!("opening data directory {}", config.base_path().display()))?;
    Ok(Arc::new(store))
}

fn preference_model(config: &Config, store: Arc<dyn EventStore>) -> PreferenceModel {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(LazyProvider::new(
        config.embedding.clone(),
        config.base_path().to_path_buf(),
    ));
    PreferenceModel::new(config.preferences.clone(), store, embedder)
}

fn recommender(config: &Config) -> Result<Recommender> {
    let store = open_store(config)?;
    let prefs = preference_model(config, store.clone());
    let mut recommender = Recommender::new(config.recommendation.clone(), store, prefs);
    recommender.load_index()?;
    Ok(recommender)
}

fn scorer(config: &Config) -> Result<Scorer> {
    let store = open_store(config)?;
    let prefs = preference_model(config, store.clone());
    Ok(Scorer::new(config.scoring.clone(), store, prefs))
}

pub fn handle_recommend(config: &Config, user_id: &str, top_k: Option<usize>) -> Result<()> {
    let recs = recommender(config)?.get_recommendations(user_id, top_k)?;
    print_json(&recs)
}

pub fn handle_recommend_batch(config: &Config, user_ids: &[String], top_k: Option<usize>) -> Result<()> {
    let recs = recommender(config)?.get_batch_recommendations(user_ids, top_k);
    print_json(&recs)
}

pub fn handle_rank(config: &Config, user_id: &str, limit: usize) -> Result<()> {
    let ranked = scorer(config)?.rank_events_for_user(user_id, limit)?;
    print_json(&ranked)
}

pub fn handle_rank_batch(config: &Config, user_ids: &[String], limit: usize) -> Result<()> {
    let ranked = scorer(config)?.rank_events_for_users(user_ids, limit);
    print_json(&ranked)
}

pub fn handle_cluster(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let outcome = UserClusterer::new(config.clustering.clone(), store).cluster_users()?;
    print_json(&outcome)
}

pub fn handle_rank_cluster(config: &Config, cluster_id: usize, limit: usize) -> Result<()> {
    let ranked = scorer(config)?.rank_events_for_cluster(cluster_id, limit)?;
    print_json(&ranked)
}

#[derive(Serialize)]
struct PreferenceReport {
    user_id: String,
    stored: Option<CategoricalPreference>,
    decayed: std::collections::BTreeMap<String, f32>,
    cold_start_text: String,
}

pub fn handle_preferences(config: &Config, user_id: &str) -> Result<()> {
    let store = open_store(config)?;
    let model = preference_model(config, store.clone());

    let stored = store.preferences(user_id)?;
    let report = PreferenceReport {
        user_id: user_id.to_string(),
        decayed: model.decayed_preferences(user_id)?,
        cold_start_text: model.cold_start_text(stored.as_ref()),
        stored,
    };
    print_json(&report)
}

pub fn handle_feedback(
    config: &Config,
    user_id: &str,
    event_id: &str,
    action: &str,
    category: Option<&str>,
    email_sent_at: Option<&str>,
) -> Result<()> {
    let action: Action = action.parse()?;
    let now = Utc::now();

    let sent_at = match email_sent_at {
        Some(raw) => {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                log::warn!("unparsable email timestamp {raw:?}, applying update anyway");
            }
            parsed
        }
        None => None,
    };

    let store = open_store(config)?;
    let model = preference_model(config, store);
    let interaction = Interaction::new(user_id, event_id, action, Some(now))?;

    let updated = model.record_feedback(&interaction, category, sent_at, now)?;
    print_json(&serde_json::json!({
        "user_id": user_id,
        "event_id": event_id,
        "action": action,
        "preferences_updated": updated,
    }))
}

pub fn handle_embed_events(config: &Config, batch_size: usize, force: bool) -> Result<()> {
    let store = open_store(config)?;
    let embedder = build_provider(&config.embedding, config.base_path())
        .map_err(|e| anyhow!("failed to initialize embedding provider: {e}"))?;

    let stats = indexing::embed_missing_events(store.as_ref(), embedder.as_ref(), batch_size, force)?;
    print_json(&stats)
}
