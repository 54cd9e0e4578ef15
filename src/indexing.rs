//! Batch job computing event embeddings for the vector index.

use std::collections::HashSet;

use chrono::SecondsFormat;
use serde::Serialize;

use crate::errors::RankResult;
use crate::events::Event;
use crate::semantic::{check_dimensions, prepare_event_text, EmbeddingError, EmbeddingProvider};
use crate::store::{EventStore, StoredVector};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmbedStats {
    pub embedded: usize,
    /// Events with a usable vector already
    pub up_to_date: usize,
    /// Events with no text left after cleanup
    pub empty: usize,
}

/// Embed every event lacking a vector of the provider's dimension.
///
/// Each batch is persisted as soon as it is embedded, so an interrupted run
/// keeps its progress.
pub fn embed_missing_events(
    store: &dyn EventStore,
    embedder: &dyn EmbeddingProvider,
    batch_size: usize,
    force: bool,
) -> RankResult<EmbedStats> {
    let dims = embedder.dimensions();
    let mut stats = EmbedStats::default();

    let present: HashSet<String> = if force {
        HashSet::new()
    } else {
        store
            .stored_vectors()?
            .into_iter()
            .filter(|row| row.parse_embedding().is_some_and(|v| v.len() == dims))
            .map(|row| row.event_id)
            .collect()
    };

    let mut pending: Vec<(Event, String)> = Vec::new();
    for event in store.events()? {
        if present.contains(&event.id) {
            stats.up_to_date += 1;
            continue;
        }
        match prepare_event_text(&event.embedding_text()) {
            Some(text) => pending.push((event, text)),
            None => {
                log::debug!("event={} has no embeddable text", event.id);
                stats.empty += 1;
            }
        }
    }

    log::info!(
        "embedding {} events ({} up to date, {} empty)",
        pending.len(),
        stats.up_to_date,
        stats.empty
    );

    for chunk in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = chunk.iter().map(|(_, text)| text.clone()).collect();
        let vectors = embedder.embed_batch(&texts)?;
        if vectors.len() != chunk.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: chunk.len(),
                got: vectors.len(),
            }
            .into());
        }

        let mut rows = Vec::with_capacity(chunk.len());
        for ((event, _), vector) in chunk.iter().zip(vectors) {
            check_dimensions(&vector, dims)?;
            rows.push(StoredVector::new(
                event.id.clone(),
                event.category.clone(),
                event
                    .created_at
                    .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
                &vector,
            )?);
        }

        stats.embedded += rows.len();
        store.save_vectors(rows)?;
        log::info!("embedded {}/{} events", stats.embedded, pending.len());
    }

    Ok(stats)
}
