use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::events::Event;
use crate::semantic::{EmbeddingError, EmbeddingProvider};

/// Deterministic in-process embedding provider that records its inputs.
pub struct FakeEmbedder {
    dims: usize,
    response: Option<Vec<f32>>,
    texts: Mutex<Vec<String>>,
}

impl FakeEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            response: None,
            texts: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with `vector`, whatever its length.
    pub fn returning(mut self, vector: Vec<f32>) -> Self {
        self.response = Some(vector);
        self
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

impl EmbeddingProvider for FakeEmbedder {
    fn dimensions(&self) -> usize {
        self.dims
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.texts.lock().unwrap().push(text.to_string());

        if let Some(vector) = &self.response {
            return Ok(vector.clone());
        }

        let seed: u32 = text.bytes().map(u32::from).sum();
        Ok((0..self.dims)
            .map(|i| ((seed + i as u32 * 31) % 97) as f32 / 97.0 + 0.01)
            .collect())
    }
}

pub fn event(id: &str, category: Option<&str>, event_date: Option<DateTime<Utc>>) -> Event {
    Event {
        id: id.to_string(),
        title: format!("Event {id}"),
        description: format!("Description of {id}"),
        category: category.map(str::to_string),
        event_date,
        created_at: None,
    }
}
