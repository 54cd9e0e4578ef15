//! Bounded exponential-backoff retry around an embedding provider.

use std::time::Duration;

use super::embeddings::{EmbeddingError, EmbeddingProvider};

/// Retry schedule: attempt `n` (1-based) that fails waits
/// `min(base_delay * 2^(n-1), max_delay)` before the next one.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op`, retrying transient failures. Rejected requests return at once.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T, EmbeddingError>
    where
        F: FnMut() -> Result<T, EmbeddingError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= attempts => {
                    log::error!("{label} failed after {attempts} attempts: {err}");
                    return Err(err);
                }
                Err(err) => {
                    let wait = self.delay_after(attempt);
                    log::warn!(
                        "{label} attempt {attempt}/{attempts} failed ({err}), retrying in {:.1}s",
                        wait.as_secs_f32()
                    );
                    std::thread::sleep(wait);
                    attempt += 1;
                }
            }
        }
    }
}

/// Provider wrapper applying a [`RetryPolicy`] to every call.
pub struct Retrying<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: EmbeddingProvider> Retrying<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<P: EmbeddingProvider> EmbeddingProvider for Retrying<P> {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.policy.run("embed", || self.inner.embed(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.policy.run("embed_batch", || self.inner.embed_batch(texts))
    }
}
