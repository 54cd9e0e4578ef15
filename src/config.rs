use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::semantic::{self, RetryPolicy};

const CONFIG_FILE: &str = "config.yaml";

/// Default embedding model for the local provider
const DEFAULT_LOCAL_MODEL: &str = semantic::DEFAULT_LOCAL_MODEL;
/// bge-base-en-v1.5 output dimension
const DEFAULT_LOCAL_DIMENSIONS: usize = 768;
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Which embedding provider backs the ranking core
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Local,
    OpenAi,
}

/// Configuration for the embedding provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_backend")]
    pub provider: EmbeddingBackend,

    /// Model name (e.g., "bge-base-en-v1.5" or "text-embedding-3-small")
    #[serde(default = "default_model")]
    pub model: String,

    /// Output dimension of the model. Stored vectors of any other length are ignored.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Environment variable holding the API key for remote providers
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts per call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_backend(),
            model: default_model(),
            dimensions: default_dimensions(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

impl EmbeddingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_backend() -> EmbeddingBackend {
    EmbeddingBackend::Local
}

fn default_model() -> String {
    DEFAULT_LOCAL_MODEL.to_string()
}

fn default_dimensions() -> usize {
    DEFAULT_LOCAL_DIMENSIONS
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1_000
}

fn default_retry_max_ms() -> u64 {
    10_000
}

/// Preference model parameters. Bump `version` whenever a formula constant changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceConfig {
    pub version: u32,
    /// Interaction weight halves every this many days
    pub half_life_days: f32,
    /// Declared category score above which it feeds cold-start interest text
    pub cold_start_threshold: f32,
    /// Step applied to a stored category score per like
    pub score_increment: f32,
    /// Feedback on emails older than this leaves stored preferences alone
    pub feedback_window_days: i64,
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self {
            version: 1,
            half_life_days: 30.0,
            cold_start_threshold: 0.6,
            score_increment: 0.05,
            feedback_window_days: 15,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    pub top_k: usize,
    /// Over-fetch factor before reranking
    pub candidate_multiplier: usize,
    pub similarity_weight: f32,
    pub recency_weight: f32,
    /// Deducted once per earlier candidate of the same category
    pub diversity_penalty: f32,
    pub max_days_old: i64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            candidate_multiplier: 3,
            similarity_weight: 0.7,
            recency_weight: 0.3,
            diversity_penalty: 0.1,
            max_days_old: 365,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub cluster_match_weight: f32,
    pub max_urgency_score: f32,
    /// Upcoming events considered per ranking
    pub upcoming_limit: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            cluster_match_weight: 50.0,
            max_urgency_score: 30.0,
            upcoming_limit: 100,
        }
    }
}

/// User clustering over declared preference rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Requested cluster count, capped at the number of clustered users
    pub clusters: usize,
    /// Principal components kept before k-means
    pub pca_components: usize,
    pub max_iterations: usize,
    /// Stop once no centroid moves further than this
    pub convergence_threshold: f32,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            clusters: 5,
            pca_components: 3,
            max_iterations: 100,
            convergence_threshold: 1e-6,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub preferences: PreferenceConfig,
    #[serde(default)]
    pub recommendation: RecommendationConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let emb = &self.embedding;
        if emb.dimensions == 0 {
            bail!("embedding.dimensions must be greater than 0");
        }
        if emb.max_attempts == 0 {
            bail!("embedding.max_attempts must be greater than 0");
        }

        let pref = &self.preferences;
        if !(pref.half_life_days > 0.0) {
            bail!(
                "preferences.half_life_days must be greater than 0, got {}",
                pref.half_life_days
            );
        }
        if !(0.0..=1.0).contains(&pref.cold_start_threshold) {
            bail!(
                "preferences.cold_start_threshold must be between 0.0 and 1.0, got {}",
                pref.cold_start_threshold
            );
        }
        if !(0.0..=1.0).contains(&pref.score_increment) {
            bail!(
                "preferences.score_increment must be between 0.0 and 1.0, got {}",
                pref.score_increment
            );
        }

        let rec = &self.recommendation;
        if rec.top_k == 0 || rec.candidate_multiplier == 0 {
            bail!("recommendation.top_k and candidate_multiplier must be greater than 0");
        }
        if rec.max_days_old <= 0 {
            bail!("recommendation.max_days_old must be greater than 0");
        }
        for (name, w) in [
            ("similarity_weight", rec.similarity_weight),
            ("recency_weight", rec.recency_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                bail!("recommendation.{name} must be between 0.0 and 1.0, got {w}");
            }
        }
        if (rec.similarity_weight + rec.recency_weight - 1.0).abs() > 1e-3 {
            bail!(
                "recommendation weights must sum to 1.0, got {}",
                rec.similarity_weight + rec.recency_weight
            );
        }
        if rec.diversity_penalty < 0.0 {
            bail!("recommendation.diversity_penalty must not be negative");
        }

        if self.scoring.upcoming_limit == 0 {
            bail!("scoring.upcoming_limit must be greater than 0");
        }

        let cl = &self.clustering;
        if cl.clusters == 0 || cl.pca_components == 0 || cl.max_iterations == 0 {
            bail!("clustering.clusters, pca_components and max_iterations must be greater than 0");
        }
        if !(cl.convergence_threshold > 0.0) || !cl.convergence_threshold.is_finite() {
            bail!(
                "clustering.convergence_threshold must be a finite positive number, got {}",
                cl.convergence_threshold
            );
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults if missing.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let path = base_path.join(CONFIG_FILE);

        if !path.exists() {
            std::fs::create_dir_all(base_path)
                .with_context(|| format!("creating {}", base_path.display()))?;
            std::fs::write(&path, serde_yml::to_string(&Self::default())?)
                .with_context(|| format!("writing {}", path.display()))?;
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("{} is malformed", path.display()))?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = self.base_path.join(CONFIG_FILE);
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&path, config_str).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}
