use serde::Deserialize;
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Failed to load tuning parameters: {0}")]
    Envy(#[from] envy::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub redis: RedisConfig,
    pub store_backend: StoreBackend,
    pub bandit: BanditConfig,
    pub scoring: ScoringWeights,
    pub selection: SelectionConfig,
    pub decay: DecayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub http_port: u16,
    pub service_name: String,
    pub log_format: LogFormat,
    /// When set, every request must carry it in `x-internal-api-key`
    pub internal_api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Where bandit state, pending impressions and clicks live
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

/// LinUCB parameters.
/// Env: CURATION_BANDIT_DIMENSION, CURATION_BANDIT_ALPHA, CURATION_BANDIT_CTR_ALPHA_BOOST
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BanditConfig {
    /// Embedding dimension D for lazily created models (includes the recency slot)
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Extra exploration for low-CTR subjects: alpha + (1 - ctr) * boost
    #[serde(default = "default_ctr_alpha_boost")]
    pub ctr_alpha_boost: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            alpha: default_alpha(),
            ctr_alpha_boost: default_ctr_alpha_boost(),
        }
    }
}

/// Per-candidate score blend.
/// Env: CURATION_SCORING_*
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ScoringWeights {
    #[serde(default = "default_ucb_weight")]
    pub ucb_weight: f64,
    #[serde(default = "default_freshness_weight")]
    pub freshness_weight: f64,
    /// Weight of recent positive i is decay^i
    #[serde(default = "default_short_term_decay")]
    pub short_term_decay: f64,
    /// Candidates at or above this similarity to any negative are dropped
    #[serde(default = "default_negative_filter_threshold")]
    pub negative_filter_threshold: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            ucb_weight: default_ucb_weight(),
            freshness_weight: default_freshness_weight(),
            short_term_decay: default_short_term_decay(),
            negative_filter_threshold: default_negative_filter_threshold(),
        }
    }
}

/// Env: CURATION_SELECTION_*
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SelectionConfig {
    /// A pick is rejected when its similarity to any selected item exceeds this
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Upper bound on `count` accepted at the HTTP boundary
    #[serde(default = "default_max_count")]
    pub max_count: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_count: default_max_count(),
        }
    }
}

/// Env: CURATION_DECAY_*
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DecayConfig {
    /// Impressions older than this without a click become reward 0
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Exit after one sweep (CronJob mode)
    #[serde(default)]
    pub run_once: bool,
}

impl DecayConfig {
    /// `ttl_secs` as a signed duration, saturating instead of overflowing
    pub fn ttl(&self) -> chrono::Duration {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            interval_secs: default_interval_secs(),
            enabled: true,
            run_once: false,
        }
    }
}

fn default_dimension() -> usize {
    1537 // 1536 semantic + recency
}
fn default_alpha() -> f64 {
    0.1
}
fn default_ctr_alpha_boost() -> f64 {
    0.5
}
fn default_ucb_weight() -> f64 {
    1.5
}
fn default_freshness_weight() -> f64 {
    1.0
}
fn default_short_term_decay() -> f64 {
    0.8
}
fn default_negative_filter_threshold() -> f64 {
    0.75
}
fn default_similarity_threshold() -> f64 {
    0.85
}
fn default_max_count() -> usize {
    100
}
fn default_ttl_secs() -> u64 {
    24 * 3600
}
fn default_interval_secs() -> u64 {
    3600
}
fn default_true() -> bool {
    true
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            service: ServiceConfig {
                http_port: parse_var("HTTP_PORT", "8021")?,
                service_name: env::var("SERVICE_NAME")
                    .unwrap_or_else(|_| "curation-service".to_string()),
                log_format: match env::var("LOG_FORMAT")
                    .unwrap_or_else(|_| "text".to_string())
                    .to_ascii_lowercase()
                    .as_str()
                {
                    "json" => LogFormat::Json,
                    "text" => LogFormat::Text,
                    other => {
                        return Err(ConfigError::InvalidValue {
                            key: "LOG_FORMAT",
                            value: other.to_string(),
                        })
                    }
                },
                internal_api_key: env::var("INTERNAL_API_KEY")
                    .ok()
                    .filter(|key| !key.is_empty()),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            store_backend: match env::var("STORE_BACKEND")
                .unwrap_or_else(|_| "redis".to_string())
                .to_ascii_lowercase()
                .as_str()
            {
                "memory" => StoreBackend::Memory,
                "redis" => StoreBackend::Redis,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "STORE_BACKEND",
                        value: other.to_string(),
                    })
                }
            },
            bandit: envy::prefixed("CURATION_BANDIT_").from_env()?,
            scoring: envy::prefixed("CURATION_SCORING_").from_env()?,
            selection: envy::prefixed("CURATION_SELECTION_").from_env()?,
            decay: envy::prefixed("CURATION_DECAY_").from_env()?,
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|_| ConfigError::InvalidValue { key, value: raw })
}
