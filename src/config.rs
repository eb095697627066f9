use serde::Deserialize;
use std::path::PathBuf;

use crate::features::PipelineSettings;
use crate::ml::ForestParams;
use crate::models::HashScheme;
use crate::services::scoring::{ScoringSettings, ThresholdPolicy};
use crate::services::trainer::TrainerSettings;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// SQLite database connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Redis connection URL; when absent scored tables are memoized in-process
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// User served by this process
    #[serde(default = "default_user_id")]
    pub user_id: i64,

    /// Root directory for trained model artifacts
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// User-preference acceptance threshold
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,

    /// Decision threshold stamped on newly trained classifiers
    #[serde(default = "default_classifier_threshold")]
    pub classifier_threshold: f64,

    /// Which threshold governs the acceptance filter
    #[serde(default)]
    pub threshold_policy: ThresholdPolicy,

    /// Probability of returning an unscored exploration outfit
    #[serde(default = "default_exploration_rate")]
    pub exploration_rate: f64,

    #[serde(default = "default_min_ratings")]
    pub min_ratings: usize,

    #[serde(default = "default_retrain_interval")]
    pub retrain_interval: usize,

    /// Number of model versions kept on disk and in the registry
    #[serde(default = "default_model_retention")]
    pub model_retention: usize,

    #[serde(default = "default_poly_degree")]
    pub poly_degree: usize,

    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default)]
    pub hash_scheme: HashScheme,

    /// TTL in seconds for scored tables memoized in Redis
    #[serde(default = "default_scored_table_ttl")]
    pub scored_table_ttl: u64,
}

fn default_database_url() -> String {
    "sqlite://data/wardrobe.db?mode=rwc".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_user_id() -> i64 {
    1
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_score_threshold() -> f64 {
    0.5
}

fn default_classifier_threshold() -> f64 {
    0.45
}

fn default_exploration_rate() -> f64 {
    0.05
}

fn default_min_ratings() -> usize {
    5
}

fn default_retrain_interval() -> usize {
    5
}

fn default_model_retention() -> usize {
    3
}

fn default_poly_degree() -> usize {
    3
}

fn default_n_estimators() -> usize {
    500
}

fn default_max_depth() -> usize {
    5
}

fn default_scored_table_ttl() -> u64 {
    3600
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            poly_degree: self.poly_degree,
            hash_scheme: self.hash_scheme,
        }
    }

    pub fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_estimators: self.n_estimators,
            max_depth: self.max_depth,
            ..ForestParams::default()
        }
    }

    pub fn trainer_settings(&self) -> TrainerSettings {
        TrainerSettings {
            min_ratings: self.min_ratings,
            retrain_interval: self.retrain_interval,
            model_retention: self.model_retention,
            model_dir: self.model_dir.clone(),
            decision_threshold: self.classifier_threshold,
            forest: self.forest_params(),
        }
    }

    pub fn scoring_settings(&self) -> ScoringSettings {
        ScoringSettings {
            exploration_rate: self.exploration_rate,
            user_threshold: self.score_threshold,
            threshold_policy: self.threshold_policy,
            hash_scheme: self.hash_scheme,
        }
    }
}
