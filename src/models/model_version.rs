use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A trained classifier registered for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub user_id: i64,
    pub version: String,
    pub training_samples: i64,
    /// Holdout accuracy; absent when there were too few samples to split
    pub accuracy: Option<f64>,
    pub feature_count: i64,
    /// Transformer version the model's input columns came from
    pub feature_schema_version: String,
    pub decision_threshold: f64,
    pub artifact_path: String,
    pub trained_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Result of [`crate::services::trainer::IncrementalTrainer::train_or_retrain`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingOutcome {
    /// A new version was trained and activated
    Trained { model: ModelVersion },
    /// The retrain trigger did not fire; the active version is unchanged
    UpToDate { model: ModelVersion },
    /// Nothing was trained and no state changed
    NotTrained { reason: String },
}

impl TrainingOutcome {
    /// Active version after the call, if any
    pub fn version(&self) -> Option<&ModelVersion> {
        match self {
            TrainingOutcome::Trained { model } | TrainingOutcome::UpToDate { model } => Some(model),
            TrainingOutcome::NotTrained { .. } => None,
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self, TrainingOutcome::Trained { .. })
    }
}
