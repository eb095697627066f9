use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{forest::RandomForest, ForestParams};
use crate::error::{AppError, AppResult};

/// Default probability cut-off for a positive prediction
pub const DEFAULT_DECISION_THRESHOLD: f64 = 0.45;

/// Per-user binary outfit classifier with its own decision threshold.
///
/// The artifact records the exact feature columns it was trained on so a
/// caller can check it is fed vectors of the same schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutfitClassifier {
    pub user_id: i64,
    pub version: String,
    pub threshold: f64,
    pub feature_schema_version: String,
    pub feature_names: Vec<String>,
    pub params: ForestParams,
    pub positive_samples: usize,
    pub training_samples: usize,
    pub trained_at: DateTime<Utc>,
    forest: RandomForest,
}

/// Everything needed to fit an [`OutfitClassifier`] besides the data
#[derive(Debug, Clone)]
pub struct TrainingSpec {
    pub user_id: i64,
    pub version: String,
    pub threshold: f64,
    pub feature_schema_version: String,
    pub feature_names: Vec<String>,
    pub params: ForestParams,
}

impl OutfitClassifier {
    /// Fits a new classifier; labels are 1 for a liked outfit, 0 otherwise
    pub fn train(spec: TrainingSpec, x: &[Vec<f64>], y: &[u8]) -> AppResult<Self> {
        if let Some(row) = x.first() {
            if row.len() != spec.feature_names.len() {
                return Err(AppError::InvalidInput(format!(
                    "training rows have {} features but {} names were given",
                    row.len(),
                    spec.feature_names.len()
                )));
            }
        }

        let forest = RandomForest::fit(x, y, &spec.params)?;
        let positive_samples = y.iter().filter(|&&label| label == 1).count();

        tracing::debug!(
            user_id = spec.user_id,
            version = %spec.version,
            samples = x.len(),
            positive_samples,
            features = spec.feature_names.len(),
            "Trained outfit classifier"
        );

        Ok(Self {
            user_id: spec.user_id,
            version: spec.version,
            threshold: spec.threshold,
            feature_schema_version: spec.feature_schema_version,
            feature_names: spec.feature_names,
            params: spec.params,
            positive_samples,
            training_samples: x.len(),
            trained_at: Utc::now(),
            forest,
        })
    }

    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    /// Probability that each outfit is liked
    ///
    /// # Errors
    ///
    /// `Configuration` when a row's width differs from the trained schema.
    pub fn predict_proba(&self, rows: &[Vec<f64>]) -> AppResult<Vec<f64>> {
        if let Some(row) = rows.iter().find(|row| row.len() != self.feature_count()) {
            return Err(AppError::Configuration(format!(
                "model {} expects {} features, got {}",
                self.version,
                self.feature_count(),
                row.len()
            )));
        }
        Ok(self.forest.predict_proba_batch(rows))
    }

    /// Thresholded predictions
    pub fn predict(&self, rows: &[Vec<f64>]) -> AppResult<Vec<bool>> {
        Ok(self
            .predict_proba(rows)?
            .into_iter()
            .map(|p| p >= self.threshold)
            .collect())
    }

    /// Fraction of thresholded predictions that match `y`
    pub fn accuracy(&self, x: &[Vec<f64>], y: &[u8]) -> AppResult<f64> {
        if x.is_empty() {
            return Err(AppError::InsufficientData("no evaluation samples".to_string()));
        }
        let predictions = self.predict(x)?;
        let correct = predictions
            .iter()
            .zip(y)
            .filter(|(predicted, &label)| **predicted == (label == 1))
            .count();
        Ok(correct as f64 / x.len() as f64)
    }

    /// The `top` most important features, most important first
    pub fn feature_importances(&self, top: usize) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .cloned()
            .zip(self.forest.feature_importances())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(top);
        ranked
    }

    /// `{model_dir}/user_{id}/outfit_recommender_{version}.json`
    pub fn artifact_path(model_dir: &Path, user_id: i64, version: &str) -> PathBuf {
        model_dir
            .join(format!("user_{}", user_id))
            .join(format!("outfit_recommender_{}.json", version))
    }

    pub async fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec(self)?;
        tokio::fs::write(path, json).await?;

        tracing::info!(path = %path.display(), version = %self.version, "Saved model artifact");
        Ok(())
    }

    pub async fn load(path: &Path) -> AppResult<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            AppError::Configuration(format!("cannot read model artifact {}: {}", path.display(), e))
        })?;
        let classifier: Self = serde_json::from_slice(&bytes)?;
        Ok(classifier)
    }
}
