use chrono::Utc;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{registry::new_version_id, ModelRegistry, ScoreTableCache};
use crate::{
    db::{PredictionStore, WardrobeStore},
    error::{AppError, AppResult},
    features::{FeaturePipeline, PipelineMode, Transformer},
    ml::{ForestParams, OutfitClassifier, TrainingSpec, DEFAULT_DECISION_THRESHOLD},
    models::{ModelVersion, OutfitIdentity, TrainingOutcome},
};

/// Holdout accuracy is only estimated from this many ratings on
const HOLDOUT_MIN_SAMPLES: usize = 10;
const HOLDOUT_TEST_FRACTION: f64 = 0.2;

/// Retrain trigger and model hyper-parameters
#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub min_ratings: usize,
    pub retrain_interval: usize,
    /// Model versions kept in the registry and on disk
    pub model_retention: usize,
    pub model_dir: PathBuf,
    pub decision_threshold: f64,
    pub forest: ForestParams,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            min_ratings: 5,
            retrain_interval: 5,
            model_retention: 3,
            model_dir: PathBuf::from("models"),
            decision_threshold: DEFAULT_DECISION_THRESHOLD,
            forest: ForestParams::default(),
        }
    }
}

impl TrainerSettings {
    /// `count >= min` and (no model, or `count` on the retrain interval, or forced)
    pub fn retrain_due(&self, rating_count: usize, has_model: bool, force: bool) -> bool {
        if rating_count < self.min_ratings {
            return false;
        }
        let on_interval = self.retrain_interval > 0 && rating_count % self.retrain_interval == 0;
        !has_model || on_interval || force
    }
}

/// Shuffled 80/20 split of sample indices, seeded for reproducibility
fn holdout_split(n: usize, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let n_test = (n as f64 * HOLDOUT_TEST_FRACTION).ceil() as usize;
    let train = indices.split_off(n_test);
    (train, indices)
}

fn pick<T: Clone>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| values[i].clone()).collect()
}

/// Trains per-user classifiers from ratings and rotates model versions
pub struct IncrementalTrainer {
    wardrobe: Arc<dyn WardrobeStore>,
    pipeline: Arc<FeaturePipeline>,
    predictions: Arc<PredictionStore>,
    registry: Arc<dyn ModelRegistry>,
    tables: Arc<dyn ScoreTableCache>,
    settings: TrainerSettings,
}

impl IncrementalTrainer {
    pub fn new(
        wardrobe: Arc<dyn WardrobeStore>,
        pipeline: Arc<FeaturePipeline>,
        predictions: Arc<PredictionStore>,
        registry: Arc<dyn ModelRegistry>,
        tables: Arc<dyn ScoreTableCache>,
        settings: TrainerSettings,
    ) -> Self {
        Self {
            wardrobe,
            pipeline,
            predictions,
            registry,
            tables,
            settings,
        }
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    /// Whether the unforced retrain trigger currently fires
    pub async fn should_retrain(&self, user_id: i64) -> AppResult<bool> {
        let count = self.wardrobe.count_ratings(user_id).await?;
        let has_model = self.registry.active(user_id).await?.is_some();
        Ok(self.settings.retrain_due(count, has_model, false))
    }

    /// Trains a new version when the retrain trigger fires.
    ///
    /// Too few ratings, or ratings that all carry the same label, yield
    /// [`TrainingOutcome::NotTrained`] and leave every store untouched.
    pub async fn train_or_retrain(&self, user_id: i64, force: bool) -> AppResult<TrainingOutcome> {
        let count = self.wardrobe.count_ratings(user_id).await?;
        if count < self.settings.min_ratings {
            tracing::info!(
                user_id,
                ratings = count,
                required = self.settings.min_ratings,
                "Not enough ratings to train"
            );
            return Ok(TrainingOutcome::NotTrained {
                reason: format!(
                    "need at least {} ratings, have {}",
                    self.settings.min_ratings, count
                ),
            });
        }

        let active = self.registry.active(user_id).await?;
        if !self.settings.retrain_due(count, active.is_some(), force) {
            if let Some(model) = active {
                tracing::info!(user_id, version = %model.version, "Model is up to date");
                return Ok(TrainingOutcome::UpToDate { model });
            }
        }

        match self.train(user_id).await {
            Ok(model) => Ok(TrainingOutcome::Trained { model }),
            Err(AppError::InsufficientData(reason)) => {
                tracing::warn!(user_id, reason = %reason, "Training skipped");
                Ok(TrainingOutcome::NotTrained { reason })
            }
            Err(e) => Err(e),
        }
    }

    async fn train(&self, user_id: i64) -> AppResult<ModelVersion> {
        let ratings = self.wardrobe.list_ratings(user_id).await?;
        let labels: Vec<u8> = ratings.iter().map(|r| u8::from(r.is_positive())).collect();
        let positives = labels.iter().filter(|&&label| label == 1).count();
        if positives == 0 || positives == labels.len() {
            return Err(AppError::InsufficientData(
                "all ratings share one label; a classifier needs both liked and disliked outfits"
                    .to_string(),
            ));
        }

        tracing::info!(user_id, ratings = ratings.len(), positives, "Training outfit classifier");

        let identities: Vec<OutfitIdentity> = ratings.iter().map(|r| r.identity.clone()).collect();
        let prepared = self
            .pipeline
            .prepare(user_id, &identities, PipelineMode::Training)
            .await?;
        let transformer = prepared
            .fitted
            .ok_or_else(|| AppError::Internal("training pipeline returned no transformer".to_string()))?;

        let version = new_version_id(ratings.len(), Utc::now());
        let spec = TrainingSpec {
            user_id,
            version: version.clone(),
            threshold: self.settings.decision_threshold,
            feature_schema_version: transformer.version.clone(),
            feature_names: prepared.columns,
            params: self.settings.forest.clone(),
        };

        let rows = prepared.rows;
        let (classifier, accuracy) = tokio::task::spawn_blocking(move || {
            let accuracy = holdout_accuracy(&spec, &rows, &labels)?;
            let classifier = OutfitClassifier::train(spec, &rows, &labels)?;
            Ok::<_, AppError>((classifier, accuracy))
        })
        .await
        .map_err(|e| AppError::Internal(format!("training task failed: {}", e)))??;

        let path = OutfitClassifier::artifact_path(&self.settings.model_dir, user_id, &version);
        classifier.save(&path).await?;

        let model = ModelVersion {
            user_id,
            version: version.clone(),
            training_samples: classifier.training_samples as i64,
            accuracy,
            feature_count: classifier.feature_count() as i64,
            feature_schema_version: transformer.version.clone(),
            decision_threshold: classifier.threshold,
            artifact_path: path.to_string_lossy().to_string(),
            trained_at: classifier.trained_at,
            is_active: true,
        };

        // The stored transformer must always match the active model's schema
        let transformers = self.pipeline.transformers();
        let previous = transformers.load(user_id).await?;
        if let Err(e) = transformers.save(user_id, &transformer).await {
            self.rollback(user_id, previous.as_ref(), &path).await;
            return Err(e);
        }

        let retired = match self.registry.activate(&model).await {
            Ok(retired) => retired,
            Err(e) => {
                tracing::error!(user_id, version = %version, error = %e, "Failed to activate model version");
                self.rollback(user_id, previous.as_ref(), &path).await;
                return Err(e);
            }
        };

        // Rows under the retired schema and model can no longer be read back
        let cleared_features = self.pipeline.store().clear(user_id, None).await?;
        let cleared_predictions = self.predictions.clear(user_id, None).await?;
        self.tables.invalidate(user_id).await?;

        if let Err(e) = self.registry.prune(user_id, self.settings.model_retention).await {
            tracing::warn!(user_id, error = %e, "Failed to prune old model versions");
        }

        tracing::info!(
            user_id,
            version = %version,
            samples = model.training_samples,
            features = model.feature_count,
            accuracy = ?accuracy,
            retired,
            cleared_features,
            cleared_predictions,
            "Activated new model version"
        );

        Ok(model)
    }

    /// Puts back the transformer the still-active model was trained with and
    /// drops the unregistered artifact
    async fn rollback(&self, user_id: i64, previous: Option<&Transformer>, artifact: &Path) {
        let transformers = self.pipeline.transformers();
        let restored = match previous {
            Some(transformer) => transformers.save(user_id, transformer).await,
            None => transformers.clear(user_id).await.map(|_| ()),
        };
        if let Err(e) = restored {
            tracing::error!(user_id, error = %e, "Failed to restore previous feature transformer");
        }

        if let Err(e) = tokio::fs::remove_file(artifact).await {
            tracing::warn!(path = %artifact.display(), error = %e, "Failed to remove unregistered artifact");
        }
    }
}

/// Accuracy of a model fitted on 80% of the samples and scored on the rest.
///
/// `None` below [`HOLDOUT_MIN_SAMPLES`], or when the training split holds a single class.
fn holdout_accuracy(spec: &TrainingSpec, x: &[Vec<f64>], y: &[u8]) -> AppResult<Option<f64>> {
    if x.len() < HOLDOUT_MIN_SAMPLES {
        return Ok(None);
    }

    let (train, test) = holdout_split(x.len(), spec.params.seed);
    let train_y = pick(y, &train);
    if train_y.iter().all(|&label| label == train_y[0]) {
        tracing::debug!(user_id = spec.user_id, "Holdout training split has a single class");
        return Ok(None);
    }

    let evaluator = OutfitClassifier::train(spec.clone(), &pick(x, &train), &train_y)?;
    let accuracy = evaluator.accuracy(&pick(x, &test), &pick(y, &test))?;
    Ok(Some(accuracy))
}
