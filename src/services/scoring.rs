use chrono::Utc;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{ModelRegistry, ScoreTableCache};
use crate::{
    db::{PredictionStore, WardrobeStore},
    error::{AppError, AppResult},
    features::{FeaturePipeline, PipelineMode},
    ml::OutfitClassifier,
    models::{
        Category, HashScheme, ModelVersion, OutfitHash, OutfitIdentity, PartialOutfit, Rating,
        ScoreSource, ScoredOutfit,
    },
};

/// Score range drawn from while no model is trained
const FALLBACK_RANGE: std::ops::RangeInclusive<f64> = 0.3..=0.7;
/// Score reported for an exploration pick
const EXPLORATION_SCORE: f64 = 0.5;
/// Ratings at or above this many stars always pass the acceptance filter
const GOOD_RATING: u8 = 4;

/// Which threshold the acceptance filter applies to non-rating scores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// The active model's decision threshold; the user preference only when no model exists
    #[default]
    Model,
    /// Always the user-preference threshold
    UserPreference,
}

#[derive(Debug, Clone)]
pub struct ScoringSettings {
    /// Probability of returning an unscored random outfit
    pub exploration_rate: f64,
    /// Acceptance threshold used when the user has not stored one
    pub user_threshold: f64,
    pub threshold_policy: ThresholdPolicy,
    pub hash_scheme: HashScheme,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            exploration_rate: 0.05,
            user_threshold: 0.5,
            threshold_policy: ThresholdPolicy::Model,
            hash_scheme: HashScheme::Joined,
        }
    }
}

/// Diagnostics over the scoring caches of one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Feature vectors cached under the current transformer
    pub cached_features: usize,
    /// Predictions cached for the active model
    pub cached_predictions: usize,
    pub active_model: Option<String>,
    pub total_combinations: usize,
    /// Size of the memoized scored table, 0 when none is held
    pub scored_combinations: usize,
    pub good_outfits: usize,
}

fn is_good(scored: &ScoredOutfit, threshold: f64) -> bool {
    match scored.source {
        ScoreSource::UserRating { rating } => rating >= GOOD_RATING,
        _ => scored.score >= threshold,
    }
}

/// Resolves a score for every outfit through the rating > cached prediction >
/// fresh prediction > random fallback cascade, and recommends from the result.
pub struct OutfitScoringEngine {
    wardrobe: Arc<dyn WardrobeStore>,
    pipeline: Arc<FeaturePipeline>,
    predictions: Arc<PredictionStore>,
    registry: Arc<dyn ModelRegistry>,
    tables: Arc<dyn ScoreTableCache>,
    settings: ScoringSettings,
    rng: Mutex<StdRng>,
}

impl OutfitScoringEngine {
    pub fn new(
        wardrobe: Arc<dyn WardrobeStore>,
        pipeline: Arc<FeaturePipeline>,
        predictions: Arc<PredictionStore>,
        registry: Arc<dyn ModelRegistry>,
        tables: Arc<dyn ScoreTableCache>,
        settings: ScoringSettings,
    ) -> Self {
        Self {
            wardrobe,
            pipeline,
            predictions,
            registry,
            tables,
            settings,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replaces the random source with a seeded one
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn settings(&self) -> &ScoringSettings {
        &self.settings
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut rng)
    }

    fn explore(&self) -> bool {
        let rate = self.settings.exploration_rate;
        rate > 0.0 && self.with_rng(|rng| rng.gen::<f64>() < rate)
    }

    /// Threshold applied to model and fallback scores
    pub async fn acceptance_threshold(&self, user_id: i64, active: Option<&ModelVersion>) -> AppResult<f64> {
        let preference = self
            .wardrobe
            .user_threshold(user_id)
            .await?
            .unwrap_or(self.settings.user_threshold);

        Ok(match (self.settings.threshold_policy, active) {
            (ThresholdPolicy::Model, Some(model)) => model.decision_threshold,
            _ => preference,
        })
    }

    /// Scores a batch of outfits through the full cascade
    pub async fn score_identities(
        &self,
        user_id: i64,
        identities: &[OutfitIdentity],
    ) -> AppResult<Vec<ScoredOutfit>> {
        let scheme = self.settings.hash_scheme;
        let hashes: Vec<OutfitHash> = identities.iter().map(|identity| identity.hash(scheme)).collect();

        let ratings: HashMap<OutfitHash, u8> = self
            .wardrobe
            .list_ratings(user_id)
            .await?
            .into_iter()
            .map(|rating| (rating.identity.hash(scheme), rating.rating))
            .collect();

        let mut sources: Vec<Option<ScoreSource>> = hashes
            .iter()
            .map(|hash| ratings.get(hash).map(|&rating| ScoreSource::UserRating { rating }))
            .collect();
        let rated = sources.iter().filter(|source| source.is_some()).count();

        let active = self.registry.active(user_id).await?;
        let (mut cached, mut fresh, mut fallback) = (0, 0, 0);

        match &active {
            Some(model) => {
                let unrated: Vec<OutfitHash> = hashes
                    .iter()
                    .zip(&sources)
                    .filter(|(_, source)| source.is_none())
                    .map(|(hash, _)| hash.clone())
                    .collect();
                let stored = self.predictions.get(user_id, &unrated, &model.version).await?;
                for (hash, source) in hashes.iter().zip(sources.iter_mut()) {
                    if source.is_none() {
                        if let Some(&probability) = stored.get(hash) {
                            *source = Some(ScoreSource::CachedPrediction { probability });
                            cached += 1;
                        }
                    }
                }

                let missing: Vec<usize> = (0..identities.len()).filter(|&i| sources[i].is_none()).collect();
                if !missing.is_empty() {
                    let targets: Vec<OutfitIdentity> = missing.iter().map(|&i| identities[i].clone()).collect();
                    let probabilities = self.predict(user_id, model, &targets).await?;
                    let entries: Vec<(OutfitHash, f64)> = missing
                        .iter()
                        .map(|&i| hashes[i].clone())
                        .zip(probabilities.iter().copied())
                        .collect();
                    self.predictions.put_batch(user_id, &entries, &model.version).await?;

                    for (&i, probability) in missing.iter().zip(probabilities) {
                        sources[i] = Some(ScoreSource::FreshPrediction { probability });
                    }
                    fresh = missing.len();
                }
            }
            None => {
                self.with_rng(|rng| {
                    for source in sources.iter_mut().filter(|source| source.is_none()) {
                        let value = rng.gen_range(FALLBACK_RANGE);
                        *source = Some(ScoreSource::Fallback { value });
                        fallback += 1;
                    }
                });
                if fallback > 0 {
                    tracing::debug!(user_id, fallback, "No trained model, using random scores");
                }
            }
        }

        tracing::debug!(
            user_id,
            outfits = identities.len(),
            rated,
            cached,
            fresh,
            fallback,
            "Scored outfits"
        );

        identities
            .iter()
            .zip(hashes)
            .zip(sources)
            .map(|((identity, outfit_hash), source)| {
                let source = source.ok_or_else(|| {
                    AppError::Internal(format!("outfit {} was left unscored", identity))
                })?;
                let score = match source {
                    ScoreSource::UserRating { rating } => f64::from(rating) / 5.0,
                    ScoreSource::CachedPrediction { probability }
                    | ScoreSource::FreshPrediction { probability } => probability,
                    ScoreSource::Fallback { value } => value,
                    ScoreSource::Exploration => EXPLORATION_SCORE,
                };
                Ok(ScoredOutfit {
                    identity: identity.clone(),
                    outfit_hash,
                    score,
                    source,
                })
            })
            .collect()
    }

    async fn predict(
        &self,
        user_id: i64,
        model: &ModelVersion,
        identities: &[OutfitIdentity],
    ) -> AppResult<Vec<f64>> {
        let prepared = self
            .pipeline
            .prepare(user_id, identities, PipelineMode::Inference)
            .await?;
        if prepared.schema_version != model.feature_schema_version {
            return Err(AppError::Configuration(format!(
                "model {} was trained on feature schema {} but the current schema is {}",
                model.version, model.feature_schema_version, prepared.schema_version
            )));
        }

        let classifier = OutfitClassifier::load(std::path::Path::new(&model.artifact_path)).await?;
        let rows = prepared.rows;
        let probabilities = tokio::task::spawn_blocking(move || classifier.predict_proba(&rows))
            .await
            .map_err(|e| AppError::Internal(format!("prediction task failed: {}", e)))??;

        tracing::info!(
            user_id,
            version = %model.version,
            count = probabilities.len(),
            "Computed fresh predictions"
        );
        Ok(probabilities)
    }

    /// The memoized scored table, rebuilt over every active combination on a miss
    pub async fn score_all(&self, user_id: i64) -> AppResult<Arc<Vec<ScoredOutfit>>> {
        if let Some(table) = self.tables.load(user_id).await? {
            tracing::debug!(user_id, outfits = table.len(), "Scored table cache hit");
            return Ok(table);
        }

        let identities = self.wardrobe.combinations(user_id).await?;
        let table = Arc::new(self.score_identities(user_id, &identities).await?);
        self.tables.store(user_id, table.clone()).await?;

        tracing::info!(user_id, outfits = table.len(), "Built scored table");
        Ok(table)
    }

    /// Uniform pick among acceptable outfits, else the single best one
    async fn recommend(
        &self,
        user_id: i64,
        candidates: Vec<&ScoredOutfit>,
    ) -> AppResult<Option<ScoredOutfit>> {
        let active = self.registry.active(user_id).await?;
        let threshold = self.acceptance_threshold(user_id, active.as_ref()).await?;

        let good: Vec<&ScoredOutfit> = candidates
            .iter()
            .copied()
            .filter(|scored| is_good(scored, threshold))
            .collect();

        if good.is_empty() {
            tracing::info!(
                user_id,
                threshold,
                candidates = candidates.len(),
                "No outfit met the threshold, returning the best available"
            );
            return Ok(candidates
                .into_iter()
                .max_by(|a, b| a.score.total_cmp(&b.score))
                .cloned());
        }

        Ok(self.with_rng(|rng| good.choose(rng).map(|&scored| scored.clone())))
    }

    fn exploration_pick(&self, identities: &[OutfitIdentity]) -> Option<ScoredOutfit> {
        let identity = self.with_rng(|rng| identities.choose(rng).cloned())?;
        Some(ScoredOutfit {
            outfit_hash: identity.hash(self.settings.hash_scheme),
            identity,
            score: EXPLORATION_SCORE,
            source: ScoreSource::Exploration,
        })
    }

    /// A recommended outfit, or an occasional random exploration pick.
    ///
    /// `None` when some category has no active items.
    pub async fn random_outfit(&self, user_id: i64) -> AppResult<Option<ScoredOutfit>> {
        if self.explore() {
            let identities = self.wardrobe.combinations(user_id).await?;
            tracing::debug!(user_id, "Returning exploration outfit");
            return Ok(self.exploration_pick(&identities));
        }

        let table = self.score_all(user_id).await?;
        self.recommend(user_id, table.iter().collect()).await
    }

    /// Best outfit around one pinned item
    ///
    /// # Errors
    ///
    /// `NotFound` when the pinned item is not an active item of `category`.
    pub async fn complete_outfit(
        &self,
        user_id: i64,
        category: Category,
        item_id: &str,
    ) -> AppResult<Option<ScoredOutfit>> {
        match self.wardrobe.get_item(user_id, item_id).await? {
            Some(item) if item.is_active && item.category == category => {}
            _ => {
                return Err(AppError::NotFound(format!(
                    "no active {} with id {}",
                    category, item_id
                )))
            }
        }

        if self.explore() {
            let identities: Vec<OutfitIdentity> = self
                .wardrobe
                .combinations(user_id)
                .await?
                .into_iter()
                .filter(|identity| identity.contains(category, item_id))
                .collect();
            tracing::debug!(user_id, item_id, "Returning exploration outfit with pinned item");
            return Ok(self.exploration_pick(&identities));
        }

        let table = self.score_all(user_id).await?;
        let candidates: Vec<&ScoredOutfit> = table
            .iter()
            .filter(|scored| scored.identity.contains(category, item_id))
            .collect();
        self.recommend(user_id, candidates).await
    }

    /// Score of one fully specified outfit
    pub async fn score_specific_outfit(
        &self,
        user_id: i64,
        identity: &OutfitIdentity,
    ) -> AppResult<ScoredOutfit> {
        if let Some(table) = self.tables.load(user_id).await? {
            if let Some(scored) = table.iter().find(|scored| &scored.identity == identity) {
                return Ok(scored.clone());
            }
        }

        self.score_identities(user_id, std::slice::from_ref(identity))
            .await?
            .pop()
            .ok_or_else(|| AppError::Internal(format!("outfit {} was left unscored", identity)))
    }

    /// Best outfit among the combinations that agree with every pinned slot
    pub async fn build_partial_outfit(
        &self,
        user_id: i64,
        partial: &PartialOutfit,
    ) -> AppResult<Option<ScoredOutfit>> {
        let table = self.score_all(user_id).await?;
        let candidates: Vec<&ScoredOutfit> = table.iter().filter(|scored| partial.matches(&scored.identity)).collect();
        if candidates.is_empty() {
            tracing::info!(user_id, ?partial, "No combination matches the pinned items");
            return Ok(None);
        }
        self.recommend(user_id, candidates).await
    }

    /// Records a 1-5 rating; cached predictions and the scored table are dropped
    pub async fn save_rating(
        &self,
        user_id: i64,
        identity: OutfitIdentity,
        rating: u8,
        source: Option<String>,
        notes: Option<String>,
    ) -> AppResult<Rating> {
        if !(1..=5).contains(&rating) {
            return Err(AppError::InvalidInput(format!(
                "rating must be between 1 and 5, got {}",
                rating
            )));
        }

        let rating = Rating {
            outfit_hash: identity.hash(self.settings.hash_scheme),
            identity,
            rating,
            source: source.unwrap_or_else(|| "manual".to_string()),
            rated_at: Utc::now(),
            notes,
        };
        self.wardrobe.save_rating(user_id, &rating).await?;

        let cleared = self.predictions.clear(user_id, None).await?;
        self.tables.invalidate(user_id).await?;

        tracing::info!(
            user_id,
            outfit = %rating.outfit_hash,
            rating = rating.rating,
            cleared_predictions = cleared,
            "Saved outfit rating"
        );
        Ok(rating)
    }

    /// Drops the memoized table; persistent stores are kept
    pub async fn invalidate_cache(&self, user_id: i64) -> AppResult<()> {
        self.tables.invalidate(user_id).await?;
        tracing::debug!(user_id, "Invalidated scored table");
        Ok(())
    }

    /// Drops the memoized table and both persistent stores
    pub async fn clear_all_caches(&self, user_id: i64) -> AppResult<()> {
        self.tables.invalidate(user_id).await?;
        let predictions = self.predictions.clear(user_id, None).await?;
        let features = self.pipeline.store().clear(user_id, None).await?;
        tracing::info!(user_id, predictions, features, "Cleared all caches");
        Ok(())
    }

    /// Fills the feature store for every combination missing a vector
    pub async fn precompute_features(&self, user_id: i64) -> AppResult<usize> {
        self.pipeline.precompute_all(user_id).await
    }

    pub async fn cache_stats(&self, user_id: i64) -> AppResult<CacheStats> {
        let active = self.registry.active(user_id).await?;
        let cached_features = match self.pipeline.transformers().load(user_id).await? {
            Some(transformer) => self.pipeline.store().count(user_id, Some(&transformer.version)).await?,
            None => 0,
        };
        let cached_predictions = match &active {
            Some(model) => self.predictions.count(user_id, Some(&model.version)).await?,
            None => 0,
        };
        let total_combinations = self.wardrobe.combinations(user_id).await?.len();

        let (scored_combinations, good_outfits) = match self.tables.load(user_id).await? {
            Some(table) => {
                let threshold = self.acceptance_threshold(user_id, active.as_ref()).await?;
                let good = table.iter().filter(|scored| is_good(scored, threshold)).count();
                (table.len(), good)
            }
            None => (0, 0),
        };

        Ok(CacheStats {
            cached_features,
            cached_predictions,
            active_model: active.map(|model| model.version),
            total_combinations,
            scored_combinations,
            good_outfits,
        })
    }
}
