use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{
    config::Config,
    db::{SqliteFeatureStore, SqlitePredictionStore, SqliteWardrobeStore, WardrobeStore},
    features::{FeaturePipeline, SqliteTransformerRegistry},
    services::{
        IncrementalTrainer, OutfitScoringEngine, ScoreTableCache, SqliteModelRegistry, WardrobeService,
    },
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// User served by this process
    pub user_id: i64,
    pub store: Arc<dyn WardrobeStore>,
    pub wardrobe: Arc<WardrobeService>,
    pub scoring: Arc<OutfitScoringEngine>,
    pub trainer: Arc<IncrementalTrainer>,
}

impl AppState {
    /// Wires every service over one SQLite pool and the given scored-table cache
    pub fn new(pool: SqlitePool, tables: Arc<dyn ScoreTableCache>, config: &Config) -> Self {
        let store: Arc<dyn WardrobeStore> = Arc::new(SqliteWardrobeStore::new(pool.clone()));
        let features = Arc::new(SqliteFeatureStore::new(pool.clone()));
        let predictions = Arc::new(SqlitePredictionStore::new(pool.clone()));
        let registry = Arc::new(SqliteModelRegistry::new(pool.clone()));
        let pipeline = Arc::new(FeaturePipeline::new(
            store.clone(),
            features.clone(),
            Arc::new(SqliteTransformerRegistry::new(pool)),
            config.pipeline_settings(),
        ));

        let wardrobe = WardrobeService::new(store.clone(), features, predictions.clone(), tables.clone());
        let scoring = OutfitScoringEngine::new(
            store.clone(),
            pipeline.clone(),
            predictions.clone(),
            registry.clone(),
            tables.clone(),
            config.scoring_settings(),
        );
        let trainer = IncrementalTrainer::new(
            store.clone(),
            pipeline,
            predictions,
            registry,
            tables,
            config.trainer_settings(),
        );

        Self {
            user_id: config.user_id,
            store,
            wardrobe: Arc::new(wardrobe),
            scoring: Arc::new(scoring),
            trainer: Arc::new(trainer),
        }
    }
}
