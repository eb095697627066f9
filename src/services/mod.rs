pub mod registry;
pub mod score_cache;
pub mod scoring;
pub mod trainer;
pub mod wardrobe;

pub use registry::{ModelRegistry, SqliteModelRegistry};
pub use score_cache::{InMemoryScoreCache, RedisScoreCache, ScoreTableCache};
pub use scoring::{CacheStats, OutfitScoringEngine, ScoringSettings, ThresholdPolicy};
pub use trainer::{IncrementalTrainer, TrainerSettings};
pub use wardrobe::{SemanticTagger, VisualFeatureProvider, WardrobeService};
