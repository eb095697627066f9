pub mod feature_store;
pub mod prediction_store;
pub mod redis;
pub mod sqlite;
pub mod versioned;
pub mod wardrobe;

pub use feature_store::{fields_digest, FeatureRecord, SqliteFeatureStore};
pub use prediction_store::SqlitePredictionStore;
pub use self::redis::{create_redis_client, Cache, CacheKey, CacheWriterHandle};
pub use sqlite::{create_memory_pool, create_pool};
pub use versioned::{InMemoryStore, VersionedStore};
pub use wardrobe::{SqliteWardrobeStore, WardrobeStore};

/// Feature Store: `(user, outfit hash, feature-schema version)` → feature vector
pub type FeatureStore = dyn VersionedStore<FeatureRecord>;

/// Prediction Store: `(user, outfit hash, model version)` → probability
pub type PredictionStore = dyn VersionedStore<f64>;
