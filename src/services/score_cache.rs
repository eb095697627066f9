use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{
    db::{Cache, CacheKey},
    error::AppResult,
    models::ScoredOutfit,
};

/// Memoized scored outfit tables, one per user.
///
/// The table is derived data: it is recomputed from ratings, the active
/// model and the wardrobe whenever it is missing, so `invalidate` must be
/// called after any of those change.
#[async_trait::async_trait]
pub trait ScoreTableCache: Send + Sync {
    async fn load(&self, user_id: i64) -> AppResult<Option<Arc<Vec<ScoredOutfit>>>>;

    async fn store(&self, user_id: i64, table: Arc<Vec<ScoredOutfit>>) -> AppResult<()>;

    async fn invalidate(&self, user_id: i64) -> AppResult<()>;
}

/// Process-local table cache
#[derive(Default)]
pub struct InMemoryScoreCache {
    tables: RwLock<HashMap<i64, Arc<Vec<ScoredOutfit>>>>,
}

impl InMemoryScoreCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ScoreTableCache for InMemoryScoreCache {
    async fn load(&self, user_id: i64) -> AppResult<Option<Arc<Vec<ScoredOutfit>>>> {
        Ok(self.tables.read().await.get(&user_id).cloned())
    }

    async fn store(&self, user_id: i64, table: Arc<Vec<ScoredOutfit>>) -> AppResult<()> {
        self.tables.write().await.insert(user_id, table);
        Ok(())
    }

    async fn invalidate(&self, user_id: i64) -> AppResult<()> {
        self.tables.write().await.remove(&user_id);
        Ok(())
    }
}

/// Table cache shared through Redis, written in the background with a TTL
#[derive(Clone)]
pub struct RedisScoreCache {
    cache: Cache,
    ttl: u64,
}

impl RedisScoreCache {
    pub fn new(cache: Cache, ttl: u64) -> Self {
        Self { cache, ttl }
    }
}

#[async_trait::async_trait]
impl ScoreTableCache for RedisScoreCache {
    async fn load(&self, user_id: i64) -> AppResult<Option<Arc<Vec<ScoredOutfit>>>> {
        let table: Option<Vec<ScoredOutfit>> = self
            .cache
            .get_from_cache(&CacheKey::ScoredTable(user_id))
            .await?;
        Ok(table.map(Arc::new))
    }

    async fn store(&self, user_id: i64, table: Arc<Vec<ScoredOutfit>>) -> AppResult<()> {
        self.cache
            .set_in_background(&CacheKey::ScoredTable(user_id), table.as_ref(), self.ttl);
        Ok(())
    }

    async fn invalidate(&self, user_id: i64) -> AppResult<()> {
        self.cache.delete(&CacheKey::ScoredTable(user_id)).await
    }
}
