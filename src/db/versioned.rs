use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{error::AppResult, models::OutfitHash};

/// Cache contract shared by the feature and prediction stores
///
/// Entries are keyed by `(user, outfit hash, version)`. A miss is never an
/// error: `get` returns only the subset that was found.
#[async_trait::async_trait]
pub trait VersionedStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(
        &self,
        user_id: i64,
        hashes: &[OutfitHash],
        version: &str,
    ) -> AppResult<HashMap<OutfitHash, V>>;

    /// Idempotent upsert
    async fn put(&self, user_id: i64, hash: &OutfitHash, value: &V, version: &str) -> AppResult<()>;

    /// Upserts many entries at once
    async fn put_batch(&self, user_id: i64, entries: &[(OutfitHash, V)], version: &str) -> AppResult<()>;

    /// Clears one version's entries, or every entry of the user when `version` is `None`.
    /// Returns the number of entries removed.
    async fn clear(&self, user_id: i64, version: Option<&str>) -> AppResult<u64>;

    async fn count(&self, user_id: i64, version: Option<&str>) -> AppResult<usize>;
}

/// Process-local [`VersionedStore`], useful for tests and ephemeral deployments
pub struct InMemoryStore<V> {
    entries: RwLock<HashMap<(i64, String, OutfitHash), V>>,
}

impl<V> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> InMemoryStore<V> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl<V> VersionedStore<V> for InMemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(
        &self,
        user_id: i64,
        hashes: &[OutfitHash],
        version: &str,
    ) -> AppResult<HashMap<OutfitHash, V>> {
        let entries = self.entries.read().await;
        let found = hashes
            .iter()
            .filter_map(|hash| {
                entries
                    .get(&(user_id, version.to_string(), hash.clone()))
                    .map(|value| (hash.clone(), value.clone()))
            })
            .collect();
        Ok(found)
    }

    async fn put(&self, user_id: i64, hash: &OutfitHash, value: &V, version: &str) -> AppResult<()> {
        self.entries
            .write()
            .await
            .insert((user_id, version.to_string(), hash.clone()), value.clone());
        Ok(())
    }

    async fn put_batch(&self, user_id: i64, entries: &[(OutfitHash, V)], version: &str) -> AppResult<()> {
        let mut guard = self.entries.write().await;
        for (hash, value) in entries {
            guard.insert((user_id, version.to_string(), hash.clone()), value.clone());
        }
        Ok(())
    }

    async fn clear(&self, user_id: i64, version: Option<&str>) -> AppResult<u64> {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|(user, entry_version, _), _| {
            *user != user_id || version.is_some_and(|v| v != entry_version)
        });
        Ok((before - guard.len()) as u64)
    }

    async fn count(&self, user_id: i64, version: Option<&str>) -> AppResult<usize> {
        let guard = self.entries.read().await;
        Ok(guard
            .keys()
            .filter(|(user, entry_version, _)| {
                *user == user_id && version.map_or(true, |v| v == entry_version)
            })
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{outfit_hash, HashScheme};

    fn hash(n: usize) -> OutfitHash {
        outfit_hash(
            HashScheme::Joined,
            &format!("shirt_{}", n),
            "pants_1",
            "shoes_1",
        )
    }

    #[tokio::test]
    async fn test_get_returns_only_found_subset() {
        let store: InMemoryStore<f64> = InMemoryStore::new();
        store.put(1, &hash(1), &0.25, "v1").await.unwrap();

        let found = store.get(1, &[hash(1), hash(2)], "v1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&hash(1)], 0.25);

        assert!(store.get(1, &[hash(1)], "v2").await.unwrap().is_empty());
        assert!(store.get(2, &[hash(1)], "v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_replaces_on_conflict() {
        let store: InMemoryStore<f64> = InMemoryStore::new();
        store.put(1, &hash(1), &0.25, "v1").await.unwrap();
        store.put(1, &hash(1), &0.75, "v1").await.unwrap();
        let found = store.get(1, &[hash(1)], "v1").await.unwrap();
        assert_eq!(found[&hash(1)], 0.75);
        assert_eq!(store.count(1, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_by_version_and_user() {
        let store: InMemoryStore<f64> = InMemoryStore::new();
        store
            .put_batch(1, &[(hash(1), 0.1), (hash(2), 0.2)], "v1")
            .await
            .unwrap();
        store.put(1, &hash(1), &0.3, "v2").await.unwrap();
        store.put(2, &hash(1), &0.4, "v1").await.unwrap();

        assert_eq!(store.clear(1, Some("v1")).await.unwrap(), 2);
        assert_eq!(store.count(1, None).await.unwrap(), 1);
        assert_eq!(store.clear(1, None).await.unwrap(), 1);
        assert_eq!(store.count(1, None).await.unwrap(), 0);
        assert_eq!(store.count(2, Some("v1")).await.unwrap(), 1);
    }
}
