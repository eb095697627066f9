use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Memoized scored outfit table for a user
    ScoredTable(i64),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::ScoredTable(user_id) => write!(f, "scored:{}", user_id),
        }
    }
}

/// Creates a Redis client for caching
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Key-value operations the cache needs from its store
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: u64) -> AppResult<()>;

    async fn del(&self, key: &str) -> AppResult<()>;
}

/// [`CacheBackend`] over a Redis server
pub struct RedisBackend {
    client: Client,
}

impl RedisBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: u64) -> AppResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(key, value, ttl).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> AppResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

/// Queued cache mutation, applied in order by the writer task
enum CacheCommand {
    Set { key: String, value: String, ttl: u64 },
    Delete { key: String },
}

/// Cache handler for storing and retrieving data from Redis
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    write_tx: mpsc::UnboundedSender<CacheCommand>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
    writer: JoinHandle<()>,
}

impl CacheWriterHandle {
    /// Signals the writer task to flush pending commands and waits for it to stop
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
        if let Err(e) = self.writer.await {
            tracing::error!(error = %e, "Cache writer task panicked");
        }
    }
}

impl Cache {
    /// Creates a new Cache instance with an async write background task
    pub async fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        Self::with_backend(Arc::new(RedisBackend::new(redis_client)))
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let writer = tokio::spawn(Self::cache_writer_task(backend.clone(), write_rx, shutdown_rx));

        let cache = Self { backend, write_tx };
        let handle = CacheWriterHandle { shutdown_tx, writer };

        (cache, handle)
    }

    /// Applies queued commands until shutdown, then drains what is left
    async fn cache_writer_task(
        backend: Arc<dyn CacheBackend>,
        mut write_rx: mpsc::UnboundedReceiver<CacheCommand>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");
        let mut failed_writes = 0u64;

        loop {
            tokio::select! {
                Some(command) = write_rx.recv() => {
                    if let Err(e) = Self::apply(backend.as_ref(), command).await {
                        failed_writes += 1;
                        tracing::error!(error = %e, "Failed to write to Redis cache");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!(failed = failed_writes, "Cache writer shutting down, flushing remaining writes");

                    write_rx.close();
                    while let Some(command) = write_rx.recv().await {
                        if let Err(e) = Self::apply(backend.as_ref(), command).await {
                            tracing::error!(error = %e, "Failed to flush cache write during shutdown");
                        }
                    }

                    tracing::info!("Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn apply(backend: &dyn CacheBackend, command: CacheCommand) -> AppResult<()> {
        match command {
            CacheCommand::Set { key, value, ttl } => backend.set_ex(&key, &value, ttl).await,
            CacheCommand::Delete { key } => backend.del(&key).await,
        }
    }

    /// Retrieves a value from the cache by key
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<T>> {
        let cached = self.backend.get(&format!("{}", key)).await?;

        match cached {
            Some(json) => {
                let data = serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error: {}", e))
                })?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    /// Queues a write without waiting for Redis
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization error");
                return;
            }
        };

        let command = CacheCommand::Set {
            key: format!("{}", key),
            value: json,
            ttl,
        };

        if let Err(e) = self.write_tx.send(command) {
            tracing::error!(error = %e, "Failed to send cache write message");
        }
    }

    /// Deletes a key now and again after any queued writes
    ///
    /// The second delete runs behind writes already sitting in the queue, so a
    /// background `set` issued before this call cannot resurrect the key.
    pub async fn delete(&self, key: &CacheKey) -> AppResult<()> {
        let key = format!("{}", key);
        self.backend.del(&key).await?;

        if self.write_tx.send(CacheCommand::Delete { key: key.clone() }).is_err() {
            tracing::warn!(key = %key, "Cache writer stopped; queued delete skipped");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    #[test]
    fn test_cache_key_display_scored_table() {
        let key = CacheKey::ScoredTable(7);
        assert_eq!(format!("{}", key), "scored:7");
    }

    /// Backend that holds keys in a map and records every mutation
    #[derive(Default)]
    struct MemoryBackend {
        entries: Mutex<HashMap<String, String>>,
        log: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl CacheBackend for MemoryBackend {
        async fn get(&self, key: &str) -> AppResult<Option<String>> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn set_ex(&self, key: &str, value: &str, _ttl: u64) -> AppResult<()> {
            self.log.lock().unwrap().push(format!("set {}", key));
            self.entries.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn del(&self, key: &str) -> AppResult<()> {
            self.log.lock().unwrap().push(format!("del {}", key));
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delete_outlives_queued_set() {
        let backend = Arc::new(MemoryBackend::default());
        let (cache, handle) = Cache::with_backend(backend.clone());
        let key = CacheKey::ScoredTable(5);

        // Queued but not yet applied when the delete runs
        cache.set_in_background(&key, &vec![1, 2, 3], 60);
        cache.delete(&key).await.unwrap();
        handle.shutdown().await;

        let retrieved: Option<Vec<i32>> = cache.get_from_cache(&key).await.unwrap();
        assert_eq!(retrieved, None);
        let log = backend.log.lock().unwrap().clone();
        assert_eq!(log.last().map(String::as_str), Some("del scored:5"));
        let set_at = log.iter().position(|entry| entry == "set scored:5").unwrap();
        assert!(log[set_at..].contains(&"del scored:5".to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_writes() {
        let backend = Arc::new(MemoryBackend::default());
        let (cache, handle) = Cache::with_backend(backend.clone());
        let key = CacheKey::ScoredTable(6);

        cache.set_in_background(&key, &"flushed".to_string(), 60);
        handle.shutdown().await;

        let retrieved: Option<String> = cache.get_from_cache(&key).await.unwrap();
        assert_eq!(retrieved.as_deref(), Some("flushed"));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_set_in_background_then_delete() {
        let client = create_redis_client(&redis_url()).unwrap();
        let (cache, _handle) = Cache::new(client).await;

        let key = CacheKey::ScoredTable(424242);
        cache.set_in_background(&key, &vec![1, 2, 3], 60);
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let retrieved: Option<Vec<i32>> = cache.get_from_cache(&key).await.unwrap();
        assert_eq!(retrieved, Some(vec![1, 2, 3]));

        cache.delete(&key).await.unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        let retrieved: Option<Vec<i32>> = cache.get_from_cache(&key).await.unwrap();
        assert_eq!(retrieved, None);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_cache_writer_graceful_shutdown() {
        let client = create_redis_client(&redis_url()).unwrap();
        let (cache, handle) = Cache::new(client).await;

        let key = CacheKey::ScoredTable(424243);
        cache.set_in_background(&key, &"flushed".to_string(), 60);
        handle.shutdown().await;
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        let retrieved: Option<String> = cache.get_from_cache(&key).await.unwrap();
        assert_eq!(retrieved.as_deref(), Some("flushed"));
        cache.delete(&key).await.unwrap();
    }
}
