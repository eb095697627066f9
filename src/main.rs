use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use outfit_recommender::{
    api::{create_router, AppState},
    config::Config,
    db::{create_pool, create_redis_client, Cache, CacheWriterHandle},
    services::{InMemoryScoreCache, RedisScoreCache, ScoreTableCache},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("outfit_recommender=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        user_id = config.user_id,
        threshold_policy = ?config.threshold_policy,
        hash_scheme = ?config.hash_scheme,
        "Starting outfit recommender"
    );

    let pool = create_pool(&config.database_url).await?;
    tracing::info!(database_url = %config.database_url, "Connected to database");

    let (tables, cache_writer): (Arc<dyn ScoreTableCache>, Option<CacheWriterHandle>) = match &config.redis_url {
        Some(url) => {
            let (cache, handle) = Cache::new(create_redis_client(url)?).await;
            tracing::info!("Scored tables are cached in Redis");
            (
                Arc::new(RedisScoreCache::new(cache, config.scored_table_ttl)),
                Some(handle),
            )
        }
        None => {
            tracing::info!("REDIS_URL not set, caching scored tables in process");
            (Arc::new(InMemoryScoreCache::new()), None)
        }
    };

    let state = AppState::new(pool.clone(), tables, &config);
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    if let Some(handle) = cache_writer {
        handle.shutdown().await;
    }
    pool.close().await;

    Ok(())
}
