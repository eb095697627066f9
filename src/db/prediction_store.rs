use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;

use super::versioned::VersionedStore;
use crate::{error::AppResult, models::OutfitHash};

const LOOKUP_CHUNK: usize = 500;

/// SQLite-backed prediction cache keyed by `(user, outfit hash, model version)`
#[derive(Clone)]
pub struct SqlitePredictionStore {
    pool: SqlitePool,
}

impl SqlitePredictionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl VersionedStore<f64> for SqlitePredictionStore {
    async fn get(
        &self,
        user_id: i64,
        hashes: &[OutfitHash],
        version: &str,
    ) -> AppResult<HashMap<OutfitHash, f64>> {
        let mut found = HashMap::new();

        for chunk in hashes.chunks(LOOKUP_CHUNK) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT outfit_hash, predicted_rating FROM outfit_predictions WHERE user_id = ",
            );
            query.push_bind(user_id);
            query.push(" AND model_version = ");
            query.push_bind(version);
            query.push(" AND outfit_hash IN (");
            let mut separated = query.separated(", ");
            for hash in chunk {
                separated.push_bind(hash.as_str());
            }
            separated.push_unseparated(")");

            let rows: Vec<(String, f64)> = query.build_query_as().fetch_all(&self.pool).await?;
            found.extend(
                rows.into_iter()
                    .map(|(hash, probability)| (OutfitHash::from_stored(hash), probability)),
            );
        }

        Ok(found)
    }

    async fn put(&self, user_id: i64, hash: &OutfitHash, value: &f64, version: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO outfit_predictions
            (user_id, outfit_hash, model_version, predicted_rating, predicted_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(hash.as_str())
        .bind(version)
        .bind(*value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn put_batch(&self, user_id: i64, entries: &[(OutfitHash, f64)], version: &str) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        for (hash, probability) in entries {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO outfit_predictions
                (user_id, outfit_hash, model_version, predicted_rating, predicted_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(user_id)
            .bind(hash.as_str())
            .bind(version)
            .bind(*probability)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self, user_id: i64, version: Option<&str>) -> AppResult<u64> {
        let result = match version {
            Some(version) => {
                sqlx::query("DELETE FROM outfit_predictions WHERE user_id = ? AND model_version = ?")
                    .bind(user_id)
                    .bind(version)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM outfit_predictions WHERE user_id = ?")
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?
            }
        };

        Ok(result.rows_affected())
    }

    async fn count(&self, user_id: i64, version: Option<&str>) -> AppResult<usize> {
        let (count,): (i64,) = match version {
            Some(version) => {
                sqlx::query_as(
                    "SELECT COUNT(*) FROM outfit_predictions WHERE user_id = ? AND model_version = ?",
                )
                .bind(user_id)
                .bind(version)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM outfit_predictions WHERE user_id = ?")
                    .bind(user_id)
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(count as usize)
    }
}
