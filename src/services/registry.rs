use chrono::{DateTime, Utc};
use sqlx::{SqliteExecutor, SqlitePool};
use std::path::Path;
use uuid::Uuid;

use crate::{error::AppResult, models::ModelVersion};

/// Distinguishing version id: `v{samples}_{YYYYmmdd_HHMMSS}_{8 hex}`
pub fn new_version_id(training_samples: usize, at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "v{}_{}_{}",
        training_samples,
        at.format("%Y%m%d_%H%M%S"),
        &suffix[..8]
    )
}

/// Model Version Registry: trained artifacts per user, at most one active
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn register(&self, model: &ModelVersion) -> AppResult<()>;

    async fn active(&self, user_id: i64) -> AppResult<Option<ModelVersion>>;

    /// Newest first
    async fn list(&self, user_id: i64, limit: usize) -> AppResult<Vec<ModelVersion>>;

    /// Registers `model` as the user's only active version in one step.
    /// On error no version changes state. Returns how many versions were retired.
    async fn activate(&self, model: &ModelVersion) -> AppResult<u64>;

    /// Deletes all but the newest `keep` versions along with their artifacts.
    /// The active version is never pruned. Returns the removed versions.
    async fn prune(&self, user_id: i64, keep: usize) -> AppResult<Vec<ModelVersion>>;

    async fn count(&self, user_id: i64) -> AppResult<usize>;
}

#[derive(sqlx::FromRow)]
struct ModelRow {
    user_id: i64,
    version: String,
    training_samples: i64,
    accuracy_score: Option<f64>,
    feature_count: i64,
    feature_schema_version: String,
    decision_threshold: f64,
    model_path: String,
    trained_at: DateTime<Utc>,
    is_active: bool,
}

impl From<ModelRow> for ModelVersion {
    fn from(row: ModelRow) -> Self {
        ModelVersion {
            user_id: row.user_id,
            version: row.version,
            training_samples: row.training_samples,
            accuracy: row.accuracy_score,
            feature_count: row.feature_count,
            feature_schema_version: row.feature_schema_version,
            decision_threshold: row.decision_threshold,
            artifact_path: row.model_path,
            trained_at: row.trained_at,
            is_active: row.is_active,
        }
    }
}

const MODEL_COLUMNS: &str = "user_id, version, training_samples, accuracy_score, feature_count, \
     feature_schema_version, decision_threshold, model_path, trained_at, is_active";

/// SQLite-backed [`ModelRegistry`]
#[derive(Clone)]
pub struct SqliteModelRegistry {
    pool: SqlitePool,
}

impl SqliteModelRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

async fn remove_artifact(path: &str) {
    match tokio::fs::remove_file(Path::new(path)).await {
        Ok(()) => tracing::debug!(path, "Removed model artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path, error = %e, "Failed to remove model artifact"),
    }
}

async fn insert_model<'e>(
    executor: impl SqliteExecutor<'e>,
    model: &ModelVersion,
    is_active: bool,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO model_versions
        (user_id, version, training_samples, accuracy_score, feature_count,
         feature_schema_version, decision_threshold, model_path, trained_at, is_active)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(model.user_id)
    .bind(&model.version)
    .bind(model.training_samples)
    .bind(model.accuracy)
    .bind(model.feature_count)
    .bind(&model.feature_schema_version)
    .bind(model.decision_threshold)
    .bind(&model.artifact_path)
    .bind(model.trained_at)
    .bind(is_active)
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl ModelRegistry for SqliteModelRegistry {
    async fn register(&self, model: &ModelVersion) -> AppResult<()> {
        insert_model(&self.pool, model, model.is_active).await
    }

    async fn activate(&self, model: &ModelVersion) -> AppResult<u64> {
        let mut tx = self.pool.begin().await?;

        let retired = sqlx::query(
            "UPDATE model_versions SET is_active = 0
             WHERE user_id = ? AND is_active = 1",
        )
        .bind(model.user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        insert_model(&mut *tx, model, true).await?;

        tx.commit().await?;
        Ok(retired)
    }

    async fn active(&self, user_id: i64) -> AppResult<Option<ModelVersion>> {
        let row: Option<ModelRow> = sqlx::query_as(&format!(
            "SELECT {} FROM model_versions
             WHERE user_id = ? AND is_active = 1
             ORDER BY trained_at DESC, id DESC
             LIMIT 1",
            MODEL_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ModelVersion::from))
    }

    async fn list(&self, user_id: i64, limit: usize) -> AppResult<Vec<ModelVersion>> {
        let rows: Vec<ModelRow> = sqlx::query_as(&format!(
            "SELECT {} FROM model_versions
             WHERE user_id = ?
             ORDER BY trained_at DESC, id DESC
             LIMIT ?",
            MODEL_COLUMNS
        ))
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ModelVersion::from).collect())
    }

    async fn prune(&self, user_id: i64, keep: usize) -> AppResult<Vec<ModelVersion>> {
        let rows: Vec<ModelRow> = sqlx::query_as(&format!(
            "SELECT {} FROM model_versions
             WHERE user_id = ?
             ORDER BY trained_at DESC, id DESC",
            MODEL_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let stale: Vec<ModelVersion> = rows
            .into_iter()
            .map(ModelVersion::from)
            .skip(keep)
            .filter(|model| !model.is_active)
            .collect();

        for model in &stale {
            sqlx::query("DELETE FROM model_versions WHERE user_id = ? AND version = ?")
                .bind(user_id)
                .bind(&model.version)
                .execute(&self.pool)
                .await?;
            remove_artifact(&model.artifact_path).await;
        }

        if !stale.is_empty() {
            tracing::info!(user_id, removed = stale.len(), kept = keep, "Pruned old model versions");
        }

        Ok(stale)
    }

    async fn count(&self, user_id: i64) -> AppResult<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM model_versions WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;
    use chrono::Duration;

    fn model(version: &str, minutes_ago: i64, active: bool, path: &str) -> ModelVersion {
        ModelVersion {
            user_id: 1,
            version: version.to_string(),
            training_samples: 5,
            accuracy: None,
            feature_count: 10,
            feature_schema_version: "fs1".to_string(),
            decision_threshold: 0.45,
            artifact_path: path.to_string(),
            trained_at: Utc::now() - Duration::minutes(minutes_ago),
            is_active: active,
        }
    }

    #[test]
    fn test_version_id_format() {
        let at = DateTime::parse_from_rfc3339("2025-03-04T05:06:07Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = new_version_id(12, at);
        assert!(id.starts_with("v12_20250304_050607_"));
        assert_eq!(id.len(), "v12_20250304_050607_".len() + 8);
        assert_ne!(new_version_id(12, at), id);
    }

    #[tokio::test]
    async fn test_activate_switches_active_version() {
        let registry = SqliteModelRegistry::new(create_memory_pool().await.unwrap());
        assert!(registry.active(1).await.unwrap().is_none());

        assert_eq!(registry.activate(&model("v5_a", 10, true, "a.json")).await.unwrap(), 0);
        assert_eq!(registry.activate(&model("v10_b", 0, false, "b.json")).await.unwrap(), 1);

        let active = registry.active(1).await.unwrap().unwrap();
        assert_eq!(active.version, "v10_b");
        let all = registry.list(1, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|m| m.is_active).count(), 1);
        assert_eq!(all[0].version, "v10_b");
    }

    #[tokio::test]
    async fn test_failed_activation_keeps_previous_active() {
        let registry = SqliteModelRegistry::new(create_memory_pool().await.unwrap());
        registry.activate(&model("v5_a", 10, true, "a.json")).await.unwrap();
        registry.activate(&model("v10_b", 5, true, "b.json")).await.unwrap();

        // Duplicate version id fails the insert after the deactivation ran
        let err = registry.activate(&model("v5_a", 0, true, "c.json")).await;
        assert!(err.is_err());

        let all = registry.list(1, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|m| m.is_active).count(), 1);
        assert_eq!(registry.active(1).await.unwrap().unwrap().version, "v10_b");
    }

    #[tokio::test]
    async fn test_prune_keeps_newest_and_removes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SqliteModelRegistry::new(create_memory_pool().await.unwrap());

        let mut paths = Vec::new();
        for (i, minutes_ago) in [40, 30, 20, 10].iter().enumerate() {
            let path = dir.path().join(format!("m{}.json", i));
            tokio::fs::write(&path, b"{}").await.unwrap();
            let path = path.to_string_lossy().to_string();
            registry
                .register(&model(&format!("v{}", i), *minutes_ago, i == 3, &path))
                .await
                .unwrap();
            paths.push(path);
        }

        let removed = registry.prune(1, 3).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].version, "v0");
        assert!(!Path::new(&paths[0]).exists());
        assert!(Path::new(&paths[3]).exists());
        assert_eq!(registry.count(1).await.unwrap(), 3);
    }
}
