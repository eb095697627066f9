use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;

use super::versioned::VersionedStore;
use crate::{
    error::{AppError, AppResult},
    models::OutfitHash,
};

/// Max bound parameters per `IN (...)` lookup
const LOOKUP_CHUNK: usize = 500;

/// SHA-256 hex digest of an ordered column list
pub fn fields_digest(columns: &[String]) -> String {
    let mut hasher = Sha256::new();
    for column in columns {
        hasher.update(column.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Engineered feature vector stamped with the transformer version that produced it
/// and a digest of its ordered column names.
///
/// Values are persisted as little-endian `f64` bytes so a read returns exactly
/// the bits that were written.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub schema_version: String,
    /// [`fields_digest`] of the columns `values` is ordered by
    pub fields_digest: String,
    pub values: Vec<f64>,
}

impl FeatureRecord {
    pub fn new(schema_version: impl Into<String>, fields_digest: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            schema_version: schema_version.into(),
            fields_digest: fields_digest.into(),
            values,
        }
    }

    /// Whether the values line up with `columns` in order
    pub fn matches_fields(&self, columns: &[String], digest: &str) -> bool {
        self.values.len() == columns.len() && self.fields_digest == digest
    }

    pub fn encode_values(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn decode(
        schema_version: String,
        fields_digest: String,
        field_count: usize,
        bytes: &[u8],
    ) -> AppResult<Self> {
        if bytes.len() != field_count * 8 {
            return Err(AppError::Internal(format!(
                "feature record for schema {} has {} bytes, expected {} fields",
                schema_version,
                bytes.len(),
                field_count
            )));
        }

        let values = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();

        Ok(Self {
            schema_version,
            fields_digest,
            values,
        })
    }
}

/// SQLite-backed feature cache keyed by `(user, outfit hash, feature-schema version)`
#[derive(Clone)]
pub struct SqliteFeatureStore {
    pool: SqlitePool,
}

impl SqliteFeatureStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl VersionedStore<FeatureRecord> for SqliteFeatureStore {
    async fn get(
        &self,
        user_id: i64,
        hashes: &[OutfitHash],
        version: &str,
    ) -> AppResult<HashMap<OutfitHash, FeatureRecord>> {
        let mut found = HashMap::new();

        for chunk in hashes.chunks(LOOKUP_CHUNK) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT outfit_hash, fields_digest, field_count, feature_values FROM outfit_features WHERE user_id = ",
            );
            query.push_bind(user_id);
            query.push(" AND feature_version = ");
            query.push_bind(version);
            query.push(" AND outfit_hash IN (");
            let mut separated = query.separated(", ");
            for hash in chunk {
                separated.push_bind(hash.as_str());
            }
            separated.push_unseparated(")");

            let rows: Vec<(String, String, i64, Vec<u8>)> =
                query.build_query_as().fetch_all(&self.pool).await?;

            for (hash, digest, field_count, bytes) in rows {
                let record = FeatureRecord::decode(version.to_string(), digest, field_count as usize, &bytes)?;
                found.insert(OutfitHash::from_stored(hash), record);
            }
        }

        Ok(found)
    }

    async fn put(
        &self,
        user_id: i64,
        hash: &OutfitHash,
        value: &FeatureRecord,
        version: &str,
    ) -> AppResult<()> {
        self.put_batch(user_id, &[(hash.clone(), value.clone())], version)
            .await
    }

    async fn put_batch(
        &self,
        user_id: i64,
        entries: &[(OutfitHash, FeatureRecord)],
        version: &str,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        for (hash, record) in entries {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO outfit_features
                (user_id, outfit_hash, feature_version, fields_digest, field_count, feature_values, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(user_id)
            .bind(hash.as_str())
            .bind(version)
            .bind(&record.fields_digest)
            .bind(record.values.len() as i64)
            .bind(record.encode_values())
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
                sqlx::query("DELETE FROM outfit_features WHERE user_id = ? AND feature_version = ?")
                    .bind(user_id)
                    .bind(version)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM outfit_features WHERE user_id = ?")
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
                    "SELECT COUNT(*) FROM outfit_features WHERE user_id = ? AND feature_version = ?",
                )
                .bind(user_id)
                .bind(version)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM outfit_features WHERE user_id = ?")
                    .bind(user_id)
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;
    use crate::models::{outfit_hash, HashScheme};

    /// Record whose digest covers generated names `f0..fN`
    fn record(version: &str, values: Vec<f64>) -> FeatureRecord {
        let columns: Vec<String> = (0..values.len()).map(|i| format!("f{}", i)).collect();
        FeatureRecord::new(version, fields_digest(&columns), values)
    }

    fn hash(n: usize) -> OutfitHash {
        outfit_hash(HashScheme::Joined, &format!("shirt_{}", n), "pants_1", "shoes_1")
    }

    #[test]
    fn test_decode_rejects_truncated_record() {
        let record = record("fs1", vec![1.0, 2.0]);
        let bytes = record.encode_values();
        assert!(FeatureRecord::decode("fs1".to_string(), record.fields_digest.clone(), 3, &bytes).is_err());
    }

    #[tokio::test]
    async fn test_put_batch_then_get_is_bit_identical() {
        let store = SqliteFeatureStore::new(create_memory_pool().await.unwrap());
        let values = vec![0.1 + 0.2, -0.0, f64::MIN_POSITIVE, 1e300, 1.0 / 3.0];
        let entries = vec![
            (hash(1), record("fs1", values.clone())),
            (hash(2), record("fs1", vec![7.5; 5])),
        ];
        store.put_batch(1, &entries, "fs1").await.unwrap();

        let found = store.get(1, &[hash(1), hash(2), hash(3)], "fs1").await.unwrap();
        assert_eq!(found.len(), 2);
        let read = &found[&hash(1)];
        assert_eq!(read.schema_version, "fs1");
        assert_eq!(read.fields_digest, entries[0].1.fields_digest);
        let written_bits: Vec<u64> = values.iter().map(|v| v.to_bits()).collect();
        let read_bits: Vec<u64> = read.values.iter().map(|v| v.to_bits()).collect();
        assert_eq!(written_bits, read_bits);
    }

    #[tokio::test]
    async fn test_versions_are_isolated_and_clearable() {
        let store = SqliteFeatureStore::new(create_memory_pool().await.unwrap());
        store
            .put(1, &hash(1), &record("fs1", vec![1.0]), "fs1")
            .await
            .unwrap();
        store
            .put(1, &hash(1), &record("fs2", vec![2.0, 3.0]), "fs2")
            .await
            .unwrap();

        assert_eq!(store.get(1, &[hash(1)], "fs2").await.unwrap()[&hash(1)].values, vec![2.0, 3.0]);
        assert_eq!(store.clear(1, Some("fs1")).await.unwrap(), 1);
        assert!(store.get(1, &[hash(1)], "fs1").await.unwrap().is_empty());
        assert_eq!(store.count(1, None).await.unwrap(), 1);

        store.clear(1, None).await.unwrap();
        assert!(store.get(1, &[hash(1)], "fs2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_handles_more_hashes_than_one_chunk() {
        let store = SqliteFeatureStore::new(create_memory_pool().await.unwrap());
        let hashes: Vec<OutfitHash> = (0..(LOOKUP_CHUNK + 20)).map(hash).collect();
        let entries: Vec<(OutfitHash, FeatureRecord)> = hashes
            .iter()
            .map(|h| (h.clone(), record("fs1", vec![0.5])))
            .collect();
        store.put_batch(1, &entries, "fs1").await.unwrap();

        let found = store.get(1, &hashes, "fs1").await.unwrap();
        assert_eq!(found.len(), hashes.len());
    }

    #[test]
    fn test_fields_digest_depends_on_order() {
        let columns = vec!["a".to_string(), "b".to_string()];
        let swapped = vec!["b".to_string(), "a".to_string()];
        let joined = vec!["ab".to_string()];
        assert_eq!(fields_digest(&columns), fields_digest(&["a".to_string(), "b".to_string()]));
        assert_ne!(fields_digest(&columns), fields_digest(&swapped));
        assert_ne!(fields_digest(&columns), fields_digest(&joined));
        assert_eq!(fields_digest(&columns).len(), 64);

        let record = FeatureRecord::new("fs1", fields_digest(&columns), vec![1.0, 2.0]);
        assert!(record.matches_fields(&columns, &fields_digest(&columns)));
        assert!(!record.matches_fields(&swapped, &fields_digest(&swapped)));
    }
}
