use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::frame::{ColumnKind, FeatureFrame};
use crate::error::AppResult;

/// All monomials of total degree `1..=degree` over a fixed set of inputs, without a bias term.
///
/// Terms are ordered by degree, then lexicographically by the (non-decreasing)
/// input indices that form them: `a, b, a^2, a b, b^2, ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialExpansion {
    terms: Vec<Vec<usize>>,
}

impl PolynomialExpansion {
    pub fn new(n_inputs: usize, degree: usize) -> Self {
        let mut terms = Vec::new();
        for d in 1..=degree {
            let mut current = Vec::with_capacity(d);
            push_combinations(n_inputs, d, 0, &mut current, &mut terms);
        }
        Self { terms }
    }

    pub fn n_outputs(&self) -> usize {
        self.terms.len()
    }

    /// Names each term after its inputs, e.g. `a`, `a^2`, `a b`
    pub fn feature_names(&self, inputs: &[String]) -> Vec<String> {
        self.terms
            .iter()
            .map(|term| {
                let mut parts: Vec<String> = Vec::new();
                let mut i = 0;
                while i < term.len() {
                    let index = term[i];
                    let power = term[i..].iter().take_while(|&&j| j == index).count();
                    let name = inputs.get(index).map_or("?", String::as_str);
                    parts.push(if power > 1 {
                        format!("{}^{}", name, power)
                    } else {
                        name.to_string()
                    });
                    i += power;
                }
                parts.join(" ")
            })
            .collect()
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        self.terms
            .iter()
            .map(|term| {
                term.iter()
                    .map(|&i| row.get(i).copied().unwrap_or(0.0))
                    .product()
            })
            .collect()
    }
}

fn push_combinations(
    n_inputs: usize,
    remaining: usize,
    start: usize,
    current: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    if remaining == 0 {
        out.push(current.clone());
        return;
    }
    for i in start..n_inputs {
        current.push(i);
        push_combinations(n_inputs, remaining - 1, i, current, out);
        current.pop();
    }
}

/// Fitted feature schema for one user.
///
/// Records which numeric columns are expanded and the exact ordered list of
/// output columns the classifier was trained on. `version` is the
/// feature-schema version that keys the feature store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transformer {
    pub version: String,
    pub degree: usize,
    pub numeric_columns: Vec<String>,
    pub output_columns: Vec<String>,
    pub fitted_at: DateTime<Utc>,
}

impl Transformer {
    /// Fits a new schema on `frame` and returns it with the transformed frame.
    ///
    /// Output columns are the frame's indicator columns followed by the
    /// polynomial terms of its numeric columns.
    pub fn fit(frame: &FeatureFrame, degree: usize) -> (Self, FeatureFrame) {
        let numeric_columns = frame.numeric_columns();
        let indicator_columns = frame.indicator_columns();
        let expansion = PolynomialExpansion::new(numeric_columns.len(), degree);

        let mut output_columns = indicator_columns;
        output_columns.extend(expansion.feature_names(&numeric_columns));

        let transformer = Self {
            version: Uuid::new_v4().simple().to_string(),
            degree,
            numeric_columns,
            output_columns,
            fitted_at: Utc::now(),
        };

        let transformed = transformer.transform(frame);
        (transformer, transformed)
    }

    /// Applies the fitted expansion without aligning.
    ///
    /// Indicator columns pass through as the frame has them. The expansion
    /// reads the recorded numeric columns, so a numeric column the frame
    /// lacks reads as 0 and one it has extra is ignored.
    pub fn transform(&self, frame: &FeatureFrame) -> FeatureFrame {
        let expansion = PolynomialExpansion::new(self.numeric_columns.len(), self.degree);
        let indicator_columns = frame.indicator_columns();

        let indicators = frame.select(&indicator_columns);
        let numerics = frame.select(&self.numeric_columns);

        let rows = indicators
            .into_iter()
            .zip(numerics)
            .map(|(mut row, numeric)| {
                row.extend(expansion.transform_row(&numeric));
                row
            })
            .collect();

        let mut columns = indicator_columns;
        let mut kinds = vec![ColumnKind::Indicator; columns.len()];
        columns.extend(expansion.feature_names(&self.numeric_columns));
        kinds.resize(columns.len(), ColumnKind::Numeric);

        FeatureFrame::new(columns, kinds, rows)
    }

    pub fn feature_count(&self) -> usize {
        self.output_columns.len()
    }
}

/// Persists at most one fitted [`Transformer`] per user
#[async_trait::async_trait]
pub trait TransformerRegistry: Send + Sync {
    async fn load(&self, user_id: i64) -> AppResult<Option<Transformer>>;

    /// Replaces the user's transformer
    async fn save(&self, user_id: i64, transformer: &Transformer) -> AppResult<()>;

    /// Returns `true` when a transformer was removed
    async fn clear(&self, user_id: i64) -> AppResult<bool>;
}

#[derive(sqlx::FromRow)]
struct TransformerRow {
    version: String,
    degree: i64,
    numeric_columns: String,
    output_columns: String,
    fitted_at: DateTime<Utc>,
}

/// SQLite-backed [`TransformerRegistry`]; column lists are stored as JSON arrays
#[derive(Clone)]
pub struct SqliteTransformerRegistry {
    pool: SqlitePool,
}

impl SqliteTransformerRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TransformerRegistry for SqliteTransformerRegistry {
    async fn load(&self, user_id: i64) -> AppResult<Option<Transformer>> {
        let row: Option<TransformerRow> = sqlx::query_as(
            r#"
            SELECT version, degree, numeric_columns, output_columns, fitted_at
            FROM feature_transformers
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Transformer {
            version: row.version,
            degree: row.degree.max(1) as usize,
            numeric_columns: serde_json::from_str(&row.numeric_columns)?,
            output_columns: serde_json::from_str(&row.output_columns)?,
            fitted_at: row.fitted_at,
        }))
    }

    async fn save(&self, user_id: i64, transformer: &Transformer) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO feature_transformers
            (user_id, version, degree, numeric_columns, output_columns, fitted_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(&transformer.version)
        .bind(transformer.degree as i64)
        .bind(serde_json::to_string(&transformer.numeric_columns)?)
        .bind(serde_json::to_string(&transformer.output_columns)?)
        .bind(transformer.fitted_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id,
            version = %transformer.version,
            features = transformer.feature_count(),
            "Saved feature transformer"
        );

        Ok(())
    }

    async fn clear(&self, user_id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM feature_transformers WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;
    use crate::features::frame::FeatureCell;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_expansion_terms_and_names() {
        let expansion = PolynomialExpansion::new(2, 2);
        assert_eq!(expansion.n_outputs(), 5);
        assert_eq!(
            expansion.feature_names(&names(&["a", "b"])),
            names(&["a", "b", "a^2", "a b", "b^2"])
        );
        assert_eq!(expansion.transform_row(&[2.0, 3.0]), vec![2.0, 3.0, 4.0, 6.0, 9.0]);

        let cubic = PolynomialExpansion::new(2, 3);
        let cubic_names = cubic.feature_names(&names(&["a", "b"]));
        assert_eq!(&cubic_names[5..], &names(&["a^3", "a^2 b", "a b^2", "b^3"])[..]);
    }

    #[test]
    fn test_fit_puts_indicators_before_expanded_numerics() {
        let frame = FeatureFrame::from_records(vec![
            vec![
                FeatureCell::numeric("x", 2.0),
                FeatureCell::indicator("style_casual", true),
                FeatureCell::numeric("y", 3.0),
            ],
            vec![
                FeatureCell::numeric("x", 1.0),
                FeatureCell::indicator("style_casual", false),
                FeatureCell::numeric("y", 0.5),
            ],
        ]);

        let (transformer, out) = Transformer::fit(&frame, 2);
        assert_eq!(transformer.numeric_columns, names(&["x", "y"]));
        assert_eq!(
            transformer.output_columns,
            names(&["style_casual", "x", "y", "x^2", "x y", "y^2"])
        );
        assert_eq!(out.columns(), transformer.output_columns.as_slice());
        assert_eq!(out.rows()[0], vec![1.0, 2.0, 3.0, 4.0, 6.0, 9.0]);
    }

    #[test]
    fn test_transform_uses_recorded_numeric_columns() {
        let training = FeatureFrame::from_records(vec![vec![
            FeatureCell::numeric("x", 1.0),
            FeatureCell::numeric("y", 1.0),
        ]]);
        let (transformer, _) = Transformer::fit(&training, 2);

        let later = FeatureFrame::from_records(vec![vec![
            FeatureCell::numeric("y", 2.0),
            FeatureCell::numeric("z", 7.0),
            FeatureCell::indicator("fit_slim", true),
        ]]);
        let out = transformer.transform(&later);
        assert_eq!(out.columns()[0], "fit_slim");
        assert_eq!(out.rows()[0], vec![1.0, 0.0, 2.0, 0.0, 0.0, 4.0]);
    }

    #[tokio::test]
    async fn test_registry_round_trip_and_replace() {
        let registry = SqliteTransformerRegistry::new(create_memory_pool().await.unwrap());
        assert!(registry.load(1).await.unwrap().is_none());

        let frame = FeatureFrame::from_records(vec![vec![FeatureCell::numeric("x", 1.0)]]);
        let (first, _) = Transformer::fit(&frame, 2);
        registry.save(1, &first).await.unwrap();
        let loaded = registry.load(1).await.unwrap().unwrap();
        assert_eq!(loaded.version, first.version);
        assert_eq!(loaded.output_columns, first.output_columns);

        let (second, _) = Transformer::fit(&frame, 3);
        registry.save(1, &second).await.unwrap();
        let loaded = registry.load(1).await.unwrap().unwrap();
        assert_eq!(loaded.version, second.version);
        assert_eq!(loaded.degree, 3);

        assert!(registry.clear(1).await.unwrap());
        assert!(registry.load(1).await.unwrap().is_none());
    }
}
