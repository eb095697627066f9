//! Bagged ensemble of [`DecisionTree`]s.
//!
//! Each tree is grown on a bootstrap sample with `sqrt(n_features)` candidate
//! features per split. The positive-class probability is the mean of the
//! trees' leaf probabilities.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, TreeParams};
use super::ForestParams;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
}

impl RandomForest {
    /// Fits the forest on binary labels (0 or 1).
    ///
    /// # Errors
    ///
    /// `InsufficientData` when there are no samples or only one class is
    /// present; `InvalidInput` for ragged rows or a label/row count mismatch.
    pub fn fit(x: &[Vec<f64>], y: &[u8], params: &ForestParams) -> AppResult<Self> {
        if x.is_empty() {
            return Err(AppError::InsufficientData("no training samples".to_string()));
        }
        if x.len() != y.len() {
            return Err(AppError::InvalidInput(format!(
                "{} feature rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        let n_features = x[0].len();
        if x.iter().any(|row| row.len() != n_features) {
            return Err(AppError::InvalidInput(
                "feature rows have inconsistent widths".to_string(),
            ));
        }
        let positives = y.iter().filter(|&&label| label == 1).count();
        if positives == 0 || positives == y.len() {
            return Err(AppError::InsufficientData(
                "training labels contain a single class".to_string(),
            ));
        }

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            max_features: ((n_features as f64).sqrt() as usize).max(1),
            min_samples_split: params.min_samples_split,
        };

        let mut rng = StdRng::seed_from_u64(params.seed);
        let n = x.len();
        let mut trees = Vec::with_capacity(params.n_estimators.max(1));

        for _ in 0..params.n_estimators.max(1) {
            let mut counts = vec![0u32; n];
            for _ in 0..n {
                counts[rng.gen_range(0..n)] += 1;
            }
            let weights: Vec<f64> = counts
                .iter()
                .zip(y)
                .map(|(&count, &label)| f64::from(count) * params.class_weights[usize::from(label == 1)])
                .collect();

            trees.push(DecisionTree::fit(x, y, &weights, &tree_params, &mut rng));
        }

        Ok(Self { trees, n_features })
    }

    /// Mean positive-class probability across trees
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|t| t.predict_proba(features)).sum();
        total / self.trees.len() as f64
    }

    pub fn predict_proba_batch(&self, samples: &[Vec<f64>]) -> Vec<f64> {
        samples.iter().map(|s| self.predict_proba(s)).collect()
    }

    /// Mean of the per-tree normalized impurity decreases
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut importances = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (slot, value) in importances.iter_mut().zip(tree.feature_importances()) {
                *slot += value;
            }
        }
        if !self.trees.is_empty() {
            let n = self.trees.len() as f64;
            importances.iter_mut().for_each(|v| *v /= n);
        }
        importances
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub const fn n_features(&self) -> usize {
        self.n_features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(n_estimators: usize) -> ForestParams {
        ForestParams {
            n_estimators,
            ..ForestParams::default()
        }
    }

    /// Label is 1 when the first feature is large; the second is noise
    fn dataset() -> (Vec<Vec<f64>>, Vec<u8>) {
        let x: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![i as f64 / 40.0, ((i * 7) % 11) as f64])
            .collect();
        let y = x.iter().map(|row| u8::from(row[0] >= 0.5)).collect();
        (x, y)
    }

    #[test]
    fn test_forest_learns_threshold() {
        let (x, y) = dataset();
        let forest = RandomForest::fit(&x, &y, &params(30)).unwrap();

        assert_eq!(forest.n_trees(), 30);
        assert!(forest.predict_proba(&[0.9, 3.0]) > 0.7);
        assert!(forest.predict_proba(&[0.1, 3.0]) < 0.3);

        let importances = forest.feature_importances();
        assert!(importances[0] > importances[1]);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let (x, y) = dataset();
        let a = RandomForest::fit(&x, &y, &params(10)).unwrap();
        let b = RandomForest::fit(&x, &y, &params(10)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_probabilities_stay_in_unit_interval() {
        let (x, y) = dataset();
        let forest = RandomForest::fit(&x, &y, &params(10)).unwrap();
        for p in forest.predict_proba_batch(&x) {
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_single_class_is_rejected() {
        let x = vec![vec![0.0], vec![1.0]];
        let err = RandomForest::fit(&x, &[1, 1], &params(5)).unwrap_err();
        assert!(matches!(err, AppError::InsufficientData(_)));
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let x = vec![vec![0.0, 1.0], vec![1.0]];
        let err = RandomForest::fit(&x, &[0, 1], &params(5)).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
