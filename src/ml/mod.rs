pub mod classifier;
pub mod forest;
pub mod tree;

pub use classifier::{OutfitClassifier, TrainingSpec, DEFAULT_DECISION_THRESHOLD};
pub use forest::RandomForest;
pub use tree::{DecisionTree, TreeNode, TreeParams};

use serde::{Deserialize, Serialize};

/// Hyper-parameters of the bagged forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Weight of the negative and positive class, in that order
    pub class_weights: [f64; 2],
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 500,
            max_depth: 5,
            min_samples_split: 2,
            class_weights: [1.0, 2.0],
            seed: 42,
        }
    }
}
