//! Weighted CART decision tree for binary classification.
//!
//! Nodes live in a flat array, as in sklearn's `tree_` arrays: a node with a
//! negative `feature` is a leaf, and samples with `x[feature] <= threshold`
//! go to `left_child`.

use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

/// Smallest impurity decrease that justifies a split
const MIN_IMPURITY_DECREASE: f64 = 1e-12;

/// A node in the decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Feature index to split on (`-1` for leaf nodes).
    pub feature: i32,
    /// Split threshold (features <= threshold go left).
    pub threshold: f64,
    /// Index of left child (`-1` for leaf).
    pub left_child: i32,
    /// Index of right child (`-1` for leaf).
    pub right_child: i32,
    /// Weighted fraction of positive samples at this node.
    pub probability: f64,
    /// Weighted Gini impurity at this node.
    pub impurity: f64,
    /// Total sample weight reaching this node during training.
    pub weight: f64,
}

impl TreeNode {
    fn leaf(probability: f64, impurity: f64, weight: f64) -> Self {
        Self {
            feature: -1,
            threshold: 0.0,
            left_child: -1,
            right_child: -1,
            probability,
            impurity,
            weight,
        }
    }

    /// Returns `true` if this node is a leaf (no children).
    pub const fn is_leaf(&self) -> bool {
        self.feature < 0
    }
}

/// Growth limits for a single tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    /// Candidate features drawn per split
    pub max_features: usize,
    pub min_samples_split: usize,
}

/// Weighted training view shared by every node of one tree
struct TrainingSet<'a> {
    x: &'a [Vec<f64>],
    y: &'a [u8],
    weights: &'a [f64],
}

impl TrainingSet<'_> {
    /// (total weight, positive weight)
    fn totals(&self, indices: &[usize]) -> (f64, f64) {
        indices.iter().fold((0.0, 0.0), |(total, positive), &i| {
            let w = self.weights[i];
            (total + w, if self.y[i] == 1 { positive + w } else { positive })
        })
    }
}

fn gini(total: f64, positive: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    let p = positive / total;
    2.0 * p * (1.0 - p)
}

struct Split {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

/// A binary decision tree with probability leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
    n_features: usize,
}

impl DecisionTree {
    /// Grows a tree on the samples with non-zero weight.
    ///
    /// `weights` carries both bootstrap multiplicity and class weight.
    pub fn fit(x: &[Vec<f64>], y: &[u8], weights: &[f64], params: &TreeParams, rng: &mut StdRng) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        let mut tree = Self {
            nodes: Vec::new(),
            n_features,
        };

        let data = TrainingSet { x, y, weights };
        let mut indices: Vec<usize> = (0..x.len()).filter(|&i| weights[i] > 0.0).collect();
        tree.grow(&data, &mut indices, 0, params, rng);
        tree
    }

    fn grow(
        &mut self,
        data: &TrainingSet<'_>,
        indices: &mut [usize],
        depth: usize,
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> i32 {
        let (total, positive) = data.totals(indices);
        let probability = if total > 0.0 { positive / total } else { 0.0 };
        let impurity = gini(total, positive);

        let node_index = self.nodes.len();
        self.nodes.push(TreeNode::leaf(probability, impurity, total));

        if depth >= params.max_depth
            || indices.len() < params.min_samples_split.max(2)
            || impurity <= MIN_IMPURITY_DECREASE
        {
            return node_index as i32;
        }

        let Some(split) = self.best_split(data, indices, total, impurity, params, rng) else {
            return node_index as i32;
        };

        let mut boundary = 0;
        for i in 0..indices.len() {
            if data.x[indices[i]][split.feature] <= split.threshold {
                indices.swap(i, boundary);
                boundary += 1;
            }
        }
        let (left_indices, right_indices) = indices.split_at_mut(boundary);

        let left = self.grow(data, left_indices, depth + 1, params, rng);
        let right = self.grow(data, right_indices, depth + 1, params, rng);

        let node = &mut self.nodes[node_index];
        node.feature = split.feature as i32;
        node.threshold = split.threshold;
        node.left_child = left;
        node.right_child = right;

        node_index as i32
    }

    fn best_split(
        &self,
        data: &TrainingSet<'_>,
        indices: &[usize],
        total: f64,
        impurity: f64,
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> Option<Split> {
        if self.n_features == 0 {
            return None;
        }
        // Constant features do not count towards the candidate budget
        let n_candidates = params.max_features.clamp(1, self.n_features);
        let permutation = index::sample(rng, self.n_features, self.n_features);

        let mut best: Option<Split> = None;
        let mut order: Vec<usize> = indices.to_vec();
        let (_, positive) = data.totals(indices);
        let mut evaluated = 0;

        for feature in permutation.iter() {
            if evaluated >= n_candidates {
                break;
            }
            order.sort_by(|&a, &b| data.x[a][feature].total_cmp(&data.x[b][feature]));
            let (Some(&first), Some(&last)) = (order.first(), order.last()) else {
                return None;
            };
            if data.x[last][feature] <= data.x[first][feature] {
                continue;
            }
            evaluated += 1;

            let mut left_total = 0.0;
            let mut left_positive = 0.0;

            for pos in 0..order.len() - 1 {
                let i = order[pos];
                let w = data.weights[i];
                left_total += w;
                if data.y[i] == 1 {
                    left_positive += w;
                }

                let current = data.x[i][feature];
                let next = data.x[order[pos + 1]][feature];
                if next <= current {
                    continue;
                }

                let right_total = total - left_total;
                let right_positive = positive - left_positive;
                let children = (left_total / total) * gini(left_total, left_positive)
                    + (right_total / total) * gini(right_total, right_positive);
                let decrease = impurity - children;

                if decrease > MIN_IMPURITY_DECREASE && best.as_ref().map_or(true, |b| decrease > b.decrease) {
                    let mut threshold = current + (next - current) / 2.0;
                    if threshold >= next {
                        threshold = current;
                    }
                    best = Some(Split {
                        feature,
                        threshold,
                        decrease,
                    });
                }
            }
        }

        best
    }

    /// Probability of the positive class for one sample.
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            let Some(node) = self.nodes.get(idx) else {
                return 0.0;
            };
            if node.is_leaf() {
                return node.probability;
            }
            let value = features.get(node.feature as usize).copied().unwrap_or(0.0);
            idx = if value <= node.threshold {
                node.left_child as usize
            } else {
                node.right_child as usize
            };
        }
    }

    /// Impurity decrease per feature, normalized to sum to 1 (all zero for a stump).
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut importances = vec![0.0; self.n_features];
        for node in self.nodes.iter().filter(|n| !n.is_leaf()) {
            let left = &self.nodes[node.left_child as usize];
            let right = &self.nodes[node.right_child as usize];
            let decrease = node.weight * node.impurity - left.weight * left.impurity - right.weight * right.impurity;
            if let Some(slot) = importances.get_mut(node.feature as usize) {
                *slot += decrease;
            }
        }

        let sum: f64 = importances.iter().sum();
        if sum > 0.0 {
            importances.iter_mut().for_each(|v| *v /= sum);
        }
        importances
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub const fn n_features(&self) -> usize {
        self.n_features
    }

    /// Tree depth (longest root-to-leaf path).
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(node) if !node.is_leaf() => {
                    1 + walk(nodes, node.left_child as usize).max(walk(nodes, node.right_child as usize))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}
