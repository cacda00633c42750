//! CART regression tree shared by the bagged and boosted ensemble members.
//!
//! Nodes live in a flat arena so a fitted tree serializes as a plain list and
//! can be validated after it is read back from disk.

use serde::{Deserialize, Serialize};

use crate::config::TreeParams;
use crate::features::{FeatureVector, FEATURE_COUNT};

/// Smallest variance reduction worth a split.
const MIN_GAIN: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Fits a tree to `targets` using the rows listed in `rows`. Rows may
    /// repeat, which is how bootstrap samples are passed in.
    pub fn fit(
        features: &[FeatureVector],
        targets: &[f64],
        rows: &[usize],
        params: &TreeParams,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        if rows.is_empty() {
            tree.nodes.push(Node::Leaf { value: 0.0 });
            return tree;
        }
        tree.grow(features, targets, rows, 0, params);
        tree
    }

    fn grow(
        &mut self,
        features: &[FeatureVector],
        targets: &[f64],
        rows: &[usize],
        depth: usize,
        params: &TreeParams,
    ) -> usize {
        let index = self.nodes.len();
        let value = rows.iter().map(|&r| targets[r]).sum::<f64>() / rows.len() as f64;
        self.nodes.push(Node::Leaf { value });

        if depth >= params.max_depth || rows.len() < params.min_samples_split.max(2) {
            return index;
        }

        let Some(split) = best_split(features, targets, rows, params.min_samples_leaf.max(1))
        else {
            return index;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| features[r].get(split.feature) <= split.threshold);
        if left_rows.is_empty() || right_rows.is_empty() {
            return index;
        }

        let left = self.grow(features, targets, &left_rows, depth + 1, params);
        let right = self.grow(features, targets, &right_rows, depth + 1, params);
        self.nodes[index] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        index
    }

    pub fn predict(&self, features: &FeatureVector) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if features.get(*feature) <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match &nodes[index] {
                Node::Leaf { .. } => 1,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Checks a deserialized tree before it is trusted for prediction.
    /// Children must point strictly forward, which also rules out cycles.
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { value } => {
                    if !value.is_finite() {
                        return Err(format!("leaf {index} has a non-finite value"));
                    }
                }
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= FEATURE_COUNT {
                        return Err(format!("node {index} splits on unknown feature {feature}"));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {index} has a non-finite threshold"));
                    }
                    for child in [*left, *right] {
                        if child <= index || child >= self.nodes.len() {
                            return Err(format!("node {index} points to invalid child {child}"));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }
}

/// Exhaustive search over sorted feature values. Maximizing
/// `sum_l^2 / n_l + sum_r^2 / n_r` is equivalent to minimizing the summed
/// squared error of the two children.
fn best_split(
    features: &[FeatureVector],
    targets: &[f64],
    rows: &[usize],
    min_leaf: usize,
) -> Option<SplitCandidate> {
    let n = rows.len();
    if n < 2 * min_leaf {
        return None;
    }

    let total: f64 = rows.iter().map(|&r| targets[r]).sum();
    let parent_score = total * total / n as f64;
    let mut best: Option<SplitCandidate> = None;
    let mut sorted = rows.to_vec();

    for feature in 0..FEATURE_COUNT {
        sorted.sort_by(|&a, &b| features[a].get(feature).total_cmp(&features[b].get(feature)));

        let mut left_sum = 0.0;
        for i in 0..n - 1 {
            left_sum += targets[sorted[i]];
            let left_n = i + 1;
            let right_n = n - left_n;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }

            let here = features[sorted[i]].get(feature);
            let next = features[sorted[i + 1]].get(feature);
            if here == next {
                continue;
            }

            // Between adjacent floats the midpoint rounds up to `next`.
            let midpoint = (here + next) / 2.0;
            let threshold = if midpoint < next { midpoint } else { here };

            let right_sum = total - left_sum;
            let score = left_sum * left_sum / left_n as f64 + right_sum * right_sum / right_n as f64;
            let gain = score - parent_score;
            if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    gain,
                });
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(fuel_price: f64, cpi: f64) -> FeatureVector {
        FeatureVector::new([1.0, 0.0, 0.0, fuel_price, cpi, 8.0])
    }

    #[test]
    fn recovers_a_step_function() {
        let features: Vec<FeatureVector> = (0..40).map(|i| vector(2.0 + i as f64 * 0.05, 210.0)).collect();
        let targets: Vec<f64> = features
            .iter()
            .map(|f| if f.get(3) < 3.0 { 100.0 } else { 500.0 })
            .collect();
        let rows: Vec<usize> = (0..features.len()).collect();

        let tree = RegressionTree::fit(&features, &targets, &rows, &TreeParams::default());

        assert_eq!(tree.predict(&vector(2.1, 210.0)), 100.0);
        assert_eq!(tree.predict(&vector(3.8, 210.0)), 500.0);
        assert_eq!(tree.depth(), 2);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn constant_target_stays_a_single_leaf() {
        let features: Vec<FeatureVector> = (0..10).map(|i| vector(i as f64, 200.0)).collect();
        let targets = vec![42.0; 10];
        let rows: Vec<usize> = (0..10).collect();

        let tree = RegressionTree::fit(&features, &targets, &rows, &TreeParams::default());
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.predict(&vector(100.0, 0.0)), 42.0);
    }

    #[test]
    fn respects_max_depth_and_leaf_size() {
        let features: Vec<FeatureVector> = (0..64).map(|i| vector(i as f64, 200.0)).collect();
        let targets: Vec<f64> = (0..64).map(|i| (i * i) as f64).collect();
        let rows: Vec<usize> = (0..64).collect();
        let params = TreeParams {
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 5,
        };

        let tree = RegressionTree::fit(&features, &targets, &rows, &params);
        assert!(tree.depth() <= 4);
        assert!(tree.node_count() <= 15);
    }

    #[test]
    fn repeated_rows_weight_the_leaf_mean() {
        let features = vec![vector(2.0, 200.0), vector(2.0, 200.0)];
        let targets = vec![10.0, 40.0];
        let tree = RegressionTree::fit(&features, &targets, &[0, 0, 0, 1], &TreeParams::default());
        assert!((tree.predict(&vector(2.0, 200.0)) - 17.5).abs() < 1e-9);
    }

    #[test]
    fn adjacent_float_values_still_split_cleanly() {
        let low = f64::from_bits(3.0f64.to_bits() + 1);
        let high = f64::from_bits(low.to_bits() + 1);
        assert_eq!((low + high) / 2.0, high);

        let features = vec![vector(low, 210.0), vector(low, 210.0), vector(high, 210.0), vector(high, 210.0)];
        let targets = vec![0.0, 0.0, 100.0, 100.0];
        let rows: Vec<usize> = (0..4).collect();
        let params = TreeParams {
            max_depth: 4,
            min_samples_split: 2,
            min_samples_leaf: 1,
        };

        let tree = RegressionTree::fit(&features, &targets, &rows, &params);
        assert!(tree.validate().is_ok());
        assert_eq!(tree.predict(&vector(low, 210.0)), 0.0);
        assert_eq!(tree.predict(&vector(high, 210.0)), 100.0);
    }

    #[test]
    fn validate_rejects_backward_and_dangling_children() {
        let backward = RegressionTree::from_nodes(vec![
            Node::Leaf { value: 1.0 },
            Node::Split {
                feature: 0,
                threshold: 1.0,
                left: 0,
                right: 0,
            },
        ]);
        assert!(backward.validate().is_err());

        let dangling = RegressionTree::from_nodes(vec![Node::Split {
            feature: 2,
            threshold: 1.0,
            left: 1,
            right: 9,
        }]);
        assert!(dangling.validate().is_err());

        let unknown_feature = RegressionTree::from_nodes(vec![
            Node::Split {
                feature: FEATURE_COUNT,
                threshold: 1.0,
                left: 1,
                right: 2,
            },
            Node::Leaf { value: 1.0 },
            Node::Leaf { value: 2.0 },
        ]);
        assert!(unknown_feature.validate().is_err());

        assert!(RegressionTree::from_nodes(Vec::new()).validate().is_err());
    }
}
