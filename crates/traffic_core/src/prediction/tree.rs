//! Regression trees and the two tree ensembles built on them.
//!
//! Trees are CART-style: each split minimises the summed squared error of the
//! two children, thresholds sit halfway between adjacent distinct values, and
//! leaves predict the mean target. Nodes are stored flat and addressed by index.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::features::{FeatureVector, FEATURE_COUNT};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl TreeParams {
    pub fn with_depth(max_depth: usize) -> Self {
        Self {
            max_depth,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
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

#[derive(Debug, Clone, Copy)]
struct BestSplit {
    feature: usize,
    threshold: f64,
    sse: f64,
}

impl RegressionTree {
    /// Fit on the rows of `x`/`y` selected by `indices` (repeats allowed).
    pub fn fit(x: &[FeatureVector], y: &[f64], indices: &[usize], params: &TreeParams) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        let mut working = indices.to_vec();
        if working.is_empty() {
            tree.nodes.push(Node::Leaf { value: 0.0 });
        } else {
            tree.grow(x, y, &mut working, 0, params);
        }
        tree
    }

    pub fn predict(&self, x: &FeatureVector) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes.get(index) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    index = if x[*feature] <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match nodes.get(index) {
                Some(Node::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }

    fn grow(
        &mut self,
        x: &[FeatureVector],
        y: &[f64],
        indices: &mut [usize],
        depth: usize,
        params: &TreeParams,
    ) -> usize {
        let node_index = self.nodes.len();
        let mean = indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64;
        self.nodes.push(Node::Leaf { value: mean });

        if depth >= params.max_depth || indices.len() < params.min_samples_split {
            return node_index;
        }
        let Some(split) = best_split(x, y, indices, params.min_samples_leaf) else {
            return node_index;
        };

        let mut boundary = 0;
        for k in 0..indices.len() {
            if x[indices[k]][split.feature] <= split.threshold {
                indices.swap(k, boundary);
                boundary += 1;
            }
        }
        if boundary == 0 || boundary == indices.len() {
            return node_index;
        }

        let (left_rows, right_rows) = indices.split_at_mut(boundary);
        let left = self.grow(x, y, left_rows, depth + 1, params);
        let right = self.grow(x, y, right_rows, depth + 1, params);
        self.nodes[node_index] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node_index
    }
}

/// Lowest-SSE split over all features, or `None` if no split improves on the parent.
fn best_split(
    x: &[FeatureVector],
    y: &[f64],
    indices: &[usize],
    min_leaf: usize,
) -> Option<BestSplit> {
    let n = indices.len();
    let (low, high) = indices
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| (lo.min(y[i]), hi.max(y[i])));
    if high - low <= 1e-12 {
        return None;
    }
    let total: f64 = indices.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = total_sq - total * total / n as f64;

    let mut best: Option<BestSplit> = None;
    let mut order = indices.to_vec();

    for feature in 0..FEATURE_COUNT {
        order.sort_unstable_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 0..n - 1 {
            let yi = y[order[k]];
            left_sum += yi;
            left_sq += yi * yi;

            let here = x[order[k]][feature];
            let next = x[order[k + 1]][feature];
            if here == next {
                continue;
            }
            let left_n = k + 1;
            let right_n = n - left_n;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }

            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_n as f64)
                + (right_sq - right_sum * right_sum / right_n as f64);

            if best.map_or(true, |b| sse < b.sse) {
                best = Some(BestSplit {
                    feature,
                    threshold: here + (next - here) / 2.0,
                    sse,
                });
            }
        }
    }

    best.filter(|b| b.sse < parent_sse)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub seed: u64,
}

/// Bagged regression trees; each tree sees a seeded bootstrap sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    /// Trees are fitted in parallel. Returns `None` if `cancel` is raised
    /// before every tree is done.
    pub fn fit(
        x: &[FeatureVector],
        y: &[f64],
        params: &ForestParams,
        cancel: &AtomicBool,
    ) -> Option<Self> {
        let n = x.len().min(y.len());
        let tree_params = TreeParams::with_depth(params.max_depth);

        let trees = (0..params.n_trees)
            .into_par_iter()
            .map(|i| {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(i as u64));
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                Some(RegressionTree::fit(x, y, &sample, &tree_params))
            })
            .collect::<Option<Vec<_>>>()?;

        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        Some(Self { trees })
    }

    pub fn predict(&self, x: &FeatureVector) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict(x)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoostingParams {
    pub n_stages: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
}

/// Squared-error gradient boosting, initialised at the target mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    init: f64,
    learning_rate: f64,
    stages: Vec<RegressionTree>,
}

impl GradientBoosting {
    /// Returns `None` if `cancel` is raised between stages.
    pub fn fit(
        x: &[FeatureVector],
        y: &[f64],
        params: &BoostingParams,
        cancel: &AtomicBool,
    ) -> Option<Self> {
        let n = x.len().min(y.len());
        let init = if n == 0 {
            0.0
        } else {
            y[..n].iter().sum::<f64>() / n as f64
        };
        let indices: Vec<usize> = (0..n).collect();
        let tree_params = TreeParams::with_depth(params.max_depth);

        let mut current = vec![init; n];
        let mut stages = Vec::with_capacity(params.n_stages);
        for _ in 0..params.n_stages {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            let residuals: Vec<f64> = y[..n].iter().zip(&current).map(|(t, p)| t - p).collect();
            let tree = RegressionTree::fit(x, &residuals, &indices, &tree_params);
            for (p, row) in current.iter_mut().zip(x) {
                *p += params.learning_rate * tree.predict(row);
            }
            stages.push(tree);
        }

        Some(Self {
            init,
            learning_rate: params.learning_rate,
            stages,
        })
    }

    pub fn predict(&self, x: &FeatureVector) -> f64 {
        self.init
            + self.learning_rate * self.stages.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<FeatureVector>, Vec<f64>) {
        let x: Vec<FeatureVector> = (0..40)
            .map(|i| {
                let mut v = [0.0; FEATURE_COUNT];
                v[8] = i as f64 / 40.0;
                v[9] = (i % 2) as f64;
                v
            })
            .collect();
        let y = x
            .iter()
            .map(|v| if v[8] < 0.5 { 0.2 } else { 0.8 })
            .collect();
        (x, y)
    }

    #[test]
    fn tree_learns_a_step() {
        let (x, y) = step_data();
        let indices: Vec<usize> = (0..x.len()).collect();
        let tree = RegressionTree::fit(&x, &y, &indices, &TreeParams::with_depth(4));
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.node_count(), 3);
        for (v, target) in x.iter().zip(&y) {
            assert!((tree.predict(v) - target).abs() < 1e-12);
        }
    }

    #[test]
    fn depth_zero_is_the_mean() {
        let (x, y) = step_data();
        let indices: Vec<usize> = (0..x.len()).collect();
        let tree = RegressionTree::fit(&x, &y, &indices, &TreeParams::with_depth(0));
        assert!((tree.predict(&x[0]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn forest_is_reproducible() {
        let (x, y) = step_data();
        let params = ForestParams {
            n_trees: 8,
            max_depth: 4,
            seed: 42,
        };
        let cancel = AtomicBool::new(false);
        let a = RandomForest::fit(&x, &y, &params, &cancel).expect("not cancelled");
        let b = RandomForest::fit(&x, &y, &params, &cancel).expect("not cancelled");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!((a.predict(&x[0]) - 0.2).abs() < 0.1);
        assert!((a.predict(&x[39]) - 0.8).abs() < 0.1);
    }

    #[test]
    fn boosting_converges_towards_targets() {
        let (x, y) = step_data();
        let params = BoostingParams {
            n_stages: 60,
            learning_rate: 0.1,
            max_depth: 3,
        };
        let model = GradientBoosting::fit(&x, &y, &params, &AtomicBool::new(false)).expect("fit");
        assert_eq!(model.stage_count(), 60);
        assert!((model.predict(&x[0]) - 0.2).abs() < 0.01);
        assert!((model.predict(&x[39]) - 0.8).abs() < 0.01);
    }

    #[test]
    fn cancelled_fits_return_none() {
        let (x, y) = step_data();
        let cancel = AtomicBool::new(true);
        let forest = ForestParams {
            n_trees: 4,
            max_depth: 3,
            seed: 1,
        };
        let boosting = BoostingParams {
            n_stages: 4,
            learning_rate: 0.1,
            max_depth: 3,
        };
        assert!(RandomForest::fit(&x, &y, &forest, &cancel).is_none());
        assert!(GradientBoosting::fit(&x, &y, &boosting, &cancel).is_none());
    }
}
