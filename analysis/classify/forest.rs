//! Random forest of Gini-split decision trees.
//!
//! Trees live in a flat arena of nodes indexed by `usize`. Each tree trains
//! on a bootstrap resample and considers a random feature subset at every
//! split. Predicted probability is the mean leaf positive fraction across
//! the ensemble.

use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;

use super::{check_training_set, Classifier, TrainError};

#[derive(Debug, Clone)]
pub struct RandomForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Features considered per split; `None` selects `sqrt(n_features)`.
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for RandomForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 2,
            max_features: None,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
enum TreeNode {
    Leaf {
        class: usize,
        p_pos: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<TreeNode>,
}

impl Tree {
    fn leaf_p_pos(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { p_pos, .. } => return *p_pos,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    fn leaf_class(&self, row: &[f64]) -> usize {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { class, .. } => return *class,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RandomForest {
    config: RandomForestConfig,
    trees: Vec<Tree>,
}

impl RandomForest {
    pub fn new(config: RandomForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
        }
    }
}

fn gini(counts: [usize; 2]) -> f64 {
    let total = (counts[0] + counts[1]) as f64;
    if total == 0.0 {
        return 0.0;
    }
    let p0 = counts[0] as f64 / total;
    let p1 = counts[1] as f64 / total;
    1.0 - p0 * p0 - p1 * p1
}

struct TreeBuilder<'a, 'b> {
    x: ArrayView2<'a, f64>,
    y: &'b [usize],
    max_depth: usize,
    min_samples_split: usize,
    n_split_features: usize,
    feature_pool: Vec<usize>,
    nodes: Vec<TreeNode>,
}

impl TreeBuilder<'_, '_> {
    fn leaf(&mut self, rows: &[usize]) -> usize {
        let pos = rows.iter().filter(|&&r| self.y[r] == 1).count();
        let p_pos = pos as f64 / rows.len() as f64;
        self.nodes.push(TreeNode::Leaf {
            class: usize::from(2 * pos >= rows.len()),
            p_pos,
        });
        self.nodes.len() - 1
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let pos = rows.iter().filter(|&&r| self.y[r] == 1).count();
        let pure = pos == 0 || pos == rows.len();
        if pure || depth >= self.max_depth || rows.len() < self.min_samples_split {
            return self.leaf(&rows);
        }

        let (chosen, _) = self.feature_pool.partial_shuffle(rng, self.n_split_features);
        let candidates: Vec<usize> = chosen.to_vec();

        let parent = gini([rows.len() - pos, pos]);
        let mut best: Option<(usize, f64, f64)> = None;
        for &feature in &candidates {
            // Sort the rows on this feature and sweep the midpoints.
            let mut order: Vec<usize> = rows.clone();
            order.sort_by(|&a, &b| {
                self.x[[a, feature]]
                    .partial_cmp(&self.x[[b, feature]])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut left = [0usize; 2];
            let mut right = [rows.len() - pos, pos];
            for i in 0..order.len() - 1 {
                let label = self.y[order[i]];
                left[label] += 1;
                right[label] -= 1;

                let lo = self.x[[order[i], feature]];
                let hi = self.x[[order[i + 1], feature]];
                if lo == hi {
                    continue;
                }
                let n_left = (i + 1) as f64;
                let n_right = (order.len() - i - 1) as f64;
                let total = order.len() as f64;
                let weighted =
                    (n_left / total) * gini(left) + (n_right / total) * gini(right);
                let gain = parent - weighted;
                if best.map_or(gain > 1e-12, |(_, _, g)| gain > g) {
                    best = Some((feature, (lo + hi) / 2.0, gain));
                }
            }
        }

        let Some((feature, threshold, _)) = best else {
            return self.leaf(&rows);
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.x[[r, feature]] <= threshold);

        let idx = self.nodes.len();
        self.nodes.push(TreeNode::Split {
            feature,
            threshold,
            left: 0,
            right: 0,
        });
        let left = self.grow(left_rows, depth + 1, rng);
        let right = self.grow(right_rows, depth + 1, rng);
        if let TreeNode::Split {
            left: l, right: r, ..
        } = &mut self.nodes[idx]
        {
            *l = left;
            *r = right;
        }
        idx
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: ArrayView2<f64>, y: &[usize]) -> Result<(), TrainError> {
        check_training_set(x, y)?;
        let n = x.nrows();
        let d = x.ncols();
        let n_split_features = self
            .config
            .max_features
            .unwrap_or_else(|| (d as f64).sqrt().ceil() as usize)
            .clamp(1, d);

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.trees.clear();
        for _ in 0..self.config.n_trees {
            let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut builder = TreeBuilder {
                x,
                y,
                max_depth: self.config.max_depth,
                min_samples_split: self.config.min_samples_split,
                n_split_features,
                feature_pool: (0..d).collect(),
                nodes: Vec::new(),
            };
            builder.grow(rows, 0, &mut rng);
            self.trees.push(Tree {
                nodes: builder.nodes,
            });
        }
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Vec<usize> {
        assert!(!self.trees.is_empty(), "forest used before fit");
        x.rows()
            .into_iter()
            .map(|row| {
                let row: Vec<f64> = row.to_vec();
                let votes: usize = self
                    .trees
                    .iter()
                    .map(|t| t.leaf_class(&row))
                    .sum();
                usize::from(2 * votes >= self.trees.len())
            })
            .collect()
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Vec<f64> {
        assert!(!self.trees.is_empty(), "forest used before fit");
        x.rows()
            .into_iter()
            .map(|row| {
                let row: Vec<f64> = row.to_vec();
                let sum: f64 = self.trees.iter().map(|t| t.leaf_p_pos(&row)).sum();
                sum / self.trees.len() as f64
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::separable_clusters;
    use super::*;
    use ndarray::Array2;

    #[test]
    fn separates_two_clusters() {
        let (x, y) = separable_clusters(15);
        let mut forest = RandomForest::new(RandomForestConfig {
            n_trees: 20,
            ..Default::default()
        });
        forest.fit(x.view(), &y).unwrap();
        assert_eq!(forest.predict(x.view()), y);
    }

    #[test]
    fn probabilities_lie_in_unit_interval() {
        let (x, y) = separable_clusters(15);
        let mut forest = RandomForest::new(RandomForestConfig {
            n_trees: 20,
            ..Default::default()
        });
        forest.fit(x.view(), &y).unwrap();
        for p in forest.predict_proba(x.view()) {
            assert!((0.0..=1.0).contains(&p), "probability {p} out of range");
        }
    }

    #[test]
    fn deterministic_for_seed() {
        let (x, y) = separable_clusters(12);
        let mut a = RandomForest::new(RandomForestConfig {
            n_trees: 10,
            seed: 3,
            ..Default::default()
        });
        let mut b = RandomForest::new(RandomForestConfig {
            n_trees: 10,
            seed: 3,
            ..Default::default()
        });
        a.fit(x.view(), &y).unwrap();
        b.fit(x.view(), &y).unwrap();
        assert_eq!(a.predict_proba(x.view()), b.predict_proba(x.view()));
    }

    #[test]
    fn constant_features_yield_prior_leaf() {
        // No feature separates anything, so every tree is a single leaf
        // holding the bootstrap class fraction.
        let x = Array2::<f64>::zeros((8, 3));
        let y = vec![0, 0, 0, 0, 0, 0, 1, 1];
        let mut forest = RandomForest::new(RandomForestConfig {
            n_trees: 50,
            ..Default::default()
        });
        forest.fit(x.view(), &y).unwrap();
        let probs = forest.predict_proba(x.view());
        // All rows are identical, so all probabilities agree and sit near
        // the class prior.
        for p in &probs {
            assert!((p - probs[0]).abs() < 1e-12);
        }
        assert!(probs[0] > 0.05 && probs[0] < 0.6);
    }
}
