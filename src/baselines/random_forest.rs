use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{argmax, Classifier};

/// Node of a decision tree stored in a flat arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        class: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Gini decision tree; samples with `x[feature] <= threshold` go left
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn predict(&self, sample: &[f64]) -> usize {
        let mut node = 0;
        loop {
            match &self.nodes[node] {
                TreeNode::Leaf { class } => return *class,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = sample.get(*feature).copied().unwrap_or(0.0);
                    node = if value <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 1usize)];
        while let Some((node, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let TreeNode::Split { left, right, .. } = &self.nodes[node] {
                stack.push((*left, depth + 1));
                stack.push((*right, depth + 1));
            }
        }
        deepest
    }
}

/// Bagged ensemble of gini trees with `sqrt(n_features)` candidates per split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_trees: usize,
    pub min_samples_split: usize,
    pub seed: u64,
    pub n_classes: usize,
    pub trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn new(seed: u64) -> Self {
        Self {
            n_trees: 100,
            min_samples_split: 2,
            seed,
            n_classes: 0,
            trees: vec![],
        }
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, samples: &[Vec<f64>], targets: &[usize], n_classes: usize) -> Result<()> {
        let n = samples.len();
        let n_features = samples.first().map(Vec::len).unwrap_or(0);
        let max_features = ((n_features as f64).sqrt().ceil() as usize).clamp(1, n_features.max(1));
        let mut rng = StdRng::seed_from_u64(self.seed);

        let grower = TreeGrower {
            samples,
            targets,
            n_classes,
            max_features,
            min_samples_split: self.min_samples_split,
        };
        self.n_classes = n_classes;
        self.trees = (0..self.n_trees)
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
                grower.grow(bootstrap, &mut rng)
            })
            .collect();
        Ok(())
    }

    fn predict(&self, sample: &[f64]) -> usize {
        let mut votes = vec![0.0; self.n_classes.max(1)];
        for tree in &self.trees {
            if let Some(vote) = votes.get_mut(tree.predict(sample)) {
                *vote += 1.0;
            }
        }
        argmax(&votes)
    }
}

struct TreeGrower<'a> {
    samples: &'a [Vec<f64>],
    targets: &'a [usize],
    n_classes: usize,
    max_features: usize,
    min_samples_split: usize,
}

impl TreeGrower<'_> {
    fn grow(&self, rows: Vec<usize>, rng: &mut StdRng) -> DecisionTree {
        let mut nodes = vec![TreeNode::Leaf { class: 0 }];
        let mut stack = vec![(0usize, rows)];

        while let Some((node, rows)) = stack.pop() {
            let counts = self.class_counts(&rows);
            let majority = argmax(&counts);
            let pure = counts.iter().filter(|c| **c > 0.0).count() <= 1;

            let split = if pure || rows.len() < self.min_samples_split {
                None
            } else {
                self.best_split(&rows, &counts, rng)
            };

            let Some((feature, threshold)) = split else {
                nodes[node] = TreeNode::Leaf { class: majority };
                continue;
            };

            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .into_iter()
                .partition(|&i| self.samples[i][feature] <= threshold);
            let left = nodes.len();
            let right = left + 1;
            nodes.push(TreeNode::Leaf { class: majority });
            nodes.push(TreeNode::Leaf { class: majority });
            nodes[node] = TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            };
            stack.push((left, left_rows));
            stack.push((right, right_rows));
        }

        DecisionTree { nodes }
    }

    fn class_counts(&self, rows: &[usize]) -> Vec<f64> {
        let mut counts = vec![0.0; self.n_classes];
        for &i in rows {
            counts[self.targets[i]] += 1.0;
        }
        counts
    }

    /// Lowest weighted gini split among randomly drawn candidate features
    fn best_split(&self, rows: &[usize], counts: &[f64], rng: &mut StdRng) -> Option<(usize, f64)> {
        let n_features = self.samples[rows[0]].len();
        let total = rows.len() as f64;
        let parent = gini(counts, total);
        let mut best: Option<(f64, usize, f64)> = None;

        let candidates = rand::seq::index::sample(rng, n_features, self.max_features.min(n_features));
        for feature in candidates.iter() {
            let mut column: Vec<(f64, usize)> = rows
                .iter()
                .map(|&i| (self.samples[i][feature], self.targets[i]))
                .collect();
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left = vec![0.0; self.n_classes];
            for k in 0..column.len() - 1 {
                left[column[k].1] += 1.0;
                if column[k].0 == column[k + 1].0 {
                    continue;
                }
                let left_total = (k + 1) as f64;
                let right_total = total - left_total;
                let right: Vec<f64> = counts.iter().zip(&left).map(|(c, l)| c - l).collect();
                let impurity = (left_total * gini(&left, left_total)
                    + right_total * gini(&right, right_total))
                    / total;

                if impurity < parent && best.is_none_or(|(score, _, _)| impurity < score) {
                    let threshold = (column[k].0 + column[k + 1].0) / 2.0;
                    best = Some((impurity, feature, threshold));
                }
            }
        }

        best.map(|(_, feature, threshold)| (feature, threshold))
    }
}

fn gini(counts: &[f64], total: f64) -> f64 {
    if total == 0.0 {
        return 0.0;
    }
    1.0 - counts.iter().map(|c| (c / total).powi(2)).sum::<f64>()
}
