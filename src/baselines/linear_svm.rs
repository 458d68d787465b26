use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::{argmax, sparse_rows, Classifier};

/// One-vs-rest linear SVM trained with Pegasos stochastic sub-gradient steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSvm {
    /// Inverse regularization strength
    pub c: f64,
    pub epochs: usize,
    pub seed: u64,
    /// Per-class weights; the last entry is the bias
    pub weights: Vec<Vec<f64>>,
}

impl LinearSvm {
    pub fn new(seed: u64) -> Self {
        Self {
            c: 1.0,
            epochs: 20,
            seed,
            weights: vec![],
        }
    }

    fn decision(&self, class: usize, sample: &[f64]) -> f64 {
        let weights = &self.weights[class];
        let n_features = weights.len() - 1;
        let dot: f64 = weights[..n_features]
            .iter()
            .zip(sample)
            .map(|(w, x)| w * x)
            .sum();
        dot + weights[n_features]
    }
}

impl Classifier for LinearSvm {
    fn fit(&mut self, samples: &[Vec<f64>], targets: &[usize], n_classes: usize) -> Result<()> {
        let n_features = samples.first().map(Vec::len).unwrap_or(0);
        let rows = sparse_rows(samples);
        let lambda = 1.0 / (self.c * samples.len() as f64);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut order: Vec<usize> = (0..samples.len()).collect();

        self.weights = (0..n_classes)
            .map(|class| {
                // w = scale * v, bias stored at index n_features
                let mut v = vec![0.0; n_features + 1];
                let mut scale = 1.0;
                let mut step = 0usize;

                for _ in 0..self.epochs {
                    order.shuffle(&mut rng);
                    for &i in &order {
                        step += 1;
                        let eta = 1.0 / (lambda * step as f64);
                        let y = if targets[i] == class { 1.0 } else { -1.0 };
                        let dot: f64 = rows[i].iter().map(|&(j, x)| v[j] * x).sum::<f64>() + v[n_features];
                        let margin = y * scale * dot;

                        let shrink = 1.0 - eta * lambda;
                        if shrink <= 0.0 {
                            v.iter_mut().for_each(|w| *w = 0.0);
                            scale = 1.0;
                        } else {
                            scale *= shrink;
                        }

                        if margin < 1.0 {
                            let update = eta * y / scale;
                            for &(j, x) in &rows[i] {
                                v[j] += update * x;
                            }
                            v[n_features] += update;
                        }

                        if scale < 1e-9 {
                            v.iter_mut().for_each(|w| *w *= scale);
                            scale = 1.0;
                        }
                    }
                }

                v.into_iter().map(|w| w * scale).collect()
            })
            .collect();
        Ok(())
    }

    fn predict(&self, sample: &[f64]) -> usize {
        let scores: Vec<f64> = (0..self.weights.len())
            .map(|class| self.decision(class, sample))
            .collect();
        argmax(&scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baselines::fixtures::toy_problem;

    #[test]
    fn test_separates_toy_problem() {
        let (samples, targets) = toy_problem();
        let mut model = LinearSvm::new(3);
        model.fit(&samples, &targets, 3).unwrap();

        assert_eq!(model.weights.len(), 3);
        assert_eq!(model.weights[0].len(), 5);
        assert!(model.decision(0, &samples[0]) > 0.0);
        assert!(model.decision(0, &samples[1]) < 0.0);
        assert_eq!(model.predict(&[0.0, 0.0, 1.0, 0.0]), 2);
    }
}
