use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{argmax, sparse_rows, Classifier};

/// One-vs-rest RBF-kernel SVM trained with kernelized Pegasos
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelSvm {
    /// Inverse regularization strength
    pub c: f64,
    /// Passes over the training set, in expected visits per sample
    pub epochs: usize,
    /// Training samples beyond this many are subsampled away
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    pub seed: u64,
    /// Kernel width, `1 / (n_features * var(X))` when fitted
    pub gamma: f64,
    /// Training samples with a nonzero coefficient in some class, as sparse rows
    pub support_vectors: Vec<Vec<(usize, f64)>>,
    /// `coefficients[class][sv]`
    pub coefficients: Vec<Vec<f64>>,
}

impl KernelSvm {
    pub fn new(seed: u64) -> Self {
        Self {
            c: 1.0,
            epochs: 5,
            max_samples: default_max_samples(),
            seed,
            gamma: 1.0,
            support_vectors: vec![],
            coefficients: vec![],
        }
    }

    fn kernel(&self, a: &[(usize, f64)], b: &[(usize, f64)]) -> f64 {
        rbf(self.gamma, a, b)
    }
}

fn default_max_samples() -> usize {
    4000
}

fn rbf(gamma: f64, a: &[(usize, f64)], b: &[(usize, f64)]) -> f64 {
    (-gamma * squared_distance(a, b)).exp()
}

/// Squared euclidean distance of two sparse rows sorted by index
fn squared_distance(a: &[(usize, f64)], b: &[(usize, f64)]) -> f64 {
    let (mut i, mut j) = (0, 0);
    let mut total = 0.0;
    while i < a.len() || j < b.len() {
        match (a.get(i), b.get(j)) {
            (Some(&(ia, va)), Some(&(ib, vb))) if ia == ib => {
                total += (va - vb).powi(2);
                i += 1;
                j += 1;
            }
            (Some(&(ia, va)), Some(&(ib, _))) if ia < ib => {
                total += va * va;
                i += 1;
            }
            (Some(_), Some(&(_, vb))) => {
                total += vb * vb;
                j += 1;
            }
            (Some(&(_, va)), None) => {
                total += va * va;
                i += 1;
            }
            (None, Some(&(_, vb))) => {
                total += vb * vb;
                j += 1;
            }
            (None, None) => break,
        }
    }
    total
}

fn scale_gamma(samples: &[Vec<f64>]) -> f64 {
    let n_features = samples.first().map(Vec::len).unwrap_or(0);
    let count = (samples.len() * n_features) as f64;
    if count == 0.0 {
        return 1.0;
    }
    let mean = samples.iter().flatten().sum::<f64>() / count;
    let variance = samples.iter().flatten().map(|x| (x - mean).powi(2)).sum::<f64>() / count;
    if variance > 0.0 {
        1.0 / (n_features as f64 * variance)
    } else {
        1.0
    }
}

impl Classifier for KernelSvm {
    fn fit(&mut self, samples: &[Vec<f64>], targets: &[usize], n_classes: usize) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        self.gamma = scale_gamma(samples);
        let gamma = self.gamma;

        let mut chosen: Vec<usize> = (0..samples.len()).collect();
        if samples.len() > self.max_samples {
            chosen = index::sample(&mut rng, samples.len(), self.max_samples).into_vec();
            chosen.sort_unstable();
            info!(
                "Kernel SVM trains on {} of {} samples",
                chosen.len(),
                samples.len()
            );
        }
        let all_rows = sparse_rows(samples);
        let rows: Vec<&Vec<(usize, f64)>> = chosen.iter().map(|&i| &all_rows[i]).collect();
        let targets: Vec<usize> = chosen.iter().map(|&i| targets[i]).collect();

        let n = rows.len();
        let lambda = 1.0 / (self.c * n as f64);
        let steps = (self.epochs * n).max(1);

        // kernel rows of samples that violated a margin, shared by all classes
        let mut kernel_rows: Vec<Option<Vec<f64>>> = vec![None; n];

        // alphas[class][i] counts margin violations of sample i
        let mut alphas = vec![vec![0u32; n]; n_classes];
        for (class, alpha) in alphas.iter_mut().enumerate() {
            let label = |i: usize| if targets[i] == class { 1.0 } else { -1.0 };
            // margins[i] = sum_j alpha[j] * label(j) * K(j, i)
            let mut margins = vec![0.0; n];
            for step in 1..=steps {
                let i = rng.random_range(0..n);
                if label(i) * margins[i] / (lambda * step as f64) < 1.0 {
                    alpha[i] += 1;
                    let kernels = kernel_rows[i].get_or_insert_with(|| {
                        rows.iter().map(|row| rbf(gamma, rows[i], row)).collect()
                    });
                    let y = label(i);
                    for (margin, k) in margins.iter_mut().zip(kernels.iter()) {
                        *margin += y * k;
                    }
                }
            }
        }

        let support: Vec<usize> = (0..n)
            .filter(|&i| alphas.iter().any(|alpha| alpha[i] > 0))
            .collect();
        let normalizer = lambda * steps as f64;

        self.coefficients = alphas
            .iter()
            .enumerate()
            .map(|(class, alpha)| {
                support
                    .iter()
                    .map(|&i| {
                        let y = if targets[i] == class { 1.0 } else { -1.0 };
                        alpha[i] as f64 * y / normalizer
                    })
                    .collect()
            })
            .collect();
        self.support_vectors = support.into_iter().map(|i| rows[i].clone()).collect();
        Ok(())
    }

    fn predict(&self, sample: &[f64]) -> usize {
        let row: Vec<(usize, f64)> = sample
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(i, v)| (i, *v))
            .collect();
        let kernels: Vec<f64> = self
            .support_vectors
            .iter()
            .map(|sv| self.kernel(sv, &row))
            .collect();
        let scores: Vec<f64> = self
            .coefficients
            .iter()
            .map(|coefficients| coefficients.iter().zip(&kernels).map(|(c, k)| c * k).sum())
            .collect();
        argmax(&scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baselines::fixtures::toy_problem;

    #[test]
    fn test_squared_distance() {
        let a = [(0, 1.0), (3, 1.0)];
        let b = [(1, 1.0), (3, 1.0)];
        assert_eq!(squared_distance(&a, &b), 2.0);
        assert_eq!(squared_distance(&a, &a), 0.0);
        assert_eq!(squared_distance(&a, &[]), 2.0);
    }

    #[test]
    fn test_fits_toy_problem() {
        let (samples, targets) = toy_problem();
        let mut model = KernelSvm::new(5);
        model.fit(&samples, &targets, 3).unwrap();

        assert!(model.gamma > 0.0);
        assert!(!model.support_vectors.is_empty());
        assert_eq!(model.coefficients.len(), 3);
        assert_eq!(model.predict(&[1.0, 0.0, 0.0, 1.0]), 0);
        assert_eq!(model.predict(&[0.0, 1.0, 0.0, 1.0]), 1);
    }

    #[test]
    fn test_large_training_set_is_subsampled() {
        let (samples, targets) = toy_problem();
        let samples: Vec<Vec<f64>> = samples.iter().cycle().take(300).cloned().collect();
        let targets: Vec<usize> = targets.iter().cycle().take(300).copied().collect();

        let mut model = KernelSvm::new(5);
        model.max_samples = 60;
        model.fit(&samples, &targets, 3).unwrap();

        assert!(!model.support_vectors.is_empty());
        assert!(model.support_vectors.len() <= 60);
        assert!(model.coefficients.iter().all(|c| c.len() == model.support_vectors.len()));
        assert_eq!(model.predict(&[1.0, 0.0, 0.0, 1.0]), 0);
        assert_eq!(model.predict(&[0.0, 1.0, 0.0, 1.0]), 1);
        assert_eq!(model.predict(&[0.0, 0.0, 1.0, 0.0]), 2);
    }
}
