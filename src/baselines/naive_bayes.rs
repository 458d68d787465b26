use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{argmax, Classifier};

/// Gaussian naive Bayes with variance smoothing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianNb {
    /// Fraction of the largest feature variance added to every variance
    pub var_smoothing: f64,
    pub priors: Vec<f64>,
    pub means: Vec<Vec<f64>>,
    pub variances: Vec<Vec<f64>>,
}

impl Default for GaussianNb {
    fn default() -> Self {
        Self {
            var_smoothing: 1e-9,
            priors: vec![],
            means: vec![],
            variances: vec![],
        }
    }
}

impl Classifier for GaussianNb {
    fn fit(&mut self, samples: &[Vec<f64>], targets: &[usize], n_classes: usize) -> Result<()> {
        let n_features = samples.first().map(Vec::len).unwrap_or(0);
        let n = samples.len() as f64;

        let mut counts = vec![0usize; n_classes];
        let mut means = vec![vec![0.0; n_features]; n_classes];
        for (sample, &target) in samples.iter().zip(targets) {
            counts[target] += 1;
            for (mean, value) in means[target].iter_mut().zip(sample) {
                *mean += value;
            }
        }
        for (class_means, &count) in means.iter_mut().zip(&counts) {
            if count > 0 {
                class_means.iter_mut().for_each(|m| *m /= count as f64);
            }
        }

        let mut variances = vec![vec![0.0; n_features]; n_classes];
        for (sample, &target) in samples.iter().zip(targets) {
            for ((var, mean), value) in variances[target]
                .iter_mut()
                .zip(&means[target])
                .zip(sample)
            {
                *var += (value - mean).powi(2);
            }
        }

        let epsilon = (self.var_smoothing * max_feature_variance(samples)).max(1e-12);
        for (class_vars, &count) in variances.iter_mut().zip(&counts) {
            for var in class_vars.iter_mut() {
                let mean_square = if count > 0 { *var / count as f64 } else { 0.0 };
                *var = mean_square + epsilon;
            }
        }

        self.priors = counts.iter().map(|&c| c as f64 / n).collect();
        self.means = means;
        self.variances = variances;
        Ok(())
    }

    fn predict(&self, sample: &[f64]) -> usize {
        let scores: Vec<f64> = self
            .priors
            .iter()
            .enumerate()
            .map(|(class, &prior)| {
                if prior == 0.0 {
                    return f64::NEG_INFINITY;
                }
                let log_likelihood: f64 = sample
                    .iter()
                    .zip(&self.means[class])
                    .zip(&self.variances[class])
                    .map(|((x, mean), var)| {
                        -0.5 * (2.0 * std::f64::consts::PI * var).ln()
                            - (x - mean).powi(2) / (2.0 * var)
                    })
                    .sum();
                prior.ln() + log_likelihood
            })
            .collect();
        argmax(&scores)
    }
}

fn max_feature_variance(samples: &[Vec<f64>]) -> f64 {
    let n_features = samples.first().map(Vec::len).unwrap_or(0);
    let n = samples.len().max(1) as f64;
    (0..n_features)
        .map(|j| {
            let mean = samples.iter().map(|s| s[j]).sum::<f64>() / n;
            samples.iter().map(|s| (s[j] - mean).powi(2)).sum::<f64>() / n
        })
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baselines::fixtures::toy_problem;

    #[test]
    fn test_priors_and_means() {
        let (samples, targets) = toy_problem();
        let mut model = GaussianNb::default();
        model.fit(&samples, &targets, 4).unwrap();

        assert!((model.priors[0] - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(model.priors[3], 0.0);
        assert_eq!(model.means[2], vec![0.0, 0.0, 1.0, 0.0]);
        assert!(model.variances[0].iter().all(|v| *v > 0.0));
        assert_eq!(model.predict(&[0.0, 1.0, 0.0, 1.0]), 1);
    }
}
