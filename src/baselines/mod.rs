pub mod kernel_svm;
pub mod linear_svm;
pub mod naive_bayes;
pub mod random_forest;

pub use kernel_svm::*;
pub use linear_svm::*;
pub use naive_bayes::*;
pub use random_forest::*;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// A per-utterance classifier over dense binary feature vectors
pub trait Classifier {
    /// Fit on `samples` with class ids `targets` in `0..n_classes`
    fn fit(&mut self, samples: &[Vec<f64>], targets: &[usize], n_classes: usize) -> Result<()>;

    /// Predicted class id of one sample
    fn predict(&self, sample: &[f64]) -> usize;
}

/// Baseline algorithm selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineKind {
    /// RBF-kernel support vector machine
    Svc,
    /// Linear support vector machine
    LinearSvc,
    /// Gaussian naive Bayes
    NaiveBayes,
    /// Random forest of 100 trees
    RandomForest,
}

impl fmt::Display for BaselineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BaselineKind::Svc => "SVC",
            BaselineKind::LinearSvc => "LSVC",
            BaselineKind::NaiveBayes => "NB",
            BaselineKind::RandomForest => "RF",
        };
        f.write_str(s)
    }
}

impl FromStr for BaselineKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SVC" => Ok(BaselineKind::Svc),
            "LSVC" => Ok(BaselineKind::LinearSvc),
            "NB" => Ok(BaselineKind::NaiveBayes),
            "RF" => Ok(BaselineKind::RandomForest),
            other => Err(PipelineError::unknown_selector("baseline", other)),
        }
    }
}

/// A trained baseline, tagged by algorithm
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BaselineModel {
    Svc(KernelSvm),
    LinearSvc(LinearSvm),
    NaiveBayes(GaussianNb),
    RandomForest(RandomForest),
}

impl BaselineModel {
    /// Untrained model of the given kind
    pub fn new(kind: BaselineKind, seed: u64) -> Self {
        match kind {
            BaselineKind::Svc => BaselineModel::Svc(KernelSvm::new(seed)),
            BaselineKind::LinearSvc => BaselineModel::LinearSvc(LinearSvm::new(seed)),
            BaselineKind::NaiveBayes => BaselineModel::NaiveBayes(GaussianNb::default()),
            BaselineKind::RandomForest => BaselineModel::RandomForest(RandomForest::new(seed)),
        }
    }

    pub fn kind(&self) -> BaselineKind {
        match self {
            BaselineModel::Svc(_) => BaselineKind::Svc,
            BaselineModel::LinearSvc(_) => BaselineKind::LinearSvc,
            BaselineModel::NaiveBayes(_) => BaselineKind::NaiveBayes,
            BaselineModel::RandomForest(_) => BaselineKind::RandomForest,
        }
    }

    fn classifier(&self) -> &dyn Classifier {
        match self {
            BaselineModel::Svc(m) => m,
            BaselineModel::LinearSvc(m) => m,
            BaselineModel::NaiveBayes(m) => m,
            BaselineModel::RandomForest(m) => m,
        }
    }

    fn classifier_mut(&mut self) -> &mut dyn Classifier {
        match self {
            BaselineModel::Svc(m) => m,
            BaselineModel::LinearSvc(m) => m,
            BaselineModel::NaiveBayes(m) => m,
            BaselineModel::RandomForest(m) => m,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;
        serde_json::to_writer(file, self).context("Failed to write baseline model")?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {:?}", path))?;
        serde_json::from_str(&content).context("Failed to parse baseline model")
    }
}

impl Classifier for BaselineModel {
    fn fit(&mut self, samples: &[Vec<f64>], targets: &[usize], n_classes: usize) -> Result<()> {
        check_training_set(samples, targets, n_classes)?;
        self.classifier_mut().fit(samples, targets, n_classes)
    }

    fn predict(&self, sample: &[f64]) -> usize {
        self.classifier().predict(sample)
    }
}

/// Reject empty or inconsistent training sets
pub(crate) fn check_training_set(
    samples: &[Vec<f64>],
    targets: &[usize],
    n_classes: usize,
) -> Result<()> {
    if samples.is_empty() {
        bail!("Cannot fit a baseline on an empty training set");
    }
    if samples.len() != targets.len() {
        bail!(
            "Sample count {} does not match target count {}",
            samples.len(),
            targets.len()
        );
    }
    if let Some(bad) = targets.iter().find(|&&t| t >= n_classes) {
        bail!("Target {} is outside 0..{}", bad, n_classes);
    }
    Ok(())
}

/// Index of the largest score; ties go to the lowest index
pub(crate) fn argmax(scores: &[f64]) -> usize {
    scores
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_score), (i, &score)| {
            if score > best_score { (i, score) } else { (best, best_score) }
        })
        .0
}

/// Nonzero entries of each sample
pub(crate) fn sparse_rows(samples: &[Vec<f64>]) -> Vec<Vec<(usize, f64)>> {
    samples
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .filter(|(_, v)| **v != 0.0)
                .map(|(i, v)| (i, *v))
                .collect()
        })
        .collect()
}
