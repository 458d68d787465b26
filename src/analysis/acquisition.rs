use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use super::regression::{explained_variance_score, f_regression, FTest, LinearRegression};

/// Default cutoff in months; acquisition ages at or above it are unreliable
pub const DEFAULT_MAX_AGE: f64 = 60.0;

/// Per-label inputs to the acquisition analysis
#[derive(Debug, Clone, Default)]
pub struct AcquisitionInputs {
    /// Age of acquisition in months
    pub ages: BTreeMap<String, f64>,
    pub f1_scores: BTreeMap<String, f64>,
    /// Relative frequency in adult speech
    pub adult_frequencies: BTreeMap<String, f64>,
}

impl AcquisitionInputs {
    /// Labels with an age below `max_age`, an F1 score, and a nonzero adult frequency
    pub fn observed_labels(&self, max_age: f64) -> Vec<String> {
        self.ages
            .iter()
            .filter(|(label, _)| self.f1_scores.contains_key(*label))
            .filter(|(_, age)| **age < max_age)
            .filter_map(|(label, _)| match self.adult_frequencies.get(label) {
                Some(freq) if *freq > 0.0 => Some(label.clone()),
                _ => {
                    warn!("Skipping {}: never produced by adults", label);
                    None
                }
            })
            .collect()
    }
}

/// One fitted regression of age on some predictors
#[derive(Debug, Clone, Serialize)]
pub struct RegressionSummary {
    pub predictors: Vec<&'static str>,
    pub model: LinearRegression,
    pub explained_variance: f64,
}

impl RegressionSummary {
    fn fit(predictors: Vec<&'static str>, features: &[Vec<f64>], targets: &[f64]) -> Result<Self> {
        let model = LinearRegression::fit(features, targets)
            .with_context(|| format!("Failed to regress age on {}", predictors.join(" + ")))?;
        let predictions: Vec<f64> = features.iter().map(|row| model.predict(row)).collect();
        Ok(Self {
            explained_variance: explained_variance_score(targets, &predictions),
            predictors,
            model,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionAnalysis {
    pub labels: Vec<String>,
    pub frequency_only: RegressionSummary,
    pub f1_only: RegressionSummary,
    pub combined: RegressionSummary,
    /// F-tests of log frequency and F1 against age
    pub f_tests: Vec<FTest>,
}

impl AcquisitionAnalysis {
    pub fn format(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Speech acts: {}", self.labels.join(", "));
        for (name, summary) in [
            ("only freq", &self.frequency_only),
            ("only f1 scores", &self.f1_only),
            ("freq + f1 scores", &self.combined),
        ] {
            let _ = writeln!(out, "Explained variance ({}): {:.4}", name, summary.explained_variance);
            let _ = writeln!(out, "Regression parameters: {:?}", summary.model.coefficients);
        }
        let p_values: Vec<String> = self.f_tests.iter().map(|t| format!("{:.4}", t.p_value)).collect();
        let _ = writeln!(out, "p-values: [{}]", p_values.join(", "));
        out
    }
}

/// Regress acquisition age on log10 adult frequency, on F1, and on both
pub fn analyze_acquisition(inputs: &AcquisitionInputs, max_age: f64) -> Result<AcquisitionAnalysis> {
    let labels = inputs.observed_labels(max_age);
    if labels.len() < 3 {
        bail!(
            "Need at least 3 speech acts with age, F1 score and adult frequency, found {}",
            labels.len()
        );
    }
    info!("Correlating {} speech acts", labels.len());

    let ages: Vec<f64> = labels.iter().map(|l| inputs.ages[l]).collect();
    let log_freq: Vec<f64> = labels.iter().map(|l| inputs.adult_frequencies[l].log10()).collect();
    let f1: Vec<f64> = labels.iter().map(|l| inputs.f1_scores[l]).collect();

    let column = |values: &[f64]| values.iter().map(|v| vec![*v]).collect::<Vec<_>>();
    let both: Vec<Vec<f64>> = log_freq.iter().zip(&f1).map(|(f, s)| vec![*f, *s]).collect();

    Ok(AcquisitionAnalysis {
        frequency_only: RegressionSummary::fit(vec!["log_frequency"], &column(&log_freq), &ages)?,
        f1_only: RegressionSummary::fit(vec!["f1_score"], &column(&f1), &ages)?,
        combined: RegressionSummary::fit(vec!["log_frequency", "f1_score"], &both, &ages)?,
        f_tests: f_regression(&both, &ages),
        labels,
    })
}

/// Read a label -> age of acquisition JSON object
pub fn load_ages(path: &Path) -> Result<BTreeMap<String, f64>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {:?}", path))?;
    serde_json::from_str(&content).context("Failed to parse ages of acquisition")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn inputs() -> AcquisitionInputs {
        AcquisitionInputs {
            ages: map(&[
                ("st", 14.0),
                ("qn", 18.0),
                ("ac", 22.0),
                ("rp", 25.0),
                ("xa", 30.0),
                ("late", 80.0),
                ("unscored", 20.0),
            ]),
            f1_scores: map(&[
                ("st", 0.9),
                ("qn", 0.7),
                ("ac", 0.6),
                ("rp", 0.3),
                ("xa", 0.25),
                ("late", 0.1),
            ]),
            adult_frequencies: map(&[
                ("st", 0.4),
                ("qn", 0.2),
                ("ac", 0.1),
                ("rp", 0.05),
                ("xa", 0.0),
                ("late", 0.01),
            ]),
        }
    }

    #[test]
    fn test_observed_labels_filters() {
        let labels = inputs().observed_labels(DEFAULT_MAX_AGE);
        assert_eq!(labels, vec!["ac", "qn", "rp", "st"]);
    }

    #[test]
    fn test_analysis_runs_three_regressions() {
        let analysis = analyze_acquisition(&inputs(), DEFAULT_MAX_AGE).unwrap();
        assert_eq!(analysis.labels.len(), 4);
        assert_eq!(analysis.combined.model.coefficients.len(), 2);
        assert_eq!(analysis.f_tests.len(), 2);
        // age falls with frequency
        assert!(analysis.frequency_only.model.coefficients[0] < 0.0);
        assert!(analysis.frequency_only.explained_variance > 0.9);
        assert!(analysis.combined.explained_variance >= analysis.f1_only.explained_variance - 1e-9);
        assert!(analysis.format().contains("p-values"));
    }

    #[test]
    fn test_too_few_labels() {
        assert!(analyze_acquisition(&inputs(), 17.0).is_err());
    }
}
