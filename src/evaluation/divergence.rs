use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

/// Relative frequency of each label
pub fn label_frequencies<'a>(labels: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, f64> {
    let mut counts: BTreeMap<String, f64> = BTreeMap::new();
    let mut total = 0.0;
    for label in labels {
        *counts.entry(label.to_string()).or_default() += 1.0;
        total += 1.0;
    }
    counts.values_mut().for_each(|c| *c /= total);
    counts
}

/// `sum p * ln(p / q)` after normalizing both distributions.
///
/// Infinite when `q` has no mass where `p` does; NaN when either is all zero.
pub fn kl_divergence(p: &[f64], q: &[f64]) -> f64 {
    let p_total: f64 = p.iter().sum();
    let q_total: f64 = q.iter().sum();
    if p_total == 0.0 || q_total == 0.0 {
        return f64::NAN;
    }

    p.iter()
        .zip(q)
        .map(|(p, q)| (p / p_total, q / q_total))
        .map(|(p, q)| match (p, q) {
            (p, _) if p == 0.0 => 0.0,
            (_, q) if q == 0.0 => f64::INFINITY,
            (p, q) => p * (p / q).ln(),
        })
        .sum()
}

/// Gold and predicted frequency of one label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyRow {
    pub label: String,
    pub gold: f64,
    pub predicted: f64,
}

/// Predicted label distribution compared with a reference distribution
#[derive(Debug, Clone, Serialize)]
pub struct FrequencyComparison {
    pub rows: Vec<FrequencyRow>,
    pub kl_divergence: f64,
}

impl FrequencyComparison {
    /// Compare over the gold label set; predicted labels outside it are ignored
    pub fn new(predicted: &BTreeMap<String, f64>, gold: &BTreeMap<String, f64>) -> Self {
        let rows: Vec<FrequencyRow> = gold
            .iter()
            .map(|(label, &gold)| FrequencyRow {
                label: label.clone(),
                gold,
                predicted: predicted.get(label).copied().unwrap_or(0.0),
            })
            .collect();

        let p: Vec<f64> = rows.iter().map(|r| r.predicted).collect();
        let q: Vec<f64> = rows.iter().map(|r| r.gold).collect();

        Self {
            kl_divergence: kl_divergence(&p, &q),
            rows,
        }
    }

    pub fn format(&self) -> String {
        let width = self.rows.iter().map(|r| r.label.len()).max().unwrap_or(0).max(10);
        let mut out = format!("{:<width$} {:>9} {:>9}\n", "speech_act", "gold", "predicted");
        for row in &self.rows {
            out.push_str(&format!(
                "{:<width$} {:>9.4} {:>9.4}\n",
                row.label, row.gold, row.predicted
            ));
        }
        out.push_str(&format!("KL Divergence: {:.3}\n", self.kl_divergence));
        out
    }
}

/// Read a label -> frequency JSON object
pub fn load_frequencies(path: &Path) -> Result<BTreeMap<String, f64>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {:?}", path))?;
    serde_json::from_str(&content).context("Failed to parse label frequencies")
}
