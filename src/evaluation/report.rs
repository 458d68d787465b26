use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Precision, recall and F1 of one label
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelScores {
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "f1-score")]
    pub f1_score: f64,
    pub support: usize,
}

/// Held-out comparison of gold and predicted labels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Sorted union of gold and predicted labels
    pub labels: Vec<String>,
    pub per_label: BTreeMap<String, LabelScores>,
    pub accuracy: f64,
    pub macro_avg: LabelScores,
    pub weighted_avg: LabelScores,
    /// `confusion[gold][predicted]`, indexed like `labels`
    pub confusion: Vec<Vec<usize>>,
    pub cohen_kappa: f64,
}

impl ClassificationReport {
    pub fn new(gold: &[String], predicted: &[String]) -> Self {
        let mut labels: Vec<String> = gold.iter().chain(predicted).cloned().collect();
        labels.sort();
        labels.dedup();
        let position = |label: &String| labels.binary_search(label).unwrap_or_default();

        let k = labels.len();
        let mut confusion = vec![vec![0usize; k]; k];
        for (g, p) in gold.iter().zip(predicted) {
            confusion[position(g)][position(p)] += 1;
        }

        let total: usize = confusion.iter().flatten().sum();
        let correct: usize = (0..k).map(|i| confusion[i][i]).sum();
        let accuracy = ratio(correct as f64, total as f64);

        let mut per_label = BTreeMap::new();
        for (i, label) in labels.iter().enumerate() {
            let support: usize = confusion[i].iter().sum();
            let predicted_count: usize = confusion.iter().map(|row| row[i]).sum();
            let tp = confusion[i][i] as f64;
            let precision = ratio(tp, predicted_count as f64);
            let recall = ratio(tp, support as f64);
            per_label.insert(
                label.clone(),
                LabelScores {
                    precision,
                    recall,
                    f1_score: ratio(2.0 * precision * recall, precision + recall),
                    support,
                },
            );
        }

        let macro_avg = average(per_label.values(), |_| 1.0, total);
        let weighted_avg = average(per_label.values(), |s| s.support as f64, total);

        let expected: f64 = (0..k)
            .map(|i| {
                let row: usize = confusion[i].iter().sum();
                let col: usize = confusion.iter().map(|r| r[i]).sum();
                row as f64 * col as f64
            })
            .sum::<f64>()
            / (total as f64).powi(2).max(1.0);
        let cohen_kappa = ratio(accuracy - expected, 1.0 - expected);

        Self {
            labels,
            per_label,
            accuracy,
            macro_avg,
            weighted_avg,
            confusion,
            cohen_kappa,
        }
    }

    /// F1 score per label
    pub fn f1_scores(&self) -> BTreeMap<String, f64> {
        self.per_label
            .iter()
            .map(|(label, scores)| (label.clone(), scores.f1_score))
            .collect()
    }

    /// Plain-text rendering in the usual precision/recall/f1/support layout
    pub fn format(&self) -> String {
        let width = self.labels.iter().map(String::len).max().unwrap_or(0).max(12);
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        );
        let mut row = |name: &str, s: &LabelScores| {
            let _ = writeln!(
                out,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, s.precision, s.recall, s.f1_score, s.support
            );
        };
        for (label, scores) in &self.per_label {
            row(label, scores);
        }
        row("macro avg", &self.macro_avg);
        row("weighted avg", &self.weighted_avg);
        let _ = writeln!(out);
        let _ = writeln!(out, "{:>width$} {:>9.3}", "accuracy", self.accuracy);
        let _ = writeln!(out, "{:>width$} {:>9.3}", "cohen kappa", self.cohen_kappa);
        out
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;
        serde_json::to_writer_pretty(file, self).context("Failed to write classification report")?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {:?}", path))?;
        serde_json::from_str(&content).context("Failed to parse classification report")
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 { 0.0 } else { numerator / denominator }
}

fn average<'a>(
    scores: impl Iterator<Item = &'a LabelScores> + Clone,
    weight: impl Fn(&LabelScores) -> f64,
    support: usize,
) -> LabelScores {
    let total_weight: f64 = scores.clone().map(&weight).sum();
    let mean = |field: fn(&LabelScores) -> f64| {
        ratio(scores.clone().map(|s| weight(s) * field(s)).sum(), total_weight)
    };
    LabelScores {
        precision: mean(|s| s.precision),
        recall: mean(|s| s.recall),
        f1_score: mean(|s| s.f1_score),
        support,
    }
}
