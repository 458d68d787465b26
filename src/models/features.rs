use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Family names used by the sparse encoding and CRF attribute names
pub mod family {
    pub const WORDS: &str = "words";
    pub const SPEAKER: &str = "speaker";
    pub const LENGTH: &str = "length";
    pub const ACTIONS: &str = "actions";
    pub const REPEATED_WORDS: &str = "repeated_words";
    pub const REP_LENGTH: &str = "rep_length";
    pub const REP_RATIO: &str = "rep_ratio";
}

/// Quantile bins over one numeric feature, with ids `first_id..first_id + bin_count`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinFamily {
    /// Sorted, deduplicated cut points. Always at least two entries.
    pub edges: Vec<f64>,
    /// Feature id of the first bin
    pub first_id: usize,
}

impl BinFamily {
    /// Bin `values` at `quantiles` evenly spaced training quantiles
    pub fn from_values(values: &[f64], quantiles: usize, first_id: usize) -> Self {
        Self {
            edges: quantile_edges(values, quantiles),
            first_id,
        }
    }

    pub fn bin_count(&self) -> usize {
        self.edges.len().saturating_sub(1).max(1)
    }

    /// Closed-open membership `[e_i, e_{i+1})`, last bin closed. Out-of-range
    /// values are clamped to the first or last bin.
    pub fn bin_of(&self, value: f64) -> usize {
        let above = self.edges.partition_point(|edge| *edge <= value);
        above.saturating_sub(1).min(self.bin_count() - 1)
    }

    pub fn id_of(&self, value: f64) -> usize {
        self.first_id + self.bin_of(value)
    }

    /// `lo-hi` label of a bin
    pub fn label(&self, bin: usize) -> String {
        let lo = self.edges.get(bin).copied().unwrap_or_default();
        let hi = self.edges.get(bin + 1).copied().unwrap_or(lo);
        format!("{}-{}", lo, hi)
    }

    pub fn label_of(&self, value: f64) -> String {
        self.label(self.bin_of(value))
    }

    pub fn labels(&self) -> Vec<String> {
        (0..self.bin_count()).map(|bin| self.label(bin)).collect()
    }

    pub fn ids(&self) -> Range<usize> {
        self.first_id..self.first_id + self.bin_count()
    }

    fn id_of_label(&self, label: &str) -> Option<usize> {
        (0..self.bin_count())
            .find(|&bin| self.label(bin) == label)
            .map(|bin| self.first_id + bin)
    }
}

/// Cut points at `0, 1/q, ..., 1` quantiles with linear interpolation.
/// Duplicate cut points collapse; a constant feature yields `[v, v]`.
pub fn quantile_edges(values: &[f64], quantiles: usize) -> Vec<f64> {
    if values.is_empty() {
        return vec![0.0, 0.0];
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let quantiles = quantiles.max(1);
    let last = (sorted.len() - 1) as f64;

    let mut edges: Vec<f64> = (0..=quantiles)
        .map(|k| {
            let position = k as f64 / quantiles as f64 * last;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            let fraction = position - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
        })
        .collect();
    edges.dedup();

    if edges.len() == 1 {
        edges.push(edges[0]);
    }
    edges
}

/// Categorical feature space: family -> value -> unique contiguous id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureIndex {
    /// In-vocabulary words, ids in alphabetical order starting at 0
    pub words: BTreeMap<String, usize>,
    /// Speaker codes seen in training
    pub speaker: BTreeMap<String, usize>,
    /// Turn length bins
    pub length_bins: BinFamily,
    /// In-vocabulary action words
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<BTreeMap<String, usize>>,
    /// Repeated word count bins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rep_length_bins: Option<BinFamily>,
    /// Repeated word ratio bins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rep_ratio_bins: Option<BinFamily>,
}

impl FeatureIndex {
    /// Total number of feature ids
    pub fn len(&self) -> usize {
        self.all_ids().into_iter().max().map(|max| max + 1).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn uses_action(&self) -> bool {
        self.action.is_some()
    }

    pub fn uses_repetitions(&self) -> bool {
        self.rep_length_bins.is_some() && self.rep_ratio_bins.is_some()
    }

    /// Id of a named feature as produced by the sparse encoding
    pub fn id_of(&self, family_name: &str, value: &str) -> Option<usize> {
        match family_name {
            family::WORDS | family::REPEATED_WORDS => self.words.get(value).copied(),
            family::SPEAKER => self.speaker.get(value).copied(),
            family::LENGTH => self.length_bins.id_of_label(value),
            family::ACTIONS => self.action.as_ref()?.get(value).copied(),
            family::REP_LENGTH => self.rep_length_bins.as_ref()?.id_of_label(value),
            family::REP_RATIO => self.rep_ratio_bins.as_ref()?.id_of_label(value),
            _ => None,
        }
    }

    fn all_ids(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.words.values().copied().collect();
        ids.extend(self.speaker.values().copied());
        ids.extend(self.length_bins.ids());
        if let Some(action) = &self.action {
            ids.extend(action.values().copied());
        }
        for bins in [&self.rep_length_bins, &self.rep_ratio_bins].into_iter().flatten() {
            ids.extend(bins.ids());
        }
        ids
    }

    /// Check ids are unique and contiguous and bin edges are sorted
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut ids = self.all_ids();
        ids.sort_unstable();
        if ids.iter().enumerate().any(|(expected, &id)| expected != id) {
            return Err(PipelineError::InvalidFeatureIndex(
                "feature ids are not unique and contiguous".to_string(),
            ));
        }

        let bins = [
            Some(&self.length_bins),
            self.rep_length_bins.as_ref(),
            self.rep_ratio_bins.as_ref(),
        ];
        for family in bins.into_iter().flatten() {
            if family.edges.len() < 2 || family.edges.windows(2).any(|w| w[0] > w[1]) {
                return Err(PipelineError::InvalidFeatureIndex(format!(
                    "bin edges {:?} are not sorted cut points",
                    family.edges
                )));
            }
        }
        Ok(())
    }

    /// Write as `features.json`
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;
        serde_json::to_writer_pretty(file, self).context("Failed to write feature index")?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {:?}", path))?;
        let index: FeatureIndex =
            serde_json::from_str(&content).context("Failed to parse feature index")?;
        index.validate()?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_edges_interpolate() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile_edges(&values, 4), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(quantile_edges(&values, 2), vec![1.0, 3.0, 5.0]);
        assert_eq!(quantile_edges(&[0.0, 10.0], 4), vec![0.0, 2.5, 5.0, 7.5, 10.0]);
    }

    #[test]
    fn test_quantile_edges_collapse_duplicates() {
        let values = [1.0, 1.0, 1.0, 1.0, 2.0];
        assert_eq!(quantile_edges(&values, 4), vec![1.0, 2.0]);
        assert_eq!(quantile_edges(&[3.0, 3.0, 3.0], 10), vec![3.0, 3.0]);
    }

    #[test]
    fn test_bin_membership_is_exclusive_and_exhaustive() {
        let bins = BinFamily {
            edges: vec![1.0, 3.0, 6.0, 10.0],
            first_id: 7,
        };
        assert_eq!(bins.bin_count(), 3);
        assert_eq!(bins.bin_of(1.0), 0);
        assert_eq!(bins.bin_of(2.9), 0);
        assert_eq!(bins.bin_of(3.0), 1);
        assert_eq!(bins.bin_of(6.0), 2);
        assert_eq!(bins.bin_of(10.0), 2);
        assert_eq!(bins.bin_of(0.0), 0);
        assert_eq!(bins.bin_of(42.0), 2);
        assert_eq!(bins.id_of(4.0), 8);
        assert_eq!(bins.labels(), vec!["1-3", "3-6", "6-10"]);

        for tenth in 10..=100 {
            let value = tenth as f64 / 10.0;
            let hits: Vec<usize> = (0..bins.bin_count())
                .filter(|&b| {
                    let (lo, hi) = (bins.edges[b], bins.edges[b + 1]);
                    let last = b + 1 == bins.bin_count();
                    value >= lo && (value < hi || (last && value <= hi))
                })
                .collect();
            assert_eq!(hits, vec![bins.bin_of(value)]);
        }
    }

    #[test]
    fn test_degenerate_bin() {
        let bins = BinFamily::from_values(&[4.0, 4.0], 10, 0);
        assert_eq!(bins.bin_count(), 1);
        assert_eq!(bins.bin_of(4.0), 0);
        assert_eq!(bins.bin_of(9.0), 0);
        assert_eq!(bins.label(0), "4-4");
    }

    #[test]
    fn test_validate_rejects_gaps() {
        let index = FeatureIndex {
            words: BTreeMap::from([("a".to_string(), 0), ("b".to_string(), 2)]),
            speaker: BTreeMap::from([("CHI".to_string(), 3)]),
            length_bins: BinFamily {
                edges: vec![1.0, 2.0],
                first_id: 4,
            },
            action: None,
            rep_length_bins: None,
            rep_ratio_bins: None,
        };
        assert!(index.validate().is_err());
    }

    #[test]
    fn test_index_json_roundtrip() {
        let index = FeatureIndex {
            words: BTreeMap::from([("a".to_string(), 0), ("b".to_string(), 1)]),
            speaker: BTreeMap::from([("CHI".to_string(), 2), ("MOT".to_string(), 3)]),
            length_bins: BinFamily {
                edges: vec![1.0, 2.0, 5.0],
                first_id: 4,
            },
            action: None,
            rep_length_bins: None,
            rep_ratio_bins: None,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.json");
        index.save(&path).unwrap();
        let loaded = FeatureIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.len(), 6);
        assert_eq!(loaded.id_of(family::LENGTH, "2-5"), Some(5));
    }
}
