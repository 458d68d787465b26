use std::collections::{BTreeMap, BTreeSet};

use crfs::Attribute;

use crate::models::{family, FeatureIndex, Utterance};

/// Named features of one utterance: family -> value -> weight
pub type SparseFeatures = BTreeMap<&'static str, BTreeMap<String, f64>>;

/// Encodes utterances against a fixed feature index
#[derive(Debug, Clone, Copy)]
pub struct UtteranceEncoder<'a> {
    index: &'a FeatureIndex,
}

impl<'a> UtteranceEncoder<'a> {
    pub fn new(index: &'a FeatureIndex) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &FeatureIndex {
        self.index
    }

    /// Sparse named encoding for the sequence model.
    ///
    /// Out-of-vocabulary tokens are dropped.
    pub fn encode_sparse(&self, utterance: &Utterance) -> SparseFeatures {
        let index = self.index;
        let mut features = SparseFeatures::new();

        features.insert(
            family::WORDS,
            count_known(utterance.tokens.iter(), |w| index.words.contains_key(w)),
        );
        features.insert(
            family::SPEAKER,
            BTreeMap::from([(utterance.speaker.code().to_string(), 1.0)]),
        );
        features.insert(
            family::LENGTH,
            BTreeMap::from([(
                index.length_bins.label_of(utterance.turn_length() as f64),
                1.0,
            )]),
        );

        if let (Some(vocabulary), Some(actions)) = (&index.action, &utterance.action_tokens) {
            features.insert(
                family::ACTIONS,
                count_known(actions.iter(), |w| vocabulary.contains_key(w)),
            );
        }

        if let (Some(rep_length), Some(rep_ratio)) = (&index.rep_length_bins, &index.rep_ratio_bins) {
            let repetition = utterance.repetition.clone().unwrap_or_default();
            features.insert(
                family::REPEATED_WORDS,
                count_known(repetition.words.iter(), |w| index.words.contains_key(w)),
            );
            features.insert(
                family::REP_LENGTH,
                BTreeMap::from([(rep_length.label_of(repetition.count as f64), 1.0)]),
            );
            features.insert(
                family::REP_RATIO,
                BTreeMap::from([(rep_ratio.label_of(repetition.ratio), 1.0)]),
            );
        }

        features
    }

    /// Fixed-width 0/1 vector over every feature id, for baseline classifiers
    pub fn encode_dense(&self, utterance: &Utterance) -> Vec<f64> {
        let mut vector = vec![0.0; self.index.len()];
        for id in self.active_ids(&self.encode_sparse(utterance)) {
            vector[id] = 1.0;
        }
        vector
    }

    /// Feature ids triggered by a sparse encoding
    pub fn active_ids(&self, features: &SparseFeatures) -> BTreeSet<usize> {
        features
            .iter()
            .flat_map(|(family_name, values)| {
                values
                    .iter()
                    .filter(|(_, weight)| **weight != 0.0)
                    .filter_map(move |(value, _)| self.index.id_of(family_name, value))
            })
            .collect()
    }
}

fn count_known<'t>(
    tokens: impl Iterator<Item = &'t String>,
    known: impl Fn(&str) -> bool,
) -> BTreeMap<String, f64> {
    let mut counts = BTreeMap::new();
    for token in tokens.filter(|t| known(t)) {
        *counts.entry(token.clone()).or_insert(0.0) += 1.0;
    }
    counts
}

/// Flatten sparse features into CRF attributes named `family:value`
pub fn to_attributes(features: &SparseFeatures) -> Vec<Attribute> {
    features
        .iter()
        .flat_map(|(family_name, values)| {
            values.iter().map(move |(value, weight)| {
                let name = format!("{}:{}", family_name, value);
                Attribute::new(name.as_str(), *weight)
            })
        })
        .collect()
}
