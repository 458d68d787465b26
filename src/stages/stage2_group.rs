use std::collections::{HashMap, HashSet};

use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use tracing::debug;

use crate::error::PipelineError;
use crate::models::Utterance;

/// One training sequence: the labelled turns of a transcript, in order
#[derive(Debug, Clone, PartialEq)]
pub struct FileSequence<T> {
    pub file_id: String,
    pub features: Vec<T>,
    pub labels: Vec<String>,
}

impl<T> FileSequence<T> {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Group utterance features by file, in first-appearance order.
///
/// Unlabelled utterances are dropped before grouping, so a file's label
/// sequence skips over them.
pub fn group_by_file<T>(utterances: &[Utterance], features: Vec<T>) -> Vec<FileSequence<T>> {
    let mut sequences: Vec<FileSequence<T>> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut dropped = 0usize;

    for (utterance, feature) in utterances.iter().zip(features) {
        let Some(tag) = &utterance.tag else {
            dropped += 1;
            continue;
        };

        let position = *positions.entry(utterance.file_id.as_str()).or_insert_with(|| {
            sequences.push(FileSequence {
                file_id: utterance.file_id.clone(),
                features: vec![],
                labels: vec![],
            });
            sequences.len() - 1
        });
        sequences[position].features.push(feature);
        sequences[position].labels.push(tag.clone());
    }

    if dropped > 0 {
        debug!(
            "Dropped {} unlabelled utterances before grouping; affected sequences are fragmented",
            dropped
        );
    }
    sequences
}

/// Utterance positions of each file in first-appearance order, unlabelled included
pub fn file_positions(utterances: &[Utterance]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for (i, utterance) in utterances.iter().enumerate() {
        let position = *positions.entry(utterance.file_id.as_str()).or_insert_with(|| {
            groups.push(vec![]);
            groups.len() - 1
        });
        groups[position].push(i);
    }
    groups
}

/// Keep a random `fraction` of whole files
pub fn select_train_fraction<R: Rng>(
    utterances: Vec<Utterance>,
    fraction: f64,
    rng: &mut R,
) -> Result<Vec<Utterance>, PipelineError> {
    validate_fraction(fraction)?;
    if fraction >= 1.0 {
        return Ok(utterances);
    }

    let mut files: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for utterance in &utterances {
        if seen.insert(utterance.file_id.as_str()) {
            files.push(utterance.file_id.as_str());
        }
    }

    let keep_count = (files.len() as f64 * fraction) as usize;
    let kept: HashSet<String> = files
        .choose_multiple(rng, keep_count)
        .map(|f| f.to_string())
        .collect();
    debug!("Keeping {} of {} files", kept.len(), files.len());

    Ok(utterances
        .into_iter()
        .filter(|u| kept.contains(&u.file_id))
        .collect())
}

pub fn validate_fraction(fraction: f64) -> Result<(), PipelineError> {
    if fraction > 0.0 && fraction <= 1.0 {
        Ok(())
    } else {
        Err(PipelineError::InvalidTrainFraction(fraction))
    }
}

/// Split each sequence into consecutive chunks of at most `max_len` turns
pub fn chunk_sequences<T>(sequences: Vec<FileSequence<T>>, max_len: usize) -> Vec<FileSequence<T>> {
    if max_len == 0 {
        return sequences;
    }

    let mut chunks = Vec::new();
    let mut chunk_id = 0usize;
    for sequence in sequences {
        let mut features = sequence.features.into_iter();
        let mut labels = sequence.labels.into_iter();
        loop {
            let chunk_labels: Vec<String> = labels.by_ref().take(max_len).collect();
            if chunk_labels.is_empty() {
                break;
            }
            let chunk_features: Vec<T> = features.by_ref().take(chunk_labels.len()).collect();
            chunks.push(FileSequence {
                file_id: format!("{}_{}", sequence.file_id, chunk_id),
                features: chunk_features,
                labels: chunk_labels,
            });
            chunk_id += 1;
        }
    }
    chunks
}

/// Shuffle sequence order in place
pub fn shuffle_sequences<T, R: Rng>(sequences: &mut [FileSequence<T>], rng: &mut R) {
    sequences.shuffle(rng);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{family, tokenize, Speaker};
    use crate::stages::{
        build_feature_index, to_attributes, FeatureConfig, SparseFeatures, UtteranceEncoder,
    };
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn utterance(file: &str, text: &str, tag: Option<&str>) -> Utterance {
        Utterance {
            file_id: file.to_string(),
            file_index: 0,
            speaker: Speaker::Caregiver,
            tokens: tokenize(text),
            action_tokens: None,
            repetition: None,
            age_months: None,
            tag: tag.map(str::to_string),
        }
    }

    #[test]
    fn test_group_preserves_order() {
        let utterances = vec![
            utterance("a", "one", Some("st")),
            utterance("b", "four", Some("qn")),
            utterance("a", "two", Some("st")),
            utterance("b", "five", Some("qn")),
            utterance("a", "three", Some("qn")),
            utterance("b", "six", Some("st")),
        ];
        let features: Vec<String> = utterances.iter().map(|u| u.sentence()).collect();
        let sequences = group_by_file(&utterances, features);

        assert_eq!(sequences.len(), 2);
        assert_eq!(sequences[0].file_id, "a");
        assert_eq!(sequences[0].features, vec!["one", "two", "three"]);
        assert_eq!(sequences[0].labels, vec!["st", "st", "qn"]);
        assert_eq!(sequences[1].labels, vec!["qn", "qn", "st"]);
    }

    #[test]
    fn test_encoded_files_group_in_order() {
        let utterances = vec![
            utterance("a", "look at the ball", Some("st")),
            utterance("a", "the ball is red", Some("st")),
            utterance("a", "where is the ball", Some("qn")),
            utterance("b", "what is that", Some("qn")),
            utterance("b", "is that a ball", Some("qn")),
            utterance("b", "that is a ball", Some("st")),
        ];
        let config = FeatureConfig {
            min_occurrences: 0,
            length_bins: 2,
            ..Default::default()
        };
        let index = build_feature_index(&utterances, &config);
        assert_eq!(index.words.len(), 10);

        let encoder = UtteranceEncoder::new(&index);
        let encoded: Vec<SparseFeatures> =
            utterances.iter().map(|u| encoder.encode_sparse(u)).collect();
        let sequences = group_by_file(&utterances, encoded);

        assert_eq!(sequences.len(), 2);
        assert_eq!(sequences[0].file_id, "a");
        assert_eq!(sequences[0].labels, vec!["st", "st", "qn"]);
        assert_eq!(sequences[1].labels, vec!["qn", "qn", "st"]);
        assert!(sequences.iter().all(|s| s.features.len() == 3));

        let words: Vec<&String> = sequences[0].features[0][family::WORDS].keys().collect();
        assert_eq!(words, ["at", "ball", "look", "the"]);

        // one id for "ball" in both files
        let ball = index.id_of(family::WORDS, "ball").unwrap();
        assert!(encoder.active_ids(&sequences[0].features[2]).contains(&ball));
        assert!(encoder.active_ids(&sequences[1].features[1]).contains(&ball));

        // four words, the speaker and a length bin
        assert_eq!(to_attributes(&sequences[1].features[2]).len(), 6);
    }

    #[test]
    fn test_group_drops_unlabelled() {
        let utterances = vec![
            utterance("a", "one", Some("st")),
            utterance("a", "two", None),
            utterance("a", "three", Some("qn")),
            utterance("b", "four", None),
        ];
        let features: Vec<String> = utterances.iter().map(|u| u.sentence()).collect();
        let sequences = group_by_file(&utterances, features);

        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0].features, vec!["one", "three"]);
        assert_eq!(sequences[0].features.len(), sequences[0].labels.len());
    }

    #[test]
    fn test_file_positions_keep_unlabelled() {
        let utterances = vec![
            utterance("a", "one", Some("st")),
            utterance("b", "two", None),
            utterance("a", "three", None),
        ];
        assert_eq!(file_positions(&utterances), vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn test_train_fraction() {
        let utterances: Vec<Utterance> = (0..10)
            .flat_map(|f| {
                let file = format!("f{}", f);
                vec![utterance(&file, "a", Some("st")), utterance(&file, "b", Some("qn"))]
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(7);
        let kept = select_train_fraction(utterances.clone(), 0.5, &mut rng).unwrap();
        let files: HashSet<&str> = kept.iter().map(|u| u.file_id.as_str()).collect();
        assert_eq!(files.len(), 5);
        assert_eq!(kept.len(), 10);

        let all = select_train_fraction(utterances.clone(), 1.0, &mut rng).unwrap();
        assert_eq!(all.len(), 20);

        assert!(select_train_fraction(utterances.clone(), 0.0, &mut rng).is_err());
        assert!(select_train_fraction(utterances, 1.5, &mut rng).is_err());
    }

    #[test]
    fn test_chunk_sequences() {
        let sequences = vec![FileSequence {
            file_id: "a".to_string(),
            features: vec![1, 2, 3, 4, 5],
            labels: ["x", "y", "x", "y", "x"].iter().map(|s| s.to_string()).collect(),
        }];
        let chunks = chunk_sequences(sequences, 2);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].file_id, "a_0");
        assert_eq!(chunks[0].features, vec![1, 2]);
        assert_eq!(chunks[2].features, vec![5]);
        assert_eq!(chunks[2].labels, vec!["x"]);
    }
}
