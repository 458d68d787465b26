use std::path::Path;

use anyhow::{Context, Result};
use crfs::train::{Algorithm, Trainer};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::baselines::{BaselineKind, BaselineModel, Classifier};
use crate::error::PipelineError;
use crate::io::{Corpus, RunDirectory, RunMetadata};
use crate::models::{FeatureIndex, LabelVocabulary, Utterance};
use crate::stages::{
    build_feature_index, chunk_sequences, group_by_file, select_train_fraction,
    shuffle_sequences, to_attributes, validate_fraction, FeatureConfig, UtteranceEncoder,
};

/// Configuration for CRF training
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// L1 regularization coefficient
    pub c1: f64,
    /// L2 regularization coefficient
    pub c2: f64,
    pub max_iterations: usize,
    pub seed: u64,
    /// Let the CRF trainer report its progress
    pub verbose: bool,
    /// Fraction of transcript files kept for training, in (0, 1]
    pub train_fraction: f64,
    /// Split file sequences into chunks of at most this many turns
    pub split_length: Option<usize>,
    /// Also train a per-utterance baseline
    pub baseline: Option<BaselineKind>,
    pub features: FeatureConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            c1: 1.0,
            c2: 1e-3,
            max_iterations: 50,
            seed: 0,
            verbose: false,
            train_fraction: 1.0,
            split_length: None,
            baseline: None,
            features: FeatureConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Checks that must pass before any data is loaded
    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_fraction(self.train_fraction)
    }

    fn record(&self, metadata: &mut RunMetadata) {
        metadata
            .push("c1", self.c1)
            .push("c2", self.c2)
            .push("max_iterations", self.max_iterations)
            .push("seed", self.seed)
            .push("train_fraction", self.train_fraction)
            .push(
                "split_length",
                self.split_length.map_or("none".to_string(), |n| n.to_string()),
            )
            .push(
                "baseline",
                self.baseline.map_or("none".to_string(), |k| k.to_string()),
            )
            .push("min_occurrences", self.features.min_occurrences)
            .push("length_bins", self.features.length_bins)
            .push("use_action", self.features.use_action)
            .push("use_repetitions", self.features.use_repetitions);
    }
}

/// Result of training
#[derive(Debug)]
pub struct TrainResult {
    pub run: RunDirectory,
    pub utterances: usize,
    pub sequences: usize,
    pub feature_count: usize,
    pub labels: LabelVocabulary,
}

/// Perform Stage 3: train a CRF on `corpus` into a new run directory
///
/// This stage:
/// 1. Keeps a seeded fraction of the transcript files
/// 2. Builds the feature index and encodes every utterance
/// 3. Groups utterances into one sequence per file, optionally chunked, and shuffles them
/// 4. Trains the CRF with L-BFGS into `<out_dir>/<tag>_<timestamp>/`
/// 5. Saves the index, label list and run metadata next to the model
/// 6. Fits and saves the baseline when one is requested
///
/// `metadata` carries the caller's run arguments; the tag column and the
/// training parameters are appended to it.
pub fn train_model(
    corpus: Corpus,
    out_dir: &Path,
    mut metadata: RunMetadata,
    config: &TrainConfig,
) -> Result<TrainResult> {
    config.validate()?;
    let tag_column = corpus.tag_column.clone().ok_or(PipelineError::NoTagColumn)?;
    info!("Speaker counts: {:?}", corpus.speaker_counts());
    for (tag, count) in corpus.tag_counts() {
        debug!("{}: {}", tag, count);
    }
    let mut rng = StdRng::seed_from_u64(config.seed);

    // Keep a fraction of the files
    let utterances = select_train_fraction(corpus.utterances, config.train_fraction, &mut rng)?;
    let labels = LabelVocabulary::from_labels(utterances.iter().filter_map(|u| u.tag.as_ref()));
    if labels.is_empty() {
        return Err(PipelineError::EmptyCorpus("no labelled utterances to train on".to_string()).into());
    }
    info!(
        "Training on {} utterances with {} labels from {}",
        utterances.len(),
        labels.len(),
        tag_column
    );

    // Build features
    let index = build_feature_index(&utterances, &config.features);
    let encoder = UtteranceEncoder::new(&index);
    let attributes: Vec<_> = utterances
        .iter()
        .map(|u| to_attributes(&encoder.encode_sparse(u)))
        .collect();

    // Group into sequences
    let mut sequences = group_by_file(&utterances, attributes);
    if let Some(max_len) = config.split_length {
        sequences = chunk_sequences(sequences, max_len);
    }
    shuffle_sequences(&mut sequences, &mut rng);
    info!("Grouped into {} sequences", sequences.len());

    // Train the CRF
    let mut trainer = Trainer::new(config.verbose);
    trainer
        .select(Algorithm::LBFGS)
        .map_err(|e| PipelineError::crf("algorithm selection", e))?;
    for sequence in &sequences {
        let yseq: Vec<&str> = sequence.labels.iter().map(String::as_str).collect();
        trainer
            .append(&sequence.features, &yseq)
            .map_err(|e| PipelineError::crf("training data", e))?;
    }
    for (name, value) in [
        ("c1", config.c1.to_string()),
        ("c2", config.c2.to_string()),
        ("max_iterations", config.max_iterations.to_string()),
    ] {
        trainer
            .set(name, &value)
            .map_err(|e| PipelineError::crf("parameter", e))?;
    }

    let run = RunDirectory::create(out_dir, &tag_column)?;
    let model_path = run.model_path();
    let model_path_str = model_path
        .to_str()
        .with_context(|| format!("Model path is not valid UTF-8: {:?}", model_path))?;
    info!("Training CRF into {:?}", model_path);
    trainer
        .train(model_path_str)
        .map_err(|e| PipelineError::crf("training", e))?;

    // Save artifacts
    index.save(&run.features_path())?;
    labels.save(&run.labels_path())?;
    metadata.push("tag_column", &tag_column);
    config.record(&mut metadata);
    metadata.write_file(&run.metadata_path())?;

    // Train the baseline
    if let Some(kind) = config.baseline {
        let baseline = train_baseline(kind, &utterances, &index, &labels, config.seed)?;
        baseline.save(&run.baseline_path())?;
        info!("Saved {} baseline to {:?}", kind, run.baseline_path());
    }

    info!("Run written to {:?}", run.path());
    Ok(TrainResult {
        run,
        utterances: utterances.len(),
        sequences: sequences.len(),
        feature_count: index.len(),
        labels,
    })
}

/// Fit a baseline classifier on the dense encoding of labelled utterances
pub fn train_baseline(
    kind: BaselineKind,
    utterances: &[Utterance],
    index: &FeatureIndex,
    labels: &LabelVocabulary,
    seed: u64,
) -> Result<BaselineModel> {
    let encoder = UtteranceEncoder::new(index);
    let mut samples = Vec::new();
    let mut targets = Vec::new();
    for utterance in utterances {
        let Some(target) = utterance.tag.as_deref().and_then(|t| labels.id_of(t)) else {
            continue;
        };
        samples.push(encoder.encode_dense(utterance));
        targets.push(target);
    }
    info!("Training {} baseline on {} utterances", kind, samples.len());
    let mut model = BaselineModel::new(kind, seed);
    model
        .fit(&samples, &targets, labels.len())
        .with_context(|| format!("Failed to train {} baseline", kind))?;
    Ok(model)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::io::Corpus;
    use crate::models::{tokenize, Speaker, Utterance};

    /// Four short transcripts where questions and statements alternate
    pub fn toy_corpus() -> Corpus {
        let mut utterances = Vec::new();
        for file in 0..4 {
            let file_id = format!("file{}", file);
            for turn in 0..6 {
                let (speaker, text, tag) = if turn % 2 == 0 {
                    (Speaker::Caregiver, "what is that", "QN")
                } else {
                    (Speaker::Child, "that is a ball", "ST")
                };
                utterances.push(Utterance {
                    file_id: file_id.clone(),
                    file_index: file,
                    speaker,
                    tokens: tokenize(text),
                    action_tokens: None,
                    repetition: None,
                    age_months: None,
                    tag: Some(tag.to_string()),
                });
            }
        }
        Corpus {
            utterances,
            tag_column: Some("spa_all".to_string()),
            has_action: false,
            dropped_rows: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::toy_corpus;
    use super::*;
    use crate::io::{FEATURES_FILE, LABELS_FILE, METADATA_FILE, MODEL_FILE};
    use tempfile::tempdir;

    fn small_config() -> TrainConfig {
        TrainConfig {
            max_iterations: 20,
            features: FeatureConfig {
                min_occurrences: 1,
                length_bins: 2,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_fraction_rejected_before_training() {
        let dir = tempdir().unwrap();
        let config = TrainConfig {
            train_fraction: 0.0,
            ..small_config()
        };
        assert!(config.validate().is_err());
        assert!(train_model(toy_corpus(), dir.path(), RunMetadata::new(), &config).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_tag_column() {
        let dir = tempdir().unwrap();
        let corpus = Corpus {
            tag_column: None,
            ..toy_corpus()
        };
        let err = train_model(corpus, dir.path(), RunMetadata::new(), &small_config()).unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_some());
    }

    #[test]
    fn test_train_writes_run_directory() {
        let dir = tempdir().unwrap();
        let mut metadata = RunMetadata::new();
        metadata.push("data", "toy");
        let config = TrainConfig {
            baseline: Some(BaselineKind::NaiveBayes),
            ..small_config()
        };
        let result = train_model(toy_corpus(), dir.path(), metadata, &config).unwrap();

        assert_eq!(result.utterances, 24);
        assert_eq!(result.sequences, 4);
        assert_eq!(result.labels.labels(), ["QN", "ST"]);
        for file in [MODEL_FILE, FEATURES_FILE, LABELS_FILE, METADATA_FILE] {
            assert!(result.run.path().join(file).is_file(), "{} missing", file);
        }
        assert!(result.run.has_baseline());

        let metadata = RunMetadata::load(&result.run.metadata_path()).unwrap();
        assert_eq!(metadata.get("data"), Some("toy"));
        assert_eq!(metadata.get("baseline"), Some("NB"));
        assert_eq!(metadata.get("tag_column"), Some("spa_all"));
        let index = FeatureIndex::load(&result.run.features_path()).unwrap();
        assert_eq!(index.len(), result.feature_count);
    }
}
