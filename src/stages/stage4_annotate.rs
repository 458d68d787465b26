use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use crfs::{Attribute, Model};
use tracing::{info, warn};

use crate::baselines::{BaselineModel, Classifier};
use crate::error::PipelineError;
use crate::evaluation::{
    label_frequencies, load_frequencies, ClassificationReport, FrequencyComparison,
};
use crate::io::{
    write_annotated_tsv, AnnotatedRow, Corpus, DataFormat, LoadConfig, RunDirectory, RunMetadata,
};
use crate::models::{FeatureIndex, LabelVocabulary, Speaker, TagGranularity, Utterance};
use crate::stages::{file_positions, to_attributes, UtteranceEncoder};

pub const SCORES_FILE: &str = "classification_scores.json";
pub const ANNOTATED_FILE: &str = "annotated.tsv";

/// Configuration for annotating a corpus with a trained run
#[derive(Debug, Clone)]
pub struct AnnotateConfig {
    /// Speaker whose predicted labels are counted; `None` counts everyone
    pub speaker: Option<Speaker>,
    /// Reference label frequencies to compare against
    pub gold_frequencies: Option<PathBuf>,
    /// Annotated TSV destination, defaults to the run directory
    pub output: Option<PathBuf>,
    /// Classification report destination, defaults to the run directory
    pub scores_output: Option<PathBuf>,
    /// Evaluate the run's baseline when it has one
    pub evaluate_baseline: bool,
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            speaker: Some(Speaker::Child),
            gold_frequencies: None,
            output: None,
            scores_output: None,
            evaluate_baseline: true,
        }
    }
}

/// Result of annotation
#[derive(Debug)]
pub struct AnnotateResult {
    /// One row per utterance, in corpus order
    pub rows: Vec<AnnotatedRow>,
    pub annotated_path: PathBuf,
    /// CRF scores on labelled utterances
    pub report: Option<ClassificationReport>,
    /// Predicted label frequencies of the selected speaker
    pub frequencies: BTreeMap<String, f64>,
    pub comparison: Option<FrequencyComparison>,
    pub baseline_report: Option<ClassificationReport>,
}

/// Trained artifacts read back from a run directory
#[derive(Debug)]
pub struct TrainedRun {
    pub run: RunDirectory,
    pub index: FeatureIndex,
    pub labels: LabelVocabulary,
    /// Arguments the run was trained with, empty for runs without `metadata.txt`
    pub metadata: RunMetadata,
    model_data: Vec<u8>,
}

impl TrainedRun {
    pub fn open(path: &Path) -> Result<Self> {
        let run = RunDirectory::open(path)?;
        let index = FeatureIndex::load(&run.features_path())?;
        let labels = LabelVocabulary::load(&run.labels_path())?;
        let model_path = run.model_path();
        let model_data = std::fs::read(&model_path)
            .with_context(|| format!("Failed to read model: {:?}", model_path))?;
        let metadata_path = run.metadata_path();
        let metadata = if metadata_path.is_file() {
            RunMetadata::load(&metadata_path)?
        } else {
            warn!("Run {:?} has no metadata; loader settings come from the caller", run.path());
            RunMetadata::new()
        };
        info!(
            "Loaded run {:?}: {} features, {} labels",
            run.path(),
            index.len(),
            labels.len()
        );
        Ok(Self {
            run,
            index,
            labels,
            metadata,
            model_data,
        })
    }

    /// Tag granularity of the training labels, from the recorded `tag` or `tag_column`
    pub fn granularity(&self) -> Option<TagGranularity> {
        if let Some(tag) = self.metadata.get("tag") {
            return tag.parse().ok();
        }
        let column = self.metadata.get("tag_column")?;
        column.strip_prefix("spa_")?.parse().ok()
    }

    /// Transcript columns the run was trained on
    pub fn txt_columns(&self) -> Option<Vec<String>> {
        let columns: Vec<String> = self
            .metadata
            .get("columns")?
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        (!columns.is_empty()).then_some(columns)
    }

    /// Loader settings matching what the run was trained with.
    ///
    /// Feature families follow the index and the tag granularity follows the
    /// run, so predictions and gold labels share one label space. Columns
    /// given in `base` win over the recorded ones, since a held-out corpus
    /// may use another transcript layout.
    pub fn load_config(&self, base: LoadConfig) -> LoadConfig {
        let granularity = match self.granularity() {
            Some(trained) => {
                if trained != base.granularity {
                    warn!(
                        "Run was trained on '{}' tags; ignoring requested granularity '{}'",
                        trained, base.granularity
                    );
                }
                trained
            }
            None => base.granularity,
        };

        let txt_columns = match self.txt_columns() {
            Some(trained) if base.format == DataFormat::Txt => {
                if base.txt_columns.is_empty() {
                    trained
                } else {
                    if base.txt_columns != trained {
                        warn!(
                            "Columns {:?} differ from the trained columns {:?}",
                            base.txt_columns, trained
                        );
                    }
                    base.txt_columns.clone()
                }
            }
            _ => base.txt_columns.clone(),
        };

        LoadConfig {
            use_action: self.index.uses_action(),
            use_repetitions: self.index.uses_repetitions(),
            granularity,
            txt_columns,
            ..base
        }
    }

    /// CRF label of every utterance, tagging each file as one sequence
    pub fn tag(&self, utterances: &[Utterance]) -> Result<Vec<String>> {
        let model = Model::new(&self.model_data).map_err(|e| PipelineError::crf("model", e))?;
        let mut tagger = model.tagger().map_err(|e| PipelineError::crf("tagger", e))?;
        let encoder = UtteranceEncoder::new(&self.index);

        let mut predicted = vec![String::new(); utterances.len()];
        for positions in file_positions(utterances) {
            let xseq: Vec<Vec<Attribute>> = positions
                .iter()
                .map(|&i| to_attributes(&encoder.encode_sparse(&utterances[i])))
                .collect();
            let tags = tagger
                .tag(&xseq)
                .map_err(|e| PipelineError::crf("tagging", e))?;
            for (&i, tag) in positions.iter().zip(tags) {
                predicted[i] = tag.to_string();
            }
        }
        Ok(predicted)
    }
}

/// Perform Stage 4: annotate `corpus` with a trained run
///
/// This stage:
/// 1. Tags every file as one CRF sequence
/// 2. Writes the annotated transcript
/// 3. Scores predictions against gold labels when the corpus has them
/// 4. Computes predicted label frequencies of the selected speaker
/// 5. Compares them to reference frequencies when given
/// 6. Evaluates the run's baseline when it has one
pub fn annotate_corpus(
    trained: &TrainedRun,
    corpus: &Corpus,
    config: &AnnotateConfig,
) -> Result<AnnotateResult> {
    if corpus.is_empty() {
        return Err(PipelineError::EmptyCorpus("nothing to annotate".to_string()).into());
    }
    let utterances = &corpus.utterances;

    // Tag with the CRF
    let predicted = trained.tag(utterances)?;

    // Write the annotated transcript

    let rows: Vec<AnnotatedRow> = utterances
        .iter()
        .zip(&predicted)
        .map(|(u, p)| AnnotatedRow {
            file_id: u.file_id.clone(),
            speaker: u.speaker.code().to_string(),
            sentence: u.sentence(),
            gold: u.tag.clone().unwrap_or_default(),
            predicted: p.clone(),
        })
        .collect();
    let annotated_path = config
        .output
        .clone()
        .unwrap_or_else(|| trained.run.path().join(ANNOTATED_FILE));
    write_annotated_tsv(&annotated_path, &rows)?;
    info!("Annotated {} utterances into {:?}", rows.len(), annotated_path);

    // Score against gold labels
    let report = score_labelled(utterances, &predicted);
    match &report {
        Some(report) => {
            let scores_path = config
                .scores_output
                .clone()
                .unwrap_or_else(|| trained.run.path().join(SCORES_FILE));
            report.write_json(&scores_path)?;
            info!(
                "Accuracy {:.3}, kappa {:.3}; scores written to {:?}",
                report.accuracy, report.cohen_kappa, scores_path
            );
        }
        None => warn!("Corpus has no gold labels; skipping classification scores"),
    }

    // Predicted frequencies
    let frequencies = label_frequencies(
        utterances
            .iter()
            .zip(&predicted)
            .filter(|(u, _)| config.speaker.is_none_or(|s| u.speaker == s))
            .map(|(_, p)| p.as_str()),
    );
    let comparison = match &config.gold_frequencies {
        Some(path) => {
            let gold = load_frequencies(path)?;
            Some(FrequencyComparison::new(&frequencies, &gold))
        }
        None => None,
    };

    // Evaluate the baseline
    let baseline_report = if config.evaluate_baseline && trained.run.has_baseline() {
        Some(evaluate_baseline(trained, utterances)?)
    } else {
        None
    };

    Ok(AnnotateResult {
        rows,
        annotated_path,
        report,
        frequencies,
        comparison,
        baseline_report,
    })
}

/// Report over the utterances that carry a gold label
fn score_labelled(utterances: &[Utterance], predicted: &[String]) -> Option<ClassificationReport> {
    let (gold, predicted): (Vec<String>, Vec<String>) = utterances
        .iter()
        .zip(predicted)
        .filter_map(|(u, p)| u.tag.clone().map(|g| (g, p.clone())))
        .unzip();
    (!gold.is_empty()).then(|| ClassificationReport::new(&gold, &predicted))
}

fn evaluate_baseline(trained: &TrainedRun, utterances: &[Utterance]) -> Result<ClassificationReport> {
    let baseline = BaselineModel::load(&trained.run.baseline_path())?;
    let encoder = UtteranceEncoder::new(&trained.index);

    let (gold, predicted): (Vec<String>, Vec<String>) = utterances
        .iter()
        .filter_map(|u| {
            let gold = u.tag.clone()?;
            let id = baseline.predict(&encoder.encode_dense(u));
            let label = trained.labels.label(id).unwrap_or_default().to_string();
            Some((gold, label))
        })
        .unzip();
    if gold.is_empty() {
        return Err(PipelineError::EmptyCorpus("no labelled utterances for the baseline".to_string()).into());
    }

    let report = ClassificationReport::new(&gold, &predicted);
    info!(
        "{} baseline accuracy {:.3}, kappa {:.3}",
        baseline.kind(),
        report.accuracy,
        report.cohen_kappa
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::RunMetadata;
    use crate::stages::stage3_train::fixtures::toy_corpus;
    use crate::stages::{train_model, FeatureConfig, TrainConfig};
    use tempfile::tempdir;

    fn trained_run(dir: &Path) -> TrainedRun {
        let config = TrainConfig {
            max_iterations: 30,
            c1: 0.0,
            baseline: Some(crate::baselines::BaselineKind::NaiveBayes),
            features: FeatureConfig {
                min_occurrences: 1,
                length_bins: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = train_model(toy_corpus(), dir, RunMetadata::new(), &config).unwrap();
        TrainedRun::open(result.run.path()).unwrap()
    }

    fn first_part_corpus() -> Corpus {
        let mut corpus = toy_corpus();
        corpus.tag_column = Some(TagGranularity::First.column_name());
        corpus
    }

    #[test]
    fn test_load_config_follows_trained_granularity() {
        let dir = tempdir().unwrap();
        let mut metadata = RunMetadata::new();
        metadata
            .push("format", DataFormat::Txt)
            .push("columns", "spa_all,ut,time,speaker,sentence")
            .push("tag", TagGranularity::First);
        let config = TrainConfig {
            max_iterations: 5,
            features: FeatureConfig {
                min_occurrences: 1,
                length_bins: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = train_model(first_part_corpus(), dir.path(), metadata, &config).unwrap();
        let trained = TrainedRun::open(result.run.path()).unwrap();

        let load_config = trained.load_config(LoadConfig::default());
        assert_eq!(load_config.granularity, TagGranularity::First);
        assert_eq!(
            load_config.txt_columns,
            ["spa_all", "ut", "time", "speaker", "sentence"]
        );

        // explicit columns are kept, the granularity is not
        let load_config = trained.load_config(LoadConfig {
            txt_columns: vec!["speaker".to_string(), "sentence".to_string()],
            granularity: TagGranularity::Second,
            ..Default::default()
        });
        assert_eq!(load_config.granularity, TagGranularity::First);
        assert_eq!(load_config.txt_columns, ["speaker", "sentence"]);
    }

    #[test]
    fn test_granularity_from_tag_column() {
        let dir = tempdir().unwrap();
        let config = TrainConfig {
            max_iterations: 5,
            features: FeatureConfig {
                min_occurrences: 1,
                length_bins: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let result =
            train_model(first_part_corpus(), dir.path(), RunMetadata::new(), &config).unwrap();
        let trained = TrainedRun::open(result.run.path()).unwrap();

        assert_eq!(trained.metadata.get("tag_column"), Some("spa_1"));
        assert_eq!(trained.granularity(), Some(TagGranularity::First));
        assert!(trained.txt_columns().is_none());
        let load_config = trained.load_config(LoadConfig::default());
        assert_eq!(load_config.granularity, TagGranularity::First);
        assert!(load_config.txt_columns.is_empty());
    }

    #[test]
    fn test_annotate_training_corpus() {
        let dir = tempdir().unwrap();
        let trained = trained_run(dir.path());
        let corpus = toy_corpus();
        let result = annotate_corpus(&trained, &corpus, &AnnotateConfig::default()).unwrap();

        assert_eq!(result.rows.len(), corpus.len());
        assert!(result.annotated_path.is_file());
        assert!(trained.run.path().join(SCORES_FILE).is_file());

        let report = result.report.unwrap();
        assert_eq!(report.accuracy, 1.0);
        assert!(result.baseline_report.is_some());
        // only child turns are counted, and the child always makes statements
        assert_eq!(result.frequencies.get("ST"), Some(&1.0));
    }

    #[test]
    fn test_frequency_comparison() {
        let dir = tempdir().unwrap();
        let trained = trained_run(dir.path());
        let gold_path = dir.path().join("gold.json");
        std::fs::write(&gold_path, r#"{"ST": 0.5, "QN": 0.5}"#).unwrap();

        let config = AnnotateConfig {
            speaker: None,
            gold_frequencies: Some(gold_path),
            ..Default::default()
        };
        let result = annotate_corpus(&trained, &toy_corpus(), &config).unwrap();
        let comparison = result.comparison.unwrap();
        assert_eq!(comparison.rows.len(), 2);
        assert!(comparison.kl_divergence.abs() < 1e-9);
    }

    #[test]
    fn test_unlabelled_corpus_skips_scores() {
        let dir = tempdir().unwrap();
        let trained = trained_run(dir.path());
        let mut corpus = toy_corpus();
        corpus.utterances.iter_mut().for_each(|u| u.tag = None);
        let config = AnnotateConfig {
            evaluate_baseline: false,
            ..Default::default()
        };
        let result = annotate_corpus(&trained, &corpus, &config).unwrap();

        assert!(result.report.is_none());
        assert!(result.rows.iter().all(|r| r.gold.is_empty() && !r.predicted.is_empty()));
    }
}
