use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::models::{tokenize, Repetition, Speaker, TagGranularity, Utterance};

/// Layout of the training input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFormat {
    /// A list of headerless transcript files, columns given by a schema
    #[default]
    Txt,
    /// One tab-separated file with a header row
    Tsv,
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataFormat::Txt => f.write_str("txt"),
            DataFormat::Tsv => f.write_str("tsv"),
        }
    }
}

impl FromStr for DataFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "txt" => Ok(DataFormat::Txt),
            "tsv" => Ok(DataFormat::Tsv),
            other => Err(PipelineError::unknown_selector("data format", other)),
        }
    }
}

/// Ordered column names of a transcript file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    columns: Vec<String>,
}

impl ColumnSchema {
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|c| c.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    /// The most basic transcript layout
    pub fn basic_txt() -> Self {
        Self::new(&["spa_all", "ut", "time", "speaker", "sentence"])
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// First column holding speech-act tags
    pub fn tag_column(&self) -> Option<usize> {
        self.position("spa_all")
            .or_else(|| self.columns.iter().position(|c| c.contains("spa_")))
    }

    /// Fail with the list of `required` columns absent from the schema
    pub fn require(&self, format: &'static str, required: &[&str]) -> Result<(), PipelineError> {
        let missing: Vec<String> = required
            .iter()
            .filter(|name| !self.contains(name))
            .map(|name| name.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::MissingColumns { format, missing })
        }
    }
}

/// Configuration for corpus loading
#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub format: DataFormat,
    /// Column names of `txt` transcripts, in order
    pub txt_columns: Vec<String>,
    /// Maximum number of transcript files read from a listing
    pub cut: usize,
    /// Tag part kept from `spa_all`
    pub granularity: TagGranularity,
    /// Tokenize the `action` column when present
    pub use_action: bool,
    /// Compute words repeated from the previous turn
    pub use_repetitions: bool,
    /// Snap `age_months` to the closest of these ages
    pub match_age: Option<Vec<f64>>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            format: DataFormat::Txt,
            txt_columns: vec![],
            cut: 1_000_000,
            granularity: TagGranularity::All,
            use_action: false,
            use_repetitions: false,
            match_age: None,
        }
    }
}

/// Loaded and cleaned utterances
#[derive(Debug, Clone)]
pub struct Corpus {
    /// Utterances in file order, then row order
    pub utterances: Vec<Utterance>,
    /// Name of the tag column the labels came from
    pub tag_column: Option<String>,
    /// Whether action tokens were loaded
    pub has_action: bool,
    /// Rows dropped because of an empty sentence
    pub dropped_rows: usize,
}

impl Corpus {
    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    /// Occurrence count per tag, sorted by tag
    pub fn tag_counts(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for tag in self.utterances.iter().filter_map(|u| u.tag.as_deref()) {
            *counts.entry(tag).or_default() += 1;
        }
        let mut counts: Vec<(String, usize)> =
            counts.into_iter().map(|(t, c)| (t.to_string(), c)).collect();
        counts.sort();
        counts
    }

    /// Occurrence count per speaker
    pub fn speaker_counts(&self) -> Vec<(Speaker, usize)> {
        let mut counts: HashMap<Speaker, usize> = HashMap::new();
        for utterance in &self.utterances {
            *counts.entry(utterance.speaker).or_default() += 1;
        }
        let mut counts: Vec<(Speaker, usize)> = counts.into_iter().collect();
        counts.sort();
        counts
    }
}

/// Column positions resolved against a schema
#[derive(Debug, Clone)]
struct ResolvedColumns {
    speaker: usize,
    sentence: usize,
    tag: Option<usize>,
    action: Option<usize>,
    age: Option<usize>,
    file_id: Option<usize>,
}

impl ResolvedColumns {
    fn resolve(
        schema: &ColumnSchema,
        format: &'static str,
        required: &[&str],
        use_action: bool,
    ) -> Result<Self, PipelineError> {
        schema.require(format, required)?;
        let position = |name: &str| {
            schema
                .position(name)
                .ok_or_else(|| PipelineError::MissingColumns {
                    format,
                    missing: vec![name.to_string()],
                })
        };
        Ok(Self {
            speaker: position("speaker")?,
            sentence: position("sentence")?,
            tag: schema.tag_column(),
            action: if use_action { schema.position("action") } else { None },
            age: schema.position("age_months"),
            file_id: schema.position("file_id"),
        })
    }
}

/// Load a corpus according to `config`
pub fn load_corpus(path: &Path, config: &LoadConfig) -> Result<Corpus> {
    info!("Loading {:?} ({} format)", path, config.format);
    let mut corpus = match config.format {
        DataFormat::Txt => load_listing(path, config)?,
        DataFormat::Tsv => load_tsv(path, config)?,
    };

    if config.use_repetitions {
        add_repetitions(&mut corpus.utterances);
    }
    if let Some(ages) = &config.match_age {
        match_ages(&mut corpus.utterances, ages);
    }

    info!(
        "Loaded {} utterances ({} rows dropped for empty sentences)",
        corpus.len(),
        corpus.dropped_rows
    );
    Ok(corpus)
}

/// Read a newline-delimited list of headerless transcript files
fn load_listing(list_path: &Path, config: &LoadConfig) -> Result<Corpus> {
    if config.txt_columns.is_empty() {
        return Err(PipelineError::MissingColumns {
            format: "txt",
            missing: vec!["speaker".to_string(), "sentence".to_string()],
        }
        .into());
    }
    let schema = ColumnSchema::new(&config.txt_columns);
    let columns = ResolvedColumns::resolve(&schema, "txt", &["speaker", "sentence"], config.use_action)?;

    let tag_column = columns.tag.map(|i| {
        if schema.columns()[i] == "spa_all" {
            config.granularity.column_name()
        } else {
            schema.columns()[i].clone()
        }
    });

    let listing = std::fs::read_to_string(list_path)
        .with_context(|| format!("Failed to read file list: {:?}", list_path))?;
    let files: Vec<&str> = listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(config.cut)
        .collect();

    let mut utterances = Vec::new();
    let mut dropped_rows = 0;

    for (file_index, file_name) in files.iter().enumerate() {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_path(file_name)
            .with_context(|| format!("Failed to open transcript: {}", file_name))?;

        let mut kept = 0;
        for record in reader.records() {
            let record =
                record.with_context(|| format!("Failed to read row in {}", file_name))?;
            match row_to_utterance(&record, &columns, file_name, file_index, config) {
                Some(utterance) => {
                    utterances.push(utterance);
                    kept += 1;
                }
                None => dropped_rows += 1,
            }
        }
        debug!("{}: {} utterances", file_name, kept);
    }

    Ok(Corpus {
        utterances,
        tag_column,
        has_action: columns.action.is_some(),
        dropped_rows,
    })
}

/// Read a single tab-separated file with a header row
fn load_tsv(path: &Path, config: &LoadConfig) -> Result<Corpus> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .quoting(false)
        .from_path(path)
        .with_context(|| format!("Failed to open file: {:?}", path))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {:?}", path))?
        .clone();
    let schema = ColumnSchema::new(&headers.iter().collect::<Vec<_>>());
    let columns = ResolvedColumns::resolve(
        &schema,
        "tsv",
        &["file_id", "speaker", "sentence"],
        config.use_action,
    )?;

    if config.granularity != TagGranularity::All {
        warn!("Tag granularity is ignored for tsv input; the spa_ column is used as-is");
    }
    let tag_column = columns.tag.map(|i| schema.columns()[i].clone());
    let tsv_config = LoadConfig {
        granularity: TagGranularity::All,
        ..config.clone()
    };

    let mut utterances = Vec::new();
    let mut dropped_rows = 0;
    let mut file_positions: HashMap<String, usize> = HashMap::new();

    for record in reader.records() {
        let record = record.with_context(|| format!("Failed to read row in {:?}", path))?;
        let file_id = columns
            .file_id
            .and_then(|i| record.get(i))
            .unwrap_or_default()
            .trim()
            .to_string();
        let next_position = file_positions.len();
        let file_index = *file_positions.entry(file_id.clone()).or_insert(next_position);

        match row_to_utterance(&record, &columns, &file_id, file_index, &tsv_config) {
            Some(utterance) => utterances.push(utterance),
            None => dropped_rows += 1,
        }
    }

    Ok(Corpus {
        utterances,
        tag_column,
        has_action: columns.action.is_some(),
        dropped_rows,
    })
}

fn cell<'r>(record: &'r StringRecord, index: Option<usize>) -> Option<&'r str> {
    index
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Convert one row, or `None` when its sentence is missing or blank
fn row_to_utterance(
    record: &StringRecord,
    columns: &ResolvedColumns,
    file_id: &str,
    file_index: usize,
    config: &LoadConfig,
) -> Option<Utterance> {
    let tokens = tokenize(cell(record, Some(columns.sentence))?);
    if tokens.is_empty() {
        return None;
    }

    let speaker = Speaker::from_code(cell(record, Some(columns.speaker)).unwrap_or_default());
    let action_tokens = columns
        .action
        .map(|_| cell(record, columns.action).map(tokenize).unwrap_or_default());
    let tag = cell(record, columns.tag).and_then(|raw| config.granularity.select(raw));
    let age_months = cell(record, columns.age).and_then(|age| age.parse::<f64>().ok());

    Some(Utterance {
        file_id: file_id.to_string(),
        file_index,
        speaker,
        tokens,
        action_tokens,
        repetition: None,
        age_months,
        tag,
    })
}

/// Attach words repeated from the previous turn.
///
/// A turn repeats its predecessor only when both are in the same file and
/// spoken by different speakers. The first utterance is compared with itself.
pub fn add_repetitions(utterances: &mut [Utterance]) {
    let repetitions: Vec<Repetition> = (0..utterances.len())
        .map(|i| {
            let current = &utterances[i];
            let previous = &utterances[i.saturating_sub(1)];
            let words: Vec<String> =
                if previous.file_id == current.file_id && previous.speaker != current.speaker {
                    current
                        .tokens
                        .iter()
                        .filter(|w| previous.tokens.contains(w))
                        .cloned()
                        .collect()
                } else {
                    vec![]
                };
            let count = words.len();
            Repetition {
                words,
                count,
                ratio: count as f64 / current.turn_length().max(1) as f64,
            }
        })
        .collect();

    for (utterance, repetition) in utterances.iter_mut().zip(repetitions) {
        utterance.repetition = Some(repetition);
    }
}

/// Snap ages to the closest experimental age
fn match_ages(utterances: &mut [Utterance], ages: &[f64]) {
    for utterance in utterances.iter_mut() {
        if let Some(age) = utterance.age_months {
            utterance.age_months = ages
                .iter()
                .copied()
                .min_by(|a, b| (a - age).abs().total_cmp(&(b - age).abs()))
                .or(Some(age));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{}", content).unwrap();
        path
    }

    fn txt_config(columns: &[&str]) -> LoadConfig {
        LoadConfig {
            txt_columns: columns.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_load_listing() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(
            dir.path(),
            "a.txt",
            "RES:YY\t1\t0\tCHI\tYes Mommy\nQN:QN\t2\t1\tFAT\tWhat is that\n\t3\t2\tMOT\t\n",
        );
        let b = write_file(dir.path(), "b.txt", "ST:ST\t1\t0\tINV\tLook here\n");
        let listing = write_file(
            dir.path(),
            "list.txt",
            &format!("{}\n{}\n", a.display(), b.display()),
        );

        let config = txt_config(&["spa_all", "ut", "time", "speaker", "sentence"]);
        let corpus = load_corpus(&listing, &config).unwrap();

        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.dropped_rows, 1);
        assert_eq!(corpus.tag_column.as_deref(), Some("spa_all"));
        assert_eq!(corpus.utterances[0].tokens, vec!["yes", "mommy"]);
        assert_eq!(corpus.utterances[0].speaker, Speaker::Child);
        assert_eq!(corpus.utterances[1].speaker, Speaker::Caregiver);
        assert_eq!(corpus.utterances[1].tag.as_deref(), Some("QN:QN"));
        assert_eq!(corpus.utterances[2].file_index, 1);
        assert_eq!(corpus.utterances[2].speaker, Speaker::Caregiver);
    }

    #[test]
    fn test_listing_granularity_and_cut() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.txt", "RES:YY\tCHI\tyes\n");
        let b = write_file(dir.path(), "b.txt", "ST:ST\tMOT\tlook\n");
        let listing = write_file(
            dir.path(),
            "list.txt",
            &format!("{}\n{}\n", a.display(), b.display()),
        );

        let config = LoadConfig {
            cut: 1,
            granularity: TagGranularity::First,
            ..txt_config(&["spa_all", "speaker", "sentence"])
        };
        let corpus = load_corpus(&listing, &config).unwrap();

        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.tag_column.as_deref(), Some("spa_1"));
        assert_eq!(corpus.utterances[0].tag.as_deref(), Some("RES"));
    }

    #[test]
    fn test_missing_columns_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let listing = write_file(dir.path(), "list.txt", "");

        let err = load_corpus(&listing, &txt_config(&["spa_all", "speaker"])).unwrap_err();
        let err = err.downcast::<PipelineError>().unwrap();
        assert!(matches!(err, PipelineError::MissingColumns { ref missing, .. } if missing == &["sentence"]));

        assert!(load_corpus(&listing, &LoadConfig::default()).is_err());
    }

    #[test]
    fn test_load_tsv_with_actions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "train.tsv",
            "FILE_ID\tSPA_2\tSPEAKER\tSENTENCE\tACTION\n\
             f1\tYQ\tMOT\tIs it red\tpoints at Ball\n\
             f1\tYA\tCHI\tred\t\n\
             f2\t\tMOT\tokay\t\n",
        );
        let config = LoadConfig {
            format: DataFormat::Tsv,
            use_action: true,
            ..Default::default()
        };
        let corpus = load_corpus(&path, &config).unwrap();

        assert_eq!(corpus.len(), 3);
        assert!(corpus.has_action);
        assert_eq!(corpus.tag_column.as_deref(), Some("spa_2"));
        assert_eq!(
            corpus.utterances[0].action_tokens.as_deref(),
            Some(&["points".to_string(), "at".to_string(), "ball".to_string()][..])
        );
        assert_eq!(corpus.utterances[1].action_tokens.as_deref(), Some(&[][..]));
        assert_eq!(corpus.utterances[2].tag, None);
        assert_eq!(corpus.utterances[2].file_index, 1);
    }

    #[test]
    fn test_repetitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "train.tsv",
            "file_id\tspa_all\tspeaker\tsentence\n\
             f1\tQN\tMOT\tis it a ball\n\
             f1\tST\tCHI\tball ball\n\
             f1\tST\tCHI\tit is\n\
             f2\tST\tMOT\tball\n",
        );
        let config = LoadConfig {
            format: DataFormat::Tsv,
            use_repetitions: true,
            ..Default::default()
        };
        let corpus = load_corpus(&path, &config).unwrap();
        let reps: Vec<&Repetition> = corpus
            .utterances
            .iter()
            .map(|u| u.repetition.as_ref().unwrap())
            .collect();

        // the first turn is its own predecessor
        assert_eq!(reps[0].count, 0);
        assert_eq!(reps[1].words, vec!["ball", "ball"]);
        assert!((reps[1].ratio - 1.0).abs() < 1e-9);
        // same speaker as previous turn
        assert_eq!(reps[2].count, 0);
        // previous turn is in another file
        assert_eq!(reps[3].count, 0);
    }

    #[test]
    fn test_match_age() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "train.tsv",
            "file_id\tspeaker\tsentence\tage_months\nf1\tCHI\tyes\t15.5\nf1\tCHI\tno\t19\n",
        );
        let config = LoadConfig {
            format: DataFormat::Tsv,
            match_age: Some(vec![14.0, 20.0]),
            ..Default::default()
        };
        let corpus = load_corpus(&path, &config).unwrap();
        assert_eq!(corpus.utterances[0].age_months, Some(14.0));
        assert_eq!(corpus.utterances[1].age_months, Some(20.0));
        assert_eq!(corpus.utterances[0].tag, None);
    }
}
