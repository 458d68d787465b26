use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Local;
use serde::Serialize;

pub const MODEL_FILE: &str = "model.crfsuite";
pub const FEATURES_FILE: &str = "features.json";
pub const LABELS_FILE: &str = "labels.json";
pub const METADATA_FILE: &str = "metadata.txt";
pub const BASELINE_FILE: &str = "baseline.json";

/// Directory holding the artifacts of one training run
#[derive(Debug, Clone)]
pub struct RunDirectory {
    path: PathBuf,
}

impl RunDirectory {
    /// Create `<out_dir>/<tag>_<YYYY-MM-DD-HHMMSS>/`
    pub fn create(out_dir: &Path, tag: &str) -> Result<Self> {
        let name = format!("{}_{}", tag, Local::now().format("%Y-%m-%d-%H%M%S"));
        let path = out_dir.join(name);
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create directory: {:?}", out_dir))?;
        std::fs::create_dir(&path)
            .with_context(|| format!("Failed to create run directory: {:?}", path))?;
        Ok(Self { path })
    }

    /// Open an existing run directory
    pub fn open(path: &Path) -> Result<Self> {
        if !path.join(MODEL_FILE).is_file() {
            bail!("No {} found in run directory {:?}", MODEL_FILE, path);
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn model_path(&self) -> PathBuf {
        self.path.join(MODEL_FILE)
    }

    pub fn features_path(&self) -> PathBuf {
        self.path.join(FEATURES_FILE)
    }

    pub fn labels_path(&self) -> PathBuf {
        self.path.join(LABELS_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.path.join(METADATA_FILE)
    }

    pub fn baseline_path(&self) -> PathBuf {
        self.path.join(BASELINE_FILE)
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline_path().is_file()
    }
}

/// Run arguments, written as one `key:\tvalue` line each
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunMetadata {
    entries: Vec<(String, String)>,
}

impl RunMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: impl Display) -> &mut Self {
        self.entries.push((key.to_string(), value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn format(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{}:\t{}\n", key, value))
            .collect()
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;
        write!(file, "{}", self.format())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {:?}", path))?;
        let entries = content
            .lines()
            .filter_map(|line| line.split_once(":\t"))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Ok(Self { entries })
    }
}

/// One tagged utterance of an annotated transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedRow {
    pub file_id: String,
    pub speaker: String,
    pub sentence: String,
    pub gold: String,
    pub predicted: String,
}

/// Write annotated rows as tab-separated values with a header
pub fn write_annotated_tsv(path: &Path, rows: &[AnnotatedRow]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_path(path)
        .with_context(|| format!("Failed to create file: {:?}", path))?;
    for row in rows {
        writer.serialize(row).context("Failed to write annotated row")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_run_directory_naming() {
        let dir = tempdir().unwrap();
        let run = RunDirectory::create(dir.path(), "spa_all").unwrap();
        let name = run.path().file_name().unwrap().to_string_lossy().to_string();

        assert!(name.starts_with("spa_all_"));
        // YYYY-MM-DD-HHMMSS
        assert_eq!(name.len(), "spa_all_".len() + 17);
        assert!(run.path().is_dir());
        assert!(!run.has_baseline());
        // no model yet
        assert!(RunDirectory::open(run.path()).is_err());
    }

    #[test]
    fn test_metadata_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(METADATA_FILE);
        let mut metadata = RunMetadata::new();
        metadata.push("data", "corpus.tsv").push("train_fraction", 0.8);
        metadata.write_file(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "data:\tcorpus.tsv\ntrain_fraction:\t0.8\n");
        let loaded = RunMetadata::load(&path).unwrap();
        assert_eq!(loaded, metadata);
        assert_eq!(loaded.get("train_fraction"), Some("0.8"));
    }

    #[test]
    fn test_annotated_tsv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("annotated.tsv");
        let rows = vec![AnnotatedRow {
            file_id: "f1".to_string(),
            speaker: "CHI".to_string(),
            sentence: "more juice".to_string(),
            gold: "RD".to_string(),
            predicted: "RP".to_string(),
        }];
        write_annotated_tsv(&path, &rows).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("file_id\tspeaker\tsentence\tgold\tpredicted"));
        assert_eq!(lines.next(), Some("f1\tCHI\tmore juice\tRD\tRP"));
    }
}
