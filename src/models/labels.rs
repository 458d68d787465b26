use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Sorted speech-act labels and their integer ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelVocabulary {
    labels: Vec<String>,
}

impl LabelVocabulary {
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = &'a String>) -> Self {
        let mut labels: Vec<String> = labels.into_iter().cloned().collect();
        labels.sort();
        labels.dedup();
        Self { labels }
    }

    pub fn id_of(&self, label: &str) -> Option<usize> {
        self.labels.binary_search_by(|l| l.as_str().cmp(label)).ok()
    }

    pub fn label(&self, id: usize) -> Option<&str> {
        self.labels.get(id).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;
        serde_json::to_writer_pretty(file, self).context("Failed to write labels")?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {:?}", path))?;
        let labels: Vec<String> =
            serde_json::from_str(&content).context("Failed to parse labels")?;
        Ok(Self::from_labels(labels.iter()))
    }
}
