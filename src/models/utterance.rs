use std::fmt;

use serde::{Deserialize, Serialize};

/// Who produced a turn. Every code other than the target child is a caregiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Speaker {
    #[serde(rename = "CHI")]
    Child,
    #[serde(rename = "MOT")]
    Caregiver,
}

impl Speaker {
    /// Normalize a raw transcript speaker code (`CHI`, `MOT`, `FAT`, `INV`, ...)
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "CHI" | "Target_Child" => Speaker::Child,
            _ => Speaker::Caregiver,
        }
    }

    /// Code used as the speaker feature value
    pub fn code(&self) -> &'static str {
        match self {
            Speaker::Child => "CHI",
            Speaker::Caregiver => "MOT",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Words a turn repeats from the previous speaker's turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repetition {
    /// Repeated tokens, duplicates kept
    pub words: Vec<String>,
    /// Number of repeated tokens
    pub count: usize,
    /// `count / turn_length`
    pub ratio: f64,
}

/// One conversational turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    /// Source transcript identifier
    pub file_id: String,
    /// Position of the source transcript in the input list
    pub file_index: usize,
    pub speaker: Speaker,
    /// Lowercased whitespace tokens of the sentence, never empty
    pub tokens: Vec<String>,
    /// Lowercased action description tokens, when actions are loaded
    pub action_tokens: Option<Vec<String>>,
    /// Repetition of the previous turn, when repetitions are computed
    pub repetition: Option<Repetition>,
    /// Child age in months, when the corpus provides it
    pub age_months: Option<f64>,
    /// Gold speech-act tag at the selected granularity
    pub tag: Option<String>,
}

impl Utterance {
    /// Number of tokens in the turn
    pub fn turn_length(&self) -> usize {
        self.tokens.len()
    }

    pub fn sentence(&self) -> String {
        self.tokens.join(" ")
    }

    pub fn is_labeled(&self) -> bool {
        self.tag.is_some()
    }
}

/// Lowercase and split a free-text cell into tokens
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaker_remapping() {
        assert_eq!(Speaker::from_code("CHI"), Speaker::Child);
        assert_eq!(Speaker::from_code("Target_Child"), Speaker::Child);
        assert_eq!(Speaker::from_code("MOT"), Speaker::Caregiver);
        assert_eq!(Speaker::from_code("FAT"), Speaker::Caregiver);
        assert_eq!(Speaker::from_code("INV"), Speaker::Caregiver);
        assert_eq!(Speaker::Child.code(), "CHI");
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("  Do you WANT\tit "), vec!["do", "you", "want", "it"]);
        assert!(tokenize("   ").is_empty());
    }
}
