use std::collections::{BTreeMap, HashMap};

use tracing::info;

use crate::models::{BinFamily, FeatureIndex, Utterance};

/// Configuration for feature-index construction
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    /// Words seen this many times or fewer are left out
    pub min_occurrences: usize,
    /// Number of quantiles used for length and repetition bins
    pub length_bins: usize,
    /// Add the action-word family
    pub use_action: bool,
    /// Add repetition count and ratio bins
    pub use_repetitions: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_occurrences: 5,
            length_bins: 10,
            use_action: false,
            use_repetitions: false,
        }
    }
}

/// Build the categorical feature space of a training corpus.
///
/// Ids are contiguous: words (alphabetical), speakers, length bins, then
/// action words and repetition bins when enabled.
pub fn build_feature_index(utterances: &[Utterance], config: &FeatureConfig) -> FeatureIndex {
    let mut next_id = 0usize;

    let words = frequent_vocabulary(
        utterances.iter().flat_map(|u| u.tokens.iter()),
        config.min_occurrences,
        &mut next_id,
    );
    info!("There are {} words in the features", words.len());

    let mut speaker_codes: Vec<&str> = utterances.iter().map(|u| u.speaker.code()).collect();
    speaker_codes.sort_unstable();
    speaker_codes.dedup();
    let speaker: BTreeMap<String, usize> = speaker_codes
        .into_iter()
        .map(|code| (code.to_string(), take_id(&mut next_id)))
        .collect();

    let lengths: Vec<f64> = utterances.iter().map(|u| u.turn_length() as f64).collect();
    let length_bins = take_bins(&lengths, config.length_bins, &mut next_id);
    log_bins("Turn length splits", &length_bins);

    let action = config.use_action.then(|| {
        let action = frequent_vocabulary(
            utterances
                .iter()
                .filter_map(|u| u.action_tokens.as_ref())
                .flatten(),
            config.min_occurrences,
            &mut next_id,
        );
        info!("There are {} words in the actions", action.len());
        action
    });

    let (rep_length_bins, rep_ratio_bins) = if config.use_repetitions {
        let repetitions = utterances.iter().map(|u| u.repetition.clone().unwrap_or_default());
        let (counts, ratios): (Vec<f64>, Vec<f64>) =
            repetitions.map(|r| (r.count as f64, r.ratio)).unzip();
        let rep_length = take_bins(&counts, config.length_bins, &mut next_id);
        let rep_ratio = take_bins(&ratios, config.length_bins, &mut next_id);
        log_bins("Repetition length splits", &rep_length);
        log_bins("Repetition ratio splits", &rep_ratio);
        (Some(rep_length), Some(rep_ratio))
    } else {
        (None, None)
    };

    FeatureIndex {
        words,
        speaker,
        length_bins,
        action,
        rep_length_bins,
        rep_ratio_bins,
    }
}

fn take_id(next_id: &mut usize) -> usize {
    let id = *next_id;
    *next_id += 1;
    id
}

fn take_bins(values: &[f64], quantiles: usize, next_id: &mut usize) -> BinFamily {
    let bins = BinFamily::from_values(values, quantiles, *next_id);
    *next_id += bins.bin_count();
    bins
}

/// Words occurring more than `min_occurrences` times, numbered alphabetically
fn frequent_vocabulary<'a>(
    tokens: impl Iterator<Item = &'a String>,
    min_occurrences: usize,
    next_id: &mut usize,
) -> BTreeMap<String, usize> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_default() += 1;
    }

    let mut kept: Vec<&str> = counts
        .into_iter()
        .filter(|(_, count)| *count > min_occurrences)
        .map(|(word, _)| word)
        .collect();
    kept.sort_unstable();

    kept.into_iter()
        .map(|word| (word.to_string(), take_id(next_id)))
        .collect()
}

fn log_bins(title: &str, bins: &BinFamily) {
    info!("{}:", title);
    for (bin, label) in bins.labels().iter().enumerate() {
        info!("\tlabel {}: {}", bin, label);
    }
}
