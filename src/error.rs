use thiserror::Error;

/// Configuration and data-format errors that abort a run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("train fraction must be in (0, 1], got {0}")]
    InvalidTrainFraction(f64),
    #[error("{format} schema is missing required columns: {}", missing.join(", "))]
    MissingColumns {
        format: &'static str,
        missing: Vec<String>,
    },
    #[error("unknown {kind} selector: {value}")]
    UnknownSelector { kind: &'static str, value: String },
    #[error("no speech-act tag column found (expected a column containing 'spa_')")]
    NoTagColumn,
    #[error("corpus is empty after cleaning: {0}")]
    EmptyCorpus(String),
    #[error("invalid feature index: {0}")]
    InvalidFeatureIndex(String),
    #[error("CRF {context}: {message}")]
    Crf {
        context: &'static str,
        message: String,
    },
}

impl PipelineError {
    pub(crate) fn unknown_selector(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownSelector {
            kind,
            value: value.into(),
        }
    }

    pub(crate) fn crf(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Crf {
            context,
            message: err.to_string(),
        }
    }
}
