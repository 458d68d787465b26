pub mod analysis;
pub mod baselines;
pub mod error;
pub mod evaluation;
pub mod io;
pub mod models;
pub mod stages;

pub use analysis::{analyze_acquisition, load_ages, AcquisitionAnalysis, AcquisitionInputs};
pub use baselines::{BaselineKind, BaselineModel, Classifier};
pub use error::PipelineError;
pub use evaluation::{ClassificationReport, FrequencyComparison};
pub use io::{load_corpus, Corpus, DataFormat, LoadConfig, RunDirectory, RunMetadata};
pub use models::{FeatureIndex, LabelVocabulary, Speaker, TagGranularity, Utterance};
pub use stages::{
    annotate_corpus, build_feature_index, train_model, AnnotateConfig, AnnotateResult,
    FeatureConfig, TrainConfig, TrainResult, TrainedRun,
};
