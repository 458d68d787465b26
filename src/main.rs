use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use speechact::analysis::DEFAULT_MAX_AGE;
use speechact::evaluation::{label_frequencies, ClassificationReport};
use speechact::{
    analyze_acquisition, annotate_corpus, load_ages, load_corpus, train_model, AcquisitionInputs,
    AnnotateConfig, BaselineKind, DataFormat, FeatureConfig, LoadConfig, RunMetadata, Speaker,
    TagGranularity, TrainConfig, TrainedRun,
};

#[derive(Parser)]
#[command(name = "speechact")]
#[command(author, version, about = "Speech-act tagging of child/caregiver transcripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where and how to read a corpus
#[derive(Args, Debug, Clone)]
struct CorpusArgs {
    /// Transcript list (txt) or tab-separated corpus (tsv)
    #[arg(short, long)]
    data: PathBuf,

    /// Input layout: txt or tsv
    #[arg(long, default_value = "txt")]
    format: DataFormat,

    /// Column names of txt transcripts, comma separated (required with txt;
    /// `annotate` falls back to the trained run's columns)
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,

    /// Maximum number of transcript files read from the list
    #[arg(long, default_value = "1000000")]
    cut: usize,

    /// Tag granularity: all, 1, 2 or 2a
    #[arg(long, default_value = "all")]
    tag: TagGranularity,

    /// Snap child ages to the closest of these ages (months)
    #[arg(long, value_delimiter = ',')]
    match_age: Option<Vec<f64>>,
}

impl CorpusArgs {
    fn load_config(&self) -> LoadConfig {
        LoadConfig {
            format: self.format,
            txt_columns: self.columns.clone(),
            cut: self.cut,
            granularity: self.tag,
            match_age: self.match_age.clone(),
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Train a CRF speech-act tagger
    Train {
        #[command(flatten)]
        corpus: CorpusArgs,

        /// Parent directory of the run directory
        #[arg(short, long, default_value = "checkpoints/crf")]
        out: PathBuf,

        /// Add action-word features
        #[arg(long)]
        use_action: bool,

        /// Add features for words repeated from the previous turn
        #[arg(long)]
        use_repetitions: bool,

        /// Fraction of transcript files used for training, in (0, 1]
        #[arg(long, default_value = "1.0")]
        train_fraction: f64,

        /// Split transcripts into chunks of at most this many turns
        #[arg(long)]
        split_length: Option<usize>,

        /// Words seen this many times or fewer are not features
        #[arg(long, default_value = "5")]
        min_occurrences: usize,

        /// Number of turn-length quantile bins
        #[arg(long, default_value = "10")]
        length_bins: usize,

        /// L1 regularization
        #[arg(long, default_value = "1.0")]
        c1: f64,

        /// L2 regularization
        #[arg(long, default_value = "0.001")]
        c2: f64,

        #[arg(long, default_value = "50")]
        max_iterations: usize,

        /// Seed for file selection and shuffling
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Also train a baseline: SVC, LSVC, NB or RF
        #[arg(long)]
        baseline: Option<BaselineKind>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Tag a corpus with a trained run and evaluate it
    Annotate {
        #[command(flatten)]
        corpus: CorpusArgs,

        /// Run directory written by `train`
        #[arg(short, long)]
        run: PathBuf,

        /// Speaker whose label frequencies are reported (CHI, MOT or all)
        #[arg(long, default_value = "CHI")]
        speaker: String,

        /// Gold label frequencies (JSON object label -> frequency)
        #[arg(long)]
        gold_frequencies: Option<PathBuf>,

        /// Annotated TSV output, defaults to the run directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Classification scores output, defaults to the run directory
        #[arg(long)]
        scores: Option<PathBuf>,

        /// Skip the baseline even when the run has one
        #[arg(long)]
        no_baseline: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print corpus statistics without training
    Analyze {
        #[command(flatten)]
        corpus: CorpusArgs,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Regress age of acquisition on adult frequency and classification score
    Correlate {
        #[command(flatten)]
        corpus: CorpusArgs,

        /// Ages of acquisition (JSON object label -> months)
        #[arg(long)]
        ages: PathBuf,

        /// classification_scores.json of an evaluation
        #[arg(long)]
        scores: PathBuf,

        /// Labels acquired at or after this age are left out
        #[arg(long, default_value_t = DEFAULT_MAX_AGE)]
        max_age: f64,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            corpus,
            out,
            use_action,
            use_repetitions,
            train_fraction,
            split_length,
            min_occurrences,
            length_bins,
            c1,
            c2,
            max_iterations,
            seed,
            baseline,
            verbose,
        } => {
            setup_logging(verbose);
            let config = TrainConfig {
                c1,
                c2,
                max_iterations,
                seed,
                verbose,
                train_fraction,
                split_length,
                baseline,
                features: FeatureConfig {
                    min_occurrences,
                    length_bins,
                    use_action,
                    use_repetitions,
                },
            };
            train(corpus, out, config)
        }
        Commands::Annotate {
            corpus,
            run,
            speaker,
            gold_frequencies,
            output,
            scores,
            no_baseline,
            verbose,
        } => {
            setup_logging(verbose);
            let config = AnnotateConfig {
                speaker: (speaker != "all").then(|| Speaker::from_code(&speaker)),
                gold_frequencies,
                output,
                scores_output: scores,
                evaluate_baseline: !no_baseline,
            };
            annotate(corpus, run, config)
        }
        Commands::Analyze { corpus, verbose } => {
            setup_logging(verbose);
            analyze_corpus(corpus)
        }
        Commands::Correlate {
            corpus,
            ages,
            scores,
            max_age,
            verbose,
        } => {
            setup_logging(verbose);
            correlate(corpus, ages, scores, max_age)
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn train(corpus_args: CorpusArgs, out: PathBuf, config: TrainConfig) -> Result<()> {
    config.validate()?;

    let load_config = LoadConfig {
        use_action: config.features.use_action,
        use_repetitions: config.features.use_repetitions,
        ..corpus_args.load_config()
    };
    let corpus = load_corpus(&corpus_args.data, &load_config).context("Failed to load training data")?;

    let mut metadata = RunMetadata::new();
    metadata
        .push("data", corpus_args.data.display())
        .push("format", corpus_args.format)
        .push("columns", corpus_args.columns.join(","))
        .push("cut", corpus_args.cut)
        .push("tag", corpus_args.tag);

    let result = train_model(corpus, &out, metadata, &config)?;
    info!(
        "Complete: {} utterances in {} sequences, {} features, {} labels",
        result.utterances,
        result.sequences,
        result.feature_count,
        result.labels.len()
    );
    println!("{}", result.run.path().display());
    Ok(())
}

fn annotate(corpus_args: CorpusArgs, run: PathBuf, config: AnnotateConfig) -> Result<()> {
    let trained = TrainedRun::open(&run).context("Failed to open run directory")?;
    let load_config = trained.load_config(corpus_args.load_config());
    let corpus = load_corpus(&corpus_args.data, &load_config).context("Failed to load corpus")?;

    let result = annotate_corpus(&trained, &corpus, &config)?;

    if let Some(report) = &result.report {
        print_report("CRF", report);
    }
    if let Some(report) = &result.baseline_report {
        print_report("Baseline", report);
    }

    println!("Predicted Frequencies");
    println!("---------------------");
    match &result.comparison {
        Some(comparison) => print!("{}", comparison.format()),
        None => {
            for (label, frequency) in &result.frequencies {
                println!("{:<12} {:.4}", label, frequency);
            }
        }
    }
    Ok(())
}

fn print_report(name: &str, report: &ClassificationReport) {
    let title = format!("{} Classification Report", name);
    println!("{}", title);
    println!("{}", "=".repeat(title.len()));
    print!("{}", report.format());
    println!();
}

fn analyze_corpus(corpus_args: CorpusArgs) -> Result<()> {
    let corpus = load_corpus(&corpus_args.data, &corpus_args.load_config())
        .context("Failed to load corpus")?;

    let files: std::collections::HashSet<&str> =
        corpus.utterances.iter().map(|u| u.file_id.as_str()).collect();
    let mean_length = corpus.utterances.iter().map(|u| u.turn_length()).sum::<usize>() as f64
        / corpus.len().max(1) as f64;
    let labelled = corpus.utterances.iter().filter(|u| u.is_labeled()).count();

    println!("Corpus Analysis");
    println!("===============");
    println!("Utterances: {}", corpus.len());
    println!("Files: {}", files.len());
    println!("Rows dropped (empty sentence): {}", corpus.dropped_rows);
    println!("Mean turn length: {:.2} tokens", mean_length);
    println!(
        "Tag column: {}",
        corpus.tag_column.as_deref().unwrap_or("none")
    );
    println!("Labelled utterances: {}", labelled);
    println!();

    println!("Speakers");
    println!("--------");
    for (speaker, count) in corpus.speaker_counts() {
        println!("{}: {}", speaker, count);
    }
    println!();

    println!("Tags");
    println!("----");
    for (tag, count) in corpus.tag_counts() {
        println!(
            "{:<12} {:>7} ({:.1}%)",
            tag,
            count,
            count as f64 / labelled.max(1) as f64 * 100.0
        );
    }

    Ok(())
}

fn correlate(corpus_args: CorpusArgs, ages: PathBuf, scores: PathBuf, max_age: f64) -> Result<()> {
    let ages = load_ages(&ages)?;
    let report = ClassificationReport::load(&scores)?;
    let corpus = load_corpus(&corpus_args.data, &corpus_args.load_config())
        .context("Failed to load corpus")?;

    let adult_frequencies: BTreeMap<String, f64> = label_frequencies(
        corpus
            .utterances
            .iter()
            .filter(|u| u.speaker != Speaker::Child)
            .filter_map(|u| u.tag.as_deref()),
    );

    let inputs = AcquisitionInputs {
        ages,
        f1_scores: report.f1_scores(),
        adult_frequencies,
    };
    let analysis = analyze_acquisition(&inputs, max_age)?;
    print!("{}", analysis.format());
    Ok(())
}
