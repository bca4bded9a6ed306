//! netsentry CLI: runs the training-data pipeline and its standalone tools.

mod commands;

use clap::Parser;
use netsentry_core::UnseenLabelPolicy;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// netsentry: training data for network intrusion classifiers
#[derive(Parser, Debug)]
#[command(name = "netsentry", version, about, long_about = None)]
struct Cli {
    /// Workspace directory; relative paths in the configuration resolve against it
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run ingestion, validation and transformation
    Run {
        /// Fixed run id instead of the UTC timestamp
        #[arg(long)]
        run_id: Option<String>,
        /// Root directory for run artifacts
        #[arg(long)]
        artifact_dir: Option<PathBuf>,
        /// Abort after validation when any column drifted
        #[arg(long)]
        block_on_drift: bool,
    },
    /// Load a CSV file into the configured record store
    PushData {
        /// CSV file to load
        file: PathBuf,
        /// Target collection (defaults to source.collection)
        #[arg(long)]
        collection: Option<String>,
        /// Documents per insert batch
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Concatenate a train and a test CSV into one file
    Combine {
        train: PathBuf,
        test: PathBuf,
        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,
        /// Add a column naming each row's origin (train/test)
        #[arg(long, value_name = "COLUMN", num_args = 0..=1, default_missing_value = "source")]
        tag_source: Option<String>,
    },
    /// Compare two CSV files column by column for distribution drift
    Drift {
        base: PathBuf,
        current: PathBuf,
        /// p-value threshold (defaults to validation.drift_threshold)
        #[arg(long)]
        threshold: Option<f64>,
        /// Write the YAML report here
        #[arg(long)]
        report: Option<PathBuf>,
        /// Exit with an error when drift is detected
        #[arg(long)]
        fail_on_drift: bool,
    },
    /// Apply a saved transformer to a CSV file without refitting
    Replay {
        /// Saved transformer (preprocessing.json)
        #[arg(long)]
        transformer: PathBuf,
        /// Saved label encoder; appends the encoded label when the input has it
        #[arg(long)]
        label_encoder: Option<PathBuf>,
        /// Input CSV
        input: PathBuf,
        /// Output NPY path
        #[arg(short, long)]
        output: PathBuf,
        /// Handling of labels the encoder never saw
        #[arg(long, value_enum, default_value_t = PolicyArg::Abort)]
        unseen_labels: PolicyArg,
        /// Fail unless the output is bit-identical to this NPY tensor
        #[arg(long, value_name = "NPY")]
        expect: Option<PathBuf>,
    },
    /// Write a schema file describing a CSV file's columns
    InferSchema {
        input: PathBuf,
        /// Output YAML path (prints to stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file
    Init,
    /// Show the effective configuration
    Show,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PolicyArg {
    Abort,
    DropRow,
    Unknown,
}

impl From<PolicyArg> for UnseenLabelPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Abort => UnseenLabelPolicy::Abort,
            PolicyArg::DropRow => UnseenLabelPolicy::DropRow,
            PolicyArg::Unknown => UnseenLabelPolicy::Unknown,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "netsentry", "netsentry")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "netsentry.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}
