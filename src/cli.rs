use clap::{Args, Parser, Subcommand};

use crate::types::{HubSort, LogLevel, Platform};

#[derive(Parser, Debug)]
#[command(
    name = "catalog-ingest",
    version,
    about = "Poll dataset catalogs and ingest new datasets",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub storage: StorageArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Poll the catalog and ingest new items (default)
    Run(RunArgs),

    /// Show tracking state and storage statistics
    Status {
        /// List every item whose last ingestion failed
        #[arg(long)]
        failed: bool,
    },

    /// Un-mark failed items so the next poll ingests them again
    RetryFailed,

    /// Un-mark one item (owner/name) so the next poll ingests it again
    Forget {
        /// Item reference, e.g. zillow/zecon
        reference: String,
    },

    /// Forget every processed item so the next poll ingests everything again
    ResetState {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Write a timestamped copy of the current state file
    Backup,

    /// Replace the state file with its automatic backup
    RestoreBackup,
}

/// Where things live on disk. Shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Directory for downloaded dataset payloads
    #[arg(long, global = true, env = "INGEST_DATASETS_DIR", default_value = "./data/datasets")]
    pub datasets_dir: String,

    /// Directory for per-dataset metadata documents
    #[arg(long, global = true, env = "INGEST_METADATA_DIR", default_value = "./data/metadata")]
    pub metadata_dir: String,

    /// Directory for the tracking state files
    #[arg(long, global = true, env = "INGEST_STATE_DIR", default_value = "./data/state")]
    pub state_dir: String,

    /// Log level (RUST_LOG overrides)
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Catalog to poll
    #[arg(long, value_enum, env = "INGEST_PLATFORM", default_value = "kaggle")]
    pub platform: Platform,

    /// Seconds between poll cycles (1-86400)
    #[arg(long, env = "INGEST_POLL_INTERVAL", default_value_t = 300)]
    pub poll_interval: u64,

    /// Maximum items requested per listing
    #[arg(long, default_value_t = 20)]
    pub max_items_per_poll: usize,

    /// Minimum seconds between listing calls (fractional allowed)
    #[arg(long, default_value_t = 1.0)]
    pub min_request_interval: f64,

    /// Download attempts per item, including the first
    #[arg(long, default_value_t = 3)]
    pub retry_attempts: u32,

    /// Backoff multiplier between attempts
    #[arg(long, default_value_t = 2)]
    pub retry_multiplier: u32,

    /// First backoff delay in seconds
    #[arg(long, default_value_t = 4)]
    pub retry_min_delay: u64,

    /// Backoff delay cap in seconds
    #[arg(long, default_value_t = 60)]
    pub retry_max_delay: u64,

    /// Seconds to wait after a failed poll cycle
    #[arg(long, default_value_t = 60)]
    pub error_cooldown: u64,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 300)]
    pub request_timeout: u64,

    /// Run a single poll cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Kaggle username
    #[arg(long, env = "KAGGLE_USERNAME")]
    pub kaggle_username: Option<String>,

    /// Kaggle API key. Prefer the KAGGLE_KEY environment variable; flags are
    /// visible in process listings.
    #[arg(long, env = "KAGGLE_KEY", hide_env_values = true)]
    pub kaggle_key: Option<String>,

    /// Kaggle listing order (updated, hottest, votes, active, published)
    #[arg(long, default_value = "updated")]
    pub kaggle_sort_by: String,

    /// Hugging Face access token (optional for public datasets)
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// How Hugging Face "trending" is approximated
    #[arg(long, value_enum, default_value = "downloads")]
    pub hf_sort: HubSort,

    /// Only keep Hugging Face datasets modified within this many days
    #[arg(long, default_value_t = 7)]
    pub hf_recency_days: u32,

    /// Only keep Hugging Face datasets with at least this many downloads
    #[arg(long, default_value_t = 100)]
    pub hf_min_downloads: u64,
}
