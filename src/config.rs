use std::path::PathBuf;
use std::time::Duration;

use crate::catalog::{huggingface, kaggle, HubSettings, KaggleSettings};
use crate::cli::{RunArgs, StorageArgs};
use crate::orchestrator::OrchestratorConfig;
use crate::retry::RetryConfig;
use crate::types::Platform;

const MAX_POLL_INTERVAL_SECS: u64 = 86_400;
const KAGGLE_MAX_PAGE_SIZE: usize = 100;
const HUB_MAX_PAGE_SIZE: usize = 1_000;
const MAX_RECENCY_DAYS: u32 = 3_650;
const MAX_REQUEST_INTERVAL_SECS: f64 = 3_600.0;

/// On-disk locations, needed by every subcommand.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub datasets_dir: PathBuf,
    pub metadata_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl StoragePaths {
    pub fn from_args(args: &StorageArgs) -> Self {
        Self {
            datasets_dir: expand_tilde(&args.datasets_dir),
            metadata_dir: expand_tilde(&args.metadata_dir),
            state_dir: expand_tilde(&args.state_dir),
        }
    }
}

/// Validated configuration for the ingestion service. Immutable once built.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StoragePaths,
    pub kaggle: KaggleSettings,
    pub hub: HubSettings,

    pub poll_interval: Duration,
    pub min_request_interval: Duration,
    pub error_cooldown: Duration,
    pub request_timeout: Duration,
    pub max_items_per_poll: usize,
    pub retry: RetryConfig,

    pub platform: Platform,
    pub run_once: bool,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(storage: &StorageArgs, run: RunArgs) -> anyhow::Result<Self> {
        if !(1..=MAX_POLL_INTERVAL_SECS).contains(&run.poll_interval) {
            anyhow::bail!(
                "--poll-interval must be between 1 and {} seconds, got {}",
                MAX_POLL_INTERVAL_SECS,
                run.poll_interval
            );
        }
        if run.max_items_per_poll == 0 {
            anyhow::bail!("--max-items-per-poll must be at least 1");
        }
        if run.platform == Platform::Kaggle && run.max_items_per_poll > KAGGLE_MAX_PAGE_SIZE {
            anyhow::bail!(
                "--max-items-per-poll must be at most {} for Kaggle, got {}",
                KAGGLE_MAX_PAGE_SIZE,
                run.max_items_per_poll
            );
        }
        if run.platform == Platform::HuggingFace && run.max_items_per_poll > HUB_MAX_PAGE_SIZE {
            anyhow::bail!(
                "--max-items-per-poll must be at most {} for Hugging Face, got {}",
                HUB_MAX_PAGE_SIZE,
                run.max_items_per_poll
            );
        }
        if run.hf_recency_days > MAX_RECENCY_DAYS {
            anyhow::bail!(
                "--hf-recency-days must be at most {}, got {}",
                MAX_RECENCY_DAYS,
                run.hf_recency_days
            );
        }
        if !(0.0..=MAX_REQUEST_INTERVAL_SECS).contains(&run.min_request_interval) {
            anyhow::bail!(
                "--min-request-interval must be between 0 and {} seconds, got {}",
                MAX_REQUEST_INTERVAL_SECS,
                run.min_request_interval
            );
        }
        let min_request_interval = Duration::try_from_secs_f64(run.min_request_interval)
            .map_err(|e| anyhow::anyhow!("--min-request-interval is not a valid duration: {}", e))?;
        if run.retry_attempts == 0 {
            anyhow::bail!("--retry-attempts must be at least 1");
        }
        if run.retry_multiplier == 0 {
            anyhow::bail!("--retry-multiplier must be at least 1");
        }
        if run.retry_min_delay > run.retry_max_delay {
            anyhow::bail!(
                "--retry-min-delay ({}) must not exceed --retry-max-delay ({})",
                run.retry_min_delay,
                run.retry_max_delay
            );
        }
        if run.request_timeout == 0 {
            anyhow::bail!("--request-timeout must be at least 1 second");
        }

        Ok(Self {
            storage: StoragePaths::from_args(storage),
            kaggle: KaggleSettings {
                username: run.kaggle_username,
                key: run.kaggle_key,
                sort_by: run.kaggle_sort_by,
                base_url: kaggle::DEFAULT_BASE_URL.to_string(),
            },
            hub: HubSettings {
                token: run.hf_token.filter(|t| !t.is_empty()),
                sort: run.hf_sort,
                recency_days: run.hf_recency_days,
                min_downloads: run.hf_min_downloads,
                endpoint: huggingface::DEFAULT_ENDPOINT.to_string(),
            },
            poll_interval: Duration::from_secs(run.poll_interval),
            min_request_interval,
            error_cooldown: Duration::from_secs(run.error_cooldown),
            request_timeout: Duration::from_secs(run.request_timeout),
            max_items_per_poll: run.max_items_per_poll,
            retry: RetryConfig {
                max_attempts: run.retry_attempts,
                multiplier: run.retry_multiplier,
                min_delay_secs: run.retry_min_delay,
                max_delay_secs: run.retry_max_delay,
                jitter_secs: 0,
            },
            platform: run.platform,
            run_once: run.once,
        })
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: self.poll_interval,
            max_items_per_poll: self.max_items_per_poll,
            error_cooldown: self.error_cooldown,
            run_once: self.run_once,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn parse(args: &[&str]) -> anyhow::Result<Config> {
        let mut argv = vec!["catalog-ingest"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        Config::from_cli(&cli.storage, cli.run)
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Documents");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Documents"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(
            expand_tilde("/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            expand_tilde("relative/path"),
            PathBuf::from("relative/path")
        );
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = parse(&[]).unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(300));
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.delay_for_retry(0), Duration::from_secs(4));
        assert_eq!(cfg.min_request_interval, Duration::from_secs(1));
        assert!(!cfg.run_once);
    }

    #[test]
    fn test_fractional_request_interval() {
        let cfg = parse(&["--min-request-interval", "0.25"]).unwrap();
        assert_eq!(cfg.min_request_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_poll_interval_bounds() {
        assert!(parse(&["--poll-interval", "0"]).is_err());
        assert!(parse(&["--poll-interval", "86401"]).is_err());
        assert!(parse(&["--poll-interval", "86400"]).is_ok());
    }

    #[test]
    fn test_kaggle_page_size_limit() {
        assert!(parse(&["--max-items-per-poll", "101"]).is_err());
        assert!(parse(&["--platform", "huggingface", "--max-items-per-poll", "101"]).is_ok());
        assert!(parse(&["--max-items-per-poll", "0"]).is_err());
    }

    #[test]
    fn test_request_interval_upper_bound() {
        assert!(parse(&["--min-request-interval", "1e30"]).is_err());
        assert!(parse(&["--min-request-interval", "NaN"]).is_err());
        assert!(parse(&["--min-request-interval", "inf"]).is_err());
        let cfg = parse(&["--min-request-interval", "3600"]).unwrap();
        assert_eq!(cfg.min_request_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_hub_listing_bounds() {
        assert!(parse(&["--hf-recency-days", "4294967295"]).is_err());
        assert!(parse(&["--hf-recency-days", "3650"]).is_ok());
        assert!(parse(&["--platform", "huggingface", "--max-items-per-poll", "1001"]).is_err());
        assert!(parse(&["--platform", "huggingface", "--max-items-per-poll", "1000"]).is_ok());
    }

    #[test]
    fn test_retry_validation() {
        assert!(parse(&["--retry-attempts", "0"]).is_err());
        assert!(parse(&["--retry-min-delay", "90", "--retry-max-delay", "60"]).is_err());
        assert!(parse(&["--min-request-interval=-1"]).is_err());
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let cfg = parse(&["--kaggle-key", "very-secret", "--hf-token", "hf_secret"]).unwrap();
        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("hf_secret"));
    }

    #[test]
    fn test_orchestrator_config_passthrough() {
        let cfg = parse(&["--once", "--error-cooldown", "5"]).unwrap();
        let oc = cfg.orchestrator_config();
        assert!(oc.run_once);
        assert_eq!(oc.error_cooldown, Duration::from_secs(5));
    }
}
