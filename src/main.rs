//! catalog-ingest: polls public dataset catalogs (Kaggle, Hugging Face Hub)
//! and downloads every dataset it hasn't seen before.
//!
//! A single poll loop lists recent items, filters out the ones recorded in
//! the tracking state, downloads the rest with bounded retries, and persists
//! state after each cycle so a restart resumes where it left off.

#![warn(clippy::all)]

mod catalog;
mod cli;
mod config;
mod download;
mod item;
mod orchestrator;
mod rate_limit;
pub mod retry;
mod shutdown;
mod state;
mod storage;
mod tracker;
mod types;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Command, RunArgs, StorageArgs};
use config::{Config, StoragePaths};
use download::DownloadService;
use item::ItemRef;
use orchestrator::Orchestrator;
use rate_limit::RateLimiter;
use state::StateManager;
use storage::{FileStore, MetadataStore};
use tracker::Tracker;
use types::Platform;

/// Run the poll loop until a signal arrives (or once, with `--once`).
async fn run_service(storage_args: &StorageArgs, args: RunArgs) -> anyhow::Result<()> {
    let config = Config::from_cli(storage_args, args)?;
    tracing::info!(
        platform = config.platform.as_str(),
        poll_interval = config.poll_interval.as_secs(),
        max_items = config.max_items_per_poll,
        "Starting catalog-ingest"
    );

    let client = catalog::create_client(&config).context("Failed to create catalog client")?;
    let files = FileStore::new(&config.storage.datasets_dir).with_context(|| {
        format!(
            "Failed to create datasets directory {}",
            config.storage.datasets_dir.display()
        )
    })?;
    let metadata = MetadataStore::new(&config.storage.metadata_dir).with_context(|| {
        format!(
            "Failed to create metadata directory {}",
            config.storage.metadata_dir.display()
        )
    })?;
    let state = StateManager::open(&config.storage.state_dir)?;

    let downloads = DownloadService::new(client.clone(), files, config.retry);
    let mut orch = Orchestrator::new(
        client,
        downloads,
        metadata,
        state,
        RateLimiter::new(config.min_request_interval),
        config.orchestrator_config(),
    );

    let shutdown_token =
        shutdown::install_signal_handler().context("Failed to install signal handlers")?;
    orch.run(shutdown_token).await
}

/// Print tracking state and storage figures. Never writes.
fn run_status(paths: &StoragePaths, show_failed: bool) -> anyhow::Result<()> {
    let mut state = StateManager::open_read_only(&paths.state_dir);
    let mut tracker = Tracker::new();
    tracker.load(state.load());
    let summary = state.summary();

    println!("State directory: {}", state.state_dir().display());
    if !summary.state_file_exists {
        println!("  No state file yet. Run a poll cycle first to create one.");
    }
    println!("  Backup present: {}", if summary.backup_file_exists { "yes" } else { "no" });
    println!();
    println!("Items:");
    println!("  Processed:  {}", tracker.len());
    println!("  Succeeded:  {}", summary.successful_downloads);
    println!("  Failed:     {}", summary.failed_downloads);
    println!("  Retryable:  {}", summary.failed_items);
    println!();

    if let Some(polled) = &summary.last_poll_timestamp {
        println!("Last poll:    {}", polled.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(updated) = &summary.last_updated {
        println!("Last saved:   {}", updated.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if !tracker.is_empty() {
        let tracked = tracker.stats();
        println!();
        println!("Sample of processed items:");
        for reference in &tracked.sample {
            println!("  {}", reference);
        }
    }

    if paths.datasets_dir.is_dir() {
        let store = FileStore::new(&paths.datasets_dir)?;
        let stats = store.stats();
        println!();
        println!("Storage: {}", store.base_path().display());
        println!("  Datasets:   {}", stats.total_items);
        println!("  Bytes:      {}", stats.total_bytes);
        if let Some(free) = stats.available_bytes {
            println!("  Free:       {}", free);
        }
    }
    if paths.metadata_dir.is_dir() {
        let metadata = MetadataStore::new(&paths.metadata_dir)?;
        println!("  Metadata:   {}", metadata.count());
    }

    if show_failed && !state.failed_items().is_empty() {
        println!();
        println!("Failed items:");
        for (reference, reason) in state.failed_items() {
            println!("  {} - {}", reference, reason);
        }
    }

    Ok(())
}

/// Un-mark every recorded failure so the next cycle picks it up again.
fn run_retry_failed(paths: &StoragePaths) -> anyhow::Result<()> {
    let mut state = StateManager::open(&paths.state_dir)?;
    let mut tracker = Tracker::new();
    tracker.load(state.load());
    let failed = state.take_failures();
    if failed.is_empty() {
        println!("No failed items recorded.");
        return Ok(());
    }

    for reference in &failed {
        tracker.remove(reference);
    }
    state.save(&tracker.all_processed(), None, None)?;

    println!("Queued {} item(s) for the next poll:", failed.len());
    for reference in &failed {
        println!("  {}", reference);
    }
    Ok(())
}

/// What `forget` found and removed for one item.
#[derive(Debug, Default, PartialEq, Eq)]
struct ForgetReport {
    was_tracked: bool,
    had_failure: bool,
    removed_payload: bool,
    /// `(platform, title)` of every metadata document deleted.
    removed_metadata: Vec<(&'static str, String)>,
}

impl ForgetReport {
    fn is_empty(&self) -> bool {
        !self.was_tracked
            && !self.had_failure
            && !self.removed_payload
            && self.removed_metadata.is_empty()
    }
}

/// Drop one item from the tracking state along with anything stored for it.
fn forget_item(paths: &StoragePaths, reference: &ItemRef) -> anyhow::Result<ForgetReport> {
    let mut report = ForgetReport::default();

    let mut state = StateManager::open(&paths.state_dir)?;
    let mut tracker = Tracker::new();
    tracker.load(state.load());
    report.was_tracked = tracker.remove(reference);
    report.had_failure = state.clear_failure(reference);
    if report.was_tracked || report.had_failure {
        state.save(&tracker.all_processed(), None, None)?;
    }

    if paths.datasets_dir.is_dir() {
        let store = FileStore::new(&paths.datasets_dir)?;
        if store.item_path(reference).exists() {
            report.removed_payload = store.cleanup(reference);
        }
    }
    if paths.metadata_dir.is_dir() {
        let metadata = MetadataStore::new(&paths.metadata_dir)?;
        for platform in Platform::ALL {
            let title = metadata
                .load(platform.as_str(), reference)
                .ok()
                .flatten()
                .map(|doc| doc.title)
                .unwrap_or_default();
            if metadata.delete(platform.as_str(), reference)? {
                report.removed_metadata.push((platform.as_str(), title));
            }
        }
    }
    Ok(report)
}

fn run_forget(paths: &StoragePaths, raw: &str) -> anyhow::Result<()> {
    let reference = ItemRef::parse(raw)?;
    let report = forget_item(paths, &reference)?;

    if report.is_empty() {
        println!("{} was not tracked; nothing to forget.", reference);
        return Ok(());
    }
    println!("Forgot {}", reference);
    if report.removed_payload {
        println!("  Removed downloaded payload");
    }
    for (platform, title) in &report.removed_metadata {
        println!("  Removed {} metadata: {}", platform, title);
    }
    Ok(())
}

/// Forget every processed item and zero the counters. The previous state
/// stays available through `restore-backup`.
fn reset_state(paths: &StoragePaths) -> anyhow::Result<usize> {
    let mut state = StateManager::open(&paths.state_dir)?;
    let mut tracker = Tracker::new();
    tracker.load(state.load());
    let forgotten = tracker.len();

    tracker.clear();
    state.take_failures();
    state.save(&tracker.all_processed(), Some(0), Some(0))?;
    Ok(forgotten)
}

fn run_reset_state(paths: &StoragePaths, yes: bool) -> anyhow::Result<()> {
    if !yes {
        println!("This will forget every processed item tracked in:");
        println!("  {}", paths.state_dir.display());
        println!("The next poll will ingest everything it lists again.");
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let forgotten = reset_state(paths)?;
    println!("Forgot {} processed item(s).", forgotten);
    println!("Run `restore-backup` to undo.");
    Ok(())
}

fn run_backup(paths: &StoragePaths) -> anyhow::Result<()> {
    let state = StateManager::open_read_only(&paths.state_dir);
    let path = state.backup()?;
    println!("State backed up to {}", path.display());
    Ok(())
}

fn run_restore_backup(paths: &StoragePaths) -> anyhow::Result<()> {
    let mut state = StateManager::open(&paths.state_dir)?;
    state.restore_from_backup()?;
    let processed = state.load();
    println!(
        "Restored state from backup ({} processed item(s))",
        processed.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.storage.log_level.as_filter())),
        )
        .init();

    let paths = StoragePaths::from_args(&cli.storage);
    match cli.command {
        None => run_service(&cli.storage, cli.run).await,
        Some(Command::Run(args)) => run_service(&cli.storage, args).await,
        Some(Command::Status { failed }) => run_status(&paths, failed),
        Some(Command::RetryFailed) => run_retry_failed(&paths),
        Some(Command::Forget { reference }) => run_forget(&paths, &reference),
        Some(Command::ResetState { yes }) => run_reset_state(&paths, yes),
        Some(Command::Backup) => run_backup(&paths),
        Some(Command::RestoreBackup) => run_restore_backup(&paths),
    }
}
