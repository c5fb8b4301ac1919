use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;

use super::error::StateError;
use super::types::{PersistedState, RunStatistics, StateSummary, STATE_VERSION};
use crate::item::ItemRef;

const STATE_FILE: &str = "tracking_state.json";
const BACKUP_FILE: &str = "tracking_state.json.backup";
const TEMP_FILE: &str = "tracking_state.json.tmp";
const LOCK_FILE: &str = "tracking_state.lock";

/// Crash-safe persistence of the processed set and run counters.
///
/// A writable manager holds an exclusive advisory lock on
/// `tracking_state.lock` for its whole lifetime, so at most one process
/// mutates a given state directory.
pub struct StateManager {
    state_dir: PathBuf,
    state_file: PathBuf,
    backup_file: PathBuf,
    temp_file: PathBuf,
    statistics: RunStatistics,
    failed_items: BTreeMap<String, String>,
    last_updated: Option<DateTime<Utc>>,
    /// `None` for read-only managers. Dropping the file releases the lock.
    lock_file: Option<File>,
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("state_dir", &self.state_dir)
            .field("read_only", &self.is_read_only())
            .field("statistics", &self.statistics)
            .finish()
    }
}

impl StateManager {
    /// Open `state_dir` for writing, creating it if needed.
    pub fn open(state_dir: &Path) -> Result<Self, StateError> {
        fs::create_dir_all(state_dir).map_err(|e| StateError::io(state_dir, e))?;

        let lock_path = state_dir.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| StateError::io(&lock_path, e))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StateError::Locked(lock_path.clone()))?;

        tracing::debug!(dir = %state_dir.display(), "Opened state directory");
        Ok(Self::with_lock(state_dir, Some(lock_file)))
    }

    /// Open `state_dir` for inspection only. Takes no lock and never rewrites
    /// the tracking files, so it is safe to use while a poller is running.
    pub fn open_read_only(state_dir: &Path) -> Self {
        Self::with_lock(state_dir, None)
    }

    fn with_lock(state_dir: &Path, lock_file: Option<File>) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
            state_file: state_dir.join(STATE_FILE),
            backup_file: state_dir.join(BACKUP_FILE),
            temp_file: state_dir.join(TEMP_FILE),
            statistics: RunStatistics::default(),
            failed_items: BTreeMap::new(),
            last_updated: None,
            lock_file,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.lock_file.is_none()
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    #[cfg(test)]
    pub fn statistics(&self) -> &RunStatistics {
        &self.statistics
    }

    pub fn failed_items(&self) -> &BTreeMap<String, String> {
        &self.failed_items
    }

    /// Persist `processed` plus the current counters.
    ///
    /// Counters passed as `Some` replace the in-memory values first. The
    /// previous primary is copied to the backup, then the new snapshot is
    /// written to a temp file, fsynced, and renamed over the primary.
    pub fn save(
        &mut self,
        processed: &HashSet<ItemRef>,
        successful: Option<u64>,
        failed: Option<u64>,
    ) -> Result<(), StateError> {
        if self.is_read_only() {
            return Err(StateError::ReadOnly);
        }
        if let Some(n) = successful {
            self.statistics.successful_downloads = n;
        }
        if let Some(n) = failed {
            self.statistics.failed_downloads = n;
        }

        let snapshot = self.snapshot(processed);
        let result = self
            .backup_primary()
            .and_then(|()| self.write_temp(&snapshot))
            .and_then(|()| self.commit());

        match result {
            Ok(()) => {
                self.last_updated = Some(snapshot.last_updated);
                tracing::debug!(
                    count = snapshot.processed_items.len(),
                    "Saved tracking state"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to save tracking state");
                Err(e)
            }
        }
    }

    fn snapshot(&mut self, processed: &HashSet<ItemRef>) -> PersistedState {
        let mut items: Vec<String> = processed.iter().map(|r| r.to_string()).collect();
        items.sort();
        self.statistics.total_processed = items.len() as u64;
        PersistedState {
            version: STATE_VERSION.to_string(),
            last_updated: Utc::now(),
            processed_items: items,
            statistics: self.statistics.clone(),
            failed_items: self.failed_items.clone(),
        }
    }

    fn backup_primary(&self) -> Result<(), StateError> {
        if self.state_file.exists() {
            fs::copy(&self.state_file, &self.backup_file)
                .map_err(|e| StateError::io(&self.backup_file, e))?;
        }
        Ok(())
    }

    fn write_temp(&self, snapshot: &PersistedState) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let mut file =
            File::create(&self.temp_file).map_err(|e| StateError::io(&self.temp_file, e))?;
        file.write_all(&json)
            .and_then(|()| file.sync_all())
            .map_err(|e| StateError::io(&self.temp_file, e))
    }

    fn commit(&self) -> Result<(), StateError> {
        fs::rename(&self.temp_file, &self.state_file)
            .map_err(|e| StateError::io(&self.state_file, e))
    }

    /// Load the processed set, falling back to the backup when the primary is
    /// missing or corrupt. Never fails: with no usable snapshot it returns an
    /// empty set and zeroed counters.
    pub fn load(&mut self) -> HashSet<ItemRef> {
        if let Some(state) = read_snapshot(&self.state_file) {
            return self.hydrate(state);
        }

        if self.backup_file.exists() {
            tracing::warn!("Primary state file unusable, trying backup");
        }
        if let Some(state) = read_snapshot(&self.backup_file) {
            if !self.is_read_only() {
                match fs::copy(&self.backup_file, &self.state_file) {
                    Ok(_) => tracing::info!("Restored primary state file from backup"),
                    Err(e) => tracing::warn!(error = %e, "Failed to repair primary from backup"),
                }
            }
            return self.hydrate(state);
        }

        tracing::info!("No valid state file found, starting with empty state");
        self.statistics = RunStatistics::default();
        self.failed_items.clear();
        self.last_updated = None;
        HashSet::new()
    }

    fn hydrate(&mut self, state: PersistedState) -> HashSet<ItemRef> {
        let mut processed = HashSet::with_capacity(state.processed_items.len());
        for raw in &state.processed_items {
            match ItemRef::parse(raw) {
                Ok(r) => {
                    processed.insert(r);
                }
                Err(e) => tracing::warn!(item = %raw, error = %e, "Skipping invalid reference in state"),
            }
        }
        self.statistics = state.statistics;
        self.statistics.total_processed = processed.len() as u64;
        self.failed_items = state.failed_items;
        self.last_updated = Some(state.last_updated);

        tracing::info!(
            processed = processed.len(),
            successful = self.statistics.successful_downloads,
            failed = self.statistics.failed_downloads,
            "Loaded tracking state"
        );
        processed
    }

    /// Copy the primary to `tracking_state_<YYYYmmdd_HHMMSS>.json.backup`.
    pub fn backup(&self) -> Result<PathBuf, StateError> {
        if !self.state_file.exists() {
            return Err(StateError::NoState(self.state_file.clone()));
        }
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = self
            .state_dir
            .join(format!("tracking_state_{}.json.backup", timestamp));
        fs::copy(&self.state_file, &path).map_err(|e| StateError::io(&path, e))?;
        tracing::info!(path = %path.display(), "Created manual state backup");
        Ok(path)
    }

    /// Replace the primary with the backup. The backup must parse.
    pub fn restore_from_backup(&mut self) -> Result<(), StateError> {
        if self.is_read_only() {
            return Err(StateError::ReadOnly);
        }
        if !self.backup_file.exists() {
            return Err(StateError::NoBackup(self.backup_file.clone()));
        }
        let raw =
            fs::read(&self.backup_file).map_err(|e| StateError::io(&self.backup_file, e))?;
        serde_json::from_slice::<PersistedState>(&raw).map_err(|source| StateError::Parse {
            path: self.backup_file.clone(),
            source,
        })?;
        fs::copy(&self.backup_file, &self.state_file)
            .map_err(|e| StateError::io(&self.state_file, e))?;
        tracing::info!("Restored state from backup");
        Ok(())
    }

    pub fn update_poll_timestamp(&mut self) {
        self.statistics.last_poll_timestamp = Some(Utc::now());
    }

    /// Add one cycle's outcome to the running counters.
    pub fn record_cycle(&mut self, successful: u64, failed: u64) {
        self.statistics.successful_downloads =
            self.statistics.successful_downloads.saturating_add(successful);
        self.statistics.failed_downloads = self.statistics.failed_downloads.saturating_add(failed);
    }

    pub fn record_failure(&mut self, reference: &ItemRef, reason: &str) {
        self.failed_items
            .insert(reference.to_string(), reason.to_string());
    }

    pub fn clear_failure(&mut self, reference: &ItemRef) -> bool {
        self.failed_items.remove(reference.as_str()).is_some()
    }

    /// Drop every failure record, returning the references that were failed.
    pub fn take_failures(&mut self) -> Vec<ItemRef> {
        std::mem::take(&mut self.failed_items)
            .into_keys()
            .filter_map(|raw| ItemRef::parse(&raw).ok())
            .collect()
    }

    pub fn summary(&self) -> StateSummary {
        StateSummary {
            state_file_exists: self.state_file.exists(),
            backup_file_exists: self.backup_file.exists(),
            total_processed: self.statistics.total_processed,
            successful_downloads: self.statistics.successful_downloads,
            failed_downloads: self.statistics.failed_downloads,
            last_poll_timestamp: self.statistics.last_poll_timestamp,
            last_updated: self.last_updated,
            failed_items: self.failed_items.len(),
        }
    }
}

fn read_snapshot(path: &Path) -> Option<PersistedState> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to read state file");
            return None;
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(state) => Some(state),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to parse state file");
            None
        }
    }
}
