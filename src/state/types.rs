//! Types for the state tracking module.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format version written into every snapshot.
pub const STATE_VERSION: &str = "1.0";

/// Run counters owned by the state manager.
///
/// Counters only ever grow over the lifetime of a state directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    #[serde(default)]
    pub total_processed: u64,
    #[serde(default)]
    pub last_poll_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub successful_downloads: u64,
    #[serde(default)]
    pub failed_downloads: u64,
}

/// On-disk snapshot layout of `tracking_state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    /// Sorted for stable diffs between snapshots.
    #[serde(alias = "processed_datasets")]
    pub processed_items: Vec<String>,
    #[serde(default)]
    pub statistics: RunStatistics,
    /// Reference -> reason for items whose most recent ingestion failed.
    #[serde(default)]
    pub failed_items: BTreeMap<String, String>,
}

/// Snapshot of the state manager for `status` output.
#[derive(Debug, Clone)]
pub struct StateSummary {
    pub state_file_exists: bool,
    pub backup_file_exists: bool,
    pub total_processed: u64,
    pub successful_downloads: u64,
    pub failed_downloads: u64,
    pub last_poll_timestamp: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub failed_items: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_optional_sections_default() {
        let json = r#"{
            "version": "1.0",
            "last_updated": "2024-05-01T12:00:00Z",
            "processed_items": ["a/b"]
        }"#;
        let state: PersistedState = serde_json::from_str(json).unwrap();
        assert_eq!(state.processed_items, vec!["a/b"]);
        assert_eq!(state.statistics, RunStatistics::default());
        assert!(state.failed_items.is_empty());
    }

    #[test]
    fn test_accepts_legacy_field_name() {
        let json = r#"{
            "version": "1.0",
            "last_updated": "2024-05-01T12:00:00Z",
            "processed_datasets": ["x/y", "z/w"],
            "statistics": {"successful_downloads": 2, "failed_downloads": 1}
        }"#;
        let state: PersistedState = serde_json::from_str(json).unwrap();
        assert_eq!(state.processed_items.len(), 2);
        assert_eq!(state.statistics.successful_downloads, 2);
        assert_eq!(state.statistics.failed_downloads, 1);
        assert!(state.statistics.last_poll_timestamp.is_none());
    }
}
