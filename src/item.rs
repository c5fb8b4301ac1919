//! Catalog item identity and per-item ingestion metadata.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemRefError {
    #[error("item reference is empty")]
    Empty,
    #[error("item reference '{0}' must have the form 'owner/name' with exactly one '/'")]
    Separator(String),
    #[error("item reference '{0}' has an empty or unsafe path component")]
    Component(String),
}

/// Unique `owner/name` key of a catalog item.
///
/// Doubles as the dedup key and as the two-level relative storage path, so
/// both halves are guaranteed to be plain path components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemRef(String);

impl ItemRef {
    pub fn parse(s: &str) -> Result<Self, ItemRefError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ItemRefError::Empty);
        }
        let mut parts = s.split('/');
        let (owner, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) => (owner, name),
            _ => return Err(ItemRefError::Separator(s.to_string())),
        };
        let bad = |c: &str| c.is_empty() || c == "." || c == ".." || c.contains('\\');
        if bad(owner) || bad(name) {
            return Err(ItemRefError::Component(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn owner(&self) -> &str {
        self.split().0
    }

    pub fn name(&self) -> &str {
        self.split().1
    }

    fn split(&self) -> (&str, &str) {
        // Validated at construction: exactly one separator.
        self.0.split_once('/').unwrap_or((&self.0, ""))
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ItemRef {
    type Err = ItemRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ItemRef {
    type Error = ItemRefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ItemRef> for String {
    fn from(value: ItemRef) -> Self {
        value.0
    }
}

/// Ingestion status of an item within one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Transitions only move forward; terminal states are never left.
    pub fn can_transition_to(&self, next: IngestionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Self::Pending, Self::Downloading | Self::Completed | Self::Failed) => true,
            (Self::Downloading, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }
}

/// Metadata for one catalog item, carried from listing through download to
/// its final disposition (and written out by the metadata store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDescriptor {
    pub reference: ItemRef,
    pub platform: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub creator_name: String,
    #[serde(default)]
    pub url: String,
    /// Declared payload size; zero when the provider does not report one.
    #[serde(default)]
    pub total_bytes: u64,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub download_count: u64,
    #[serde(default)]
    pub vote_count: u64,
    #[serde(default)]
    pub license_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,

    pub status: IngestionStatus,
    #[serde(default)]
    pub ingestion_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ItemDescriptor {
    pub fn new(reference: ItemRef, platform: &str) -> Self {
        let title = reference.name().replace(['-', '_'], " ");
        Self {
            reference,
            platform: platform.to_string(),
            title,
            subtitle: None,
            creator_name: String::new(),
            url: String::new(),
            total_bytes: 0,
            last_updated: Utc::now(),
            download_count: 0,
            vote_count: 0,
            license_name: None,
            tags: Vec::new(),
            status: IngestionStatus::Pending,
            ingestion_timestamp: None,
            local_path: None,
            error_message: None,
        }
    }

    /// Move to `next` if the transition is allowed. Returns whether it was applied.
    pub fn advance(&mut self, next: IngestionStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            tracing::warn!(
                item = %self.reference,
                from = self.status.as_str(),
                to = next.as_str(),
                "Ignoring backwards status transition"
            );
            false
        }
    }
}
