//! Per-item download: capacity check, bounded-retry fetch, validation and
//! cleanup. Every failure leaves no directory behind for the item; every
//! success leaves the payload plus a completion marker.

pub mod error;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use crate::catalog::CatalogClient;
use crate::item::{IngestionStatus, ItemDescriptor, ItemRef};
use crate::retry::{self, RetryAction, RetryConfig};
use crate::storage::FileStore;

pub use error::DownloadError;

/// Free space required relative to the declared payload size, leaving room
/// for the archive and its extracted contents side by side.
const SPACE_FACTOR: u64 = 2;

pub struct DownloadService {
    client: Arc<dyn CatalogClient>,
    store: FileStore,
    retry: RetryConfig,
}

impl DownloadService {
    pub fn new(client: Arc<dyn CatalogClient>, store: FileStore, retry: RetryConfig) -> Self {
        Self {
            client,
            store,
            retry,
        }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Download `item` and record its final disposition on it.
    ///
    /// Never propagates an error: the result is reflected in the return
    /// value, `item.status` and `item.error_message`, which reads
    /// `"<kind>: <message>"` on failure.
    pub async fn download(&self, item: &mut ItemDescriptor) -> bool {
        self.download_detailed(item).await.is_ok()
    }

    /// Like [`download`](Self::download) but hands back the failure so the
    /// caller can record its kind.
    pub async fn download_detailed(
        &self,
        item: &mut ItemDescriptor,
    ) -> Result<PathBuf, DownloadError> {
        let result = self.try_download(item).await;
        match &result {
            Ok(path) => {
                item.local_path = Some(path.clone());
                item.ingestion_timestamp = Some(Utc::now());
                item.error_message = None;
                item.advance(IngestionStatus::Completed);
            }
            Err(e) => {
                self.store.cleanup(&item.reference);
                item.error_message = Some(format!("{}: {}", e.kind(), e));
                item.advance(IngestionStatus::Failed);
                tracing::error!(item = %item.reference, kind = e.kind(), "Download failed: {}", e);
            }
        }
        result
    }

    async fn try_download(&self, item: &mut ItemDescriptor) -> Result<PathBuf, DownloadError> {
        let reference = item.reference.clone();
        let target = self.store.item_path(&reference);

        if self.store.is_complete(&reference) {
            tracing::info!(item = %reference, "Already downloaded, skipping fetch");
            return Ok(target);
        }
        if self.store.has_content(&reference) {
            tracing::warn!(item = %reference, "Found interrupted download, fetching again");
        }

        self.check_space(item.total_bytes)?;

        item.advance(IngestionStatus::Downloading);
        tracing::info!(item = %reference, bytes = item.total_bytes, "Downloading");

        retry::retry_with_backoff(
            &self.retry,
            |e: &DownloadError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            |attempt| self.attempt(&reference, attempt),
        )
        .await
        .map_err(|e| {
            if e.is_retryable() {
                DownloadError::RetriesExhausted {
                    attempts: self.retry.max_attempts.max(1),
                    last_error: e.to_string(),
                }
            } else {
                e
            }
        })?;

        self.validate(&reference)?;
        self.store.mark_complete(&reference)?;
        tracing::info!(
            item = %reference,
            bytes = self.store.item_size(&reference),
            "Download complete"
        );
        Ok(target)
    }

    /// One fetch into a freshly emptied target directory.
    async fn attempt(&self, reference: &ItemRef, attempt: u32) -> Result<(), DownloadError> {
        if attempt > 0 {
            tracing::debug!(item = %reference, attempt = attempt + 1, "Retrying fetch");
        }
        let destination = self.store.reset_dir(reference)?;
        self.client.fetch_item(reference, &destination).await?;
        Ok(())
    }

    fn check_space(&self, declared: u64) -> Result<(), DownloadError> {
        let Some(available) = self.store.available_space() else {
            return Ok(());
        };
        let required = declared.saturating_mul(SPACE_FACTOR);
        if available < required {
            return Err(DownloadError::InsufficientSpace {
                required,
                available,
            });
        }
        Ok(())
    }

    fn validate(&self, reference: &ItemRef) -> Result<(), DownloadError> {
        match self.store.payload_entries(reference) {
            Ok(0) => Err(DownloadError::Validation(format!(
                "{} contains no files",
                self.store.item_path(reference).display()
            ))),
            Ok(_) => Ok(()),
            Err(e) => Err(DownloadError::Validation(format!(
                "{} is not readable: {}",
                self.store.item_path(reference).display(),
                e
            ))),
        }
    }
}
