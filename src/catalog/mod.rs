//! Catalog clients: the listing and download side of ingestion.

pub mod error;
pub mod huggingface;
pub mod kaggle;
#[cfg(test)]
pub mod mock;
pub mod transfer;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

pub use error::CatalogError;
pub use huggingface::{HubSettings, HuggingFaceClient};
pub use kaggle::{KaggleClient, KaggleSettings};

use crate::config::Config;
use crate::item::{ItemDescriptor, ItemRef};
use crate::types::Platform;

/// Capability set every catalog provider implements.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Verify credentials. Idempotent; fails with
    /// [`CatalogError::Authentication`] on rejected or missing credentials.
    async fn authenticate(&self) -> Result<(), CatalogError>;

    /// Most recent items, newest first. `page` starts at 1.
    async fn list_recent_items(
        &self,
        max_count: usize,
        page: u32,
    ) -> Result<Vec<ItemDescriptor>, CatalogError>;

    /// Download the payload of `reference` into `destination`.
    async fn fetch_item(&self, reference: &ItemRef, destination: &Path) -> Result<(), CatalogError>;

    fn platform_name(&self) -> &'static str;
}

/// Build the client for the configured platform.
pub fn create_client(config: &Config) -> Result<Arc<dyn CatalogClient>, CatalogError> {
    let client: Arc<dyn CatalogClient> = match config.platform {
        Platform::Kaggle => Arc::new(KaggleClient::new(
            config.kaggle.clone(),
            config.request_timeout,
        )?),
        Platform::HuggingFace => Arc::new(HuggingFaceClient::new(
            config.hub.clone(),
            config.request_timeout,
        )?),
    };
    tracing::debug!(platform = client.platform_name(), "Created catalog client");
    Ok(client)
}
