use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::error::CatalogError;
use super::transfer;
use super::CatalogClient;
use crate::item::{ItemDescriptor, ItemRef};

pub const DEFAULT_BASE_URL: &str = "https://www.kaggle.com/api/v1";
const PLATFORM: &str = "kaggle";
const ARCHIVE_NAME: &str = "dataset.zip";
const MAX_PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct KaggleSettings {
    pub username: Option<String>,
    pub key: Option<String>,
    /// Kaggle `sortBy` value, e.g. `updated`, `hottest`, `votes`.
    pub sort_by: String,
    pub base_url: String,
}

impl std::fmt::Debug for KaggleSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KaggleSettings")
            .field("username", &self.username)
            .field("key", &self.key.as_ref().map(|_| "********"))
            .field("sort_by", &self.sort_by)
            .field("base_url", &self.base_url)
            .finish()
    }
}

pub struct KaggleClient {
    http: Client,
    settings: KaggleSettings,
    authenticated: AtomicBool,
}

/// One entry of `datasets/list`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KaggleDataset {
    #[serde(rename = "ref")]
    reference: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    subtitle: Option<String>,
    #[serde(default)]
    creator_name: Option<String>,
    #[serde(default)]
    total_bytes: Option<u64>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    download_count: Option<u64>,
    #[serde(default)]
    vote_count: Option<u64>,
    #[serde(default)]
    license_name: Option<String>,
    #[serde(default)]
    tags: Vec<KaggleTag>,
}

#[derive(Debug, Deserialize)]
struct KaggleTag {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

impl KaggleDataset {
    fn into_descriptor(self) -> Result<ItemDescriptor, crate::item::ItemRefError> {
        let reference = ItemRef::parse(&self.reference)?;
        let mut item = ItemDescriptor::new(reference, PLATFORM);
        if let Some(title) = self.title.filter(|t| !t.is_empty()) {
            item.title = title;
        }
        item.subtitle = self.subtitle;
        item.creator_name = self.creator_name.unwrap_or_default();
        item.total_bytes = self.total_bytes.unwrap_or(0);
        item.url = self
            .url
            .unwrap_or_else(|| format!("https://www.kaggle.com/datasets/{}", item.reference));
        if let Some(ts) = self.last_updated.as_deref().and_then(transfer::parse_timestamp) {
            item.last_updated = ts;
        }
        item.download_count = self.download_count.unwrap_or(0);
        item.vote_count = self.vote_count.unwrap_or(0);
        item.license_name = self.license_name;
        item.tags = self
            .tags
            .into_iter()
            .filter_map(|t| t.name.or(t.reference))
            .collect();
        Ok(item)
    }
}

impl KaggleClient {
    pub fn new(settings: KaggleSettings, timeout: Duration) -> Result<Self, CatalogError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("catalog-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            settings,
            authenticated: AtomicBool::new(false),
        })
    }

    fn credentials(&self) -> Result<(&str, &str), CatalogError> {
        match (&self.settings.username, &self.settings.key) {
            (Some(user), Some(key)) if !user.is_empty() && !key.is_empty() => {
                Ok((user.as_str(), key.as_str()))
            }
            _ => Err(CatalogError::Authentication(
                "KAGGLE_USERNAME and KAGGLE_KEY must both be set".to_string(),
            )),
        }
    }

    fn get(&self, path: &str) -> Result<reqwest::RequestBuilder, CatalogError> {
        let (user, key) = self.credentials()?;
        let url = format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path);
        Ok(self.http.get(url).basic_auth(user, Some(key)))
    }

    fn ensure_authenticated(&self) -> Result<(), CatalogError> {
        if self.authenticated.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CatalogError::NotAuthenticated)
        }
    }

    async fn fetch_page(&self, max_count: usize, page: u32) -> Result<Vec<KaggleDataset>, CatalogError> {
        let page = page.to_string();
        let max_size = max_count.to_string();
        let request = self.get("datasets/list")?.query(&[
            ("sortBy", self.settings.sort_by.as_str()),
            ("page", page.as_str()),
            ("maxSize", max_size.as_str()),
        ]);
        let response = transfer::send(request).await?;
        response
            .json::<Vec<KaggleDataset>>()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CatalogClient for KaggleClient {
    async fn authenticate(&self) -> Result<(), CatalogError> {
        if self.authenticated.load(Ordering::Acquire) {
            tracing::debug!("Already authenticated with Kaggle");
            return Ok(());
        }
        self.credentials()?;
        // Kaggle has no whoami endpoint; a one-item listing proves the key
        // works. 401/403 already surface as `Authentication`; anything else
        // (5xx, transport) is an outage, not a credentials problem.
        self.fetch_page(1, 1).await?;
        self.authenticated.store(true, Ordering::Release);
        tracing::info!("Authenticated with Kaggle API");
        Ok(())
    }

    async fn list_recent_items(
        &self,
        max_count: usize,
        page: u32,
    ) -> Result<Vec<ItemDescriptor>, CatalogError> {
        self.ensure_authenticated()?;
        if !(1..=MAX_PAGE_SIZE).contains(&max_count) {
            return Err(CatalogError::InvalidArgument(format!(
                "max_count must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, max_count
            )));
        }
        if page == 0 {
            return Err(CatalogError::InvalidArgument("page starts at 1".to_string()));
        }

        let raw = self.fetch_page(max_count, page).await?;
        let items: Vec<ItemDescriptor> = raw
            .into_iter()
            .filter_map(|d| {
                let reference = d.reference.clone();
                match d.into_descriptor() {
                    Ok(item) => Some(item),
                    Err(e) => {
                        tracing::warn!(item = %reference, error = %e, "Skipping unparseable dataset");
                        None
                    }
                }
            })
            .collect();
        tracing::info!(count = items.len(), page, "Fetched datasets from Kaggle");
        Ok(items)
    }

    async fn fetch_item(&self, reference: &ItemRef, destination: &Path) -> Result<(), CatalogError> {
        self.ensure_authenticated()?;
        tokio::fs::create_dir_all(destination).await?;

        let archive = destination.join(ARCHIVE_NAME);
        let request = self.get(&format!("datasets/download/{}", reference))?;
        let bytes = transfer::download_to(request, &archive).await?;
        tracing::debug!(item = %reference, bytes, "Fetched Kaggle archive");

        let files = transfer::extract_zip(&archive, destination).await;
        tokio::fs::remove_file(&archive).await?;
        let files = files?;
        tracing::info!(item = %reference, files, "Extracted Kaggle dataset");
        Ok(())
    }

    fn platform_name(&self) -> &'static str {
        PLATFORM
    }
}
