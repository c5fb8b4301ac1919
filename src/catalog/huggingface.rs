use std::path::{Component, Path};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::error::CatalogError;
use super::transfer;
use super::CatalogClient;
use crate::item::{ItemDescriptor, ItemRef};
use crate::types::HubSort;

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
const PLATFORM: &str = "huggingface";
/// Listing over-fetch factor to leave room for client-side filtering.
const OVERFETCH: usize = 10;

#[derive(Clone)]
pub struct HubSettings {
    /// Optional; anonymous access only sees public datasets.
    pub token: Option<String>,
    pub sort: HubSort,
    pub recency_days: u32,
    pub min_downloads: u64,
    pub endpoint: String,
}

impl std::fmt::Debug for HubSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubSettings")
            .field("token", &self.token.as_ref().map(|_| "********"))
            .field("sort", &self.sort)
            .field("recency_days", &self.recency_days)
            .field("min_downloads", &self.min_downloads)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Hugging Face Hub client. "Trending" is approximated by sorting on
/// downloads or last-modified and filtering the result client-side.
pub struct HuggingFaceClient {
    http: Client,
    settings: HubSettings,
    authenticated: AtomicBool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HubDataset {
    id: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    last_modified: Option<String>,
    #[serde(default)]
    downloads: Option<u64>,
    #[serde(default)]
    likes: Option<u64>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    card_data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct HubDatasetInfo {
    #[serde(default)]
    siblings: Vec<HubSibling>,
}

#[derive(Debug, Deserialize)]
struct HubSibling {
    rfilename: String,
}

impl HubDataset {
    fn license(&self) -> Option<String> {
        match self.card_data.as_ref()?.get("license")? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(values) => values.first()?.as_str().map(String::from),
            _ => None,
        }
    }

    fn into_descriptor(self, last_modified: DateTime<Utc>) -> Result<ItemDescriptor, crate::item::ItemRefError> {
        let reference = ItemRef::parse(&self.id)?;
        let license = self.license();
        let mut item = ItemDescriptor::new(reference, PLATFORM);
        item.title = title_case(&item.title);
        item.creator_name = self
            .author
            .unwrap_or_else(|| item.reference.owner().to_string());
        item.url = format!("https://huggingface.co/datasets/{}", item.reference);
        item.last_updated = last_modified;
        item.download_count = self.downloads.unwrap_or(0);
        item.vote_count = self.likes.unwrap_or(0);
        item.license_name = license;
        item.tags = self.tags;
        Ok(item)
    }
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keep datasets modified within `recency_days` of `now` and downloaded at
/// least `min_downloads` times, in listing order, up to `max_count`.
fn select_trending(
    raw: Vec<HubDataset>,
    now: DateTime<Utc>,
    recency_days: u32,
    min_downloads: u64,
    max_count: usize,
) -> Vec<ItemDescriptor> {
    let cutoff = now
        .checked_sub_signed(chrono::Duration::days(i64::from(recency_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let mut selected = Vec::new();
    for dataset in raw {
        let Some(modified) = dataset.last_modified.as_deref().and_then(transfer::parse_timestamp)
        else {
            continue;
        };
        if modified < cutoff || dataset.downloads.unwrap_or(0) < min_downloads {
            continue;
        }
        let id = dataset.id.clone();
        match dataset.into_descriptor(modified) {
            Ok(item) => selected.push(item),
            Err(e) => tracing::debug!(item = %id, error = %e, "Skipping dataset without owner/name id"),
        }
        if selected.len() >= max_count {
            break;
        }
    }
    selected
}

/// Repository file names are relative paths; refuse anything that could
/// land outside the destination directory.
fn is_safe_relative(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

impl HuggingFaceClient {
    pub fn new(settings: HubSettings, timeout: Duration) -> Result<Self, CatalogError> {
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

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.settings.endpoint.trim_end_matches('/'), path);
        let request = self.http.get(url);
        match &self.settings.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn ensure_authenticated(&self) -> Result<(), CatalogError> {
        if self.authenticated.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CatalogError::NotAuthenticated)
        }
    }
}

#[async_trait]
impl CatalogClient for HuggingFaceClient {
    async fn authenticate(&self) -> Result<(), CatalogError> {
        if self.authenticated.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.settings.token.is_some() {
            transfer::send(self.get("api/whoami-v2"))
                .await
                .map_err(|e| match e {
                    CatalogError::ApiStatus { status, .. } => CatalogError::Authentication(
                        format!("Hugging Face rejected token (HTTP {})", status),
                    ),
                    other => other,
                })?;
            tracing::info!("Authenticated with Hugging Face Hub (token)");
        } else {
            tracing::info!("Using Hugging Face Hub anonymously (public datasets only)");
        }
        self.authenticated.store(true, Ordering::Release);
        Ok(())
    }

    /// `page` is accepted for interface parity but the Hub listing is
    /// filtered client-side, so only the first page is meaningful.
    async fn list_recent_items(
        &self,
        max_count: usize,
        page: u32,
    ) -> Result<Vec<ItemDescriptor>, CatalogError> {
        self.ensure_authenticated()?;
        if max_count == 0 {
            return Err(CatalogError::InvalidArgument("max_count must be at least 1".to_string()));
        }
        if page > 1 {
            tracing::debug!(page, "Hub listing ignores pagination");
        }

        let fetch_limit = max_count.saturating_mul(OVERFETCH).to_string();
        let request = self.get("api/datasets").query(&[
            ("sort", self.settings.sort.as_query()),
            ("direction", "-1"),
            ("limit", fetch_limit.as_str()),
            ("full", "true"),
        ]);
        let raw: Vec<HubDataset> = transfer::send(request)
            .await?
            .json()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))?;
        let fetched = raw.len();

        let items = select_trending(
            raw,
            Utc::now(),
            self.settings.recency_days,
            self.settings.min_downloads,
            max_count,
        );
        tracing::info!(
            count = items.len(),
            fetched,
            "Selected trending datasets from Hugging Face"
        );
        Ok(items)
    }

    async fn fetch_item(&self, reference: &ItemRef, destination: &Path) -> Result<(), CatalogError> {
        self.ensure_authenticated()?;
        tokio::fs::create_dir_all(destination).await?;

        let info: HubDatasetInfo = transfer::send(self.get(&format!("api/datasets/{}", reference)))
            .await?
            .json()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))?;
        if info.siblings.is_empty() {
            return Err(CatalogError::Decode(format!("{} lists no files", reference)));
        }

        let mut total: u64 = 0;
        for sibling in &info.siblings {
            if !is_safe_relative(&sibling.rfilename) {
                tracing::warn!(item = %reference, file = %sibling.rfilename, "Skipping unsafe file name");
                continue;
            }
            let target = destination.join(&sibling.rfilename);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let request = self.get(&format!(
                "datasets/{}/resolve/main/{}",
                reference, sibling.rfilename
            ));
            total += transfer::download_to(request, &target).await?;
        }
        tracing::info!(
            item = %reference,
            files = info.siblings.len(),
            bytes = total,
            "Fetched Hugging Face dataset"
        );
        Ok(())
    }

    fn platform_name(&self) -> &'static str {
        PLATFORM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(json: &str) -> Vec<HubDataset> {
        serde_json::from_str(json).unwrap()
    }

    fn now() -> DateTime<Utc> {
        transfer::parse_timestamp("2024-06-30T00:00:00Z").unwrap()
    }

    #[test]
    fn test_select_filters_by_recency_and_downloads() {
        let raw = listing(
            r#"[
                {"id": "org/fresh-popular", "lastModified": "2024-06-25T00:00:00.000Z", "downloads": 500},
                {"id": "org/stale", "lastModified": "2024-01-01T00:00:00.000Z", "downloads": 9000},
                {"id": "org/fresh-unpopular", "lastModified": "2024-06-29T00:00:00.000Z", "downloads": 3},
                {"id": "org/undated", "downloads": 1000},
                {"id": "legacy-no-owner", "lastModified": "2024-06-29T00:00:00.000Z", "downloads": 1000}
            ]"#,
        );
        let items = select_trending(raw, now(), 7, 100, 10);
        let refs: Vec<&str> = items.iter().map(|i| i.reference.as_str()).collect();
        assert_eq!(refs, vec!["org/fresh-popular"]);
    }

    #[test]
    fn test_select_stops_at_max_count() {
        let raw = listing(
            r#"[
                {"id": "a/one", "lastModified": "2024-06-29T00:00:00Z", "downloads": 10},
                {"id": "a/two", "lastModified": "2024-06-29T00:00:00Z", "downloads": 10},
                {"id": "a/three", "lastModified": "2024-06-29T00:00:00Z", "downloads": 10}
            ]"#,
        );
        assert_eq!(select_trending(raw, now(), 7, 0, 2).len(), 2);
    }

    #[test]
    fn test_huge_recency_window_keeps_everything_dated() {
        let raw = listing(
            r#"[
                {"id": "a/ancient", "lastModified": "1999-01-01T00:00:00Z", "downloads": 10},
                {"id": "a/undated", "downloads": 10}
            ]"#,
        );
        let items = select_trending(raw, now(), u32::MAX, 0, 5);
        let refs: Vec<&str> = items.iter().map(|i| i.reference.as_str()).collect();
        assert_eq!(refs, vec!["a/ancient"]);
    }

    #[test]
    fn test_descriptor_fields() {
        let raw = listing(
            r#"[{
                "id": "HuggingFaceFW/fine_web-edu",
                "lastModified": "2024-06-29T00:00:00Z",
                "downloads": 42,
                "likes": 7,
                "tags": ["language:en"],
                "cardData": {"license": ["odc-by", "other"]}
            }]"#,
        );
        let item = select_trending(raw, now(), 7, 0, 1).remove(0);
        assert_eq!(item.platform, "huggingface");
        assert_eq!(item.title, "Fine Web Edu");
        assert_eq!(item.creator_name, "HuggingFaceFW");
        assert_eq!(item.vote_count, 7);
        assert_eq!(item.license_name.as_deref(), Some("odc-by"));
        assert_eq!(item.url, "https://huggingface.co/datasets/HuggingFaceFW/fine_web-edu");
    }

    #[test]
    fn test_safe_relative_names() {
        assert!(is_safe_relative("data/train-00000.parquet"));
        assert!(is_safe_relative("README.md"));
        assert!(!is_safe_relative("../outside"));
        assert!(!is_safe_relative("/etc/passwd"));
        assert!(!is_safe_relative(""));
    }

    #[tokio::test]
    async fn test_anonymous_authentication_succeeds_offline() {
        let client = HuggingFaceClient::new(
            HubSettings {
                token: None,
                sort: HubSort::Downloads,
                recency_days: 7,
                min_downloads: 0,
                endpoint: DEFAULT_ENDPOINT.to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(client.list_recent_items(5, 1).await.is_err());
        client.authenticate().await.unwrap();
        assert!(client.ensure_authenticated().is_ok());
        assert!(matches!(
            client.list_recent_items(0, 1).await,
            Err(CatalogError::InvalidArgument(_))
        ));
    }
}
