//! Scripted in-process catalog used by download and orchestrator tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CatalogClient, CatalogError};
use crate::item::{ItemDescriptor, ItemRef};

/// Payload file written by a successful scripted fetch.
pub const PAYLOAD_FILE: &str = "data.csv";

#[derive(Default)]
pub struct ScriptedClient {
    /// Returned when `scripted_listings` is empty.
    listing: Vec<ItemDescriptor>,
    scripted_listings: Mutex<VecDeque<Result<Vec<ItemDescriptor>, CatalogError>>>,
    /// Every fetch of these fails.
    failing: HashSet<ItemRef>,
    /// Fetch succeeds but leaves the destination empty.
    hollow: HashSet<ItemRef>,
    /// Remaining forced failures before a fetch succeeds.
    flaky: Mutex<HashMap<ItemRef, u32>>,
    reject_auth: bool,
    fetch_calls: Mutex<HashMap<ItemRef, u32>>,
    list_calls: AtomicU32,
    auth_calls: AtomicU32,
}

pub fn item(reference: &str, total_bytes: u64) -> ItemDescriptor {
    let mut item = ItemDescriptor::new(ItemRef::parse(reference).unwrap(), "mock");
    item.total_bytes = total_bytes;
    item
}

impl ScriptedClient {
    pub fn new(listing: Vec<ItemDescriptor>) -> Self {
        Self {
            listing,
            ..Self::default()
        }
    }

    pub fn failing(mut self, reference: &str) -> Self {
        self.failing.insert(ItemRef::parse(reference).unwrap());
        self
    }

    pub fn hollow(mut self, reference: &str) -> Self {
        self.hollow.insert(ItemRef::parse(reference).unwrap());
        self
    }

    pub fn flaky(self, reference: &str, failures: u32) -> Self {
        self.flaky
            .lock()
            .unwrap()
            .insert(ItemRef::parse(reference).unwrap(), failures);
        self
    }

    pub fn rejecting_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    /// Queue a one-shot listing result ahead of the default listing.
    pub fn then_list(self, result: Result<Vec<ItemDescriptor>, CatalogError>) -> Self {
        self.scripted_listings.lock().unwrap().push_back(result);
        self
    }

    pub fn fetch_count(&self, reference: &str) -> u32 {
        let reference = ItemRef::parse(reference).unwrap();
        self.fetch_calls
            .lock()
            .unwrap()
            .get(&reference)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_fetches(&self) -> u32 {
        self.fetch_calls.lock().unwrap().values().sum()
    }

    pub fn list_count(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn auth_count(&self) -> u32 {
        self.auth_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogClient for ScriptedClient {
    async fn authenticate(&self) -> Result<(), CatalogError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_auth {
            return Err(CatalogError::Authentication("scripted rejection".into()));
        }
        Ok(())
    }

    async fn list_recent_items(
        &self,
        max_count: usize,
        _page: u32,
    ) -> Result<Vec<ItemDescriptor>, CatalogError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scripted_listings.lock().unwrap().pop_front();
        let mut items = match scripted {
            Some(result) => result?,
            None => self.listing.clone(),
        };
        items.truncate(max_count);
        Ok(items)
    }

    async fn fetch_item(&self, reference: &ItemRef, destination: &Path) -> Result<(), CatalogError> {
        *self
            .fetch_calls
            .lock()
            .unwrap()
            .entry(reference.clone())
            .or_insert(0) += 1;

        std::fs::create_dir_all(destination)?;
        // Something partial lands on disk before the failure.
        std::fs::write(destination.join("partial.bin.part"), b"...")?;

        if self.failing.contains(reference) {
            return Err(CatalogError::ApiStatus {
                status: 503,
                url: format!("mock://{}", reference),
            });
        }
        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(reference) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(CatalogError::Decode("scripted transient failure".into()));
                }
            }
        }

        std::fs::remove_file(destination.join("partial.bin.part"))?;
        if !self.hollow.contains(reference) {
            std::fs::write(destination.join(PAYLOAD_FILE), b"id,value\n1,2\n")?;
        }
        Ok(())
    }

    fn platform_name(&self) -> &'static str {
        "mock"
    }
}
