use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::item::ItemRef;

/// Written into an item directory only after its payload has been validated.
pub const COMPLETION_MARKER: &str = ".ingest-complete";

/// Payload layout: `<base>/<owner>/<name>/...`.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
    #[cfg(test)]
    fixed_available_space: Option<Option<u64>>,
}

#[derive(Debug, Clone)]
pub struct StorageStats {
    pub total_items: usize,
    pub total_bytes: u64,
    pub available_bytes: Option<u64>,
}

impl FileStore {
    pub fn new(base_path: &Path) -> io::Result<Self> {
        fs::create_dir_all(base_path)?;
        tracing::debug!(path = %base_path.display(), "File store ready");
        Ok(Self {
            base_path: base_path.to_path_buf(),
            #[cfg(test)]
            fixed_available_space: None,
        })
    }

    /// Pretend the volume has exactly `space` bytes free (`None` = unknown).
    #[cfg(test)]
    pub fn with_fixed_available_space(mut self, space: Option<u64>) -> Self {
        self.fixed_available_space = Some(space);
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn item_path(&self, reference: &ItemRef) -> PathBuf {
        self.base_path.join(reference.owner()).join(reference.name())
    }

    /// True only when a previous download finished and was validated.
    pub fn is_complete(&self, reference: &ItemRef) -> bool {
        self.item_path(reference).join(COMPLETION_MARKER).is_file()
    }

    /// Directory exists and holds something, complete or not.
    pub fn has_content(&self, reference: &ItemRef) -> bool {
        fs::read_dir(self.item_path(reference))
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// Free bytes on the volume holding the store, or `None` when the query
    /// fails.
    pub fn available_space(&self) -> Option<u64> {
        #[cfg(test)]
        {
            if let Some(fixed) = self.fixed_available_space {
                return fixed;
            }
        }
        match fs4::available_space(&self.base_path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to query available disk space");
                None
            }
        }
    }

    /// Number of top-level payload entries, ignoring the marker and leftover
    /// `.part` files.
    pub fn payload_entries(&self, reference: &ItemRef) -> io::Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(self.item_path(reference))? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if name != COMPLETION_MARKER && !name.ends_with(".part") {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn mark_complete(&self, reference: &ItemRef) -> io::Result<()> {
        let marker = self.item_path(reference).join(COMPLETION_MARKER);
        fs::write(marker, chrono::Utc::now().to_rfc3339())
    }

    /// Remove whatever is at the item path and recreate it empty.
    pub fn reset_dir(&self, reference: &ItemRef) -> io::Result<PathBuf> {
        let path = self.item_path(reference);
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Delete the item directory. Returns false (and logs) on failure.
    pub fn cleanup(&self, reference: &ItemRef) -> bool {
        let path = self.item_path(reference);
        if !path.exists() {
            return true;
        }
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                tracing::info!(item = %reference, "Cleaned up failed download");
                true
            }
            Err(e) => {
                tracing::error!(item = %reference, error = %e, "Failed to clean up download");
                false
            }
        }
    }

    /// Total bytes of all files under the item directory.
    pub fn item_size(&self, reference: &ItemRef) -> u64 {
        walkdir::WalkDir::new(self.item_path(reference))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// References of every completed item on disk, sorted.
    pub fn list_downloaded(&self) -> Vec<ItemRef> {
        let mut items = Vec::new();
        let Ok(owners) = fs::read_dir(&self.base_path) else {
            return items;
        };
        for owner in owners.filter_map(|e| e.ok()) {
            if !owner.path().is_dir() {
                continue;
            }
            let Ok(names) = fs::read_dir(owner.path()) else {
                continue;
            };
            for name in names.filter_map(|e| e.ok()) {
                let raw = format!(
                    "{}/{}",
                    owner.file_name().to_string_lossy(),
                    name.file_name().to_string_lossy()
                );
                if let Ok(reference) = ItemRef::parse(&raw) {
                    if self.is_complete(&reference) {
                        items.push(reference);
                    }
                }
            }
        }
        items.sort();
        items
    }

    pub fn stats(&self) -> StorageStats {
        let items = self.list_downloaded();
        StorageStats {
            total_items: items.len(),
            total_bytes: items.iter().map(|r| self.item_size(r)).sum(),
            available_bytes: self.available_space(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> ItemRef {
        ItemRef::parse(s).unwrap()
    }

    #[test]
    fn test_item_path_is_two_levels() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert_eq!(
            store.item_path(&r("alice/weather")),
            dir.path().join("alice").join("weather")
        );
    }

    #[test]
    fn test_content_without_marker_is_not_complete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let item = r("a/b");
        let path = store.reset_dir(&item).unwrap();
        fs::write(path.join("half.csv"), b"1,2").unwrap();

        assert!(store.has_content(&item));
        assert!(!store.is_complete(&item));
        store.mark_complete(&item).unwrap();
        assert!(store.is_complete(&item));
    }

    #[test]
    fn test_payload_entries_ignores_marker_and_part_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let item = r("a/b");
        let path = store.reset_dir(&item).unwrap();
        fs::write(path.join("archive.zip.part"), b"..").unwrap();
        store.mark_complete(&item).unwrap();
        assert_eq!(store.payload_entries(&item).unwrap(), 0);

        fs::create_dir(path.join("sub")).unwrap();
        fs::write(path.join("data.csv"), b"x").unwrap();
        assert_eq!(store.payload_entries(&item).unwrap(), 2);
    }

    #[test]
    fn test_reset_dir_empties_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let item = r("a/b");
        let path = store.reset_dir(&item).unwrap();
        fs::write(path.join("stale"), b"old").unwrap();

        store.reset_dir(&item).unwrap();
        assert!(path.is_dir());
        assert!(!store.has_content(&item));
    }

    #[test]
    fn test_cleanup_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let item = r("a/b");
        store.reset_dir(&item).unwrap();
        assert!(store.cleanup(&item));
        assert!(!store.item_path(&item).exists());
        // Missing directory is fine.
        assert!(store.cleanup(&item));
    }

    #[test]
    fn test_item_size_is_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let item = r("a/b");
        let path = store.reset_dir(&item).unwrap();
        fs::write(path.join("one"), vec![0u8; 10]).unwrap();
        fs::create_dir(path.join("nested")).unwrap();
        fs::write(path.join("nested/two"), vec![0u8; 5]).unwrap();
        assert_eq!(store.item_size(&item), 15);
        assert_eq!(store.item_size(&r("missing/item")), 0);
    }

    #[test]
    fn test_list_downloaded_only_reports_complete_items() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        for name in ["x/done", "a/done", "a/partial"] {
            let path = store.reset_dir(&r(name)).unwrap();
            fs::write(path.join("f"), b"1").unwrap();
        }
        store.mark_complete(&r("x/done")).unwrap();
        store.mark_complete(&r("a/done")).unwrap();
        fs::write(dir.path().join("stray-file"), b"").unwrap();

        assert_eq!(store.list_downloaded(), vec![r("a/done"), r("x/done")]);
        let stats = store.with_fixed_available_space(Some(42)).stats();
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.available_bytes, Some(42));
    }

    #[test]
    fn test_available_space_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.available_space().is_some());
        let store = store.with_fixed_available_space(None);
        assert_eq!(store.available_space(), None);
    }
}
