use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::item::{ItemDescriptor, ItemRef};

/// One pretty-printed JSON document per ingested item, in a flat directory:
/// `<base>/<platform>_<owner>__<name>.json`.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    base_path: PathBuf,
}

impl MetadataStore {
    pub fn new(base_path: &Path) -> io::Result<Self> {
        fs::create_dir_all(base_path)?;
        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn path_for(&self, platform: &str, reference: &ItemRef) -> PathBuf {
        self.base_path.join(format!(
            "{}_{}__{}.json",
            platform,
            reference.owner(),
            reference.name()
        ))
    }

    /// Write the descriptor via temp file + rename.
    pub fn save(&self, item: &ItemDescriptor) -> io::Result<PathBuf> {
        let path = self.path_for(&item.platform, &item.reference);
        let tmp = path.with_extension("json.tmp");

        let result = (|| {
            let json = serde_json::to_vec_pretty(item)?;
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        })();

        match result {
            Ok(()) => {
                tracing::debug!(item = %item.reference, path = %path.display(), "Saved metadata");
                Ok(path)
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e)
            }
        }
    }

    pub fn load(&self, platform: &str, reference: &ItemRef) -> io::Result<Option<ItemDescriptor>> {
        let path = self.path_for(platform, reference);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Returns whether a document was removed.
    pub fn delete(&self, platform: &str, reference: &ItemRef) -> io::Result<bool> {
        match fs::remove_file(self.path_for(platform, reference)) {
            Ok(()) => {
                tracing::info!(item = %reference, "Deleted metadata");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn count(&self) -> usize {
        fs::read_dir(&self.base_path)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().ends_with(".json"))
                    .count()
            })
            .unwrap_or(0)
    }
}
