//! Local on-disk layout for downloaded payloads and their metadata documents.

pub mod file_store;
pub mod metadata_store;

pub use file_store::{FileStore, StorageStats};
pub use metadata_store::MetadataStore;
