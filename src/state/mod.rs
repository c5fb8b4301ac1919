//! Durable tracking state.
//!
//! The processed-item set and run counters live in a single JSON snapshot
//! (`tracking_state.json`) that is replaced atomically on every save. The
//! previous snapshot is kept as `tracking_state.json.backup` and is used only
//! when the primary is missing or unreadable.

pub mod error;
pub mod manager;
pub mod types;

pub use error::StateError;
pub use manager::StateManager;
pub use types::{PersistedState, RunStatistics, StateSummary};
