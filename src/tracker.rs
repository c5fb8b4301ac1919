//! In-memory dedup set of item references that have already been processed.

use std::collections::HashSet;

use crate::item::ItemRef;

/// Number of references included in [`TrackerStats::sample`].
const SAMPLE_SIZE: usize = 10;

#[derive(Debug, Default)]
pub struct Tracker {
    processed: HashSet<ItemRef>,
}

#[derive(Debug, Clone)]
pub struct TrackerStats {
    pub total_processed: usize,
    pub sample: Vec<ItemRef>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_new(&self, reference: &ItemRef) -> bool {
        !self.processed.contains(reference)
    }

    /// Record `reference` as processed. Re-marking is a no-op.
    pub fn mark_processed(&mut self, reference: &ItemRef) {
        if self.processed.insert(reference.clone()) {
            tracing::debug!(item = %reference, "Marked as processed");
        } else {
            tracing::warn!(item = %reference, "Item already marked as processed");
        }
    }

    /// Snapshot of the processed set. Callers never see the live set.
    pub fn all_processed(&self) -> HashSet<ItemRef> {
        self.processed.clone()
    }

    /// Replace the processed set wholesale (startup hydration).
    pub fn load(&mut self, references: HashSet<ItemRef>) {
        tracing::info!(count = references.len(), "Loaded processed items into tracker");
        self.processed = references;
    }

    /// Un-mark `reference` so the next poll picks it up again.
    pub fn remove(&mut self, reference: &ItemRef) -> bool {
        let removed = self.processed.remove(reference);
        if removed {
            tracing::info!(item = %reference, "Removed from processed set");
        } else {
            tracing::warn!(item = %reference, "Item not in processed set");
        }
        removed
    }

    pub fn clear(&mut self) {
        let count = self.processed.len();
        self.processed.clear();
        tracing::info!(count, "Cleared tracker");
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    pub fn stats(&self) -> TrackerStats {
        let mut sample: Vec<ItemRef> = self.processed.iter().cloned().collect();
        sample.sort();
        sample.truncate(SAMPLE_SIZE);
        TrackerStats {
            total_processed: self.processed.len(),
            sample,
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
    fn test_new_reference_is_new() {
        let tracker = Tracker::new();
        assert!(tracker.is_new(&r("a/b")));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_mark_processed_is_idempotent() {
        let mut tracker = Tracker::new();
        let item = r("owner/data");
        tracker.mark_processed(&item);
        assert!(!tracker.is_new(&item));

        tracker.mark_processed(&item);
        assert!(!tracker.is_new(&item));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.all_processed().len(), 1);
    }

    #[test]
    fn test_all_processed_is_a_copy() {
        let mut tracker = Tracker::new();
        tracker.mark_processed(&r("a/one"));
        let mut snapshot = tracker.all_processed();
        snapshot.insert(r("a/two"));
        assert!(tracker.is_new(&r("a/two")));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_load_replaces_existing_set() {
        let mut tracker = Tracker::new();
        tracker.mark_processed(&r("old/item"));
        tracker.load([r("new/one"), r("new/two")].into_iter().collect());
        assert!(tracker.is_new(&r("old/item")));
        assert!(!tracker.is_new(&r("new/one")));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_remove_reports_membership() {
        let mut tracker = Tracker::new();
        tracker.mark_processed(&r("a/b"));
        assert!(tracker.remove(&r("a/b")));
        assert!(!tracker.remove(&r("a/b")));
        assert!(tracker.is_new(&r("a/b")));
    }

    #[test]
    fn test_stats_sample_is_sorted_and_bounded() {
        let mut tracker = Tracker::new();
        for i in 0..15 {
            tracker.mark_processed(&r(&format!("owner/item-{:02}", i)));
        }
        let stats = tracker.stats();
        assert_eq!(stats.total_processed, 15);
        assert_eq!(stats.sample.len(), 10);
        assert_eq!(stats.sample[0].as_str(), "owner/item-00");
    }

    #[test]
    fn test_clear_empties_tracker() {
        let mut tracker = Tracker::new();
        tracker.mark_processed(&r("a/b"));
        tracker.clear();
        assert!(tracker.is_empty());
    }
}
