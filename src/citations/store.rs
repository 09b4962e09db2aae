use std::collections::BTreeMap;

use crate::citations::resolver::resolve_record;
use crate::models::{CitationRecord, UploadedFileDescriptor};

/// Citation records for the response currently streaming, keyed by id.
///
/// Owned by one response's processing loop. When the response completes the
/// final message takes `snapshot()` and the store is cleared.
#[derive(Debug, Clone, Default)]
pub struct CitationStore {
    records: BTreeMap<u32, CitationRecord>,
}

impl CitationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the record under its id.
    pub fn put(&mut self, record: CitationRecord) {
        if self.records.contains_key(&record.id) {
            log::debug!("citation {} replaced", record.id);
        }
        self.records.insert(record.id, record);
    }

    pub fn get(&self, id: u32) -> Option<&CitationRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.records.contains_key(&id)
    }

    /// Deep copy ordered by id.
    pub fn snapshot(&self) -> Vec<CitationRecord> {
        self.records.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Retries file resolution for every unresolved document citation.
    /// Returns the ids that became file-backed.
    pub fn resolve_pending(&mut self, files: &[UploadedFileDescriptor]) -> Vec<u32> {
        self.records
            .values_mut()
            .filter(|record| record.needs_resolution())
            .filter_map(|record| resolve_record(record, files).then_some(record.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CitationKind;

    #[test]
    fn test_put_get_snapshot_clear() {
        let mut store = CitationStore::new();
        store.put(CitationRecord::new(2, CitationKind::Web, "Second").with_url("https://b.io"));
        store.put(CitationRecord::new(1, CitationKind::Document, "First"));

        assert_eq!(store.get(1).unwrap().title, "First");
        assert!(store.get(7).is_none());

        let snapshot = store.snapshot();
        let ids: Vec<u32> = snapshot.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_resolve_pending_after_late_upload() {
        let mut store = CitationStore::new();
        store.put(CitationRecord::new(1, CitationKind::Document, "contract.pdf"));
        store.put(CitationRecord::new(2, CitationKind::Web, "contract.pdf"));

        assert!(store.resolve_pending(&[]).is_empty());

        let files = vec![UploadedFileDescriptor::new("h-1", "Contract.PDF", "application/pdf")];
        assert_eq!(store.resolve_pending(&files), vec![1]);
        assert_eq!(store.get(1).unwrap().file_handle.as_deref(), Some("h-1"));
        assert!(store.get(2).unwrap().file_handle.is_none());
    }
}
