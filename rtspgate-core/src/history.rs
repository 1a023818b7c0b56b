//! In-memory, append-only store of finished session runs.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::metrics;
use crate::models::{HistoryFilter, HistoryRecord, HistoryStatus, HistorySummary};

pub struct HistoryStore {
    records: RwLock<VecDeque<Arc<HistoryRecord>>>,
    max_records: usize,
}

impl HistoryStore {
    #[must_use]
    pub fn new(max_records: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            max_records: max_records.max(1),
        }
    }

    /// Append a record, evicting the oldest once the store is full.
    pub fn append(&self, record: HistoryRecord) -> Arc<HistoryRecord> {
        let record = Arc::new(record);
        metrics::history::RECORDS_TOTAL
            .with_label_values(&[record.status.as_str()])
            .inc();

        let mut records = self.records.write();
        while records.len() >= self.max_records {
            records.pop_front();
        }
        records.push_back(Arc::clone(&record));
        record
    }

    /// Matching records, newest first.
    #[must_use]
    pub fn list(&self, filter: &HistoryFilter) -> Vec<Arc<HistoryRecord>> {
        self.records
            .read()
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: uuid::Uuid) -> Option<Arc<HistoryRecord>> {
        self.records.read().iter().find(|r| r.id == id).cloned()
    }

    #[must_use]
    pub fn summary(&self) -> HistorySummary {
        let records = self.records.read();
        records.iter().fold(HistorySummary::default(), |mut acc, r| {
            acc.total += 1;
            match r.status {
                HistoryStatus::Completed => acc.completed += 1,
                HistoryStatus::Error => acc.errors += 1,
                HistoryStatus::Terminated => acc.terminated += 1,
            }
            acc.total_viewers += r.peak_viewers;
            acc.total_bytes += r.bytes_transferred;
            acc
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionId;
    use chrono::Utc;

    fn record(name: &str, status: HistoryStatus, viewers: usize) -> HistoryRecord {
        let now = Utc::now();
        HistoryRecord {
            id: uuid::Uuid::new_v4(),
            session_id: SessionId::new(),
            name: name.to_string(),
            ingest_url: "rtmp://localhost/live/key".to_string(),
            egress_url: "rtsp://localhost:8554/key".to_string(),
            started_at: now,
            ended_at: now,
            duration_secs: 60,
            status,
            peak_viewers: viewers,
            avg_bitrate_kbps: 2500,
            bytes_transferred: 1_000,
            restart_count: 0,
            error_message: None,
        }
    }

    #[test]
    fn test_filter_by_status_and_search() {
        let store = HistoryStore::new(10);
        store.append(record("Main Stage", HistoryStatus::Completed, 10));
        store.append(record("Backstage", HistoryStatus::Error, 2));
        store.append(record("Lobby", HistoryStatus::Completed, 5));

        let completed = store.list(&HistoryFilter {
            status: Some(HistoryStatus::Completed),
            search: None,
        });
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].name, "Lobby");

        let stage = store.list(&HistoryFilter {
            status: None,
            search: Some("STAGE".to_string()),
        });
        assert_eq!(stage.len(), 2);

        let none = store.list(&HistoryFilter {
            status: Some(HistoryStatus::Terminated),
            search: Some("stage".to_string()),
        });
        assert!(none.is_empty());
    }

    #[test]
    fn test_summary_counts() {
        let store = HistoryStore::new(10);
        store.append(record("a", HistoryStatus::Completed, 10));
        store.append(record("b", HistoryStatus::Error, 2));
        store.append(record("c", HistoryStatus::Terminated, 1));

        let summary = store.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.terminated, 1);
        assert_eq!(summary.total_viewers, 13);
        assert_eq!(summary.total_bytes, 3_000);
    }

    #[test]
    fn test_oldest_evicted_when_full() {
        let store = HistoryStore::new(2);
        let first = store.append(record("first", HistoryStatus::Completed, 0));
        store.append(record("second", HistoryStatus::Completed, 0));
        store.append(record("third", HistoryStatus::Completed, 0));

        assert_eq!(store.len(), 2);
        assert!(store.get(first.id).is_none());
        // records handed out earlier stay intact
        assert_eq!(first.name, "first");
    }
}
