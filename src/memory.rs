//! In-process backend with the same optimistic semantics as Postgres.
//!
//! Transactions stage their writes and validate summary versions when they
//! commit, so concurrent writers to one key race exactly as they would
//! against the database while writers to different keys never conflict.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{LedgerTotals, PointRecord, StudentClassKey, StudentPointsSummary, VersionedSummary};
use crate::store::{HistoryFilter, PointsStore, PointsTx};

#[derive(Debug, Default)]
struct MemoryState {
    next_seq: u64,
    records: HashMap<Uuid, (u64, PointRecord)>,
    summaries: HashMap<StudentClassKey, VersionedSummary>,
}

impl MemoryState {
    fn records_for_key<'a>(
        &'a self,
        key: &'a StudentClassKey,
    ) -> impl Iterator<Item = &'a PointRecord> + 'a {
        self.records
            .values()
            .map(|(_, r)| r)
            .filter(move |r| r.student_id == key.student_id && r.class_id == key.class_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // No ledger entries are written; tests use this to fake drift.
    pub fn seed_summary(&self, summary: StudentPointsSummary) {
        let mut state = self.state.lock();
        let key = summary.key();
        let version = state.summaries.get(&key).map_or(1, |s| s.version + 1);
        state.summaries.insert(key, VersionedSummary { summary, version });
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }
}

#[async_trait]
impl PointsStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn PointsTx>, StoreError> {
        Ok(Box::new(MemoryTx {
            state: Arc::clone(&self.state),
            inserts: Vec::new(),
            deletes: Vec::new(),
            summary_writes: HashMap::new(),
        }))
    }

    async fn query_records(&self, filter: &HistoryFilter) -> Result<Vec<PointRecord>, StoreError> {
        let state = self.state.lock();
        let mut matching: Vec<&(u64, PointRecord)> = state
            .records
            .values()
            .filter(|(_, r)| {
                filter.student_id.as_ref().map_or(true, |s| &r.student_id == s)
                    && filter.class_id.as_ref().map_or(true, |c| &r.class_id == c)
            })
            .collect();
        matching.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        Ok(matching
            .into_iter()
            .take(filter.limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn find_record(&self, record_id: Uuid) -> Result<Option<PointRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .records
            .get(&record_id)
            .map(|(_, r)| r.clone()))
    }

    async fn fetch_summary(
        &self,
        key: &StudentClassKey,
    ) -> Result<Option<StudentPointsSummary>, StoreError> {
        Ok(self
            .state
            .lock()
            .summaries
            .get(key)
            .map(|s| s.summary.clone()))
    }

    async fn class_summaries(&self, class_id: &str) -> Result<Vec<StudentPointsSummary>, StoreError> {
        Ok(self
            .state
            .lock()
            .summaries
            .values()
            .filter(|s| s.summary.class_id == class_id)
            .map(|s| s.summary.clone())
            .collect())
    }
}

// `expected` is None for a summary that must not exist yet.
#[derive(Debug)]
struct SummaryWrite {
    expected: Option<i64>,
    summary: StudentPointsSummary,
}

struct MemoryTx {
    state: Arc<Mutex<MemoryState>>,
    inserts: Vec<PointRecord>,
    deletes: Vec<Uuid>,
    summary_writes: HashMap<StudentClassKey, SummaryWrite>,
}

impl MemoryTx {
    fn stage_summary(
        &mut self,
        summary: &StudentPointsSummary,
        expected: Option<i64>,
    ) -> Result<(), StoreError> {
        let key = summary.key();
        let current = self.state.lock().summaries.get(&key).map(|s| s.version);
        let expected = match self.summary_writes.get(&key) {
            // Rewriting our own staged value keeps the original expectation.
            Some(staged) => staged.expected,
            None if current == expected => expected,
            None => return Err(StoreError::Conflict),
        };
        self.summary_writes.insert(
            key,
            SummaryWrite {
                expected,
                summary: summary.clone(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl PointsTx for MemoryTx {
    async fn insert_record(&mut self, record: &PointRecord) -> Result<(), StoreError> {
        self.inserts.push(record.clone());
        Ok(())
    }

    async fn delete_record(&mut self, record_id: Uuid) -> Result<PointRecord, StoreError> {
        if self.deletes.contains(&record_id) {
            return Err(StoreError::NotFound(record_id));
        }
        if let Some(pos) = self.inserts.iter().position(|r| r.id == record_id) {
            return Ok(self.inserts.remove(pos));
        }
        let record = self
            .state
            .lock()
            .records
            .get(&record_id)
            .map(|(_, r)| r.clone())
            .ok_or(StoreError::NotFound(record_id))?;
        self.deletes.push(record_id);
        Ok(record)
    }

    async fn delete_records_for_key(&mut self, key: &StudentClassKey) -> Result<u64, StoreError> {
        let before = self.inserts.len();
        self.inserts
            .retain(|r| !(r.student_id == key.student_id && r.class_id == key.class_id));
        let mut removed = (before - self.inserts.len()) as u64;

        let existing: Vec<Uuid> = {
            let state = self.state.lock();
            state.records_for_key(key).map(|r| r.id).collect()
        };
        for id in existing {
            if !self.deletes.contains(&id) {
                self.deletes.push(id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn ledger_totals(&mut self, key: &StudentClassKey) -> Result<LedgerTotals, StoreError> {
        let state = self.state.lock();
        let committed = state
            .records_for_key(key)
            .filter(|r| !self.deletes.contains(&r.id));
        let staged = self
            .inserts
            .iter()
            .filter(|r| r.student_id == key.student_id && r.class_id == key.class_id);

        let mut totals = LedgerTotals::default();
        for record in committed.chain(staged) {
            totals.total_points += i64::from(record.points);
            if record.is_positive {
                totals.positive_count += 1;
            } else {
                totals.negative_count += 1;
            }
        }
        Ok(totals)
    }

    async fn load_summary(
        &mut self,
        key: &StudentClassKey,
    ) -> Result<Option<VersionedSummary>, StoreError> {
        if let Some(staged) = self.summary_writes.get(key) {
            return Ok(Some(VersionedSummary {
                summary: staged.summary.clone(),
                version: staged.expected.map_or(1, |v| v + 1),
            }));
        }
        Ok(self.state.lock().summaries.get(key).cloned())
    }

    async fn insert_summary(&mut self, summary: &StudentPointsSummary) -> Result<(), StoreError> {
        self.stage_summary(summary, None)
    }

    async fn update_summary(
        &mut self,
        summary: &StudentPointsSummary,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        self.stage_summary(summary, Some(expected_version))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx {
            state,
            inserts,
            deletes,
            summary_writes,
        } = *self;
        let mut state = state.lock();

        for (key, write) in &summary_writes {
            let current = state.summaries.get(key).map(|s| s.version);
            if current != write.expected {
                return Err(StoreError::Conflict);
            }
        }
        if deletes.iter().any(|id| !state.records.contains_key(id)) {
            return Err(StoreError::Conflict);
        }

        for id in &deletes {
            state.records.remove(id);
        }
        for record in inserts {
            state.next_seq += 1;
            let seq = state.next_seq;
            state.records.insert(record.id, (seq, record));
        }
        for (key, write) in summary_writes {
            let version = write.expected.map_or(1, |v| v + 1);
            state.summaries.insert(
                key,
                VersionedSummary {
                    summary: write.summary,
                    version,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(student: &str, class: &str, points: i32) -> PointRecord {
        PointRecord {
            id: Uuid::new_v4(),
            student_id: student.into(),
            class_id: class.into(),
            behavior_id: "helping".into(),
            behavior_name: "Helping others".into(),
            points,
            is_positive: points >= 0,
            note: None,
            awarded_by: "t-1".into(),
            awarded_by_name: "Mr. Chen".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_record(&record("s1", "c1", 1)).await.unwrap();
        assert_eq!(store.record_count(), 0);
        drop(tx);
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn second_insert_of_same_summary_conflicts() {
        let store = MemoryStore::new();
        let key = StudentClassKey::new("s1", "c1");
        let summary = StudentPointsSummary::zero(&key);

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.insert_summary(&summary).await.unwrap();
        second.insert_summary(&summary).await.unwrap();

        first.commit().await.unwrap();
        assert!(matches!(second.commit().await, Err(StoreError::Conflict)));
    }

    #[tokio::test]
    async fn stale_version_is_rejected_immediately() {
        let store = MemoryStore::new();
        let key = StudentClassKey::new("s1", "c1");
        store.seed_summary(StudentPointsSummary::zero(&key));

        let mut tx = store.begin().await.unwrap();
        let loaded = tx.load_summary(&key).await.unwrap().unwrap();
        store.seed_summary(StudentPointsSummary::zero(&key));
        let result = tx.update_summary(&loaded.summary, loaded.version).await;
        assert!(matches!(result, Err(StoreError::Conflict)));
    }

    #[tokio::test]
    async fn totals_include_staged_changes() {
        let store = MemoryStore::new();
        let key = StudentClassKey::new("s1", "c1");
        let kept = record("s1", "c1", 3);
        let dropped = record("s1", "c1", -1);

        let mut tx = store.begin().await.unwrap();
        tx.insert_record(&kept).await.unwrap();
        tx.insert_record(&dropped).await.unwrap();
        tx.insert_record(&record("s2", "c1", 5)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.delete_record(dropped.id).await.unwrap();
        tx.insert_record(&record("s1", "c1", 2)).await.unwrap();
        let totals = tx.ledger_totals(&key).await.unwrap();
        assert_eq!(totals.total_points, 5);
        assert_eq!(totals.positive_count, 2);
        assert_eq!(totals.negative_count, 0);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let first = record("s1", "c1", 1);
        let second = record("s1", "c2", 2);
        tx.insert_record(&first).await.unwrap();
        tx.insert_record(&second).await.unwrap();
        tx.commit().await.unwrap();

        let filter = HistoryFilter {
            student_id: Some("s1".into()),
            class_id: None,
            limit: 1,
        };
        let records = store.query_records(&filter).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, second.id);
    }
}
