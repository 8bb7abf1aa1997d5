//! Storage seam shared by the Postgres and in-memory backends.
//!
//! Every mutation runs inside a [`PointsTx`]. Summary writes carry the
//! version they were read at; a backend reports [`StoreError::Conflict`]
//! (either from the write itself or from `commit`) when another writer got
//! there first, and the coordinator retries the whole transaction.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{LedgerTotals, PointRecord, StudentClassKey, StudentPointsSummary, VersionedSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFilter {
    pub student_id: Option<String>,
    pub class_id: Option<String>,
    pub limit: usize,
}

#[async_trait]
pub trait PointsStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn PointsTx>, StoreError>;

    /// Records matching `filter`, newest first.
    async fn query_records(&self, filter: &HistoryFilter) -> Result<Vec<PointRecord>, StoreError>;

    async fn find_record(&self, record_id: Uuid) -> Result<Option<PointRecord>, StoreError>;

    async fn fetch_summary(
        &self,
        key: &StudentClassKey,
    ) -> Result<Option<StudentPointsSummary>, StoreError>;

    async fn class_summaries(&self, class_id: &str) -> Result<Vec<StudentPointsSummary>, StoreError>;
}

#[async_trait]
pub trait PointsTx: Send {
    async fn insert_record(&mut self, record: &PointRecord) -> Result<(), StoreError>;

    async fn delete_record(&mut self, record_id: Uuid) -> Result<PointRecord, StoreError>;

    async fn delete_records_for_key(&mut self, key: &StudentClassKey) -> Result<u64, StoreError>;

    async fn ledger_totals(&mut self, key: &StudentClassKey) -> Result<LedgerTotals, StoreError>;

    async fn load_summary(
        &mut self,
        key: &StudentClassKey,
    ) -> Result<Option<VersionedSummary>, StoreError>;

    /// Creates the summary; `Conflict` if one already exists.
    async fn insert_summary(&mut self, summary: &StudentPointsSummary) -> Result<(), StoreError>;

    /// Overwrites the summary if it is still at `expected_version`; `Conflict` otherwise.
    async fn update_summary(
        &mut self,
        summary: &StudentPointsSummary,
        expected_version: i64,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
