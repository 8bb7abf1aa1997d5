//! Keeps the ledger and the per-student summaries in step.
//!
//! Every mutation runs as one storage transaction: the ledger change and the
//! version-guarded summary write commit together or not at all. A lost race
//! on the summary rolls the whole attempt back and the retry policy decides
//! whether to try again.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::aggregate;
use crate::catalog::BehaviorCatalog;
use crate::error::{PointsError, Result, StoreError};
use crate::ledger::{self, Actor, HistoryQuery};
use crate::models::{
    validate_id, AwardReceipt, BehaviorDefinition, BulkAwardReport, NewPointRecord, PointRecord,
    Polarity, ReconcileReport, ResetReport, StudentClassKey, StudentOutcome, StudentPointsSummary,
};
use crate::notify::{ChangeNotifier, PointsChange};
use crate::retry::RetryPolicy;
use crate::store::{HistoryFilter, PointsStore};

pub const MAX_HISTORY_LIMIT: usize = 500;

pub struct PointsCoordinator {
    store: Arc<dyn PointsStore>,
    catalog: Arc<BehaviorCatalog>,
    retry: RetryPolicy,
    notifier: ChangeNotifier,
}

impl PointsCoordinator {
    pub fn new(store: Arc<dyn PointsStore>, catalog: BehaviorCatalog) -> Self {
        Self {
            store,
            catalog: Arc::new(catalog),
            retry: RetryPolicy::default(),
            notifier: ChangeNotifier::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_notifier(mut self, notifier: ChangeNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn behavior(&self, behavior_id: &str) -> Result<&BehaviorDefinition> {
        self.catalog
            .get(behavior_id)
            .ok_or_else(|| PointsError::NotFound {
                what: format!("behavior '{behavior_id}'"),
            })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PointsChange> {
        self.notifier.subscribe()
    }

    pub async fn award_points(
        &self,
        student_id: &str,
        class_id: &str,
        behavior_id: &str,
        note: Option<&str>,
        actor: &Actor,
    ) -> Result<AwardReceipt> {
        let key = StudentClassKey::parse(student_id, class_id)?;
        validate_id("awarding actor", &actor.id)?;
        let behavior = self.behavior(behavior_id)?;
        let new = ledger::snapshot(&key, behavior, note, actor);

        let (result, attempts) = self.retry.run(|| self.try_award(&new)).await;
        let receipt = settle(format!("award '{behavior_id}' to {key}"), &key, attempts, result)?;

        log::info!(
            "awarded '{}' ({:+}) to {} by {}; total now {}",
            receipt.record.behavior_id,
            receipt.record.points,
            key,
            receipt.record.awarded_by,
            receipt.summary.total_points
        );
        self.notifier.publish(PointsChange::Awarded {
            record: receipt.record.clone(),
            summary: receipt.summary.clone(),
        });
        Ok(receipt)
    }

    async fn try_award(&self, new: &NewPointRecord) -> Result<AwardReceipt, StoreError> {
        let mut tx = self.store.begin().await?;
        let record = ledger::append(tx.as_mut(), new).await?;
        let summary = aggregate::apply_delta(
            tx.as_mut(),
            &new.key,
            i64::from(record.points),
            record.is_positive,
        )
        .await?;
        tx.commit().await?;
        Ok(AwardReceipt { record, summary })
    }

    /// Awards the behavior to each student independently. One student's
    /// failure never undoes or blocks another's award.
    pub async fn award_points_to_multiple(
        &self,
        student_ids: &[String],
        class_id: &str,
        behavior_id: &str,
        note: Option<&str>,
        actor: &Actor,
    ) -> Result<BulkAwardReport> {
        validate_id("class id", class_id)?;
        self.behavior(behavior_id)?;
        if student_ids.is_empty() {
            return Err(PointsError::Validation(
                "bulk award needs at least one student".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let unique: Vec<&String> = student_ids.iter().filter(|id| seen.insert(*id)).collect();
        if unique.len() < student_ids.len() {
            log::debug!(
                "collapsed {} duplicate students in bulk award",
                student_ids.len() - unique.len()
            );
        }

        let outcomes = join_all(unique.into_iter().map(|student_id| async move {
            let result = self
                .award_points(student_id, class_id, behavior_id, note, actor)
                .await;
            if let Err(err) = &result {
                log::warn!("bulk award to {student_id} in {class_id} failed: {err}");
            }
            StudentOutcome {
                student_id: student_id.clone(),
                result,
            }
        }))
        .await;

        let report = BulkAwardReport { outcomes };
        log::info!(
            "bulk award '{}' in {}: {} succeeded, {} failed",
            behavior_id,
            class_id,
            report.success_count(),
            report.failure_count()
        );
        Ok(report)
    }

    pub async fn delete_point_record(
        &self,
        record_id: Uuid,
        student_id: &str,
        class_id: &str,
        points: i32,
        was_positive: bool,
    ) -> Result<StudentPointsSummary> {
        let key = StudentClassKey::parse(student_id, class_id)?;
        let operation = format!("delete record {record_id} for {key}");

        let stored = self
            .store
            .find_record(record_id)
            .await
            .map_err(|err| PointsError::storage(operation.clone(), err))?
            .ok_or_else(|| PointsError::NotFound {
                what: format!("point record {record_id}"),
            })?;
        if stored.key() != key || stored.points != points || stored.is_positive != was_positive {
            return Err(PointsError::Validation(format!(
                "record {record_id} is {:+} ({}) for {}, not {points:+} ({}) for {key}",
                stored.points,
                Polarity::from_flag(stored.is_positive),
                stored.key(),
                Polarity::from_flag(was_positive)
            )));
        }

        let (result, attempts) = self.retry.run(|| self.try_delete(record_id, &key)).await;
        let summary = settle(operation, &key, attempts, result)?;

        log::info!(
            "deleted record {record_id} ({:+}) from {key}; total now {}",
            stored.points,
            summary.total_points
        );
        self.notifier.publish(PointsChange::Deleted {
            record_id,
            summary: summary.clone(),
        });
        Ok(summary)
    }

    async fn try_delete(
        &self,
        record_id: Uuid,
        key: &StudentClassKey,
    ) -> Result<StudentPointsSummary, StoreError> {
        let mut tx = self.store.begin().await?;
        let removed = ledger::remove(tx.as_mut(), record_id).await?;
        let summary = aggregate::retract(
            tx.as_mut(),
            key,
            i64::from(removed.points),
            removed.is_positive,
        )
        .await?;
        tx.commit().await?;
        Ok(summary)
    }

    pub async fn reset_student_points(&self, student_id: &str, class_id: &str) -> Result<ResetReport> {
        let key = StudentClassKey::parse(student_id, class_id)?;
        let (result, attempts) = self.retry.run(|| self.try_reset(&key)).await;
        let report = settle(format!("reset {key}"), &key, attempts, result)?;

        log::info!("reset {key}: removed {} records", report.removed_records);
        self.notifier.publish(PointsChange::Reset {
            removed_records: report.removed_records,
            summary: report.summary.clone(),
        });
        Ok(report)
    }

    async fn try_reset(&self, key: &StudentClassKey) -> Result<ResetReport, StoreError> {
        let mut tx = self.store.begin().await?;
        // Read the version first so an award committed after the delete conflicts.
        let seen = tx.load_summary(key).await?.map(|v| v.version);
        let removed_records = ledger::remove_all_for_key(tx.as_mut(), key).await?;
        let mut zero = StudentPointsSummary::zero(key);
        zero.last_updated = Some(chrono::Utc::now());
        let summary = aggregate::set_exact(tx.as_mut(), seen, &zero).await?;
        tx.commit().await?;
        Ok(ResetReport {
            removed_records,
            summary,
        })
    }

    pub async fn reconcile(&self, student_id: &str, class_id: &str) -> Result<ReconcileReport> {
        let key = StudentClassKey::parse(student_id, class_id)?;
        let (result, attempts) = self.retry.run(|| self.try_reconcile(&key)).await;
        let report = settle(format!("reconcile {key}"), &key, attempts, result)?;

        if report.drifted {
            log::warn!(
                "summary {key} drifted from ledger: {:?} -> {:?}",
                report.before.counts(),
                report.after.counts()
            );
            self.notifier.publish(PointsChange::Reconciled {
                summary: report.after.clone(),
            });
        }
        Ok(report)
    }

    async fn try_reconcile(&self, key: &StudentClassKey) -> Result<ReconcileReport, StoreError> {
        let mut tx = self.store.begin().await?;
        // Summary before ledger: the version pins the totals we are about to read.
        let (before, seen) = match tx.load_summary(key).await? {
            Some(current) => (current.summary, Some(current.version)),
            None => (StudentPointsSummary::zero(key), None),
        };
        let totals = tx.ledger_totals(key).await?;

        if totals.matches(&before) {
            return Ok(ReconcileReport {
                after: before.clone(),
                before,
                drifted: false,
            });
        }

        let exact = aggregate::from_totals(key, totals, chrono::Utc::now());
        let after = aggregate::set_exact(tx.as_mut(), seen, &exact).await?;
        tx.commit().await?;
        Ok(ReconcileReport {
            before,
            after,
            drifted: true,
        })
    }

    pub fn student_history(&self, student_id: &str, limit: usize) -> Result<HistoryQuery> {
        validate_id("student id", student_id)?;
        self.history(Some(student_id), None, limit)
    }

    pub fn class_history(&self, class_id: &str, limit: usize) -> Result<HistoryQuery> {
        validate_id("class id", class_id)?;
        self.history(None, Some(class_id), limit)
    }

    fn history(
        &self,
        student_id: Option<&str>,
        class_id: Option<&str>,
        limit: usize,
    ) -> Result<HistoryQuery> {
        if limit == 0 || limit > MAX_HISTORY_LIMIT {
            return Err(PointsError::Validation(format!(
                "limit must be between 1 and {MAX_HISTORY_LIMIT}, got {limit}"
            )));
        }
        Ok(HistoryQuery::new(
            Arc::clone(&self.store),
            HistoryFilter {
                student_id: student_id.map(str::to_string),
                class_id: class_id.map(str::to_string),
                limit,
            },
        ))
    }

    pub async fn get_points_history(&self, student_id: &str, limit: usize) -> Result<Vec<PointRecord>> {
        self.student_history(student_id, limit)?
            .fetch()
            .await
            .map_err(|err| PointsError::storage(format!("read history for {student_id}"), err))
    }

    pub async fn get_class_points_history(
        &self,
        class_id: &str,
        limit: usize,
    ) -> Result<Vec<PointRecord>> {
        self.class_history(class_id, limit)?
            .fetch()
            .await
            .map_err(|err| PointsError::storage(format!("read history for class {class_id}"), err))
    }

    pub async fn get_class_summaries(&self, class_id: &str) -> Result<Vec<StudentPointsSummary>> {
        validate_id("class id", class_id)?;
        let mut summaries = self
            .store
            .class_summaries(class_id)
            .await
            .map_err(|err| PointsError::storage(format!("read summaries for class {class_id}"), err))?;
        summaries.sort_by(|a, b| {
            b.total_points
                .cmp(&a.total_points)
                .then_with(|| a.student_id.cmp(&b.student_id))
        });
        Ok(summaries)
    }

    pub async fn get_student_summary(
        &self,
        student_id: &str,
        class_id: &str,
    ) -> Result<StudentPointsSummary> {
        let key = StudentClassKey::parse(student_id, class_id)?;
        aggregate::get(self.store.as_ref(), &key)
            .await
            .map_err(|err| PointsError::storage(format!("read summary {key}"), err))
    }

    pub async fn find_record(&self, record_id: Uuid) -> Result<PointRecord> {
        self.store
            .find_record(record_id)
            .await
            .map_err(|err| PointsError::storage(format!("read record {record_id}"), err))?
            .ok_or_else(|| PointsError::NotFound {
                what: format!("point record {record_id}"),
            })
    }
}

fn settle<T>(
    operation: String,
    key: &StudentClassKey,
    attempts: u32,
    result: Result<T, StoreError>,
) -> Result<T> {
    result.map_err(|err| {
        let err = PointsError::from_store(operation, key, attempts, err);
        if let PointsError::Contention { .. } = err {
            log::warn!("{err}");
        }
        err
    })
}
