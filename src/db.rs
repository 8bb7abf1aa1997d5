use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{LedgerTotals, PointRecord, StudentClassKey, StudentPointsSummary, VersionedSummary};
use crate::store::{HistoryFilter, PointsStore, PointsTx};

const RECORD_COLUMNS: &str = "id, student_id, class_id, behavior_id, behavior_name, points, \
     is_positive, note, awarded_by, awarded_by_name, created_at";

const SUMMARY_COLUMNS: &str =
    "student_id, class_id, total_points, positive_count, negative_count, last_updated, version";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn record_from_row(row: &PgRow) -> Result<PointRecord, sqlx::Error> {
    Ok(PointRecord {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        class_id: row.try_get("class_id")?,
        behavior_id: row.try_get("behavior_id")?,
        behavior_name: row.try_get("behavior_name")?,
        points: row.try_get("points")?,
        is_positive: row.try_get("is_positive")?,
        note: row.try_get("note")?,
        awarded_by: row.try_get("awarded_by")?,
        awarded_by_name: row.try_get("awarded_by_name")?,
        created_at: row.try_get("created_at")?,
    })
}

fn summary_from_row(row: &PgRow) -> Result<VersionedSummary, sqlx::Error> {
    Ok(VersionedSummary {
        summary: StudentPointsSummary {
            student_id: row.try_get("student_id")?,
            class_id: row.try_get("class_id")?,
            total_points: row.try_get("total_points")?,
            positive_count: row.try_get("positive_count")?,
            negative_count: row.try_get("negative_count")?,
            last_updated: row.try_get("last_updated")?,
        },
        version: row.try_get("version")?,
    })
}

#[derive(Debug, Clone)]
pub struct PgPointsStore {
    pool: PgPool,
}

impl PgPointsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PointsStore for PgPointsStore {
    async fn begin(&self) -> Result<Box<dyn PointsTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgPointsTx { tx }))
    }

    async fn query_records(&self, filter: &HistoryFilter) -> Result<Vec<PointRecord>, StoreError> {
        let mut query = format!(
            "SELECT {RECORD_COLUMNS} FROM behavior_points.point_records WHERE TRUE"
        );
        let mut param = 0;

        if filter.student_id.is_some() {
            param += 1;
            query.push_str(&format!(" AND student_id = ${param}"));
        }
        if filter.class_id.is_some() {
            param += 1;
            query.push_str(&format!(" AND class_id = ${param}"));
        }
        param += 1;
        query.push_str(&format!(" ORDER BY created_at DESC, id DESC LIMIT ${param}"));

        let mut rows = sqlx::query(&query);
        if let Some(student_id) = &filter.student_id {
            rows = rows.bind(student_id);
        }
        if let Some(class_id) = &filter.class_id {
            rows = rows.bind(class_id);
        }
        let limit = i64::try_from(filter.limit).unwrap_or(i64::MAX);
        let rows = rows.bind(limit).fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(record_from_row(row)?);
        }
        Ok(records)
    }

    async fn find_record(&self, record_id: Uuid) -> Result<Option<PointRecord>, StoreError> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM behavior_points.point_records WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(record_from_row).transpose()?)
    }

    async fn fetch_summary(
        &self,
        key: &StudentClassKey,
    ) -> Result<Option<StudentPointsSummary>, StoreError> {
        let query = format!(
            "SELECT {SUMMARY_COLUMNS} FROM behavior_points.student_points_summaries \
             WHERE student_id = $1 AND class_id = $2"
        );
        let row = sqlx::query(&query)
            .bind(&key.student_id)
            .bind(&key.class_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .as_ref()
            .map(summary_from_row)
            .transpose()?
            .map(|v| v.summary))
    }

    async fn class_summaries(&self, class_id: &str) -> Result<Vec<StudentPointsSummary>, StoreError> {
        let query = format!(
            "SELECT {SUMMARY_COLUMNS} FROM behavior_points.student_points_summaries \
             WHERE class_id = $1 ORDER BY total_points DESC, student_id ASC"
        );
        let rows = sqlx::query(&query)
            .bind(class_id)
            .fetch_all(&self.pool)
            .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            summaries.push(summary_from_row(row)?.summary);
        }
        Ok(summaries)
    }
}

struct PgPointsTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PointsTx for PgPointsTx {
    async fn insert_record(&mut self, record: &PointRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO behavior_points.point_records
            (id, student_id, class_id, behavior_id, behavior_name, points,
             is_positive, note, awarded_by, awarded_by_name, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(&record.student_id)
        .bind(&record.class_id)
        .bind(&record.behavior_id)
        .bind(&record.behavior_name)
        .bind(record.points)
        .bind(record.is_positive)
        .bind(&record.note)
        .bind(&record.awarded_by)
        .bind(&record.awarded_by_name)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_record(&mut self, record_id: Uuid) -> Result<PointRecord, StoreError> {
        let query = format!(
            "DELETE FROM behavior_points.point_records WHERE id = $1 RETURNING {RECORD_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(record_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StoreError::NotFound(record_id))?;
        Ok(record_from_row(&row)?)
    }

    async fn delete_records_for_key(&mut self, key: &StudentClassKey) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM behavior_points.point_records WHERE student_id = $1 AND class_id = $2",
        )
        .bind(&key.student_id)
        .bind(&key.class_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn ledger_totals(&mut self, key: &StudentClassKey) -> Result<LedgerTotals, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(points), 0)::BIGINT AS total_points,
                   COUNT(*) FILTER (WHERE is_positive) AS positive_count,
                   COUNT(*) FILTER (WHERE NOT is_positive) AS negative_count
            FROM behavior_points.point_records
            WHERE student_id = $1 AND class_id = $2
            "#,
        )
        .bind(&key.student_id)
        .bind(&key.class_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(LedgerTotals {
            total_points: row.try_get("total_points")?,
            positive_count: row.try_get("positive_count")?,
            negative_count: row.try_get("negative_count")?,
        })
    }

    async fn load_summary(
        &mut self,
        key: &StudentClassKey,
    ) -> Result<Option<VersionedSummary>, StoreError> {
        let query = format!(
            "SELECT {SUMMARY_COLUMNS} FROM behavior_points.student_points_summaries \
             WHERE student_id = $1 AND class_id = $2"
        );
        let row = sqlx::query(&query)
            .bind(&key.student_id)
            .bind(&key.class_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.as_ref().map(summary_from_row).transpose()?)
    }

    async fn insert_summary(&mut self, summary: &StudentPointsSummary) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO behavior_points.student_points_summaries
            (student_id, class_id, total_points, positive_count, negative_count, last_updated, version)
            VALUES ($1, $2, $3, $4, $5, $6, 1)
            ON CONFLICT (student_id, class_id) DO NOTHING
            "#,
        )
        .bind(&summary.student_id)
        .bind(&summary.class_id)
        .bind(summary.total_points)
        .bind(summary.positive_count)
        .bind(summary.negative_count)
        .bind(summary.last_updated)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }

    async fn update_summary(
        &mut self,
        summary: &StudentPointsSummary,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE behavior_points.student_points_summaries
            SET total_points = $3,
                positive_count = $4,
                negative_count = $5,
                last_updated = $6,
                version = version + 1
            WHERE student_id = $1 AND class_id = $2 AND version = $7
            "#,
        )
        .bind(&summary.student_id)
        .bind(&summary.class_id)
        .bind(summary.total_points)
        .bind(summary.positive_count)
        .bind(summary.negative_count)
        .bind(summary.last_updated)
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
