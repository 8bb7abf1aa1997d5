//! Running totals per (student, class), derived from the ledger.

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{LedgerTotals, StudentClassKey, StudentPointsSummary};
use crate::store::{PointsStore, PointsTx};

pub async fn get(
    store: &dyn PointsStore,
    key: &StudentClassKey,
) -> Result<StudentPointsSummary, StoreError> {
    Ok(store
        .fetch_summary(key)
        .await?
        .unwrap_or_else(|| StudentPointsSummary::zero(key)))
}

pub fn with_delta(
    current: &StudentPointsSummary,
    points_delta: i64,
    is_positive: bool,
    now: DateTime<Utc>,
) -> StudentPointsSummary {
    let mut next = current.clone();
    next.total_points += points_delta;
    if is_positive {
        next.positive_count += 1;
    } else {
        next.negative_count += 1;
    }
    next.last_updated = Some(now);
    next
}

// Counters never go below zero.
pub fn without_award(
    current: &StudentPointsSummary,
    points: i64,
    was_positive: bool,
    now: DateTime<Utc>,
) -> StudentPointsSummary {
    let mut next = current.clone();
    next.total_points -= points;
    if was_positive {
        next.positive_count = (next.positive_count - 1).max(0);
    } else {
        next.negative_count = (next.negative_count - 1).max(0);
    }
    next.last_updated = Some(now);
    next
}

pub fn from_totals(
    key: &StudentClassKey,
    totals: LedgerTotals,
    now: DateTime<Utc>,
) -> StudentPointsSummary {
    StudentPointsSummary {
        student_id: key.student_id.clone(),
        class_id: key.class_id.clone(),
        total_points: totals.total_points,
        positive_count: totals.positive_count,
        negative_count: totals.negative_count,
        last_updated: Some(now),
    }
}

async fn read_modify_write<F>(
    tx: &mut dyn PointsTx,
    key: &StudentClassKey,
    update: F,
) -> Result<StudentPointsSummary, StoreError>
where
    F: FnOnce(&StudentPointsSummary) -> StudentPointsSummary + Send,
{
    match tx.load_summary(key).await? {
        Some(current) => {
            let next = update(&current.summary);
            tx.update_summary(&next, current.version).await?;
            Ok(next)
        }
        None => {
            let next = update(&StudentPointsSummary::zero(key));
            tx.insert_summary(&next).await?;
            Ok(next)
        }
    }
}

pub async fn apply_delta(
    tx: &mut dyn PointsTx,
    key: &StudentClassKey,
    points_delta: i64,
    is_positive: bool,
) -> Result<StudentPointsSummary, StoreError> {
    let now = Utc::now();
    read_modify_write(tx, key, |current| with_delta(current, points_delta, is_positive, now)).await
}

pub async fn retract(
    tx: &mut dyn PointsTx,
    key: &StudentClassKey,
    points: i64,
    was_positive: bool,
) -> Result<StudentPointsSummary, StoreError> {
    let now = Utc::now();
    read_modify_write(tx, key, |current| without_award(current, points, was_positive, now)).await
}

/// Overwrites the summary with `exact`. `seen` is the version read before the
/// ledger was consulted, so a write that landed since then is a `Conflict`.
pub async fn set_exact(
    tx: &mut dyn PointsTx,
    seen: Option<i64>,
    exact: &StudentPointsSummary,
) -> Result<StudentPointsSummary, StoreError> {
    match seen {
        Some(version) => tx.update_summary(exact, version).await?,
        None => tx.insert_summary(exact).await?,
    }
    Ok(exact.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(total: i64, positive: i64, negative: i64) -> StudentPointsSummary {
        StudentPointsSummary {
            student_id: "s1".into(),
            class_id: "c1".into(),
            total_points: total,
            positive_count: positive,
            negative_count: negative,
            last_updated: None,
        }
    }

    #[test]
    fn delta_from_zero_counts_declared_polarity() {
        let now = Utc::now();
        let zero = StudentPointsSummary::zero(&StudentClassKey::new("s1", "c1"));

        assert_eq!(with_delta(&zero, 1, true, now).counts(), (1, 1, 0));
        assert_eq!(with_delta(&zero, -1, false, now).counts(), (-1, 0, 1));
        assert_eq!(with_delta(&zero, 0, true, now).counts(), (0, 1, 0));
        assert_eq!(with_delta(&zero, 1, true, now).last_updated, Some(now));
    }

    #[test]
    fn deltas_commute() {
        let now = Utc::now();
        let start = summary(5, 2, 1);
        let ab = with_delta(&with_delta(&start, 1, true, now), -1, false, now);
        let ba = with_delta(&with_delta(&start, -1, false, now), 1, true, now);
        assert_eq!(ab.counts(), ba.counts());
        assert_eq!(ab.counts(), (5, 3, 2));
    }

    #[test]
    fn retraction_reverses_award() {
        let now = Utc::now();
        let start = summary(4, 1, 0);
        let awarded = with_delta(&start, 3, true, now);
        let reverted = without_award(&awarded, 3, true, now);
        assert_eq!(reverted.counts(), start.counts());
    }

    #[test]
    fn retraction_clamps_counters_at_zero() {
        let now = Utc::now();
        let start = summary(0, 0, 0);
        let after = without_award(&start, 2, true, now);
        assert_eq!(after.counts(), (-2, 0, 0));
        let after = without_award(&start, -1, false, now);
        assert_eq!(after.counts(), (1, 0, 0));
    }
}
