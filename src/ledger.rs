//! Append-only log of point awards.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{BehaviorDefinition, NewPointRecord, PointRecord, StudentClassKey};
use crate::store::{HistoryFilter, PointsStore, PointsTx};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub display_name: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

// Later catalog edits never touch records already written.
pub fn snapshot(
    key: &StudentClassKey,
    behavior: &BehaviorDefinition,
    note: Option<&str>,
    actor: &Actor,
) -> NewPointRecord {
    NewPointRecord {
        key: key.clone(),
        behavior_id: behavior.id.clone(),
        behavior_name: behavior.display_name.clone(),
        points: behavior.point_value,
        is_positive: behavior.polarity.is_positive(),
        note: note
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        awarded_by: actor.id.clone(),
        awarded_by_name: actor.display_name.clone(),
    }
}

pub async fn append(tx: &mut dyn PointsTx, new: &NewPointRecord) -> Result<PointRecord, StoreError> {
    let record = PointRecord {
        id: Uuid::new_v4(),
        student_id: new.key.student_id.clone(),
        class_id: new.key.class_id.clone(),
        behavior_id: new.behavior_id.clone(),
        behavior_name: new.behavior_name.clone(),
        points: new.points,
        is_positive: new.is_positive,
        note: new.note.clone(),
        awarded_by: new.awarded_by.clone(),
        awarded_by_name: new.awarded_by_name.clone(),
        created_at: Utc::now(),
    };
    tx.insert_record(&record).await?;
    Ok(record)
}

pub async fn remove(tx: &mut dyn PointsTx, record_id: Uuid) -> Result<PointRecord, StoreError> {
    tx.delete_record(record_id).await
}

pub async fn remove_all_for_key(
    tx: &mut dyn PointsTx,
    key: &StudentClassKey,
) -> Result<u64, StoreError> {
    tx.delete_records_for_key(key).await
}

// Every fetch goes back to the store, so a query can be re-run.
#[derive(Clone)]
pub struct HistoryQuery {
    store: Arc<dyn PointsStore>,
    filter: HistoryFilter,
}

impl HistoryQuery {
    pub fn new(store: Arc<dyn PointsStore>, filter: HistoryFilter) -> Self {
        Self { store, filter }
    }

    pub async fn fetch(&self) -> Result<Vec<PointRecord>, StoreError> {
        self.store.query_records(&self.filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Polarity;

    #[test]
    fn snapshot_copies_behavior_and_actor() {
        let behavior = BehaviorDefinition {
            id: "helping".into(),
            display_name: "Helping others".into(),
            point_value: 1,
            polarity: Polarity::Positive,
        };
        let actor = Actor::new("t-9", "Ms. Rivera");
        let record = snapshot(&StudentClassKey::new("s1", "c1"), &behavior, Some("  "), &actor);

        assert_eq!(record.behavior_name, "Helping others");
        assert_eq!(record.points, 1);
        assert!(record.is_positive);
        assert_eq!(record.note, None);
        assert_eq!(record.awarded_by_name, "Ms. Rivera");
    }

    #[test]
    fn snapshot_keeps_declared_polarity_for_zero_points() {
        let behavior = BehaviorDefinition {
            id: "attendance".into(),
            display_name: "Attendance".into(),
            point_value: 0,
            polarity: Polarity::Negative,
        };
        let record = snapshot(
            &StudentClassKey::new("s1", "c1"),
            &behavior,
            Some("left early"),
            &Actor::new("t-1", "Mr. Chen"),
        );
        assert_eq!(record.points, 0);
        assert!(!record.is_positive);
        assert_eq!(record.note.as_deref(), Some("left early"));
    }
}
