use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PointsError;

const MAX_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub fn is_positive(self) -> bool {
        matches!(self, Polarity::Positive)
    }

    pub fn from_flag(is_positive: bool) -> Self {
        if is_positive {
            Polarity::Positive
        } else {
            Polarity::Negative
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Positive => f.pad("positive"),
            Polarity::Negative => f.pad("negative"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorDefinition {
    pub id: String,
    pub display_name: String,
    pub point_value: i32,
    pub polarity: Polarity,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StudentClassKey {
    pub student_id: String,
    pub class_id: String,
}

impl StudentClassKey {
    pub fn new(student_id: impl Into<String>, class_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            class_id: class_id.into(),
        }
    }

    pub fn parse(student_id: &str, class_id: &str) -> Result<Self, PointsError> {
        validate_id("student id", student_id)?;
        validate_id("class id", class_id)?;
        Ok(Self::new(student_id, class_id))
    }
}

impl fmt::Display for StudentClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.student_id, self.class_id)
    }
}

pub fn validate_id(label: &str, value: &str) -> Result<(), PointsError> {
    if value.trim().is_empty() {
        return Err(PointsError::Validation(format!("{label} must not be empty")));
    }
    if value.trim() != value {
        return Err(PointsError::Validation(format!(
            "{label} '{value}' has surrounding whitespace"
        )));
    }
    if value.len() > MAX_ID_LEN {
        return Err(PointsError::Validation(format!(
            "{label} exceeds {MAX_ID_LEN} characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointRecord {
    pub id: Uuid,
    pub student_id: String,
    pub class_id: String,
    pub behavior_id: String,
    pub behavior_name: String,
    pub points: i32,
    pub is_positive: bool,
    pub note: Option<String>,
    pub awarded_by: String,
    pub awarded_by_name: String,
    pub created_at: DateTime<Utc>,
}

impl PointRecord {
    pub fn key(&self) -> StudentClassKey {
        StudentClassKey::new(&self.student_id, &self.class_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPointRecord {
    pub key: StudentClassKey,
    pub behavior_id: String,
    pub behavior_name: String,
    pub points: i32,
    pub is_positive: bool,
    pub note: Option<String>,
    pub awarded_by: String,
    pub awarded_by_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentPointsSummary {
    pub student_id: String,
    pub class_id: String,
    pub total_points: i64,
    pub positive_count: i64,
    pub negative_count: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl StudentPointsSummary {
    pub fn zero(key: &StudentClassKey) -> Self {
        Self {
            student_id: key.student_id.clone(),
            class_id: key.class_id.clone(),
            total_points: 0,
            positive_count: 0,
            negative_count: 0,
            last_updated: None,
        }
    }

    pub fn key(&self) -> StudentClassKey {
        StudentClassKey::new(&self.student_id, &self.class_id)
    }

    pub fn counts(&self) -> (i64, i64, i64) {
        (self.total_points, self.positive_count, self.negative_count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedSummary {
    pub summary: StudentPointsSummary,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub total_points: i64,
    pub positive_count: i64,
    pub negative_count: i64,
}

impl LedgerTotals {
    pub fn matches(&self, summary: &StudentPointsSummary) -> bool {
        self.total_points == summary.total_points
            && self.positive_count == summary.positive_count
            && self.negative_count == summary.negative_count
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AwardReceipt {
    pub record: PointRecord,
    pub summary: StudentPointsSummary,
}

#[derive(Debug)]
pub struct StudentOutcome {
    pub student_id: String,
    pub result: Result<AwardReceipt, PointsError>,
}

#[derive(Debug, Default)]
pub struct BulkAwardReport {
    pub outcomes: Vec<StudentOutcome>,
}

impl BulkAwardReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &AwardReceipt> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &PointsError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.student_id.as_str(), e)))
    }

    pub fn success_count(&self) -> usize {
        self.succeeded().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub removed_records: u64,
    pub summary: StudentPointsSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub before: StudentPointsSummary,
    pub after: StudentPointsSummary,
    pub drifted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_uses_synthetic_identifier() {
        let key = StudentClassKey::new("s1", "c1");
        assert_eq!(key.to_string(), "s1_c1");
    }

    #[test]
    fn rejects_blank_and_padded_ids() {
        assert!(StudentClassKey::parse("", "c1").is_err());
        assert!(StudentClassKey::parse("s1", "   ").is_err());
        assert!(StudentClassKey::parse(" s1", "c1").is_err());
        assert!(StudentClassKey::parse(&"x".repeat(129), "c1").is_err());
        assert!(StudentClassKey::parse("s1", "c1").is_ok());
    }

    #[test]
    fn zero_summary_has_no_timestamp() {
        let summary = StudentPointsSummary::zero(&StudentClassKey::new("s1", "c1"));
        assert_eq!(summary.counts(), (0, 0, 0));
        assert!(summary.last_updated.is_none());
    }
}
