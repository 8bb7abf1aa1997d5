use std::collections::HashMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{PointRecord, StudentPointsSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviorMix {
    pub behavior_name: String,
    pub count: usize,
    pub net_points: i64,
}

pub fn summarize_by_behavior(records: &[PointRecord]) -> Vec<BehaviorMix> {
    let mut map: HashMap<&str, (usize, i64)> = HashMap::new();

    for record in records {
        let entry = map.entry(record.behavior_name.as_str()).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += i64::from(record.points);
    }

    let mut mix: Vec<BehaviorMix> = map
        .into_iter()
        .map(|(name, (count, net_points))| BehaviorMix {
            behavior_name: name.to_string(),
            count,
            net_points,
        })
        .collect();

    mix.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.behavior_name.cmp(&b.behavior_name))
    });
    mix
}

pub fn build_report(
    class_id: &str,
    generated_at: DateTime<Utc>,
    summaries: &[StudentPointsSummary],
    recent: &[PointRecord],
) -> String {
    let mix = summarize_by_behavior(recent);
    let mut output = String::new();

    let _ = writeln!(output, "# Behavior Points Report");
    let _ = writeln!(
        output,
        "Generated for class {} at {}",
        class_id,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Leaderboard");

    if summaries.is_empty() {
        let _ = writeln!(output, "No points awarded in this class yet.");
    } else {
        for (rank, summary) in summaries.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. {}: {} points ({} positive, {} negative)",
                rank + 1,
                summary.student_id,
                summary.total_points,
                summary.positive_count,
                summary.negative_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Behavior Mix");

    if mix.is_empty() {
        let _ = writeln!(output, "No recent awards.");
    } else {
        for entry in &mix {
            let _ = writeln!(
                output,
                "- {}: {} awards ({:+} net)",
                entry.behavior_name, entry.count, entry.net_points
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Awards");

    if recent.is_empty() {
        let _ = writeln!(output, "No recent awards.");
    } else {
        for record in recent.iter().take(10) {
            let _ = write!(
                output,
                "- {} {} ({:+}) to {} by {}",
                record.created_at.format("%Y-%m-%d"),
                record.behavior_name,
                record.points,
                record.student_id,
                record.awarded_by_name
            );
            match &record.note {
                Some(note) => {
                    let _ = writeln!(output, ": {note}");
                }
                None => {
                    let _ = writeln!(output);
                }
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_record(student: &str, behavior: &str, points: i32) -> PointRecord {
        PointRecord {
            id: Uuid::new_v4(),
            student_id: student.to_string(),
            class_id: "c1".to_string(),
            behavior_id: behavior.to_lowercase(),
            behavior_name: behavior.to_string(),
            points,
            is_positive: points >= 0,
            note: None,
            awarded_by: "t-1".to_string(),
            awarded_by_name: "Ms. Rivera".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn mix_counts_and_nets_by_behavior() {
        let records = vec![
            sample_record("s1", "Helping", 1),
            sample_record("s2", "Helping", 1),
            sample_record("s1", "Talking", -1),
        ];
        let mix = summarize_by_behavior(&records);
        assert_eq!(mix.len(), 2);
        assert_eq!(mix[0].behavior_name, "Helping");
        assert_eq!(mix[0].count, 2);
        assert_eq!(mix[0].net_points, 2);
        assert_eq!(mix[1].net_points, -1);
    }

    #[test]
    fn report_lists_leaderboard_in_given_order() {
        let summaries = vec![
            StudentPointsSummary {
                student_id: "s2".into(),
                class_id: "c1".into(),
                total_points: 4,
                positive_count: 5,
                negative_count: 1,
                last_updated: None,
            },
            StudentPointsSummary {
                student_id: "s1".into(),
                class_id: "c1".into(),
                total_points: 1,
                positive_count: 1,
                negative_count: 0,
                last_updated: None,
            },
        ];
        let mut record = sample_record("s1", "Helping", 1);
        record.note = Some("held the door".into());

        let report = build_report("c1", Utc::now(), &summaries, &[record]);
        assert!(report.contains("1. s2: 4 points (5 positive, 1 negative)"));
        assert!(report.contains("2. s1: 1 points"));
        assert!(report.contains("- Helping: 1 awards (+1 net)"));
        assert!(report.contains("Helping (+1) to s1 by Ms. Rivera: held the door"));
    }

    #[test]
    fn empty_class_report_has_placeholders() {
        let report = build_report("c9", Utc::now(), &[], &[]);
        assert!(report.contains("No points awarded in this class yet."));
        assert!(report.contains("No recent awards."));
    }
}
