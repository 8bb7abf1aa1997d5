use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{PointRecord, StudentPointsSummary};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointsChange {
    Awarded {
        record: PointRecord,
        summary: StudentPointsSummary,
    },
    Deleted {
        record_id: Uuid,
        summary: StudentPointsSummary,
    },
    Reset {
        removed_records: u64,
        summary: StudentPointsSummary,
    },
    Reconciled {
        summary: StudentPointsSummary,
    },
}

impl PointsChange {
    pub fn summary(&self) -> &StudentPointsSummary {
        match self {
            PointsChange::Awarded { summary, .. }
            | PointsChange::Deleted { summary, .. }
            | PointsChange::Reset { summary, .. }
            | PointsChange::Reconciled { summary } => summary,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<PointsChange>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PointsChange> {
        self.sender.subscribe()
    }

    pub fn publish(&self, change: PointsChange) {
        let key = change.summary().key();
        // Err only means nobody is listening right now.
        match self.sender.send(change) {
            Ok(receivers) => log::trace!("published change for {key} to {receivers} subscribers"),
            Err(_) => log::trace!("no subscribers for change on {key}"),
        }
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StudentClassKey;

    #[tokio::test]
    async fn subscribers_receive_published_changes() {
        let notifier = ChangeNotifier::new(4);
        let mut rx = notifier.subscribe();
        let summary = StudentPointsSummary::zero(&StudentClassKey::new("s1", "c1"));

        notifier.publish(PointsChange::Reconciled {
            summary: summary.clone(),
        });

        let change = rx.recv().await.unwrap();
        assert_eq!(change.summary(), &summary);
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let notifier = ChangeNotifier::default();
        notifier.publish(PointsChange::Reset {
            removed_records: 0,
            summary: StudentPointsSummary::zero(&StudentClassKey::new("s1", "c1")),
        });
    }

    #[test]
    fn serializes_with_kind_tag() {
        let change = PointsChange::Reconciled {
            summary: StudentPointsSummary::zero(&StudentClassKey::new("s1", "c1")),
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["kind"], "reconciled");
        assert_eq!(json["summary"]["total_points"], 0);
    }
}
