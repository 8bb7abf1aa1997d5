use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;

use crate::models::{BehaviorDefinition, Polarity};

#[derive(Debug, Clone, Default)]
pub struct BehaviorCatalog {
    behaviors: Vec<BehaviorDefinition>,
    index: HashMap<String, usize>,
}

impl BehaviorCatalog {
    pub fn new(behaviors: Vec<BehaviorDefinition>) -> anyhow::Result<Self> {
        let mut index = HashMap::new();
        for (position, behavior) in behaviors.iter().enumerate() {
            if behavior.id.trim().is_empty() {
                anyhow::bail!("behavior at row {} has an empty id", position + 1);
            }
            if index.insert(behavior.id.clone(), position).is_some() {
                anyhow::bail!("duplicate behavior id '{}'", behavior.id);
            }
        }
        Ok(Self { behaviors, index })
    }

    pub fn builtin() -> Self {
        let entries = [
            ("helping", "Helping others", 1, Polarity::Positive),
            ("on-task", "On task", 1, Polarity::Positive),
            ("participating", "Participating", 1, Polarity::Positive),
            ("teamwork", "Teamwork", 1, Polarity::Positive),
            ("persistence", "Working hard", 2, Polarity::Positive),
            ("kindness", "Kindness", 2, Polarity::Positive),
            ("talking-out", "Talking out of turn", -1, Polarity::Negative),
            ("off-task", "Off task", -1, Polarity::Negative),
            ("unprepared", "Unprepared", -1, Polarity::Negative),
            ("disrespect", "Disrespect", -2, Polarity::Negative),
        ];

        let behaviors = entries
            .into_iter()
            .map(|(id, name, points, polarity)| BehaviorDefinition {
                id: id.to_string(),
                display_name: name.to_string(),
                point_value: points,
                polarity,
            })
            .collect::<Vec<_>>();

        let index = behaviors
            .iter()
            .enumerate()
            .map(|(position, b)| (b.id.clone(), position))
            .collect();
        Self { behaviors, index }
    }

    /// Loads a catalog from a CSV file with columns
    /// `id,display_name,point_value,polarity`.
    pub fn from_csv(path: &Path) -> anyhow::Result<Self> {
        #[derive(serde::Deserialize)]
        struct CsvRow {
            id: String,
            display_name: String,
            point_value: i32,
            polarity: Polarity,
        }

        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open behavior catalog {}", path.display()))?;
        let mut behaviors = Vec::new();

        for result in reader.deserialize::<CsvRow>() {
            let row = result.with_context(|| format!("malformed row in {}", path.display()))?;
            behaviors.push(BehaviorDefinition {
                id: row.id,
                display_name: row.display_name,
                point_value: row.point_value,
                polarity: row.polarity,
            });
        }

        Self::new(behaviors)
    }

    pub fn get(&self, behavior_id: &str) -> Option<&BehaviorDefinition> {
        self.index.get(behavior_id).map(|&i| &self.behaviors[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &BehaviorDefinition> {
        self.behaviors.iter()
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_catalog_has_both_polarities() {
        let catalog = BehaviorCatalog::builtin();
        assert_eq!(catalog.get("helping").map(|b| b.point_value), Some(1));
        assert_eq!(
            catalog.get("talking-out").map(|b| b.polarity),
            Some(Polarity::Negative)
        );
        assert!(catalog.get("unknown").is_none());
    }

    #[test]
    fn loads_catalog_from_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,display_name,point_value,polarity").unwrap();
        writeln!(file, "reading,Quiet reading,3,positive").unwrap();
        writeln!(file, "late,Late to class,-2,negative").unwrap();
        writeln!(file, "attendance,Attendance,0,positive").unwrap();

        let catalog = BehaviorCatalog::from_csv(file.path()).unwrap();
        assert_eq!(catalog.len(), 3);
        let late = catalog.get("late").unwrap();
        assert_eq!(late.point_value, -2);
        assert_eq!(late.polarity, Polarity::Negative);
        assert_eq!(catalog.get("attendance").map(|b| b.point_value), Some(0));
    }

    #[test]
    fn bundled_catalog_extends_builtin() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/behaviors.csv");
        let bundled = BehaviorCatalog::from_csv(&path).unwrap();
        let builtin = BehaviorCatalog::builtin();

        for behavior in builtin.iter() {
            assert_eq!(bundled.get(&behavior.id), Some(behavior));
        }
        let attendance = bundled.get("attendance").unwrap();
        assert_eq!(attendance.point_value, 0);
        assert_eq!(attendance.polarity, Polarity::Positive);
        assert_eq!(bundled.len(), builtin.len() + 1);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,display_name,point_value,polarity").unwrap();
        writeln!(file, "reading,Quiet reading,3,positive").unwrap();
        writeln!(file, "reading,Reading again,1,positive").unwrap();

        let err = BehaviorCatalog::from_csv(file.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate behavior id"));
    }
}
