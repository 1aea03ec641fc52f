use crate::error::{MigrateError, Result};
use serde::Serialize;

/// Which databases a command runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum TargetSelection {
    #[default]
    Default,
    Single(String),
    List(Vec<String>),
    Patterns(Vec<String>),
    All,
}

impl TargetSelection {
    /// Build a selection from the command-line flags; at most one may be set.
    pub fn from_flags(
        database: Option<String>,
        databases: Vec<String>,
        patterns: Vec<String>,
        all: bool,
    ) -> Result<Self> {
        let chosen = [
            database.is_some(),
            !databases.is_empty(),
            !patterns.is_empty(),
            all,
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if chosen > 1 {
            return Err(MigrateError::validation(
                "--database, --databases, --patterns and --all are mutually exclusive",
            ));
        }

        Ok(match (database, all) {
            (Some(name), _) => TargetSelection::Single(name),
            (None, true) => TargetSelection::All,
            _ if !databases.is_empty() => TargetSelection::List(split_names(databases)),
            _ if !patterns.is_empty() => TargetSelection::Patterns(split_names(patterns)),
            _ => TargetSelection::Default,
        })
    }

    pub fn describe(&self) -> String {
        match self {
            TargetSelection::Default => "default database".to_string(),
            TargetSelection::Single(name) => format!("database {}", name),
            TargetSelection::List(names) => format!("databases {}", names.join(", ")),
            TargetSelection::Patterns(patterns) => format!("patterns {}", patterns.join(", ")),
            TargetSelection::All => "all databases".to_string(),
        }
    }
}

/// Accept both repeated flags and comma-separated values.
fn split_names(values: Vec<String>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for value in values {
        for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}
