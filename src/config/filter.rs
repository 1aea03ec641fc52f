use crate::constants::is_system_database;
use crate::error::{MigrateError, Result};
use glob::Pattern;

/// Database name filter built from glob patterns (`*`, `?`).
#[derive(Debug, Clone, Default)]
pub struct DatabaseFilter {
    patterns: Vec<Pattern>,
}

impl DatabaseFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| {
                    MigrateError::validation(format!(
                        "invalid database pattern '{}': {}",
                        pattern, e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `name` matches any pattern. An empty filter matches everything.
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(name))
    }

    /// Whether a database discovered on the server should be considered:
    /// never a system schema, otherwise a pattern match.
    pub fn should_include_discovered(&self, name: &str) -> bool {
        !is_system_database(name) && self.matches(name)
    }
}
