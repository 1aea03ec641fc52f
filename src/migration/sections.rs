use crate::error::{MigrateError, Result};
use crate::migration::DatabaseTarget;
use crate::sqlparse::scanner::{RawStatement, StatementSplitter};

const DIRECTIVE_PREFIX: &str = "-- migrate:";

/// The executable parts of a migration file.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationSections {
    pub target: DatabaseTarget,
    pub up: Vec<RawStatement>,
    pub down: Vec<RawStatement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Up,
    Down,
}

/// Parse a migration body.
///
/// ```sql
/// -- migrate:database shop_001
/// -- migrate:up
/// CREATE TABLE orders (id INT PRIMARY KEY);
/// -- migrate:down
/// DROP TABLE orders;
/// ```
///
/// Content before any section marker belongs to `up`, so a file without
/// markers is a forward-only migration. Statement lines are the file's lines.
pub fn parse_migration_sections(content: &str) -> Result<MigrationSections> {
    let mut target = DatabaseTarget::Unspecified;
    let mut up = Vec::new();
    let mut down = Vec::new();
    let mut current = Section::Up;
    let mut explicit_up = false;
    let mut explicit_down = false;
    let mut splitter = StatementSplitter::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();

        if let Some(directive) = trimmed.strip_prefix(DIRECTIVE_PREFIX) {
            let (keyword, argument) = match directive.split_once(char::is_whitespace) {
                Some((keyword, argument)) => (keyword, argument.trim()),
                None => (directive, ""),
            };
            match keyword.to_lowercase().as_str() {
                "up" | "down" => {
                    let next = if keyword.eq_ignore_ascii_case("up") {
                        Section::Up
                    } else {
                        Section::Down
                    };
                    let seen = match next {
                        Section::Up => &mut explicit_up,
                        Section::Down => &mut explicit_down,
                    };
                    if *seen {
                        return Err(MigrateError::parse(
                            line_no,
                            format!("duplicate '{}{}' marker", DIRECTIVE_PREFIX, keyword),
                        ));
                    }
                    *seen = true;
                    if next != current {
                        std::mem::take(&mut splitter).finish()?;
                        current = next;
                    }
                }
                "database" => {
                    if argument.is_empty() || argument.contains(',') {
                        return Err(MigrateError::parse(
                            line_no,
                            "'-- migrate:database' takes exactly one database name",
                        ));
                    }
                    set_target(&mut target, DatabaseTarget::Single(argument.to_string()), line_no)?;
                }
                "databases" => {
                    let names: Vec<String> = argument
                        .split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                        .collect();
                    if names.is_empty() {
                        return Err(MigrateError::parse(
                            line_no,
                            "'-- migrate:databases' needs at least one database name",
                        ));
                    }
                    set_target(&mut target, DatabaseTarget::Many(names), line_no)?;
                }
                other => {
                    return Err(MigrateError::parse(
                        line_no,
                        format!("unknown directive '{}{}'", DIRECTIVE_PREFIX, other),
                    ));
                }
            }
            continue;
        }

        let completed = splitter.push_line(line_no, line);
        match current {
            Section::Up => up.extend(completed),
            Section::Down => down.extend(completed),
        }
    }
    splitter.finish()?;

    Ok(MigrationSections { target, up, down })
}

fn set_target(current: &mut DatabaseTarget, target: DatabaseTarget, line: usize) -> Result<()> {
    if *current != DatabaseTarget::Unspecified {
        return Err(MigrateError::parse(
            line,
            "target database declared more than once",
        ));
    }
    *current = target;
    Ok(())
}
