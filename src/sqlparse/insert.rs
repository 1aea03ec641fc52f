//! Data script parsing: `INSERT [IGNORE] INTO ... VALUES (...), (...)` rows
//! and `SET @var = ...` session variables evaluated at parse time.

use crate::db::Value;
use crate::error::{MigrateError, Result};
use crate::sqlparse::scanner::{preview, split_statements};
use chrono::{DateTime, Local};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

static INSERT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^INSERT\s+(IGNORE\s+)?INTO\s+(`[^`]+`|\w+)(?:\s*\.\s*(`[^`]+`|\w+))?\s*(?:\(([^)]*)\))?\s*VALUES\s*(.*)$",
    )
    .expect("static INSERT pattern must compile")
});

static INSERT_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^INSERT\s").expect("static pattern must compile"));

static SET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^SET\s+@(\w+)\s*:?=\s*(.+)$").expect("static SET pattern must compile")
});

/// One parsed INSERT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    /// Empty when the statement relies on positional columns
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// `INSERT IGNORE` in the source
    pub ignore: bool,
    pub line: usize,
}

impl InsertStatement {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Parser for data scripts. Holds the session variables defined so far and
/// the clock used for `NOW()`.
#[derive(Debug, Clone)]
pub struct InsertParser {
    variables: HashMap<String, Value>,
    now: DateTime<Local>,
}

impl Default for InsertParser {
    fn default() -> Self {
        Self::new()
    }
}

impl InsertParser {
    pub fn new() -> Self {
        Self::with_clock(Local::now())
    }

    pub fn with_clock(now: DateTime<Local>) -> Self {
        Self {
            variables: HashMap::new(),
            now,
        }
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(&name.to_lowercase())
    }

    pub fn parse_file(&mut self, path: &Path) -> Result<Vec<InsertStatement>> {
        let script = std::fs::read_to_string(path).map_err(|e| MigrateError::io(path, e))?;
        self.parse_script(&script)
    }

    pub fn parse_script(&mut self, script: &str) -> Result<Vec<InsertStatement>> {
        let mut statements = Vec::new();

        for raw in split_statements(script)? {
            if let Some(caps) = SET_RE.captures(&raw.text) {
                let name = caps[1].to_lowercase();
                let value = self.parse_value(caps[2].trim(), raw.line)?;
                debug!("Session variable @{} = {}", name, value);
                self.variables.insert(name, value);
                continue;
            }

            if INSERT_PREFIX.is_match(&raw.text) {
                statements.push(self.parse_insert(&raw.text, raw.line)?);
            } else {
                debug!(
                    "Skipping non-INSERT statement at line {}: {}",
                    raw.line,
                    preview(&raw.text)
                );
            }
        }

        Ok(statements)
    }

    fn parse_insert(&self, sql: &str, line: usize) -> Result<InsertStatement> {
        let caps = INSERT_RE.captures(sql).ok_or_else(|| {
            MigrateError::parse(line, format!("malformed INSERT statement: {}", preview(sql)))
        })?;

        let head = caps[2].trim_matches('`').to_string();
        let table = match caps.get(3) {
            Some(tail) => format!("{}.{}", head, tail.as_str().trim_matches('`')),
            None => head,
        };

        let columns = caps
            .get(4)
            .map(|cols| {
                cols.as_str()
                    .split(',')
                    .map(|c| c.trim().trim_matches('`').to_string())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let groups = parse_value_groups(caps[5].trim(), line)?;
        let rows = groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|token| self.parse_value(token, line))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(InsertStatement {
            table,
            columns,
            rows,
            ignore: caps.get(1).is_some(),
            line,
        })
    }

    /// Convert a single literal token from a VALUES group.
    pub fn parse_value(&self, token: &str, line: usize) -> Result<Value> {
        let token = token.trim();
        if token.is_empty() {
            return Err(MigrateError::parse(line, "empty value in VALUES list"));
        }

        if token.eq_ignore_ascii_case("NULL") {
            return Ok(Value::Null);
        }

        if let Some(name) = token.strip_prefix('@') {
            return self
                .variable(name)
                .cloned()
                .ok_or_else(|| MigrateError::parse(line, format!("undefined variable @{}", name)));
        }

        let bytes = token.as_bytes();
        if bytes.len() >= 2 {
            let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
            if (first == b'\'' || first == b'"') && first == last {
                let quote = first as char;
                return Ok(Value::Text(unescape(&token[1..token.len() - 1], quote)));
            }
        }

        if let Ok(int) = token.parse::<i64>() {
            return Ok(Value::Int(int));
        }
        if let Ok(float) = token.parse::<f64>() {
            return Ok(Value::Float(float));
        }
        if token.eq_ignore_ascii_case("TRUE") {
            return Ok(Value::Bool(true));
        }
        if token.eq_ignore_ascii_case("FALSE") {
            return Ok(Value::Bool(false));
        }

        Ok(self
            .time_function(token)
            .unwrap_or_else(|| Value::Text(token.to_string())))
    }

    /// `NOW()` and friends, evaluated against the parser clock.
    fn time_function(&self, token: &str) -> Option<Value> {
        let compact = token.replace(char::is_whitespace, "").to_uppercase();
        match compact.as_str() {
            "NOW()" | "CURRENT_TIMESTAMP" | "CURRENT_TIMESTAMP()" => {
                Some(Value::Timestamp(self.now.naive_local()))
            }
            "UNIX_TIMESTAMP(NOW())" | "UNIX_TIMESTAMP()" => Some(Value::Int(self.now.timestamp())),
            _ => None,
        }
    }
}

/// Resolve backslash escapes and doubled quotes inside a string literal body.
fn unescape(body: &str, quote: char) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else if c == quote && chars.peek() == Some(&quote) {
            chars.next();
            out.push(quote);
        } else {
            out.push(c);
        }
    }
    out
}

/// Split `(a, 'b,c', f(x)), (d, e, f)` into per-row raw value tokens.
pub fn parse_value_groups(values: &str, line: usize) -> Result<Vec<Vec<String>>> {
    let mut groups = Vec::new();
    let mut current_group: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = values.chars();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' if depth > 0 => {
                quote = Some(c);
                current.push(c);
            }
            '(' => {
                if depth > 0 {
                    current.push(c);
                }
                depth += 1;
            }
            ')' => {
                if depth == 0 {
                    return Err(MigrateError::parse(line, "unbalanced ')' in VALUES list"));
                }
                depth -= 1;
                if depth == 0 {
                    current_group.push(current.trim().to_string());
                    current.clear();
                    groups.push(std::mem::take(&mut current_group));
                } else {
                    current.push(c);
                }
            }
            ',' if depth == 1 => {
                current_group.push(current.trim().to_string());
                current.clear();
            }
            _ if depth > 0 => current.push(c),
            ',' => {}
            c if c.is_whitespace() => {}
            other => {
                return Err(MigrateError::parse(
                    line,
                    format!("unexpected '{}' between VALUES groups", other),
                ));
            }
        }
    }

    if quote.is_some() || depth != 0 {
        return Err(MigrateError::parse(line, "unterminated VALUES group"));
    }

    Ok(groups)
}

/// Structural checks run before any data is sent to a database.
pub fn validate_inserts(statements: &[InsertStatement]) -> Result<()> {
    if statements.is_empty() {
        return Err(MigrateError::validation("no INSERT statements found"));
    }

    for (index, statement) in statements.iter().enumerate() {
        if statement.table.is_empty() {
            return Err(MigrateError::parse(
                statement.line,
                format!("statement {} has no table name", index + 1),
            ));
        }
        if statement.rows.is_empty() {
            return Err(MigrateError::parse(
                statement.line,
                format!("statement {} ({}) has no VALUES rows", index + 1, statement.table),
            ));
        }
        if statement.columns.is_empty() {
            let width = statement.rows[0].len();
            if let Some((row_index, row)) = statement
                .rows
                .iter()
                .enumerate()
                .find(|(_, row)| row.len() != width)
            {
                return Err(MigrateError::parse(
                    statement.line,
                    format!(
                        "statement {} ({}): row {} has {} values but row 1 has {}",
                        index + 1,
                        statement.table,
                        row_index + 1,
                        row.len(),
                        width
                    ),
                ));
            }
            continue;
        }
        for (row_index, row) in statement.rows.iter().enumerate() {
            if row.len() != statement.columns.len() {
                return Err(MigrateError::parse(
                    statement.line,
                    format!(
                        "statement {} ({}): row {} has {} values but {} columns are declared",
                        index + 1,
                        statement.table,
                        row_index + 1,
                        row.len(),
                        statement.columns.len()
                    ),
                ));
            }
        }
    }

    Ok(())
}

/// Distinct table names in first-seen order.
pub fn table_names(statements: &[InsertStatement]) -> Vec<String> {
    statements.iter().map(|s| s.table.clone()).unique().collect()
}
