//! Schema script parsing: classifies `CREATE` statements and extracts the
//! object name plus the names it structurally depends on.

use crate::error::{MigrateError, Result};
use crate::sqlparse::scanner::{RawStatement, preview, split_statements};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Backtick-optional, schema-optional identifier: two capture groups.
const IDENT: &str = r"(`[^`]+`|\w+)(?:\s*\.\s*(`[^`]+`|\w+))?";

fn compile(pattern: &str) -> Regex {
    Regex::new(&pattern.replace("{IDENT}", IDENT)).expect("static DDL pattern must compile")
}

static CREATE_PREFIX: Lazy<Regex> = Lazy::new(|| compile(r"(?is)^CREATE\s"));

static TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?is)^CREATE\s+(?:TEMPORARY\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?{IDENT}")
});

static VIEW_RE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?is)^CREATE\s+(?:OR\s+REPLACE\s+)?(?:ALGORITHM\s*=\s*\w+\s+)?(?:DEFINER\s*=\s*\S+\s+)?(?:SQL\s+SECURITY\s+\w+\s+)?VIEW\s+(?:IF\s+NOT\s+EXISTS\s+)?{IDENT}",
    )
});

static ROUTINE_RE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?is)^CREATE\s+(?:OR\s+REPLACE\s+)?(?:DEFINER\s*=\s*\S+\s+)?(?:AGGREGATE\s+)?(PROCEDURE|FUNCTION)\s+(?:IF\s+NOT\s+EXISTS\s+)?{IDENT}",
    )
});

static TRIGGER_RE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?is)^CREATE\s+(?:OR\s+REPLACE\s+)?(?:DEFINER\s*=\s*\S+\s+)?TRIGGER\s+(?:IF\s+NOT\s+EXISTS\s+)?{IDENT}\s+(?:BEFORE|AFTER|INSTEAD\s+OF)\s+(?:INSERT|UPDATE|DELETE)(?:\s+OR\s+(?:INSERT|UPDATE|DELETE))*\s+(?:OF\s+.+?\s+)?ON\s+{IDENT}",
    )
});

static INDEX_RE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?is)^CREATE\s+(?:OR\s+REPLACE\s+)?(?:UNIQUE\s+|FULLTEXT\s+|SPATIAL\s+)?INDEX\s+(?:IF\s+NOT\s+EXISTS\s+)?{IDENT}\s+(?:USING\s+\w+\s+)?ON\s+{IDENT}",
    )
});

/// Object keyword of a CREATE statement, used to spot recognized kinds
/// whose name could not be extracted.
static KIND_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?is)^CREATE\s+(?:OR\s+REPLACE\s+)?(?:TEMPORARY\s+|UNIQUE\s+|FULLTEXT\s+|SPATIAL\s+|AGGREGATE\s+)?(?:ALGORITHM\s*=\s*\w+\s+)?(?:DEFINER\s*=\s*\S+\s+)?(?:SQL\s+SECURITY\s+\w+\s+)?(TABLE|VIEW|PROCEDURE|FUNCTION|TRIGGER|INDEX)\b",
    )
});

static OTHER_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?is)^CREATE\s+(?:OR\s+REPLACE\s+)?(\w+)\s+(?:IF\s+NOT\s+EXISTS\s+)?{IDENT}")
});

static REFERENCES_RE: Lazy<Regex> = Lazy::new(|| compile(r"(?is)\bREFERENCES\s+{IDENT}"));

static SOURCE_RE: Lazy<Regex> = Lazy::new(|| compile(r"(?is)\b(?:FROM|JOIN)\s+{IDENT}"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjectKind {
    Table,
    View,
    Function,
    Procedure,
    Trigger,
    Index,
    Other,
}

impl ObjectKind {
    /// Creation priority used to break ties between independent statements.
    pub fn priority(self) -> u8 {
        match self {
            ObjectKind::Table => 1,
            ObjectKind::View => 2,
            ObjectKind::Function | ObjectKind::Procedure => 3,
            ObjectKind::Trigger => 4,
            ObjectKind::Index => 5,
            ObjectKind::Other => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::Function => "FUNCTION",
            ObjectKind::Procedure => "PROCEDURE",
            ObjectKind::Trigger => "TRIGGER",
            ObjectKind::Index => "INDEX",
            ObjectKind::Other => "OTHER",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A parsed, classified DDL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    pub kind: ObjectKind,
    /// Object name without quotes, `schema.name` when qualified
    pub name: String,
    pub sql: String,
    pub depends_on: BTreeSet<String>,
    /// Index and trigger statements carry the table they belong to
    pub table: Option<String>,
    pub line: usize,
}

impl Statement {
    pub fn label(&self) -> String {
        format!("{} {}", self.kind, self.name)
    }

    /// Unqualified part of the name.
    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }
}

pub fn local_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Whether a dependency reference points at the object named `name`.
pub fn refers_to(reference: &str, name: &str) -> bool {
    let qualified = reference.contains('.') && name.contains('.');
    if qualified {
        reference.eq_ignore_ascii_case(name)
    } else {
        local_name(reference).eq_ignore_ascii_case(local_name(name))
    }
}

fn ident_from(caps: &regex::Captures<'_>, first: usize) -> Option<String> {
    let part = |i: usize| caps.get(i).map(|m| m.as_str().trim_matches('`').to_string());
    let head = part(first)?;
    Some(match part(first + 1) {
        Some(tail) => format!("{}.{}", head, tail),
        None => head,
    })
}

fn collect_refs(re: &Regex, sql: &str, own_name: &str) -> BTreeSet<String> {
    re.captures_iter(sql)
        .filter_map(|caps| ident_from(&caps, 1))
        .filter(|name| !refers_to(name, own_name))
        .collect()
}

/// Classify one raw statement. Non-`CREATE` statements yield `None`.
pub fn classify(raw: &RawStatement) -> Result<Option<Statement>> {
    let sql = raw.text.as_str();
    if !CREATE_PREFIX.is_match(sql) {
        debug!("Skipping non-DDL statement at line {}: {}", raw.line, preview(sql));
        return Ok(None);
    }

    let statement = |kind, name: String, depends_on, table| Statement {
        kind,
        name,
        sql: sql.to_string(),
        depends_on,
        table,
        line: raw.line,
    };

    if let Some(caps) = TABLE_RE.captures(sql) {
        let name = ident_from(&caps, 1).unwrap_or_default();
        let deps = collect_refs(&REFERENCES_RE, sql, &name);
        return Ok(Some(statement(ObjectKind::Table, name, deps, None)));
    }

    if let Some(caps) = VIEW_RE.captures(sql) {
        let name = ident_from(&caps, 1).unwrap_or_default();
        let deps = collect_refs(&SOURCE_RE, sql, &name);
        return Ok(Some(statement(ObjectKind::View, name, deps, None)));
    }

    if let Some(caps) = ROUTINE_RE.captures(sql) {
        let kind = if caps[1].eq_ignore_ascii_case("PROCEDURE") {
            ObjectKind::Procedure
        } else {
            ObjectKind::Function
        };
        let name = ident_from(&caps, 2).unwrap_or_default();
        return Ok(Some(statement(kind, name, BTreeSet::new(), None)));
    }

    if let Some(caps) = TRIGGER_RE.captures(sql) {
        let name = ident_from(&caps, 1).unwrap_or_default();
        let table = ident_from(&caps, 3).unwrap_or_default();
        let mut deps = collect_refs(&SOURCE_RE, sql, &name);
        deps.insert(table.clone());
        return Ok(Some(statement(ObjectKind::Trigger, name, deps, Some(table))));
    }

    if let Some(caps) = INDEX_RE.captures(sql) {
        let name = ident_from(&caps, 1).unwrap_or_default();
        let table = ident_from(&caps, 3).unwrap_or_default();
        let deps = BTreeSet::from([table.clone()]);
        return Ok(Some(statement(ObjectKind::Index, name, deps, Some(table))));
    }

    if let Some(caps) = KIND_KEYWORD_RE.captures(sql) {
        return Err(MigrateError::parse(
            raw.line,
            format!(
                "could not extract the {} name from: {}",
                caps[1].to_uppercase(),
                preview(sql)
            ),
        ));
    }

    let name = OTHER_RE
        .captures(sql)
        .and_then(|caps| {
            ident_from(&caps, 2).map(|ident| format!("{} {}", caps[1].to_uppercase(), ident))
        })
        .unwrap_or_else(|| format!("statement@{}", raw.line));
    Ok(Some(statement(ObjectKind::Other, name, BTreeSet::new(), None)))
}

/// Parse a schema script into classified statements, in source order.
pub fn parse_script(script: &str) -> Result<Vec<Statement>> {
    let mut statements = Vec::new();
    for raw in split_statements(script)? {
        if let Some(statement) = classify(&raw)? {
            statements.push(statement);
        }
    }
    Ok(statements)
}

pub fn parse_file(path: &Path) -> Result<Vec<Statement>> {
    let script = std::fs::read_to_string(path).map_err(|e| MigrateError::io(path, e))?;
    parse_script(&script)
}

/// Reject duplicate `(kind, name)` pairs.
pub fn validate_statements(statements: &[Statement]) -> Result<()> {
    let mut seen: HashMap<(ObjectKind, String), usize> = HashMap::new();
    for statement in statements {
        if statement.name.is_empty() {
            return Err(MigrateError::parse(
                statement.line,
                format!("{} statement without a name", statement.kind),
            ));
        }
        let key = (statement.kind, statement.name.to_lowercase());
        if let Some(first_line) = seen.insert(key, statement.line) {
            return Err(MigrateError::parse(
                statement.line,
                format!(
                    "duplicate {} '{}' (first defined at line {})",
                    statement.kind, statement.name, first_line
                ),
            ));
        }
    }
    Ok(())
}
