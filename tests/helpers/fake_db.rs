//! In-memory stand-in for a MySQL server.
//!
//! Understands the statement shapes dbmt emits: ledger and lock upkeep,
//! `information_schema` lookups, multi-row `INSERT` (plain, `IGNORE` and
//! `ON DUPLICATE KEY UPDATE`), paged `SELECT`, `TRUNCATE` and the DDL used in
//! test scripts. Transactions snapshot the database and restore it on rollback.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use dbmt::database::{DatabaseManager, ManagerOptions};
use dbmt::db::{Connector, Database, DbResult, Row, SqlExecutor, Transaction, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

static INSERT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^INSERT\s+(IGNORE\s+)?INTO\s+([`\w.]+)\s*(?:\(([^)]*)\))?\s*VALUES\s*(.*?)(?:\s+ON\s+DUPLICATE\s+KEY\s+UPDATE\s+(.*))?$",
    )
    .unwrap()
});

static SELECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^SELECT\s+(.*?)\s+FROM\s+([`\w.]+)(?:\s+WHERE\s+(.*?))?(?:\s+ORDER\s+BY\s+(.*?))?(?:\s+LIMIT\s+(\?|\d+)(?:\s+OFFSET\s+(\?|\d+))?)?$",
    )
    .unwrap()
});

static UPDATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^UPDATE\s+([`\w.]+)\s+SET\s+(.*?)(?:\s+WHERE\s+(.*))?$").unwrap()
});

static DELETE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^DELETE\s+FROM\s+([`\w.]+)(?:\s+WHERE\s+(.*))?$").unwrap());

static CONDITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*([`\w.]+)\s*(=|!=|<>|>=|<=|>|<)\s*(.+?)\s*$").unwrap()
});

static AND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+AND\s+").unwrap());

static REFERENCES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bREFERENCES\s+([`\w.]+)").unwrap());

static FROM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([`\w.]+)").unwrap());

static TRIGGER_ON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:BEFORE|AFTER)\s+\w+\s+ON\s+([`\w.]+)").unwrap());

const SYSTEM_DATABASES: [&str; 4] = ["information_schema", "mysql", "performance_schema", "sys"];

#[derive(Debug, Clone, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    pub auto_increment: Option<usize>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    fn index_of(&self, column: &str) -> Option<usize> {
        let column = strip_ident(column);
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(&column))
    }

    fn key_of(&self, row: &[Value]) -> Option<Vec<Value>> {
        if self.primary_key.is_empty() {
            return None;
        }
        self.primary_key
            .iter()
            .map(|pk| self.index_of(pk).map(|i| row[i].clone()))
            .collect()
    }
}

/// Objects of one logical database.
#[derive(Debug, Clone, Default)]
pub struct DbState {
    pub tables: BTreeMap<String, Table>,
    pub views: BTreeSet<String>,
    pub indexes: BTreeSet<(String, String)>,
    /// `(FUNCTION|PROCEDURE, name)`
    pub routines: BTreeSet<(String, String)>,
    pub triggers: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct ServerState {
    databases: BTreeMap<String, DbState>,
    /// `(database, statement)` in execution order.
    log: Vec<(String, String)>,
    /// `(database, sql fragment, message)`; `*` matches every database.
    failures: Vec<(String, String, String)>,
    unreachable: BTreeSet<String>,
    clock: i64,
}

impl ServerState {
    fn now(&self) -> NaiveDateTime {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        base + chrono::Duration::seconds(self.clock)
    }
}

fn protocol(message: impl Into<String>) -> sqlx::Error {
    sqlx::Error::Protocol(message.into())
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .to_string()
}

fn strip_ident(name: &str) -> String {
    let name = name.trim().trim_matches('`').trim_matches('"');
    name.rsplit('.')
        .next()
        .unwrap_or(name)
        .trim_matches('`')
        .to_string()
}

fn key(name: &str) -> String {
    strip_ident(name).to_lowercase()
}

/// Split on commas outside parentheses and quotes.
fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut current = String::new();
    for c in s.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth -= 1,
                ',' if depth == 0 => {
                    parts.push(current.trim().to_string());
                    current.clear();
                    continue;
                }
                _ => {}
            },
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Contents of each top-level `( ... )` group.
fn tuples(s: &str) -> Vec<String> {
    let mut groups = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut current = String::new();
    for c in s.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                current.push(c);
            }
            None => match c {
                '\'' => {
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
                    depth -= 1;
                    if depth == 0 {
                        groups.push(std::mem::take(&mut current));
                    } else {
                        current.push(c);
                    }
                }
                _ if depth > 0 => current.push(c),
                _ => {}
            },
        }
    }
    groups
}

struct Args<'a> {
    values: &'a [Value],
    next: usize,
}

impl<'a> Args<'a> {
    fn new(values: &'a [Value]) -> Self {
        Self { values, next: 0 }
    }

    fn take(&mut self) -> DbResult<Value> {
        let value = self
            .values
            .get(self.next)
            .cloned()
            .ok_or_else(|| protocol("not enough bind arguments"))?;
        self.next += 1;
        Ok(value)
    }
}

fn literal(token: &str, args: &mut Args<'_>, now: NaiveDateTime) -> DbResult<Value> {
    let token = token.trim();
    let upper = token.to_uppercase();
    if token == "?" {
        return args.take();
    }
    if upper == "TRUE" {
        return Ok(Value::Bool(true));
    }
    if upper == "FALSE" {
        return Ok(Value::Bool(false));
    }
    if upper == "NULL" {
        return Ok(Value::Null);
    }
    if upper == "NOW()" || upper == "CURRENT_TIMESTAMP" {
        return Ok(Value::Timestamp(now));
    }
    if upper == "NOW() - INTERVAL ? SECOND" {
        let seconds = args.take()?.as_i64().unwrap_or(0);
        return Ok(Value::Timestamp(now - chrono::Duration::seconds(seconds)));
    }
    if let Ok(n) = token.parse::<i64>() {
        return Ok(Value::Int(n));
    }
    if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
        return Ok(Value::Text(token[1..token.len() - 1].replace("''", "'")));
    }
    Err(protocol(format!("unsupported literal: {}", token)))
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Timestamp(x), Value::Timestamp(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (x, y) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => None,
        },
    }
}

fn sort_key_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => compare(a, b).unwrap_or(Ordering::Equal),
    }
}

struct Condition {
    column: usize,
    op: String,
    value: Value,
}

impl Condition {
    fn matches(&self, row: &[Value]) -> bool {
        let Some(ordering) = compare(&row[self.column], &self.value) else {
            return false;
        };
        match self.op.as_str() {
            "=" => ordering == Ordering::Equal,
            "!=" | "<>" => ordering != Ordering::Equal,
            ">" => ordering == Ordering::Greater,
            "<" => ordering == Ordering::Less,
            ">=" => ordering != Ordering::Less,
            "<=" => ordering != Ordering::Greater,
            _ => false,
        }
    }
}

fn parse_where(
    table: &Table,
    clause: Option<&str>,
    args: &mut Args<'_>,
    now: NaiveDateTime,
) -> DbResult<Vec<Condition>> {
    let Some(clause) = clause else {
        return Ok(Vec::new());
    };
    let mut conditions = Vec::new();
    for part in AND_RE.split(clause) {
        let part = part.trim();
        let part = part
            .strip_prefix('(')
            .and_then(|p| p.strip_suffix(')'))
            .unwrap_or(part);
        let caps = CONDITION_RE
            .captures(part)
            .ok_or_else(|| protocol(format!("unsupported condition: {}", part)))?;
        let column = table
            .index_of(&caps[1])
            .ok_or_else(|| protocol(format!("Unknown column '{}'", &caps[1])))?;
        conditions.push(Condition {
            column,
            op: caps[2].to_string(),
            value: literal(&caps[3], args, now)?,
        });
    }
    Ok(conditions)
}

fn count_row(count: usize) -> Vec<Row> {
    vec![Row::new(
        vec!["COUNT(*)".to_string()],
        vec![Value::Int(count as i64)],
    )]
}

fn name_rows(column: &str, names: impl IntoIterator<Item = String>) -> Vec<Row> {
    names
        .into_iter()
        .map(|name| Row::new(vec![column.to_string()], vec![Value::Text(name)]))
        .collect()
}

/// Name following `prefix`, skipping `IF [NOT] EXISTS`.
fn object_name(norm: &str, prefix_words: usize) -> String {
    let words: Vec<&str> = norm.split_whitespace().collect();
    let mut i = prefix_words;
    if words.get(i).is_some_and(|w| w.eq_ignore_ascii_case("IF")) {
        i += if words.get(i + 1).is_some_and(|w| w.eq_ignore_ascii_case("NOT")) {
            3
        } else {
            2
        };
    }
    let raw = words.get(i).copied().unwrap_or_default();
    key(raw.split('(').next().unwrap_or(raw))
}

impl ServerState {
    fn db(&mut self, name: &str) -> DbResult<&mut DbState> {
        self.databases
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| protocol(format!("Unknown database '{}'", name)))
    }

    fn execute(&mut self, database: Option<&str>, sql: &str, args: &[Value]) -> DbResult<u64> {
        let norm = normalize(sql);
        let upper = norm.to_uppercase();
        let db_name = database.unwrap_or_default().to_string();
        self.log.push((db_name.clone(), norm.clone()));
        self.clock += 1;

        if let Some((_, _, message)) = self
            .failures
            .iter()
            .find(|(db, fragment, _)| (db == "*" || *db == db_name) && norm.contains(fragment.as_str()))
        {
            return Err(protocol(message.clone()));
        }

        if upper.starts_with("CREATE DATABASE") {
            let name = object_name(&norm, 2);
            if self.databases.contains_key(&name) {
                return Err(protocol(format!("Can't create database '{}'; database exists", name)));
            }
            self.databases.insert(name, DbState::default());
            return Ok(1);
        }

        let Some(database) = database.filter(|d| !d.is_empty()) else {
            return Err(protocol("No database selected"));
        };
        let now = self.now();
        let db = self.db(database)?;

        if upper.starts_with("CREATE TABLE") {
            return create_table(db, &norm, &upper);
        }
        if upper.starts_with("DROP TABLE") {
            let name = object_name(&norm, 2);
            if db.tables.remove(&name).is_none() && !upper.starts_with("DROP TABLE IF EXISTS") {
                return Err(protocol(format!("Unknown table '{}'", name)));
            }
            db.indexes.retain(|(table, _)| *table != name);
            return Ok(0);
        }
        if upper.starts_with("CREATE VIEW") || upper.starts_with("CREATE OR REPLACE VIEW") {
            let skip = if upper.starts_with("CREATE OR REPLACE") { 4 } else { 2 };
            for caps in FROM_RE.captures_iter(&norm) {
                let source = key(&caps[1]);
                if !db.tables.contains_key(&source) && !db.views.contains(&source) {
                    return Err(protocol(format!("Table '{}' doesn't exist", source)));
                }
            }
            db.views.insert(object_name(&norm, skip));
            return Ok(0);
        }
        if upper.starts_with("DROP VIEW") {
            db.views.remove(&object_name(&norm, 2));
            return Ok(0);
        }
        if upper.starts_with("CREATE INDEX") || upper.starts_with("CREATE UNIQUE INDEX") {
            let skip = if upper.starts_with("CREATE UNIQUE") { 3 } else { 2 };
            let index = object_name(&norm, skip);
            let words: Vec<&str> = norm.split_whitespace().collect();
            let on = words
                .iter()
                .position(|w| w.eq_ignore_ascii_case("ON"))
                .ok_or_else(|| protocol("CREATE INDEX without ON"))?;
            let table = key(words[on + 1].split('(').next().unwrap_or_default());
            if !db.tables.contains_key(&table) {
                return Err(protocol(format!("Table '{}' doesn't exist", table)));
            }
            db.indexes.insert((table, index));
            return Ok(0);
        }
        if upper.starts_with("DROP INDEX") {
            let index = object_name(&norm, 2);
            db.indexes.retain(|(_, name)| *name != index);
            return Ok(0);
        }
        for kind in ["FUNCTION", "PROCEDURE"] {
            if upper.starts_with(&format!("CREATE {}", kind)) {
                db.routines.insert((kind.to_string(), object_name(&norm, 2)));
                return Ok(0);
            }
            if upper.starts_with(&format!("DROP {}", kind)) {
                db.routines.remove(&(kind.to_string(), object_name(&norm, 2)));
                return Ok(0);
            }
        }
        if upper.starts_with("CREATE TRIGGER") {
            if let Some(caps) = TRIGGER_ON_RE.captures(&norm) {
                let table = key(&caps[1]);
                if !db.tables.contains_key(&table) {
                    return Err(protocol(format!("Table '{}' doesn't exist", table)));
                }
            }
            db.triggers.insert(object_name(&norm, 2));
            return Ok(0);
        }
        if upper.starts_with("DROP TRIGGER") {
            db.triggers.remove(&object_name(&norm, 2));
            return Ok(0);
        }
        if upper.starts_with("ALTER TABLE") {
            return alter_table(db, &norm);
        }
        if upper.starts_with("INSERT") {
            return insert(db, &norm, args, now);
        }
        if upper.starts_with("UPDATE") {
            return update(db, &norm, args, now);
        }
        if upper.starts_with("DELETE") {
            return delete(db, &norm, args, now);
        }
        if upper.starts_with("TRUNCATE") {
            let name = object_name(&norm, 2);
            let table = db
                .tables
                .get_mut(&name)
                .ok_or_else(|| protocol(format!("Table '{}' doesn't exist", name)))?;
            table.rows.clear();
            return Ok(0);
        }
        Ok(0)
    }

    fn query(&mut self, database: Option<&str>, sql: &str, args: &[Value]) -> DbResult<Vec<Row>> {
        let norm = normalize(sql);
        let upper = norm.to_uppercase();
        let db_name = database.unwrap_or_default().to_string();
        self.log.push((db_name.clone(), norm.clone()));

        if let Some((_, _, message)) = self
            .failures
            .iter()
            .find(|(db, fragment, _)| (db == "*" || *db == db_name) && norm.contains(fragment.as_str()))
        {
            return Err(protocol(message.clone()));
        }

        if upper == "SHOW DATABASES" {
            let mut names: Vec<String> = SYSTEM_DATABASES.iter().map(|s| s.to_string()).collect();
            names.extend(self.databases.keys().cloned());
            return Ok(name_rows("Database", names));
        }
        if upper.contains("INFORMATION_SCHEMA.SCHEMATA") {
            let name = args.first().and_then(Value::as_str).unwrap_or_default();
            let exists = self.databases.contains_key(&name.to_lowercase())
                || SYSTEM_DATABASES.contains(&name.to_lowercase().as_str());
            return Ok(count_row(usize::from(exists)));
        }
        if upper.contains("INFORMATION_SCHEMA.") {
            let scoped = upper.contains("_SCHEMA = ?");
            let schema = if scoped {
                args.last().and_then(Value::as_str).map(str::to_string)
            } else {
                database.map(str::to_string)
            };
            let schema = schema
                .filter(|s| !s.is_empty())
                .ok_or_else(|| protocol("No database selected"))?;
            let db = self.db(&schema)?;
            return information_schema(db, &upper, args);
        }
        if !upper.contains(" FROM ") {
            return Ok(vec![Row::new(vec!["1".to_string()], vec![Value::Int(1)])]);
        }

        let Some(database) = database.filter(|d| !d.is_empty()) else {
            return Err(protocol("No database selected"));
        };
        let now = self.now();
        let db = self.db(database)?;
        select(db, &norm, args, now)
    }
}

fn information_schema(db: &DbState, upper: &str, args: &[Value]) -> DbResult<Vec<Row>> {
    let arg = |i: usize| {
        args.get(i)
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .unwrap_or_default()
    };

    if upper.contains("INFORMATION_SCHEMA.TABLES") && upper.contains("TABLE_NAME IN") {
        let names = args
            .iter()
            .filter_map(Value::as_str)
            .filter(|name| db.tables.contains_key(&name.to_lowercase()))
            .map(str::to_string);
        return Ok(name_rows("TABLE_NAME", names));
    }
    if upper.contains("INFORMATION_SCHEMA.TABLES") {
        return Ok(count_row(usize::from(db.tables.contains_key(&arg(0)))));
    }
    if upper.contains("INFORMATION_SCHEMA.VIEWS") {
        return Ok(count_row(usize::from(db.views.contains(&arg(0)))));
    }
    if upper.contains("INFORMATION_SCHEMA.COLUMNS") {
        let table = db.tables.get(&arg(0));
        if upper.starts_with("SELECT COUNT") {
            let exists = table.is_some_and(|t| t.index_of(&arg(1)).is_some());
            return Ok(count_row(usize::from(exists)));
        }
        let columns = table.map(|t| t.columns.clone()).unwrap_or_default();
        return Ok(name_rows("COLUMN_NAME", columns));
    }
    if upper.contains("INFORMATION_SCHEMA.KEY_COLUMN_USAGE") {
        let columns = db
            .tables
            .get(&arg(0))
            .map(|t| t.primary_key.clone())
            .unwrap_or_default();
        return Ok(name_rows("COLUMN_NAME", columns));
    }
    if upper.contains("INFORMATION_SCHEMA.STATISTICS") {
        let exists = db.indexes.contains(&(arg(0), arg(1)));
        return Ok(count_row(usize::from(exists)));
    }
    if upper.contains("INFORMATION_SCHEMA.TABLE_CONSTRAINTS") {
        let exists = db.indexes.contains(&(arg(0), arg(1)));
        return Ok(count_row(usize::from(exists)));
    }
    if upper.contains("INFORMATION_SCHEMA.ROUTINES") {
        let exists = db.routines.contains(&(arg(1).to_uppercase(), arg(0)));
        return Ok(count_row(usize::from(exists)));
    }
    if upper.contains("INFORMATION_SCHEMA.TRIGGERS") {
        return Ok(count_row(usize::from(db.triggers.contains(&arg(0)))));
    }
    Err(protocol(format!("unsupported information_schema query: {}", upper)))
}

fn create_table(db: &mut DbState, norm: &str, upper: &str) -> DbResult<u64> {
    let name = object_name(norm, 2);
    if db.tables.contains_key(&name) {
        if upper.starts_with("CREATE TABLE IF NOT EXISTS") {
            return Ok(0);
        }
        return Err(protocol(format!("Table '{}' already exists", name)));
    }

    for caps in REFERENCES_RE.captures_iter(norm) {
        let referenced = key(caps[1].split('(').next().unwrap_or_default());
        if referenced != name && !db.tables.contains_key(&referenced) {
            return Err(protocol(format!(
                "Failed to open the referenced table '{}'",
                referenced
            )));
        }
    }

    let (Some(open), Some(close)) = (norm.find('('), norm.rfind(')')) else {
        return Err(protocol(format!("CREATE TABLE {} without columns", name)));
    };
    let mut table = Table::default();
    for def in split_top_level(&norm[open + 1..close]) {
        let first = def.split_whitespace().next().unwrap_or_default();
        let first_upper = first.to_uppercase();
        let def_upper = def.to_uppercase();
        if first_upper == "PRIMARY" {
            if let Some(group) = tuples(&def).first() {
                table.primary_key = group.split(',').map(strip_ident).collect();
            }
            continue;
        }
        if matches!(
            first_upper.as_str(),
            "KEY" | "UNIQUE" | "INDEX" | "CONSTRAINT" | "FOREIGN" | "FULLTEXT" | "CHECK"
        ) {
            continue;
        }
        let column = strip_ident(first);
        if def_upper.contains("PRIMARY KEY") {
            table.primary_key.push(column.clone());
        }
        if def_upper.contains("AUTO_INCREMENT") {
            table.auto_increment = Some(table.columns.len());
        }
        table.columns.push(column);
    }
    db.tables.insert(name, table);
    Ok(0)
}

fn alter_table(db: &mut DbState, norm: &str) -> DbResult<u64> {
    let name = object_name(norm, 2);
    let table = db
        .tables
        .get_mut(&name)
        .ok_or_else(|| protocol(format!("Table '{}' doesn't exist", name)))?;
    let words: Vec<&str> = norm.split_whitespace().collect();
    let action = words.get(3).map(|w| w.to_uppercase()).unwrap_or_default();
    let mut column_at = 4;
    if words
        .get(4)
        .is_some_and(|w| w.eq_ignore_ascii_case("COLUMN"))
    {
        column_at = 5;
    }
    let column = words.get(column_at).map(|w| strip_ident(w)).unwrap_or_default();
    match action.as_str() {
        "ADD" => {
            if table.index_of(&column).is_some() {
                return Err(protocol(format!("Duplicate column name '{}'", column)));
            }
            table.columns.push(column);
            for row in &mut table.rows {
                row.push(Value::Null);
            }
        }
        "DROP" => {
            let index = table
                .index_of(&column)
                .ok_or_else(|| protocol(format!("Can't DROP '{}'", column)))?;
            table.columns.remove(index);
            for row in &mut table.rows {
                row.remove(index);
            }
        }
        _ => {}
    }
    Ok(0)
}

fn insert(db: &mut DbState, norm: &str, args: &[Value], now: NaiveDateTime) -> DbResult<u64> {
    let caps = INSERT_RE
        .captures(norm)
        .ok_or_else(|| protocol(format!("unsupported INSERT: {}", norm)))?;
    let ignore = caps.get(1).is_some();
    let name = key(&caps[2]);
    let upsert = caps.get(5).map(|m| m.as_str().to_string());

    let current = db
        .tables
        .get(&name)
        .ok_or_else(|| protocol(format!("Table '{}' doesn't exist", name)))?;
    let mut table = current.clone();

    let columns: Vec<usize> = match caps.get(3) {
        Some(list) => list
            .as_str()
            .split(',')
            .map(|c| {
                table
                    .index_of(c)
                    .ok_or_else(|| protocol(format!("Unknown column '{}' in 'field list'", c.trim())))
            })
            .collect::<DbResult<_>>()?,
        None => (0..table.columns.len()).collect(),
    };

    let mut bind = Args::new(args);
    let mut affected = 0u64;
    for tuple in tuples(&caps[4]) {
        let items = split_top_level(&tuple);
        if items.len() != columns.len() {
            return Err(protocol("Column count doesn't match value count"));
        }
        let mut row = vec![Value::Null; table.columns.len()];
        for (column, item) in columns.iter().zip(&items) {
            row[*column] = literal(item, &mut bind, now)?;
        }
        for (i, column) in table.columns.iter().enumerate() {
            if !columns.contains(&i) && column.eq_ignore_ascii_case("applied_at") {
                row[i] = Value::Timestamp(now);
            }
        }
        if let Some(auto) = table.auto_increment
            && row[auto].is_null()
        {
            let next = table
                .rows
                .iter()
                .filter_map(|r| r[auto].as_i64())
                .max()
                .unwrap_or(0)
                + 1;
            row[auto] = Value::Int(next);
        }

        let new_key = table.key_of(&row);
        let existing = new_key.as_ref().and_then(|k| {
            table
                .rows
                .iter()
                .position(|r| table.key_of(r).as_ref() == Some(k))
        });
        match (existing, &upsert) {
            (None, _) => {
                table.rows.push(row);
                affected += 1;
            }
            (Some(at), Some(update)) => {
                for column in &columns {
                    table.rows[at][*column] = row[*column].clone();
                }
                if update.to_lowercase().contains("applied_at = current_timestamp")
                    && let Some(i) = table.index_of("applied_at")
                {
                    table.rows[at][i] = Value::Timestamp(now);
                }
                affected += 2;
            }
            (Some(_), None) if ignore => {}
            (Some(_), None) => {
                let shown = new_key
                    .unwrap_or_default()
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join("-");
                return Err(protocol(format!(
                    "Duplicate entry '{}' for key '{}.PRIMARY'",
                    shown, name
                )));
            }
        }
    }

    db.tables.insert(name, table);
    Ok(affected)
}

fn update(db: &mut DbState, norm: &str, args: &[Value], now: NaiveDateTime) -> DbResult<u64> {
    let caps = UPDATE_RE
        .captures(norm)
        .ok_or_else(|| protocol(format!("unsupported UPDATE: {}", norm)))?;
    let name = key(&caps[1]);
    let table = db
        .tables
        .get_mut(&name)
        .ok_or_else(|| protocol(format!("Table '{}' doesn't exist", name)))?;

    let mut bind = Args::new(args);
    let mut assignments = Vec::new();
    for assignment in split_top_level(&caps[2]) {
        let (column, value) = assignment
            .split_once('=')
            .ok_or_else(|| protocol(format!("unsupported assignment: {}", assignment)))?;
        let index = table
            .index_of(column)
            .ok_or_else(|| protocol(format!("Unknown column '{}'", column.trim())))?;
        assignments.push((index, literal(value, &mut bind, now)?));
    }
    let conditions = parse_where(table, caps.get(3).map(|m| m.as_str()), &mut bind, now)?;

    let mut affected = 0;
    for row in &mut table.rows {
        if conditions.iter().all(|c| c.matches(row)) {
            for (index, value) in &assignments {
                row[*index] = value.clone();
            }
            affected += 1;
        }
    }
    Ok(affected)
}

fn delete(db: &mut DbState, norm: &str, args: &[Value], now: NaiveDateTime) -> DbResult<u64> {
    let caps = DELETE_RE
        .captures(norm)
        .ok_or_else(|| protocol(format!("unsupported DELETE: {}", norm)))?;
    let name = key(&caps[1]);
    let table = db
        .tables
        .get_mut(&name)
        .ok_or_else(|| protocol(format!("Table '{}' doesn't exist", name)))?;
    let mut bind = Args::new(args);
    let conditions = parse_where(table, caps.get(2).map(|m| m.as_str()), &mut bind, now)?;
    let before = table.rows.len();
    table
        .rows
        .retain(|row| !conditions.iter().all(|c| c.matches(row)));
    Ok((before - table.rows.len()) as u64)
}

fn select(db: &DbState, norm: &str, args: &[Value], now: NaiveDateTime) -> DbResult<Vec<Row>> {
    let caps = SELECT_RE
        .captures(norm)
        .ok_or_else(|| protocol(format!("unsupported SELECT: {}", norm)))?;
    let name = key(&caps[2]);
    let table = db
        .tables
        .get(&name)
        .ok_or_else(|| protocol(format!("Table '{}' doesn't exist", name)))?;

    let mut bind = Args::new(args);
    let conditions = parse_where(table, caps.get(3).map(|m| m.as_str()), &mut bind, now)?;
    let mut rows: Vec<&Vec<Value>> = table
        .rows
        .iter()
        .filter(|row| conditions.iter().all(|c| c.matches(row)))
        .collect();

    let projection = caps[1].trim();
    if projection.eq_ignore_ascii_case("COUNT(*)") {
        return Ok(count_row(rows.len()));
    }

    if let Some(order) = caps.get(4) {
        let mut keys = Vec::new();
        for item in order.as_str().split(',') {
            let mut words = item.split_whitespace();
            let column = words.next().unwrap_or_default();
            let descending = words.next().is_some_and(|w| w.eq_ignore_ascii_case("DESC"));
            let index = table
                .index_of(column)
                .ok_or_else(|| protocol(format!("Unknown column '{}' in 'order clause'", column)))?;
            keys.push((index, descending));
        }
        rows.sort_by(|a, b| {
            keys.iter()
                .map(|(i, descending)| {
                    let ordering = sort_key_cmp(&a[*i], &b[*i]);
                    if *descending { ordering.reverse() } else { ordering }
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }

    let limit = match caps.get(5) {
        Some(m) => Some(literal(m.as_str(), &mut bind, now)?.as_i64().unwrap_or(0) as usize),
        None => None,
    };
    let offset = match caps.get(6) {
        Some(m) => literal(m.as_str(), &mut bind, now)?.as_i64().unwrap_or(0) as usize,
        None => 0,
    };

    let columns: Vec<usize> = if projection == "*" {
        (0..table.columns.len()).collect()
    } else {
        projection
            .split(',')
            .map(|c| {
                table
                    .index_of(c)
                    .ok_or_else(|| protocol(format!("Unknown column '{}' in 'field list'", c.trim())))
            })
            .collect::<DbResult<_>>()?
    };
    let names: Vec<String> = columns.iter().map(|i| table.columns[*i].clone()).collect();

    Ok(rows
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .map(|row| {
            Row::new(
                names.clone(),
                columns.iter().map(|i| row[*i].clone()).collect(),
            )
        })
        .collect())
}

/// Shared handle to the fake server; cheap to clone.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_databases(names: &[&str]) -> Self {
        let server = Self::new();
        for name in names {
            server.create_database(name);
        }
        server
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn create_database(&self, name: &str) {
        self.lock()
            .databases
            .entry(name.to_lowercase())
            .or_default();
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.lock().databases.contains_key(&name.to_lowercase())
    }

    /// Run setup SQL directly, outside any transaction and without logging.
    pub fn run(&self, database: &str, sql: &str) {
        let mut state = self.lock();
        let log_len = state.log.len();
        state
            .execute(Some(database), sql, &[])
            .unwrap_or_else(|e| panic!("setup statement failed: {}: {}", sql, e));
        state.log.truncate(log_len);
    }

    pub fn insert_rows(&self, database: &str, table: &str, rows: Vec<Vec<Value>>) {
        let mut state = self.lock();
        let db = state.db(database).unwrap();
        db.tables
            .get_mut(&table.to_lowercase())
            .unwrap_or_else(|| panic!("no table {} in {}", table, database))
            .rows
            .extend(rows);
    }

    pub fn rows(&self, database: &str, table: &str) -> Vec<Vec<Value>> {
        let mut state = self.lock();
        state
            .db(database)
            .ok()
            .and_then(|db| db.tables.get(&table.to_lowercase()))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn has_table(&self, database: &str, table: &str) -> bool {
        let mut state = self.lock();
        state
            .db(database)
            .is_ok_and(|db| db.tables.contains_key(&table.to_lowercase()))
    }

    pub fn state(&self, database: &str) -> DbState {
        self.lock().db(database).cloned().unwrap_or_default()
    }

    /// Statements seen by `database`, in order.
    pub fn log(&self, database: &str) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter(|(db, _)| db == database)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    /// Fail every statement on `database` (or `*`) containing `fragment`.
    pub fn fail_on(&self, database: &str, fragment: &str, message: &str) {
        self.lock().failures.push((
            database.to_string(),
            fragment.to_string(),
            message.to_string(),
        ));
    }

    pub fn make_unreachable(&self, database: &str) {
        self.lock().unreachable.insert(database.to_lowercase());
    }

    pub fn advance_clock(&self, seconds: i64) {
        self.lock().clock += seconds;
    }

    pub fn database(&self, name: &str) -> FakeDatabase {
        FakeDatabase {
            server: self.clone(),
            name: name.to_string(),
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(FakeConnector {
            server: self.clone(),
        })
    }

    pub fn manager(&self, options: ManagerOptions) -> DatabaseManager {
        DatabaseManager::new(self.connector(), options).unwrap()
    }
}

/// A connection to one database, or to the server when the name is empty.
#[derive(Clone)]
pub struct FakeDatabase {
    server: FakeServer,
    name: String,
}

impl FakeDatabase {
    fn scope(&self) -> Option<&str> {
        Some(self.name.as_str()).filter(|n| !n.is_empty())
    }
}

#[async_trait]
impl SqlExecutor for FakeDatabase {
    async fn execute(&mut self, sql: &str, args: &[Value]) -> DbResult<u64> {
        self.server.lock().execute(self.scope(), sql, args)
    }

    async fn query(&mut self, sql: &str, args: &[Value]) -> DbResult<Vec<Row>> {
        self.server.lock().query(self.scope(), sql, args)
    }
}

#[async_trait]
impl Database for FakeDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn executor(&mut self) -> &mut dyn SqlExecutor {
        self
    }

    async fn begin(&self) -> DbResult<Box<dyn Transaction>> {
        let mut state = self.server.lock();
        state.log.push((self.name.clone(), "BEGIN".to_string()));
        let snapshot = match self.scope() {
            Some(name) => Some(state.db(name)?.clone()),
            None => None,
        };
        Ok(Box::new(FakeTransaction {
            connection: self.clone(),
            snapshot,
        }))
    }

    fn clone_handle(&self) -> Box<dyn Database> {
        Box::new(self.clone())
    }

    async fn close(&self) {}
}

pub struct FakeTransaction {
    connection: FakeDatabase,
    snapshot: Option<DbState>,
}

#[async_trait]
impl SqlExecutor for FakeTransaction {
    async fn execute(&mut self, sql: &str, args: &[Value]) -> DbResult<u64> {
        self.connection.execute(sql, args).await
    }

    async fn query(&mut self, sql: &str, args: &[Value]) -> DbResult<Vec<Row>> {
        self.connection.query(sql, args).await
    }
}

#[async_trait]
impl Transaction for FakeTransaction {
    fn executor(&mut self) -> &mut dyn SqlExecutor {
        self
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        let mut state = self.connection.server.lock();
        state
            .log
            .push((self.connection.name.clone(), "COMMIT".to_string()));
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        let mut state = self.connection.server.lock();
        state
            .log
            .push((self.connection.name.clone(), "ROLLBACK".to_string()));
        if let (Some(name), Some(snapshot)) = (self.connection.scope(), self.snapshot) {
            *state.db(name)? = snapshot;
        }
        Ok(())
    }
}

pub struct FakeConnector {
    server: FakeServer,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, database: Option<&str>) -> DbResult<Box<dyn Database>> {
        let name = database.unwrap_or_default();
        {
            let state = self.server.lock();
            if state.unreachable.contains(&name.to_lowercase()) {
                return Err(protocol(format!("Can't connect to MySQL server for '{}'", name)));
            }
            if !name.is_empty() && !state.databases.contains_key(&name.to_lowercase()) {
                return Err(protocol(format!("Unknown database '{}'", name)));
            }
        }
        Ok(Box::new(self.server.database(name)))
    }
}

/// Manager options naming `configured` databases with the first as default.
pub fn options(configured: &[&str]) -> ManagerOptions {
    ManagerOptions {
        configured: configured.iter().map(|s| s.to_string()).collect(),
        default_database: configured.first().map(|s| s.to_string()),
        base_database: None,
        patterns: vec![],
    }
}
