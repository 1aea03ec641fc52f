//! Error context for script execution failures: the MySQL error number and
//! SQLSTATE when the driver supplies them, plus the offending script lines.

use crate::error::MigrateError;
use sqlx::mysql::MySqlDatabaseError;

/// Error context extracted from a failed script run
#[derive(Debug, Clone)]
pub struct SqlErrorContext {
    /// The primary error message
    pub message: String,
    /// Line number in the script, when known
    pub line_number: Option<usize>,
    /// MySQL error number (e.g. 1146 for a missing table)
    pub number: Option<u16>,
    pub sql_state: Option<String>,
}

impl SqlErrorContext {
    pub fn from_sqlx_error(error: &sqlx::Error, line_number: Option<usize>) -> Self {
        if let Some(db_error) = error.as_database_error()
            && let Some(mysql_error) = db_error.try_downcast_ref::<MySqlDatabaseError>()
        {
            return Self {
                message: mysql_error.message().to_string(),
                line_number,
                number: Some(mysql_error.number()),
                sql_state: mysql_error.code().map(str::to_string),
            };
        }

        Self {
            message: error.to_string(),
            line_number,
            number: None,
            sql_state: None,
        }
    }

    /// Context for an engine error, walking to the driver error when there is one.
    pub fn from_error(error: &MigrateError, line_number: Option<usize>) -> Self {
        match error {
            MigrateError::Parse { line, message } => Self {
                message: message.clone(),
                line_number: Some(*line),
                number: None,
                sql_state: None,
            },
            MigrateError::Statement { line, source, .. } => {
                Self::from_sqlx_error(source, Some(*line))
            }
            MigrateError::Execution { source, .. }
            | MigrateError::Conflict { source, .. }
            | MigrateError::ExistenceCheck { source, .. }
            | MigrateError::Database(source) => Self::from_sqlx_error(source, line_number),
            MigrateError::MigrationFailed { source, .. } => Self::from_error(source, line_number),
            other => Self {
                message: crate::error::format_detailed(other),
                line_number,
                number: None,
                sql_state: None,
            },
        }
    }

    /// Format the error for display with file context
    pub fn format(&self, file_path: &str, sql_content: &str) -> String {
        let mut msg = format!("SQL error in '{}'", file_path);

        if let Some(line) = self.line_number {
            msg.push_str(&format!(" at line {}", line));
        }
        msg.push_str(":\n\n");
        msg.push_str(&format!("  {}\n", self.message));

        match (self.number, &self.sql_state) {
            (Some(number), Some(state)) => {
                msg.push_str(&format!("\n  MySQL error {} (SQLSTATE {})", number, state))
            }
            (Some(number), None) => msg.push_str(&format!("\n  MySQL error {}", number)),
            _ => {}
        }

        if let Some(line) = self.line_number {
            msg.push_str(&format!("\n\n{}", format_line_context(sql_content, line)));
        }

        msg
    }
}

/// Format SQL content showing context around the error line
pub fn format_line_context(content: &str, error_line: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let total_lines = lines.len();
    const CONTEXT_LINES: usize = 3;

    let error_idx = error_line.saturating_sub(1).min(total_lines);
    let start_idx = error_idx.saturating_sub(CONTEXT_LINES);
    let end_idx = (error_idx + CONTEXT_LINES + 1).min(total_lines);

    let mut result = String::new();

    if start_idx > 0 {
        result.push_str(&format!("  ... [{} lines above]\n", start_idx));
    }

    for (idx, line) in lines[start_idx..end_idx].iter().enumerate() {
        let line_num = start_idx + idx + 1;
        let marker = if line_num == error_line { ">" } else { " " };
        result.push_str(&format!("  {} {:4} | {}\n", marker, line_num, line));
    }

    if end_idx < total_lines {
        result.push_str(&format!("  ... [{} lines below]", total_lines - end_idx));
    }

    result
}
