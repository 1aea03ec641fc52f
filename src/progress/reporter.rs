use crate::data::{CopyProgress, CopyReport, InsertResult, LoadProgress};
use crate::database::{CreateFromScriptResult, DatabaseInfo};
use crate::error::{DatabaseFailure, format_detailed};
use crate::migrator::{Direction, MigrationStatus, RunReport};
use crate::sqlparse::Statement;
use console::style;
use std::time::Duration;

/// Console output for command results.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter {
    verbose: bool,
}

impl Reporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn database_header(&self, database: &str) {
        println!("{} {}", style("▶").cyan(), style(database).bold());
    }

    pub fn run_report(&self, report: &RunReport) {
        let verb = match (report.direction, report.dry_run) {
            (Direction::Up, false) => "Applied",
            (Direction::Up, true) => "Would apply",
            (Direction::Down, false) => "Reverted",
            (Direction::Down, true) => "Would revert",
        };
        for version in &report.versions {
            println!("  {} {}", style("✓").green(), version);
        }
        if self.verbose {
            for version in &report.skipped {
                println!("  {} {} (skipped)", style("-").dim(), style(version).dim());
            }
        }
        println!(
            "{} {}: {} {} migration(s) in {}",
            style("✓").green(),
            report.database,
            verb,
            report.versions.len(),
            format_duration(report.duration)
        );
    }

    pub fn status(&self, database: &str, statuses: &[MigrationStatus]) {
        self.database_header(database);
        if statuses.is_empty() {
            println!("  no migrations");
            return;
        }
        for status in statuses {
            let marker = match status.success {
                Some(true) => style("✓").green(),
                Some(false) => style("✗").red(),
                None => style("·").yellow(),
            };
            let applied_at = status
                .applied_at
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "pending".to_string());
            let orphan = if status.registered {
                String::new()
            } else {
                format!(" {}", style("(no migration file)").yellow())
            };
            println!(
                "  {} {:<20} {:<40} {}{}",
                marker, status.version, status.description, applied_at, orphan
            );
            if let Some(error) = &status.error_msg {
                println!("      {}", style(error).red());
            }
        }
        let pending = statuses.iter().filter(|s| !s.applied).count();
        println!(
            "  {} applied, {} pending",
            statuses.len() - pending,
            pending
        );
    }

    pub fn databases(&self, infos: &[DatabaseInfo]) {
        for info in infos {
            let marker = if info.matched {
                style("●").green()
            } else {
                style("○").dim()
            };
            let configured = if info.configured { "configured" } else { "" };
            println!(
                "  {} {:<32} {:<10} {:?}",
                marker, info.name, configured, info.source
            );
        }
        let matched = infos.iter().filter(|i| i.matched).count();
        println!("{} database(s), {} matched", infos.len(), matched);
    }

    pub fn plan(&self, statements: &[Statement]) {
        for (index, statement) in statements.iter().enumerate() {
            println!(
                "  {:>3}. {:<10} {}",
                index + 1,
                statement.kind,
                statement.name
            );
        }
    }

    pub fn create_result(&self, result: &CreateFromScriptResult) {
        if result.created {
            println!("{} Created database {}", style("✓").green(), result.database);
        }
        if self.verbose {
            for object in &result.objects {
                println!("  {} {} {}", style("+").green(), object.kind, object.name);
            }
        }
        println!(
            "{} {}: {} statement(s), {} executed, {} skipped in {}",
            style("✓").green(),
            result.database,
            result.total,
            result.executed,
            result.skipped,
            format_duration(result.duration)
        );
    }

    pub fn load_progress(&self, progress: &LoadProgress) {
        if self.verbose {
            println!(
                "    {} {}: {}/{} rows",
                progress.database, progress.table, progress.rows_done, progress.rows_total
            );
        }
    }

    pub fn insert_result(&self, result: &InsertResult) {
        for table in &result.tables {
            println!(
                "  {:<32} {:>8} rows / {} statement(s)",
                table.table, table.rows_inserted, table.statements_executed
            );
        }
        for error in &result.errors {
            println!(
                "  {} {} line {} batch {}: {}",
                style("✗").red(),
                error.table,
                error.line,
                error.batch,
                error.message
            );
        }
        if result.skipped_batches > 0 {
            println!(
                "  {} {} batch(es) skipped",
                style("⚠").yellow(),
                result.skipped_batches
            );
        }
        println!(
            "{} {}: {} row(s) inserted in {}",
            style("✓").green(),
            result.database,
            result.total_rows_inserted,
            format_duration(result.duration)
        );
    }

    pub fn copy_progress(&self, progress: &CopyProgress) {
        println!(
            "    {} {}: {}/{} rows",
            progress.target, progress.table, progress.copied, progress.total
        );
    }

    pub fn copy_report(&self, report: &CopyReport) {
        for table in &report.tables {
            match &table.error {
                None => println!(
                    "  {} {:<32} {:>8}/{} rows in {}",
                    style("✓").green(),
                    table.table,
                    table.rows_copied,
                    table.total_rows,
                    format_duration(table.duration)
                ),
                Some(error) => println!(
                    "  {} {:<32} {}",
                    style("✗").red(),
                    table.table,
                    style(error).red()
                ),
            }
        }
        println!(
            "{} {} → {}: {} row(s) copied in {}",
            style("✓").green(),
            report.source,
            report.target,
            report.rows_copied(),
            format_duration(report.duration)
        );
    }

    pub fn failures(&self, failures: &[DatabaseFailure]) {
        for failure in failures {
            println!(
                "{} {}: {}",
                style("✗").red(),
                failure.database,
                style(format_detailed(&failure.error)).red()
            );
        }
    }

    pub fn warn(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }
}

pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let millis = d.subsec_millis();

    if total_secs == 0 {
        format!("{}ms", millis)
    } else if total_secs < 60 {
        if millis > 0 {
            format!("{}.{}s", total_secs, millis / 100)
        } else {
            format!("{}s", total_secs)
        }
    } else if total_secs < 3600 {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m{}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else {
        let hours = total_secs / 3600;
        let mins = (total_secs % 3600) / 60;
        if mins > 0 {
            format!("{}h{}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    }
}
