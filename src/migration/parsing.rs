use crate::error::{MigrateError, Result};
use crate::migration::{Migration, SqlMigration};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Parse a migration filename like "V20240101120000_add_user_index.sql".
/// The `V` prefix is optional; the version must start with a digit.
pub fn parse_migration_filename(filename: &str) -> Option<(String, String)> {
    let name_without_ext = filename.strip_suffix(".sql")?;
    let name_without_prefix = name_without_ext
        .strip_prefix('V')
        .unwrap_or(name_without_ext);

    let (version, description) = name_without_prefix.split_once('_')?;
    let valid_version = version.starts_with(|c: char| c.is_ascii_digit())
        && version.chars().all(|c| c.is_ascii_alphanumeric() || c == '.');
    if !valid_version || description.is_empty() {
        return None;
    }

    Some((version.to_string(), description.replace('_', " ")))
}

fn sql_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| MigrateError::io(dir, e))? {
        let path = entry.map_err(|e| MigrateError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    Ok(files)
}

/// Find all migrations in `migrations_dir` and its immediate subdirectories
/// (one per database), sorted by version. Files whose names are not migration
/// names are skipped.
pub fn discover_migrations(migrations_dir: &Path) -> Result<Vec<SqlMigration>> {
    let mut migrations = Vec::new();

    if !migrations_dir.exists() {
        debug!(
            "Migrations directory {} does not exist",
            migrations_dir.display()
        );
        return Ok(migrations);
    }

    let mut dirs = vec![migrations_dir.to_path_buf()];
    for entry in std::fs::read_dir(migrations_dir).map_err(|e| MigrateError::io(migrations_dir, e))? {
        let path = entry.map_err(|e| MigrateError::io(migrations_dir, e))?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }

    for dir in &dirs {
        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        for path in sql_files(dir)? {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if parse_migration_filename(filename).is_none() {
                debug!("Skipping non-migration file {}", path.display());
                continue;
            }
            let migration = SqlMigration::from_file(&path)?;
            if let Some(existing) = seen.insert(migration.version().to_string(), path.clone()) {
                return Err(MigrateError::validation(format!(
                    "duplicate migration version {} in {} and {}",
                    migration.version(),
                    existing.display(),
                    path.display()
                )));
            }
            migrations.push(migration);
        }
    }

    migrations.sort_by(|a, b| {
        a.version()
            .cmp(b.version())
            .then_with(|| a.origin().cmp(&b.origin()))
    });

    debug!(
        "Discovered {} migrations under {}",
        migrations.len(),
        migrations_dir.display()
    );
    Ok(migrations)
}

/// `V<yyyymmddHHMMSS>_<slug>.sql`
pub fn generate_migration_filename(name: &str, now: DateTime<Local>) -> Result<String> {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    if slug.is_empty() {
        return Err(MigrateError::validation(format!(
            "migration name '{}' has no usable characters",
            name
        )));
    }

    Ok(format!("V{}_{}.sql", now.format("%Y%m%d%H%M%S"), slug))
}

/// Write a new migration template and return its path. With `database`, the
/// file goes into that database's subdirectory.
pub fn new_migration_file(
    migrations_dir: &Path,
    name: &str,
    database: Option<&str>,
    now: DateTime<Local>,
) -> Result<PathBuf> {
    let dir = match database {
        Some(database) => migrations_dir.join(database),
        None => migrations_dir.to_path_buf(),
    };
    std::fs::create_dir_all(&dir).map_err(|e| MigrateError::io(&dir, e))?;

    let path = dir.join(generate_migration_filename(name, now)?);
    if path.exists() {
        return Err(MigrateError::validation(format!(
            "{} already exists",
            path.display()
        )));
    }

    let template = format!(
        "-- {}\n-- Created at {}\n\n-- migrate:up\n\n\n-- migrate:down\n\n",
        name.trim(),
        now.format("%Y-%m-%d %H:%M:%S")
    );
    std::fs::write(&path, template).map_err(|e| MigrateError::io(&path, e))?;
    Ok(path)
}
