use crate::helpers::fake_db::{FakeServer, options};
use anyhow::Result;
use dbmt::MigrateError;
use dbmt::data::{
    CopyConfig, CopyProgress, CopyStrategy, CrossDatabaseCopier, DataCopier, FieldMapping,
    OnError,
};
use dbmt::db::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

const CUSTOMERS: &str =
    "CREATE TABLE customers (id INT PRIMARY KEY, name VARCHAR(64), active INT)";

fn row(id: i64, name: &str, active: i64) -> Vec<Value> {
    vec![Value::Int(id), Value::from(name), Value::Int(active)]
}

/// `source` holds five customers, every other database an empty table.
fn server(targets: &[&str]) -> FakeServer {
    let mut names = vec!["source"];
    names.extend_from_slice(targets);
    let server = FakeServer::with_databases(&names);
    for name in &names {
        server.run(name, CUSTOMERS);
    }
    server.insert_rows(
        "source",
        "customers",
        vec![
            row(1, "ada", 1),
            row(2, "grace", 1),
            row(3, "linus", 0),
            row(4, "ken", 1),
            row(5, "barbara", 0),
        ],
    );
    server
}

fn config(strategy: CopyStrategy, batch_size: usize) -> CopyConfig {
    CopyConfig {
        strategy,
        tables: vec!["customers".to_string()],
        batch_size,
        ..CopyConfig::default()
    }
}

fn names(server: &FakeServer, database: &str) -> Vec<String> {
    let mut rows = server.rows(database, "customers");
    rows.sort_by_key(|r| r[0].as_i64());
    rows.iter()
        .map(|r| r[1].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_copy_pages_through_the_table() -> Result<()> {
    let server = server(&["target"]);
    let copier = DataCopier::new(config(CopyStrategy::Insert, 2))?;

    let report = copier
        .copy(&mut server.database("source"), &mut server.database("target"))
        .await?;
    let table = &report.tables[0];
    assert_eq!(table.total_rows, 5);
    assert_eq!(table.rows_copied, 5);
    assert_eq!(table.batches, 3);
    assert_eq!(report.rows_copied(), 5);
    assert_eq!(names(&server, "target"), vec!["ada", "grace", "linus", "ken", "barbara"]);

    let reads: Vec<String> = server
        .log("source")
        .into_iter()
        .filter(|sql| sql.starts_with("SELECT `id`"))
        .collect();
    assert_eq!(reads.len(), 3);
    assert!(reads[0].ends_with("FROM `customers` ORDER BY `id` LIMIT ?"));
    assert!(reads[1].ends_with("FROM `customers` WHERE `id` > ? ORDER BY `id` LIMIT ?"));
    assert!(reads.iter().all(|sql| !sql.contains("OFFSET")));
    Ok(())
}

#[tokio::test]
async fn test_keyset_pages_keep_the_condition() -> Result<()> {
    let server = server(&["target"]);
    let copier = DataCopier::new(CopyConfig {
        conditions: BTreeMap::from([("customers".to_string(), "active = 1".to_string())]),
        ..config(CopyStrategy::Insert, 2)
    })?;

    let report = copier
        .copy(&mut server.database("source"), &mut server.database("target"))
        .await?;
    assert_eq!(report.tables[0].rows_copied, 3);
    assert_eq!(report.tables[0].batches, 2);
    assert_eq!(names(&server, "target"), vec!["ada", "grace", "ken"]);
    assert!(
        server
            .log("source")
            .iter()
            .any(|sql| sql.contains("WHERE (active = 1) AND `id` > ?"))
    );
    Ok(())
}

#[tokio::test]
async fn test_table_without_primary_key_is_read_once() -> Result<()> {
    let server = FakeServer::with_databases(&["source", "target"]);
    for database in ["source", "target"] {
        server.run(database, "CREATE TABLE events (kind VARCHAR(16), amount INT)");
    }
    let event = |kind: &str, amount: i64| vec![Value::from(kind), Value::Int(amount)];
    server.insert_rows(
        "source",
        "events",
        vec![
            event("click", 1),
            event("click", 1),
            event("view", 2),
            event("click", 1),
            event("view", 3),
        ],
    );
    let copier = DataCopier::new(CopyConfig {
        tables: vec!["events".to_string()],
        ..config(CopyStrategy::Insert, 2)
    })?;

    let report = copier
        .copy(&mut server.database("source"), &mut server.database("target"))
        .await?;
    let table = &report.tables[0];
    assert_eq!(table.rows_copied, 5);
    assert_eq!(table.batches, 3);
    assert_eq!(server.rows("target", "events"), server.rows("source", "events"));

    let reads: Vec<String> = server
        .log("source")
        .into_iter()
        .filter(|sql| sql.starts_with("SELECT `kind`"))
        .collect();
    assert_eq!(reads, vec!["SELECT `kind`, `amount` FROM `events`".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_wide_tables_stay_under_the_placeholder_limit() -> Result<()> {
    let server = FakeServer::with_databases(&["source", "target"]);
    let columns: Vec<String> = (1..70).map(|i| format!("c{} INT", i)).collect();
    let create = format!("CREATE TABLE wide (id INT PRIMARY KEY, {})", columns.join(", "));
    for database in ["source", "target"] {
        server.run(database, &create);
    }
    let rows = (0..1000)
        .map(|id| (0..70).map(|c| Value::Int(id * 100 + c)).collect())
        .collect();
    server.insert_rows("source", "wide", rows);
    let copier = DataCopier::new(CopyConfig {
        tables: vec!["wide".to_string()],
        ..CopyConfig::default()
    })?;

    let report = copier
        .copy(&mut server.database("source"), &mut server.database("target"))
        .await?;
    let table = &report.tables[0];
    assert_eq!(table.rows_copied, 1000);
    assert_eq!(table.effective_batch_size, 936);
    assert_eq!(table.batches, 2);
    assert_eq!(server.rows("target", "wide").len(), 1000);

    let widest = server
        .log("target")
        .iter()
        .filter(|sql| sql.starts_with("INSERT"))
        .map(|sql| sql.matches('?').count())
        .max()
        .unwrap_or_default();
    assert!(widest <= 65_535, "INSERT carries {} placeholders", widest);
    Ok(())
}

#[tokio::test]
async fn test_merge_updates_existing_rows() -> Result<()> {
    let server = server(&["target"]);
    server.insert_rows("target", "customers", vec![row(1, "stale", 1), row(9, "local", 1)]);

    DataCopier::new(config(CopyStrategy::Merge, 100))?
        .copy(&mut server.database("source"), &mut server.database("target"))
        .await?;
    let copied = names(&server, "target");
    assert_eq!(copied.len(), 6);
    assert_eq!(copied[0], "ada");
    assert_eq!(copied[5], "local");
    Ok(())
}

#[tokio::test]
async fn test_insert_keeps_existing_rows() -> Result<()> {
    let server = server(&["target"]);
    server.insert_rows("target", "customers", vec![row(1, "stale", 1)]);

    DataCopier::new(config(CopyStrategy::Insert, 100))?
        .copy(&mut server.database("source"), &mut server.database("target"))
        .await?;
    let copied = names(&server, "target");
    assert_eq!(copied.len(), 5);
    assert_eq!(copied[0], "stale");
    Ok(())
}

#[tokio::test]
async fn test_overwrite_truncates_first() -> Result<()> {
    let server = server(&["target"]);
    server.insert_rows("target", "customers", vec![row(9, "local", 1)]);

    DataCopier::new(config(CopyStrategy::Overwrite, 100))?
        .copy(&mut server.database("source"), &mut server.database("target"))
        .await?;
    assert_eq!(names(&server, "target").len(), 5);
    assert!(!names(&server, "target").contains(&"local".to_string()));
    assert!(
        server
            .log("target")
            .iter()
            .any(|sql| sql == "TRUNCATE TABLE `customers`")
    );
    Ok(())
}

#[tokio::test]
async fn test_conditions_filter_source_rows() -> Result<()> {
    let server = server(&["target"]);
    let copier = DataCopier::new(CopyConfig {
        conditions: BTreeMap::from([("customers".to_string(), "active = 1".to_string())]),
        ..config(CopyStrategy::Merge, 100)
    })?;

    let report = copier
        .copy(&mut server.database("source"), &mut server.database("target"))
        .await?;
    assert_eq!(report.tables[0].total_rows, 3);
    assert_eq!(names(&server, "target"), vec!["ada", "grace", "ken"]);
    Ok(())
}

#[tokio::test]
async fn test_field_mappings_rename_and_transform() -> Result<()> {
    let server = FakeServer::with_databases(&["source", "target"]);
    server.run("source", CUSTOMERS);
    server.run(
        "target",
        "CREATE TABLE customers (id INT PRIMARY KEY, display_name VARCHAR(64), active INT)",
    );
    server.insert_rows("source", "customers", vec![row(1, "ada", 1), row(2, "grace", 0)]);

    let copier = DataCopier::new(CopyConfig {
        field_mappings: BTreeMap::from([(
            "customers".to_string(),
            vec![FieldMapping {
                source_field: "name".to_string(),
                target_field: "display_name".to_string(),
                transform: Some("UPPER".to_string()),
            }],
        )]),
        ..config(CopyStrategy::Insert, 100)
    })?;
    copier
        .copy(&mut server.database("source"), &mut server.database("target"))
        .await?;

    assert_eq!(names(&server, "target"), vec!["ADA", "GRACE"]);
    assert!(
        server
            .log("target")
            .iter()
            .any(|sql| sql.contains("(`id`, `display_name`, `active`)"))
    );
    Ok(())
}

#[test]
fn test_invalid_copy_configs_are_rejected() {
    assert!(DataCopier::new(config(CopyStrategy::Merge, 0)).is_err());
    assert!(
        DataCopier::new(CopyConfig {
            tables: vec![],
            ..config(CopyStrategy::Merge, 10)
        })
        .is_err()
    );
    let bad_transform = CopyConfig {
        field_mappings: BTreeMap::from([(
            "customers".to_string(),
            vec![FieldMapping {
                source_field: "name".to_string(),
                target_field: "name".to_string(),
                transform: Some("REVERSE".to_string()),
            }],
        )]),
        ..config(CopyStrategy::Merge, 10)
    };
    assert!(DataCopier::new(bad_transform).is_err());
}

#[tokio::test]
async fn test_missing_table_with_continue_is_reported_per_table() -> Result<()> {
    let server = server(&["target"]);
    let copier = DataCopier::new(CopyConfig {
        tables: vec!["missing".to_string(), "customers".to_string()],
        on_error: OnError::Continue,
        ..config(CopyStrategy::Merge, 100)
    })?;

    let report = copier
        .copy(&mut server.database("source"), &mut server.database("target"))
        .await?;
    assert_eq!(report.tables.len(), 2);
    assert!(report.tables[0].error.as_deref().unwrap().contains("does not exist"));
    assert_eq!(report.failed_tables().count(), 1);
    assert_eq!(report.tables[1].rows_copied, 5);
    Ok(())
}

#[tokio::test]
async fn test_rollback_policy_is_refused_explicitly() -> Result<()> {
    let server = server(&["target"]);
    let copier = DataCopier::new(CopyConfig {
        tables: vec!["missing".to_string()],
        on_error: OnError::Rollback,
        ..config(CopyStrategy::Merge, 100)
    })?;

    let err = copier
        .copy(&mut server.database("source"), &mut server.database("target"))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::RollbackUnsupported { .. }));
    Ok(())
}

#[tokio::test]
async fn test_copy_to_many_stops_at_first_failure_unless_continuing() -> Result<()> {
    let server = server(&["shop_001", "shop_002", "shop_003"]);
    server.make_unreachable("shop_002");
    let manager = server.manager(options(&["source"]));
    let targets: Vec<String> = ["shop_001", "shop_002", "shop_003"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let stopping = CrossDatabaseCopier::new(
        &manager,
        DataCopier::new(config(CopyStrategy::Merge, 100))?,
    );
    let report = stopping.copy_to_many("source", &targets).await;
    assert_eq!(report.successes.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert!(server.rows("shop_003", "customers").is_empty());

    let progress: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&progress);
    let continuing = CrossDatabaseCopier::new(
        &manager,
        DataCopier::new(CopyConfig {
            on_error: OnError::Continue,
            ..config(CopyStrategy::Merge, 100)
        })?
        .with_progress(Arc::new(move |p: &CopyProgress| {
            sink.lock().unwrap().push(p.target.clone());
        })),
    );
    let report = continuing.copy_to_many("source", &targets).await;
    assert_eq!(report.successes.len(), 2);
    assert_eq!(report.failures[0].database, "shop_002");
    assert_eq!(server.rows("shop_003", "customers").len(), 5);
    assert_eq!(*progress.lock().unwrap(), vec!["shop_001", "shop_003"]);
    Ok(())
}

#[tokio::test]
async fn test_copy_to_itself_is_rejected() -> Result<()> {
    let server = server(&[]);
    let manager = server.manager(options(&["source"]));
    let copier = CrossDatabaseCopier::new(
        &manager,
        DataCopier::new(config(CopyStrategy::Merge, 100))?,
    );
    assert!(copier.copy_between("source", "source").await.is_err());
    Ok(())
}
