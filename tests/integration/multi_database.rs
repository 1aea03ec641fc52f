use crate::helpers::fake_db::options;
use crate::helpers::migration::MigrationTestHelper;
use anyhow::Result;
use dbmt::MigrateError;
use dbmt::database::{DatabaseSource, ManagerOptions, TargetSelection};

const USERS: &str = "-- migrate:up\nCREATE TABLE users (id INT PRIMARY KEY);\n-- migrate:down\nDROP TABLE users;\n";
const SHOP_ORDERS: &str = "-- migrate:up\nCREATE TABLE orders (id INT PRIMARY KEY);\n-- migrate:down\nDROP TABLE orders;\n";
const SHARED_TAGS: &str = "-- migrate:databases shop_001, shop_002\n-- migrate:up\nCREATE TABLE tags (id INT PRIMARY KEY);\n-- migrate:down\nDROP TABLE tags;\n";

fn helper() -> Result<MigrationTestHelper> {
    let helper = MigrationTestHelper::new(&["main", "shop_001", "shop_002", "reporting"]);
    helper.write_migration("V1_create_users.sql", USERS)?;
    helper.write_migration("shop_001/V2_create_orders.sql", SHOP_ORDERS)?;
    helper.write_migration("V3_create_tags.sql", SHARED_TAGS)?;
    Ok(helper)
}

fn targets(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_units_are_routed_to_their_databases() -> Result<()> {
    let helper = helper()?;
    let manager = helper.manager(&["main"]);
    let migrator = helper.multi_migrator("main")?;

    let report = migrator
        .up(&manager, &targets(&["main", "shop_001", "shop_002"]))
        .await;
    assert!(report.is_success());

    assert_eq!(helper.ledger_versions("main"), vec!["1"]);
    assert_eq!(helper.ledger_versions("shop_001"), vec!["2", "3"]);
    assert_eq!(helper.ledger_versions("shop_002"), vec!["3"]);
    assert!(helper.server.has_table("shop_001", "orders"));
    assert!(!helper.server.has_table("shop_002", "orders"));
    assert!(!helper.server.has_table("reporting", "schema_migrations"));
    Ok(())
}

#[tokio::test]
async fn test_empty_target_list_uses_default_database() -> Result<()> {
    let helper = helper()?;
    let manager = helper.manager(&["main"]);
    let migrator = helper.multi_migrator("main")?;

    let report = migrator.up(&manager, &[]).await;
    let successes = report.into_result()?;
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].0, "main");
    assert_eq!(successes[0].1.versions, vec!["1"]);
    Ok(())
}

#[tokio::test]
async fn test_pattern_selection_resolves_against_server() -> Result<()> {
    let helper = helper()?;
    let manager = helper.manager(&["main"]);

    let names = manager
        .resolve(&TargetSelection::Patterns(vec!["shop_*".to_string()]))
        .await?;
    assert_eq!(names, vec!["shop_001", "shop_002"]);

    let names = manager
        .resolve(&TargetSelection::Patterns(vec!["nothing_*".to_string()]))
        .await?;
    assert_eq!(names, vec!["main"], "no match falls back to the default");
    Ok(())
}

#[tokio::test]
async fn test_all_uses_configured_patterns_then_configured_names() -> Result<()> {
    let helper = helper()?;

    let with_patterns = helper.server.manager(ManagerOptions {
        patterns: vec!["shop_*".to_string()],
        ..options(&["main"])
    });
    assert_eq!(
        with_patterns.resolve(&TargetSelection::All).await?,
        vec!["shop_001", "shop_002"]
    );

    let configured_only = helper.manager(&["main", "reporting"]);
    assert_eq!(
        configured_only.resolve(&TargetSelection::All).await?,
        vec!["main", "reporting"]
    );
    Ok(())
}

#[tokio::test]
async fn test_discover_marks_sources_and_matches() -> Result<()> {
    let helper = helper()?;
    let manager = helper.manager(&["main"]);

    let infos = manager.discover(&["shop_*".to_string()]).await?;
    let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["main", "reporting", "shop_001", "shop_002"]);

    let main = &infos[0];
    assert!(main.configured);
    assert_eq!(main.source, DatabaseSource::Configured);
    assert!(!main.matched);
    assert!(infos[2].matched && infos[3].matched);
    assert_eq!(infos[2].source, DatabaseSource::Server);
    Ok(())
}

#[tokio::test]
async fn test_failure_on_one_database_does_not_stop_the_others() -> Result<()> {
    let helper = helper()?;
    helper.server.make_unreachable("shop_001");
    let manager = helper.manager(&["main"]);
    let migrator = helper.multi_migrator("main")?;

    let report = migrator
        .up(&manager, &targets(&["shop_001", "shop_002"]))
        .await;
    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].database, "shop_001");
    assert!(matches!(
        report.failures[0].error,
        MigrateError::Connection { .. }
    ));
    assert_eq!(report.successes.len(), 1);
    assert_eq!(helper.ledger_versions("shop_002"), vec!["3"]);

    let err = report.into_result().unwrap_err();
    assert!(err.to_string().contains("1 database(s) failed"));
    assert!(err.to_string().contains("shop_001"));
    Ok(())
}

#[tokio::test]
async fn test_down_and_status_per_database() -> Result<()> {
    let helper = helper()?;
    let manager = helper.manager(&["main"]);
    let migrator = helper.multi_migrator("main")?;
    let shops = targets(&["shop_001", "shop_002"]);
    migrator.up(&manager, &shops).await.into_result()?;

    let reverted = migrator.down(&manager, &shops, 1).await.into_result()?;
    assert_eq!(reverted[0].1.versions, vec!["3"]);
    assert_eq!(reverted[1].1.versions, vec!["3"]);
    assert_eq!(helper.ledger_versions("shop_001"), vec!["2"]);

    let statuses = migrator.status(&manager, &shops).await.into_result()?;
    let shop_001: Vec<(&str, bool)> = statuses[0]
        .1
        .iter()
        .map(|s| (s.version.as_str(), s.applied))
        .collect();
    assert_eq!(shop_001, vec![("2", true), ("3", false)]);
    Ok(())
}

#[tokio::test]
async fn test_init_creates_tables_on_each_target() -> Result<()> {
    let helper = helper()?;
    let manager = helper.manager(&["main"]);
    let migrator = helper.multi_migrator("main")?;

    migrator
        .init(&manager, &targets(&["main", "reporting"]))
        .await
        .into_result()?;
    for database in ["main", "reporting"] {
        assert!(helper.server.has_table(database, "schema_migrations"));
        assert!(helper.server.has_table(database, "schema_migrations_lock"));
    }
    assert!(!helper.server.has_table("shop_001", "schema_migrations"));
    Ok(())
}
