use crate::helpers::cli::CliTestHelper;
use anyhow::Result;
use insta::assert_snapshot;
use predicates::prelude::*;

const SCHEMA: &str = r#"
CREATE VIEW open_orders AS SELECT id FROM orders WHERE status = 'open';
CREATE INDEX idx_orders_status ON orders (status);
CREATE TABLE orders (id INT PRIMARY KEY, status VARCHAR(16));
"#;

#[test]
fn test_dry_run_prints_plan_in_dependency_order() -> Result<()> {
    let helper = CliTestHelper::new();
    helper.write_file("schema.sql", SCHEMA)?;

    let assert = helper
        .command()
        .args(["create-db", "--name", "shop", "--from-sql", "schema.sql", "--dry-run"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();

    assert_snapshot!(stdout, @r"
Dry run, nothing will be executed
  CREATE DATABASE `shop` CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci;
    1. TABLE      orders
    2. VIEW       open_orders
    3. INDEX      idx_orders_status
");
    Ok(())
}

#[test]
fn test_dry_run_rejects_cyclic_script() -> Result<()> {
    let helper = CliTestHelper::new();
    helper.write_file(
        "schema.sql",
        "CREATE VIEW a AS SELECT * FROM b;\nCREATE VIEW b AS SELECT * FROM a;\n",
    )?;

    helper
        .command()
        .args(["create-db", "--name", "shop", "--from-sql", "schema.sql", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("circular dependency"));
    Ok(())
}
