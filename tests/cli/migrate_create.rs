use crate::helpers::cli::CliTestHelper;
use anyhow::Result;
use predicates::prelude::*;

#[test]
fn test_help_lists_commands() {
    let helper = CliTestHelper::new();
    let assert = helper.command().arg("--help").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    for command in [
        "init",
        "up",
        "down",
        "status",
        "create",
        "databases",
        "create-db",
        "insert-data",
        "copy-data",
    ] {
        assert!(stdout.contains(command), "missing {} in:\n{}", command, stdout);
    }
}

#[test]
fn test_create_writes_template() -> Result<()> {
    let helper = CliTestHelper::new();
    helper
        .command()
        .args(["create", "Add users table"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    let files = helper.list_files("migrations")?;
    assert_eq!(files.len(), 1);
    let name = &files[0];
    assert!(name.starts_with('V'), "{}", name);
    assert!(name.ends_with("_add_users_table.sql"), "{}", name);

    let content = helper.read_file(&helper.project_root.join("migrations").join(name))?;
    assert!(content.contains("-- migrate:up"));
    assert!(content.contains("-- migrate:down"));
    Ok(())
}

#[test]
fn test_create_for_database_uses_subdirectory() -> Result<()> {
    let helper = CliTestHelper::new();
    helper
        .command()
        .args(["create", "seed products", "-d", "shop"])
        .assert()
        .success();

    assert!(helper.list_files("migrations")?.is_empty());
    let files = helper.list_files("migrations/shop")?;
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("_seed_products.sql"));
    Ok(())
}

#[test]
fn test_create_honours_configured_directory() -> Result<()> {
    let helper = CliTestHelper::with_config("migrator:\n  migrations_dir: db/changes\n")?;
    helper
        .command()
        .args(["create", "init schema"])
        .assert()
        .success();

    assert_eq!(helper.list_files("db/changes")?.len(), 1);
    Ok(())
}

#[test]
fn test_create_rejects_unusable_names() {
    let helper = CliTestHelper::new();
    helper
        .command()
        .args(["create", "!!!"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no usable characters"));
}
