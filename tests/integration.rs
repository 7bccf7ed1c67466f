//! End-to-end scenarios against a live cluster. These assume a ScyllaDB
//! node reachable at `localhost:9042` and are not expected to run without
//! one.

use std::fs;
use std::path::{Path, PathBuf};

use cqlmigrate::config::Config;
use cqlmigrate::orchestrator::{self, Outcome};
use cqlmigrate::store::{SessionRegistry, StateStore};
use tempfile::TempDir;
use uuid::Uuid;

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn base_config(root: PathBuf, metadata_keyspace: String) -> Config {
    let mut config = Config::default();
    config.root = root;
    config.contact_points = "localhost".to_string();
    config.metadata_keyspace = metadata_keyspace;
    config.agreement_poll_ms = 50;
    config
}

/// A fresh metadata keyspace per test so concurrent test runs don't
/// collide on the same `locks`/`migrations`/`bootstraps` tables.
fn fresh_metadata_keyspace() -> String {
    format!("cqlmigrate_test_{}", Uuid::new_v4().simple())
}

async fn run_init_ddl(config: &Config) {
    let registry = SessionRegistry::new(config);
    let admin = registry.admin().await.expect("admin client");
    for statement in cqlmigrate::store::metadata_schema_ddl(&config.metadata_keyspace, 1) {
        admin
            .execute_statement(&statement, config.timeout())
            .await
            .expect("metadata ddl");
    }
}

fn two_keyspace_layout(root: &Path) {
    for (ks, svc) in [("alpha", "billing"), ("beta", "accounts")] {
        write(&root.join(ks).join("bootstrap.cql"), "-- bootstrap\nSELECT release_version FROM system.local;");
        write(
            &root.join(ks).join(svc).join("001_create_table.cql"),
            &format!("CREATE TABLE IF NOT EXISTS {ks}.widgets_{svc} (id uuid PRIMARY KEY);"),
        );
        write(
            &root.join(ks).join(svc).join("002_add_index.cql"),
            &format!("CREATE INDEX IF NOT EXISTS ON {ks}.widgets_{svc} (id);"),
        );
    }
}

#[tokio::test]
async fn fresh_run_applies_every_bootstrap_and_migration() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    write(&root.join("cqlmigrate.cql"), "-- no-op init\n");
    two_keyspace_layout(&root);

    let metadata_keyspace = fresh_metadata_keyspace();
    let config = base_config(root, metadata_keyspace.clone());
    run_init_ddl(&config).await;

    match orchestrator::run(config.clone()).await {
        Outcome::Exit(code) => assert_eq!(code, 0),
        Outcome::ReleaseFailedNoExit => panic!("lock release unexpectedly failed"),
    }

    let registry = SessionRegistry::new(&config);
    let store = StateStore::connect(&config, &registry).await.unwrap();
    assert_eq!(store.count_bootstraps("alpha").await.unwrap(), 1);
    assert_eq!(store.count_bootstraps("beta").await.unwrap(), 1);
    assert_eq!(store.count_migrations("alpha").await.unwrap(), 2);
    assert_eq!(store.count_migrations("beta").await.unwrap(), 2);
}

#[tokio::test]
async fn rerun_with_unchanged_files_is_idempotent_except_bootstraps() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    write(&root.join("cqlmigrate.cql"), "-- no-op init\n");
    two_keyspace_layout(&root);

    let metadata_keyspace = fresh_metadata_keyspace();
    let config = base_config(root, metadata_keyspace.clone());
    run_init_ddl(&config).await;

    for _ in 0..2 {
        match orchestrator::run(config.clone()).await {
            Outcome::Exit(code) => assert_eq!(code, 0),
            Outcome::ReleaseFailedNoExit => panic!("lock release unexpectedly failed"),
        }
    }

    let registry = SessionRegistry::new(&config);
    let store = StateStore::connect(&config, &registry).await.unwrap();
    // Every bootstrap attempt appends a row; two runs -> two rows.
    assert_eq!(store.count_bootstraps("alpha").await.unwrap(), 2);
    // Migrations are checksum-locked after success; a second run adds none.
    assert_eq!(store.count_migrations("alpha").await.unwrap(), 2);
}

#[tokio::test]
async fn whitespace_only_change_is_still_a_no_op() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    write(&root.join("cqlmigrate.cql"), "-- no-op init\n");
    write(&root.join("gamma").join("bootstrap.cql"), "SELECT release_version FROM system.local;");
    let migration_path = root.join("gamma").join("svc").join("001_create.cql");
    write(&migration_path, "CREATE TABLE IF NOT EXISTS gamma.widgets (id uuid PRIMARY KEY);");

    let metadata_keyspace = fresh_metadata_keyspace();
    let config = base_config(root.clone(), metadata_keyspace);
    run_init_ddl(&config).await;

    match orchestrator::run(config.clone()).await {
        Outcome::Exit(code) => assert_eq!(code, 0),
        Outcome::ReleaseFailedNoExit => panic!("lock release unexpectedly failed"),
    }

    // Reformat with extra whitespace and a comment; canonical form is
    // unchanged, so the checksum must still match.
    write(
        &migration_path,
        "CREATE   TABLE   IF NOT EXISTS   gamma.widgets   (\n  id uuid PRIMARY KEY -- comment\n);",
    );

    match orchestrator::run(config.clone()).await {
        Outcome::Exit(code) => assert_eq!(code, 0),
        Outcome::ReleaseFailedNoExit => panic!("lock release unexpectedly failed"),
    }

    let registry = SessionRegistry::new(&config);
    let store = StateStore::connect(&config, &registry).await.unwrap();
    assert_eq!(store.count_migrations("gamma").await.unwrap(), 1);
}

#[tokio::test]
async fn statement_change_after_success_aborts_with_checksum_mismatch() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    write(&root.join("cqlmigrate.cql"), "-- no-op init\n");
    let migration_path = root.join("delta").join("svc").join("001_create.cql");
    write(&migration_path, "CREATE TABLE IF NOT EXISTS delta.widgets (id uuid PRIMARY KEY);");

    let metadata_keyspace = fresh_metadata_keyspace();
    let config = base_config(root.clone(), metadata_keyspace);
    run_init_ddl(&config).await;

    match orchestrator::run(config.clone()).await {
        Outcome::Exit(code) => assert_eq!(code, 0),
        Outcome::ReleaseFailedNoExit => panic!("lock release unexpectedly failed"),
    }

    // A genuine statement change, not just whitespace/comments.
    write(
        &migration_path,
        "CREATE TABLE IF NOT EXISTS delta.widgets (id uuid PRIMARY KEY, name text);",
    );

    match orchestrator::run(config).await {
        Outcome::Exit(code) => assert_eq!(code, 1),
        Outcome::ReleaseFailedNoExit => panic!("lock release unexpectedly failed"),
    }
}
