#![allow(clippy::expect_used, clippy::panic)]
//! Fail-point tests for `SqlBackend` transactions.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p coffer-storage-sql --features failpoints --test failpoint_tests
//! ```

use coffer_storage::{
    OwnerSnapshot, StorageBackend, assert_write_error,
    testutil::{make_manifest, make_owner, make_record},
};
use coffer_storage_sql::SqlBackend;

#[tokio::test]
async fn archive_interrupted_before_commit_rolls_back() {
    let scenario = fail::FailScenario::setup();
    let backend = SqlBackend::in_memory().expect("open");
    let snapshot = OwnerSnapshot::new(make_owner(1), vec![make_record(0, 3, "a")]);

    fail::cfg("sql-backup-before-commit", "return").expect("failed to configure fail point");
    let result = backend.write_backup(&make_manifest("interrupted", 0), &[snapshot.clone()]).await;
    fail::remove("sql-backup-before-commit");

    assert_write_error!(result);
    assert!(backend.list_backups().await.expect("list").is_empty());

    // The name is free again once the transaction rolled back.
    backend.write_backup(&make_manifest("interrupted", 0), &[snapshot]).await.expect("retry");

    scenario.teardown();
}

#[tokio::test]
async fn injected_save_failure_keeps_previous_row() {
    let scenario = fail::FailScenario::setup();
    let backend = SqlBackend::in_memory().expect("open");
    let owner = make_owner(1);
    let original = make_record(0, 3, "original");
    backend.save_container(owner, &original).await.expect("initial save");

    fail::cfg("sql-save-container", "return").expect("failed to configure fail point");
    assert_write_error!(backend.save_container(owner, &make_record(0, 3, "lost")).await);
    fail::remove("sql-save-container");

    assert_eq!(backend.get_container(owner, 0).await.expect("get"), Some(original));

    scenario.teardown();
}

#[tokio::test]
async fn health_check_reports_injected_failure() {
    let scenario = fail::FailScenario::setup();
    let backend = SqlBackend::in_memory().expect("open");

    fail::cfg("health-check", "return").expect("failed to configure fail point");
    assert!(backend.health_check().await.is_err());
    fail::remove("health-check");
    assert!(backend.health_check().await.is_ok());

    scenario.teardown();
}
