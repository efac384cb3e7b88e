//! Integration tests for backup runs and copy retention.
//!
//! These tests drive the orchestrator and registry against the filesystem
//! store and source, then inspect the resulting files directly.

mod common;

use std::time::Duration;

use common::{config, TestContext, DB};
use serde_json::json;

use backup_keeper_backend::error::AppError;
use backup_keeper_backend::models::{BackupCopy, BackupStatus, DocumentFilter, RunResult};
use backup_keeper_backend::services::backup_orchestrator::BackupOrchestrator;
use backup_keeper_backend::services::registry_service::BackupRegistry;
use backup_keeper_backend::storage::LocalStore;

#[tokio::test]
async fn test_run_now_writes_copy_and_catalog_to_disk() {
    let ctx = TestContext::new();
    let orchestrator = BackupOrchestrator::create(config("nightly"), ctx.deps())
        .await
        .unwrap();

    let copy = orchestrator.run_now().await.unwrap();
    assert!(copy.name.starts_with("shop-"));
    assert_eq!(copy.collections, vec!["orders", "users"]);
    assert!(copy.delete_time.is_none());

    assert!(ctx.copy_dir(&copy.name).join("users.json").is_file());
    assert!(ctx.copy_dir(&copy.name).join("orders.json").is_file());
    assert!(ctx.catalog_file("nightly", &copy.name).is_file());

    let persisted = ctx.store.get_config("nightly").await.unwrap().unwrap();
    assert_eq!(persisted.total_runs, 1);
    assert_eq!(persisted.successful_runs, 1);
    assert_eq!(persisted.last_run_result, Some(RunResult::Succeeded));
    assert_eq!(persisted.status, BackupStatus::Pending);

    let logs = orchestrator.list_logs().await.unwrap();
    assert!(logs
        .iter()
        .any(|entry| entry.message.starts_with(&format!("Backup {} completed", copy.name))));
}

#[tokio::test]
async fn test_unreachable_source_counts_failure_without_copy() {
    let ctx = TestContext::new();
    let mut cfg = config("remote");
    cfg.source.server = "offline".into();
    let orchestrator = BackupOrchestrator::create(cfg, ctx.deps()).await.unwrap();

    let err = orchestrator.run_now().await.unwrap_err();
    assert_eq!(err.code(), "SOURCE_CONNECT");

    let persisted = ctx.store.get_config("remote").await.unwrap().unwrap();
    assert_eq!(persisted.failed_runs, 1);
    assert_eq!(persisted.last_run_result, Some(RunResult::Failed));
    assert!(orchestrator.list_copies().await.unwrap().is_empty());
    assert!(!ctx.store_path.join("copies").exists());
}

#[tokio::test]
async fn test_max_copies_evicts_oldest_from_disk() {
    let ctx = TestContext::new();
    let orchestrator = BackupOrchestrator::create(config("capped").with_max_copies(2), ctx.deps())
        .await
        .unwrap();

    let first = orchestrator.run_now().await.unwrap();
    let second = orchestrator.run_now().await.unwrap();
    let third = orchestrator.run_now().await.unwrap();

    let names: Vec<_> = orchestrator
        .list_copies()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec![third.name.clone(), second.name.clone()]);
    assert!(!ctx.copy_dir(&first.name).exists());
    assert!(!ctx.catalog_file("capped", &first.name).exists());
    assert!(ctx.copy_dir(&third.name).exists());
}

#[tokio::test]
async fn test_configs_on_same_database_keep_separate_copies() {
    let ctx = TestContext::new();
    let capped = BackupOrchestrator::create(config("capped").with_max_copies(1), ctx.deps())
        .await
        .unwrap();
    let full = BackupOrchestrator::create(config("full"), ctx.deps())
        .await
        .unwrap();

    let (a, b) = tokio::join!(capped.run_now(), full.run_now());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.name, b.name);
    assert!(a.name.starts_with("shop-capped-"));
    assert!(b.name.starts_with("shop-full-"));

    // evicting the capped config's copy leaves the other config's data alone
    let next = capped.run_now().await.unwrap();
    assert!(!ctx.copy_dir(&a.name).exists());
    assert!(ctx.copy_dir(&next.name).exists());
    assert!(ctx.copy_dir(&b.name).join("users.json").is_file());
    assert_eq!(full.list_copies().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_operator_delete_removes_data_and_record() {
    let ctx = TestContext::new();
    let orchestrator = BackupOrchestrator::create(config("manual"), ctx.deps())
        .await
        .unwrap();
    let copy = orchestrator.run_now().await.unwrap();

    orchestrator.delete_copy(&copy.name).await.unwrap();
    assert!(!ctx.copy_dir(&copy.name).exists());
    assert!(!ctx.catalog_file("manual", &copy.name).exists());
    assert!(matches!(
        orchestrator.delete_copy(&copy.name).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_copy_expires_after_lifetime() {
    let ctx = TestContext::new();
    let orchestrator = BackupOrchestrator::create(
        config("ephemeral").with_copy_lifetime(Duration::from_secs(1)),
        ctx.deps(),
    )
    .await
    .unwrap();
    orchestrator.start().await.unwrap();

    let copy = orchestrator.run_now().await.unwrap();
    assert!(copy.delete_time.is_some());
    assert!(ctx.copy_dir(&copy.name).exists());

    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert!(!ctx.copy_dir(&copy.name).exists());
    assert!(orchestrator.list_copies().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_browse_source_and_copy() {
    let ctx = TestContext::new();
    let orchestrator = BackupOrchestrator::create(config("browse"), ctx.deps())
        .await
        .unwrap();
    let copy = orchestrator.run_now().await.unwrap();

    // Source changes after the copy was taken
    ctx.write_collection("users", json!([{"name": "dee", "role": "user"}]));

    let users_only = DocumentFilter::all().field_eq("role", "user");
    let live = orchestrator
        .read_collection(DB, "users", &users_only)
        .await
        .unwrap();
    assert_eq!(live, vec![json!({"name": "dee", "role": "user"})]);

    let snapshot = orchestrator
        .read_collection(&copy.name, "users", &users_only)
        .await
        .unwrap();
    assert_eq!(snapshot.len(), 2);

    assert_eq!(
        orchestrator.list_collections(&copy.name).await.unwrap(),
        vec!["orders", "users"]
    );
    orchestrator
        .delete_collections(&copy.name, &["orders".to_string()])
        .await
        .unwrap();
    assert_eq!(
        orchestrator.list_collections(&copy.name).await.unwrap(),
        vec!["users"]
    );
    assert!(matches!(
        orchestrator.list_collections("unknown").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_bootstrap_after_restart_reconciles_state() {
    let ctx = TestContext::new();

    // State left behind by a process that died mid-run
    let mut interrupted = config("survivor");
    interrupted.status = BackupStatus::Running;
    ctx.store.update_config(&interrupted).await.unwrap();

    let created = chrono::Utc::now() - chrono::Duration::days(3);
    let expired = BackupCopy {
        name: BackupCopy::name_for("survivor", DB, created),
        config_id: "survivor".into(),
        source: interrupted.source.clone(),
        collections: vec!["users".into()],
        created_time: created,
        delete_time: Some(created + chrono::Duration::days(1)),
    };
    let mut documents = std::collections::BTreeMap::new();
    documents.insert("users".to_string(), vec![json!({"name": "ada"})]);
    ctx.store.write_copy(&expired.name, &documents).await.unwrap();
    ctx.store.add_copy(&expired).await.unwrap();

    let registry = BackupRegistry::new(ctx.deps());
    let report = registry.bootstrap().await.unwrap();
    assert_eq!(report.loaded, 1);
    assert_eq!(report.started, 1);
    assert_eq!(report.copies_deleted, 1);

    assert!(!ctx.copy_dir(&expired.name).exists());
    let survivor = registry.get("survivor").await.unwrap();
    assert_eq!(survivor.status().await, BackupStatus::Waiting);
    assert_eq!(survivor.next_run_time().await, interrupted.start_time);

    registry.shutdown().await;
    let logs = survivor.list_logs().await.unwrap();
    assert!(logs
        .iter()
        .any(|entry| entry.message == "Backup run was interrupted by a restart"));

    let persisted = ctx.store.get_config("survivor").await.unwrap().unwrap();
    assert_eq!(persisted.status, BackupStatus::Waiting);
}
