//! Pre-flight checks for both directions.

mod common;

use common::{FakeProvider, shop};
use dbtransit_core::engine::{ExportOptions, Exporter, ImportOptions, Importer, RunStatus};
use dbtransit_core::models::DatabaseEngine;
use dbtransit_core::overwrite::{
    Classification, ExportDeletion, check_import_conflicts, delete_existing_export,
    inspect_export_dir,
};
use dbtransit_core::archive::Archive;
use std::sync::Arc;
use tempfile::TempDir;

async fn exported_archive() -> TempDir {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FakeProvider::new(DatabaseEngine::SqlServer, shop(30, 3, 6)));
    let state = Exporter::new(source, ExportOptions::new(dir.path()).with_batch_size(10))
        .run()
        .await
        .unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    dir
}

// ============================================================================
// Import conflicts
// ============================================================================

#[tokio::test]
async fn test_conflicts_against_empty_target_are_all_new() {
    let dir = exported_archive().await;
    let manifest = Archive::new(dir.path()).read_manifest().await.unwrap();
    let target = FakeProvider::new(DatabaseEngine::PostgreSql, Vec::new());

    let report = check_import_conflicts(&target, &manifest, None).await.unwrap();
    assert!(!report.has_conflicts());
    assert_eq!(report.new_tables().count(), 3);
    assert!(report.tables.iter().all(|t| t.target_schema.as_deref() == Some("public")));
    assert!(report.tables.iter().any(|t| t.target_table == "public.Orders"));
    assert!(target.events().is_empty());
}

#[tokio::test]
async fn test_conflicts_classify_existing_tables() {
    let dir = exported_archive().await;
    let manifest = Archive::new(dir.path()).read_manifest().await.unwrap();

    // The same shop in place: Orders keeps rows, OrderLines is emptied.
    let mut existing = shop(0, 4, 0);
    existing.retain(|t| t.schema.name != "Customers");
    let target = FakeProvider::new(DatabaseEngine::SqlServer, existing);

    let report = check_import_conflicts(&target, &manifest, Some("dbo")).await.unwrap();
    assert!(report.has_conflicts());
    let by_name = |name: &str| {
        report
            .tables
            .iter()
            .find(|t| t.table == name)
            .map(|t| t.classification.clone())
            .unwrap()
    };
    assert_eq!(by_name("dbo.Customers"), Classification::New);
    assert_eq!(by_name("dbo.OrderLines"), Classification::EmptyTarget);
    assert_eq!(
        by_name("dbo.Orders"),
        Classification::Conflicting {
            existing_rows: Some(4),
            creation_will_fail: true,
        }
    );
    assert_eq!(report.conflicting().count(), 1);
    assert!(report.warnings.is_empty());
}

#[tokio::test]
async fn test_import_appends_to_conflicting_table() {
    let dir = exported_archive().await;
    let manifest = Archive::new(dir.path()).read_manifest().await.unwrap();
    let mut existing = shop(0, 4, 0);
    existing.retain(|t| t.schema.name == "Orders");
    let target = Arc::new(FakeProvider::new(DatabaseEngine::SqlServer, existing));

    let report = check_import_conflicts(target.as_ref(), &manifest, Some("dbo")).await.unwrap();
    assert_eq!(report.conflicting().count(), 1);

    // Creation of the conflicting table is never attempted, so the run
    // still completes and the rows are appended.
    let state = Importer::new(target.clone(), ImportOptions::new(dir.path()).with_target_schema("dbo"))
        .run()
        .await
        .unwrap();
    assert_eq!(state.status, RunStatus::Completed, "{:?}", state.errors);
    let events = target.events();
    assert!(!events.contains(&"create_table dbo.Orders".to_string()));
    assert!(events.contains(&"create_table dbo.Customers".to_string()));
    assert_eq!(target.table("Orders", Some("dbo")).unwrap().rows.len(), 7);
    assert!(state.warnings.iter().any(|w| w.contains("already exists")));
}

#[tokio::test]
async fn test_conflicts_respect_target_schema() {
    let dir = exported_archive().await;
    let manifest = Archive::new(dir.path()).read_manifest().await.unwrap();
    let target = FakeProvider::new(DatabaseEngine::SqlServer, shop(1, 1, 1));

    let report = check_import_conflicts(&target, &manifest, Some("staging")).await.unwrap();
    assert!(!report.has_conflicts());
    assert!(report.tables.iter().all(|t| t.target_table.starts_with("staging.")));
}

// ============================================================================
// Export directory
// ============================================================================

#[tokio::test]
async fn test_inspect_and_delete_exported_archive() {
    let dir = exported_archive().await;
    std::fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

    let report = inspect_export_dir(dir.path()).await.unwrap();
    assert!(report.has_existing_export());
    assert!(report.manifest_complete);
    assert_eq!(report.table_count, 3);
    assert!(report.total_bytes > 0);

    let removed = delete_existing_export(dir.path(), ExportDeletion::Confirmed)
        .await
        .unwrap();
    assert!(removed > 0);
    assert!(dir.path().join("notes.txt").exists());
    assert!(!inspect_export_dir(dir.path()).await.unwrap().has_existing_export());
}
