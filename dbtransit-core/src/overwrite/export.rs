//! Pre-flight inspection of an export directory.

use crate::archive::{
    Archive, DATA_DIR, EXPORT_STATE_FILE, IMPORT_STATE_FILE, MANIFEST_FILE, TABLES_DIR,
};
use crate::error::DbTransitError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What an export into a directory would overwrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOverwriteReport {
    pub manifest_present: bool,
    pub manifest_complete: bool,
    /// Tables the manifest lists
    pub table_count: usize,
    /// Archive-owned files found on disk
    pub file_count: usize,
    pub total_bytes: u64,
    /// Qualified names of the listed tables
    pub tables: Vec<String>,
    /// Set when a manifest exists but cannot be read
    pub manifest_error: Option<String>,
}

impl ExportOverwriteReport {
    /// Whether exporting here would replace existing archive content.
    pub fn has_existing_export(&self) -> bool {
        self.manifest_present || self.file_count > 0
    }
}

/// Explicit confirmation required by [`delete_existing_export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportDeletion {
    Confirmed,
}

/// Inspects `dir` without modifying it. A missing directory yields an
/// empty report.
pub async fn inspect_export_dir(dir: &Path) -> Result<ExportOverwriteReport> {
    let mut report = ExportOverwriteReport::default();
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(report);
    }

    let archive = Archive::new(dir);
    if archive.manifest_exists().await {
        report.manifest_present = true;
        match archive.read_manifest().await {
            Ok(manifest) => {
                report.manifest_complete = manifest.complete;
                report.table_count = manifest.tables.len();
                report.tables = manifest.tables.iter().map(|t| t.full_name()).collect();
            }
            Err(e) => report.manifest_error = Some(e.to_string()),
        }
    }

    for path in owned_paths(dir) {
        let (files, bytes) = measure(&path).await?;
        report.file_count += files;
        report.total_bytes += bytes;
    }
    tracing::debug!(
        "Export directory {}: {} files, {} bytes",
        dir.display(),
        report.file_count,
        report.total_bytes
    );
    Ok(report)
}

/// Removes the archive content of `dir`: the manifest, `tables/`, `data/`
/// and the state ledgers. Anything else in the directory is left alone.
/// Returns the number of files removed.
pub async fn delete_existing_export(dir: &Path, confirmation: ExportDeletion) -> Result<usize> {
    let ExportDeletion::Confirmed = confirmation;
    let mut removed = 0;
    for path in owned_paths(dir) {
        let metadata = match tokio::fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(DbTransitError::io(format!("Failed to inspect {}", path.display()), e));
            }
        };
        let (files, _) = measure(&path).await?;
        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        result.map_err(|e| DbTransitError::io(format!("Failed to remove {}", path.display()), e))?;
        removed += files;
    }
    tracing::info!("Removed {} archive files from {}", removed, dir.display());
    Ok(removed)
}

fn owned_paths(dir: &Path) -> Vec<PathBuf> {
    [MANIFEST_FILE, TABLES_DIR, DATA_DIR, EXPORT_STATE_FILE, IMPORT_STATE_FILE]
        .iter()
        .map(|name| dir.join(name))
        .collect()
}

/// File count and total size below `path` (0 when it does not exist).
async fn measure(path: &Path) -> Result<(usize, u64)> {
    let mut files = 0;
    let mut bytes = 0;
    let mut pending = vec![path.to_path_buf()];
    while let Some(current) = pending.pop() {
        let metadata = match tokio::fs::symlink_metadata(&current).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(DbTransitError::io(format!("Failed to inspect {}", current.display()), e));
            }
        };
        if !metadata.is_dir() {
            files += 1;
            bytes += metadata.len();
            continue;
        }
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .map_err(|e| DbTransitError::io(format!("Failed to list {}", current.display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DbTransitError::io(format!("Failed to list {}", current.display()), e))?
        {
            pending.push(entry.path());
        }
    }
    Ok((files, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Manifest, ManifestTable};
    use crate::models::DatabaseEngine;
    use tempfile::TempDir;

    async fn seed(dir: &Path) {
        let archive = Archive::new(dir);
        archive.create_layout().await.unwrap();
        let mut manifest = Manifest::new(DatabaseEngine::MySql, Some("shop".to_string()));
        manifest.upsert(ManifestTable {
            table: "orders".to_string(),
            schema: Some("shop".to_string()),
            metadata_file: "tables/shop.orders.meta".to_string(),
            data_files: vec!["data/shop.orders/batch_000001.bin".to_string()],
            row_count: 3,
            schema_only: false,
            exported_at: chrono::Utc::now(),
        });
        archive.write_manifest(&manifest).await.unwrap();
        std::fs::write(dir.join("tables/shop.orders.meta"), b"meta").unwrap();
        std::fs::create_dir_all(dir.join("data/shop.orders")).unwrap();
        std::fs::write(dir.join("data/shop.orders/batch_000001.bin"), b"0123456789").unwrap();
        std::fs::write(dir.join("notes.txt"), b"keep me").unwrap();
    }

    #[tokio::test]
    async fn test_inspect_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let report = inspect_export_dir(&dir.path().join("absent")).await.unwrap();
        assert!(!report.has_existing_export());
        assert_eq!(report, ExportOverwriteReport::default());
    }

    #[tokio::test]
    async fn test_inspect_reports_archive_content() {
        let dir = TempDir::new().unwrap();
        seed(dir.path()).await;
        let report = inspect_export_dir(dir.path()).await.unwrap();
        assert!(report.manifest_present);
        assert!(!report.manifest_complete);
        assert_eq!(report.table_count, 1);
        assert_eq!(report.tables, vec!["shop.orders"]);
        // manifest, metadata, batch; notes.txt is not archive content
        assert_eq!(report.file_count, 3);
        assert!(report.total_bytes >= 14);
        assert!(dir.path().join("manifest.json").exists());
    }

    #[tokio::test]
    async fn test_inspect_reports_unreadable_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), b"{not json").unwrap();
        let report = inspect_export_dir(dir.path()).await.unwrap();
        assert!(report.manifest_present);
        assert!(report.manifest_error.is_some());
        assert_eq!(report.file_count, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_only_archive_content() {
        let dir = TempDir::new().unwrap();
        seed(dir.path()).await;
        let removed = delete_existing_export(dir.path(), ExportDeletion::Confirmed)
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert!(!dir.path().join(MANIFEST_FILE).exists());
        assert!(!dir.path().join(DATA_DIR).exists());
        assert!(!dir.path().join(TABLES_DIR).exists());
        assert!(dir.path().join("notes.txt").exists());

        let again = delete_existing_export(dir.path(), ExportDeletion::Confirmed)
            .await
            .unwrap();
        assert_eq!(again, 0);
    }
}
