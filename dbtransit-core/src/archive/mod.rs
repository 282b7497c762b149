//! Export archive on disk.
//!
//! ```text
//! manifest.json                       JSON manifest
//! tables/<file_stem>.meta             bincode TableMetadataFile
//! data/<file_stem>/batch_000001.bin   bincode DataBatchFile per batch
//! export_state.json / import_state.json
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place, so
//! a reader never sees a partially written file.
//!
//! # Module Structure
//! - `format`: binary metadata and batch files, version checks
//! - `manifest`: the JSON manifest

pub mod format;
pub mod manifest;

pub use format::{DataBatchFile, FORMAT_VERSION, TableMetadataFile};
pub use manifest::{Manifest, ManifestTable};

use crate::Result;
use crate::error::DbTransitError;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const TABLES_DIR: &str = "tables";
pub const DATA_DIR: &str = "data";
pub const EXPORT_STATE_FILE: &str = "export_state.json";
pub const IMPORT_STATE_FILE: &str = "import_state.json";

/// File-name-safe form of `schema.table`: anything outside
/// `[A-Za-z0-9_.-]` becomes `_`.
pub fn file_stem(schema: Option<&str>, name: &str) -> String {
    let joined = crate::models::qualified_name(schema, name);
    let stem: String = joined
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // A stem of dots would resolve to the current or parent directory.
    if stem.chars().all(|c| c == '.') {
        stem.replace('.', "_")
    } else {
        stem
    }
}

/// Archive-relative path of a batch file.
pub fn batch_file_name(stem: &str, batch_number: u64) -> String {
    format!("{}/{}/batch_{:06}.bin", DATA_DIR, stem, batch_number)
}

/// Archive-relative path of a metadata file.
pub fn metadata_file_name(stem: &str) -> String {
    format!("{}/{}.meta", TABLES_DIR, stem)
}

/// An archive directory.
#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
}

impl Archive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of an archive-relative file name.
    pub fn path_of(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub async fn manifest_exists(&self) -> bool {
        tokio::fs::try_exists(self.manifest_path()).await.unwrap_or(false)
    }

    /// Creates the archive directories.
    pub async fn create_layout(&self) -> Result<()> {
        for dir in [self.root.clone(), self.root.join(TABLES_DIR), self.root.join(DATA_DIR)] {
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                DbTransitError::io(format!("Failed to create directory {}", dir.display()), e)
            })?;
        }
        Ok(())
    }

    pub async fn read_manifest(&self) -> Result<Manifest> {
        let path = self.manifest_path();
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| DbTransitError::io(format!("Failed to read {}", path.display()), e))?;
        Manifest::from_json(&text)
    }

    pub async fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let json = manifest.to_json()?;
        write_atomic(&self.manifest_path(), json.as_bytes()).await
    }

    /// Writes a table's metadata file; returns its archive-relative name.
    pub async fn write_metadata(&self, stem: &str, metadata: &TableMetadataFile) -> Result<String> {
        let relative = metadata_file_name(stem);
        let bytes = format::encode(metadata, &format!("metadata for {}", metadata.schema.full_name()))?;
        write_atomic(&self.path_of(&relative), &bytes).await?;
        Ok(relative)
    }

    /// Writes one batch file; returns its archive-relative name and size.
    pub async fn write_batch(&self, stem: &str, batch: &DataBatchFile) -> Result<(String, u64)> {
        let relative = batch_file_name(stem, batch.batch_number);
        let bytes = format::encode(batch, &format!("{} batch {}", batch.table, batch.batch_number))?;
        write_atomic(&self.path_of(&relative), &bytes).await?;
        Ok((relative, bytes.len() as u64))
    }

    pub async fn read_metadata(&self, relative: &str) -> Result<TableMetadataFile> {
        let bytes = self.read_file(relative).await?;
        format::decode(&bytes, relative)
    }

    pub async fn read_batch(&self, relative: &str) -> Result<DataBatchFile> {
        let bytes = self.read_file(relative).await?;
        format::decode(&bytes, relative)
    }

    /// Removes every batch file of a table (before re-exporting it).
    pub async fn clear_table_data(&self, stem: &str) -> Result<()> {
        let dir = self.root.join(DATA_DIR).join(stem);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DbTransitError::io(
                format!("Failed to remove {}", dir.display()),
                e,
            )),
        }
    }

    async fn read_file(&self, relative: &str) -> Result<Vec<u8>> {
        let path = self.path_of(relative);
        tokio::fs::read(&path)
            .await
            .map_err(|e| DbTransitError::io(format!("Failed to read {}", path.display()), e))
    }
}

/// Writes `bytes` to a temporary sibling and renames it over `path`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            DbTransitError::io(format!("Failed to create directory {}", parent.display()), e)
        })?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    tokio::fs::write(&temp, bytes)
        .await
        .map_err(|e| DbTransitError::io(format!("Failed to write {}", temp.display()), e))?;
    tokio::fs::rename(&temp, path).await.map_err(|e| {
        DbTransitError::io(format!("Failed to move {} into place", path.display()), e)
    })
}
