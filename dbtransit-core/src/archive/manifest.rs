//! The archive manifest (`manifest.json`).
//!
//! The manifest lists every fully written table with its files. It is
//! rewritten after each table, and `complete` only turns true once the
//! export finished, so a killed export never claims more than is on disk.

use super::format::FORMAT_VERSION;
use crate::Result;
use crate::error::DbTransitError;
use crate::models::{DatabaseEngine, qualified_name};
use crate::validation::TableFilter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// One exported table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestTable {
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    /// Archive-relative path of the metadata file
    pub metadata_file: String,
    /// Archive-relative batch file paths in batch order
    #[serde(default)]
    pub data_files: Vec<String>,
    pub row_count: u64,
    #[serde(default)]
    pub schema_only: bool,
    pub exported_at: DateTime<Utc>,
}

impl ManifestTable {
    pub fn full_name(&self) -> String {
        qualified_name(self.schema.as_deref(), &self.table)
    }

    fn same_table(&self, other: &ManifestTable) -> bool {
        self.table.eq_ignore_ascii_case(&other.table)
            && self.schema.as_deref().map(str::to_ascii_lowercase)
                == other.schema.as_deref().map(str::to_ascii_lowercase)
    }
}

/// Archive manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    /// Engine the archive was exported from
    pub engine: DatabaseEngine,
    #[serde(default)]
    pub database: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set only after every table was written
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub tables: Vec<ManifestTable>,
}

impl Manifest {
    pub fn new(engine: DatabaseEngine, database: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            format_version: FORMAT_VERSION,
            engine,
            database,
            created_at: now,
            updated_at: now,
            complete: false,
            tables: Vec::new(),
        }
    }

    /// Looks up a table (case-insensitive).
    pub fn find(&self, schema: Option<&str>, name: &str) -> Option<&ManifestTable> {
        self.tables.iter().find(|t| {
            t.table.eq_ignore_ascii_case(name)
                && match (t.schema.as_deref(), schema) {
                    (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                    (None, None) => true,
                    _ => false,
                }
        })
    }

    /// Adds a table entry, replacing an earlier entry for the same table.
    pub fn upsert(&mut self, entry: ManifestTable) {
        self.updated_at = Utc::now();
        match self.tables.iter_mut().find(|t| t.same_table(&entry)) {
            Some(existing) => *existing = entry,
            None => self.tables.push(entry),
        }
    }

    /// Tables selected by `filter` (all when it is `None` or empty).
    pub fn selected<'a>(&'a self, filter: Option<&'a TableFilter>) -> impl Iterator<Item = &'a ManifestTable> + 'a {
        self.tables.iter().filter(move |t| match filter {
            Some(f) if !f.is_empty() => f.matches(t.schema.as_deref(), &t.table),
            _ => true,
        })
    }

    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.row_count).sum()
    }

    /// Number of files the manifest references (metadata plus batches).
    pub fn file_count(&self) -> usize {
        self.tables.iter().map(|t| 1 + t.data_files.len()).sum()
    }

    /// Checks the version and that every referenced path stays inside the
    /// archive.
    ///
    /// # Errors
    /// Returns an archive error for newer versions and for absolute or
    /// parent-relative paths.
    pub fn validate(&self) -> Result<()> {
        if self.format_version == 0 || self.format_version > FORMAT_VERSION {
            return Err(DbTransitError::archive(format!(
                "manifest format version {} is not supported (this build reads up to {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        for table in &self.tables {
            for file in std::iter::once(&table.metadata_file).chain(&table.data_files) {
                validate_relative_path(file).map_err(|reason| {
                    DbTransitError::archive(format!(
                        "table '{}' references file '{}': {}",
                        table.full_name(),
                        file,
                        reason
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Serializes the manifest as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DbTransitError::serialization("Failed to serialize manifest", e))
    }

    /// Parses and validates a manifest.
    pub fn from_json(text: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(text)
            .map_err(|e| DbTransitError::serialization("Failed to parse manifest", e))?;
        manifest.validate()?;
        Ok(manifest)
    }
}

fn validate_relative_path(file: &str) -> std::result::Result<(), &'static str> {
    if file.is_empty() {
        return Err("empty path");
    }
    let path = Path::new(file);
    if path.components().all(|c| matches!(c, Component::Normal(_))) {
        Ok(())
    } else {
        Err("path must stay inside the archive")
    }
}
