//! Pre-flight conflict check of an archive against a target database.

use crate::archive::Manifest;
use crate::models::qualified_name;
use crate::providers::DatabaseProvider;
use crate::Result;
use serde::{Deserialize, Serialize};

/// How a manifest table relates to the target database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    /// The table does not exist in the target
    New,
    /// The table exists and holds no rows
    EmptyTarget,
    /// The table exists with rows, or its state could not be determined.
    ///
    /// The importer does not issue `CREATE TABLE` for a table that exists;
    /// it appends the archive rows to it.
    Conflicting {
        existing_rows: Option<u64>,
        /// `CREATE TABLE` would fail if attempted: the table is known to
        /// exist. False when existence itself could not be checked.
        creation_will_fail: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConflict {
    /// Table name in the archive
    pub table: String,
    pub target_schema: Option<String>,
    /// Qualified name the table would have in the target
    pub target_table: String,
    pub classification: Classification,
}

/// One classification per manifest table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportConflictReport {
    pub tables: Vec<TableConflict>,
    /// Lookups that failed and were classified conservatively
    pub warnings: Vec<String>,
}

impl ImportConflictReport {
    pub fn has_conflicts(&self) -> bool {
        self.tables
            .iter()
            .any(|t| !matches!(t.classification, Classification::New))
    }

    pub fn conflicting(&self) -> impl Iterator<Item = &TableConflict> {
        self.tables
            .iter()
            .filter(|t| matches!(t.classification, Classification::Conflicting { .. }))
    }

    pub fn new_tables(&self) -> impl Iterator<Item = &TableConflict> {
        self.tables
            .iter()
            .filter(|t| matches!(t.classification, Classification::New))
    }
}

/// Classifies every manifest table against the target. Read-only.
///
/// Tables land in `target_schema`, or the provider's default schema when it
/// is `None`. A table whose existence or row count cannot be determined is
/// reported as `Conflicting` with an unknown row count, never as `New`.
pub async fn check_import_conflicts(
    provider: &dyn DatabaseProvider,
    manifest: &Manifest,
    target_schema: Option<&str>,
) -> Result<ImportConflictReport> {
    let schema = target_schema
        .map(str::to_string)
        .or_else(|| provider.default_schema());
    let mut report = ImportConflictReport::default();

    for entry in &manifest.tables {
        let name = entry.table.as_str();
        let target = qualified_name(schema.as_deref(), name);
        let classification = match provider.table_exists(name, schema.as_deref()).await {
            Ok(false) => Classification::New,
            Ok(true) => match provider.count_rows(name, schema.as_deref()).await {
                Ok(0) => Classification::EmptyTarget,
                Ok(rows) => Classification::Conflicting {
                    existing_rows: Some(rows),
                    creation_will_fail: true,
                },
                Err(e) => {
                    report
                        .warnings
                        .push(format!("Row count of {} unavailable: {}", target, e));
                    Classification::Conflicting {
                        existing_rows: None,
                        creation_will_fail: true,
                    }
                }
            },
            Err(e) => {
                report
                    .warnings
                    .push(format!("Existence check of {} failed: {}", target, e));
                Classification::Conflicting {
                    existing_rows: None,
                    creation_will_fail: false,
                }
            }
        };
        tracing::debug!("{} -> {:?}", target, classification);
        report.tables.push(TableConflict {
            table: entry.full_name(),
            target_schema: schema.clone(),
            target_table: target,
            classification,
        });
    }
    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }
    Ok(report)
}
