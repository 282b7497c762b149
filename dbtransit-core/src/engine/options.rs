//! Export and import options.

use crate::error::DbTransitError;
use crate::validation::{TableFilter, TableRef, validate_sql_fragment};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Rows per archive batch file unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// Upper bound for any batch size.
pub const MAX_BATCH_SIZE: usize = 10_000_000;

/// Options for [`Exporter`](super::Exporter).
///
/// # Example
/// ```rust
/// use dbtransit_core::engine::ExportOptions;
///
/// let options = ExportOptions::new("/var/backups/shop")
///     .with_tables(vec!["dbo.Customers".to_string()])
///     .with_where_clause("dbo.Customers", "IsActive = 1")
///     .with_batch_size(50_000);
///
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub output_dir: PathBuf,
    /// `[schema.]table` names to export; empty exports every user table
    pub tables: Vec<String>,
    /// Per-table row predicate, keyed by `[schema.]table`
    pub where_clauses: BTreeMap<String, String>,
    pub batch_size: usize,
    pub schema_only: bool,
    /// Stop at the first table failure
    pub fail_fast: bool,
    /// Skip tables an existing manifest already lists
    pub resume: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::new(),
            tables: Vec::new(),
            where_clauses: BTreeMap::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            schema_only: false,
            fail_fast: false,
            resume: false,
        }
    }
}

impl ExportOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_where_clause(mut self, table: impl Into<String>, predicate: impl Into<String>) -> Self {
        self.where_clauses.insert(table.into(), predicate.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn schema_only(mut self) -> Self {
        self.schema_only = true;
        self
    }

    pub fn fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }

    pub fn resume(mut self) -> Self {
        self.resume = true;
        self
    }

    /// Validates the options before any I/O.
    ///
    /// # Errors
    /// Returns a configuration error for an empty output directory, a batch
    /// size out of range, an invalid table name or an unsafe predicate.
    pub fn validate(&self) -> Result<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(DbTransitError::configuration("output_dir cannot be empty"));
        }
        validate_batch_size(self.batch_size, false)?;
        self.table_filter()?;
        for (table, predicate) in &self.where_clauses {
            TableRef::parse(table)?;
            validate_sql_fragment(predicate, &format!("WHERE clause for '{}'", table))?;
        }
        Ok(())
    }

    /// Parsed table filter, `None` when every table is selected.
    pub fn table_filter(&self) -> Result<Option<TableFilter>> {
        parse_filter(&self.tables)
    }

    /// Predicate configured for a table. A qualified key wins over an
    /// unqualified one.
    pub fn where_clause_for(&self, schema: Option<&str>, name: &str) -> Option<&str> {
        let mut fallback = None;
        for (key, predicate) in &self.where_clauses {
            let Ok(table_ref) = TableRef::parse(key) else {
                continue;
            };
            if !table_ref.matches(schema, name) {
                continue;
            }
            if table_ref.schema.is_some() {
                return Some(predicate.as_str());
            }
            fallback = Some(predicate.as_str());
        }
        fallback
    }
}

/// Options for [`Importer`](super::Importer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub input_dir: PathBuf,
    /// `[schema.]table` names to import; empty imports the whole archive
    pub tables: Vec<String>,
    /// Rows per insert transaction; 0 keeps the archive batch boundaries
    pub batch_size: usize,
    pub create_schema: bool,
    pub create_foreign_keys: bool,
    pub schema_only: bool,
    pub continue_on_error: bool,
    /// Schema tables land in; defaults to the provider's default schema
    pub target_schema: Option<String>,
    /// JSON ledger used to skip tables a previous run completed
    pub state_file: Option<PathBuf>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            tables: Vec::new(),
            batch_size: 0,
            create_schema: true,
            create_foreign_keys: true,
            schema_only: false,
            continue_on_error: false,
            target_schema: None,
            state_file: None,
        }
    }
}

impl ImportOptions {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_target_schema(mut self, schema: impl Into<String>) -> Self {
        self.target_schema = Some(schema.into());
        self
    }

    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    pub fn no_create_schema(mut self) -> Self {
        self.create_schema = false;
        self
    }

    pub fn no_create_foreign_keys(mut self) -> Self {
        self.create_foreign_keys = false;
        self
    }

    pub fn schema_only(mut self) -> Self {
        self.schema_only = true;
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    /// Validates the options before any I/O.
    ///
    /// # Errors
    /// Returns a configuration error for an empty input directory, a batch
    /// size out of range, an invalid table name or target schema.
    pub fn validate(&self) -> Result<()> {
        if self.input_dir.as_os_str().is_empty() {
            return Err(DbTransitError::configuration("input_dir cannot be empty"));
        }
        validate_batch_size(self.batch_size, true)?;
        self.table_filter()?;
        if let Some(schema) = &self.target_schema {
            crate::validation::validate_identifier(schema)?;
        }
        Ok(())
    }

    pub fn table_filter(&self) -> Result<Option<TableFilter>> {
        parse_filter(&self.tables)
    }
}

fn validate_batch_size(batch_size: usize, allow_zero: bool) -> Result<()> {
    if batch_size == 0 && !allow_zero {
        return Err(DbTransitError::configuration(
            "batch_size must be greater than 0",
        ));
    }
    if batch_size > MAX_BATCH_SIZE {
        return Err(DbTransitError::configuration(format!(
            "batch_size should not exceed {}",
            MAX_BATCH_SIZE
        )));
    }
    Ok(())
}

fn parse_filter(tables: &[String]) -> Result<Option<TableFilter>> {
    if tables.is_empty() {
        return Ok(None);
    }
    TableFilter::parse(tables).map(Some)
}
