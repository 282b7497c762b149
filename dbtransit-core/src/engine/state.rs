//! Per-run ledger for export and import operations.
//!
//! An [`OperationState`] records the stage, one [`TableOutcome`] per table
//! and every error and warning. It is persisted as JSON after each table so
//! an interrupted run can be resumed.

use crate::archive::write_atomic;
use crate::error::{DbTransitError, ErrorClass};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which engine produced the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Export,
    Import,
}

/// Pipeline stage. Export and import share the enum; each uses its own
/// subset in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    ConnectingDatabase,
    DiscoveringTables,
    CalculatingDependencies,
    ExportingSchema,
    ExportingData,
    ImportingSchema,
    CreatingIndexes,
    ImportingData,
    CreatingForeignKeys,
    Finalizing,
    Completed,
    Error,
    Cancelled,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Error | Stage::Cancelled)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Initializing => "Initializing",
            Stage::ConnectingDatabase => "ConnectingDatabase",
            Stage::DiscoveringTables => "DiscoveringTables",
            Stage::CalculatingDependencies => "CalculatingDependencies",
            Stage::ExportingSchema => "ExportingSchema",
            Stage::ExportingData => "ExportingData",
            Stage::ImportingSchema => "ImportingSchema",
            Stage::CreatingIndexes => "CreatingIndexes",
            Stage::ImportingData => "ImportingData",
            Stage::CreatingForeignKeys => "CreatingForeignKeys",
            Stage::Finalizing => "Finalizing",
            Stage::Completed => "Completed",
            Stage::Error => "Error",
            Stage::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Table task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

/// What happened to one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOutcome {
    /// Qualified table name
    pub table: String,
    pub status: TableStatus,
    pub rows: u64,
    pub batches: u64,
    pub bytes: u64,
    /// Skip reason or failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Foreign keys added to this table (import only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<String>,
}

impl TableOutcome {
    fn new(table: String) -> Self {
        Self {
            table,
            status: TableStatus::Pending,
            rows: 0,
            batches: 0,
            bytes: 0,
            message: None,
            foreign_keys: Vec::new(),
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Failure scoped to one table
    TableProcessingError,
    /// Failure of the run or of a step not owned by one table
    General,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub message: String,
    pub kind: ErrorKind,
    pub retryable: bool,
}

/// Final run status computed by [`OperationState::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

/// Ledger of one export or import run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationState {
    pub operation: OperationKind,
    pub stage: Stage,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Outcomes in processing order
    #[serde(default)]
    pub tables: Vec<TableOutcome>,
    #[serde(default)]
    pub errors: Vec<OperationError>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Set when the run stopped at a failure instead of continuing
    #[serde(default)]
    pub aborted: bool,
    #[serde(default)]
    pub cancelled: bool,
}

impl OperationState {
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            stage: Stage::Initializing,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            tables: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            aborted: false,
            cancelled: false,
        }
    }

    pub fn set_stage(&mut self, stage: Stage) {
        tracing::info!("{:?} stage: {}", self.operation, stage);
        self.stage = stage;
    }

    /// Outcome for `table`, inserted as pending if it is new.
    pub fn table_mut(&mut self, table: &str) -> &mut TableOutcome {
        match self.tables.iter().position(|t| t.table == table) {
            Some(index) => &mut self.tables[index],
            None => {
                self.tables.push(TableOutcome::new(table.to_string()));
                let last = self.tables.len() - 1;
                &mut self.tables[last]
            }
        }
    }

    pub fn table(&self, table: &str) -> Option<&TableOutcome> {
        self.tables.iter().find(|t| t.table == table)
    }

    pub fn status_of(&self, table: &str) -> Option<TableStatus> {
        self.table(table).map(|t| t.status)
    }

    pub fn is_completed(&self, table: &str) -> bool {
        self.status_of(table) == Some(TableStatus::Completed)
    }

    pub fn is_failed(&self, table: &str) -> bool {
        self.status_of(table) == Some(TableStatus::Failed)
    }

    pub fn mark_in_progress(&mut self, table: &str) {
        let outcome = self.table_mut(table);
        outcome.status = TableStatus::InProgress;
        outcome.message = None;
    }

    pub fn mark_completed(&mut self, table: &str) {
        let outcome = self.table_mut(table);
        outcome.status = TableStatus::Completed;
        outcome.completed_at = Some(Utc::now());
    }

    pub fn mark_skipped(&mut self, table: &str, reason: impl Into<String>) {
        let outcome = self.table_mut(table);
        outcome.status = TableStatus::Skipped;
        outcome.message = Some(reason.into());
    }

    /// Marks `table` failed and records a table processing error.
    pub fn mark_failed(&mut self, table: &str, error: &DbTransitError) {
        let message = error.to_string();
        let outcome = self.table_mut(table);
        outcome.status = TableStatus::Failed;
        outcome.message = Some(message.clone());
        self.errors.push(OperationError {
            table: Some(table.to_string()),
            message,
            kind: ErrorKind::TableProcessingError,
            retryable: error.is_retryable(),
        });
    }

    /// Records an error that is not owned by a single table.
    pub fn record_error(&mut self, table: Option<&str>, error: &DbTransitError) {
        self.errors.push(OperationError {
            table: table.map(str::to_string),
            message: error.to_string(),
            kind: ErrorKind::General,
            retryable: error.is_retryable(),
        });
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }

    /// Records a run-level failure and stops the run.
    pub fn abort(&mut self, error: &DbTransitError) {
        if error.classification() == ErrorClass::Cancelled {
            self.cancelled = true;
            return;
        }
        self.record_error(None, error);
        self.aborted = true;
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn count(&self, status: TableStatus) -> usize {
        self.tables.iter().filter(|t| t.status == status).count()
    }

    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.tables.iter().map(|t| t.bytes).sum()
    }

    /// Computes the final status and moves to the terminal stage.
    ///
    /// Cancelled wins over everything. Without failures the run is
    /// `Completed`; with failures it is `CompletedWithErrors` when at least
    /// one table completed, else `Failed`. An aborted run always ends in
    /// `Stage::Error`.
    pub fn finish(&mut self) -> RunStatus {
        let failures = self.count(TableStatus::Failed)
            + self.errors.iter().filter(|e| e.kind == ErrorKind::General).count();
        let status = if self.cancelled {
            RunStatus::Cancelled
        } else if failures == 0 && !self.aborted {
            RunStatus::Completed
        } else if self.count(TableStatus::Completed) > 0 {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Failed
        };
        self.status = status;
        self.stage = match status {
            RunStatus::Cancelled => Stage::Cancelled,
            RunStatus::Failed => Stage::Error,
            _ if self.aborted => Stage::Error,
            _ => Stage::Completed,
        };
        self.completed_at = Some(Utc::now());
        tracing::info!(
            "{:?} finished: {:?} ({} completed, {} skipped, {} failed, {} rows)",
            self.operation,
            status,
            self.count(TableStatus::Completed),
            self.count(TableStatus::Skipped),
            self.count(TableStatus::Failed),
            self.total_rows()
        );
        status
    }

    /// Writes the ledger as pretty JSON (temp file plus rename).
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DbTransitError::serialization("Failed to serialize operation state", e))?;
        write_atomic(path, json.as_bytes()).await
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DbTransitError::io(format!("Failed to read {}", path.display()), e))?;
        serde_json::from_str(&text)
            .map_err(|e| DbTransitError::serialization(format!("Failed to parse {}", path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_finish_without_failures_completes() {
        let mut state = OperationState::new(OperationKind::Export);
        state.mark_completed("dbo.Customers");
        state.mark_skipped("dbo.Audit", "already exported");
        assert_eq!(state.finish(), RunStatus::Completed);
        assert_eq!(state.stage, Stage::Completed);
        assert!(state.completed_at.is_some());
    }

    #[test]
    fn test_finish_with_partial_failure() {
        let mut state = OperationState::new(OperationKind::Import);
        state.mark_completed("dbo.Customers");
        state.mark_failed("dbo.Orders", &DbTransitError::batch_failed("dbo.Orders", Some(3), "bad"));
        state.mark_completed("dbo.OrderLines");
        assert_eq!(state.finish(), RunStatus::CompletedWithErrors);
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].kind, ErrorKind::TableProcessingError);
        assert_eq!(state.errors[0].table.as_deref(), Some("dbo.Orders"));
    }

    #[test]
    fn test_finish_all_failed() {
        let mut state = OperationState::new(OperationKind::Import);
        state.mark_failed("t", &DbTransitError::query_failed("x"));
        assert_eq!(state.finish(), RunStatus::Failed);
        assert_eq!(state.stage, Stage::Error);

        let mut state = OperationState::new(OperationKind::Export);
        state.abort(&DbTransitError::query_failed("unreachable"));
        assert_eq!(state.finish(), RunStatus::Failed);
        assert_eq!(state.stage, Stage::Error);
    }

    #[test]
    fn test_finish_aborted_after_some_tables_completed() {
        let mut state = OperationState::new(OperationKind::Import);
        state.mark_completed("a");
        state.mark_failed("b", &DbTransitError::query_failed("x"));
        state.aborted = true;
        assert_eq!(state.finish(), RunStatus::CompletedWithErrors);
        assert_eq!(state.stage, Stage::Error);
    }

    #[test]
    fn test_cancel_wins() {
        let mut state = OperationState::new(OperationKind::Export);
        state.mark_failed("t", &DbTransitError::query_failed("x"));
        state.abort(&DbTransitError::Cancelled);
        assert!(!state.aborted);
        assert_eq!(state.finish(), RunStatus::Cancelled);
        assert_eq!(state.stage, Stage::Cancelled);
    }

    #[test]
    fn test_retryable_flag_follows_error() {
        let mut state = OperationState::new(OperationKind::Export);
        state.mark_failed("t", &DbTransitError::timeout("SELECT", Duration::from_secs(5)));
        assert!(state.errors[0].retryable);
    }

    #[test]
    fn test_table_mut_keeps_order() {
        let mut state = OperationState::new(OperationKind::Export);
        state.table_mut("b");
        state.table_mut("a");
        state.table_mut("b").rows = 7;
        let names: Vec<_> = state.tables.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(state.total_rows(), 7);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("import_state.json");
        let mut state = OperationState::new(OperationKind::Import);
        state.mark_completed("dbo.Customers");
        state.mark_completed("dbo.Orders");
        state.table_mut("dbo.Orders").foreign_keys.push("FK_Orders_Customers".to_string());
        state.add_warning("CHECK constraint skipped");
        state.save(&path).await.unwrap();

        let loaded = OperationState::load(&path).await.unwrap();
        assert_eq!(loaded, state);
        assert!(loaded.is_completed("dbo.Customers"));
        assert_eq!(loaded.table("dbo.Orders").unwrap().foreign_keys, vec!["FK_Orders_Customers"]);

        // Tables without foreign keys omit the list entirely.
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"status\": \"completed\""));
        assert_eq!(json.matches("\"foreign_keys\"").count(), 1);
    }
}
