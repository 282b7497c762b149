//! Progress reporting.
//!
//! Engines push [`ProgressEvent`]s into a [`ProgressSink`]. Reporting is
//! fire-and-forget: a sink must not block and cannot fail the run.

use super::state::{OperationKind, OperationState, Stage, TableStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Snapshot of a running export or import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub operation: OperationKind,
    pub stage: Stage,
    pub current_table: Option<String>,
    /// Rows processed for the current table
    pub processed_rows: u64,
    pub total_rows: Option<u64>,
    pub processed_bytes: u64,
    pub total_bytes: Option<u64>,
    /// Warnings raised since the previous event
    pub warnings: Vec<String>,
    pub completed_tables: usize,
    pub skipped_tables: usize,
    pub failed_tables: usize,
    pub total_tables: usize,
}

impl ProgressEvent {
    /// Event carrying the run-level counters of `state`.
    pub fn from_state(state: &OperationState) -> Self {
        Self {
            operation: state.operation,
            stage: state.stage,
            current_table: None,
            processed_rows: 0,
            total_rows: None,
            processed_bytes: 0,
            total_bytes: None,
            warnings: Vec::new(),
            completed_tables: state.count(TableStatus::Completed),
            skipped_tables: state.count(TableStatus::Skipped),
            failed_tables: state.count(TableStatus::Failed),
            total_tables: state.tables.len(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.current_table = Some(table.into());
        self
    }

    pub fn with_rows(mut self, processed: u64, total: Option<u64>) -> Self {
        self.processed_rows = processed;
        self.total_rows = total;
        self
    }

    pub fn with_bytes(mut self, processed: u64, total: Option<u64>) -> Self {
        self.processed_bytes = processed;
        self.total_bytes = total;
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Row completion in percent, when the total is known.
    pub fn percent(&self) -> Option<f64> {
        match self.total_rows {
            Some(0) => Some(100.0),
            Some(total) => Some((self.processed_rows as f64 / total as f64 * 100.0).min(100.0)),
            None => None,
        }
    }
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        self(event)
    }
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn report(&self, event: &ProgressEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.send(event.clone());
    }
}
