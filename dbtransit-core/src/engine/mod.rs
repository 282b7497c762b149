//! Export and import pipelines.
//!
//! # Module Structure
//! - `options`: validated export/import options
//! - `dependency`: foreign-key ordering of tables
//! - `state`: per-run ledger and final status
//! - `progress`: progress events and sinks
//! - `export`: [`Exporter`]
//! - `import`: [`Importer`]

pub mod dependency;
pub mod export;
pub mod import;
pub mod options;
pub mod progress;
pub mod state;

pub use dependency::{OrderedTables, order_tables};
pub use export::Exporter;
pub use import::Importer;
pub use options::{DEFAULT_BATCH_SIZE, ExportOptions, ImportOptions};
pub use progress::{NoopProgress, ProgressEvent, ProgressSink};
pub use state::{
    ErrorKind, OperationError, OperationKind, OperationState, RunStatus, Stage, TableOutcome,
    TableStatus,
};
