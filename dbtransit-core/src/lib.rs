//! Cross-engine schema and data migration for SQL Server, MySQL, PostgreSQL
//! and Firebird.
//!
//! The crate moves tables between heterogeneous engines through a portable
//! archive: an export streams every selected table into versioned binary
//! batch files, and an import recreates the schema on the target engine,
//! loads the batches and adds foreign keys last.
//!
//! # Security Guarantees
//! - Credentials live only in zeroized buffers and never reach a log line,
//!   an error message or a serialized structure
//! - User-supplied table names and predicates pass an allow-list before they
//!   reach SQL
//! - Destructive steps are preceded by read-only conflict checks
//!
//! # Architecture
//! - [`providers`]: one [`providers::DatabaseProvider`] per engine, created
//!   through an injected [`providers::ProviderRegistry`]
//! - [`typemap`] and [`dialect`]: type mapping and SQL generation per engine
//! - [`archive`]: manifest, table metadata and batch files
//! - [`engine`]: the export and import pipelines with progress and state
//! - [`overwrite`]: pre-flight checks for both directions

pub mod archive;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod overwrite;
pub mod providers;
pub mod typemap;
pub mod validation;
pub mod value;

// Re-export commonly used types
pub use engine::{
    ExportOptions, Exporter, ImportOptions, Importer, OperationState, ProgressEvent,
    ProgressSink, RunStatus,
};
pub use error::{DbTransitError, Result};
pub use models::{
    ColumnDefinition, ConstraintDefinition, ConstraintType, DatabaseEngine,
    ForeignKeyDefinition, IndexDefinition, ReferentialRule, TableSchema,
};
pub use providers::{ConnectionConfig, DatabaseProvider, ProviderRegistry, ProviderSettings};
pub use value::{RowData, RowValue};
