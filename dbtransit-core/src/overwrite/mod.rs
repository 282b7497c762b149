//! Read-only pre-flight checks run before anything destructive.
//!
//! - `export`: what an export into a directory would replace, and the
//!   confirmed deletion of an existing archive
//! - `import`: how each archive table collides with the target database

pub mod export;
pub mod import;

pub use export::{ExportDeletion, ExportOverwriteReport, delete_existing_export, inspect_export_dir};
pub use import::{Classification, ImportConflictReport, TableConflict, check_import_conflicts};
