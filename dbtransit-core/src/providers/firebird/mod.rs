//! Firebird provider over ODBC.
//!
//! Firebird has no schemas; every call ignores the schema argument and
//! tables are reported with `schema = None`. Catalog data comes from the
//! `RDB$` system tables.
//!
//! # Module Structure
//! - `connection`: ODBC connection strings, blocking execution and transactions
//! - `schema_collection`: `RDB$` catalog queries
//! - `data`: streaming `SELECT` and text decoding

mod connection;
mod data;
mod schema_collection;

#[cfg(test)]
mod tests;

use super::{
    ConnectionConfig, DatabaseProvider, Estimate, ListedTable, RowCountEstimate, RowStream,
    SizeEstimate, StatementFailure, describe_listed_tables,
};
use crate::Result;
use crate::dialect::{Dialect, FirebirdDialect};
use crate::models::{
    ColumnDefinition, ConstraintDefinition, DatabaseEngine, ForeignKeyDefinition,
    IndexDefinition, TableSchema,
};
use crate::validation::TableFilter;
use async_trait::async_trait;
use odbc_api::Environment;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Firebird provider.
pub struct FirebirdProvider {
    env: Arc<Environment>,
    /// ODBC connection string; holds the password
    connection_string: Arc<Zeroizing<String>>,
    config: ConnectionConfig,
    dialect: FirebirdDialect,
}

impl std::fmt::Debug for FirebirdProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebirdProvider")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl DatabaseProvider for FirebirdProvider {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Firebird
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn connection_config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn default_schema(&self) -> Option<String> {
        None
    }

    async fn test_connection(&self) -> Result<()> {
        self.check_connection().await?;
        tracing::info!("Connected to Firebird at {}", self.config);
        Ok(())
    }

    async fn get_tables(&self, filter: Option<&TableFilter>) -> Result<Vec<TableSchema>> {
        let listed: Vec<ListedTable> = self.list_tables().await?;
        describe_listed_tables(self, listed, filter).await
    }

    async fn get_columns(&self, table: &str, _schema: Option<&str>) -> Result<Vec<ColumnDefinition>> {
        self.collect_columns(table).await
    }

    async fn get_indexes(&self, table: &str, _schema: Option<&str>) -> Result<Vec<IndexDefinition>> {
        self.collect_indexes(table).await
    }

    async fn get_foreign_keys(
        &self,
        table: &str,
        _schema: Option<&str>,
    ) -> Result<Vec<ForeignKeyDefinition>> {
        self.collect_foreign_keys(table).await
    }

    async fn get_constraints(
        &self,
        table: &str,
        _schema: Option<&str>,
    ) -> Result<Vec<ConstraintDefinition>> {
        self.collect_constraints(table).await
    }

    async fn get_table_data(
        &self,
        table: &TableSchema,
        where_clause: Option<&str>,
        batch_size: usize,
    ) -> Result<RowStream> {
        self.stream_rows(table, where_clause, batch_size)
    }

    async fn table_exists(&self, table: &str, _schema: Option<&str>) -> Result<bool> {
        self.check_table_exists(table).await
    }

    /// Firebird keeps no row statistics, so the estimate is an exact count.
    async fn estimate_row_count(&self, table: &str, _schema: Option<&str>) -> RowCountEstimate {
        match self.exact_row_count(table).await {
            Ok(n) => Estimate::Known(n),
            Err(e) => Estimate::from_error(&e),
        }
    }

    /// The `RDB$` catalog does not track data pages per table.
    async fn estimate_table_size(&self, table: &str, _schema: Option<&str>) -> SizeEstimate {
        tracing::trace!("No size statistics for Firebird table {}", table);
        Estimate::Unavailable
    }

    async fn count_rows(&self, table: &str, _schema: Option<&str>) -> Result<u64> {
        self.exact_row_count(table).await
    }

    async fn execute_in_transaction(
        &self,
        statements: &[String],
        commit: bool,
    ) -> std::result::Result<(), StatementFailure> {
        self.run_transaction(statements, commit).await
    }
}
