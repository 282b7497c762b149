//! SQL Server provider over TDS (tiberius).
//!
//! # Module Structure
//! - `connection`: TDS configuration, connects and transactions
//! - `schema_collection`: `sys.*` catalog queries
//! - `data`: streaming `SELECT` and row decoding

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
use crate::dialect::{Dialect, SqlServerDialect};
use crate::error::DbTransitError;
use crate::models::{
    ColumnDefinition, ConstraintDefinition, DatabaseEngine, ForeignKeyDefinition,
    IndexDefinition, TableSchema,
};
use crate::validation::TableFilter;
use async_trait::async_trait;
use connection::TdsClient;
use tokio::sync::Mutex;

/// Schema used when a call does not name one.
const DEFAULT_SCHEMA: &str = "dbo";

/// SQL Server provider.
pub struct SqlServerProvider {
    tds: tiberius::Config,
    config: ConnectionConfig,
    dialect: SqlServerDialect,
    /// Connection reused by catalog queries; dropped after any failure.
    catalog: Mutex<Option<TdsClient>>,
}

impl std::fmt::Debug for SqlServerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlServerProvider")
            .field("config", &self.config)
            .finish()
    }
}

impl SqlServerProvider {
    fn schema_or_default<'a>(schema: Option<&'a str>) -> &'a str {
        schema.filter(|s| !s.is_empty()).unwrap_or(DEFAULT_SCHEMA)
    }
}

#[async_trait]
impl DatabaseProvider for SqlServerProvider {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::SqlServer
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn connection_config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn test_connection(&self) -> Result<()> {
        let rows = self
            .catalog_rows("SQL Server connection test", "SELECT CAST(1 AS INT) AS ok", &[])
            .await?;
        let answer = rows
            .first()
            .map(|row| row.try_get::<i32, _>(0))
            .transpose()
            .map_err(|e| DbTransitError::parse_field("ok", None, e))?
            .flatten();
        if answer != Some(1) {
            return Err(DbTransitError::configuration(
                "Basic connectivity test failed: unexpected result",
            ));
        }
        tracing::info!("Connected to SQL Server at {}", self.config);
        Ok(())
    }

    async fn get_tables(&self, filter: Option<&TableFilter>) -> Result<Vec<TableSchema>> {
        let listed: Vec<ListedTable> = self.list_tables().await?;
        describe_listed_tables(self, listed, filter).await
    }

    async fn get_columns(&self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnDefinition>> {
        self.collect_columns(table, Self::schema_or_default(schema)).await
    }

    async fn get_indexes(&self, table: &str, schema: Option<&str>) -> Result<Vec<IndexDefinition>> {
        self.collect_indexes(table, Self::schema_or_default(schema)).await
    }

    async fn get_foreign_keys(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ForeignKeyDefinition>> {
        self.collect_foreign_keys(table, Self::schema_or_default(schema))
            .await
    }

    async fn get_constraints(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ConstraintDefinition>> {
        self.collect_constraints(table, Self::schema_or_default(schema))
            .await
    }

    async fn get_table_data(
        &self,
        table: &TableSchema,
        where_clause: Option<&str>,
        batch_size: usize,
    ) -> Result<RowStream> {
        self.stream_rows(table, where_clause, batch_size)
    }

    async fn table_exists(&self, table: &str, schema: Option<&str>) -> Result<bool> {
        self.check_table_exists(table, Self::schema_or_default(schema))
            .await
    }

    async fn estimate_row_count(&self, table: &str, schema: Option<&str>) -> RowCountEstimate {
        match self
            .query_estimate(
                table,
                Self::schema_or_default(schema),
                schema_collection::ROW_COUNT_ESTIMATE,
            )
            .await
        {
            Ok(Some(n)) if n >= 0 => Estimate::Known(n.unsigned_abs()),
            Ok(_) => Estimate::Unavailable,
            Err(e) => Estimate::from_error(&e),
        }
    }

    async fn estimate_table_size(&self, table: &str, schema: Option<&str>) -> SizeEstimate {
        match self
            .query_estimate(
                table,
                Self::schema_or_default(schema),
                schema_collection::TABLE_SIZE_ESTIMATE,
            )
            .await
        {
            Ok(Some(n)) if n >= 0 => Estimate::Known(n.unsigned_abs()),
            Ok(_) => Estimate::Unavailable,
            Err(e) => Estimate::from_error(&e),
        }
    }

    async fn count_rows(&self, table: &str, schema: Option<&str>) -> Result<u64> {
        self.exact_row_count(table, Self::schema_or_default(schema))
            .await
    }

    async fn execute_in_transaction(
        &self,
        statements: &[String],
        commit: bool,
    ) -> std::result::Result<(), StatementFailure> {
        self.run_transaction(statements, commit).await
    }
}
