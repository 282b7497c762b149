//! PostgreSQL provider with connection pooling.
//!
//! # Module Structure
//! - `connection`: pool construction, session settings and transactions
//! - `schema_collection`: catalog queries (tables, columns, indexes, keys)
//! - `data`: streaming `SELECT` and row decoding
//!
//! Session settings applied to every pooled connection: UTC time zone,
//! server-side statement timeout matching the configured query timeout, and
//! read-only transactions when the configuration asks for them.

mod connection;
mod data;
mod schema_collection;

#[cfg(test)]
mod tests;

use super::helpers::with_timeout;
use super::{
    ConnectionConfig, DatabaseProvider, Estimate, ListedTable, RowCountEstimate, RowStream,
    SizeEstimate, StatementFailure, describe_listed_tables,
};
use crate::dialect::{Dialect, PostgresDialect};
use crate::models::{
    ColumnDefinition, ConstraintDefinition, DatabaseEngine, ForeignKeyDefinition,
    IndexDefinition, TableSchema,
};
use crate::validation::TableFilter;
use crate::Result;
use async_trait::async_trait;
use sqlx::PgPool;

/// Schema used when a call does not name one.
const DEFAULT_SCHEMA: &str = "public";

/// PostgreSQL provider backed by a small sqlx pool.
pub struct PostgresProvider {
    pool: PgPool,
    config: ConnectionConfig,
    dialect: PostgresDialect,
}

impl std::fmt::Debug for PostgresProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresProvider")
            .field("config", &self.config)
            .field("pool_size", &self.pool.size())
            .field("pool_idle", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresProvider {
    fn schema_or_default<'a>(schema: Option<&'a str>) -> &'a str {
        schema.filter(|s| !s.is_empty()).unwrap_or(DEFAULT_SCHEMA)
    }
}

#[async_trait]
impl DatabaseProvider for PostgresProvider {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::PostgreSql
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn connection_config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn test_connection(&self) -> Result<()> {
        let result: i32 = with_timeout(self.config.connect_timeout, "PostgreSQL connection test", async {
            sqlx::query_scalar("SELECT 1")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    crate::error::DbTransitError::connection_failed(
                        format!("Failed to connect to PostgreSQL at {}", self.config),
                        e,
                    )
                })
        })
        .await?;

        if result != 1 {
            return Err(crate::error::DbTransitError::configuration(
                "Basic connectivity test failed: unexpected result",
            ));
        }
        tracing::info!("Connected to PostgreSQL at {}", self.config);
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
            .query_estimate(table, Self::schema_or_default(schema), "c.reltuples::bigint")
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
                "pg_total_relation_size(c.oid)::bigint",
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
