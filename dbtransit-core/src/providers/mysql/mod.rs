//! MySQL and MariaDB provider with connection pooling.
//!
//! # Module Structure
//! - `connection`: pool construction, session settings and transactions
//! - `schema_collection`: `INFORMATION_SCHEMA` queries
//! - `data`: streaming `SELECT` and row decoding
//!
//! MySQL has no schema layer below the database: the "schema" of every
//! table is the connected database, and a call naming no schema uses it.

mod connection;
mod data;
mod schema_collection;


use super::helpers::with_timeout;
use super::{
    ConnectionConfig, DatabaseProvider, Estimate, ListedTable, RowCountEstimate, RowStream,
    SizeEstimate, StatementFailure, describe_listed_tables,
};
use crate::Result;
use crate::dialect::{Dialect, MySqlDialect};
use crate::error::DbTransitError;
use crate::models::{
    ColumnDefinition, ConstraintDefinition, DatabaseEngine, ForeignKeyDefinition,
    IndexDefinition, TableSchema,
};
use crate::validation::TableFilter;
use async_trait::async_trait;
use sqlx::MySqlPool;

/// MySQL provider backed by a small sqlx pool.
pub struct MySqlProvider {
    pool: MySqlPool,
    config: ConnectionConfig,
    dialect: MySqlDialect,
}

impl std::fmt::Debug for MySqlProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlProvider")
            .field("config", &self.config)
            .field("pool_size", &self.pool.size())
            .field("pool_idle", &self.pool.num_idle())
            .finish()
    }
}

impl MySqlProvider {
    /// The database a call refers to: the named schema, else the connected
    /// database.
    fn database_for<'a>(&'a self, schema: Option<&'a str>) -> Result<&'a str> {
        schema
            .filter(|s| !s.is_empty())
            .or(self.config.database.as_deref())
            .ok_or_else(|| {
                DbTransitError::configuration(
                    "MySQL connection string names no database and no schema was given",
                )
            })
    }
}

#[async_trait]
impl DatabaseProvider for MySqlProvider {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::MySql
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn connection_config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn default_schema(&self) -> Option<String> {
        self.config.database.clone()
    }

    async fn test_connection(&self) -> Result<()> {
        let result: i64 = with_timeout(self.config.connect_timeout, "MySQL connection test", async {
            sqlx::query_scalar("SELECT CAST(1 AS SIGNED)")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    DbTransitError::connection_failed(
                        format!("Failed to connect to MySQL at {}", self.config),
                        e,
                    )
                })
        })
        .await?;

        if result != 1 {
            return Err(DbTransitError::configuration(
                "Basic connectivity test failed: unexpected result",
            ));
        }
        tracing::info!("Connected to MySQL at {}", self.config);
        Ok(())
    }

    async fn get_tables(&self, filter: Option<&TableFilter>) -> Result<Vec<TableSchema>> {
        let listed: Vec<ListedTable> = self.list_tables().await?;
        describe_listed_tables(self, listed, filter).await
    }

    async fn get_columns(&self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnDefinition>> {
        self.collect_columns(table, self.database_for(schema)?).await
    }

    async fn get_indexes(&self, table: &str, schema: Option<&str>) -> Result<Vec<IndexDefinition>> {
        self.collect_indexes(table, self.database_for(schema)?).await
    }

    async fn get_foreign_keys(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ForeignKeyDefinition>> {
        self.collect_foreign_keys(table, self.database_for(schema)?)
            .await
    }

    async fn get_constraints(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ConstraintDefinition>> {
        self.collect_constraints(table, self.database_for(schema)?)
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
        self.check_table_exists(table, self.database_for(schema)?)
            .await
    }

    async fn estimate_row_count(&self, table: &str, schema: Option<&str>) -> RowCountEstimate {
        let Ok(database) = self.database_for(schema) else {
            return Estimate::Unavailable;
        };
        match self
            .query_estimate(table, database, "CAST(TABLE_ROWS AS SIGNED)")
            .await
        {
            Ok(Some(n)) if n >= 0 => Estimate::Known(n.unsigned_abs()),
            Ok(_) => Estimate::Unavailable,
            Err(e) => Estimate::from_error(&e),
        }
    }

    async fn estimate_table_size(&self, table: &str, schema: Option<&str>) -> SizeEstimate {
        let Ok(database) = self.database_for(schema) else {
            return Estimate::Unavailable;
        };
        match self
            .query_estimate(table, database, "CAST(DATA_LENGTH + INDEX_LENGTH AS SIGNED)")
            .await
        {
            Ok(Some(n)) if n >= 0 => Estimate::Known(n.unsigned_abs()),
            Ok(_) => Estimate::Unavailable,
            Err(e) => Estimate::from_error(&e),
        }
    }

    async fn count_rows(&self, table: &str, schema: Option<&str>) -> Result<u64> {
        self.exact_row_count(table, self.database_for(schema)?)
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
