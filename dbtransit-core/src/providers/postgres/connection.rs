//! PostgreSQL connection pool management and transactional execution.

use super::PostgresProvider;
use crate::Result;
use crate::dialect::PostgresDialect;
use crate::error::DbTransitError;
use crate::models::DatabaseEngine;
use crate::providers::helpers::{classify_sqlx_error, statement_preview, with_timeout};
use crate::providers::{ConnectionConfig, ConnectionSettings, StatementFailure};
use sqlx::PgPool;

impl PostgresProvider {
    /// Creates a PostgreSQL provider.
    ///
    /// The connection string is parsed and validated up front: credentials
    /// are mandatory and never appear in errors. The pool connects lazily,
    /// so an unreachable server surfaces on the first operation (or on
    /// [`crate::providers::DatabaseProvider::test_connection`]).
    ///
    /// # Errors
    /// Returns a configuration error if the connection string or the
    /// configuration is invalid.
    pub async fn new(connection_string: &str, config: ConnectionConfig) -> Result<Self> {
        let settings = ConnectionSettings::parse(DatabaseEngine::PostgreSql, connection_string)?;
        let config = settings.apply_to(&config);
        config.validate()?;

        let pool = Self::create_connection_pool(connection_string, &config)?;
        tracing::debug!("Created PostgreSQL pool for {}", config);

        Ok(Self {
            pool,
            config,
            dialect: PostgresDialect,
        })
    }

    /// Creates the pool with session settings applied to every connection.
    ///
    /// # Connection Pool Configuration
    /// - Max connections: `ConnectionConfig::max_connections`
    /// - Acquire timeout: `ConnectionConfig::connect_timeout`
    /// - Session: UTC time zone, statement timeout, optional read-only mode
    pub(crate) fn create_connection_pool(
        connection_string: &str,
        config: &ConnectionConfig,
    ) -> Result<PgPool> {
        use sqlx::Executor;

        let statement_timeout_ms = config.query_timeout.as_millis();
        let read_only = config.read_only;

        sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(0)
            .acquire_timeout(config.connect_timeout)
            .test_before_acquire(true)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute("SET timezone = 'UTC'").await?;
                    conn.execute(
                        format!("SET statement_timeout = {}", statement_timeout_ms).as_str(),
                    )
                    .await?;
                    let app_name = format!("dbtransit-{}", env!("CARGO_PKG_VERSION"));
                    conn.execute(format!("SET application_name = '{}'", app_name).as_str())
                        .await?;
                    if read_only {
                        conn.execute("SET default_transaction_read_only = on")
                            .await?;
                    }
                    Ok(())
                })
            })
            .connect_lazy(connection_string)
            .map_err(|e| {
                DbTransitError::connection_failed(
                    format!(
                        "Failed to create PostgreSQL connection pool to {}",
                        crate::error::redact_database_url(connection_string)
                    ),
                    e,
                )
            })
    }

    /// Runs statements inside one transaction; see
    /// [`crate::providers::DatabaseProvider::execute_in_transaction`].
    pub(crate) async fn run_transaction(
        &self,
        statements: &[String],
        commit: bool,
    ) -> std::result::Result<(), StatementFailure> {
        let engine = DatabaseEngine::PostgreSql;
        let mut tx = with_timeout(self.config.connect_timeout, "PostgreSQL BEGIN", async {
            self.pool
                .begin()
                .await
                .map_err(|e| classify_sqlx_error(engine, "Failed to begin transaction", e))
        })
        .await
        .map_err(|error| StatementFailure { index: 0, error })?;

        for (index, sql) in statements.iter().enumerate() {
            tracing::trace!("Executing statement {}: {}", index, statement_preview(sql));
            let result = with_timeout(self.config.query_timeout, "PostgreSQL statement", async {
                sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(sql))
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        classify_sqlx_error(
                            engine,
                            &format!("Statement {} failed ({})", index, statement_preview(sql)),
                            e,
                        )
                    })
            })
            .await;

            if let Err(error) = result {
                let _ = with_timeout(self.config.connect_timeout, "PostgreSQL ROLLBACK", async {
                    tx.rollback()
                        .await
                        .map_err(|e| classify_sqlx_error(engine, "Rollback failed", e))
                })
                .await;
                return Err(StatementFailure { index, error });
            }
        }

        let finish = if commit { "COMMIT" } else { "ROLLBACK" };
        with_timeout(self.config.query_timeout, finish, async {
            let outcome = if commit { tx.commit().await } else { tx.rollback().await };
            outcome.map_err(|e| classify_sqlx_error(engine, &format!("{} failed", finish), e))
        })
        .await
        .map_err(|error| StatementFailure {
            index: statements.len(),
            error,
        })
    }
}
