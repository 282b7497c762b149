//! MySQL connection pool management and transactional execution.

use super::MySqlProvider;
use crate::Result;
use crate::dialect::MySqlDialect;
use crate::error::DbTransitError;
use crate::models::DatabaseEngine;
use crate::providers::helpers::{classify_sqlx_error, statement_preview, with_timeout};
use crate::providers::{ConnectionConfig, ConnectionSettings, StatementFailure};
use sqlx::MySqlPool;

/// Session SQL mode: backtick identifiers, backslash escapes in literals,
/// and explicit zeros kept in auto-increment columns.
const SESSION_SQL_MODE: &str = "STRICT_TRANS_TABLES,NO_ENGINE_SUBSTITUTION,NO_AUTO_VALUE_ON_ZERO";

impl MySqlProvider {
    /// Creates a MySQL provider.
    ///
    /// # Errors
    /// Returns a configuration error if the connection string or the
    /// configuration is invalid. The pool connects lazily.
    pub async fn new(connection_string: &str, config: ConnectionConfig) -> Result<Self> {
        let settings = ConnectionSettings::parse(DatabaseEngine::MySql, connection_string)?;
        let config = settings.apply_to(&config);
        config.validate()?;

        // sqlx only understands the mysql:// scheme.
        let url = match connection_string.strip_prefix("mariadb://") {
            Some(rest) => format!("mysql://{}", rest),
            None => connection_string.to_string(),
        };
        let pool = Self::create_connection_pool(&url, &config)?;
        tracing::debug!("Created MySQL pool for {}", config);

        Ok(Self {
            pool,
            config,
            dialect: MySqlDialect,
        })
    }

    /// Creates the pool with session settings applied to every connection.
    ///
    /// # Connection Pool Configuration
    /// - Max connections: `ConnectionConfig::max_connections`
    /// - Acquire timeout: `ConnectionConfig::connect_timeout`
    /// - Session: `utf8mb4`, UTC, fixed SQL mode, optional read-only mode
    /// - No reuse: a released connection is closed, so every operation runs
    ///   on a dedicated session and no idle session holds metadata locks
    pub(crate) fn create_connection_pool(
        connection_string: &str,
        config: &ConnectionConfig,
    ) -> Result<MySqlPool> {
        use sqlx::Executor;

        let query_timeout_ms = config.query_timeout.as_millis();
        let read_only = config.read_only;

        sqlx::mysql::MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(0)
            .acquire_timeout(config.connect_timeout)
            .test_before_acquire(true)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute("SET NAMES utf8mb4").await?;
                    conn.execute("SET time_zone = '+00:00'").await?;
                    conn.execute(format!("SET SESSION sql_mode = '{}'", SESSION_SQL_MODE).as_str())
                        .await?;
                    conn.execute(
                        format!("SET SESSION max_execution_time = {}", query_timeout_ms).as_str(),
                    )
                    .await?;
                    if read_only {
                        conn.execute("SET SESSION TRANSACTION READ ONLY").await?;
                    }
                    Ok(())
                })
            })
            .after_release(|_conn, _meta| Box::pin(async move { Ok(false) }))
            .connect_lazy(connection_string)
            .map_err(|e| {
                DbTransitError::connection_failed(
                    format!(
                        "Failed to create MySQL connection pool to {}",
                        crate::error::redact_database_url(connection_string)
                    ),
                    e,
                )
            })
    }

    /// Runs statements inside one transaction; see
    /// [`crate::providers::DatabaseProvider::execute_in_transaction`].
    ///
    /// MySQL commits DDL implicitly, so only DML is really transactional.
    pub(crate) async fn run_transaction(
        &self,
        statements: &[String],
        commit: bool,
    ) -> std::result::Result<(), StatementFailure> {
        let engine = DatabaseEngine::MySql;
        let mut tx = with_timeout(self.config.connect_timeout, "MySQL BEGIN", async {
            self.pool
                .begin()
                .await
                .map_err(|e| classify_sqlx_error(engine, "Failed to begin transaction", e))
        })
        .await
        .map_err(|error| StatementFailure { index: 0, error })?;

        for (index, sql) in statements.iter().enumerate() {
            tracing::trace!("Executing statement {}: {}", index, statement_preview(sql));
            let result = with_timeout(self.config.query_timeout, "MySQL statement", async {
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
                let _ = with_timeout(self.config.connect_timeout, "MySQL ROLLBACK", async {
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
