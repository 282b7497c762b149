//! Firebird connections over ODBC and transactional execution.
//!
//! ODBC calls block, so every operation runs on tokio's blocking pool with
//! its own connection. The environment is created once per provider and
//! shared by those threads.

use super::FirebirdProvider;
use crate::Result;
use crate::dialect::FirebirdDialect;
use crate::error::DbTransitError;
use crate::models::DatabaseEngine;
use crate::providers::helpers::{classify_failure, statement_preview, with_timeout};
use crate::providers::{ConnectionConfig, ConnectionSettings, StatementFailure};
use odbc_api::buffers::TextRowSet;
use odbc_api::{
    Connection, ConnectionOptions, Cursor, Environment, ParameterCollectionRef, ResultSetMetadata,
};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Driver name registered by the Firebird ODBC package.
pub(crate) const DEFAULT_DRIVER: &str = "Firebird/InterBase(r) driver";

/// Rows fetched per round trip for catalog queries.
const CATALOG_FETCH_ROWS: usize = 256;
/// Longest catalog text value (default and CHECK sources included).
const CATALOG_MAX_TEXT: usize = 16 * 1024;

/// Classifies an ODBC failure, using the SQLSTATE when the driver supplied
/// a diagnostic record.
pub(crate) fn classify_odbc_error(context: &str, error: odbc_api::Error) -> DbTransitError {
    match &error {
        odbc_api::Error::Diagnostics { record, .. } => {
            let message = String::from_utf8_lossy(&record.message).to_string();
            let state = record.state.as_str();
            if state.starts_with("08") {
                return DbTransitError::connection_failed(context.to_string(), error);
            }
            classify_failure(DatabaseEngine::Firebird, context, Some(state), &message)
        }
        _ => DbTransitError::catalog_failed(context.to_string(), error),
    }
}

/// Wraps an ODBC attribute value in braces so `;` and `}` survive.
fn braced(value: &str) -> String {
    format!("{{{}}}", value.replace('}', "}}"))
}

/// Builds the ODBC connection string from a parsed `firebird://` URL.
///
/// Recognized parameters: `driver` (defaults to the Firebird ODBC driver)
/// and `charset` (defaults to `UTF8`).
pub(crate) fn odbc_connection_string(settings: &ConnectionSettings) -> Result<Zeroizing<String>> {
    let database = settings.database.as_deref().ok_or_else(|| {
        DbTransitError::configuration("Firebird connection string must name a database path or alias")
    })?;
    let driver = settings.param("driver").unwrap_or(DEFAULT_DRIVER);
    let charset = settings.param("charset").unwrap_or("UTF8");

    Ok(Zeroizing::new(format!(
        "DRIVER={};DBNAME={}/{}:{};UID={};PWD={};CHARSET={};",
        braced(driver),
        settings.host,
        settings.port,
        database,
        braced(settings.credentials.username()),
        braced(settings.credentials.password()),
        charset
    )))
}

/// Runs a query and returns every row as optional text, one entry per
/// column.
pub(crate) fn query_text(
    conn: &Connection<'_>,
    sql: &str,
    params: impl ParameterCollectionRef,
    context: &str,
) -> Result<Vec<Vec<Option<String>>>> {
    let mut rows = Vec::new();
    let Some(mut cursor) = conn
        .execute(sql, params)
        .map_err(|e| classify_odbc_error(context, e))?
    else {
        return Ok(rows);
    };

    let columns = usize::from(
        cursor
            .num_result_cols()
            .map_err(|e| classify_odbc_error(context, e))?
            .max(0)
            .unsigned_abs(),
    );
    let mut buffers = TextRowSet::for_cursor(CATALOG_FETCH_ROWS, &mut cursor, Some(CATALOG_MAX_TEXT))
        .map_err(|e| classify_odbc_error(context, e))?;
    let mut block = cursor
        .bind_buffer(&mut buffers)
        .map_err(|e| classify_odbc_error(context, e))?;

    while let Some(batch) = block.fetch().map_err(|e| classify_odbc_error(context, e))? {
        for row in 0..batch.num_rows() {
            rows.push(
                (0..columns)
                    .map(|col| {
                        batch
                            .at(col, row)
                            .map(|bytes| String::from_utf8_lossy(bytes).trim_end().to_string())
                    })
                    .collect(),
            );
        }
    }
    Ok(rows)
}

impl FirebirdProvider {
    /// Creates a Firebird provider. No connection is opened until the
    /// first operation.
    ///
    /// # Errors
    /// Returns a configuration error if the connection string or the
    /// configuration is invalid, or if the ODBC driver manager cannot be
    /// loaded.
    pub async fn new(connection_string: &str, config: ConnectionConfig) -> Result<Self> {
        let settings = ConnectionSettings::parse(DatabaseEngine::Firebird, connection_string)?;
        let config = settings.apply_to(&config);
        config.validate()?;
        let odbc = odbc_connection_string(&settings)?;

        let env = Environment::new().map_err(|e| {
            DbTransitError::configuration(format!(
                "Failed to create ODBC environment: {}. Install unixODBC and the Firebird ODBC driver",
                e
            ))
        })?;
        tracing::debug!("Configured Firebird provider for {}", config);

        Ok(Self {
            env: Arc::new(env),
            connection_string: Arc::new(odbc),
            config,
            dialect: FirebirdDialect,
        })
    }

    /// Runs `work` on a blocking thread with a fresh connection, under the
    /// query timeout.
    ///
    /// A timeout abandons the blocking thread; its connection closes once
    /// the driver returns.
    pub(crate) async fn with_connection<T, F>(&self, operation: &str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection<'_>) -> Result<T> + Send + 'static,
    {
        let env = Arc::clone(&self.env);
        let connection_string = Arc::clone(&self.connection_string);
        let context = operation.to_string();

        let task = tokio::task::spawn_blocking(move || {
            let conn = env
                .connect_with_connection_string(&connection_string, ConnectionOptions::default())
                .map_err(|e| {
                    DbTransitError::connection_failed(
                        format!("Failed to open Firebird connection for {}", context),
                        e,
                    )
                })?;
            work(&conn)
        });

        with_timeout(self.config.query_timeout, operation, async {
            task.await.map_err(|e| {
                DbTransitError::query_failed(format!("{} worker failed: {}", operation, e))
            })?
        })
        .await
    }

    /// Runs statements inside one transaction on a dedicated connection;
    /// see [`crate::providers::DatabaseProvider::execute_in_transaction`].
    pub(crate) async fn run_transaction(
        &self,
        statements: &[String],
        commit: bool,
    ) -> std::result::Result<(), StatementFailure> {
        let statements = statements.to_vec();
        let total = statements.len();

        let outcome = self
            .with_connection("Firebird transaction", move |conn| {
                Ok(execute_transaction(conn, &statements, commit))
            })
            .await;

        match outcome {
            Ok(result) => result,
            Err(error) => Err(StatementFailure {
                index: if matches!(error, DbTransitError::Timeout { .. }) {
                    total
                } else {
                    0
                },
                error,
            }),
        }
    }
}

fn execute_transaction(
    conn: &Connection<'_>,
    statements: &[String],
    commit: bool,
) -> std::result::Result<(), StatementFailure> {
    conn.set_autocommit(false).map_err(|e| StatementFailure {
        index: 0,
        error: classify_odbc_error("Firebird BEGIN", e),
    })?;

    for (index, sql) in statements.iter().enumerate() {
        tracing::trace!("Executing statement {}: {}", index, statement_preview(sql));
        if let Err(e) = conn.execute(sql, ()) {
            let context = format!("Statement {} failed ({})", index, statement_preview(sql));
            let error = classify_odbc_error(&context, e);
            let _ = conn.rollback();
            return Err(StatementFailure { index, error });
        }
    }

    let finished = if commit {
        conn.commit().map_err(|e| classify_odbc_error("Firebird COMMIT", e))
    } else {
        conn.rollback().map_err(|e| classify_odbc_error("Firebird ROLLBACK", e))
    };
    finished.map_err(|error| StatementFailure {
        index: statements.len(),
        error,
    })
}
