//! Helper utilities shared by provider implementations.
//!
//! Timeouts, privilege classification and row-field extraction live here so
//! every engine reports failures the same way.

use crate::error::DbTransitError;
use crate::models::DatabaseEngine;
use crate::typemap::Canonical;
use crate::value::RowValue;
use crate::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;

/// Runs one command under the configured per-command timeout.
///
/// # Errors
/// Returns [`DbTransitError::Timeout`] when the command does not finish in
/// time, otherwise whatever the command returned.
pub async fn with_timeout<T, F>(timeout: Duration, operation: &str, command: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, command).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("{} timed out after {:?}", operation, timeout);
            Err(DbTransitError::timeout(operation, timeout))
        }
    }
}

/// Whether a driver error code or message denotes a missing privilege.
///
/// `code` is the SQLSTATE (PostgreSQL, Firebird) or the native error number
/// rendered as text (MySQL, SQL Server).
pub fn is_privilege_error(engine: DatabaseEngine, code: Option<&str>, message: &str) -> bool {
    let code = code.map(str::trim).unwrap_or_default();
    match engine {
        DatabaseEngine::PostgreSql => code == "42501",
        DatabaseEngine::MySql => matches!(code, "1142" | "1143" | "1044" | "1227"),
        DatabaseEngine::SqlServer => matches!(code, "229" | "230" | "262" | "297" | "300"),
        DatabaseEngine::Firebird => {
            code == "28000" || message.to_ascii_lowercase().contains("no permission")
        }
    }
}

/// Classifies a driver failure: privilege errors become
/// [`DbTransitError::InsufficientPrivileges`], everything else a query error
/// carrying `context`.
pub fn classify_failure(
    engine: DatabaseEngine,
    context: &str,
    code: Option<&str>,
    message: &str,
) -> DbTransitError {
    if is_privilege_error(engine, code, message) {
        DbTransitError::insufficient_privileges(format!("{}: {}", context, message))
    } else {
        DbTransitError::query_failed(format!("{}: {}", context, message))
    }
}

/// Splits statement text for debug logging without flooding the log with
/// multi-megabyte INSERTs.
pub fn statement_preview(sql: &str) -> &str {
    const PREVIEW: usize = 160;
    if sql.len() <= PREVIEW {
        return sql;
    }
    let mut end = PREVIEW;
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

/// Decodes a value the server delivered as text, guided by the column's
/// canonical kind. Text that does not parse as the expected kind is kept
/// verbatim, so exact numerics wider than [`Decimal`] survive as strings.
pub fn value_from_text(kind: &Canonical, text: String) -> RowValue {
    let trimmed = text.trim();
    let parsed = match kind {
        Canonical::Bit => match trimmed.to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "y" | "yes" => Some(RowValue::Bool(true)),
            "0" | "f" | "false" | "n" | "no" => Some(RowValue::Bool(false)),
            _ => None,
        },
        Canonical::TinyInt | Canonical::SmallInt | Canonical::Int | Canonical::BigInt => {
            trimmed.parse::<i64>().ok().map(RowValue::Int)
        }
        Canonical::Decimal { .. } | Canonical::Money | Canonical::SmallMoney => {
            Decimal::from_str_exact(trimmed).ok().map(RowValue::Decimal)
        }
        Canonical::Real | Canonical::Float => trimmed.parse::<f64>().ok().map(RowValue::Float),
        Canonical::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok().map(RowValue::Date),
        Canonical::Time { .. } => NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
            .ok()
            .map(RowValue::Time),
        Canonical::SmallDateTime | Canonical::DateTime | Canonical::DateTime2 { .. } => {
            parse_naive_datetime(trimmed).map(RowValue::DateTime)
        }
        Canonical::DateTimeOffset { .. } => DateTime::parse_from_rfc3339(trimmed)
            .or_else(|_| DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%#z"))
            .ok()
            .map(RowValue::DateTimeOffset),
        Canonical::Uuid => uuid::Uuid::parse_str(trimmed).ok().map(RowValue::Uuid),
        Canonical::Binary(_) | Canonical::VarBinary(_) => {
            hex::decode(trimmed).ok().map(RowValue::Bytes)
        }
        Canonical::Char { .. }
        | Canonical::VarChar { .. }
        | Canonical::Xml
        | Canonical::Json
        | Canonical::Unknown(_) => None,
    };
    parsed.unwrap_or(RowValue::Text(text))
}

fn parse_naive_datetime(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

#[cfg(any(feature = "postgresql", feature = "mysql"))]
pub use sqlx_support::*;

#[cfg(any(feature = "postgresql", feature = "mysql"))]
mod sqlx_support {
    use super::*;
    use sqlx::Row;

    /// Extension trait for extracting typed values from catalog rows with
    /// consistent error handling.
    ///
    /// # Example
    /// ```rust,ignore
    /// use dbtransit_core::providers::helpers::RowExt;
    ///
    /// let name: String = row.get_field("column_name", Some("orders"))?;
    /// ```
    pub trait RowExt: Row {
        /// Extracts a typed field, naming the column and table on failure.
        fn get_field<'r, T>(&'r self, field_name: &str, table_context: Option<&str>) -> Result<T>
        where
            T: sqlx::Decode<'r, Self::Database> + sqlx::Type<Self::Database>;
    }

    impl<R> RowExt for R
    where
        R: Row,
        for<'a> &'a str: sqlx::ColumnIndex<R>,
    {
        fn get_field<'r, T>(&'r self, field_name: &str, table_context: Option<&str>) -> Result<T>
        where
            T: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
        {
            self.try_get(field_name)
                .map_err(|e| DbTransitError::parse_field(field_name, table_context, e))
        }
    }

    /// Classifies a sqlx error from a catalog or data command.
    pub fn classify_sqlx_error(engine: DatabaseEngine, context: &str, error: sqlx::Error) -> DbTransitError {
        match &error {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code();
                let code = match engine {
                    DatabaseEngine::MySql => mysql_error_number(db_err.as_ref()).or(code.map(|c| c.into_owned())),
                    _ => code.map(|c| c.into_owned()),
                };
                classify_failure(engine, context, code.as_deref(), db_err.message())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                DbTransitError::connection_failed(context.to_string(), error)
            }
            _ => DbTransitError::catalog_failed(context.to_string(), error),
        }
    }

    #[cfg(feature = "mysql")]
    fn mysql_error_number(error: &dyn sqlx::error::DatabaseError) -> Option<String> {
        error
            .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
            .map(|e| e.number().to_string())
    }

    #[cfg(not(feature = "mysql"))]
    fn mysql_error_number(_error: &dyn sqlx::error::DatabaseError) -> Option<String> {
        None
    }
}
