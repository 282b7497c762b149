//! Streaming table reads and row decoding for PostgreSQL.

use super::PostgresProvider;
use crate::Result;
use crate::dialect::Dialect;
use crate::error::DbTransitError;
use crate::models::{DatabaseEngine, TableSchema};
use crate::providers::RowStream;
use crate::providers::helpers::{classify_sqlx_error, value_from_text};
use crate::typemap::{self, Canonical};
use crate::value::{RowData, RowValue};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::StreamExt;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};
use std::sync::Arc;

impl PostgresProvider {
    /// Starts a producer task that runs the table's `SELECT` and forwards
    /// decoded rows. The task holds one pooled connection until the result
    /// set is exhausted or the stream is dropped.
    pub(crate) fn stream_rows(
        &self,
        table: &TableSchema,
        where_clause: Option<&str>,
        batch_size: usize,
    ) -> Result<RowStream> {
        let sql = self.dialect.select_sql(table, where_clause)?;
        let ordered = table.ordered_columns();
        let columns: Arc<[String]> = ordered.iter().map(|c| c.name.clone()).collect();
        let kinds: Vec<Canonical> = ordered
            .iter()
            .map(|c| {
                typemap::to_canonical(
                    DatabaseEngine::PostgreSql,
                    &c.data_type,
                    c.max_length,
                    c.precision,
                    c.scale,
                )
            })
            .collect();

        let pool = self.pool.clone();
        let timeout = self.config.query_timeout;
        let table_name = table.full_name();
        let (sender, stream) = RowStream::with_capacity(batch_size.clamp(1, 4096));
        tracing::debug!("Streaming rows from {}", table_name);

        tokio::spawn(async move {
            let mut conn = match pool.acquire().await {
                Ok(conn) => conn,
                Err(e) => {
                    let context = format!("Failed to acquire connection for {}", table_name);
                    sender
                        .send(Err(classify_sqlx_error(DatabaseEngine::PostgreSql, &context, e)))
                        .await;
                    return;
                }
            };

            let mut rows = sqlx::query(&sql).persistent(false).fetch(&mut *conn);
            let mut produced = 0u64;
            loop {
                let item = match tokio::time::timeout(timeout, rows.next()).await {
                    Err(_) => Err(DbTransitError::timeout(
                        format!("Reading rows from {}", table_name),
                        timeout,
                    )),
                    Ok(None) => break,
                    Ok(Some(Err(e))) => Err(classify_sqlx_error(
                        DatabaseEngine::PostgreSql,
                        &format!("Failed to read rows from {}", table_name),
                        e,
                    )),
                    Ok(Some(Ok(row))) => decode_row(&row, &columns, &kinds, &table_name),
                };
                let failed = item.is_err();
                if !sender.send(item).await || failed {
                    break;
                }
                produced += 1;
            }
            tracing::debug!("Finished streaming {} ({} rows)", table_name, produced);
        });

        Ok(stream)
    }
}

/// Decodes one result row positionally against the table's column list.
pub(crate) fn decode_row(
    row: &PgRow,
    columns: &Arc<[String]>,
    kinds: &[Canonical],
    table_name: &str,
) -> Result<RowData> {
    let values = kinds
        .iter()
        .enumerate()
        .map(|(index, kind)| decode_value(row, index, kind, &columns[index], table_name))
        .collect::<Result<Vec<_>>>()?;
    RowData::new(Arc::clone(columns), values)
}

fn decode_value(
    row: &PgRow,
    index: usize,
    kind: &Canonical,
    column: &str,
    table_name: &str,
) -> Result<RowValue> {
    let parse_error = |e: sqlx::Error| DbTransitError::parse_field(column, Some(table_name), e);
    let type_name = row.column(index).type_info().name().to_ascii_uppercase();

    let value = match type_name.as_str() {
        "BOOL" => row.try_get::<Option<bool>, _>(index).map(|v| v.map(RowValue::Bool)),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .map(|v| v.map(|n| RowValue::Int(i64::from(n)))),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .map(|v| v.map(|n| RowValue::Int(i64::from(n)))),
        "INT8" => row.try_get::<Option<i64>, _>(index).map(|v| v.map(RowValue::Int)),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .map(|v| v.map(|n| RowValue::Float(f64::from(n)))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index).map(|v| v.map(RowValue::Float)),
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(index).map(|v| v.map(RowValue::Bytes)),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index).map(|v| v.map(RowValue::Date)),
        "TIME" => row.try_get::<Option<NaiveTime>, _>(index).map(|v| v.map(RowValue::Time)),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map(|v| v.map(RowValue::DateTime)),
        "TIMESTAMPTZ" => row.try_get::<Option<DateTime<Utc>>, _>(index).map(|v| {
            v.map(|ts| RowValue::DateTimeOffset(DateTime::<FixedOffset>::from(ts)))
        }),
        "UUID" => row.try_get::<Option<uuid::Uuid>, _>(index).map(|v| v.map(RowValue::Uuid)),
        // Everything else is selected as text; the column kind decides how
        // to read it back.
        _ => row.try_get::<Option<String>, _>(index).map(|v| {
            v.map(|text| {
                if kind.is_textual() {
                    RowValue::Text(text)
                } else {
                    value_from_text(kind, text)
                }
            })
        }),
    };

    value.map(|v| v.unwrap_or(RowValue::Null)).map_err(parse_error)
}

#[cfg(test)]
mod tests {
    use crate::providers::helpers::value_from_text;
    use crate::typemap::{self, Canonical};
    use crate::models::DatabaseEngine;
    use crate::value::RowValue;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn test_numeric_text_decodes_exactly() {
        let kind = typemap::to_canonical(DatabaseEngine::PostgreSql, "numeric", None, Some(38), Some(10));
        assert_eq!(
            value_from_text(&kind, "12345678901234.5678901234".to_string()),
            RowValue::Decimal(Decimal::from_str("12345678901234.5678901234").unwrap())
        );
    }

    #[test]
    fn test_unconstrained_numeric_overflow_stays_text() {
        let kind = Canonical::Decimal { precision: None, scale: 0 };
        let huge = "1".repeat(60);
        assert_eq!(value_from_text(&kind, huge.clone()), RowValue::Text(huge));
    }
}
