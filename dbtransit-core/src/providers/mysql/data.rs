//! Streaming table reads and row decoding for MySQL.

use super::MySqlProvider;
use crate::Result;
use crate::dialect::Dialect;
use crate::error::DbTransitError;
use crate::models::{DatabaseEngine, TableSchema};
use crate::providers::RowStream;
use crate::providers::helpers::{classify_sqlx_error, value_from_text};
use crate::typemap::{self, Canonical};
use crate::value::{RowData, RowValue};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::StreamExt;
use rust_decimal::Decimal;
use sqlx::mysql::MySqlRow;
use sqlx::{Column, Row, TypeInfo};
use std::sync::Arc;

impl MySqlProvider {
    /// Starts a producer task that runs the table's `SELECT` and forwards
    /// decoded rows over a bounded channel.
    pub(crate) fn stream_rows(
        &self,
        table: &TableSchema,
        where_clause: Option<&str>,
        batch_size: usize,
    ) -> Result<RowStream> {
        let mut table = table.clone();
        if table.schema.is_none() {
            table.schema = self.config.database.clone();
        }
        let sql = self.dialect.select_sql(&table, where_clause)?;
        let ordered = table.ordered_columns();
        let columns: Arc<[String]> = ordered.iter().map(|c| c.name.clone()).collect();
        let kinds: Vec<Canonical> = ordered
            .iter()
            .map(|c| {
                typemap::to_canonical(DatabaseEngine::MySql, &c.data_type, c.max_length, c.precision, c.scale)
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
                        .send(Err(classify_sqlx_error(DatabaseEngine::MySql, &context, e)))
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
                        DatabaseEngine::MySql,
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

fn decode_row(
    row: &MySqlRow,
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
    row: &MySqlRow,
    index: usize,
    kind: &Canonical,
    column: &str,
    table_name: &str,
) -> Result<RowValue> {
    let parse_error = |e: sqlx::Error| DbTransitError::parse_field(column, Some(table_name), e);
    let type_name = row.column(index).type_info().name().to_ascii_uppercase();

    let value = match type_name.as_str() {
        "BOOLEAN" => row.try_get::<Option<bool>, _>(index).map(|v| v.map(RowValue::Bool)),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .map(|v| v.map(|n| signed_value(kind, n))),
        t if t.ends_with(" UNSIGNED") => row
            .try_get::<Option<u64>, _>(index)
            .map(|v| v.map(|n| unsigned_value(kind, n))),
        "FLOAT" => row
            .try_get::<Option<f32>, _>(index)
            .map(|v| v.map(|n| RowValue::Float(f64::from(n)))),
        "DOUBLE" => row.try_get::<Option<f64>, _>(index).map(|v| v.map(RowValue::Float)),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index).map(|v| v.map(RowValue::Date)),
        "TIME" => row.try_get::<Option<NaiveTime>, _>(index).map(|v| v.map(RowValue::Time)),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map(|v| v.map(RowValue::DateTime)),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .map(|v| v.map(|bytes| binary_value(kind, bytes))),
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

fn signed_value(kind: &Canonical, value: i64) -> RowValue {
    match kind {
        Canonical::Bit => RowValue::Bool(value != 0),
        _ => RowValue::Int(value),
    }
}

/// `BIGINT UNSIGNED` exceeds `i64`; `BIT(n)` arrives as `CAST(.. AS UNSIGNED)`.
fn unsigned_value(kind: &Canonical, value: u64) -> RowValue {
    match kind {
        Canonical::Bit => RowValue::Bool(value != 0),
        Canonical::Decimal { .. } => RowValue::Decimal(Decimal::from(value)),
        _ => match i64::try_from(value) {
            Ok(n) => RowValue::Int(n),
            Err(_) => RowValue::Decimal(Decimal::from(value)),
        },
    }
}

/// Binary-collated text columns arrive with binary type names.
fn binary_value(kind: &Canonical, bytes: Vec<u8>) -> RowValue {
    if kind.is_textual() {
        match String::from_utf8(bytes) {
            Ok(text) => RowValue::Text(text),
            Err(e) => RowValue::Bytes(e.into_bytes()),
        }
    } else {
        RowValue::Bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsigned_bigint_beyond_i64_becomes_decimal() {
        let kind = Canonical::Decimal { precision: Some(20), scale: 0 };
        assert_eq!(
            unsigned_value(&kind, u64::MAX),
            RowValue::Decimal(Decimal::from(u64::MAX))
        );
        assert_eq!(unsigned_value(&Canonical::BigInt, 42), RowValue::Int(42));
    }

    #[test]
    fn test_bit_columns_decode_as_bool() {
        assert_eq!(unsigned_value(&Canonical::Bit, 1), RowValue::Bool(true));
        assert_eq!(signed_value(&Canonical::Bit, 0), RowValue::Bool(false));
        assert_eq!(signed_value(&Canonical::Int, -7), RowValue::Int(-7));
    }

    #[test]
    fn test_binary_collated_text_is_text() {
        let text_kind = Canonical::VarChar { length: Some(20), unicode: true };
        assert_eq!(binary_value(&text_kind, b"abc".to_vec()), RowValue::Text("abc".to_string()));
        assert_eq!(
            binary_value(&Canonical::VarBinary(None), b"abc".to_vec()),
            RowValue::Bytes(b"abc".to_vec())
        );
    }
}
