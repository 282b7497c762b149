//! Streaming table reads and row decoding for SQL Server.

use super::SqlServerProvider;
use super::connection::{classify_tds_error, open_client};
use crate::Result;
use crate::dialect::Dialect;
use crate::error::DbTransitError;
use crate::models::{DatabaseEngine, TableSchema};
use crate::providers::RowStream;
use crate::providers::helpers::value_from_text;
use crate::typemap::{self, Canonical};
use crate::value::{RowData, RowValue};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use std::sync::Arc;
use tiberius::numeric::Numeric;
use tiberius::{QueryItem, Row};

impl SqlServerProvider {
    /// Starts a producer task on a dedicated connection that runs the
    /// table's `SELECT` and forwards decoded rows.
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
                typemap::to_canonical(DatabaseEngine::SqlServer, &c.data_type, c.max_length, c.precision, c.scale)
            })
            .collect();

        let tds = self.tds.clone();
        let connect_timeout = self.config.connect_timeout;
        let timeout = self.config.query_timeout;
        let table_name = table.full_name();
        let (sender, stream) = RowStream::with_capacity(batch_size.clamp(1, 4096));
        tracing::debug!("Streaming rows from {}", table_name);

        tokio::spawn(async move {
            let mut client = match open_client(tds, connect_timeout).await {
                Ok(client) => client,
                Err(e) => {
                    sender.send(Err(e)).await;
                    return;
                }
            };
            let context = format!("Failed to read rows from {}", table_name);
            let mut results = match tokio::time::timeout(timeout, client.simple_query(&sql)).await {
                Ok(Ok(results)) => results,
                Ok(Err(e)) => {
                    sender.send(Err(classify_tds_error(&context, e))).await;
                    return;
                }
                Err(_) => {
                    sender
                        .send(Err(DbTransitError::timeout(
                            format!("Reading rows from {}", table_name),
                            timeout,
                        )))
                        .await;
                    return;
                }
            };

            let mut produced = 0u64;
            loop {
                let item = match tokio::time::timeout(timeout, results.try_next()).await {
                    Err(_) => Err(DbTransitError::timeout(
                        format!("Reading rows from {}", table_name),
                        timeout,
                    )),
                    Ok(Ok(None)) => break,
                    Ok(Ok(Some(QueryItem::Metadata(_)))) => continue,
                    Ok(Ok(Some(QueryItem::Row(row)))) => decode_row(&row, &columns, &kinds, &table_name),
                    Ok(Err(e)) => Err(classify_tds_error(&context, e)),
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
    row: &Row,
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

/// Reads one column by its declared kind. Exact numerics go through text so
/// values wider than [`rust_decimal::Decimal`] are kept verbatim.
fn decode_value(
    row: &Row,
    index: usize,
    kind: &Canonical,
    column: &str,
    table_name: &str,
) -> Result<RowValue> {
    let parse_error = |e: tiberius::error::Error| DbTransitError::parse_field(column, Some(table_name), e);

    let value = match kind {
        Canonical::Bit => row.try_get::<bool, _>(index).map(|v| v.map(RowValue::Bool)),
        Canonical::TinyInt => row
            .try_get::<u8, _>(index)
            .map(|v| v.map(|n| RowValue::Int(i64::from(n)))),
        Canonical::SmallInt => row
            .try_get::<i16, _>(index)
            .map(|v| v.map(|n| RowValue::Int(i64::from(n)))),
        Canonical::Int => row
            .try_get::<i32, _>(index)
            .map(|v| v.map(|n| RowValue::Int(i64::from(n)))),
        Canonical::BigInt => row.try_get::<i64, _>(index).map(|v| v.map(RowValue::Int)),
        Canonical::Decimal { .. } | Canonical::Money | Canonical::SmallMoney => row
            .try_get::<Numeric, _>(index)
            .map(|v| v.map(|n| value_from_text(kind, n.to_string()))),
        Canonical::Real => row
            .try_get::<f32, _>(index)
            .map(|v| v.map(|n| RowValue::Float(f64::from(n)))),
        Canonical::Float => row.try_get::<f64, _>(index).map(|v| v.map(RowValue::Float)),
        Canonical::Date => row.try_get::<NaiveDate, _>(index).map(|v| v.map(RowValue::Date)),
        Canonical::Time { .. } => row.try_get::<NaiveTime, _>(index).map(|v| v.map(RowValue::Time)),
        Canonical::SmallDateTime | Canonical::DateTime | Canonical::DateTime2 { .. } => row
            .try_get::<NaiveDateTime, _>(index)
            .map(|v| v.map(RowValue::DateTime)),
        Canonical::DateTimeOffset { .. } => row
            .try_get::<DateTime<FixedOffset>, _>(index)
            .map(|v| v.map(RowValue::DateTimeOffset)),
        Canonical::Uuid => row
            .try_get::<uuid::Uuid, _>(index)
            .map(|v| v.map(RowValue::Uuid)),
        Canonical::Binary(_) | Canonical::VarBinary(_) => row
            .try_get::<&[u8], _>(index)
            .map(|v| v.map(|bytes| RowValue::Bytes(bytes.to_vec()))),
        Canonical::Char { .. } | Canonical::VarChar { .. } | Canonical::Xml | Canonical::Json => row
            .try_get::<&str, _>(index)
            .map(|v| v.map(|text| RowValue::Text(text.to_string()))),
        // rowversion, sql_variant and CLR types: text if the driver allows,
        // raw bytes otherwise.
        Canonical::Unknown(_) => match row.try_get::<&str, _>(index) {
            Ok(v) => Ok(v.map(|text| RowValue::Text(text.to_string()))),
            Err(_) => row
                .try_get::<&[u8], _>(index)
                .map(|v| v.map(|bytes| RowValue::Bytes(bytes.to_vec()))),
        },
    };

    value.map(|v| v.unwrap_or(RowValue::Null)).map_err(parse_error)
}
