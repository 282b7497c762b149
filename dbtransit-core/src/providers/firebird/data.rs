//! Streaming table reads for Firebird.
//!
//! The ODBC driver delivers every column as text (binary as hex), so rows
//! are decoded by the column's canonical kind.

use super::FirebirdProvider;
use super::connection::classify_odbc_error;
use crate::Result;
use crate::dialect::Dialect;
use crate::error::DbTransitError;
use crate::models::{DatabaseEngine, TableSchema};
use crate::providers::helpers::value_from_text;
use crate::providers::{RowSender, RowStream};
use crate::typemap::{self, Canonical};
use crate::value::{RowData, RowValue};
use odbc_api::buffers::TextRowSet;
use odbc_api::{ConnectionOptions, Cursor, Environment};
use std::sync::Arc;

/// Upper bound on rows per ODBC fetch.
const MAX_FETCH_ROWS: usize = 512;
/// Longest value read per column; longer values fail the stream instead
/// of being truncated.
///
/// Columns are fetched as text, so a text BLOB may hold up to 256 KiB and a
/// binary BLOB, read as hex, up to 128 KiB. Tables with larger values fail
/// export.
const MAX_VALUE_BYTES: usize = 256 * 1024;

impl FirebirdProvider {
    /// Starts a producer on a blocking thread that owns its connection and
    /// cursor until the result set is exhausted or the stream is dropped.
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
                typemap::to_canonical(DatabaseEngine::Firebird, &c.data_type, c.max_length, c.precision, c.scale)
            })
            .collect();

        let env = Arc::clone(&self.env);
        let connection_string = Arc::clone(&self.connection_string);
        let fetch_rows = batch_size.clamp(1, MAX_FETCH_ROWS);
        let table_name = table.full_name();
        let (sender, stream) = RowStream::with_capacity(batch_size.clamp(1, 4096));
        tracing::debug!("Streaming rows from {}", table_name);

        tokio::task::spawn_blocking(move || {
            let reader = RowReader {
                sql: &sql,
                columns: &columns,
                kinds: &kinds,
                table_name: &table_name,
                fetch_rows,
            };
            match reader.run(&env, &connection_string, &sender) {
                Ok(produced) => {
                    tracing::debug!("Finished streaming {} ({} rows)", table_name, produced);
                }
                Err(e) => {
                    sender.blocking_send(Err(e));
                }
            }
        });

        Ok(stream)
    }
}

struct RowReader<'a> {
    sql: &'a str,
    columns: &'a Arc<[String]>,
    kinds: &'a [Canonical],
    table_name: &'a str,
    fetch_rows: usize,
}

impl RowReader<'_> {
    /// Reads the result set, sending each row. Returns the number of rows
    /// delivered; stops early once the consumer is gone.
    fn run(&self, env: &Environment, connection_string: &str, sender: &RowSender) -> Result<u64> {
        let conn = env
            .connect_with_connection_string(connection_string, ConnectionOptions::default())
            .map_err(|e| {
                DbTransitError::connection_failed(
                    format!("Failed to open Firebird connection for {}", self.table_name),
                    e,
                )
            })?;
        let context = format!("Failed to read rows from {}", self.table_name);

        let Some(mut cursor) = conn
            .execute(self.sql, ())
            .map_err(|e| classify_odbc_error(&context, e))?
        else {
            return Ok(0);
        };
        let mut buffers = TextRowSet::for_cursor(self.fetch_rows, &mut cursor, Some(MAX_VALUE_BYTES))
            .map_err(|e| classify_odbc_error(&context, e))?;
        let mut block = cursor
            .bind_buffer(&mut buffers)
            .map_err(|e| classify_odbc_error(&context, e))?;

        let mut produced = 0u64;
        while let Some(batch) = block
            .fetch_with_truncation_check(true)
            .map_err(|e| classify_odbc_error(&context, e))?
        {
            for row in 0..batch.num_rows() {
                let values = self
                    .kinds
                    .iter()
                    .enumerate()
                    .map(|(col, kind)| decode_text(kind, batch.at(col, row)))
                    .collect();
                let row = RowData::new(Arc::clone(self.columns), values)?;
                if !sender.blocking_send(Ok(row)) {
                    return Ok(produced);
                }
                produced += 1;
            }
        }
        Ok(produced)
    }
}

/// Decodes one text cell. Strings keep their exact bytes (including `CHAR`
/// padding); invalid UTF-8 outside string columns is kept as raw bytes.
pub(crate) fn decode_text(kind: &Canonical, cell: Option<&[u8]>) -> RowValue {
    let Some(bytes) = cell else {
        return RowValue::Null;
    };
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) if kind.is_textual() => RowValue::Text(text),
        Ok(text) => value_from_text(kind, text),
        Err(e) if kind.is_textual() => RowValue::Text(String::from_utf8_lossy(e.as_bytes()).into_owned()),
        Err(e) => RowValue::Bytes(e.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    #[test]
    fn test_decode_text_by_kind() {
        assert_eq!(decode_text(&Canonical::Int, None), RowValue::Null);
        assert_eq!(decode_text(&Canonical::BigInt, Some(b"42")), RowValue::Int(42));
        assert_eq!(
            decode_text(
                &Canonical::Decimal {
                    precision: Some(18),
                    scale: 4
                },
                Some(b"12.3400")
            ),
            RowValue::Decimal(Decimal::new(123_400, 4))
        );
        assert_eq!(
            decode_text(&Canonical::Date, Some(b"2024-02-29")),
            RowValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(
            decode_text(&Canonical::VarBinary(None), Some(b"CAFE")),
            RowValue::Bytes(vec![0xca, 0xfe])
        );
    }

    #[test]
    fn test_decode_text_keeps_char_padding() {
        let kind = Canonical::Char {
            length: 5,
            unicode: true,
        };
        assert_eq!(
            decode_text(&kind, Some(b"ab   ")),
            RowValue::Text("ab   ".to_string())
        );
    }

    #[test]
    fn test_decode_text_invalid_utf8() {
        let bytes: &[u8] = &[0xff, 0xfe];
        assert_eq!(
            decode_text(&Canonical::VarBinary(None), Some(bytes)),
            RowValue::Bytes(vec![0xff, 0xfe])
        );
        assert!(matches!(
            decode_text(&Canonical::widest_string(), Some(bytes)),
            RowValue::Text(_)
        ));
    }
}
