//! Binary archive files: per-table metadata and per-batch row data.
//!
//! Both files are bincode-encoded with `format_version` as the first field,
//! so a reader can check the version before decoding the rest.

use crate::Result;
use crate::error::DbTransitError;
use crate::models::{DatabaseEngine, TableSchema};
use crate::value::{RowData, RowValue};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Version written by this build. Readers accept any version up to this one.
pub const FORMAT_VERSION: u32 = 1;

/// `tables/<stem>.meta`: one table's schema as exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadataFile {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    /// Engine whose vocabulary the column types use
    pub engine: DatabaseEngine,
    pub schema: TableSchema,
}

impl TableMetadataFile {
    pub fn new(engine: DatabaseEngine, schema: TableSchema) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            exported_at: Utc::now(),
            engine,
            schema,
        }
    }
}

/// `data/<stem>/batch_NNNNNN.bin`: one page of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBatchFile {
    pub format_version: u32,
    /// Qualified source table name
    pub table: String,
    /// 1-based
    pub batch_number: u64,
    /// Estimate taken before the export started; absent when unknown
    pub total_batches: Option<u64>,
    pub is_last_batch: bool,
    /// Rows written for this table so far, including this batch
    pub total_count: u64,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RowValue>>,
}

impl DataBatchFile {
    /// Builds a batch from streamed rows. `rows_before` is the number of
    /// rows already written for the table.
    pub fn from_rows(
        table: impl Into<String>,
        batch_number: u64,
        rows: Vec<RowData>,
        rows_before: u64,
        is_last_batch: bool,
    ) -> Self {
        let columns = rows
            .first()
            .map(|r| r.columns().iter().cloned().collect())
            .unwrap_or_default();
        let total_count = rows_before.saturating_add(rows.len() as u64);
        Self {
            format_version: FORMAT_VERSION,
            table: table.into(),
            batch_number,
            total_batches: None,
            is_last_batch,
            total_count,
            columns,
            rows: rows.into_iter().map(RowData::into_values).collect(),
        }
    }

    pub fn with_total_batches(mut self, total: Option<u64>) -> Self {
        self.total_batches = total;
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Converts the stored rows back into [`RowData`] sharing one column list.
    ///
    /// # Errors
    /// Returns an archive error when a row's width does not match the
    /// column list.
    pub fn into_rows(self) -> Result<Vec<RowData>> {
        let columns: Arc<[String]> = self.columns.into();
        let table = self.table;
        let batch = self.batch_number;
        self.rows
            .into_iter()
            .map(|values| {
                RowData::new(Arc::clone(&columns), values).map_err(|e| {
                    DbTransitError::archive(format!("{} batch {}: {}", table, batch, e))
                })
            })
            .collect()
    }
}

/// Encodes an archive file.
pub fn encode<T: Serialize>(value: &T, context: &str) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbTransitError::encoding(context, e))
}

/// Reads the leading version of an encoded file and rejects versions newer
/// than [`FORMAT_VERSION`].
pub fn check_version(bytes: &[u8], context: &str) -> Result<u32> {
    let version: u32 =
        bincode::deserialize(bytes).map_err(|e| DbTransitError::encoding(context, e))?;
    if version == 0 || version > FORMAT_VERSION {
        return Err(DbTransitError::archive(format!(
            "{}: format version {} is not supported (this build reads up to {})",
            context, version, FORMAT_VERSION
        )));
    }
    Ok(version)
}

/// Decodes an archive file after checking its version.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], context: &str) -> Result<T> {
    check_version(bytes, context)?;
    bincode::deserialize(bytes).map_err(|e| DbTransitError::encoding(context, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnDefinition;

    fn rows(n: i64) -> Vec<RowData> {
        let columns: Arc<[String]> = Arc::from(vec!["id".to_string(), "name".to_string()]);
        (0..n)
            .map(|i| {
                RowData::new(Arc::clone(&columns), vec![RowValue::Int(i), RowValue::from("x")]).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_batch_counts_include_previous_rows() {
        let batch = DataBatchFile::from_rows("dbo.Orders", 3, rows(5), 200, true);
        assert_eq!(batch.total_count, 205);
        assert_eq!(batch.columns, vec!["id", "name"]);
        assert!(batch.is_last_batch);
        assert_eq!(batch.row_count(), 5);
    }

    #[test]
    fn test_batch_rows_share_columns() {
        let batch = DataBatchFile::from_rows("t", 1, rows(3), 0, false);
        let decoded = batch.into_rows().unwrap();
        assert_eq!(decoded.len(), 3);
        assert!(Arc::ptr_eq(decoded[0].columns(), decoded[2].columns()));
        assert_eq!(decoded[1].get("id"), Some(&RowValue::Int(1)));
    }

    #[test]
    fn test_decode_rejects_newer_version() {
        let mut batch = DataBatchFile::from_rows("t", 1, rows(1), 0, true);
        batch.format_version = FORMAT_VERSION + 1;
        let bytes = encode(&batch, "t").unwrap();
        let result: Result<DataBatchFile> = decode(&bytes, "t batch 1");
        assert!(matches!(result, Err(DbTransitError::Archive { .. })));
    }

    #[test]
    fn test_metadata_decodes() {
        let mut table = TableSchema::new("Orders", Some("dbo".to_string()));
        table.columns = vec![ColumnDefinition::new("id", "int", 1).primary_key()];
        table
            .additional_properties
            .insert("CustomFlag".to_string(), "kept".to_string());
        let file = TableMetadataFile::new(DatabaseEngine::SqlServer, table);
        let bytes = encode(&file, "meta").unwrap();
        let decoded: TableMetadataFile = decode(&bytes, "meta").unwrap();
        assert_eq!(decoded, file);
    }

    #[test]
    fn test_decode_truncated_file_fails() {
        let bytes = encode(&DataBatchFile::from_rows("t", 1, rows(2), 0, true), "t").unwrap();
        let result: Result<DataBatchFile> = decode(&bytes[..bytes.len() / 2], "t");
        assert!(matches!(result, Err(DbTransitError::Encoding { .. })));
    }
}
