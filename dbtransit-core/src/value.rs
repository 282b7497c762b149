//! Row values moved between providers and the archive.
//!
//! [`RowValue`] is a closed sum type: every decoder (one per engine) and
//! every literal renderer matches over it exhaustively. [`RowData`] is an
//! ordered column-name to value map whose column list is shared by every row
//! of one stream.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A single loosely-typed column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact numeric. Serialized as its decimal text so no precision is lost
    /// in non-self-describing formats.
    Decimal(#[serde(with = "decimal_text")] Decimal),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Bytes(Vec<u8>),
    Uuid(Uuid),
}

impl RowValue {
    /// Whether this is SQL `NULL`.
    pub fn is_null(&self) -> bool {
        matches!(self, RowValue::Null)
    }

    /// Short type label used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            RowValue::Null => "null",
            RowValue::Bool(_) => "bool",
            RowValue::Int(_) => "int",
            RowValue::Float(_) => "float",
            RowValue::Decimal(_) => "decimal",
            RowValue::Text(_) => "text",
            RowValue::Date(_) => "date",
            RowValue::Time(_) => "time",
            RowValue::DateTime(_) => "datetime",
            RowValue::DateTimeOffset(_) => "datetimeoffset",
            RowValue::Bytes(_) => "bytes",
            RowValue::Uuid(_) => "uuid",
        }
    }

    /// Rough in-memory payload size, used for byte progress reporting.
    pub fn approximate_size(&self) -> usize {
        match self {
            RowValue::Null => 1,
            RowValue::Bool(_) => 1,
            RowValue::Int(_) | RowValue::Float(_) => 8,
            RowValue::Decimal(_) => 16,
            RowValue::Text(s) => s.len(),
            RowValue::Date(_) => 4,
            RowValue::Time(_) => 8,
            RowValue::DateTime(_) => 12,
            RowValue::DateTimeOffset(_) => 14,
            RowValue::Bytes(b) => b.len(),
            RowValue::Uuid(_) => 16,
        }
    }
}

impl From<i64> for RowValue {
    fn from(v: i64) -> Self {
        RowValue::Int(v)
    }
}

impl From<i32> for RowValue {
    fn from(v: i32) -> Self {
        RowValue::Int(i64::from(v))
    }
}

impl From<bool> for RowValue {
    fn from(v: bool) -> Self {
        RowValue::Bool(v)
    }
}

impl From<&str> for RowValue {
    fn from(v: &str) -> Self {
        RowValue::Text(v.to_string())
    }
}

impl From<String> for RowValue {
    fn from(v: String) -> Self {
        RowValue::Text(v)
    }
}

impl From<Decimal> for RowValue {
    fn from(v: Decimal) -> Self {
        RowValue::Decimal(v)
    }
}

impl<T: Into<RowValue>> From<Option<T>> for RowValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(RowValue::Null, Into::into)
    }
}

/// One row: values positionally paired with a shared column list.
#[derive(Debug, Clone, PartialEq)]
pub struct RowData {
    columns: Arc<[String]>,
    values: Vec<RowValue>,
}

impl RowData {
    /// Creates a row.
    ///
    /// # Errors
    /// Returns a query error when the value count does not match the column count.
    pub fn new(columns: Arc<[String]>, values: Vec<RowValue>) -> crate::Result<Self> {
        if columns.len() != values.len() {
            return Err(crate::error::DbTransitError::query_failed(format!(
                "row has {} values for {} columns",
                values.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, values })
    }

    /// Column names in order.
    pub fn columns(&self) -> &Arc<[String]> {
        &self.columns
    }

    /// Values in column order.
    pub fn values(&self) -> &[RowValue] {
        &self.values
    }

    /// Consumes the row, returning its values.
    pub fn into_values(self) -> Vec<RowValue> {
        self.values
    }

    /// Value for a column name (case-insensitive).
    pub fn get(&self, column: &str) -> Option<&RowValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values.get(idx))
    }

    /// Iterates `(column, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Approximate payload size of the row.
    pub fn approximate_size(&self) -> usize {
        self.values.iter().map(RowValue::approximate_size).sum()
    }
}

/// Serializes [`Decimal`] through its canonical string form.
mod decimal_text {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub(super) fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let text = String::deserialize(deserializer)?;
        Decimal::from_str(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn columns() -> Arc<[String]> {
        Arc::from(vec!["id".to_string(), "Name".to_string()])
    }

    #[test]
    fn test_row_data_lookup_is_case_insensitive() {
        let row = RowData::new(columns(), vec![RowValue::Int(7), RowValue::from("Ada")]).unwrap();
        assert_eq!(row.get("name"), Some(&RowValue::Text("Ada".to_string())));
        assert_eq!(row.get("ID"), Some(&RowValue::Int(7)));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_row_data_rejects_mismatched_lengths() {
        let result = RowData::new(columns(), vec![RowValue::Int(1)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_decimal_survives_bincode_exactly() {
        let value = RowValue::Decimal(Decimal::from_str("12345678901234567890.123456789").unwrap());
        let bytes = bincode::serialize(&value).unwrap();
        let decoded: RowValue = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(RowValue::from(None::<i64>), RowValue::Null);
        assert_eq!(RowValue::from(Some(3_i64)), RowValue::Int(3));
        assert!(RowValue::Null.is_null());
        assert_eq!(RowValue::Bytes(vec![1, 2, 3]).approximate_size(), 3);
    }
}
