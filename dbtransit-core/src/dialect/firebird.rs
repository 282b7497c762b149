//! Firebird SQL generation. Firebird has no schemas and inserts one row per
//! statement.

use super::{
    DefaultExpr, Dialect, column_kind, format_datetime, format_float, format_time, quote_text,
    scalar_as_text,
};
use crate::models::{ColumnDefinition, DatabaseEngine, TableSchema};
use crate::typemap::{Canonical, firebird::MAX_FRACTION};
use crate::validation::{self, escape_string_literal};
use crate::value::RowValue;
use crate::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct FirebirdDialect;

impl Dialect for FirebirdDialect {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Firebird
    }

    fn quote_identifier(&self, name: &str) -> Result<String> {
        validation::quote_identifier(name, '"', '"')
    }

    fn qualified_name(&self, _schema: Option<&str>, name: &str) -> Result<String> {
        self.quote_identifier(name)
    }

    fn max_rows_per_insert(&self) -> usize {
        1
    }

    fn identity_clause(&self) -> &'static str {
        "GENERATED BY DEFAULT AS IDENTITY"
    }

    fn render_literal(&self, value: &RowValue, column: Option<&ColumnDefinition>) -> String {
        let kind = column_kind(self.engine(), column);
        if kind.as_ref().is_some_and(Canonical::is_textual) {
            if let Some(text) = scalar_as_text(value) {
                return quote_text(&text);
            }
        }
        let boolean = matches!(kind, Some(Canonical::Bit));

        match value {
            RowValue::Null => "NULL".to_string(),
            RowValue::Bool(b) if boolean => if *b { "TRUE" } else { "FALSE" }.to_string(),
            RowValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            RowValue::Int(i) if boolean => if *i != 0 { "TRUE" } else { "FALSE" }.to_string(),
            RowValue::Int(i) => i.to_string(),
            RowValue::Float(f) => format_float(*f).unwrap_or_else(|| "NULL".to_string()),
            RowValue::Decimal(d) => d.to_string(),
            RowValue::Text(s) => quote_text(s),
            RowValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            RowValue::Time(t) => format!("'{}'", format_time(t, MAX_FRACTION)),
            RowValue::DateTime(dt) => format!("'{}'", format_datetime(dt, ' ', MAX_FRACTION)),
            RowValue::DateTimeOffset(dt) => {
                format!("'{}'", format_datetime(&dt.naive_utc(), ' ', MAX_FRACTION))
            }
            RowValue::Bytes(b) => format!("x'{}'", hex::encode_upper(b)),
            RowValue::Uuid(u) => format!("'{}'", u),
        }
    }

    fn render_default(&self, default: &DefaultExpr, column: &ColumnDefinition) -> Option<String> {
        let kind = column_kind(self.engine(), Some(column));
        let boolean = matches!(kind, Some(Canonical::Bit));
        let rendered = match default {
            DefaultExpr::Null => "NULL".to_string(),
            DefaultExpr::Number(n) => n.clone(),
            DefaultExpr::Bool(b) if boolean => if *b { "TRUE" } else { "FALSE" }.to_string(),
            DefaultExpr::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            DefaultExpr::Text(t) => quote_text(t),
            DefaultExpr::CurrentTimestamp => match kind {
                Some(Canonical::Date) => "CURRENT_DATE".to_string(),
                _ => "CURRENT_TIMESTAMP".to_string(),
            },
            DefaultExpr::CurrentDate => "CURRENT_DATE".to_string(),
            DefaultExpr::NewUuid | DefaultExpr::Raw(_) => return None,
        };
        Some(rendered)
    }

    /// Restarts identity generators past the loaded keys.
    fn post_load_statements(&self, table: &TableSchema) -> Result<Vec<String>> {
        let target = self.table_name(table)?;
        table
            .ordered_columns()
            .into_iter()
            .filter(|c| c.is_identity)
            .filter(|c| column_kind(self.engine(), Some(c)).is_some_and(|k| k.is_integer()))
            .map(|column| {
                let quoted = self.quote_identifier(&column.name)?;
                let alter = escape_string_literal(&format!(
                    "ALTER TABLE {} ALTER COLUMN {} RESTART WITH ",
                    target, quoted
                ));
                Ok(format!(
                    "EXECUTE BLOCK AS DECLARE m BIGINT; BEGIN SELECT COALESCE(MAX({}), 0) FROM {} INTO :m; EXECUTE STATEMENT '{}' || (m + 1); END",
                    quoted, target, alter
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::RowData;
    use chrono::NaiveDate;
    use std::sync::Arc;

    #[test]
    fn test_schema_is_ignored() {
        assert_eq!(
            FirebirdDialect.qualified_name(Some("public"), "ORDERS").unwrap(),
            "\"ORDERS\""
        );
    }

    #[test]
    fn test_timestamp_truncated_to_four_digits() {
        let dt = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_nano_opt(7, 8, 9, 987_654_321)
            .unwrap();
        assert_eq!(
            FirebirdDialect.render_literal(&RowValue::DateTime(dt), None),
            "'2024-05-06 07:08:09.9876'"
        );
    }

    #[test]
    fn test_boolean_rendering_follows_column() {
        let d = FirebirdDialect;
        let flag = ColumnDefinition::new("ACTIVE", "BOOLEAN", 1);
        let small = ColumnDefinition::new("ACTIVE", "SMALLINT", 1);
        assert_eq!(d.render_literal(&RowValue::Bool(true), Some(&flag)), "TRUE");
        assert_eq!(d.render_literal(&RowValue::Bool(true), Some(&small)), "1");
        assert_eq!(d.render_literal(&RowValue::Bytes(vec![0xab]), None), "x'AB'");
    }

    #[test]
    fn test_one_row_per_insert() {
        let mut table = TableSchema::new("T", None);
        table.columns = vec![
            ColumnDefinition::new("ID", "INTEGER", 1),
            ColumnDefinition::new("NAME", "VARCHAR", 2).with_length(10),
        ];
        let columns: Arc<[String]> = Arc::from(vec!["ID".to_string(), "NAME".to_string()]);
        let rows = vec![
            RowData::new(columns.clone(), vec![RowValue::Int(1), RowValue::from("a")]).unwrap(),
            RowData::new(columns, vec![RowValue::Int(2), RowValue::Null]).unwrap(),
        ];
        assert_eq!(
            FirebirdDialect.insert_statements(&table, &rows).unwrap(),
            vec![
                "INSERT INTO \"T\" (\"ID\", \"NAME\") VALUES (1, 'a')".to_string(),
                "INSERT INTO \"T\" (\"ID\", \"NAME\") VALUES (2, NULL)".to_string(),
            ]
        );
    }

    #[test]
    fn test_identity_restart_block() {
        let mut table = TableSchema::new("T", None);
        table.columns = vec![ColumnDefinition::new("ID", "INTEGER", 1).primary_key().identity()];
        let statements = FirebirdDialect.post_load_statements(&table).unwrap();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("RESTART WITH ' || (m + 1)"));
        assert!(statements[0].contains("MAX(\"ID\")"));
    }
}
