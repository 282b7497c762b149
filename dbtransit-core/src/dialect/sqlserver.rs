//! T-SQL generation.

use super::{
    DefaultExpr, Dialect, column_kind, format_datetime, format_float, format_time, quote_text,
    scalar_as_text,
};
use crate::models::{ColumnDefinition, DatabaseEngine, IndexDefinition, TableSchema};
use crate::typemap::Canonical;
use crate::validation::{self, escape_string_literal};
use crate::value::RowValue;
use crate::Result;

/// SQL Server caps a table value constructor at 1000 rows.
const MAX_ROWS_PER_INSERT: usize = 1000;
const FRACTION_DIGITS: u32 = 7;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

fn unicode_literal(text: &str) -> String {
    format!("N'{}'", escape_string_literal(text))
}

fn cast(text: &str, sql_type: &str) -> String {
    format!("CAST({} AS {})", unicode_literal(text), sql_type)
}

impl Dialect for SqlServerDialect {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::SqlServer
    }

    fn quote_identifier(&self, name: &str) -> Result<String> {
        validation::quote_identifier(name, '[', ']')
    }

    fn max_rows_per_insert(&self) -> usize {
        MAX_ROWS_PER_INSERT
    }

    fn identity_clause(&self) -> &'static str {
        "IDENTITY(1,1)"
    }

    fn primary_key_clause(&self, table: &TableSchema, name: &str, columns: &[String]) -> Result<String> {
        let pk_index = table.indexes.iter().find(|i| i.is_primary_key);
        let other_clustered = table
            .indexes
            .iter()
            .any(|i| i.is_clustered && !i.is_primary_key);
        let clustered = match pk_index {
            Some(index) => index.is_clustered,
            None => !other_clustered,
        };
        Ok(format!(
            "CONSTRAINT {} PRIMARY KEY {} ({})",
            self.quote_identifier(name)?,
            if clustered { "CLUSTERED" } else { "NONCLUSTERED" },
            self.column_list(columns)?
        ))
    }

    fn create_index_sql(&self, table: &TableSchema, index: &IndexDefinition) -> Result<String> {
        Ok(format!(
            "CREATE {}{} INDEX {} ON {} ({})",
            if index.is_unique { "UNIQUE " } else { "" },
            if index.is_clustered { "CLUSTERED" } else { "NONCLUSTERED" },
            self.quote_identifier(&index.name)?,
            self.table_name(table)?,
            self.column_list(&index.columns)?
        ))
    }

    fn insert_prologue(&self, table: &TableSchema) -> Result<Vec<String>> {
        if table.has_identity() {
            Ok(vec![format!("SET IDENTITY_INSERT {} ON", self.table_name(table)?)])
        } else {
            Ok(Vec::new())
        }
    }

    fn insert_epilogue(&self, table: &TableSchema) -> Result<Vec<String>> {
        if table.has_identity() {
            Ok(vec![format!("SET IDENTITY_INSERT {} OFF", self.table_name(table)?)])
        } else {
            Ok(Vec::new())
        }
    }

    fn render_literal(&self, value: &RowValue, column: Option<&ColumnDefinition>) -> String {
        let kind = column_kind(self.engine(), column);
        if kind.as_ref().is_some_and(Canonical::is_textual) {
            if let Some(text) = scalar_as_text(value) {
                return unicode_literal(&text);
            }
        }

        match value {
            RowValue::Null => "NULL".to_string(),
            RowValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            RowValue::Int(i) => i.to_string(),
            RowValue::Float(f) => format_float(*f).unwrap_or_else(|| "NULL".to_string()),
            RowValue::Decimal(d) => d.to_string(),
            RowValue::Text(s) => unicode_literal(s),
            RowValue::Date(d) => cast(&d.format("%Y-%m-%d").to_string(), "DATE"),
            RowValue::Time(t) => cast(&format_time(t, FRACTION_DIGITS), "TIME(7)"),
            RowValue::DateTime(dt) => {
                cast(&format_datetime(dt, 'T', FRACTION_DIGITS), "DATETIME2(7)")
            }
            RowValue::DateTimeOffset(dt) => {
                let text = format!(
                    "{}{}",
                    format_datetime(&dt.naive_local(), 'T', FRACTION_DIGITS),
                    dt.format("%:z")
                );
                cast(&text, "DATETIMEOFFSET(7)")
            }
            RowValue::Bytes(b) => format!("0x{}", hex::encode_upper(b)),
            RowValue::Uuid(u) => quote_text(&u.to_string()),
        }
    }

    fn select_expression(&self, column: &ColumnDefinition) -> Result<String> {
        let name = self.quote_identifier(&column.name)?;
        let expression = match column.data_type.to_ascii_lowercase().as_str() {
            "xml" => format!("CAST({} AS NVARCHAR(MAX)) AS {}", name, name),
            "hierarchyid" | "geography" | "geometry" => format!("{}.ToString() AS {}", name, name),
            "sql_variant" => format!("CAST({} AS NVARCHAR(4000)) AS {}", name, name),
            "money" | "smallmoney" => format!("CAST({} AS DECIMAL(19, 4)) AS {}", name, name),
            _ => name,
        };
        Ok(expression)
    }

    fn render_default(&self, default: &DefaultExpr, column: &ColumnDefinition) -> Option<String> {
        let kind = column_kind(self.engine(), Some(column));
        let rendered = match default {
            DefaultExpr::Null => "NULL".to_string(),
            DefaultExpr::Number(n) => n.clone(),
            DefaultExpr::Text(t) => unicode_literal(t),
            DefaultExpr::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            DefaultExpr::CurrentTimestamp => match kind {
                Some(Canonical::DateTimeOffset { .. }) => "SYSDATETIMEOFFSET()".to_string(),
                _ => "SYSDATETIME()".to_string(),
            },
            DefaultExpr::CurrentDate => "CAST(GETDATE() AS DATE)".to_string(),
            DefaultExpr::NewUuid => "NEWID()".to_string(),
            DefaultExpr::Raw(_) => return None,
        };
        Some(format!("({})", rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnDefinition;
    use chrono::{FixedOffset, NaiveDate, TimeZone};

    #[test]
    fn test_quote_identifier_doubles_bracket() {
        assert_eq!(SqlServerDialect.quote_identifier("Order Details").unwrap(), "[Order Details]");
        assert_eq!(SqlServerDialect.quote_identifier("a]b").unwrap(), "[a]]b]");
        assert!(SqlServerDialect.quote_identifier("").is_err());
    }

    #[test]
    fn test_literals() {
        let d = SqlServerDialect;
        assert_eq!(d.render_literal(&RowValue::Text("O'Brien".into()), None), "N'O''Brien'");
        assert_eq!(d.render_literal(&RowValue::Bytes(vec![0xde, 0xad]), None), "0xDEAD");
        assert_eq!(d.render_literal(&RowValue::Bool(true), None), "1");
        assert_eq!(d.render_literal(&RowValue::Float(f64::NAN), None), "NULL");

        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_nano_opt(13, 5, 9, 123_456_789)
            .unwrap();
        assert_eq!(
            d.render_literal(&RowValue::DateTime(dt), None),
            "CAST(N'2024-02-29T13:05:09.1234567' AS DATETIME2(7))"
        );

        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let dto = offset.from_local_datetime(&dt).unwrap();
        assert_eq!(
            d.render_literal(&RowValue::DateTimeOffset(dto), None),
            "CAST(N'2024-02-29T13:05:09.1234567+02:00' AS DATETIMEOFFSET(7))"
        );
    }

    #[test]
    fn test_numbers_into_string_columns_are_quoted() {
        let column = ColumnDefinition::new("code", "nvarchar", 1).with_length(10);
        assert_eq!(
            SqlServerDialect.render_literal(&RowValue::Int(42), Some(&column)),
            "N'42'"
        );
    }

    #[test]
    fn test_identity_insert_wrapping() {
        let mut table = TableSchema::new("Orders", Some("dbo".to_string()));
        table.columns = vec![ColumnDefinition::new("id", "int", 1).primary_key().identity()];
        assert_eq!(
            SqlServerDialect.insert_prologue(&table).unwrap(),
            vec!["SET IDENTITY_INSERT [dbo].[Orders] ON".to_string()]
        );
        assert_eq!(
            SqlServerDialect.insert_epilogue(&table).unwrap(),
            vec!["SET IDENTITY_INSERT [dbo].[Orders] OFF".to_string()]
        );
    }

    #[test]
    fn test_create_table() {
        let mut table = TableSchema::new("Orders", Some("dbo".to_string()));
        table.columns = vec![
            ColumnDefinition::new("id", "int", 1).primary_key().identity(),
            ColumnDefinition::new("total", "decimal", 2)
                .with_precision(12, 2)
                .with_default("((0))"),
            ColumnDefinition::new("note", "nvarchar", 3).with_length(-1),
        ];
        let sql = SqlServerDialect.create_table_sql(&table).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE [dbo].[Orders] (\n    [id] int IDENTITY(1,1) NOT NULL,\n    [total] decimal(12,2) DEFAULT ((0)),\n    [note] nvarchar(max),\n    CONSTRAINT [PK_Orders] PRIMARY KEY CLUSTERED ([id])\n)"
        );
    }

    #[test]
    fn test_select_casts_clr_types() {
        let mut table = TableSchema::new("Places", Some("dbo".to_string()));
        table.columns = vec![
            ColumnDefinition::new("id", "int", 1).primary_key(),
            ColumnDefinition::new("shape", "geography", 2),
            ColumnDefinition::new("doc", "xml", 3),
        ];
        let sql = SqlServerDialect.select_sql(&table, None).unwrap();
        assert_eq!(
            sql,
            "SELECT [id], [shape].ToString() AS [shape], CAST([doc] AS NVARCHAR(MAX)) AS [doc] FROM [dbo].[Places] ORDER BY [id]"
        );
    }

    #[test]
    fn test_translate_default_from_postgres() {
        let column = ColumnDefinition::new("created", "datetime2", 1).with_precision(6, 6);
        assert_eq!(
            SqlServerDialect.translate_default("now()", DatabaseEngine::PostgreSql, &column),
            Some("(SYSDATETIME())".to_string())
        );
        assert_eq!(
            SqlServerDialect.translate_default("nextval('s'::regclass)", DatabaseEngine::PostgreSql, &column),
            None
        );
    }
}
