//! PostgreSQL SQL generation.

use super::{
    DefaultExpr, Dialect, column_kind, format_datetime, format_time, quote_text, scalar_as_text,
};
use crate::models::{ColumnDefinition, DatabaseEngine, TableSchema};
use crate::typemap::{Canonical, postgres::normalize_name};
use crate::validation::{self, escape_string_literal};
use crate::value::RowValue;
use crate::Result;

const MAX_ROWS_PER_INSERT: usize = 1000;
const FRACTION_DIGITS: u32 = 6;

/// Types the row decoder reads natively; everything else is selected as text.
const DECODABLE_TYPES: &[&str] = &[
    "boolean",
    "smallint",
    "integer",
    "bigint",
    "smallserial",
    "serial",
    "bigserial",
    "real",
    "double precision",
    "char",
    "varchar",
    "text",
    "name",
    "bytea",
    "date",
    "time",
    "timestamp",
    "timestamptz",
    "uuid",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

/// PostgreSQL text cannot hold NUL; it is dropped.
fn text_literal(text: &str) -> String {
    if text.contains('\0') {
        quote_text(&text.replace('\0', ""))
    } else {
        quote_text(text)
    }
}

fn is_boolean(kind: Option<&Canonical>) -> bool {
    matches!(kind, Some(Canonical::Bit))
}

impl Dialect for PostgresDialect {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::PostgreSql
    }

    fn quote_identifier(&self, name: &str) -> Result<String> {
        validation::quote_identifier(name, '"', '"')
    }

    fn max_rows_per_insert(&self) -> usize {
        MAX_ROWS_PER_INSERT
    }

    fn identity_clause(&self) -> &'static str {
        "GENERATED BY DEFAULT AS IDENTITY"
    }

    fn render_literal(&self, value: &RowValue, column: Option<&ColumnDefinition>) -> String {
        let kind = column_kind(self.engine(), column);
        if kind.as_ref().is_some_and(Canonical::is_textual) {
            if let Some(text) = scalar_as_text(value) {
                return text_literal(&text);
            }
        }

        match value {
            RowValue::Null => "NULL".to_string(),
            RowValue::Bool(b) if is_boolean(kind.as_ref()) || kind.is_none() => {
                if *b { "TRUE" } else { "FALSE" }.to_string()
            }
            RowValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            RowValue::Int(i) if is_boolean(kind.as_ref()) => {
                if *i != 0 { "TRUE" } else { "FALSE" }.to_string()
            }
            RowValue::Int(i) => i.to_string(),
            RowValue::Float(f) if f.is_nan() => "'NaN'".to_string(),
            RowValue::Float(f) if f.is_infinite() => {
                if *f > 0.0 { "'Infinity'" } else { "'-Infinity'" }.to_string()
            }
            RowValue::Float(f) => format!("{:?}", f),
            RowValue::Decimal(d) => d.to_string(),
            RowValue::Text(s) => text_literal(s),
            RowValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            RowValue::Time(t) => format!("'{}'", format_time(t, FRACTION_DIGITS)),
            RowValue::DateTime(dt) => format!("'{}'", format_datetime(dt, ' ', FRACTION_DIGITS)),
            RowValue::DateTimeOffset(dt) => match kind {
                Some(Canonical::DateTime2 { .. } | Canonical::DateTime | Canonical::SmallDateTime) => {
                    format!("'{}'", format_datetime(&dt.naive_utc(), ' ', FRACTION_DIGITS))
                }
                _ => format!(
                    "'{}{}'",
                    format_datetime(&dt.naive_local(), ' ', FRACTION_DIGITS),
                    dt.format("%:z")
                ),
            },
            RowValue::Bytes(b) => format!("decode('{}', 'hex')", hex::encode(b)),
            RowValue::Uuid(u) => format!("'{}'", u),
        }
    }

    fn select_expression(&self, column: &ColumnDefinition) -> Result<String> {
        let name = self.quote_identifier(&column.name)?;
        let type_name = normalize_name(&column.data_type);
        let expression = match type_name.as_str() {
            t if DECODABLE_TYPES.contains(&t) => name,
            "money" => format!("{}::numeric::text AS {}", name, name),
            "timetz" => format!("{}::time AS {}", name, name),
            _ => format!("{}::text AS {}", name, name),
        };
        Ok(expression)
    }

    fn render_default(&self, default: &DefaultExpr, column: &ColumnDefinition) -> Option<String> {
        let kind = column_kind(self.engine(), Some(column));
        let boolean = is_boolean(kind.as_ref());
        let rendered = match default {
            DefaultExpr::Null => "NULL".to_string(),
            DefaultExpr::Number(n) if boolean => {
                if n.trim_start_matches('-').chars().all(|c| c == '0' || c == '.') {
                    "FALSE".to_string()
                } else {
                    "TRUE".to_string()
                }
            }
            DefaultExpr::Number(n) => n.clone(),
            DefaultExpr::Bool(b) if boolean => if *b { "TRUE" } else { "FALSE" }.to_string(),
            DefaultExpr::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            DefaultExpr::Text(t) => text_literal(t),
            DefaultExpr::CurrentTimestamp => match kind {
                Some(Canonical::Date) => "CURRENT_DATE".to_string(),
                _ => "CURRENT_TIMESTAMP".to_string(),
            },
            DefaultExpr::CurrentDate => "CURRENT_DATE".to_string(),
            DefaultExpr::NewUuid => match kind {
                Some(Canonical::Uuid) => "gen_random_uuid()".to_string(),
                _ => "gen_random_uuid()::text".to_string(),
            },
            DefaultExpr::Raw(_) => return None,
        };
        Some(rendered)
    }

    fn post_load_statements(&self, table: &TableSchema) -> Result<Vec<String>> {
        let target = self.table_name(table)?;
        table
            .ordered_columns()
            .into_iter()
            .filter(|c| c.is_identity)
            .filter(|c| column_kind(self.engine(), Some(c)).is_some_and(|k| k.is_integer()))
            .map(|column| {
                let quoted = self.quote_identifier(&column.name)?;
                Ok(format!(
                    "SELECT setval(pg_get_serial_sequence('{}', '{}'), COALESCE(MAX({}), 1), MAX({}) IS NOT NULL) FROM {}",
                    escape_string_literal(&target),
                    escape_string_literal(&column.name),
                    quoted,
                    quoted,
                    target
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals() {
        let d = PostgresDialect;
        assert_eq!(d.render_literal(&RowValue::Text("a\0b'c".into()), None), "'ab''c'");
        assert_eq!(d.render_literal(&RowValue::Bytes(vec![0xca, 0xfe]), None), "decode('cafe', 'hex')");
        assert_eq!(d.render_literal(&RowValue::Float(f64::NAN), None), "'NaN'");
        assert_eq!(d.render_literal(&RowValue::Float(f64::NEG_INFINITY), None), "'-Infinity'");
        assert_eq!(d.render_literal(&RowValue::Float(1.5), None), "1.5");
        assert_eq!(d.render_literal(&RowValue::Bool(true), None), "TRUE");
    }

    #[test]
    fn test_boolean_coercion_follows_column() {
        let d = PostgresDialect;
        let flag = ColumnDefinition::new("active", "boolean", 1);
        let count = ColumnDefinition::new("count", "integer", 2);
        assert_eq!(d.render_literal(&RowValue::Int(1), Some(&flag)), "TRUE");
        assert_eq!(d.render_literal(&RowValue::Int(0), Some(&flag)), "FALSE");
        assert_eq!(d.render_literal(&RowValue::Bool(true), Some(&count)), "1");
    }

    #[test]
    fn test_select_casts_undecodable_types() {
        let mut table = TableSchema::new("events", Some("public".to_string()));
        table.columns = vec![
            ColumnDefinition::new("id", "bigint", 1).primary_key(),
            ColumnDefinition::new("payload", "jsonb", 2),
            ColumnDefinition::new("during", "tstzrange", 3),
            ColumnDefinition::new("name", "character varying", 4).with_length(20),
        ];
        assert_eq!(
            PostgresDialect.select_sql(&table, None).unwrap(),
            "SELECT \"id\", \"payload\"::text AS \"payload\", \"during\"::text AS \"during\", \"name\" FROM \"public\".\"events\" ORDER BY \"id\""
        );
    }

    #[test]
    fn test_sequence_reset_for_identity_columns() {
        let mut table = TableSchema::new("Orders", Some("public".to_string()));
        table.columns = vec![
            ColumnDefinition::new("id", "integer", 1).primary_key().identity(),
            ColumnDefinition::new("note", "text", 2),
        ];
        let statements = PostgresDialect.post_load_statements(&table).unwrap();
        assert_eq!(
            statements,
            vec![
                "SELECT setval(pg_get_serial_sequence('\"public\".\"Orders\"', 'id'), COALESCE(MAX(\"id\"), 1), MAX(\"id\") IS NOT NULL) FROM \"public\".\"Orders\"".to_string()
            ]
        );
    }

    #[test]
    fn test_create_table_identity() {
        let mut table = TableSchema::new("t", Some("public".to_string()));
        table.columns = vec![
            ColumnDefinition::new("id", "integer", 1).primary_key().identity(),
            ColumnDefinition::new("active", "boolean", 2).with_default("TRUE").not_null(),
        ];
        assert_eq!(
            PostgresDialect.create_table_sql(&table).unwrap(),
            "CREATE TABLE \"public\".\"t\" (\n    \"id\" integer GENERATED BY DEFAULT AS IDENTITY NOT NULL,\n    \"active\" boolean DEFAULT TRUE NOT NULL,\n    CONSTRAINT \"PK_t\" PRIMARY KEY (\"id\")\n)"
        );
    }

    #[test]
    fn test_defaults_from_sqlserver() {
        let flag = ColumnDefinition::new("active", "boolean", 1);
        assert_eq!(
            PostgresDialect.translate_default("((0))", DatabaseEngine::SqlServer, &flag),
            Some("FALSE".to_string())
        );
        let key = ColumnDefinition::new("key", "uuid", 2);
        assert_eq!(
            PostgresDialect.translate_default("(newid())", DatabaseEngine::SqlServer, &key),
            Some("gen_random_uuid()".to_string())
        );
    }
}
