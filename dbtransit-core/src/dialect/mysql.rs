//! MySQL SQL generation. Schemas are databases.

use super::{
    DefaultExpr, Dialect, column_kind, format_datetime, format_float, format_time, scalar_as_text,
};
use crate::models::{
    ColumnDefinition, DatabaseEngine, IndexDefinition, ReferentialRule, TableSchema,
};
use crate::typemap::Canonical;
use crate::validation;
use crate::value::RowValue;
use crate::Result;

const MAX_ROWS_PER_INSERT: usize = 1000;
const FRACTION_DIGITS: u32 = 6;
/// Key prefix for TEXT/BLOB and very wide VARCHAR index columns.
const INDEX_PREFIX_CHARS: u32 = 255;
/// Widest VARCHAR indexable in full under the 3072-byte InnoDB key limit.
const MAX_INDEXABLE_CHARS: i32 = 768;

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

/// Single-quoted literal with backslash, quote and NUL escaped.
fn string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("''"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Types that cannot carry a literal default or a full-length index.
fn is_lob(column: &ColumnDefinition) -> bool {
    let name = column.data_type.to_ascii_lowercase();
    name.ends_with("text") || name.ends_with("blob") || name == "json"
}

fn index_prefix(column: Option<&ColumnDefinition>) -> Option<u32> {
    let column = column?;
    if is_lob(column) {
        return Some(INDEX_PREFIX_CHARS);
    }
    let name = column.data_type.to_ascii_lowercase();
    let wide = matches!(name.as_str(), "varchar" | "varbinary")
        && column.max_length.is_some_and(|n| n > MAX_INDEXABLE_CHARS);
    wide.then_some(INDEX_PREFIX_CHARS)
}

impl Dialect for MySqlDialect {
    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::MySql
    }

    fn quote_identifier(&self, name: &str) -> Result<String> {
        validation::quote_identifier(name, '`', '`')
    }

    fn max_rows_per_insert(&self) -> usize {
        MAX_ROWS_PER_INSERT
    }

    fn identity_clause(&self) -> &'static str {
        "AUTO_INCREMENT"
    }

    fn create_index_sql(&self, table: &TableSchema, index: &IndexDefinition) -> Result<String> {
        let columns = index
            .columns
            .iter()
            .map(|name| {
                let quoted = self.quote_identifier(name)?;
                Ok(match index_prefix(table.column(name)) {
                    Some(prefix) => format!("{}({})", quoted, prefix),
                    None => quoted,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.is_unique { "UNIQUE " } else { "" },
            self.quote_identifier(&index.name)?,
            self.table_name(table)?,
            columns.join(", ")
        ))
    }

    fn referential_action(&self, rule: ReferentialRule) -> &'static str {
        match rule {
            ReferentialRule::SetDefault => ReferentialRule::NoAction.as_sql(),
            other => other.as_sql(),
        }
    }

    fn render_literal(&self, value: &RowValue, column: Option<&ColumnDefinition>) -> String {
        let kind = column_kind(self.engine(), column);
        if kind.as_ref().is_some_and(Canonical::is_textual) {
            if let Some(text) = scalar_as_text(value) {
                return string_literal(&text);
            }
        }

        match value {
            RowValue::Null => "NULL".to_string(),
            RowValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            RowValue::Int(i) => i.to_string(),
            RowValue::Float(f) => format_float(*f).unwrap_or_else(|| "NULL".to_string()),
            RowValue::Decimal(d) => d.to_string(),
            RowValue::Text(s) => string_literal(s),
            RowValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            RowValue::Time(t) => format!("'{}'", format_time(t, FRACTION_DIGITS)),
            RowValue::DateTime(dt) => format!("'{}'", format_datetime(dt, ' ', FRACTION_DIGITS)),
            RowValue::DateTimeOffset(dt) => format!(
                "'{}'",
                format_datetime(&dt.naive_utc(), ' ', FRACTION_DIGITS)
            ),
            RowValue::Bytes(b) => format!("X'{}'", hex::encode_upper(b)),
            RowValue::Uuid(u) => format!("'{}'", u),
        }
    }

    fn select_expression(&self, column: &ColumnDefinition) -> Result<String> {
        let name = self.quote_identifier(&column.name)?;
        let expression = match column.data_type.to_ascii_lowercase().as_str() {
            "json" | "enum" | "set" | "decimal" | "numeric" | "year" => {
                format!("CAST({} AS CHAR) AS {}", name, name)
            }
            "bit" => format!("CAST({} AS UNSIGNED) AS {}", name, name),
            "geometry" | "point" | "linestring" | "polygon" | "multipoint" | "multilinestring"
            | "multipolygon" | "geometrycollection" => {
                format!("ST_AsText({}) AS {}", name, name)
            }
            _ => name,
        };
        Ok(expression)
    }

    fn render_default(&self, default: &DefaultExpr, column: &ColumnDefinition) -> Option<String> {
        let kind = column_kind(self.engine(), Some(column));
        let rendered = match default {
            DefaultExpr::Null => "NULL".to_string(),
            DefaultExpr::Number(n) => n.clone(),
            DefaultExpr::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            DefaultExpr::Text(t) if is_lob(column) => format!("({})", string_literal(t)),
            DefaultExpr::Text(t) => string_literal(t),
            DefaultExpr::CurrentTimestamp => match kind {
                Some(Canonical::DateTime2 { .. }) => match column.precision {
                    Some(p) if p > 0 => format!("CURRENT_TIMESTAMP({})", p.min(6)),
                    _ => "CURRENT_TIMESTAMP".to_string(),
                },
                Some(Canonical::Date) => "(CURRENT_DATE)".to_string(),
                _ => return None,
            },
            DefaultExpr::CurrentDate => "(CURRENT_DATE)".to_string(),
            DefaultExpr::NewUuid => "(UUID())".to_string(),
            DefaultExpr::Raw(_) => return None,
        };
        Some(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, TimeZone};

    #[test]
    fn test_string_escaping() {
        let d = MySqlDialect;
        assert_eq!(
            d.render_literal(&RowValue::Text("a\\b'c\0".into()), None),
            "'a\\\\b''c\\0'"
        );
        assert_eq!(d.render_literal(&RowValue::Bytes(vec![1, 255]), None), "X'01FF'");
    }

    #[test]
    fn test_offset_values_normalize_to_utc() {
        let dt = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_micro_opt(2, 0, 0, 500)
            .unwrap();
        let dto = FixedOffset::east_opt(3 * 3600)
            .unwrap()
            .from_local_datetime(&dt)
            .unwrap();
        assert_eq!(
            MySqlDialect.render_literal(&RowValue::DateTimeOffset(dto), None),
            "'2023-12-31 23:00:00.000500'"
        );
    }

    #[test]
    fn test_qualified_name_uses_database() {
        assert_eq!(
            MySqlDialect.qualified_name(Some("shop"), "orders").unwrap(),
            "`shop`.`orders`"
        );
    }

    #[test]
    fn test_text_index_gets_prefix() {
        let mut table = TableSchema::new("docs", Some("shop".to_string()));
        table.columns = vec![
            ColumnDefinition::new("id", "INT", 1).primary_key(),
            ColumnDefinition::new("body", "LONGTEXT", 2),
        ];
        let index = IndexDefinition {
            name: "ix_body".to_string(),
            is_unique: false,
            is_clustered: false,
            is_primary_key: false,
            columns: vec!["body".to_string()],
        };
        assert_eq!(
            MySqlDialect.create_index_sql(&table, &index).unwrap(),
            "CREATE INDEX `ix_body` ON `shop`.`docs` (`body`(255))"
        );
    }

    #[test]
    fn test_set_default_becomes_no_action() {
        assert_eq!(MySqlDialect.referential_action(ReferentialRule::SetDefault), "NO ACTION");
        assert_eq!(MySqlDialect.referential_action(ReferentialRule::Cascade), "CASCADE");
    }

    #[test]
    fn test_defaults_from_sqlserver() {
        let created = ColumnDefinition::new("created", "DATETIME", 1).with_precision(6, 0);
        assert_eq!(
            MySqlDialect.translate_default("(getdate())", DatabaseEngine::SqlServer, &created),
            Some("CURRENT_TIMESTAMP(6)".to_string())
        );
        let flag = ColumnDefinition::new("active", "TINYINT", 2).with_length(1);
        assert_eq!(
            MySqlDialect.translate_default("((1))", DatabaseEngine::SqlServer, &flag),
            Some("1".to_string())
        );
        let note = ColumnDefinition::new("note", "LONGTEXT", 3);
        assert_eq!(
            MySqlDialect.translate_default("(N'n/a')", DatabaseEngine::SqlServer, &note),
            Some("('n/a')".to_string())
        );
    }
}
