//! SQL generation per engine.
//!
//! A [`Dialect`] is the pure half of a provider: identifier quoting, DDL,
//! batched `INSERT` text, literal rendering and `SELECT` generation. Nothing
//! here touches a connection, so every script can be generated and tested
//! offline. Providers delegate their DDL and script operations to their
//! dialect through default trait methods.

pub mod firebird;
pub mod mysql;
pub mod postgres;
pub mod sqlserver;

pub use firebird::FirebirdDialect;
pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlserver::SqlServerDialect;

use crate::error::DbTransitError;
use crate::models::{
    ColumnDefinition, ConstraintDefinition, ConstraintType, DatabaseEngine, ForeignKeyDefinition,
    IndexDefinition, ReferentialRule, TableSchema,
};
use crate::typemap::{self, Canonical};
use crate::validation::{self, validate_sql_fragment};
use crate::value::{RowData, RowValue};
use crate::Result;
use chrono::Timelike;

/// Engine-specific SQL syntax.
pub trait Dialect: Send + Sync + std::fmt::Debug {
    /// Engine this dialect generates SQL for.
    fn engine(&self) -> DatabaseEngine;

    /// Quotes a single identifier, doubling embedded quote characters.
    ///
    /// # Errors
    /// Returns a configuration error for empty, oversized or NUL-bearing names.
    fn quote_identifier(&self, name: &str) -> Result<String>;

    /// `schema.name` with both parts quoted.
    fn qualified_name(&self, schema: Option<&str>, name: &str) -> Result<String> {
        match schema {
            Some(schema) if !schema.is_empty() => Ok(format!(
                "{}.{}",
                self.quote_identifier(schema)?,
                self.quote_identifier(name)?
            )),
            _ => self.quote_identifier(name),
        }
    }

    /// Quoted, qualified name of a table.
    fn table_name(&self, table: &TableSchema) -> Result<String> {
        self.qualified_name(table.schema.as_deref(), &table.name)
    }

    /// Rows per `INSERT ... VALUES` statement.
    fn max_rows_per_insert(&self) -> usize;

    /// Renders a column's type. Columns are expected in this engine's
    /// vocabulary; see [`adapt_table`].
    fn render_type(&self, column: &ColumnDefinition) -> String {
        typemap::map_type(
            self.engine(),
            self.engine(),
            &column.data_type,
            column.max_length,
            column.precision,
            column.scale,
        )
        .spec
        .render()
    }

    /// Identity/auto-increment clause for integer identity columns.
    fn identity_clause(&self) -> &'static str;

    /// One column of a `CREATE TABLE` body.
    fn column_definition(&self, column: &ColumnDefinition) -> Result<String> {
        let mut sql = format!(
            "{} {}",
            self.quote_identifier(&column.name)?,
            self.render_type(column)
        );
        let integer = column_kind(self.engine(), Some(column)).is_some_and(|k| k.is_integer());
        if column.is_identity && integer {
            sql.push(' ');
            sql.push_str(self.identity_clause());
        } else if let Some(default) = &column.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        if !column.is_nullable || column.is_primary_key {
            sql.push_str(" NOT NULL");
        }
        Ok(sql)
    }

    /// `CONSTRAINT name PRIMARY KEY (cols)` clause inside `CREATE TABLE`.
    fn primary_key_clause(&self, table: &TableSchema, name: &str, columns: &[String]) -> Result<String> {
        let _ = table;
        Ok(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            self.quote_identifier(name)?,
            self.column_list(columns)?
        ))
    }

    /// Full `CREATE TABLE` statement including the primary key.
    fn create_table_sql(&self, table: &TableSchema) -> Result<String> {
        table.validate()?;
        let mut parts = table
            .ordered_columns()
            .into_iter()
            .map(|c| self.column_definition(c))
            .collect::<Result<Vec<_>>>()?;

        let pk_columns = table.primary_key_columns();
        if !pk_columns.is_empty() {
            parts.push(self.primary_key_clause(table, &primary_key_name(table), &pk_columns)?);
        }

        Ok(format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.table_name(table)?,
            parts.join(",\n    ")
        ))
    }

    /// `CREATE INDEX` for a secondary index.
    fn create_index_sql(&self, table: &TableSchema, index: &IndexDefinition) -> Result<String> {
        Ok(format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.is_unique { "UNIQUE " } else { "" },
            self.quote_identifier(&index.name)?,
            self.table_name(table)?,
            self.column_list(&index.columns)?
        ))
    }

    /// `ALTER TABLE ... ADD CONSTRAINT` for unique and check constraints.
    /// Primary keys are part of `CREATE TABLE` and yield `None`.
    fn constraint_sql(
        &self,
        table: &TableSchema,
        constraint: &ConstraintDefinition,
    ) -> Result<Option<String>> {
        let body = match constraint.constraint_type {
            ConstraintType::PrimaryKey => return Ok(None),
            ConstraintType::Unique => format!("UNIQUE ({})", self.column_list(&constraint.columns)?),
            ConstraintType::Check => {
                let Some(definition) = constraint.definition.as_deref() else {
                    return Ok(None);
                };
                let definition = strip_check_keyword(definition);
                validate_sql_fragment(definition, "CHECK constraint")?;
                format!("CHECK ({})", definition)
            }
        };
        Ok(Some(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}",
            self.table_name(table)?,
            self.quote_identifier(&constraint.name)?,
            body
        )))
    }

    /// Spelling of a referential action.
    fn referential_action(&self, rule: ReferentialRule) -> &'static str {
        rule.as_sql()
    }

    /// `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY`.
    fn foreign_key_sql(&self, table: &TableSchema, fk: &ForeignKeyDefinition) -> Result<String> {
        if fk.columns.is_empty() || fk.columns.len() != fk.referenced_columns.len() {
            return Err(DbTransitError::configuration(format!(
                "foreign key '{}' on '{}' has mismatched column lists",
                fk.name,
                table.full_name()
            )));
        }
        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            self.table_name(table)?,
            self.quote_identifier(&fk.name)?,
            self.column_list(&fk.columns)?,
            self.qualified_name(fk.referenced_schema.as_deref(), &fk.referenced_table)?,
            self.column_list(&fk.referenced_columns)?,
            self.referential_action(fk.delete_rule),
            self.referential_action(fk.update_rule)
        ))
    }

    /// Statements run before the inserts of a batch, in the same transaction.
    fn insert_prologue(&self, table: &TableSchema) -> Result<Vec<String>> {
        let _ = table;
        Ok(Vec::new())
    }

    /// Statements run after the inserts of a batch, in the same transaction.
    fn insert_epilogue(&self, table: &TableSchema) -> Result<Vec<String>> {
        let _ = table;
        Ok(Vec::new())
    }

    /// Batched `INSERT` statements for `rows`.
    fn insert_statements(&self, table: &TableSchema, rows: &[RowData]) -> Result<Vec<String>> {
        build_inserts(self, table, rows)
    }

    /// Renders one value as a SQL literal, using the target column (when
    /// known) to pick a compatible representation.
    fn render_literal(&self, value: &RowValue, column: Option<&ColumnDefinition>) -> String;

    /// Expression for one column in the export `SELECT` list.
    fn select_expression(&self, column: &ColumnDefinition) -> Result<String> {
        self.quote_identifier(&column.name)
    }

    /// Streaming `SELECT` for a table, ordered by primary key when present.
    fn select_sql(&self, table: &TableSchema, where_clause: Option<&str>) -> Result<String> {
        let columns = table
            .ordered_columns()
            .into_iter()
            .map(|c| self.select_expression(c))
            .collect::<Result<Vec<_>>>()?;
        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), self.table_name(table)?);
        if let Some(predicate) = where_clause.map(str::trim).filter(|p| !p.is_empty()) {
            validate_sql_fragment(predicate, "WHERE clause")?;
            sql.push_str(&format!(" WHERE ({})", predicate));
        }
        let pk = table.primary_key_columns();
        if !pk.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", self.column_list(&pk)?));
        }
        Ok(sql)
    }

    /// Renders a parsed default for `column`, or `None` when this engine
    /// has no equivalent.
    fn render_default(&self, default: &DefaultExpr, column: &ColumnDefinition) -> Option<String>;

    /// Translates a raw default expression from `source`'s dialect.
    fn translate_default(
        &self,
        expression: &str,
        source: DatabaseEngine,
        column: &ColumnDefinition,
    ) -> Option<String> {
        if source == self.engine() {
            return Some(expression.to_string());
        }
        self.render_default(&DefaultExpr::parse(expression), column)
    }

    /// Fixups run once a table's data is loaded (sequence resets).
    fn post_load_statements(&self, table: &TableSchema) -> Result<Vec<String>> {
        let _ = table;
        Ok(Vec::new())
    }

    /// Comma-separated quoted column names.
    fn column_list(&self, columns: &[String]) -> Result<String> {
        Ok(columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Result<Vec<_>>>()?
            .join(", "))
    }
}

/// Builds the dialect for an engine.
pub fn dialect_for(engine: DatabaseEngine) -> Box<dyn Dialect> {
    match engine {
        DatabaseEngine::SqlServer => Box::new(SqlServerDialect),
        DatabaseEngine::MySql => Box::new(MySqlDialect),
        DatabaseEngine::PostgreSql => Box::new(PostgresDialect),
        DatabaseEngine::Firebird => Box::new(FirebirdDialect),
    }
}

/// Name of the table's primary key constraint.
pub fn primary_key_name(table: &TableSchema) -> String {
    table
        .constraints
        .iter()
        .find(|c| c.constraint_type == ConstraintType::PrimaryKey)
        .map(|c| c.name.clone())
        .or_else(|| {
            table
                .indexes
                .iter()
                .find(|i| i.is_primary_key)
                .map(|i| i.name.clone())
        })
        .unwrap_or_else(|| format!("PK_{}", table.name))
}

/// Canonical kind of a column declared in `engine`'s vocabulary.
pub(crate) fn column_kind(engine: DatabaseEngine, column: Option<&ColumnDefinition>) -> Option<Canonical> {
    column.map(|c| typemap::to_canonical(engine, &c.data_type, c.max_length, c.precision, c.scale))
}

/// Shared multi-row `INSERT ... VALUES` builder.
///
/// # Errors
/// Returns a query error if rows disagree on their column list.
pub fn build_inserts<D: Dialect + ?Sized>(
    dialect: &D,
    table: &TableSchema,
    rows: &[RowData],
) -> Result<Vec<String>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let columns = first.columns();
    let targets: Vec<Option<&ColumnDefinition>> =
        columns.iter().map(|name| table.column(name)).collect();
    let column_list = dialect.column_list(columns)?;
    let table_name = dialect.table_name(table)?;

    let mut statements = Vec::new();
    for chunk in rows.chunks(dialect.max_rows_per_insert().max(1)) {
        let mut tuples = Vec::with_capacity(chunk.len());
        for row in chunk {
            if !std::sync::Arc::ptr_eq(row.columns(), columns) && **row.columns() != **columns {
                return Err(DbTransitError::query_failed(format!(
                    "rows for '{}' disagree on their column list",
                    table.full_name()
                )));
            }
            let values = row
                .values()
                .iter()
                .zip(&targets)
                .map(|(value, column)| dialect.render_literal(value, *column))
                .collect::<Vec<_>>()
                .join(", ");
            tuples.push(format!("({})", values));
        }
        statements.push(format!(
            "INSERT INTO {} ({}) VALUES {}",
            table_name,
            column_list,
            tuples.join(", ")
        ));
    }
    Ok(statements)
}

/// A default expression parsed out of one engine's dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultExpr {
    Null,
    /// Numeric literal text
    Number(String),
    /// Unescaped string literal contents
    Text(String),
    Bool(bool),
    CurrentTimestamp,
    CurrentDate,
    NewUuid,
    /// Anything else; only meaningful to the engine it came from
    Raw(String),
}

impl DefaultExpr {
    /// Parses a raw catalog default. Handles SQL Server's redundant
    /// parentheses and PostgreSQL's `::type` casts.
    pub fn parse(expression: &str) -> Self {
        let mut text = expression.trim();
        while let Some(inner) = strip_outer_parens(text) {
            text = inner.trim();
        }
        let text = strip_pg_cast(text);
        let lower = text.to_ascii_lowercase();

        match lower.as_str() {
            "null" => return Self::Null,
            "true" | "b'1'" => return Self::Bool(true),
            "false" | "b'0'" => return Self::Bool(false),
            "getdate()" | "sysdatetime()" | "current_timestamp" | "current_timestamp()" | "now()"
            | "localtimestamp" | "sysutcdatetime()" | "getutcdate()" | "sysdatetimeoffset()"
            | "'now'" => return Self::CurrentTimestamp,
            "current_date" | "curdate()" | "current_date()" | "'today'" => {
                return Self::CurrentDate;
            }
            "newid()" | "newsequentialid()" | "gen_random_uuid()" | "uuid()"
            | "uuid_generate_v4()" => return Self::NewUuid,
            _ => {}
        }

        if lower.starts_with("current_timestamp(") || lower.starts_with("now(") {
            return Self::CurrentTimestamp;
        }

        if is_number(text) {
            return Self::Number(text.to_string());
        }

        let quoted = text
            .strip_prefix("N'")
            .or_else(|| text.strip_prefix("n'"))
            .or_else(|| text.strip_prefix('\''))
            .and_then(|rest| rest.strip_suffix('\''));
        if let Some(inner) = quoted {
            return Self::Text(inner.replace("''", "'"));
        }

        Self::Raw(text.to_string())
    }
}

fn strip_outer_parens(text: &str) -> Option<&str> {
    let inner = text.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0i32;
    for ch in inner.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

fn strip_pg_cast(text: &str) -> &str {
    match text.rfind("::") {
        Some(idx) if !text[idx + 2..].contains('\'') && !text[idx + 2..].contains('(') => {
            let head = text[..idx].trim();
            strip_outer_parens(head).unwrap_or(head)
        }
        _ => text,
    }
}

fn is_number(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|c| *c == '.').count() <= 1
        && digits.chars().any(|c| c.is_ascii_digit())
}

fn strip_check_keyword(definition: &str) -> &str {
    let trimmed = definition.trim();
    if trimmed.len() > 5 && trimmed[..5].eq_ignore_ascii_case("check") {
        trimmed[5..].trim()
    } else {
        trimmed
    }
}

/// A table rewritten into a target engine's vocabulary.
#[derive(Debug, Clone)]
pub struct AdaptedTable {
    pub table: TableSchema,
    pub warnings: Vec<String>,
}

/// Rewrites an archived table for creation on `dialect`'s engine.
///
/// Moves the table (and its foreign-key targets) into `target_schema`. When
/// the engines differ every column type goes through the type mapper, every
/// default is translated (or dropped with a warning) and CHECK constraints
/// are dropped with a warning because their expressions are dialect-specific.
pub fn adapt_table(
    table: &TableSchema,
    source: DatabaseEngine,
    dialect: &dyn Dialect,
    target_schema: Option<&str>,
) -> AdaptedTable {
    let target = dialect.engine();
    let mut adapted = table.clone();
    let mut warnings = Vec::new();

    adapted.schema = target_schema.map(str::to_string);
    for fk in &mut adapted.foreign_keys {
        fk.referenced_schema = target_schema.map(str::to_string);
    }

    if source == target {
        return AdaptedTable {
            table: adapted,
            warnings,
        };
    }

    let full_name = table.full_name();
    for column in &mut adapted.columns {
        let mapped = typemap::map_column(column, source, target);
        if let Some(warning) = mapped.warning {
            warnings.push(format!("{}.{}: {}", full_name, column.name, warning));
        }
        column.data_type = mapped.spec.name;
        column.max_length = mapped.spec.length;
        column.precision = mapped.spec.precision;
        column.scale = mapped.spec.scale;

        if let Some(raw) = column.default_value.take() {
            column.default_value = dialect.translate_default(&raw, source, column);
            if column.default_value.is_none() {
                warnings.push(format!(
                    "{}.{}: default '{}' has no {} equivalent and was dropped",
                    full_name, column.name, raw, target
                ));
            }
        }
    }

    adapted.constraints.retain(|constraint| {
        if constraint.constraint_type == ConstraintType::Check {
            warnings.push(format!(
                "{}: CHECK constraint '{}' written for {} was skipped",
                full_name, constraint.name, source
            ));
            false
        } else {
            true
        }
    });

    AdaptedTable {
        table: adapted,
        warnings,
    }
}

// ============================================================================
// Literal helpers shared by the dialects
// ============================================================================

/// `'text'` with single quotes doubled.
pub(crate) fn quote_text(text: &str) -> String {
    format!("'{}'", validation::escape_string_literal(text))
}

/// Finite floats in round-trip form; `None` for NaN and infinities.
pub(crate) fn format_float(value: f64) -> Option<String> {
    value.is_finite().then(|| format!("{:?}", value))
}

/// Fractional seconds truncated to `digits` (0 renders nothing).
pub(crate) fn fraction(nanos: u32, digits: u32) -> String {
    if digits == 0 {
        return String::new();
    }
    let nanos = nanos % 1_000_000_000;
    let divisor = 10u32.pow(9 - digits.min(9));
    format!(".{:0width$}", nanos / divisor, width = digits.min(9) as usize)
}

/// `YYYY-MM-DD{sep}HH:MM:SS.fff` with `digits` fractional digits.
pub(crate) fn format_datetime(value: &chrono::NaiveDateTime, separator: char, digits: u32) -> String {
    format!(
        "{}{}{}",
        value.format("%Y-%m-%d"),
        separator,
        format_time(&value.time(), digits)
    )
}

/// `HH:MM:SS.fff` with `digits` fractional digits.
pub(crate) fn format_time(value: &chrono::NaiveTime, digits: u32) -> String {
    format!("{}{}", value.format("%H:%M:%S"), fraction(value.nanosecond(), digits))
}

/// Renders numbers and booleans as text when the target column is a string.
pub(crate) fn scalar_as_text(value: &RowValue) -> Option<String> {
    match value {
        RowValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        RowValue::Int(i) => Some(i.to_string()),
        RowValue::Decimal(d) => Some(d.to_string()),
        RowValue::Float(f) => format_float(*f),
        RowValue::Uuid(u) => Some(u.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnDefinition;
    use std::sync::Arc;

    fn customers() -> TableSchema {
        let mut table = TableSchema::new("Customers", Some("dbo".to_string()));
        table.columns = vec![
            ColumnDefinition::new("id", "int", 1).primary_key().identity(),
            ColumnDefinition::new("name", "nvarchar", 2)
                .with_length(100)
                .not_null(),
            ColumnDefinition::new("active", "bit", 3).with_default("((1))"),
            ColumnDefinition::new("created", "datetime2", 4)
                .with_precision(7, 7)
                .with_default("(getdate())"),
        ];
        table.constraints.push(ConstraintDefinition {
            name: "CK_Customers_Name".to_string(),
            constraint_type: ConstraintType::Check,
            columns: vec!["name".to_string()],
            definition: Some("([name]<>'')".to_string()),
        });
        table
    }

    #[test]
    fn test_default_expr_parse() {
        assert_eq!(DefaultExpr::parse("((0))"), DefaultExpr::Number("0".to_string()));
        assert_eq!(DefaultExpr::parse("(getdate())"), DefaultExpr::CurrentTimestamp);
        assert_eq!(
            DefaultExpr::parse("'abc'::character varying"),
            DefaultExpr::Text("abc".to_string())
        );
        assert_eq!(DefaultExpr::parse("(N'it''s')"), DefaultExpr::Text("it's".to_string()));
        assert_eq!(DefaultExpr::parse("gen_random_uuid()"), DefaultExpr::NewUuid);
        assert_eq!(DefaultExpr::parse("true"), DefaultExpr::Bool(true));
        assert_eq!(
            DefaultExpr::parse("nextval('orders_id_seq'::regclass)"),
            DefaultExpr::Raw("nextval('orders_id_seq'::regclass)".to_string())
        );
        assert_eq!(DefaultExpr::parse("(-1.5)"), DefaultExpr::Number("-1.5".to_string()));
    }

    #[test]
    fn test_adapt_table_cross_engine() {
        let adapted = adapt_table(
            &customers(),
            DatabaseEngine::SqlServer,
            &PostgresDialect,
            Some("public"),
        );
        let table = &adapted.table;
        assert_eq!(table.schema.as_deref(), Some("public"));
        assert_eq!(table.column("active").map(|c| c.data_type.as_str()), Some("boolean"));
        assert_eq!(
            table.column("active").and_then(|c| c.default_value.as_deref()),
            Some("TRUE")
        );
        assert_eq!(
            table.column("created").and_then(|c| c.default_value.as_deref()),
            Some("CURRENT_TIMESTAMP")
        );
        assert!(table.constraints.is_empty());
        assert!(adapted.warnings.iter().any(|w| w.contains("CK_Customers_Name")));
        assert!(adapted.warnings.iter().any(|w| w.contains("fractional")));
    }

    #[test]
    fn test_adapt_table_same_engine_keeps_types() {
        let adapted = adapt_table(
            &customers(),
            DatabaseEngine::SqlServer,
            &SqlServerDialect,
            Some("sales"),
        );
        assert_eq!(adapted.table.schema.as_deref(), Some("sales"));
        assert_eq!(adapted.table.constraints.len(), 1);
        assert!(adapted.warnings.is_empty());
    }

    #[test]
    fn test_build_inserts_chunks_rows() {
        let mut table = TableSchema::new("t", None);
        table.columns = vec![ColumnDefinition::new("id", "integer", 1)];
        let columns: Arc<[String]> = Arc::from(vec!["id".to_string()]);
        let rows: Vec<RowData> = (0..2500)
            .map(|i| RowData::new(columns.clone(), vec![RowValue::Int(i)]).unwrap())
            .collect();

        let statements = build_inserts(&PostgresDialect, &table, &rows).unwrap();
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("INSERT INTO \"t\" (\"id\") VALUES (0), (1)"));

        let statements = build_inserts(&FirebirdDialect, &table, &rows[..3]).unwrap();
        assert_eq!(statements.len(), 3);
    }

    #[test]
    fn test_fraction_truncates() {
        assert_eq!(fraction(123_456_789, 7), ".1234567");
        assert_eq!(fraction(123_456_789, 4), ".1234");
        assert_eq!(fraction(5_000_000, 3), ".005");
        assert_eq!(fraction(5, 0), "");
    }

    #[test]
    fn test_select_rejects_injected_predicate() {
        let table = customers();
        assert!(SqlServerDialect.select_sql(&table, Some("1=1; DROP TABLE x")).is_err());
        let sql = SqlServerDialect
            .select_sql(&table, Some("[id] > 10"))
            .unwrap();
        assert!(sql.contains("WHERE ([id] > 10)"));
        assert!(sql.ends_with("ORDER BY [id]"));
    }
}
