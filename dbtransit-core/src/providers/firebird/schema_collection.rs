//! Firebird catalog queries over the `RDB$` system tables.
//!
//! Catalog names are `CHAR` columns padded with blanks, so every name is
//! trimmed in SQL. Values arrive as text through ODBC.

use super::FirebirdProvider;
use super::connection::query_text;
use crate::Result;
use crate::dialect::Dialect;
use crate::error::DbTransitError;
use crate::models::{
    ColumnDefinition, ConstraintDefinition, ConstraintType, ForeignKeyDefinition, IndexDefinition,
    ReferentialRule,
};
use crate::providers::ListedTable;
use crate::typemap::firebird::type_name_from_code;
use odbc_api::IntoParameter;

/// One catalog row with every column as optional text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CatalogRow(pub(crate) Vec<Option<String>>);

impl CatalogRow {
    pub(crate) fn text(&self, index: usize) -> Option<&str> {
        self.0
            .get(index)
            .and_then(|v| v.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub(crate) fn require_text(&self, index: usize, field: &str, table: Option<&str>) -> Result<String> {
        self.text(index).map(str::to_string).ok_or_else(|| {
            DbTransitError::query_failed(format!(
                "Unexpected NULL in catalog column '{}'{}",
                field,
                table.map(|t| format!(" for table '{}'", t)).unwrap_or_default()
            ))
        })
    }

    pub(crate) fn int(&self, index: usize, field: &str, table: Option<&str>) -> Result<Option<i64>> {
        self.text(index)
            .map(|v| {
                v.parse::<i64>()
                    .map_err(|e| DbTransitError::parse_field(field, table, e))
            })
            .transpose()
    }
}

fn small(value: Option<i64>) -> Option<i16> {
    value.and_then(|v| i16::try_from(v).ok())
}

/// Builds a column from one row of the column query.
///
/// Row layout: name, field type, sub type, scale, precision, character
/// length, not-null flag, position, default source, identity type.
pub(crate) fn column_from_catalog(row: &CatalogRow, table: &str) -> Result<ColumnDefinition> {
    let name = row.require_text(0, "RDB$FIELD_NAME", Some(table))?;
    let code = small(row.int(1, "RDB$FIELD_TYPE", Some(table))?).unwrap_or_default();
    let sub_type = small(row.int(2, "RDB$FIELD_SUB_TYPE", Some(table))?);
    let scale = small(row.int(3, "RDB$FIELD_SCALE", Some(table))?);
    let precision = small(row.int(4, "RDB$FIELD_PRECISION", Some(table))?);
    let char_length = row.int(5, "RDB$CHARACTER_LENGTH", Some(table))?;
    let not_null = row.int(6, "RDB$NULL_FLAG", Some(table))?.unwrap_or(0) != 0;
    let position = row.int(7, "RDB$FIELD_POSITION", Some(table))?.unwrap_or(0);
    let identity = row.text(9).is_some();

    let full_type = type_name_from_code(code, sub_type, scale, precision);
    let (data_type, numeric) = match full_type.split_once('(') {
        Some((base, args)) => (base.to_string(), parse_numeric_args(args)),
        None => (full_type, None),
    };

    let ordinal = u32::try_from(position.saturating_add(1)).unwrap_or(1);
    let mut column = ColumnDefinition::new(name, data_type.as_str(), ordinal);
    column.is_nullable = !not_null;
    column.is_identity = identity;

    if let Some((p, s)) = numeric {
        column.precision = Some(p);
        column.scale = Some(s);
    }
    match code {
        14 | 37 => column.max_length = char_length.and_then(|l| i32::try_from(l).ok()),
        261 => column.max_length = Some(-1),
        _ => {}
    }
    if !identity {
        column.default_value = row.text(8).map(strip_default_keyword);
    }
    Ok(column)
}

fn parse_numeric_args(args: &str) -> Option<(i32, i32)> {
    let (p, s) = args.trim_end_matches(')').split_once(',')?;
    Some((p.trim().parse().ok()?, s.trim().parse().ok()?))
}

/// `DEFAULT 0` → `0`.
fn strip_default_keyword(source: &str) -> String {
    let trimmed = source.trim();
    if trimmed.len() > 7 && trimmed[..7].eq_ignore_ascii_case("default") {
        trimmed[7..].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

impl FirebirdProvider {
    /// Runs a catalog query, optionally bound to one table name.
    async fn catalog_rows(
        &self,
        context: &str,
        sql: &'static str,
        table: Option<&str>,
    ) -> Result<Vec<CatalogRow>> {
        let table = table.map(str::to_string);
        let ctx = context.to_string();
        self.with_connection(context, move |conn| {
            let rows = match &table {
                Some(name) => query_text(conn, sql, &name.as_str().into_parameter(), &ctx)?,
                None => query_text(conn, sql, (), &ctx)?,
            };
            Ok(rows.into_iter().map(CatalogRow).collect())
        })
        .await
    }

    pub(crate) async fn check_connection(&self) -> Result<()> {
        let rows = self
            .catalog_rows(
                "Firebird connection test",
                "SELECT CAST(1 AS INTEGER) FROM RDB$DATABASE",
                None,
            )
            .await?;
        if rows.first().and_then(|r| r.text(0)) != Some("1") {
            return Err(DbTransitError::configuration(
                "Basic connectivity test failed: unexpected result",
            ));
        }
        Ok(())
    }

    /// Lists persistent tables with owner and system flag.
    pub(crate) async fn list_tables(&self) -> Result<Vec<ListedTable>> {
        tracing::debug!("Enumerating Firebird tables");
        let rows = self
            .catalog_rows(
                "Failed to enumerate database tables",
                r#"
                SELECT
                    TRIM(RDB$RELATION_NAME),
                    COALESCE(RDB$SYSTEM_FLAG, 0),
                    TRIM(RDB$OWNER_NAME)
                FROM RDB$RELATIONS
                WHERE RDB$VIEW_BLR IS NULL
                  AND COALESCE(RDB$RELATION_TYPE, 0) IN (0, 3)
                ORDER BY RDB$RELATION_NAME
            "#,
                None,
            )
            .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = row.require_text(0, "RDB$RELATION_NAME", None)?;
            let system = row.int(1, "RDB$SYSTEM_FLAG", Some(&name))?.unwrap_or(0) != 0;
            let mut listed = ListedTable::new(None, name).with_property("IsSystem", system.to_string());
            if let Some(owner) = row.text(2) {
                listed = listed.with_property("OwnerName", owner);
            }
            tables.push(listed);
        }
        Ok(tables)
    }

    pub(crate) async fn collect_columns(&self, table: &str) -> Result<Vec<ColumnDefinition>> {
        let rows = self
            .catalog_rows(
                "Failed to read column metadata",
                r#"
                SELECT
                    TRIM(rf.RDB$FIELD_NAME),
                    f.RDB$FIELD_TYPE,
                    f.RDB$FIELD_SUB_TYPE,
                    f.RDB$FIELD_SCALE,
                    f.RDB$FIELD_PRECISION,
                    f.RDB$CHARACTER_LENGTH,
                    COALESCE(rf.RDB$NULL_FLAG, f.RDB$NULL_FLAG, 0),
                    rf.RDB$FIELD_POSITION,
                    CAST(COALESCE(rf.RDB$DEFAULT_SOURCE, f.RDB$DEFAULT_SOURCE) AS VARCHAR(4000)),
                    rf.RDB$IDENTITY_TYPE
                FROM RDB$RELATION_FIELDS rf
                JOIN RDB$FIELDS f ON f.RDB$FIELD_NAME = rf.RDB$FIELD_SOURCE
                WHERE rf.RDB$RELATION_NAME = ?
                  AND f.RDB$COMPUTED_BLR IS NULL
                ORDER BY rf.RDB$FIELD_POSITION
            "#,
                Some(table),
            )
            .await?;

        rows.iter().map(|row| column_from_catalog(row, table)).collect()
    }

    /// Plain indexes plus primary-key indexes; indexes backing UNIQUE and
    /// FOREIGN KEY constraints and expression indexes are left out.
    pub(crate) async fn collect_indexes(&self, table: &str) -> Result<Vec<IndexDefinition>> {
        let rows = self
            .catalog_rows(
                "Failed to read index metadata",
                r#"
                SELECT
                    TRIM(i.RDB$INDEX_NAME),
                    COALESCE(i.RDB$UNIQUE_FLAG, 0),
                    TRIM(s.RDB$FIELD_NAME),
                    TRIM(COALESCE(rc.RDB$CONSTRAINT_TYPE, ''))
                FROM RDB$INDICES i
                JOIN RDB$INDEX_SEGMENTS s ON s.RDB$INDEX_NAME = i.RDB$INDEX_NAME
                LEFT JOIN RDB$RELATION_CONSTRAINTS rc ON rc.RDB$INDEX_NAME = i.RDB$INDEX_NAME
                WHERE i.RDB$RELATION_NAME = ?
                  AND i.RDB$EXPRESSION_BLR IS NULL
                ORDER BY i.RDB$INDEX_NAME, s.RDB$FIELD_POSITION
            "#,
                Some(table),
            )
            .await?;

        let mut indexes: Vec<IndexDefinition> = Vec::new();
        for row in &rows {
            let constraint = row.text(3).unwrap_or_default().to_ascii_uppercase();
            if constraint == "UNIQUE" || constraint == "FOREIGN KEY" {
                continue;
            }
            let name = row.require_text(0, "RDB$INDEX_NAME", Some(table))?;
            let column = row.require_text(2, "RDB$FIELD_NAME", Some(table))?;
            match indexes.last_mut() {
                Some(index) if index.name == name => index.columns.push(column),
                _ => indexes.push(IndexDefinition {
                    name,
                    is_unique: row.int(1, "RDB$UNIQUE_FLAG", Some(table))?.unwrap_or(0) != 0,
                    is_clustered: false,
                    is_primary_key: constraint == "PRIMARY KEY",
                    columns: vec![column],
                }),
            }
        }
        Ok(indexes)
    }

    pub(crate) async fn collect_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDefinition>> {
        let rows = self
            .catalog_rows(
                "Failed to read foreign key metadata",
                r#"
                SELECT
                    TRIM(rc.RDB$CONSTRAINT_NAME),
                    TRIM(ref.RDB$UPDATE_RULE),
                    TRIM(ref.RDB$DELETE_RULE),
                    TRIM(pk.RDB$RELATION_NAME),
                    TRIM(fs.RDB$FIELD_NAME),
                    TRIM(ps.RDB$FIELD_NAME)
                FROM RDB$RELATION_CONSTRAINTS rc
                JOIN RDB$REF_CONSTRAINTS ref ON ref.RDB$CONSTRAINT_NAME = rc.RDB$CONSTRAINT_NAME
                JOIN RDB$RELATION_CONSTRAINTS pk ON pk.RDB$CONSTRAINT_NAME = ref.RDB$CONST_NAME_UQ
                JOIN RDB$INDEX_SEGMENTS fs ON fs.RDB$INDEX_NAME = rc.RDB$INDEX_NAME
                JOIN RDB$INDEX_SEGMENTS ps ON ps.RDB$INDEX_NAME = pk.RDB$INDEX_NAME
                                          AND ps.RDB$FIELD_POSITION = fs.RDB$FIELD_POSITION
                WHERE rc.RDB$CONSTRAINT_TYPE = 'FOREIGN KEY'
                  AND rc.RDB$RELATION_NAME = ?
                ORDER BY rc.RDB$CONSTRAINT_NAME, fs.RDB$FIELD_POSITION
            "#,
                Some(table),
            )
            .await?;

        let mut keys: Vec<ForeignKeyDefinition> = Vec::new();
        for row in &rows {
            let name = row.require_text(0, "RDB$CONSTRAINT_NAME", Some(table))?;
            let column = row.require_text(4, "RDB$FIELD_NAME", Some(table))?;
            let referenced = row.require_text(5, "RDB$FIELD_NAME", Some(table))?;
            match keys.last_mut() {
                Some(fk) if fk.name == name => {
                    fk.columns.push(column);
                    fk.referenced_columns.push(referenced);
                }
                _ => keys.push(ForeignKeyDefinition {
                    name,
                    columns: vec![column],
                    referenced_schema: None,
                    referenced_table: row.require_text(3, "RDB$RELATION_NAME", Some(table))?,
                    referenced_columns: vec![referenced],
                    update_rule: ReferentialRule::parse(row.text(1).unwrap_or_default()),
                    delete_rule: ReferentialRule::parse(row.text(2).unwrap_or_default()),
                }),
            }
        }
        Ok(keys)
    }

    pub(crate) async fn collect_constraints(&self, table: &str) -> Result<Vec<ConstraintDefinition>> {
        let rows = self
            .catalog_rows(
                "Failed to read key constraints",
                r#"
                SELECT
                    TRIM(rc.RDB$CONSTRAINT_NAME),
                    TRIM(rc.RDB$CONSTRAINT_TYPE),
                    TRIM(s.RDB$FIELD_NAME)
                FROM RDB$RELATION_CONSTRAINTS rc
                JOIN RDB$INDEX_SEGMENTS s ON s.RDB$INDEX_NAME = rc.RDB$INDEX_NAME
                WHERE rc.RDB$RELATION_NAME = ?
                  AND rc.RDB$CONSTRAINT_TYPE IN ('PRIMARY KEY', 'UNIQUE')
                ORDER BY rc.RDB$CONSTRAINT_NAME, s.RDB$FIELD_POSITION
            "#,
                Some(table),
            )
            .await?;

        let mut constraints: Vec<ConstraintDefinition> = Vec::new();
        for row in &rows {
            let name = row.require_text(0, "RDB$CONSTRAINT_NAME", Some(table))?;
            let column = row.require_text(2, "RDB$FIELD_NAME", Some(table))?;
            match constraints.last_mut() {
                Some(c) if c.name == name => c.columns.push(column),
                _ => {
                    let Some(constraint_type) = row.text(1).and_then(ConstraintType::parse) else {
                        continue;
                    };
                    constraints.push(ConstraintDefinition {
                        name,
                        constraint_type,
                        columns: vec![column],
                        definition: None,
                    });
                }
            }
        }

        // CHECK constraints are stored as a pair of triggers; the insert
        // trigger (type 1) carries the source.
        let checks = self
            .catalog_rows(
                "Failed to read check constraints",
                r#"
                SELECT
                    TRIM(cc.RDB$CONSTRAINT_NAME),
                    CAST(t.RDB$TRIGGER_SOURCE AS VARCHAR(8000))
                FROM RDB$RELATION_CONSTRAINTS rc
                JOIN RDB$CHECK_CONSTRAINTS cc ON cc.RDB$CONSTRAINT_NAME = rc.RDB$CONSTRAINT_NAME
                JOIN RDB$TRIGGERS t ON t.RDB$TRIGGER_NAME = cc.RDB$TRIGGER_NAME
                WHERE rc.RDB$RELATION_NAME = ?
                  AND rc.RDB$CONSTRAINT_TYPE = 'CHECK'
                  AND t.RDB$TRIGGER_TYPE = 1
                ORDER BY 1
            "#,
                Some(table),
            )
            .await;
        match checks {
            Ok(rows) => {
                for row in &rows {
                    constraints.push(ConstraintDefinition {
                        name: row.require_text(0, "RDB$CONSTRAINT_NAME", Some(table))?,
                        constraint_type: ConstraintType::Check,
                        columns: Vec::new(),
                        definition: row.text(1).map(str::to_string),
                    });
                }
            }
            Err(e) => tracing::debug!("Check constraints unavailable for {}: {}", table, e),
        }
        Ok(constraints)
    }

    pub(crate) async fn check_table_exists(&self, table: &str) -> Result<bool> {
        let rows = self
            .catalog_rows(
                "Failed to check table existence",
                "SELECT COUNT(*) FROM RDB$RELATIONS WHERE RDB$RELATION_NAME = ? AND RDB$VIEW_BLR IS NULL",
                Some(table),
            )
            .await?;
        let count = rows
            .first()
            .map(|row| row.int(0, "COUNT", Some(table)))
            .transpose()?
            .flatten()
            .unwrap_or(0);
        Ok(count > 0)
    }

    pub(crate) async fn exact_row_count(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.dialect.qualified_name(None, table)?);
        let context = format!("Failed to count rows of {}", table);
        let ctx = context.clone();
        let rows = self
            .with_connection(&context, move |conn| query_text(conn, &sql, (), &ctx))
            .await?;
        let count = rows
            .first()
            .and_then(|row| row.first().cloned().flatten())
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .map_err(|e| DbTransitError::parse_field("COUNT", Some(table), e))
            })
            .transpose()?;
        Ok(count.unwrap_or(0))
    }
}
