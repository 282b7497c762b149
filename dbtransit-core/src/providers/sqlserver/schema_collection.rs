//! SQL Server catalog queries over `sys.*` and `INFORMATION_SCHEMA`.

use super::SqlServerProvider;
use super::connection::classify_tds_error;
use crate::Result;
use crate::dialect::Dialect;
use crate::error::DbTransitError;
use crate::models::{
    ColumnDefinition, ConstraintDefinition, ConstraintType, ForeignKeyDefinition, IndexDefinition,
    ReferentialRule,
};
use crate::providers::ListedTable;
use crate::providers::helpers::with_timeout;
use tiberius::{Query, Row};

/// Rows per table from partition statistics (heap or clustered index).
pub(crate) const ROW_COUNT_ESTIMATE: &str = r#"
    SELECT CAST(SUM(p.rows) AS BIGINT) AS estimate
    FROM sys.tables t
    JOIN sys.schemas s ON s.schema_id = t.schema_id
    JOIN sys.partitions p ON p.object_id = t.object_id AND p.index_id IN (0, 1)
    WHERE s.name = @P1 AND t.name = @P2
"#;

/// Reserved bytes across every index and LOB allocation of a table.
pub(crate) const TABLE_SIZE_ESTIMATE: &str = r#"
    SELECT CAST(SUM(a.total_pages) AS BIGINT) * 8192 AS estimate
    FROM sys.tables t
    JOIN sys.schemas s ON s.schema_id = t.schema_id
    JOIN sys.partitions p ON p.object_id = t.object_id
    JOIN sys.allocation_units a ON a.container_id = p.partition_id
    WHERE s.name = @P1 AND t.name = @P2
"#;

/// Typed accessors over tiberius rows that name the column and table on
/// failure. `try_get` is used throughout; `get` panics on type mismatch.
pub(crate) trait TdsRowExt {
    fn get_text(&self, column: &str, table: Option<&str>) -> Result<Option<String>>;
    fn get_int(&self, column: &str, table: Option<&str>) -> Result<Option<i32>>;
    fn get_flag(&self, column: &str, table: Option<&str>) -> Result<bool>;

    fn require_text(&self, column: &str, table: Option<&str>) -> Result<String> {
        self.get_text(column, table)?.ok_or_else(|| {
            DbTransitError::query_failed(format!(
                "Unexpected NULL in catalog column '{}'{}",
                column,
                table.map(|t| format!(" for table '{}'", t)).unwrap_or_default()
            ))
        })
    }
}

impl TdsRowExt for Row {
    fn get_text(&self, column: &str, table: Option<&str>) -> Result<Option<String>> {
        self.try_get::<&str, _>(column)
            .map(|v| v.map(str::to_string))
            .map_err(|e| DbTransitError::parse_field(column, table, e))
    }

    fn get_int(&self, column: &str, table: Option<&str>) -> Result<Option<i32>> {
        self.try_get::<i32, _>(column)
            .map_err(|e| DbTransitError::parse_field(column, table, e))
    }

    fn get_flag(&self, column: &str, table: Option<&str>) -> Result<bool> {
        self.try_get::<bool, _>(column)
            .map(|v| v.unwrap_or(false))
            .map_err(|e| DbTransitError::parse_field(column, table, e))
    }
}

impl SqlServerProvider {
    /// Runs a parameterized catalog query on the shared catalog connection.
    pub(crate) async fn catalog_rows(
        &self,
        context: &str,
        sql: &str,
        params: &[&str],
    ) -> Result<Vec<Row>> {
        let mut guard = self.catalog.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(client) = guard.as_mut() else {
            return Err(DbTransitError::query_failed(format!(
                "{}: no catalog connection",
                context
            )));
        };

        let mut query = Query::new(sql);
        for param in params {
            query.bind(param.to_string());
        }
        let result = with_timeout(self.config.query_timeout, context, async {
            let stream = query
                .query(client)
                .await
                .map_err(|e| classify_tds_error(context, e))?;
            stream
                .into_first_result()
                .await
                .map_err(|e| classify_tds_error(context, e))
        })
        .await;

        if result.is_err() {
            // The session may be mid-response; start over next time.
            *guard = None;
        }
        result
    }

    /// Lists user tables with their owner.
    pub(crate) async fn list_tables(&self) -> Result<Vec<ListedTable>> {
        tracing::debug!("Enumerating SQL Server tables");
        let rows = self
            .catalog_rows(
                "Failed to enumerate database tables",
                r#"
                SELECT
                    s.name AS schema_name,
                    t.name AS table_name,
                    t.is_ms_shipped AS is_system,
                    CAST(USER_NAME(OBJECTPROPERTY(t.object_id, 'OwnerId')) AS NVARCHAR(128)) AS owner_name
                FROM sys.tables t
                JOIN sys.schemas s ON s.schema_id = t.schema_id
                ORDER BY s.name, t.name
            "#,
                &[],
            )
            .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            let schema = row.require_text("schema_name", None)?;
            let name = row.require_text("table_name", None)?;
            let is_system = row.get_flag("is_system", Some(&name))?;
            let mut listed = ListedTable::new(Some(schema), name)
                .with_property("IsSystem", is_system.to_string());
            if let Some(owner) = row.get_text("owner_name", None)? {
                listed = listed.with_property("OwnerName", owner);
            }
            tables.push(listed);
        }
        Ok(tables)
    }

    /// Collects column metadata for a specific table.
    pub(crate) async fn collect_columns(
        &self,
        table_name: &str,
        schema: &str,
    ) -> Result<Vec<ColumnDefinition>> {
        let rows = self
            .catalog_rows(
                &format!("Failed to collect columns for table '{}.{}'", schema, table_name),
                r#"
                SELECT
                    CAST(c.COLUMN_NAME AS NVARCHAR(128)) AS column_name,
                    CAST(c.DATA_TYPE AS NVARCHAR(128)) AS data_type,
                    CAST(c.CHARACTER_MAXIMUM_LENGTH AS INT) AS max_length,
                    CAST(c.NUMERIC_PRECISION AS INT) AS numeric_precision,
                    CAST(c.NUMERIC_SCALE AS INT) AS numeric_scale,
                    CAST(c.DATETIME_PRECISION AS INT) AS datetime_precision,
                    CAST(CASE WHEN c.IS_NULLABLE = 'YES' THEN 1 ELSE 0 END AS BIT) AS is_nullable,
                    CAST(c.COLUMN_DEFAULT AS NVARCHAR(4000)) AS column_default,
                    CAST(c.ORDINAL_POSITION AS INT) AS ordinal_position,
                    CAST(COLUMNPROPERTY(
                        OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)),
                        c.COLUMN_NAME,
                        'IsIdentity'
                    ) AS BIT) AS is_identity
                FROM INFORMATION_SCHEMA.COLUMNS c
                WHERE c.TABLE_SCHEMA = @P1
                AND c.TABLE_NAME = @P2
                ORDER BY c.ORDINAL_POSITION
            "#,
                &[schema, table_name],
            )
            .await?;

        let table = Some(table_name);
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let data_type = row.require_text("data_type", table)?.to_ascii_lowercase();
            let (precision, scale) = match data_type.as_str() {
                "decimal" | "numeric" => (
                    row.get_int("numeric_precision", table)?,
                    row.get_int("numeric_scale", table)?,
                ),
                "float" => (row.get_int("numeric_precision", table)?, None),
                "time" | "datetime2" | "datetimeoffset" => {
                    (row.get_int("datetime_precision", table)?, None)
                }
                _ => (None, None),
            };
            let ordinal = row.get_int("ordinal_position", table)?.unwrap_or_default();

            columns.push(ColumnDefinition {
                name: row.require_text("column_name", table)?,
                data_type,
                is_nullable: row.get_flag("is_nullable", table)?,
                is_primary_key: false,
                is_identity: row.get_flag("is_identity", table)?,
                default_value: row.get_text("column_default", table)?,
                max_length: row.get_int("max_length", table)?,
                precision,
                scale,
                ordinal_position: u32::try_from(ordinal).unwrap_or_default(),
            });
        }
        Ok(columns)
    }

    /// Collects rowstore indexes, excluding those backing unique
    /// constraints.
    pub(crate) async fn collect_indexes(
        &self,
        table_name: &str,
        schema: &str,
    ) -> Result<Vec<IndexDefinition>> {
        let rows = self
            .catalog_rows(
                &format!("Failed to collect indexes for table '{}.{}'", schema, table_name),
                r#"
                SELECT
                    i.name AS index_name,
                    i.is_unique AS is_unique,
                    i.is_primary_key AS is_primary_key,
                    CAST(CASE WHEN i.type = 1 THEN 1 ELSE 0 END AS BIT) AS is_clustered,
                    col.name AS column_name
                FROM sys.indexes i
                JOIN sys.tables t ON t.object_id = i.object_id
                JOIN sys.schemas s ON s.schema_id = t.schema_id
                JOIN sys.index_columns ic
                    ON ic.object_id = i.object_id
                    AND ic.index_id = i.index_id
                    AND ic.is_included_column = 0
                JOIN sys.columns col ON col.object_id = ic.object_id AND col.column_id = ic.column_id
                WHERE s.name = @P1
                AND t.name = @P2
                AND i.type IN (1, 2)
                AND i.is_unique_constraint = 0
                AND i.is_hypothetical = 0
                ORDER BY i.name, ic.key_ordinal
            "#,
                &[schema, table_name],
            )
            .await?;

        let table = Some(table_name);
        let mut indexes: Vec<IndexDefinition> = Vec::new();
        for row in &rows {
            let name = row.require_text("index_name", table)?;
            let column = row.require_text("column_name", table)?;
            match indexes.iter_mut().find(|i| i.name == name) {
                Some(index) => index.columns.push(column),
                None => indexes.push(IndexDefinition {
                    name,
                    is_unique: row.get_flag("is_unique", table)?,
                    is_clustered: row.get_flag("is_clustered", table)?,
                    is_primary_key: row.get_flag("is_primary_key", table)?,
                    columns: vec![column],
                }),
            }
        }
        Ok(indexes)
    }

    /// Collects foreign keys grouped by constraint, columns in key order.
    pub(crate) async fn collect_foreign_keys(
        &self,
        table_name: &str,
        schema: &str,
    ) -> Result<Vec<ForeignKeyDefinition>> {
        let rows = self
            .catalog_rows(
                &format!("Failed to collect foreign keys for table '{}.{}'", schema, table_name),
                r#"
                SELECT
                    fk.name AS constraint_name,
                    pc.name AS column_name,
                    rs.name AS referenced_schema,
                    rt.name AS referenced_table,
                    rc.name AS referenced_column,
                    fk.update_referential_action_desc AS update_rule,
                    fk.delete_referential_action_desc AS delete_rule
                FROM sys.foreign_keys fk
                JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
                JOIN sys.tables t ON t.object_id = fk.parent_object_id
                JOIN sys.schemas s ON s.schema_id = t.schema_id
                JOIN sys.columns pc
                    ON pc.object_id = fkc.parent_object_id
                    AND pc.column_id = fkc.parent_column_id
                JOIN sys.tables rt ON rt.object_id = fk.referenced_object_id
                JOIN sys.schemas rs ON rs.schema_id = rt.schema_id
                JOIN sys.columns rc
                    ON rc.object_id = fkc.referenced_object_id
                    AND rc.column_id = fkc.referenced_column_id
                WHERE s.name = @P1
                AND t.name = @P2
                ORDER BY fk.name, fkc.constraint_column_id
            "#,
                &[schema, table_name],
            )
            .await?;

        let table = Some(table_name);
        let mut foreign_keys: Vec<ForeignKeyDefinition> = Vec::new();
        for row in &rows {
            let name = row.require_text("constraint_name", table)?;
            let column = row.require_text("column_name", table)?;
            let referenced_column = row.require_text("referenced_column", table)?;
            if let Some(fk) = foreign_keys.iter_mut().find(|fk| fk.name == name) {
                fk.columns.push(column);
                fk.referenced_columns.push(referenced_column);
                continue;
            }
            foreign_keys.push(ForeignKeyDefinition {
                name,
                columns: vec![column],
                referenced_schema: row.get_text("referenced_schema", table)?,
                referenced_table: row.require_text("referenced_table", table)?,
                referenced_columns: vec![referenced_column],
                update_rule: ReferentialRule::parse(
                    &row.get_text("update_rule", table)?.unwrap_or_default(),
                ),
                delete_rule: ReferentialRule::parse(
                    &row.get_text("delete_rule", table)?.unwrap_or_default(),
                ),
            });
        }
        Ok(foreign_keys)
    }

    /// Collects primary key, unique and check constraints.
    pub(crate) async fn collect_constraints(
        &self,
        table_name: &str,
        schema: &str,
    ) -> Result<Vec<ConstraintDefinition>> {
        let rows = self
            .catalog_rows(
                &format!("Failed to collect constraints for table '{}.{}'", schema, table_name),
                r#"
                SELECT
                    kc.name AS constraint_name,
                    CAST(kc.type AS NVARCHAR(2)) AS constraint_type,
                    col.name AS column_name
                FROM sys.key_constraints kc
                JOIN sys.tables t ON t.object_id = kc.parent_object_id
                JOIN sys.schemas s ON s.schema_id = t.schema_id
                JOIN sys.index_columns ic
                    ON ic.object_id = kc.parent_object_id
                    AND ic.index_id = kc.unique_index_id
                JOIN sys.columns col ON col.object_id = ic.object_id AND col.column_id = ic.column_id
                WHERE s.name = @P1
                AND t.name = @P2
                ORDER BY kc.type, kc.name, ic.key_ordinal
            "#,
                &[schema, table_name],
            )
            .await?;

        let table = Some(table_name);
        let mut constraints: Vec<ConstraintDefinition> = Vec::new();
        for row in &rows {
            let name = row.require_text("constraint_name", table)?;
            let kind = row.require_text("constraint_type", table)?;
            let column = row.require_text("column_name", table)?;
            let Some(constraint_type) = ConstraintType::parse(&kind) else {
                continue;
            };
            match constraints.iter_mut().find(|c| c.name == name) {
                Some(constraint) => constraint.columns.push(column),
                None => constraints.push(ConstraintDefinition {
                    name,
                    constraint_type,
                    columns: vec![column],
                    definition: None,
                }),
            }
        }

        let checks = self
            .catalog_rows(
                &format!(
                    "Failed to collect check constraints for table '{}.{}'",
                    schema, table_name
                ),
                r#"
                SELECT cc.name AS constraint_name, cc.definition AS definition
                FROM sys.check_constraints cc
                JOIN sys.tables t ON t.object_id = cc.parent_object_id
                JOIN sys.schemas s ON s.schema_id = t.schema_id
                WHERE s.name = @P1
                AND t.name = @P2
                ORDER BY cc.name
            "#,
                &[schema, table_name],
            )
            .await?;
        for row in &checks {
            constraints.push(ConstraintDefinition {
                name: row.require_text("constraint_name", table)?,
                constraint_type: ConstraintType::Check,
                columns: Vec::new(),
                definition: row.get_text("definition", table)?,
            });
        }
        Ok(constraints)
    }

    pub(crate) async fn check_table_exists(&self, table_name: &str, schema: &str) -> Result<bool> {
        let rows = self
            .catalog_rows(
                &format!("Failed to check existence of '{}.{}'", schema, table_name),
                r#"
                SELECT CAST(COUNT(*) AS INT) AS matches
                FROM sys.tables t
                JOIN sys.schemas s ON s.schema_id = t.schema_id
                WHERE s.name = @P1 AND t.name = @P2
            "#,
                &[schema, table_name],
            )
            .await?;
        let matches = match rows.first() {
            Some(row) => row.get_int("matches", Some(table_name))?.unwrap_or_default(),
            None => 0,
        };
        Ok(matches > 0)
    }

    /// Runs one of the estimate queries, returning `None` when the table
    /// has no statistics.
    pub(crate) async fn query_estimate(
        &self,
        table_name: &str,
        schema: &str,
        sql: &'static str,
    ) -> Result<Option<i64>> {
        let rows = self
            .catalog_rows(
                &format!("Failed to estimate '{}.{}'", schema, table_name),
                sql,
                &[schema, table_name],
            )
            .await?;
        match rows.first() {
            Some(row) => row
                .try_get::<i64, _>("estimate")
                .map_err(|e| DbTransitError::parse_field("estimate", Some(table_name), e)),
            None => Ok(None),
        }
    }

    pub(crate) async fn exact_row_count(&self, table_name: &str, schema: &str) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT_BIG(*) AS row_count FROM {}",
            self.dialect.qualified_name(Some(schema), table_name)?
        );
        let rows = self
            .catalog_rows(
                &format!("Failed to count rows of '{}.{}'", schema, table_name),
                &sql,
                &[],
            )
            .await?;
        let count = match rows.first() {
            Some(row) => row
                .try_get::<i64, _>("row_count")
                .map_err(|e| DbTransitError::parse_field("row_count", Some(table_name), e))?
                .unwrap_or_default(),
            None => 0,
        };
        Ok(count.unsigned_abs())
    }
}
