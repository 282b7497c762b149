//! MySQL catalog queries over `INFORMATION_SCHEMA`.
//!
//! Catalog strings are cast to `CHAR` because MySQL 8 reports several
//! `INFORMATION_SCHEMA` columns as `VARBINARY`.

use super::MySqlProvider;
use crate::Result;
use crate::models::{
    ColumnDefinition, ConstraintDefinition, ConstraintType, DatabaseEngine, ForeignKeyDefinition,
    IndexDefinition, ReferentialRule,
};
use crate::providers::ListedTable;
use crate::providers::helpers::{RowExt, classify_sqlx_error, with_timeout};
use sqlx::mysql::MySqlRow;

/// Databases that hold server metadata.
const SYSTEM_DATABASES: &[&str] = &["mysql", "information_schema", "performance_schema", "sys"];

impl MySqlProvider {
    async fn fetch_catalog<'q>(
        &self,
        context: String,
        query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    ) -> Result<Vec<MySqlRow>> {
        with_timeout(self.config.query_timeout, &context, async {
            query
                .fetch_all(&self.pool)
                .await
                .map_err(|e| classify_sqlx_error(DatabaseEngine::MySql, &context, e))
        })
        .await
    }

    /// Lists the base tables of the connected database.
    pub(crate) async fn list_tables(&self) -> Result<Vec<ListedTable>> {
        let database = self.database_for(None)?;
        tracing::debug!("Enumerating MySQL tables in '{}'", database);
        let query = sqlx::query(
            r#"
            SELECT CAST(TABLE_NAME AS CHAR) AS TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = ?
            AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
        "#,
        )
        .bind(database);
        let rows = self
            .fetch_catalog("Failed to enumerate database tables".to_string(), query)
            .await?;

        let is_system = SYSTEM_DATABASES.contains(&database.to_ascii_lowercase().as_str());
        rows.iter()
            .map(|row| {
                let name: String = row.get_field("TABLE_NAME", None)?;
                Ok(ListedTable::new(Some(database.to_string()), name)
                    .with_property("IsSystem", is_system.to_string()))
            })
            .collect()
    }

    /// Collects column metadata for a specific table.
    ///
    /// `tinyint(1)` is reported as `boolean` and unsigned integers carry an
    /// ` unsigned` suffix, so the type name alone identifies the range.
    pub(crate) async fn collect_columns(
        &self,
        table_name: &str,
        database: &str,
    ) -> Result<Vec<ColumnDefinition>> {
        let query = sqlx::query(
            r#"
            SELECT
                CAST(c.COLUMN_NAME AS CHAR) AS COLUMN_NAME,
                CAST(c.DATA_TYPE AS CHAR) AS DATA_TYPE,
                CAST(c.COLUMN_TYPE AS CHAR) AS COLUMN_TYPE,
                CAST(c.CHARACTER_MAXIMUM_LENGTH AS SIGNED) AS CHARACTER_MAXIMUM_LENGTH,
                CAST(c.NUMERIC_PRECISION AS SIGNED) AS NUMERIC_PRECISION,
                CAST(c.NUMERIC_SCALE AS SIGNED) AS NUMERIC_SCALE,
                CAST(c.DATETIME_PRECISION AS SIGNED) AS DATETIME_PRECISION,
                CAST(c.IS_NULLABLE AS CHAR) AS IS_NULLABLE,
                CAST(c.COLUMN_DEFAULT AS CHAR) AS COLUMN_DEFAULT,
                CAST(c.ORDINAL_POSITION AS SIGNED) AS ORDINAL_POSITION,
                CAST(c.EXTRA AS CHAR) AS EXTRA
            FROM INFORMATION_SCHEMA.COLUMNS c
            WHERE c.TABLE_SCHEMA = ?
            AND c.TABLE_NAME = ?
            ORDER BY c.ORDINAL_POSITION
        "#,
        )
        .bind(database)
        .bind(table_name);
        let rows = self
            .fetch_catalog(
                format!("Failed to collect columns for table '{}'", table_name),
                query,
            )
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.get_field("COLUMN_NAME", Some(table_name))?;
            let data_type: String = row.get_field("DATA_TYPE", Some(table_name))?;
            let column_type: String = row.get_field("COLUMN_TYPE", Some(table_name))?;
            let max_length: Option<i64> = row.get_field("CHARACTER_MAXIMUM_LENGTH", Some(table_name))?;
            let numeric_precision: Option<i64> = row.get_field("NUMERIC_PRECISION", Some(table_name))?;
            let numeric_scale: Option<i64> = row.get_field("NUMERIC_SCALE", Some(table_name))?;
            let datetime_precision: Option<i64> =
                row.get_field("DATETIME_PRECISION", Some(table_name))?;
            let is_nullable: String = row.get_field("IS_NULLABLE", Some(table_name))?;
            let column_default: Option<String> = row.get_field("COLUMN_DEFAULT", Some(table_name))?;
            let ordinal_position: i64 = row.get_field("ORDINAL_POSITION", Some(table_name))?;
            let extra: Option<String> = row.get_field("EXTRA", Some(table_name))?;

            let data_type = column_type_name(&data_type, &column_type);
            let (precision, scale) = match data_type.as_str() {
                "decimal" | "numeric" | "bit" => (numeric_precision, numeric_scale),
                "datetime" | "timestamp" | "time" => (datetime_precision, None),
                _ => (None, None),
            };
            let identity = extra
                .as_deref()
                .is_some_and(|e| e.to_ascii_lowercase().contains("auto_increment"));

            columns.push(ColumnDefinition {
                name,
                data_type,
                is_nullable: is_nullable.eq_ignore_ascii_case("YES"),
                is_primary_key: false,
                is_identity: identity,
                default_value: column_default,
                max_length: max_length.and_then(|l| i32::try_from(l).ok()),
                precision: precision.and_then(|p| i32::try_from(p).ok()),
                scale: scale.and_then(|s| i32::try_from(s).ok()),
                ordinal_position: u32::try_from(ordinal_position).unwrap_or_default(),
            });
        }
        Ok(columns)
    }

    /// Collects indexes, excluding the ones MySQL creates for unique
    /// constraints and foreign keys.
    pub(crate) async fn collect_indexes(
        &self,
        table_name: &str,
        database: &str,
    ) -> Result<Vec<IndexDefinition>> {
        let query = sqlx::query(
            r#"
            SELECT
                CAST(s.INDEX_NAME AS CHAR) AS INDEX_NAME,
                CAST(s.COLUMN_NAME AS CHAR) AS COLUMN_NAME,
                CAST(s.NON_UNIQUE AS SIGNED) AS NON_UNIQUE
            FROM INFORMATION_SCHEMA.STATISTICS s
            WHERE s.TABLE_SCHEMA = ?
            AND s.TABLE_NAME = ?
            AND s.COLUMN_NAME IS NOT NULL
            AND NOT EXISTS (
                SELECT 1 FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                WHERE tc.TABLE_SCHEMA = s.TABLE_SCHEMA
                AND tc.TABLE_NAME = s.TABLE_NAME
                AND tc.CONSTRAINT_NAME = s.INDEX_NAME
                AND tc.CONSTRAINT_TYPE IN ('UNIQUE', 'FOREIGN KEY')
            )
            ORDER BY s.INDEX_NAME, s.SEQ_IN_INDEX
        "#,
        )
        .bind(database)
        .bind(table_name);
        let rows = self
            .fetch_catalog(
                format!("Failed to collect indexes for table '{}'", table_name),
                query,
            )
            .await?;

        let mut indexes: Vec<IndexDefinition> = Vec::new();
        for row in &rows {
            let name: String = row.get_field("INDEX_NAME", Some(table_name))?;
            let column: String = row.get_field("COLUMN_NAME", Some(table_name))?;
            let non_unique: i64 = row.get_field("NON_UNIQUE", Some(table_name))?;

            match indexes.iter_mut().find(|i| i.name == name) {
                Some(index) => index.columns.push(column),
                None => indexes.push(IndexDefinition {
                    is_primary_key: name == "PRIMARY",
                    is_unique: non_unique == 0,
                    // InnoDB clusters on the primary key.
                    is_clustered: name == "PRIMARY",
                    name,
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
        database: &str,
    ) -> Result<Vec<ForeignKeyDefinition>> {
        let query = sqlx::query(
            r#"
            SELECT
                CAST(kcu.CONSTRAINT_NAME AS CHAR) AS CONSTRAINT_NAME,
                CAST(kcu.COLUMN_NAME AS CHAR) AS COLUMN_NAME,
                CAST(kcu.REFERENCED_TABLE_SCHEMA AS CHAR) AS REFERENCED_TABLE_SCHEMA,
                CAST(kcu.REFERENCED_TABLE_NAME AS CHAR) AS REFERENCED_TABLE_NAME,
                CAST(kcu.REFERENCED_COLUMN_NAME AS CHAR) AS REFERENCED_COLUMN_NAME,
                CAST(rc.UPDATE_RULE AS CHAR) AS UPDATE_RULE,
                CAST(rc.DELETE_RULE AS CHAR) AS DELETE_RULE
            FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
            JOIN INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc
                ON kcu.CONSTRAINT_NAME = rc.CONSTRAINT_NAME
                AND kcu.TABLE_SCHEMA = rc.CONSTRAINT_SCHEMA
            WHERE kcu.TABLE_SCHEMA = ?
            AND kcu.TABLE_NAME = ?
            AND kcu.REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
        "#,
        )
        .bind(database)
        .bind(table_name);
        let rows = self
            .fetch_catalog(
                format!("Failed to collect foreign keys for table '{}'", table_name),
                query,
            )
            .await?;

        let mut foreign_keys: Vec<ForeignKeyDefinition> = Vec::new();
        for row in &rows {
            let name: String = row.get_field("CONSTRAINT_NAME", Some(table_name))?;
            let column: String = row.get_field("COLUMN_NAME", Some(table_name))?;
            let referenced_column: String = row.get_field("REFERENCED_COLUMN_NAME", Some(table_name))?;

            if let Some(fk) = foreign_keys.iter_mut().find(|fk| fk.name == name) {
                fk.columns.push(column);
                fk.referenced_columns.push(referenced_column);
                continue;
            }

            let update_rule: String = row.get_field("UPDATE_RULE", Some(table_name))?;
            let delete_rule: String = row.get_field("DELETE_RULE", Some(table_name))?;
            foreign_keys.push(ForeignKeyDefinition {
                name,
                columns: vec![column],
                referenced_schema: row.get_field("REFERENCED_TABLE_SCHEMA", Some(table_name))?,
                referenced_table: row.get_field("REFERENCED_TABLE_NAME", Some(table_name))?,
                referenced_columns: vec![referenced_column],
                update_rule: ReferentialRule::parse(&update_rule),
                delete_rule: ReferentialRule::parse(&delete_rule),
            });
        }
        Ok(foreign_keys)
    }

    /// Collects primary key, unique and check constraints.
    pub(crate) async fn collect_constraints(
        &self,
        table_name: &str,
        database: &str,
    ) -> Result<Vec<ConstraintDefinition>> {
        let key_query = sqlx::query(
            r#"
            SELECT
                CAST(tc.CONSTRAINT_NAME AS CHAR) AS CONSTRAINT_NAME,
                CAST(tc.CONSTRAINT_TYPE AS CHAR) AS CONSTRAINT_TYPE,
                CAST(kcu.COLUMN_NAME AS CHAR) AS COLUMN_NAME
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
                ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
                AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA
                AND tc.TABLE_NAME = kcu.TABLE_NAME
            WHERE tc.TABLE_SCHEMA = ?
            AND tc.TABLE_NAME = ?
            AND tc.CONSTRAINT_TYPE IN ('PRIMARY KEY', 'UNIQUE')
            ORDER BY tc.CONSTRAINT_TYPE, tc.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
        "#,
        )
        .bind(database)
        .bind(table_name);
        let rows = self
            .fetch_catalog(
                format!("Failed to collect constraints for table '{}'", table_name),
                key_query,
            )
            .await?;

        let mut constraints: Vec<ConstraintDefinition> = Vec::new();
        for row in &rows {
            let name: String = row.get_field("CONSTRAINT_NAME", Some(table_name))?;
            let kind: String = row.get_field("CONSTRAINT_TYPE", Some(table_name))?;
            let column: String = row.get_field("COLUMN_NAME", Some(table_name))?;
            let Some(constraint_type) = ConstraintType::parse(&kind) else {
                continue;
            };
            match constraints
                .iter_mut()
                .find(|c| c.name == name && c.constraint_type == constraint_type)
            {
                Some(constraint) => constraint.columns.push(column),
                None => constraints.push(ConstraintDefinition {
                    name,
                    constraint_type,
                    columns: vec![column],
                    definition: None,
                }),
            }
        }

        constraints.extend(self.collect_check_constraints(table_name, database).await?);
        Ok(constraints)
    }

    /// CHECK constraints exist from MySQL 8.0.16 and MariaDB 10.2; older
    /// servers lack the catalog view and report none.
    async fn collect_check_constraints(
        &self,
        table_name: &str,
        database: &str,
    ) -> Result<Vec<ConstraintDefinition>> {
        let query = sqlx::query(
            r#"
            SELECT
                CAST(tc.CONSTRAINT_NAME AS CHAR) AS CONSTRAINT_NAME,
                CAST(cc.CHECK_CLAUSE AS CHAR) AS CHECK_CLAUSE
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.CHECK_CONSTRAINTS cc
                ON tc.CONSTRAINT_NAME = cc.CONSTRAINT_NAME
                AND tc.CONSTRAINT_SCHEMA = cc.CONSTRAINT_SCHEMA
            WHERE tc.TABLE_SCHEMA = ?
            AND tc.TABLE_NAME = ?
            AND tc.CONSTRAINT_TYPE = 'CHECK'
            ORDER BY tc.CONSTRAINT_NAME
        "#,
        )
        .bind(database)
        .bind(table_name);
        let rows = match self
            .fetch_catalog(
                format!("Failed to collect check constraints for table '{}'", table_name),
                query,
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::debug!("Skipping CHECK constraints of '{}': {}", table_name, e);
                return Ok(Vec::new());
            }
        };

        rows.iter()
            .map(|row| {
                Ok(ConstraintDefinition {
                    name: row.get_field("CONSTRAINT_NAME", Some(table_name))?,
                    constraint_type: ConstraintType::Check,
                    columns: Vec::new(),
                    definition: row.get_field("CHECK_CLAUSE", Some(table_name))?,
                })
            })
            .collect()
    }

    pub(crate) async fn check_table_exists(&self, table_name: &str, database: &str) -> Result<bool> {
        let query = sqlx::query(
            "SELECT 1 FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND TABLE_TYPE = 'BASE TABLE'",
        )
        .bind(database)
        .bind(table_name);
        let rows = self
            .fetch_catalog(
                format!("Failed to check existence of '{}.{}'", database, table_name),
                query,
            )
            .await?;
        Ok(!rows.is_empty())
    }

    /// Reads one `INFORMATION_SCHEMA.TABLES` statistic; `expression` is a
    /// fixed SQL expression.
    pub(crate) async fn query_estimate(
        &self,
        table_name: &str,
        database: &str,
        expression: &'static str,
    ) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT {} AS ESTIMATE FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
            expression
        );
        let query = sqlx::query(&sql).bind(database).bind(table_name);
        let rows = self
            .fetch_catalog(
                format!("Failed to estimate '{}.{}'", database, table_name),
                query,
            )
            .await?;
        match rows.first() {
            Some(row) => row.get_field("ESTIMATE", Some(table_name)),
            None => Ok(None),
        }
    }

    pub(crate) async fn exact_row_count(&self, table_name: &str, database: &str) -> Result<u64> {
        use crate::dialect::Dialect;

        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            self.dialect.qualified_name(Some(database), table_name)?
        );
        let context = format!("Failed to count rows of '{}.{}'", database, table_name);
        let count: i64 = with_timeout(self.config.query_timeout, &context, async {
            sqlx::query_scalar::<_, i64>(&sql)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| classify_sqlx_error(DatabaseEngine::MySql, &context, e))
        })
        .await?;
        Ok(count.unsigned_abs())
    }
}

/// Type name recorded in the schema model for a MySQL column.
pub(crate) fn column_type_name(data_type: &str, column_type: &str) -> String {
    let data_type = data_type.trim().to_ascii_lowercase();
    let column_type = column_type.trim().to_ascii_lowercase();
    let unsigned = column_type.contains("unsigned");

    if data_type == "tinyint" && !unsigned && column_type.starts_with("tinyint(1)") {
        return "boolean".to_string();
    }
    if unsigned {
        format!("{} unsigned", data_type)
    } else {
        data_type
    }
}
