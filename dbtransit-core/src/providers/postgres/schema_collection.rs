//! PostgreSQL catalog queries.
//!
//! Names are always bound as parameters. Column types are reported in the
//! short spellings used in DDL (`varchar`, `timestamptz`), so the schema
//! model reads the same way a PostgreSQL user would write it.

use super::PostgresProvider;
use crate::Result;
use crate::models::{
    ColumnDefinition, ConstraintDefinition, ConstraintType, DatabaseEngine, ForeignKeyDefinition,
    IndexDefinition, ReferentialRule,
};
use crate::providers::ListedTable;
use crate::providers::helpers::{RowExt, classify_sqlx_error, with_timeout};
use crate::typemap::postgres::normalize_name;
use sqlx::postgres::PgRow;

/// Schemas that hold system catalogs.
const SYSTEM_SCHEMAS: &[&str] = &["pg_catalog", "information_schema", "pg_toast"];

impl PostgresProvider {
    /// Runs a catalog query under the command timeout.
    async fn fetch_catalog<'q>(
        &self,
        context: String,
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<PgRow>> {
        with_timeout(self.config.query_timeout, &context, async {
            query
                .fetch_all(&self.pool)
                .await
                .map_err(|e| classify_sqlx_error(DatabaseEngine::PostgreSql, &context, e))
        })
        .await
    }

    /// Lists base tables visible to the current role.
    pub(crate) async fn list_tables(&self) -> Result<Vec<ListedTable>> {
        tracing::debug!("Enumerating PostgreSQL tables");
        let query = sqlx::query(
            r#"
            SELECT
                n.nspname::text AS table_schema,
                c.relname::text AS table_name,
                pg_get_userbyid(c.relowner)::text AS owner_name
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind IN ('r', 'p')
            AND NOT c.relispartition
            AND n.nspname NOT LIKE 'pg_temp%'
            AND has_table_privilege(c.oid, 'SELECT')
            ORDER BY n.nspname, c.relname
        "#,
        );
        let rows = self
            .fetch_catalog("Failed to enumerate database tables".to_string(), query)
            .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            let schema: String = row.get_field("table_schema", None)?;
            let name: String = row.get_field("table_name", None)?;
            let owner: String = row.get_field("owner_name", Some(&name))?;
            let is_system = SYSTEM_SCHEMAS.contains(&schema.as_str());
            tables.push(
                ListedTable::new(Some(schema), name)
                    .with_property("OwnerName", owner)
                    .with_property("IsSystem", is_system.to_string()),
            );
        }
        Ok(tables)
    }

    /// Collects column metadata for a specific table.
    pub(crate) async fn collect_columns(
        &self,
        table_name: &str,
        schema: &str,
    ) -> Result<Vec<ColumnDefinition>> {
        let query = sqlx::query(
            r#"
            SELECT
                c.column_name::text AS column_name,
                CASE
                    WHEN c.data_type IN ('USER-DEFINED', 'ARRAY') THEN c.udt_name::text
                    ELSE c.data_type::text
                END AS data_type,
                c.character_maximum_length::int4 AS character_maximum_length,
                c.numeric_precision::int4 AS numeric_precision,
                c.numeric_scale::int4 AS numeric_scale,
                c.datetime_precision::int4 AS datetime_precision,
                c.is_nullable::text AS is_nullable,
                c.column_default::text AS column_default,
                c.ordinal_position::int4 AS ordinal_position,
                c.is_identity::text AS is_identity
            FROM information_schema.columns c
            WHERE c.table_schema = $1
            AND c.table_name = $2
            ORDER BY c.ordinal_position
        "#,
        )
        .bind(schema)
        .bind(table_name);
        let rows = self
            .fetch_catalog(
                format!("Failed to collect columns for table '{}.{}'", schema, table_name),
                query,
            )
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.get_field("column_name", Some(table_name))?;
            let raw_type: String = row.get_field("data_type", Some(table_name))?;
            let max_length: Option<i32> = row.get_field("character_maximum_length", Some(table_name))?;
            let numeric_precision: Option<i32> = row.get_field("numeric_precision", Some(table_name))?;
            let numeric_scale: Option<i32> = row.get_field("numeric_scale", Some(table_name))?;
            let datetime_precision: Option<i32> =
                row.get_field("datetime_precision", Some(table_name))?;
            let is_nullable: String = row.get_field("is_nullable", Some(table_name))?;
            let column_default: Option<String> = row.get_field("column_default", Some(table_name))?;
            let ordinal_position: i32 = row.get_field("ordinal_position", Some(table_name))?;
            let is_identity: String = row.get_field("is_identity", Some(table_name))?;

            let data_type = normalize_name(&raw_type);
            let (precision, scale) = match data_type.as_str() {
                "numeric" | "decimal" => (numeric_precision, numeric_scale),
                "time" | "timetz" | "timestamp" | "timestamptz" => (datetime_precision, None),
                _ => (None, None),
            };

            // Serial columns carry their sequence as a nextval() default.
            let serial = column_default
                .as_deref()
                .is_some_and(|d| d.starts_with("nextval("));
            let identity = is_identity == "YES" || serial;

            columns.push(ColumnDefinition {
                name,
                data_type,
                is_nullable: is_nullable == "YES",
                is_primary_key: false,
                is_identity: identity,
                default_value: if identity { None } else { column_default },
                max_length,
                precision,
                scale,
                ordinal_position: u32::try_from(ordinal_position).unwrap_or_default(),
            });
        }
        Ok(columns)
    }

    /// Collects indexes, excluding expression indexes and the ones backing
    /// unique constraints (those are recreated as constraints).
    pub(crate) async fn collect_indexes(
        &self,
        table_name: &str,
        schema: &str,
    ) -> Result<Vec<IndexDefinition>> {
        let query = sqlx::query(
            r#"
            SELECT
                i.relname::text AS index_name,
                ix.indisunique AS is_unique,
                ix.indisprimary AS is_primary,
                ix.indisclustered AS is_clustered,
                ARRAY(
                    SELECT a.attname::text
                    FROM unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord)
                    JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum
                    ORDER BY k.ord
                ) AS columns
            FROM pg_index ix
            JOIN pg_class t ON t.oid = ix.indrelid
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            WHERE n.nspname = $1
            AND t.relname = $2
            AND ix.indexprs IS NULL
            AND NOT EXISTS (
                SELECT 1 FROM pg_constraint con
                WHERE con.conindid = ix.indexrelid AND con.contype = 'u'
            )
            ORDER BY i.relname
        "#,
        )
        .bind(schema)
        .bind(table_name);
        let rows = self
            .fetch_catalog(
                format!("Failed to collect indexes for table '{}.{}'", schema, table_name),
                query,
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(IndexDefinition {
                    name: row.get_field("index_name", Some(table_name))?,
                    is_unique: row.get_field("is_unique", Some(table_name))?,
                    is_clustered: row.get_field("is_clustered", Some(table_name))?,
                    is_primary_key: row.get_field("is_primary", Some(table_name))?,
                    columns: row.get_field("columns", Some(table_name))?,
                })
            })
            .collect()
    }

    /// Collects foreign keys with column pairs in key order.
    pub(crate) async fn collect_foreign_keys(
        &self,
        table_name: &str,
        schema: &str,
    ) -> Result<Vec<ForeignKeyDefinition>> {
        let query = sqlx::query(
            r#"
            SELECT
                con.conname::text AS constraint_name,
                con.confupdtype::text AS update_rule,
                con.confdeltype::text AS delete_rule,
                fns.nspname::text AS referenced_table_schema,
                fcl.relname::text AS referenced_table_name,
                ARRAY(
                    SELECT a.attname::text
                    FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                    JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
                    ORDER BY k.ord
                ) AS columns,
                ARRAY(
                    SELECT a.attname::text
                    FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
                    JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
                    ORDER BY k.ord
                ) AS referenced_columns
            FROM pg_constraint con
            JOIN pg_class cl ON con.conrelid = cl.oid
            JOIN pg_namespace ns ON cl.relnamespace = ns.oid
            JOIN pg_class fcl ON con.confrelid = fcl.oid
            JOIN pg_namespace fns ON fcl.relnamespace = fns.oid
            WHERE con.contype = 'f'
            AND ns.nspname = $1
            AND cl.relname = $2
            ORDER BY con.conname
        "#,
        )
        .bind(schema)
        .bind(table_name);
        let rows = self
            .fetch_catalog(
                format!("Failed to collect foreign keys for table '{}.{}'", schema, table_name),
                query,
            )
            .await?;

        rows.iter()
            .map(|row| {
                let update_rule: String = row.get_field("update_rule", Some(table_name))?;
                let delete_rule: String = row.get_field("delete_rule", Some(table_name))?;
                Ok(ForeignKeyDefinition {
                    name: row.get_field("constraint_name", Some(table_name))?,
                    columns: row.get_field("columns", Some(table_name))?,
                    referenced_schema: row.get_field("referenced_table_schema", Some(table_name))?,
                    referenced_table: row.get_field("referenced_table_name", Some(table_name))?,
                    referenced_columns: row.get_field("referenced_columns", Some(table_name))?,
                    update_rule: map_action_code(&update_rule),
                    delete_rule: map_action_code(&delete_rule),
                })
            })
            .collect()
    }

    /// Collects primary key, unique and check constraints.
    pub(crate) async fn collect_constraints(
        &self,
        table_name: &str,
        schema: &str,
    ) -> Result<Vec<ConstraintDefinition>> {
        let query = sqlx::query(
            r#"
            SELECT
                con.conname::text AS constraint_name,
                con.contype::text AS constraint_type,
                pg_get_constraintdef(con.oid)::text AS definition,
                ARRAY(
                    SELECT a.attname::text
                    FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                    JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
                    ORDER BY k.ord
                ) AS columns
            FROM pg_constraint con
            JOIN pg_class t ON t.oid = con.conrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            WHERE n.nspname = $1
            AND t.relname = $2
            AND con.contype IN ('p', 'u', 'c')
            ORDER BY con.contype DESC, con.conname
        "#,
        )
        .bind(schema)
        .bind(table_name);
        let rows = self
            .fetch_catalog(
                format!("Failed to collect constraints for table '{}.{}'", schema, table_name),
                query,
            )
            .await?;

        let mut constraints = Vec::with_capacity(rows.len());
        for row in &rows {
            let kind: String = row.get_field("constraint_type", Some(table_name))?;
            let Some(constraint_type) = ConstraintType::parse(&kind) else {
                continue;
            };
            let definition: Option<String> = row.get_field("definition", Some(table_name))?;
            constraints.push(ConstraintDefinition {
                name: row.get_field("constraint_name", Some(table_name))?,
                constraint_type,
                columns: row.get_field("columns", Some(table_name))?,
                definition: definition.filter(|_| constraint_type == ConstraintType::Check),
            });
        }
        Ok(constraints)
    }

    pub(crate) async fn check_table_exists(&self, table_name: &str, schema: &str) -> Result<bool> {
        let context = format!("Failed to check existence of '{}.{}'", schema, table_name);
        with_timeout(self.config.query_timeout, &context, async {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind IN ('r', 'p'))",
            )
            .bind(schema)
            .bind(table_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(DatabaseEngine::PostgreSql, &context, e))
        })
        .await
    }

    /// Reads one `pg_class` statistic; `expression` is a fixed SQL
    /// expression over the alias `c`.
    pub(crate) async fn query_estimate(
        &self,
        table_name: &str,
        schema: &str,
        expression: &'static str,
    ) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT {} FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace WHERE n.nspname = $1 AND c.relname = $2",
            expression
        );
        let context = format!("Failed to estimate '{}.{}'", schema, table_name);
        with_timeout(self.config.query_timeout, &context, async {
            sqlx::query_scalar::<_, Option<i64>>(&sql)
                .bind(schema)
                .bind(table_name)
                .fetch_optional(&self.pool)
                .await
                .map(Option::flatten)
                .map_err(|e| classify_sqlx_error(DatabaseEngine::PostgreSql, &context, e))
        })
        .await
    }

    pub(crate) async fn exact_row_count(&self, table_name: &str, schema: &str) -> Result<u64> {
        use crate::dialect::Dialect;

        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            self.dialect.qualified_name(Some(schema), table_name)?
        );
        let context = format!("Failed to count rows of '{}.{}'", schema, table_name);
        let count: i64 = with_timeout(self.config.query_timeout, &context, async {
            sqlx::query_scalar::<_, i64>(&sql)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| classify_sqlx_error(DatabaseEngine::PostgreSql, &context, e))
        })
        .await?;
        Ok(count.unsigned_abs())
    }
}

/// Maps `pg_constraint.confupdtype` / `confdeltype` codes.
pub(crate) fn map_action_code(code: &str) -> ReferentialRule {
    match code {
        "c" => ReferentialRule::Cascade,
        "n" => ReferentialRule::SetNull,
        "d" => ReferentialRule::SetDefault,
        _ => ReferentialRule::NoAction,
    }
}
