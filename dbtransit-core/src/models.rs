//! Core data models for database schema representation.
//!
//! This module defines the engine-neutral structures every provider
//! normalizes its catalog into. Column types keep the source engine's own
//! names; [`crate::typemap`] translates them between engines.
//!
//! All models are plain data. They are serialized into the export archive
//! (binary metadata files) so field order and shape form part of the
//! archive format.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    SqlServer,
    MySql,
    PostgreSql,
    Firebird,
}

impl DatabaseEngine {
    /// All engines in a stable order.
    pub const ALL: [DatabaseEngine; 4] = [
        DatabaseEngine::SqlServer,
        DatabaseEngine::MySql,
        DatabaseEngine::PostgreSql,
        DatabaseEngine::Firebird,
    ];

    /// Parses an engine name, accepting the common aliases.
    ///
    /// Returns `None` for names that do not denote a supported engine.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" | "sql server" | "tsql" => Some(Self::SqlServer),
            "mysql" | "mariadb" => Some(Self::MySql),
            "postgresql" | "postgres" | "pgsql" | "pg" => Some(Self::PostgreSql),
            "firebird" | "fb" => Some(Self::Firebird),
            _ => None,
        }
    }

    /// Canonical registry key for this engine.
    pub fn key(&self) -> &'static str {
        match self {
            Self::SqlServer => "sqlserver",
            Self::MySql => "mysql",
            Self::PostgreSql => "postgresql",
            Self::Firebird => "firebird",
        }
    }

    /// Name of the schema/owner a table lands in when none is given.
    ///
    /// MySQL has no schema separate from the database, and Firebird has no
    /// schemas at all, so both return `None` here; MySQL providers substitute
    /// the connected database name.
    pub fn default_schema(&self) -> Option<&'static str> {
        match self {
            Self::SqlServer => Some("dbo"),
            Self::PostgreSql => Some("public"),
            Self::MySql | Self::Firebird => None,
        }
    }
}

impl std::fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseEngine::SqlServer => write!(f, "SQL Server"),
            DatabaseEngine::MySql => write!(f, "MySQL"),
            DatabaseEngine::PostgreSql => write!(f, "PostgreSQL"),
            DatabaseEngine::Firebird => write!(f, "Firebird"),
        }
    }
}

/// Database column information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Type name in the owning engine's vocabulary, e.g. `nvarchar`,
    /// `timestamptz`, `int unsigned`.
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_identity: bool,
    /// Raw default expression in the source engine's dialect.
    pub default_value: Option<String>,
    /// Character or byte length; `-1` means unbounded (`MAX`).
    pub max_length: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
    pub ordinal_position: u32,
}

impl ColumnDefinition {
    /// Creates a nullable column with no length, precision or default.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal_position: u32) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            is_primary_key: false,
            is_identity: false,
            default_value: None,
            max_length: None,
            precision: None,
            scale: None,
            ordinal_position,
        }
    }

    /// Builder method to set the length (`-1` for unbounded).
    pub fn with_length(mut self, length: i32) -> Self {
        self.max_length = Some(length);
        self
    }

    /// Builder method to set precision and scale.
    pub fn with_precision(mut self, precision: i32, scale: i32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// Builder method marking the column as `NOT NULL` primary key.
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self
    }

    /// Builder method marking the column `NOT NULL`.
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    /// Builder method marking the column as an identity/auto-increment column.
    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self
    }

    /// Builder method to set the raw default expression.
    pub fn with_default(mut self, expression: impl Into<String>) -> Self {
        self.default_value = Some(expression.into());
        self
    }
}

/// Database index information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub is_unique: bool,
    pub is_clustered: bool,
    /// Index backing the primary key; emitted as part of `CREATE TABLE`.
    pub is_primary_key: bool,
    /// Key columns in key order.
    pub columns: Vec<String>,
}

/// Referential actions for foreign keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferentialRule {
    #[default]
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialRule {
    /// Parses catalog spellings (`NO ACTION`, `NO_ACTION`, `SET NULL`, `RESTRICT`, ...).
    ///
    /// `RESTRICT` folds into `NoAction`; anything unrecognized is `NoAction`.
    pub fn parse(rule: &str) -> Self {
        let normalized = rule.trim().to_ascii_uppercase().replace('_', " ");
        match normalized.as_str() {
            "CASCADE" => Self::Cascade,
            "SET NULL" => Self::SetNull,
            "SET DEFAULT" => Self::SetDefault,
            _ => Self::NoAction,
        }
    }

    /// SQL spelling used in `ON DELETE` / `ON UPDATE` clauses.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// Foreign key constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_schema: Option<String>,
    pub referenced_table: String,
    /// Positionally paired with `columns`.
    pub referenced_columns: Vec<String>,
    pub update_rule: ReferentialRule,
    pub delete_rule: ReferentialRule,
}

/// Types of table constraints carried by the schema model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintType {
    PrimaryKey,
    Unique,
    Check,
}

impl ConstraintType {
    /// Parses `information_schema` spellings.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_uppercase().as_str() {
            "PRIMARY KEY" | "PRIMARY_KEY" | "P" | "PK" => Some(Self::PrimaryKey),
            "UNIQUE" | "U" | "UQ" => Some(Self::Unique),
            "CHECK" | "C" | "CK" => Some(Self::Check),
            _ => None,
        }
    }
}

/// Database constraint information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDefinition {
    pub name: String,
    pub constraint_type: ConstraintType,
    pub columns: Vec<String>,
    /// Raw CHECK expression in the source dialect.
    pub definition: Option<String>,
}

/// Database table information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub schema: Option<String>,
    pub columns: Vec<ColumnDefinition>,
    pub indexes: Vec<IndexDefinition>,
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    pub constraints: Vec<ConstraintDefinition>,
    /// Engine-specific flags (`IsSystem`, `OwnerName`, ...). Unknown keys are
    /// preserved verbatim.
    pub additional_properties: BTreeMap<String, String>,
}

impl TableSchema {
    /// Creates an empty table schema.
    pub fn new(name: impl Into<String>, schema: Option<String>) -> Self {
        Self {
            name: name.into(),
            schema,
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            constraints: Vec::new(),
            additional_properties: BTreeMap::new(),
        }
    }

    /// `schema.name`, or just `name` when the table has no schema.
    pub fn full_name(&self) -> String {
        qualified_name(self.schema.as_deref(), &self.name)
    }

    /// Looks up a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Columns ordered by ordinal position.
    pub fn ordered_columns(&self) -> Vec<&ColumnDefinition> {
        let mut columns: Vec<&ColumnDefinition> = self.columns.iter().collect();
        columns.sort_by_key(|c| c.ordinal_position);
        columns
    }

    /// Primary key column names in key order.
    ///
    /// Prefers an explicit `PRIMARY KEY` constraint (which preserves key
    /// order) and falls back to the column flags in ordinal order.
    pub fn primary_key_columns(&self) -> Vec<String> {
        if let Some(pk) = self
            .constraints
            .iter()
            .find(|c| c.constraint_type == ConstraintType::PrimaryKey && !c.columns.is_empty())
        {
            return pk.columns.clone();
        }
        self.ordered_columns()
            .into_iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Whether any column is an identity column.
    pub fn has_identity(&self) -> bool {
        self.columns.iter().any(|c| c.is_identity)
    }

    /// Names of tables this table references through foreign keys,
    /// excluding self-references.
    pub fn referenced_tables(&self) -> Vec<String> {
        let own = self.full_name();
        let mut referenced: Vec<String> = self
            .foreign_keys
            .iter()
            .map(|fk| qualified_name(fk.referenced_schema.as_deref(), &fk.referenced_table))
            .filter(|name| !name.eq_ignore_ascii_case(&own))
            .collect();
        referenced.sort();
        referenced.dedup();
        referenced
    }

    /// Validates the structural invariants of a table about to be persisted
    /// or created.
    ///
    /// # Errors
    /// Returns a configuration error naming the violated invariant.
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(crate::error::DbTransitError::configuration(
                "table name cannot be empty",
            ));
        }
        if self.columns.is_empty() {
            return Err(crate::error::DbTransitError::configuration(format!(
                "table '{}' has no columns",
                self.full_name()
            )));
        }
        let mut ordinals: Vec<u32> = self.columns.iter().map(|c| c.ordinal_position).collect();
        ordinals.sort_unstable();
        if ordinals.windows(2).any(|w| w[0] == w[1]) {
            return Err(crate::error::DbTransitError::configuration(format!(
                "table '{}' has duplicate column ordinal positions",
                self.full_name()
            )));
        }
        for fk in &self.foreign_keys {
            if fk.columns.is_empty() || fk.columns.len() != fk.referenced_columns.len() {
                return Err(crate::error::DbTransitError::configuration(format!(
                    "foreign key '{}' on '{}' has mismatched column lists",
                    fk.name,
                    self.full_name()
                )));
            }
        }
        Ok(())
    }
}

/// Joins an optional schema and a name with a dot.
pub fn qualified_name(schema: Option<&str>, name: &str) -> String {
    match schema {
        Some(schema) if !schema.is_empty() => format!("{}.{}", schema, name),
        _ => name.to_string(),
    }
}
