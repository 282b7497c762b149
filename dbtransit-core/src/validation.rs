//! Identifier and SQL fragment validation.
//!
//! Most dialects cannot bind identifiers as parameters, so every table,
//! schema and column name that reaches generated SQL passes through this
//! module first. This is the injection boundary for user-supplied table
//! filters and raw predicates.
//!
//! # Security
//! - Table filters must match `^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)?$`
//! - Identifiers are length-checked and rejected when they contain NUL bytes
//! - Raw predicates and CHECK bodies reject statement terminators, comments
//!   and dynamic execution keywords

use crate::error::DbTransitError;
use crate::Result;
use regex::Regex;
use std::sync::OnceLock;

/// Maximum identifier length accepted for any engine.
///
/// SQL Server allows 128 characters, MySQL 64, PostgreSQL 63 bytes and
/// Firebird 31 or 63 depending on version; the engines enforce their own
/// tighter limits when DDL runs.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Pre-compiled validation patterns.
///
/// Uses `OnceLock` for thread-safe lazy initialization.
pub struct ValidationPatterns {
    /// Allow-list for `table` or `schema.table` filter entries
    pub table_filter: Regex,
    /// Patterns that must never appear in raw SQL fragments
    pub forbidden_fragments: Vec<Regex>,
}

impl ValidationPatterns {
    /// Gets the shared instance of pre-compiled patterns.
    ///
    /// # Errors
    /// Returns a configuration error if a pattern fails to compile.
    pub fn instance() -> Result<&'static Self> {
        static PATTERNS: OnceLock<std::result::Result<ValidationPatterns, String>> = OnceLock::new();
        PATTERNS
            .get_or_init(|| Self::compile().map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| {
                DbTransitError::configuration(format!("Invalid validation pattern: {}", e))
            })
    }

    fn compile() -> std::result::Result<Self, regex::Error> {
        let table_filter = Regex::new(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)?$")?;
        let forbidden_fragments = vec![
            Regex::new(r";")?,
            Regex::new(r"--")?,
            Regex::new(r"/\*|\*/")?,
            Regex::new(r"(?i)\b(exec|execute)\b")?,
            Regex::new(r"(?i)\bxp_\w+")?,
            Regex::new(r"(?i)\b(drop|alter|create|truncate|grant|revoke)\s")?,
        ];
        Ok(Self {
            table_filter,
            forbidden_fragments,
        })
    }
}

/// Validates an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing NUL bytes and
/// identifiers longer than [`MAX_IDENTIFIER_LENGTH`].
///
/// # Errors
/// Returns a configuration error describing the violation.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DbTransitError::configuration("Identifier cannot be empty"));
    }

    if name.contains('\0') {
        return Err(DbTransitError::configuration(format!(
            "Identifier contains a NUL byte: {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(DbTransitError::configuration(format!(
            "Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quotes an identifier between `open` and `close`, doubling any embedded
/// `close` character.
///
/// # Errors
/// Returns a configuration error if the identifier is invalid.
pub fn quote_identifier(name: &str, open: char, close: char) -> Result<String> {
    validate_identifier(name)?;
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push(open);
    for ch in name.chars() {
        if ch == close {
            escaped.push(close);
        }
        escaped.push(ch);
    }
    escaped.push(close);
    Ok(escaped)
}

/// Escapes a value for use inside a single-quoted SQL string literal.
pub fn escape_string_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Validates a raw SQL fragment (WHERE predicate or CHECK body).
///
/// # Errors
/// Returns a configuration error naming `context` when the fragment
/// contains a terminator, a comment or a dynamic execution keyword.
pub fn validate_sql_fragment(fragment: &str, context: &str) -> Result<()> {
    let patterns = ValidationPatterns::instance()?;
    if fragment.trim().is_empty() {
        return Err(DbTransitError::configuration(format!(
            "{} cannot be empty",
            context
        )));
    }
    if fragment.contains('\0') {
        return Err(DbTransitError::configuration(format!(
            "{} contains a NUL byte",
            context
        )));
    }
    if let Some(pattern) = patterns
        .forbidden_fragments
        .iter()
        .find(|p| p.is_match(fragment))
    {
        return Err(DbTransitError::configuration(format!(
            "{} contains a forbidden pattern ({})",
            context,
            pattern.as_str()
        )));
    }
    Ok(())
}

/// A validated `[schema.]table` reference from a user-supplied filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// Parses and validates one filter entry.
    ///
    /// # Errors
    /// Returns a configuration error if the entry fails the allow-list.
    pub fn parse(entry: &str) -> Result<Self> {
        let patterns = ValidationPatterns::instance()?;
        let entry = entry.trim();
        if !patterns.table_filter.is_match(entry) {
            return Err(DbTransitError::configuration(format!(
                "Invalid table name '{}': only letters, digits, underscores and one schema separator are allowed",
                entry
            )));
        }
        match entry.split_once('.') {
            Some((schema, name)) => Ok(Self {
                schema: Some(schema.to_string()),
                name: name.to_string(),
            }),
            None => Ok(Self {
                schema: None,
                name: entry.to_string(),
            }),
        }
    }

    /// Whether this reference names the given table. An unqualified
    /// reference matches the table in any schema.
    pub fn matches(&self, schema: Option<&str>, name: &str) -> bool {
        if !self.name.eq_ignore_ascii_case(name) {
            return false;
        }
        match (&self.schema, schema) {
            (None, _) => true,
            (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
            (Some(_), None) => false,
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A validated list of table references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableFilter {
    entries: Vec<TableRef>,
}

impl TableFilter {
    /// Builds a filter from user-supplied names, validating every entry.
    ///
    /// # Errors
    /// Returns a configuration error on the first invalid entry.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let entry = TableRef::parse(name.as_ref())?;
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        Ok(Self { entries })
    }

    /// Validated entries in input order.
    pub fn entries(&self) -> &[TableRef] {
        &self.entries
    }

    /// Whether the filter has no entries (matches nothing).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry names the given table.
    pub fn matches(&self, schema: Option<&str>, name: &str) -> bool {
        self.entries.iter().any(|e| e.matches(schema, name))
    }

    /// Renders the table names as a comma-separated list of SQL string
    /// literals for catalog `IN (...)` clauses. Safe because every entry
    /// passed the allow-list.
    pub fn name_literals(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("'{}'", escape_string_literal(&e.name)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
