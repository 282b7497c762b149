//! Cross-engine column type mapping.
//!
//! Hub-and-spoke: every engine normalizes its native vocabulary into
//! [`Canonical`] (modelled on SQL Server's type system) and renders a
//! canonical type back into its own vocabulary. Adding an engine means one
//! `to_canonical` and one `from_canonical`, not a mapper per engine pair.
//!
//! ```text
//! Source engine  ->  Canonical  ->  Target engine
//!   MySQL DOUBLE ->    Float    ->  PostgreSQL double precision
//! ```
//!
//! Mapping is total. Types an engine cannot express degrade to the target's
//! widest safe string with a warning instead of failing the table.

pub mod firebird;
pub mod mysql;
pub mod postgres;
pub mod sqlserver;

use crate::models::{ColumnDefinition, DatabaseEngine};
use serde::{Deserialize, Serialize};

/// Engine-neutral type, named after the SQL Server type it mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Canonical {
    Bit,
    /// Unsigned 8-bit integer (0..=255)
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    /// Exact numeric. `precision: None` is an unconstrained numeric.
    Decimal { precision: Option<u32>, scale: u32 },
    Money,
    SmallMoney,
    Real,
    Float,
    Char { length: u32, unicode: bool },
    /// `length: None` is the unbounded form (`varchar(max)`, `text`).
    VarChar { length: Option<u32>, unicode: bool },
    Binary(u32),
    /// `None` is the unbounded form (`varbinary(max)`, `bytea`, `BLOB`).
    VarBinary(Option<u32>),
    Date,
    /// Fractional-second digits
    Time { precision: u32 },
    SmallDateTime,
    /// SQL Server `datetime` (1/300 s resolution)
    DateTime,
    DateTime2 { precision: u32 },
    DateTimeOffset { precision: u32 },
    Uuid,
    Xml,
    Json,
    /// A type with no canonical equivalent; carries the source name.
    Unknown(String),
}

impl Canonical {
    /// Unbounded unicode string, the universal fallback.
    pub fn widest_string() -> Self {
        Self::VarChar {
            length: None,
            unicode: true,
        }
    }

    /// Whether this is a date or time type.
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            Self::Date
                | Self::Time { .. }
                | Self::SmallDateTime
                | Self::DateTime
                | Self::DateTime2 { .. }
                | Self::DateTimeOffset { .. }
        )
    }

    /// Whether this is a character string type.
    pub fn is_string(&self) -> bool {
        matches!(self, Self::Char { .. } | Self::VarChar { .. })
    }

    /// Whether values of this type travel as text (strings, XML, JSON and
    /// unmapped types).
    pub fn is_textual(&self) -> bool {
        self.is_string() || matches!(self, Self::Xml | Self::Json | Self::Unknown(_))
    }

    /// Whether this is an integer type other than `Bit`.
    pub fn is_integer(&self) -> bool {
        self.integer_rank().is_some_and(|rank| rank > 0)
    }

    /// Whether this is an exact numeric type (integers, decimals, money).
    pub fn is_exact_numeric(&self) -> bool {
        self.integer_rank().is_some()
            || matches!(self, Self::Decimal { .. } | Self::Money | Self::SmallMoney)
    }

    fn integer_rank(&self) -> Option<u8> {
        match self {
            Self::Bit => Some(0),
            Self::TinyInt => Some(1),
            Self::SmallInt => Some(2),
            Self::Int => Some(3),
            Self::BigInt => Some(4),
            _ => None,
        }
    }

    /// Decimal digits needed to hold every value of an integer type.
    fn integer_digits(&self) -> Option<u32> {
        match self {
            Self::Bit => Some(1),
            Self::TinyInt => Some(3),
            Self::SmallInt => Some(5),
            Self::Int => Some(10),
            Self::BigInt => Some(19),
            _ => None,
        }
    }

    /// `(precision, scale)` for decimal-like types.
    fn decimal_shape(&self) -> Option<(Option<u32>, u32)> {
        match self {
            Self::Decimal { precision, scale } => Some((*precision, *scale)),
            Self::Money => Some((Some(19), 4)),
            Self::SmallMoney => Some((Some(10), 4)),
            _ => None,
        }
    }

    fn string_shape(&self) -> Option<(Option<u32>, bool)> {
        match self {
            Self::Char { length, unicode } => Some((Some(*length), *unicode)),
            Self::VarChar { length, unicode } => Some((*length, *unicode)),
            _ => None,
        }
    }

    fn binary_length(&self) -> Option<Option<u32>> {
        match self {
            Self::Binary(length) => Some(Some(*length)),
            Self::VarBinary(length) => Some(*length),
            _ => None,
        }
    }

    /// Whether every value of `other` fits in `self` without loss.
    pub fn covers(&self, other: &Canonical) -> bool {
        if self == other {
            return true;
        }

        if let (Some(a), Some(b)) = (self.integer_rank(), other.integer_rank()) {
            return a >= b;
        }

        if let (Some((precision, scale)), Some(digits)) =
            (self.decimal_shape(), other.integer_digits())
        {
            return precision.is_none_or(|p| p.saturating_sub(scale) >= digits);
        }

        if let (Some((p1, s1)), Some((p2, s2))) = (self.decimal_shape(), other.decimal_shape()) {
            return match (p1, p2) {
                (None, _) => s1 >= s2,
                (Some(_), None) => false,
                (Some(p1), Some(p2)) => s1 >= s2 && p1 - s1.min(p1) >= p2 - s2.min(p2),
            };
        }

        if let (Some((l1, u1)), Some((l2, u2))) = (self.string_shape(), other.string_shape()) {
            if matches!(self, Self::Char { .. }) && l2.is_none() {
                return false;
            }
            return (u1 || !u2) && length_covers(l1, l2);
        }

        if let (Some(l1), Some(l2)) = (self.binary_length(), other.binary_length()) {
            if matches!(self, Self::Binary(_)) && l2.is_none() {
                return false;
            }
            return length_covers(l1, l2);
        }

        match (self, other) {
            (Self::Float, Self::Real) => true,
            (Self::Time { precision: a }, Self::Time { precision: b }) => a >= b,
            (Self::DateTime2 { .. } | Self::DateTime | Self::DateTimeOffset { .. }, Self::Date) => {
                true
            }
            (
                Self::DateTime | Self::DateTime2 { .. } | Self::DateTimeOffset { .. },
                Self::SmallDateTime,
            ) => true,
            (Self::DateTime2 { precision } | Self::DateTimeOffset { precision }, Self::DateTime) => {
                *precision >= 3
            }
            (Self::DateTime2 { precision: a }, Self::DateTime2 { precision: b }) => a >= b,
            (Self::DateTimeOffset { precision: a }, Self::DateTimeOffset { precision: b }) => {
                a >= b
            }
            (
                Self::VarChar {
                    length: None,
                    unicode: true,
                },
                Self::Xml | Self::Json | Self::Unknown(_),
            ) => true,
            _ => false,
        }
    }
}

fn length_covers(wider: Option<u32>, narrower: Option<u32>) -> bool {
    match (wider, narrower) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(a), Some(b)) => a >= b,
    }
}

impl std::fmt::Display for Canonical {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", sqlserver::render_canonical(self).render())
    }
}

/// A concrete type in one engine's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSpec {
    pub name: String,
    /// `-1` renders as `(max)`.
    pub length: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
}

impl TypeSpec {
    /// A type without parameters.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: None,
            precision: None,
            scale: None,
        }
    }

    /// A length-parameterized type.
    pub fn sized(name: impl Into<String>, length: i32) -> Self {
        Self {
            length: Some(length),
            ..Self::plain(name)
        }
    }

    /// A precision-parameterized type (fractional seconds, float bits).
    pub fn with_precision(name: impl Into<String>, precision: i32) -> Self {
        Self {
            precision: Some(precision),
            ..Self::plain(name)
        }
    }

    /// A `(precision, scale)` type.
    pub fn numeric(name: impl Into<String>, precision: i32, scale: i32) -> Self {
        Self {
            precision: Some(precision),
            scale: Some(scale),
            ..Self::plain(name)
        }
    }

    /// Renders the type for DDL, e.g. `nvarchar(max)`, `DECIMAL(10,2)`.
    pub fn render(&self) -> String {
        match (self.length, self.precision, self.scale) {
            (Some(-1), _, _) => format!("{}(max)", self.name),
            (Some(length), _, _) => format!("{}({})", self.name, length),
            (None, Some(precision), Some(scale)) => {
                format!("{}({},{})", self.name, precision, scale)
            }
            (None, Some(precision), None) => format!("{}({})", self.name, precision),
            (None, None, _) => self.name.clone(),
        }
    }
}

/// Result of a type mapping: the target type plus an optional degradation
/// warning for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedType {
    pub spec: TypeSpec,
    pub warning: Option<String>,
}

impl MappedType {
    pub(crate) fn exact(spec: TypeSpec) -> Self {
        Self {
            spec,
            warning: None,
        }
    }

    pub(crate) fn lossy(spec: TypeSpec, warning: impl Into<String>) -> Self {
        Self {
            spec,
            warning: Some(warning.into()),
        }
    }
}

/// Normalizes a native type into the canonical vocabulary.
pub fn to_canonical(
    engine: DatabaseEngine,
    type_name: &str,
    length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> Canonical {
    match engine {
        DatabaseEngine::SqlServer => sqlserver::to_canonical(type_name, length, precision, scale),
        DatabaseEngine::MySql => mysql::to_canonical(type_name, length, precision, scale),
        DatabaseEngine::PostgreSql => postgres::to_canonical(type_name, length, precision, scale),
        DatabaseEngine::Firebird => firebird::to_canonical(type_name, length, precision, scale),
    }
}

/// Renders a canonical type in an engine's vocabulary.
pub fn from_canonical(engine: DatabaseEngine, canonical: &Canonical) -> MappedType {
    match engine {
        DatabaseEngine::SqlServer => sqlserver::from_canonical(canonical),
        DatabaseEngine::MySql => mysql::from_canonical(canonical),
        DatabaseEngine::PostgreSql => postgres::from_canonical(canonical),
        DatabaseEngine::Firebird => firebird::from_canonical(canonical),
    }
}

/// Maps a native `source` type into the `target` engine's vocabulary.
///
/// When both engines are the same the type is returned unchanged (with its
/// parameters normalized), so same-engine migrations are lossless.
pub fn map_type(
    source: DatabaseEngine,
    target: DatabaseEngine,
    type_name: &str,
    length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> MappedType {
    if source == target {
        let spec = match source {
            DatabaseEngine::SqlServer => sqlserver::native_spec(type_name, length, precision, scale),
            DatabaseEngine::MySql => mysql::native_spec(type_name, length, precision, scale),
            DatabaseEngine::PostgreSql => postgres::native_spec(type_name, length, precision, scale),
            DatabaseEngine::Firebird => firebird::native_spec(type_name, length, precision, scale),
        };
        return MappedType::exact(spec);
    }

    let canonical = to_canonical(source, type_name, length, precision, scale);
    from_canonical(target, &canonical)
}

/// Warning for a type the target cannot express natively.
pub(crate) fn unknown_warning(original: &str, target: DatabaseEngine, fallback: &TypeSpec) -> String {
    format!(
        "type '{}' has no {} equivalent; stored as {}",
        original,
        target,
        fallback.render()
    )
}

/// Warning for fractional seconds beyond the target's resolution.
pub(crate) fn truncation_warning(precision: u32, target: DatabaseEngine, spec: &TypeSpec, kept: u32) -> String {
    format!(
        "{}-digit fractional seconds exceed {} resolution; {} keeps {} digits",
        precision,
        target,
        spec.render(),
        kept
    )
}

/// Warning for an exact numeric wider than the target supports.
pub(crate) fn decimal_warning(precision: Option<u32>, target: DatabaseEngine, spec: &TypeSpec) -> String {
    match precision {
        Some(p) => format!(
            "precision {} exceeds the {} maximum; stored as {}",
            p,
            target,
            spec.render()
        ),
        None => format!(
            "unconstrained numeric has no {} equivalent; stored as {}",
            target,
            spec.render()
        ),
    }
}

/// Maps a column's declared type from `source` to `target`.
pub fn map_column(
    column: &ColumnDefinition,
    source: DatabaseEngine,
    target: DatabaseEngine,
) -> MappedType {
    map_type(
        source,
        target,
        &column.data_type,
        column.max_length,
        column.precision,
        column.scale,
    )
}

/// Converts a catalog length (`-1` or non-positive meaning unbounded).
pub(crate) fn bounded(length: Option<i32>) -> Option<u32> {
    match length {
        Some(n) if n > 0 => u32::try_from(n).ok(),
        _ => None,
    }
}

/// Clamps a `u32` into an `i32` type parameter.
pub(crate) fn param(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Precision and scale from catalog values, clamped to non-negative.
pub(crate) fn decimal_params(precision: Option<i32>, scale: Option<i32>) -> (Option<u32>, u32) {
    let precision = precision.and_then(|p| u32::try_from(p).ok()).filter(|p| *p > 0);
    let scale = scale.and_then(|s| u32::try_from(s.abs()).ok()).unwrap_or(0);
    (precision, scale)
}

/// Splits `name(args)` into `("name", Some("args"))`, lowercasing the name.
pub(crate) fn split_type_name(type_name: &str) -> (String, Option<String>) {
    let trimmed = type_name.trim();
    match trimmed.find('(') {
        Some(open) => {
            let base = format!(
                "{}{}",
                trimmed[..open].trim(),
                trimmed
                    .rfind(')')
                    .map(|close| trimmed[close + 1..].to_string())
                    .unwrap_or_default()
            );
            let args = trimmed[open + 1..]
                .split(')')
                .next()
                .map(|s| s.trim().to_string());
            (base.trim().to_ascii_lowercase(), args)
        }
        None => (trimmed.to_ascii_lowercase(), None),
    }
}

/// Parses the first two integers of a `p,s` argument list.
pub(crate) fn parse_args(args: Option<&str>) -> (Option<i32>, Option<i32>) {
    let Some(args) = args else {
        return (None, None);
    };
    let mut parts = args.split(',').map(|p| p.trim().parse::<i32>().ok());
    let first = parts.next().flatten();
    let second = parts.next().flatten();
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_spec_render() {
        assert_eq!(TypeSpec::sized("nvarchar", -1).render(), "nvarchar(max)");
        assert_eq!(TypeSpec::sized("VARCHAR", 50).render(), "VARCHAR(50)");
        assert_eq!(TypeSpec::numeric("DECIMAL", 10, 2).render(), "DECIMAL(10,2)");
        assert_eq!(TypeSpec::with_precision("DATETIME", 6).render(), "DATETIME(6)");
        assert_eq!(TypeSpec::plain("BLOB SUB_TYPE TEXT").render(), "BLOB SUB_TYPE TEXT");
    }

    #[test]
    fn test_split_type_name() {
        assert_eq!(
            split_type_name("DECIMAL(10, 2)"),
            ("decimal".to_string(), Some("10, 2".to_string()))
        );
        assert_eq!(
            split_type_name("int(10) unsigned"),
            ("int unsigned".to_string(), Some("10".to_string()))
        );
        assert_eq!(split_type_name(" Text "), ("text".to_string(), None));
        assert_eq!(parse_args(Some("10, 2")), (Some(10), Some(2)));
    }

    #[test]
    fn test_covers_integer_ladder() {
        assert!(Canonical::BigInt.covers(&Canonical::Int));
        assert!(Canonical::SmallInt.covers(&Canonical::Bit));
        assert!(!Canonical::SmallInt.covers(&Canonical::Int));
        assert!(
            Canonical::Decimal {
                precision: Some(20),
                scale: 0
            }
            .covers(&Canonical::BigInt)
        );
        assert!(
            !Canonical::Decimal {
                precision: Some(10),
                scale: 2
            }
            .covers(&Canonical::Int)
        );
    }

    #[test]
    fn test_covers_strings_and_binary() {
        let nvarchar_max = Canonical::widest_string();
        assert!(nvarchar_max.covers(&Canonical::Char {
            length: 10,
            unicode: false
        }));
        assert!(nvarchar_max.covers(&Canonical::Xml));
        assert!(
            !Canonical::VarChar {
                length: Some(10),
                unicode: false
            }
            .covers(&Canonical::VarChar {
                length: Some(10),
                unicode: true
            })
        );
        assert!(Canonical::VarBinary(None).covers(&Canonical::Binary(16)));
        assert!(!Canonical::Binary(16).covers(&Canonical::VarBinary(None)));
    }

    #[test]
    fn test_covers_temporal() {
        assert!(Canonical::DateTime2 { precision: 3 }.covers(&Canonical::DateTime));
        assert!(!Canonical::DateTime2 { precision: 0 }.covers(&Canonical::DateTime));
        assert!(!Canonical::DateTime2 { precision: 6 }.covers(&Canonical::DateTime2 { precision: 7 }));
        assert!(Canonical::DateTime.covers(&Canonical::SmallDateTime));
    }

    #[test]
    fn test_same_engine_is_identity() {
        let mapped = map_type(
            DatabaseEngine::PostgreSql,
            DatabaseEngine::PostgreSql,
            "jsonb",
            None,
            None,
            None,
        );
        assert_eq!(mapped.spec.render(), "jsonb");
        assert!(mapped.warning.is_none());
    }

    #[test]
    fn test_unknown_type_degrades_with_warning() {
        let mapped = map_type(
            DatabaseEngine::SqlServer,
            DatabaseEngine::MySql,
            "hierarchyid",
            None,
            None,
            None,
        );
        assert_eq!(mapped.spec.render(), "LONGTEXT");
        assert!(mapped.warning.is_some());
    }
}
