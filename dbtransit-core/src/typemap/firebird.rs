//! Firebird type vocabulary and `RDB$FIELD_TYPE` code translation.
//!
//! Firebird lacks booleans before 3.0, GUIDs, offset-aware timestamps and
//! exact numerics beyond 18 digits. Timestamps resolve to 1/10000 s.

use super::{
    Canonical, MappedType, TypeSpec, bounded, decimal_params, decimal_warning, param, parse_args,
    split_type_name, truncation_warning, unknown_warning,
};
use crate::models::DatabaseEngine;

/// Largest `NUMERIC`/`DECIMAL` precision (dialect 3).
pub const MAX_DECIMAL_PRECISION: u32 = 18;
/// Longest `VARCHAR` in a 4-byte `UTF8` charset.
pub const MAX_VARCHAR_CHARS: u32 = 8_191;
/// Longest `CHAR` in a 4-byte `UTF8` charset.
pub const MAX_CHAR_CHARS: u32 = 8_191;
/// Timestamp resolution in fractional digits.
pub const MAX_FRACTION: u32 = 4;

/// Translates `RDB$FIELDS` metadata into a type name.
///
/// `scale` is Firebird's negative scale; a non-zero scale or a numeric
/// sub-type turns an integer storage type into `NUMERIC`/`DECIMAL`.
pub fn type_name_from_code(
    code: i16,
    sub_type: Option<i16>,
    scale: Option<i16>,
    precision: Option<i16>,
) -> String {
    let scaled = scale.is_some_and(|s| s < 0);
    let numeric_kind = match sub_type {
        Some(2) => Some("DECIMAL"),
        Some(1) => Some("NUMERIC"),
        _ if scaled => Some("NUMERIC"),
        _ => None,
    };

    match code {
        7 | 8 | 16 if numeric_kind.is_some() => {
            let kind = numeric_kind.unwrap_or("NUMERIC");
            let default_precision = match code {
                7 => 4,
                8 => 9,
                _ => 18,
            };
            format!(
                "{}({},{})",
                kind,
                precision.filter(|p| *p > 0).unwrap_or(default_precision),
                scale.map_or(0, |s| s.abs())
            )
        }
        7 => "SMALLINT".to_string(),
        8 => "INTEGER".to_string(),
        10 => "FLOAT".to_string(),
        12 => "DATE".to_string(),
        13 => "TIME".to_string(),
        14 => "CHAR".to_string(),
        16 => "BIGINT".to_string(),
        23 => "BOOLEAN".to_string(),
        27 => "DOUBLE PRECISION".to_string(),
        35 => "TIMESTAMP".to_string(),
        37 => "VARCHAR".to_string(),
        261 => match sub_type {
            Some(1) => "BLOB SUB_TYPE TEXT".to_string(),
            _ => "BLOB SUB_TYPE BINARY".to_string(),
        },
        other => format!("UNKNOWN_{}", other),
    }
}

pub(crate) fn to_canonical(
    type_name: &str,
    length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> Canonical {
    let (name, args) = split_type_name(type_name);
    let (arg_first, arg_second) = parse_args(args.as_deref());

    match name.as_str() {
        "boolean" => Canonical::Bit,
        "smallint" => Canonical::SmallInt,
        "integer" | "int" => Canonical::Int,
        "bigint" | "int64" => Canonical::BigInt,
        "numeric" | "decimal" => {
            let (precision, scale) =
                decimal_params(precision.or(arg_first), scale.or(arg_second));
            Canonical::Decimal {
                precision: Some(precision.unwrap_or(MAX_DECIMAL_PRECISION)),
                scale,
            }
        }
        "float" => Canonical::Real,
        "double precision" | "double" => Canonical::Float,
        "char" => Canonical::Char {
            length: bounded(length.or(arg_first)).unwrap_or(1),
            unicode: true,
        },
        "varchar" => Canonical::VarChar {
            length: bounded(length.or(arg_first)),
            unicode: true,
        },
        "blob sub_type text" | "blob sub_type 1" => Canonical::widest_string(),
        "blob" | "blob sub_type binary" | "blob sub_type 0" => Canonical::VarBinary(None),
        "date" => Canonical::Date,
        "time" => Canonical::Time {
            precision: MAX_FRACTION,
        },
        "timestamp" => Canonical::DateTime2 {
            precision: MAX_FRACTION,
        },
        _ => Canonical::Unknown(name),
    }
}

pub(crate) fn from_canonical(canonical: &Canonical) -> MappedType {
    let target = DatabaseEngine::Firebird;
    match canonical {
        Canonical::Bit | Canonical::TinyInt | Canonical::SmallInt => {
            MappedType::exact(TypeSpec::plain("SMALLINT"))
        }
        Canonical::Int => MappedType::exact(TypeSpec::plain("INTEGER")),
        Canonical::BigInt => MappedType::exact(TypeSpec::plain("BIGINT")),
        Canonical::Decimal { precision, scale } => decimal(*precision, *scale),
        Canonical::Money => decimal(Some(19), 4),
        Canonical::SmallMoney => decimal(Some(10), 4),
        Canonical::Real => MappedType::exact(TypeSpec::plain("FLOAT")),
        Canonical::Float => MappedType::exact(TypeSpec::plain("DOUBLE PRECISION")),
        Canonical::Char { length, .. } if *length <= MAX_CHAR_CHARS => {
            MappedType::exact(TypeSpec::sized("CHAR", param(*length)))
        }
        Canonical::VarChar {
            length: Some(length),
            ..
        } if *length <= MAX_VARCHAR_CHARS => {
            MappedType::exact(TypeSpec::sized("VARCHAR", param(*length)))
        }
        Canonical::Char { .. } | Canonical::VarChar { .. } => {
            MappedType::exact(TypeSpec::plain("BLOB SUB_TYPE TEXT"))
        }
        Canonical::Binary(_) | Canonical::VarBinary(_) => {
            MappedType::exact(TypeSpec::plain("BLOB SUB_TYPE BINARY"))
        }
        Canonical::Date => MappedType::exact(TypeSpec::plain("DATE")),
        Canonical::Time { precision } => fractional("TIME", *precision),
        Canonical::SmallDateTime | Canonical::DateTime => {
            MappedType::exact(TypeSpec::plain("TIMESTAMP"))
        }
        Canonical::DateTime2 { precision } => fractional("TIMESTAMP", *precision),
        Canonical::DateTimeOffset { .. } => {
            let spec = TypeSpec::plain("TIMESTAMP");
            MappedType::lossy(
                spec,
                "Firebird TIMESTAMP has no offset; values are normalized to UTC and truncated to 4 fractional digits",
            )
        }
        Canonical::Uuid => MappedType::exact(TypeSpec::sized("CHAR", 36)),
        Canonical::Xml | Canonical::Json => {
            MappedType::exact(TypeSpec::plain("BLOB SUB_TYPE TEXT"))
        }
        Canonical::Unknown(original) => {
            let spec = TypeSpec::plain("BLOB SUB_TYPE TEXT");
            let warning = unknown_warning(original, target, &spec);
            MappedType::lossy(spec, warning)
        }
    }
}

fn decimal(precision: Option<u32>, scale: u32) -> MappedType {
    match precision {
        Some(p) if p <= MAX_DECIMAL_PRECISION => {
            MappedType::exact(TypeSpec::numeric("NUMERIC", param(p), param(scale.min(p))))
        }
        _ => {
            let width = precision.map_or(MAX_VARCHAR_CHARS, |p| p.saturating_add(2));
            let spec = TypeSpec::sized("VARCHAR", param(width.min(MAX_VARCHAR_CHARS)));
            let warning = decimal_warning(precision, DatabaseEngine::Firebird, &spec);
            MappedType::lossy(spec, warning)
        }
    }
}

fn fractional(name: &str, precision: u32) -> MappedType {
    let spec = TypeSpec::plain(name);
    if precision > MAX_FRACTION {
        let warning = truncation_warning(precision, DatabaseEngine::Firebird, &spec, MAX_FRACTION);
        MappedType::lossy(spec, warning)
    } else {
        MappedType::exact(spec)
    }
}

/// Normalizes a Firebird type for same-engine DDL.
pub(crate) fn native_spec(
    type_name: &str,
    length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> TypeSpec {
    let (name, args) = split_type_name(type_name);
    let (arg_first, arg_second) = parse_args(args.as_deref());
    let upper = name.to_ascii_uppercase();
    match name.as_str() {
        "char" | "varchar" => match length.or(arg_first) {
            Some(n) if n > 0 => TypeSpec::sized(upper, n),
            _ => TypeSpec::plain(upper),
        },
        "numeric" | "decimal" => TypeSpec::numeric(
            upper,
            precision.or(arg_first).unwrap_or(18),
            scale.or(arg_second).map_or(0, i32::abs),
        ),
        "blob" => TypeSpec::plain("BLOB SUB_TYPE BINARY"),
        _ => TypeSpec::plain(upper),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_name_from_code() {
        assert_eq!(type_name_from_code(7, None, Some(0), None), "SMALLINT");
        assert_eq!(type_name_from_code(8, Some(0), Some(0), None), "INTEGER");
        assert_eq!(type_name_from_code(16, Some(1), Some(-2), Some(15)), "NUMERIC(15,2)");
        assert_eq!(type_name_from_code(8, Some(2), Some(-4), Some(9)), "DECIMAL(9,4)");
        assert_eq!(type_name_from_code(16, None, Some(0), None), "BIGINT");
        assert_eq!(type_name_from_code(10, None, None, None), "FLOAT");
        assert_eq!(type_name_from_code(12, None, None, None), "DATE");
        assert_eq!(type_name_from_code(13, None, None, None), "TIME");
        assert_eq!(type_name_from_code(14, None, None, None), "CHAR");
        assert_eq!(type_name_from_code(23, None, None, None), "BOOLEAN");
        assert_eq!(type_name_from_code(27, None, None, None), "DOUBLE PRECISION");
        assert_eq!(type_name_from_code(35, None, None, None), "TIMESTAMP");
        assert_eq!(type_name_from_code(37, None, None, None), "VARCHAR");
        assert_eq!(type_name_from_code(261, Some(1), None, None), "BLOB SUB_TYPE TEXT");
        assert_eq!(type_name_from_code(261, Some(0), None, None), "BLOB SUB_TYPE BINARY");
        assert_eq!(type_name_from_code(99, None, None, None), "UNKNOWN_99");
    }

    #[test]
    fn test_firebird_from_canonical() {
        assert_eq!(from_canonical(&Canonical::Bit).spec.render(), "SMALLINT");
        assert_eq!(from_canonical(&Canonical::Uuid).spec.render(), "CHAR(36)");

        let mapped = from_canonical(&Canonical::DateTime2 { precision: 7 });
        assert_eq!(mapped.spec.render(), "TIMESTAMP");
        assert!(mapped.warning.is_some());

        let mapped = from_canonical(&Canonical::Decimal {
            precision: Some(38),
            scale: 6,
        });
        assert_eq!(mapped.spec.render(), "VARCHAR(40)");
        assert!(mapped.warning.is_some());
    }

    #[test]
    fn test_firebird_to_canonical() {
        assert_eq!(to_canonical("SMALLINT", None, None, None), Canonical::SmallInt);
        assert_eq!(
            to_canonical("NUMERIC(15,2)", None, None, None),
            Canonical::Decimal {
                precision: Some(15),
                scale: 2
            }
        );
        assert_eq!(
            to_canonical("BLOB SUB_TYPE TEXT", None, None, None),
            Canonical::widest_string()
        );
        assert_eq!(
            to_canonical("TIMESTAMP", None, None, None),
            Canonical::DateTime2 { precision: 4 }
        );
    }
}
