//! MySQL type vocabulary.
//!
//! Strings are assumed `utf8mb4`, so every character type is unicode.
//! `BOOLEAN` is an alias for `TINYINT(1)`; the catalog reader reports such
//! columns as `boolean`.

use super::{
    Canonical, MappedType, TypeSpec, bounded, decimal_params, decimal_warning, param, parse_args,
    split_type_name, truncation_warning, unknown_warning,
};
use crate::models::DatabaseEngine;

/// Largest `DECIMAL` precision.
pub const MAX_DECIMAL_PRECISION: u32 = 65;
/// Largest `DECIMAL` scale.
pub const MAX_DECIMAL_SCALE: u32 = 30;
/// Longest `VARCHAR` that fits the 65,535-byte row limit in `utf8mb4`.
pub const MAX_VARCHAR_CHARS: u32 = 16_383;
/// Longest `VARBINARY`.
pub const MAX_VARBINARY_BYTES: u32 = 65_535;
/// Finest fractional-second resolution.
pub const MAX_FRACTION: u32 = 6;

pub(crate) fn to_canonical(
    type_name: &str,
    length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> Canonical {
    let (name, args) = split_type_name(type_name);
    let (arg_first, arg_second) = parse_args(args.as_deref());
    let unsigned = name.ends_with(" unsigned");
    let base = name.trim_end_matches(" unsigned").trim_end_matches(" zerofill");
    let fraction = precision
        .or(arg_first)
        .and_then(|p| u32::try_from(p).ok())
        .unwrap_or(0)
        .min(MAX_FRACTION);

    match (base, unsigned) {
        ("boolean" | "bool", _) => Canonical::Bit,
        ("tinyint", false) if arg_first.or(length) == Some(1) => Canonical::Bit,
        ("tinyint", true) => Canonical::TinyInt,
        ("tinyint", false) => Canonical::SmallInt,
        ("smallint", false) | ("year", _) => Canonical::SmallInt,
        ("smallint", true) | ("mediumint", _) => Canonical::Int,
        ("int" | "integer", false) => Canonical::Int,
        ("int" | "integer", true) => Canonical::BigInt,
        ("bigint", false) => Canonical::BigInt,
        ("bigint", true) => Canonical::Decimal {
            precision: Some(20),
            scale: 0,
        },
        ("decimal" | "numeric" | "dec" | "fixed", _) => {
            let (precision, scale) =
                decimal_params(precision.or(arg_first), scale.or(arg_second));
            Canonical::Decimal {
                precision: Some(precision.unwrap_or(10)),
                scale,
            }
        }
        ("float", _) => Canonical::Real,
        ("double" | "double precision" | "real", _) => Canonical::Float,
        ("bit", _) => match length.or(precision).or(arg_first) {
            None | Some(1) => Canonical::Bit,
            Some(_) => Canonical::BigInt,
        },
        ("char", _) => Canonical::Char {
            length: bounded(length.or(arg_first)).unwrap_or(1),
            unicode: true,
        },
        ("varchar", _) => Canonical::VarChar {
            length: bounded(length.or(arg_first)),
            unicode: true,
        },
        ("enum" | "set", _) => Canonical::VarChar {
            length: Some(bounded(length).unwrap_or(255)),
            unicode: true,
        },
        ("tinytext", _) => Canonical::VarChar {
            length: Some(255),
            unicode: true,
        },
        ("text" | "mediumtext" | "longtext", _) => Canonical::widest_string(),
        ("binary", _) => Canonical::Binary(bounded(length.or(arg_first)).unwrap_or(1)),
        ("varbinary", _) => Canonical::VarBinary(bounded(length.or(arg_first))),
        ("tinyblob", _) => Canonical::VarBinary(Some(255)),
        ("blob" | "mediumblob" | "longblob", _) => Canonical::VarBinary(None),
        ("date", _) => Canonical::Date,
        ("time", _) => Canonical::Time {
            precision: fraction,
        },
        ("datetime" | "timestamp", _) => Canonical::DateTime2 {
            precision: fraction,
        },
        ("json", _) => Canonical::Json,
        _ => Canonical::Unknown(name),
    }
}

pub(crate) fn from_canonical(canonical: &Canonical) -> MappedType {
    let target = DatabaseEngine::MySql;
    match canonical {
        Canonical::Bit => MappedType::exact(TypeSpec::sized("TINYINT", 1)),
        Canonical::TinyInt => MappedType::exact(TypeSpec::plain("TINYINT UNSIGNED")),
        Canonical::SmallInt => MappedType::exact(TypeSpec::plain("SMALLINT")),
        Canonical::Int => MappedType::exact(TypeSpec::plain("INT")),
        Canonical::BigInt => MappedType::exact(TypeSpec::plain("BIGINT")),
        Canonical::Decimal { precision, scale } => decimal(*precision, *scale),
        Canonical::Money => MappedType::exact(TypeSpec::numeric("DECIMAL", 19, 4)),
        Canonical::SmallMoney => MappedType::exact(TypeSpec::numeric("DECIMAL", 10, 4)),
        Canonical::Real => MappedType::exact(TypeSpec::plain("FLOAT")),
        Canonical::Float => MappedType::exact(TypeSpec::plain("DOUBLE")),
        Canonical::Char { length, .. } if *length <= 255 => {
            MappedType::exact(TypeSpec::sized("CHAR", param(*length)))
        }
        Canonical::Char { length, .. }
        | Canonical::VarChar {
            length: Some(length),
            ..
        } if *length <= MAX_VARCHAR_CHARS => {
            MappedType::exact(TypeSpec::sized("VARCHAR", param(*length)))
        }
        Canonical::Char { .. } | Canonical::VarChar { .. } => {
            MappedType::exact(TypeSpec::plain("LONGTEXT"))
        }
        Canonical::Binary(n) if *n <= 255 => MappedType::exact(TypeSpec::sized("BINARY", param(*n))),
        Canonical::Binary(n) | Canonical::VarBinary(Some(n)) if *n <= MAX_VARBINARY_BYTES => {
            MappedType::exact(TypeSpec::sized("VARBINARY", param(*n)))
        }
        Canonical::Binary(_) | Canonical::VarBinary(_) => {
            MappedType::exact(TypeSpec::plain("LONGBLOB"))
        }
        Canonical::Date => MappedType::exact(TypeSpec::plain("DATE")),
        Canonical::Time { precision } => fractional("TIME", *precision),
        Canonical::SmallDateTime => MappedType::exact(TypeSpec::plain("DATETIME")),
        Canonical::DateTime => MappedType::exact(TypeSpec::with_precision("DATETIME", 3)),
        Canonical::DateTime2 { precision } => fractional("DATETIME", *precision),
        Canonical::DateTimeOffset { precision } => {
            let kept = (*precision).min(MAX_FRACTION);
            let spec = TypeSpec::with_precision("DATETIME", param(kept));
            let warning = format!(
                "MySQL has no offset-aware timestamp; values are normalized to UTC in {}",
                spec.render()
            );
            MappedType::lossy(spec, warning)
        }
        Canonical::Uuid => MappedType::exact(TypeSpec::sized("CHAR", 36)),
        Canonical::Xml => MappedType::exact(TypeSpec::plain("LONGTEXT")),
        Canonical::Json => MappedType::exact(TypeSpec::plain("JSON")),
        Canonical::Unknown(original) => {
            let spec = TypeSpec::plain("LONGTEXT");
            let warning = unknown_warning(original, target, &spec);
            MappedType::lossy(spec, warning)
        }
    }
}

fn decimal(precision: Option<u32>, scale: u32) -> MappedType {
    let target = DatabaseEngine::MySql;
    match precision {
        Some(p) if p <= MAX_DECIMAL_PRECISION && scale <= MAX_DECIMAL_SCALE => {
            MappedType::exact(TypeSpec::numeric("DECIMAL", param(p), param(scale)))
        }
        Some(p) => {
            let width = p.saturating_add(2);
            let spec = if width <= MAX_VARCHAR_CHARS {
                TypeSpec::sized("VARCHAR", param(width))
            } else {
                TypeSpec::plain("LONGTEXT")
            };
            let warning = decimal_warning(Some(p), target, &spec);
            MappedType::lossy(spec, warning)
        }
        None => {
            let spec = TypeSpec::numeric(
                "DECIMAL",
                param(MAX_DECIMAL_PRECISION),
                param(MAX_DECIMAL_SCALE),
            );
            let warning = decimal_warning(None, target, &spec);
            MappedType::lossy(spec, warning)
        }
    }
}

fn fractional(name: &str, precision: u32) -> MappedType {
    let kept = precision.min(MAX_FRACTION);
    let spec = if kept == 0 {
        TypeSpec::plain(name)
    } else {
        TypeSpec::with_precision(name, param(kept))
    };
    if precision > MAX_FRACTION {
        let warning = truncation_warning(precision, DatabaseEngine::MySql, &spec, kept);
        MappedType::lossy(spec, warning)
    } else {
        MappedType::exact(spec)
    }
}

/// Normalizes a MySQL type for same-engine DDL.
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
        "boolean" | "bool" => TypeSpec::sized("TINYINT", 1),
        "tinyint" if length.or(arg_first) == Some(1) => TypeSpec::sized("TINYINT", 1),
        "bit" => match length.or(precision).or(arg_first) {
            Some(n) if n > 1 => TypeSpec::sized("BIT", n),
            _ => TypeSpec::plain("BIT"),
        },
        "char" | "varchar" | "binary" | "varbinary" => match length.or(arg_first) {
            Some(n) if n > 0 => TypeSpec::sized(upper, n),
            _ if name == "varchar" => TypeSpec::plain("LONGTEXT"),
            _ if name == "varbinary" => TypeSpec::plain("LONGBLOB"),
            _ => TypeSpec::plain(upper),
        },
        "enum" | "set" => TypeSpec::sized("VARCHAR", length.filter(|n| *n > 0).unwrap_or(255)),
        "decimal" | "numeric" => TypeSpec::numeric(
            upper,
            precision.or(arg_first).unwrap_or(10),
            scale.or(arg_second).unwrap_or(0),
        ),
        "datetime" | "timestamp" | "time" => match precision.or(arg_first) {
            Some(p) if p > 0 => TypeSpec::with_precision(upper, p.min(6)),
            _ => TypeSpec::plain(upper),
        },
        _ => TypeSpec::plain(upper),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_to_canonical_unsigned_and_boolean() {
        assert_eq!(to_canonical("boolean", None, None, None), Canonical::Bit);
        assert_eq!(to_canonical("tinyint(1)", None, None, None), Canonical::Bit);
        assert_eq!(to_canonical("tinyint", None, None, None), Canonical::SmallInt);
        assert_eq!(to_canonical("int unsigned", None, None, None), Canonical::BigInt);
        assert_eq!(
            to_canonical("bigint unsigned", None, None, None),
            Canonical::Decimal {
                precision: Some(20),
                scale: 0
            }
        );
        assert_eq!(to_canonical("longtext", None, None, None), Canonical::widest_string());
    }

    #[test]
    fn test_mysql_from_canonical() {
        assert_eq!(from_canonical(&Canonical::Bit).spec.render(), "TINYINT(1)");
        assert_eq!(from_canonical(&Canonical::Uuid).spec.render(), "CHAR(36)");

        let mapped = from_canonical(&Canonical::DateTime2 { precision: 7 });
        assert_eq!(mapped.spec.render(), "DATETIME(6)");
        assert!(mapped.warning.is_some());

        let mapped = from_canonical(&Canonical::Decimal {
            precision: Some(70),
            scale: 5,
        });
        assert_eq!(mapped.spec.render(), "VARCHAR(72)");
        assert!(mapped.warning.is_some());

        let mapped = from_canonical(&Canonical::VarChar {
            length: Some(20_000),
            unicode: true,
        });
        assert_eq!(mapped.spec.render(), "LONGTEXT");
    }

    #[test]
    fn test_mysql_native_spec() {
        assert_eq!(native_spec("boolean", None, None, None).render(), "TINYINT(1)");
        assert_eq!(native_spec("TINYINT", Some(1), None, None).render(), "TINYINT(1)");
        assert_eq!(native_spec("varchar", Some(80), None, None).render(), "VARCHAR(80)");
        assert_eq!(native_spec("int unsigned", None, Some(10), Some(0)).render(), "INT UNSIGNED");
        assert_eq!(native_spec("datetime", None, Some(6), None).render(), "DATETIME(6)");
    }
}
