//! PostgreSQL type vocabulary.

use super::{
    Canonical, MappedType, TypeSpec, bounded, decimal_params, decimal_warning, param, parse_args,
    split_type_name, truncation_warning, unknown_warning,
};
use crate::models::DatabaseEngine;

/// Largest declarable `numeric` precision.
pub const MAX_DECIMAL_PRECISION: u32 = 1000;
/// Longest declarable `varchar`.
pub const MAX_VARCHAR_CHARS: u32 = 10_485_760;
/// Finest fractional-second resolution.
pub const MAX_FRACTION: u32 = 6;

/// Maps `information_schema` spellings onto the short names used in DDL.
pub fn normalize_name(type_name: &str) -> String {
    let lower = type_name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "character varying" => "varchar".to_string(),
        "character" | "bpchar" => "char".to_string(),
        "timestamp without time zone" => "timestamp".to_string(),
        "timestamp with time zone" => "timestamptz".to_string(),
        "time without time zone" => "time".to_string(),
        "time with time zone" => "timetz".to_string(),
        "int2" => "smallint".to_string(),
        "int4" | "int" => "integer".to_string(),
        "int8" => "bigint".to_string(),
        "float4" => "real".to_string(),
        "float8" => "double precision".to_string(),
        "bool" => "boolean".to_string(),
        _ => lower,
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
    let name = normalize_name(&name);
    let fraction = precision
        .or(arg_first)
        .and_then(|p| u32::try_from(p).ok())
        .unwrap_or(MAX_FRACTION)
        .min(MAX_FRACTION);

    match name.as_str() {
        "boolean" => Canonical::Bit,
        "smallint" | "smallserial" => Canonical::SmallInt,
        "integer" | "serial" => Canonical::Int,
        "bigint" | "bigserial" => Canonical::BigInt,
        "numeric" | "decimal" => {
            let (precision, scale) =
                decimal_params(precision.or(arg_first), scale.or(arg_second));
            Canonical::Decimal { precision, scale }
        }
        "money" => Canonical::Money,
        "real" => Canonical::Real,
        "double precision" => Canonical::Float,
        "char" => Canonical::Char {
            length: bounded(length.or(arg_first)).unwrap_or(1),
            unicode: true,
        },
        "varchar" => Canonical::VarChar {
            length: bounded(length.or(arg_first)),
            unicode: true,
        },
        "text" | "citext" | "name" => Canonical::widest_string(),
        "bytea" => Canonical::VarBinary(None),
        "date" => Canonical::Date,
        "time" | "timetz" => Canonical::Time {
            precision: fraction,
        },
        "timestamp" => Canonical::DateTime2 {
            precision: fraction,
        },
        "timestamptz" => Canonical::DateTimeOffset {
            precision: fraction,
        },
        "uuid" => Canonical::Uuid,
        "xml" => Canonical::Xml,
        "json" | "jsonb" => Canonical::Json,
        _ => Canonical::Unknown(name),
    }
}

pub(crate) fn from_canonical(canonical: &Canonical) -> MappedType {
    let target = DatabaseEngine::PostgreSql;
    match canonical {
        Canonical::Bit => MappedType::exact(TypeSpec::plain("boolean")),
        Canonical::TinyInt | Canonical::SmallInt => MappedType::exact(TypeSpec::plain("smallint")),
        Canonical::Int => MappedType::exact(TypeSpec::plain("integer")),
        Canonical::BigInt => MappedType::exact(TypeSpec::plain("bigint")),
        Canonical::Decimal {
            precision: Some(p),
            scale,
        } if *p <= MAX_DECIMAL_PRECISION => {
            MappedType::exact(TypeSpec::numeric("numeric", param(*p), param(*scale)))
        }
        Canonical::Decimal {
            precision: Some(p), ..
        } => {
            let spec = TypeSpec::sized("varchar", param(p.saturating_add(2)));
            let warning = decimal_warning(Some(*p), target, &spec);
            MappedType::lossy(spec, warning)
        }
        Canonical::Decimal {
            precision: None, ..
        } => MappedType::exact(TypeSpec::plain("numeric")),
        Canonical::Money => MappedType::exact(TypeSpec::numeric("numeric", 19, 4)),
        Canonical::SmallMoney => MappedType::exact(TypeSpec::numeric("numeric", 10, 4)),
        Canonical::Real => MappedType::exact(TypeSpec::plain("real")),
        Canonical::Float => MappedType::exact(TypeSpec::plain("double precision")),
        Canonical::Char { length, .. } if *length <= MAX_VARCHAR_CHARS => {
            MappedType::exact(TypeSpec::sized("char", param(*length)))
        }
        Canonical::VarChar {
            length: Some(length),
            ..
        } if *length <= MAX_VARCHAR_CHARS => {
            MappedType::exact(TypeSpec::sized("varchar", param(*length)))
        }
        Canonical::Char { .. } | Canonical::VarChar { .. } => {
            MappedType::exact(TypeSpec::plain("text"))
        }
        Canonical::Binary(_) | Canonical::VarBinary(_) => {
            MappedType::exact(TypeSpec::plain("bytea"))
        }
        Canonical::Date => MappedType::exact(TypeSpec::plain("date")),
        Canonical::Time { precision } => fractional("time", *precision),
        Canonical::SmallDateTime => MappedType::exact(TypeSpec::with_precision("timestamp", 0)),
        Canonical::DateTime => MappedType::exact(TypeSpec::with_precision("timestamp", 3)),
        Canonical::DateTime2 { precision } => fractional("timestamp", *precision),
        Canonical::DateTimeOffset { precision } => fractional("timestamptz", *precision),
        Canonical::Uuid => MappedType::exact(TypeSpec::plain("uuid")),
        Canonical::Xml => MappedType::exact(TypeSpec::plain("xml")),
        Canonical::Json => MappedType::exact(TypeSpec::plain("jsonb")),
        Canonical::Unknown(original) => {
            let spec = TypeSpec::plain("text");
            let warning = unknown_warning(original, target, &spec);
            MappedType::lossy(spec, warning)
        }
    }
}

fn fractional(name: &str, precision: u32) -> MappedType {
    let kept = precision.min(MAX_FRACTION);
    let spec = TypeSpec::with_precision(name, param(kept));
    if precision > MAX_FRACTION {
        let warning = truncation_warning(precision, DatabaseEngine::PostgreSql, &spec, kept);
        MappedType::lossy(spec, warning)
    } else {
        MappedType::exact(spec)
    }
}

/// Normalizes a PostgreSQL type for same-engine DDL.
pub(crate) fn native_spec(
    type_name: &str,
    length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> TypeSpec {
    let (name, args) = split_type_name(type_name);
    let (arg_first, arg_second) = parse_args(args.as_deref());
    let name = normalize_name(&name);
    match name.as_str() {
        "char" | "varchar" => match length.or(arg_first) {
            Some(n) if n > 0 => TypeSpec::sized(name, n),
            _ if name == "varchar" => TypeSpec::plain("text"),
            _ => TypeSpec::plain(name),
        },
        "numeric" | "decimal" => match (precision.or(arg_first), scale.or(arg_second)) {
            (Some(p), s) if p > 0 => TypeSpec::numeric("numeric", p, s.unwrap_or(0)),
            _ => TypeSpec::plain("numeric"),
        },
        "time" | "timestamp" | "timestamptz" | "timetz" => match precision.or(arg_first) {
            Some(p) if (0..=6).contains(&p) => TypeSpec::with_precision(name, p),
            _ => TypeSpec::plain(name),
        },
        _ => TypeSpec::plain(name),
    }
}
