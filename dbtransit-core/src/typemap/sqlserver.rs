//! SQL Server type vocabulary. Canonical types are named after these.

use super::{
    Canonical, MappedType, TypeSpec, bounded, decimal_params, decimal_warning, param, parse_args,
    split_type_name, unknown_warning,
};
use crate::models::DatabaseEngine;

/// Longest bounded `varchar`/`varbinary`.
pub const MAX_BYTES: u32 = 8000;
/// Longest bounded `nvarchar`.
pub const MAX_UNICODE_CHARS: u32 = 4000;
/// Largest `decimal` precision.
pub const MAX_DECIMAL_PRECISION: u32 = 38;

const DEFAULT_FRACTION: u32 = 7;

pub(crate) fn to_canonical(
    type_name: &str,
    length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> Canonical {
    let (name, args) = split_type_name(type_name);
    let (arg_first, arg_second) = parse_args(args.as_deref());
    let max_arg = args
        .as_deref()
        .is_some_and(|a| a.trim().eq_ignore_ascii_case("max"));
    let length = if max_arg { Some(-1) } else { length.or(arg_first) };
    let fraction = precision
        .or(scale)
        .or(arg_first)
        .and_then(|p| u32::try_from(p).ok())
        .map_or(DEFAULT_FRACTION, |p| p.min(DEFAULT_FRACTION));

    match name.as_str() {
        "bit" => Canonical::Bit,
        "tinyint" => Canonical::TinyInt,
        "smallint" => Canonical::SmallInt,
        "int" | "integer" => Canonical::Int,
        "bigint" => Canonical::BigInt,
        "decimal" | "numeric" | "dec" => {
            let (precision, scale) =
                decimal_params(precision.or(arg_first), scale.or(arg_second));
            Canonical::Decimal {
                precision: Some(precision.unwrap_or(18)),
                scale,
            }
        }
        "money" => Canonical::Money,
        "smallmoney" => Canonical::SmallMoney,
        "real" => Canonical::Real,
        "float" => match precision.or(arg_first) {
            Some(bits) if bits <= 24 => Canonical::Real,
            _ => Canonical::Float,
        },
        "char" => Canonical::Char {
            length: bounded(length).unwrap_or(1),
            unicode: false,
        },
        "nchar" => Canonical::Char {
            length: bounded(length).unwrap_or(1),
            unicode: true,
        },
        "varchar" => Canonical::VarChar {
            length: bounded(length),
            unicode: false,
        },
        "nvarchar" | "sysname" => Canonical::VarChar {
            length: if name == "sysname" {
                Some(128)
            } else {
                bounded(length)
            },
            unicode: true,
        },
        "text" => Canonical::VarChar {
            length: None,
            unicode: false,
        },
        "ntext" => Canonical::widest_string(),
        "binary" => Canonical::Binary(bounded(length).unwrap_or(1)),
        "varbinary" => Canonical::VarBinary(bounded(length)),
        "image" => Canonical::VarBinary(None),
        "timestamp" | "rowversion" => Canonical::Binary(8),
        "date" => Canonical::Date,
        "time" => Canonical::Time {
            precision: fraction,
        },
        "smalldatetime" => Canonical::SmallDateTime,
        "datetime" => Canonical::DateTime,
        "datetime2" => Canonical::DateTime2 {
            precision: fraction,
        },
        "datetimeoffset" => Canonical::DateTimeOffset {
            precision: fraction,
        },
        "uniqueidentifier" => Canonical::Uuid,
        "xml" => Canonical::Xml,
        _ => Canonical::Unknown(name),
    }
}

/// Renders a canonical type using SQL Server names. Exact for every
/// variant the vocabulary can express.
pub(crate) fn render_canonical(canonical: &Canonical) -> TypeSpec {
    from_canonical(canonical).spec
}

pub(crate) fn from_canonical(canonical: &Canonical) -> MappedType {
    let target = DatabaseEngine::SqlServer;
    match canonical {
        Canonical::Bit => MappedType::exact(TypeSpec::plain("bit")),
        Canonical::TinyInt => MappedType::exact(TypeSpec::plain("tinyint")),
        Canonical::SmallInt => MappedType::exact(TypeSpec::plain("smallint")),
        Canonical::Int => MappedType::exact(TypeSpec::plain("int")),
        Canonical::BigInt => MappedType::exact(TypeSpec::plain("bigint")),
        Canonical::Decimal {
            precision: Some(p),
            scale,
        } if *p <= MAX_DECIMAL_PRECISION => {
            MappedType::exact(TypeSpec::numeric("decimal", param(*p), param(*scale)))
        }
        Canonical::Decimal { precision, scale } => {
            let (spec, warning) = match precision {
                Some(p) => {
                    let spec = string_for_digits(*p);
                    let warning = decimal_warning(Some(*p), target, &spec);
                    (spec, warning)
                }
                None => {
                    let spec = TypeSpec::numeric(
                        "decimal",
                        param(MAX_DECIMAL_PRECISION),
                        param((*scale).clamp(10, MAX_DECIMAL_PRECISION)),
                    );
                    let warning = decimal_warning(None, target, &spec);
                    (spec, warning)
                }
            };
            MappedType::lossy(spec, warning)
        }
        Canonical::Money => MappedType::exact(TypeSpec::plain("money")),
        Canonical::SmallMoney => MappedType::exact(TypeSpec::plain("smallmoney")),
        Canonical::Real => MappedType::exact(TypeSpec::plain("real")),
        Canonical::Float => MappedType::exact(TypeSpec::plain("float")),
        Canonical::Char { length, unicode } => {
            let (name, max) = if *unicode {
                ("nchar", MAX_UNICODE_CHARS)
            } else {
                ("char", MAX_BYTES)
            };
            if *length <= max {
                MappedType::exact(TypeSpec::sized(name, param(*length)))
            } else {
                MappedType::exact(TypeSpec::sized(if *unicode { "nvarchar" } else { "varchar" }, -1))
            }
        }
        Canonical::VarChar { length, unicode } => {
            let (name, max) = if *unicode {
                ("nvarchar", MAX_UNICODE_CHARS)
            } else {
                ("varchar", MAX_BYTES)
            };
            match length {
                Some(n) if *n <= max => MappedType::exact(TypeSpec::sized(name, param(*n))),
                _ => MappedType::exact(TypeSpec::sized(name, -1)),
            }
        }
        Canonical::Binary(n) if *n <= MAX_BYTES => {
            MappedType::exact(TypeSpec::sized("binary", param(*n)))
        }
        Canonical::Binary(_) => MappedType::exact(TypeSpec::sized("varbinary", -1)),
        Canonical::VarBinary(Some(n)) if *n <= MAX_BYTES => {
            MappedType::exact(TypeSpec::sized("varbinary", param(*n)))
        }
        Canonical::VarBinary(_) => MappedType::exact(TypeSpec::sized("varbinary", -1)),
        Canonical::Date => MappedType::exact(TypeSpec::plain("date")),
        Canonical::Time { precision } => {
            MappedType::exact(TypeSpec::with_precision("time", param(*precision)))
        }
        Canonical::SmallDateTime => MappedType::exact(TypeSpec::plain("smalldatetime")),
        Canonical::DateTime => MappedType::exact(TypeSpec::plain("datetime")),
        Canonical::DateTime2 { precision } => {
            MappedType::exact(TypeSpec::with_precision("datetime2", param(*precision)))
        }
        Canonical::DateTimeOffset { precision } => {
            MappedType::exact(TypeSpec::with_precision("datetimeoffset", param(*precision)))
        }
        Canonical::Uuid => MappedType::exact(TypeSpec::plain("uniqueidentifier")),
        Canonical::Xml => MappedType::exact(TypeSpec::plain("xml")),
        Canonical::Json => MappedType::exact(TypeSpec::sized("nvarchar", -1)),
        Canonical::Unknown(original) => {
            let spec = TypeSpec::sized("nvarchar", -1);
            let warning = unknown_warning(original, target, &spec);
            MappedType::lossy(spec, warning)
        }
    }
}

/// A string wide enough for every digit, sign and decimal point.
fn string_for_digits(digits: u32) -> TypeSpec {
    let width = digits.saturating_add(2);
    if width <= MAX_UNICODE_CHARS {
        TypeSpec::sized("nvarchar", param(width))
    } else {
        TypeSpec::sized("nvarchar", -1)
    }
}

/// Normalizes a SQL Server type for same-engine DDL.
pub(crate) fn native_spec(
    type_name: &str,
    length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> TypeSpec {
    let (name, args) = split_type_name(type_name);
    let (arg_first, arg_second) = parse_args(args.as_deref());
    match name.as_str() {
        "char" | "nchar" | "varchar" | "nvarchar" | "binary" | "varbinary" => {
            let max_arg = args
                .as_deref()
                .is_some_and(|a| a.trim().eq_ignore_ascii_case("max"));
            match (max_arg, length.or(arg_first)) {
                (true, _) => TypeSpec::sized(name, -1),
                (false, Some(n)) if n <= 0 => TypeSpec::sized(name, -1),
                (false, Some(n)) => TypeSpec::sized(name, n),
                (false, None) => TypeSpec::plain(name),
            }
        }
        "decimal" | "numeric" => TypeSpec::numeric(
            name,
            precision.or(arg_first).unwrap_or(18),
            scale.or(arg_second).unwrap_or(0),
        ),
        "time" | "datetime2" | "datetimeoffset" => match precision.or(scale).or(arg_first) {
            Some(p) => TypeSpec::with_precision(name, p.clamp(0, 7)),
            None => TypeSpec::plain(name),
        },
        _ => TypeSpec::plain(name),
    }
}
