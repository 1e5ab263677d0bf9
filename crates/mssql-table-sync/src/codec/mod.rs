//! Value codec: maps a source value plus the target column's declared type
//! to either a T-SQL literal or the value to bind as a parameter.
//!
//! Both directions share the same type-family rules so the literal and the
//! parameterized insert paths write identical data. Neither direction fails:
//! every input maps to a value or to `NULL`.

use crate::core::{SqlNullType, SqlValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use tracing::warn;

/// Declared-type families that drive encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    /// `char`, `varchar`, `text`.
    String,
    /// `nchar`, `nvarchar`, `ntext`.
    NationalString,
    /// `date`, `datetime`, `datetime2`, `smalldatetime`.
    Temporal,
    /// `uniqueidentifier`.
    Guid,
    /// `bit`.
    Bit,
    /// `binary`, `varbinary`, `image`.
    Binary,
    /// Everything else, including numerics.
    Other,
}

impl TypeFamily {
    /// Classify a declared SQL type name (case-insensitive).
    pub fn of(declared_type: &str) -> Self {
        match declared_type.trim().to_lowercase().as_str() {
            "char" | "varchar" | "text" => TypeFamily::String,
            "nchar" | "nvarchar" | "ntext" => TypeFamily::NationalString,
            "date" | "datetime" | "datetime2" | "smalldatetime" => TypeFamily::Temporal,
            "uniqueidentifier" => TypeFamily::Guid,
            "bit" => TypeFamily::Bit,
            "binary" | "varbinary" | "image" => TypeFamily::Binary,
            _ => TypeFamily::Other,
        }
    }
}

/// Encode a value as a T-SQL literal for the given declared column type.
pub fn encode_literal(value: &SqlValue, declared_type: &str) -> String {
    if value.is_null() {
        return "NULL".to_string();
    }

    match TypeFamily::of(declared_type) {
        TypeFamily::String => quote_text(&render(value), false),
        TypeFamily::NationalString => quote_text(&render(value), true),
        TypeFamily::Temporal => match to_datetime(value) {
            Some(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
            None => quote_text(&render(value), false),
        },
        TypeFamily::Guid => match guid_text(value) {
            Some(guid) => format!("'{}'", guid),
            None => "NULL".to_string(),
        },
        TypeFamily::Bit => if is_truthy(value) { "1" } else { "0" }.to_string(),
        TypeFamily::Binary => match value {
            SqlValue::Bytes(bytes) => hex_literal(bytes),
            _ => "NULL".to_string(),
        },
        TypeFamily::Other => encode_default(value),
    }
}

/// Map a value to the value bound as a parameter for the given declared column type.
pub fn encode_param(value: &SqlValue, declared_type: &str) -> SqlValue {
    let family = TypeFamily::of(declared_type);

    if value.is_null() {
        return SqlValue::Null(null_type_for(declared_type));
    }

    match family {
        TypeFamily::String | TypeFamily::NationalString => match value {
            SqlValue::Text(_) => value.clone(),
            other => SqlValue::Text(render(other)),
        },
        TypeFamily::Temporal => match to_datetime(value) {
            Some(dt) => SqlValue::DateTime(dt),
            None => SqlValue::Text(render(value)),
        },
        TypeFamily::Guid => match value {
            SqlValue::Uuid(u) => SqlValue::Uuid(*u),
            other => match guid_text(other).and_then(|g| uuid::Uuid::parse_str(&g).ok()) {
                Some(u) => SqlValue::Uuid(u),
                None => SqlValue::Null(SqlNullType::Uuid),
            },
        },
        TypeFamily::Bit => SqlValue::Bool(is_truthy(value)),
        TypeFamily::Binary => match value {
            SqlValue::Bytes(_) => value.clone(),
            _ => SqlValue::Null(SqlNullType::Bytes),
        },
        TypeFamily::Other => match value {
            SqlValue::F32(v) if !v.is_finite() => SqlValue::Null(SqlNullType::F32),
            SqlValue::F64(v) if !v.is_finite() => SqlValue::Null(SqlNullType::F64),
            other => other.clone(),
        },
    }
}

/// NULL type hint for a declared column type.
pub fn null_type_for(declared_type: &str) -> SqlNullType {
    match declared_type.trim().to_lowercase().as_str() {
        "bit" => SqlNullType::Bool,
        "tinyint" | "smallint" => SqlNullType::I16,
        "int" => SqlNullType::I32,
        "bigint" => SqlNullType::I64,
        "real" => SqlNullType::F32,
        "float" => SqlNullType::F64,
        "decimal" | "numeric" | "money" | "smallmoney" => SqlNullType::Decimal,
        "uniqueidentifier" => SqlNullType::Uuid,
        "binary" | "varbinary" | "image" => SqlNullType::Bytes,
        "date" | "datetime" | "datetime2" | "smalldatetime" => SqlNullType::DateTime,
        "datetimeoffset" => SqlNullType::DateTimeOffset,
        "time" => SqlNullType::Time,
        _ => SqlNullType::String,
    }
}

fn render(value: &SqlValue) -> String {
    value.render_text().unwrap_or_default()
}

fn quote_text(text: &str, national: bool) -> String {
    let escaped = text.replace('\'', "''");
    if national {
        format!("N'{}'", escaped)
    } else {
        format!("'{}'", escaped)
    }
}

fn hex_literal(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn encode_default(value: &SqlValue) -> String {
    match value {
        SqlValue::Null(_) => "NULL".to_string(),
        SqlValue::Bool(v) => if *v { "1" } else { "0" }.to_string(),
        SqlValue::I16(v) => v.to_string(),
        SqlValue::I32(v) => v.to_string(),
        SqlValue::I64(v) => v.to_string(),
        SqlValue::F32(v) if v.is_finite() => v.to_string(),
        SqlValue::F64(v) if v.is_finite() => v.to_string(),
        SqlValue::F32(_) | SqlValue::F64(_) => "NULL".to_string(),
        SqlValue::Decimal(v) => v.to_string(),
        SqlValue::Bytes(v) => hex_literal(v),
        SqlValue::Text(text) => {
            let trimmed = text.trim();
            match trimmed.parse::<f64>() {
                Ok(n) if n.is_finite() && !trimmed.is_empty() => trimmed.to_string(),
                _ => quote_text(text, false),
            }
        }
        other => quote_text(&render(other), false),
    }
}

/// Truthiness for `bit` columns: false, zero, NaN and empty text are falsy.
fn is_truthy(value: &SqlValue) -> bool {
    match value {
        SqlValue::Null(_) => false,
        SqlValue::Bool(v) => *v,
        SqlValue::I16(v) => *v != 0,
        SqlValue::I32(v) => *v != 0,
        SqlValue::I64(v) => *v != 0,
        SqlValue::F32(v) => *v != 0.0 && !v.is_nan(),
        SqlValue::F64(v) => *v != 0.0 && !v.is_nan(),
        SqlValue::Decimal(v) => !v.is_zero(),
        SqlValue::Text(v) => !v.is_empty(),
        _ => true,
    }
}

/// Canonical text of a well-formed GUID, or `None` (logged) for anything else.
fn guid_text(value: &SqlValue) -> Option<String> {
    if let SqlValue::Uuid(u) = value {
        return Some(u.to_string());
    }

    let text = render(value);
    if text.len() == 36 && text.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        Some(text)
    } else {
        warn!("Malformed uniqueidentifier value {:?} written as NULL", text);
        None
    }
}

/// Seconds-precision UTC timestamp for temporal columns.
fn to_datetime(value: &SqlValue) -> Option<NaiveDateTime> {
    let dt = match value {
        SqlValue::DateTime(dt) => *dt,
        SqlValue::DateTimeOffset(dt) => dt.with_timezone(&Utc).naive_utc(),
        SqlValue::Date(d) => d.and_time(NaiveTime::MIN),
        SqlValue::Text(text) => parse_datetime_text(text)?,
        _ => return None,
    };
    Some(dt.with_nanosecond(0).unwrap_or(dt))
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"];

fn parse_datetime_text(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f %:z") {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }
    None
}
