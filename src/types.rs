//! Type mapping between store-native column types and [`Value`].
//!
//! # Reading
//!
//! [`TypeTag::from_store_type`] picks a tag for a store type name by walking
//! [`DISPATCH`] in order and taking the first rule whose needle is a
//! case-sensitive substring of the type name. Only when no rule names the type
//! does the generic [`ScanKind`] the store reported for the column get a say
//! (`Enum8(..)` cells arrive as text, for instance). Two steps come before the
//! table:
//!
//! 1. `Nullable(..)` and `LowCardinality(..)` wrappers are peeled off.
//! 2. Composite heads are decided structurally: `Array(..)` is
//!    [`TypeTag::Array`], while `Map(..)` and `Tuple(..)` are
//!    [`TypeTag::Unknown`]. A substring test would otherwise see the element
//!    type first (`Array(UInt8)` contains `UInt8`).
//!
//! [`decode`] then turns one wire cell into a [`Value`]. Decimals decode as
//! `Float64`, which loses precision beyond 53 bits of mantissa.
//! A JSON `null` always decodes to [`Value::Null`].
//!
//! # Writing
//!
//! [`infer_tag`] is the reverse rule used when a target table does not exist
//! yet, and [`encode`] coerces a value into a known column type. Coercion
//! failures are errors; nothing is silently truncated.

use crate::error::{Result, TransferError};
use crate::value::{Column, TypeTag, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value as Json;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Dispatch table
// ============================================================================

/// Generic kind of a column's cells as reported by the store's wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScanKind {
    Integer,
    Float,
    Text,
    Boolean,
    Sequence,
    #[default]
    Unknown,
}

impl ScanKind {
    /// Kind of a single JSON cell.
    #[must_use]
    pub fn of(cell: &Json) -> Self {
        match cell {
            Json::Number(n) if n.is_f64() => Self::Float,
            Json::Number(_) => Self::Integer,
            Json::String(_) => Self::Text,
            Json::Bool(_) => Self::Boolean,
            Json::Array(_) => Self::Sequence,
            Json::Null | Json::Object(_) => Self::Unknown,
        }
    }
}

/// One entry of the ordered type dispatch table.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRule {
    pub tag: TypeTag,
    /// Substrings of the type name, any of which selects this rule.
    pub needles: &'static [&'static str],
    /// A scan kind that selects this rule when no rule names the type.
    pub scan: Option<ScanKind>,
}

impl DispatchRule {
    #[must_use]
    pub fn matches_name(&self, type_name: &str) -> bool {
        self.needles.iter().any(|n| type_name.contains(n))
    }

    #[must_use]
    pub fn matches_scan(&self, scan: ScanKind) -> bool {
        self.scan == Some(scan)
    }
}

const fn rule(tag: TypeTag, needles: &'static [&'static str]) -> DispatchRule {
    DispatchRule {
        tag,
        needles,
        scan: None,
    }
}

/// Priority-ordered dispatch from store type name to [`TypeTag`].
///
/// Unsigned widths come before signed widths because `"UInt8"` contains
/// `"Int8"`. Names are tried against every rule before any scan kind is.
/// Anything matching neither is [`TypeTag::Unknown`].
pub const DISPATCH: &[DispatchRule] = &[
    rule(TypeTag::UInt8, &["UInt8"]),
    rule(TypeTag::UInt16, &["UInt16"]),
    rule(TypeTag::UInt32, &["UInt32"]),
    rule(TypeTag::UInt64, &["UInt64"]),
    rule(TypeTag::Int8, &["Int8"]),
    rule(TypeTag::Int16, &["Int16"]),
    rule(TypeTag::Int32, &["Int32"]),
    rule(TypeTag::Int64, &["Int64"]),
    rule(TypeTag::Uuid, &["UUID"]),
    rule(TypeTag::Timestamp, &["DateTime", "Date"]),
    DispatchRule {
        tag: TypeTag::Float64,
        needles: &["Float64"],
        scan: Some(ScanKind::Float),
    },
    rule(TypeTag::Float32, &["Float32"]),
    DispatchRule {
        tag: TypeTag::String,
        needles: &["String"],
        scan: Some(ScanKind::Text),
    },
    rule(TypeTag::Array, &["Array"]),
    rule(TypeTag::Decimal, &["Decimal"]),
    rule(TypeTag::Boolean, &["Bool", "Boolean"]),
];

/// Strip `Nullable(..)` and `LowCardinality(..)` wrappers.
#[must_use]
pub fn peel_wrappers(mut type_name: &str) -> &str {
    loop {
        let trimmed = type_name.trim();
        let inner = ["Nullable(", "LowCardinality("]
            .iter()
            .find_map(|w| trimmed.strip_prefix(w))
            .and_then(|rest| rest.strip_suffix(')'));
        match inner {
            Some(inner) => type_name = inner,
            None => return trimmed,
        }
    }
}

/// Element type of an `Array(..)` type name, wrappers peeled.
#[must_use]
pub fn array_element_type(type_name: &str) -> Option<&str> {
    peel_wrappers(type_name)
        .strip_prefix("Array(")
        .and_then(|rest| rest.strip_suffix(')'))
}

impl TypeTag {
    /// Map a store type name and scan kind to a tag using [`DISPATCH`].
    #[must_use]
    pub fn from_store_type(type_name: &str, scan: ScanKind) -> Self {
        let head = peel_wrappers(type_name);
        if head.starts_with("Array(") {
            return Self::Array;
        }
        if head.starts_with("Map(") || head.starts_with("Tuple(") {
            return Self::Unknown;
        }
        DISPATCH
            .iter()
            .find(|r| r.matches_name(head))
            .or_else(|| DISPATCH.iter().find(|r| r.matches_scan(scan)))
            .map_or(Self::Unknown, |r| r.tag)
    }
}

impl Column {
    /// Describe a column from store metadata.
    pub fn from_store(name: impl Into<String>, store_type: impl Into<String>, scan: ScanKind) -> Self {
        let store_type = store_type.into();
        Self {
            name: name.into(),
            tag: TypeTag::from_store_type(&store_type, scan),
            store_type,
        }
    }
}

// ============================================================================
// Decoding (store -> Value)
// ============================================================================

/// Decode one wire cell for `column`.
///
/// # Errors
///
/// Returns [`TransferError::Coercion`] if a non-null cell cannot be read as
/// the column's tag.
pub fn decode(column: &Column, cell: &Json) -> Result<Value> {
    if cell.is_null() {
        return Ok(Value::Null);
    }
    let decoded = match column.tag {
        TypeTag::UInt8 => integer_cell(cell).map(Value::UInt8),
        TypeTag::UInt16 => integer_cell(cell).map(Value::UInt16),
        TypeTag::UInt32 => integer_cell(cell).map(Value::UInt32),
        TypeTag::UInt64 => integer_cell(cell).map(Value::UInt64),
        TypeTag::Int8 => integer_cell(cell).map(Value::Int8),
        TypeTag::Int16 => integer_cell(cell).map(Value::Int16),
        TypeTag::Int32 => integer_cell(cell).map(Value::Int32),
        TypeTag::Int64 => integer_cell(cell).map(Value::Int64),
        TypeTag::Float64 | TypeTag::Decimal => float_cell(cell).map(Value::Float64),
        #[allow(clippy::cast_possible_truncation)]
        TypeTag::Float32 => float_cell(cell).map(|f| Value::Float32(f as f32)),
        TypeTag::String | TypeTag::Unknown => Some(Value::String(text_cell(cell))),
        TypeTag::Boolean => bool_cell(cell).map(Value::Bool),
        TypeTag::Timestamp => timestamp_cell(cell).map(Value::Timestamp),
        TypeTag::Uuid => cell.as_str().and_then(|s| Uuid::parse_str(s).ok()).map(Value::Uuid),
        TypeTag::Array => return decode_array(column, cell),
    };
    decoded.ok_or_else(|| TransferError::Coercion {
        column: column.name.clone(),
        expected: column.store_type.clone(),
        found: cell.to_string(),
    })
}

fn decode_array(column: &Column, cell: &Json) -> Result<Value> {
    let Json::Array(items) = cell else {
        return Err(TransferError::Coercion {
            column: column.name.clone(),
            expected: column.store_type.clone(),
            found: cell.to_string(),
        });
    };
    let element = Column::from_store(
        column.name.clone(),
        array_element_type(&column.store_type).unwrap_or("String"),
        ScanKind::Unknown,
    );
    items
        .iter()
        .map(|item| decode(&element, item))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

fn integer_cell<T: TryFrom<i128> + FromStr>(cell: &Json) -> Option<T> {
    match cell {
        Json::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .and_then(|v| T::try_from(v).ok()),
        Json::String(s) => s.trim().parse().ok(),
        Json::Bool(b) => T::try_from(i128::from(*b)).ok(),
        _ => None,
    }
}

fn float_cell(cell: &Json) -> Option<f64> {
    match cell {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bool_cell(cell: &Json) -> Option<bool> {
    match cell {
        Json::Bool(b) => Some(*b),
        Json::Number(n) => match n.as_u64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Json::String(s) => parse_bool(s),
        _ => None,
    }
}

fn text_cell(cell: &Json) -> String {
    match cell {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn timestamp_cell(cell: &Json) -> Option<NaiveDateTime> {
    match cell {
        Json::String(s) => parse_timestamp(s),
        Json::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.naive_utc()),
        _ => None,
    }
}

/// Parse the date and date-time spellings the store emits.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "true" | "TRUE" | "True" | "1" => Some(true),
        "false" | "FALSE" | "False" | "0" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Encoding (Value -> store)
// ============================================================================

/// Tag a new column would get from its first non-null sample.
///
/// Signed integers widen to `Int64`, unsigned to `UInt64`, floats to
/// `Float64`. Booleans become `UInt8` since the store has no native boolean.
/// Returns `None` for [`Value::Null`].
#[must_use]
pub const fn infer_tag(value: &Value) -> Option<TypeTag> {
    Some(match value {
        Value::Null => return None,
        Value::Int8(_) | Value::Int16(_) | Value::Int32(_) | Value::Int64(_) => TypeTag::Int64,
        Value::UInt8(_) | Value::UInt16(_) | Value::UInt32(_) | Value::UInt64(_) => TypeTag::UInt64,
        Value::Float32(_) | Value::Float64(_) => TypeTag::Float64,
        Value::Bool(_) => TypeTag::UInt8,
        Value::Timestamp(_) => TypeTag::Timestamp,
        Value::Array(_) => TypeTag::Array,
        Value::String(_) | Value::Uuid(_) => TypeTag::String,
    })
}

/// Coerce `value` into the wire representation of `column`.
///
/// Text is parsed when the column is numeric, boolean, temporal, or a UUID,
/// since flat-file sources carry only strings. Integers are range-checked.
///
/// # Errors
///
/// Returns [`TransferError::Coercion`] if `value` is not representable as the
/// column's type.
pub fn encode(value: &Value, column: &Column) -> Result<Json> {
    if value.is_null() {
        return Ok(Json::Null);
    }
    let encoded = match column.tag {
        tag if tag.is_signed() || tag.is_unsigned() => encode_integer(value, tag),
        TypeTag::Float32 | TypeTag::Float64 | TypeTag::Decimal => encode_float(value),
        TypeTag::String | TypeTag::Unknown => Some(Json::String(value.to_string())),
        TypeTag::Boolean => match value {
            Value::Bool(b) => Some(Json::Bool(*b)),
            Value::String(s) => parse_bool(s).map(Json::Bool),
            other => match other.as_i128() {
                Some(0) => Some(Json::Bool(false)),
                Some(1) => Some(Json::Bool(true)),
                _ => None,
            },
        },
        TypeTag::Timestamp => match value {
            Value::Timestamp(ts) => Some(*ts),
            Value::String(s) => parse_timestamp(s),
            _ => None,
        }
        .map(|ts| Json::String(ts.format("%Y-%m-%d %H:%M:%S").to_string())),
        TypeTag::Uuid => match value {
            Value::Uuid(u) => Some(*u),
            Value::String(s) => Uuid::parse_str(s.trim()).ok(),
            _ => None,
        }
        .map(|u| Json::String(u.to_string())),
        TypeTag::Array => return encode_array(value, column),
        _ => None,
    };
    encoded.ok_or_else(|| coercion(value, column))
}

fn encode_array(value: &Value, column: &Column) -> Result<Json> {
    let items = match value {
        Value::Array(items) => items.clone(),
        Value::String(s) => match serde_json::from_str::<Json>(s) {
            Ok(Json::Array(raw)) => raw
                .iter()
                .map(|cell| match cell {
                    Json::String(s) => Value::String(s.clone()),
                    Json::Null => Value::Null,
                    other => Value::String(other.to_string()),
                })
                .collect(),
            _ => return Err(coercion(value, column)),
        },
        _ => return Err(coercion(value, column)),
    };
    let element = Column::from_store(
        column.name.clone(),
        array_element_type(&column.store_type).unwrap_or("String"),
        ScanKind::Unknown,
    );
    items
        .iter()
        .map(|item| encode(item, &element))
        .collect::<Result<Vec<_>>>()
        .map(Json::Array)
}

const fn integer_bounds(tag: TypeTag) -> (i128, i128) {
    match tag {
        TypeTag::UInt8 => (0, u8::MAX as i128),
        TypeTag::UInt16 => (0, u16::MAX as i128),
        TypeTag::UInt32 => (0, u32::MAX as i128),
        TypeTag::UInt64 => (0, u64::MAX as i128),
        TypeTag::Int8 => (i8::MIN as i128, i8::MAX as i128),
        TypeTag::Int16 => (i16::MIN as i128, i16::MAX as i128),
        TypeTag::Int32 => (i32::MIN as i128, i32::MAX as i128),
        _ => (i64::MIN as i128, i64::MAX as i128),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn encode_integer(value: &Value, tag: TypeTag) -> Option<Json> {
    let wide = match value {
        Value::Bool(b) => Some(i128::from(*b)),
        Value::String(s) => s.trim().parse::<i128>().ok(),
        Value::Float32(f) if f.fract() == 0.0 => Some(*f as i128),
        Value::Float64(f) if f.fract() == 0.0 && f.abs() < i128::MAX as f64 => Some(*f as i128),
        other => other.as_i128(),
    }?;
    let (lo, hi) = integer_bounds(tag);
    if wide < lo || wide > hi {
        return None;
    }
    if tag.is_unsigned() {
        u64::try_from(wide).ok().map(Json::from)
    } else {
        i64::try_from(wide).ok().map(Json::from)
    }
}

#[allow(clippy::cast_precision_loss)]
fn encode_float(value: &Value) -> Option<Json> {
    let f = match value {
        Value::Float32(f) => f64::from(*f),
        Value::Float64(f) => *f,
        Value::String(s) => s.trim().parse().ok()?,
        other => other.as_i128()? as f64,
    };
    Some(serde_json::Number::from_f64(f).map_or_else(
        || {
            let text = if f.is_nan() {
                "nan"
            } else if f.is_sign_negative() {
                "-inf"
            } else {
                "inf"
            };
            Json::String(text.to_string())
        },
        Json::Number,
    ))
}

fn coercion(value: &Value, column: &Column) -> TransferError {
    TransferError::Coercion {
        column: column.name.clone(),
        expected: column.store_type.clone(),
        found: value.describe(),
    }
}
