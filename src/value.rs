//! Source-independent cell, row, and table representations.
//!
//! - [`Value`] is a tagged cell value. Store reads decode into it, file reads
//!   produce [`Value::String`], and writers encode out of it.
//! - [`TypeTag`] is the closed set of column kinds both directions agree on.
//! - [`Row`] keeps `(column, value)` pairs in a fixed order. Column order is a
//!   property of the data, not of a hash map's iteration order, so inferred
//!   schemas and default CSV headers are reproducible.
//! - [`TableDescriptor`] is an immutable, name-unique column list.

use crate::error::{Result, TransferError};
use chrono::NaiveDateTime;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// TypeTag
// ============================================================================

/// Closed enumeration of column kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Boolean,
    Timestamp,
    Uuid,
    Array,
    Decimal,
    /// Anything the store reports that no other tag covers; read as text.
    Unknown,
}

impl TypeTag {
    /// Canonical store DDL type for a column created with this tag.
    #[must_use]
    pub const fn store_type(self) -> &'static str {
        match self {
            Self::UInt8 => "UInt8",
            Self::UInt16 => "UInt16",
            Self::UInt32 => "UInt32",
            Self::UInt64 => "UInt64",
            Self::Int8 => "Int8",
            Self::Int16 => "Int16",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
            Self::String | Self::Unknown => "String",
            Self::Boolean => "Bool",
            Self::Timestamp => "DateTime",
            Self::Uuid => "UUID",
            Self::Array => "Array(String)",
            Self::Decimal => "Decimal(38, 10)",
        }
    }

    #[must_use]
    pub const fn is_unsigned(self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64 | Self::Decimal)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// Value
// ============================================================================

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bool(bool),
    Timestamp(NaiveDateTime),
    Uuid(Uuid),
    Array(Vec<Value>),
}

impl Value {
    /// The tag this value carries, or `None` for [`Value::Null`].
    #[must_use]
    pub const fn tag(&self) -> Option<TypeTag> {
        Some(match self {
            Self::Null => return None,
            Self::UInt8(_) => TypeTag::UInt8,
            Self::UInt16(_) => TypeTag::UInt16,
            Self::UInt32(_) => TypeTag::UInt32,
            Self::UInt64(_) => TypeTag::UInt64,
            Self::Int8(_) => TypeTag::Int8,
            Self::Int16(_) => TypeTag::Int16,
            Self::Int32(_) => TypeTag::Int32,
            Self::Int64(_) => TypeTag::Int64,
            Self::Float32(_) => TypeTag::Float32,
            Self::Float64(_) => TypeTag::Float64,
            Self::String(_) => TypeTag::String,
            Self::Bool(_) => TypeTag::Boolean,
            Self::Timestamp(_) => TypeTag::Timestamp,
            Self::Uuid(_) => TypeTag::Uuid,
            Self::Array(_) => TypeTag::Array,
        })
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Widen any integer variant to `i128`.
    #[must_use]
    pub const fn as_i128(&self) -> Option<i128> {
        Some(match *self {
            Self::UInt8(v) => v as i128,
            Self::UInt16(v) => v as i128,
            Self::UInt32(v) => v as i128,
            Self::UInt64(v) => v as i128,
            Self::Int8(v) => v as i128,
            Self::Int16(v) => v as i128,
            Self::Int32(v) => v as i128,
            Self::Int64(v) => v as i128,
            _ => return None,
        })
    }

    /// Short description used in coercion errors.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::String(s) => format!("String({s:?})"),
            other => format!("{:?}({other})", other.tag().unwrap_or(TypeTag::Unknown)),
        }
    }

    /// Render as a JSON value, without reference to any column type.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Self::Null => J::Null,
            Self::UInt8(v) => J::from(*v),
            Self::UInt16(v) => J::from(*v),
            Self::UInt32(v) => J::from(*v),
            Self::UInt64(v) => J::from(*v),
            Self::Int8(v) => J::from(*v),
            Self::Int16(v) => J::from(*v),
            Self::Int32(v) => J::from(*v),
            Self::Int64(v) => J::from(*v),
            Self::Float32(v) => serde_json::Number::from_f64(f64::from(*v)).map_or(J::Null, J::Number),
            Self::Float64(v) => serde_json::Number::from_f64(*v).map_or(J::Null, J::Number),
            Self::String(s) => J::String(s.clone()),
            Self::Bool(b) => J::Bool(*b),
            Self::Timestamp(ts) => J::String(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
            Self::Uuid(u) => J::String(u.to_string()),
            Self::Array(items) => J::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

/// Default textual conversion used when writing flat files.
///
/// `Null` renders as an empty string. Arrays render as JSON array text.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::UInt8(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Int8(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Array(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::UInt8(v) => serializer.serialize_u8(*v),
            Self::UInt16(v) => serializer.serialize_u16(*v),
            Self::UInt32(v) => serializer.serialize_u32(*v),
            Self::UInt64(v) => serializer.serialize_u64(*v),
            Self::Int8(v) => serializer.serialize_i8(*v),
            Self::Int16(v) => serializer.serialize_i16(*v),
            Self::Int32(v) => serializer.serialize_i32(*v),
            Self::Int64(v) => serializer.serialize_i64(*v),
            Self::Float32(v) => serializer.serialize_f32(*v),
            Self::Float64(v) => serializer.serialize_f64(*v),
            Self::String(s) => serializer.serialize_str(s),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Timestamp(_) | Self::Uuid(_) => serializer.collect_str(self),
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

macro_rules! impl_value_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_value_from!(
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    String => String,
    bool => Bool,
    NaiveDateTime => Timestamp,
    Uuid => Uuid,
    Vec<Value> => Array,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ============================================================================
// Row
// ============================================================================

/// An ordered list of `(column, value)` pairs with unique column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, Value)>,
}

impl Row {
    #[must_use]
    pub const fn new() -> Self {
        Self { cells: Vec::new() }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cells: Vec::with_capacity(capacity),
        }
    }

    /// Set `column` to `value`. An existing column keeps its position.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.cells.push((column, value)),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find_map(|(name, value)| (name == column).then_some(value))
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Column names in row order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.cells.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value))
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Self::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.cells.into_iter()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, value) in &self.cells {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

// ============================================================================
// Column & TableDescriptor
// ============================================================================

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub tag: TypeTag,
    /// Store-native type text, e.g. `Nullable(Int32)`.
    pub store_type: String,
}

impl Column {
    /// A column whose store type is the canonical type for `tag`.
    pub fn new(name: impl Into<String>, tag: TypeTag) -> Self {
        Self {
            name: name.into(),
            tag,
            store_type: tag.store_type().to_string(),
        }
    }
}

/// An immutable table description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    name: String,
    columns: Vec<Column>,
}

impl TableDescriptor {
    /// Build a descriptor, rejecting duplicate column names.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Validation`] if two columns share a name.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Result<Self> {
        let name = name.into();
        let mut seen = HashSet::with_capacity(columns.len());
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(TransferError::Validation(format!(
                    "duplicate column {} in table {name}",
                    col.name
                )));
            }
        }
        Ok(Self { name, columns })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    #[must_use]
    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_keeps_insertion_order_and_replaces_in_place() {
        let mut row = Row::new().with("b", 1i64).with("a", "x");
        row.insert("b", 2i64);
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(row.get("b"), Some(&Value::Int64(2)));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn display_is_flat_file_text() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Int64(-4).to_string(), "-4");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(
            Value::Array(vec![Value::from("a"), Value::from(2u8)]).to_string(),
            r#"["a",2]"#
        );
    }

    #[test]
    fn descriptor_rejects_duplicate_names() {
        let cols = vec![
            Column::new("id", TypeTag::Int64),
            Column::new("id", TypeTag::String),
        ];
        assert!(TableDescriptor::new("t", cols).is_err());
    }

    #[test]
    fn row_serializes_as_ordered_map() {
        let row = Row::new().with("z", 1u8).with("a", Value::Null);
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"z":1,"a":null}"#);
    }
}
