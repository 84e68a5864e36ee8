// Copyright © 2024 Pathway

use std::fmt::{self, Display};
use std::mem::{align_of, size_of};
use std::sync::Arc;

use arcstr::ArcStr;
use arrow::datatypes::{
    DataType as ArrowDataType, Field as ArrowField, Fields as ArrowFields, TimeUnit as ArrowTimeUnit,
};
use itertools::Itertools as _;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use super::error::{DynError, DynResult, Error};
use super::time::{DateTimeNaive, DateTimeUtc, Duration};

/// Row-level value handed to and returned from user functions.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    String(ArcStr),
    Bytes(Arc<[u8]>),
    Tuple(Arc<[Self]>),
    Array(Arc<[Self]>),
    Struct(Arc<[(ArcStr, Self)]>),
    Map(Arc<[(Self, Self)]>),
    DateTimeNaive(DateTimeNaive),
    DateTimeUtc(DateTimeUtc),
    Duration(Duration),
}

const _: () = assert!(align_of::<Value>() <= 16);
const _: () = assert!(size_of::<Value>() <= 32);

impl Value {
    #[inline(never)]
    #[cold]
    fn type_mismatch(&self, expected: &'static str) -> DynError {
        DynError::from(Error::TypeMismatch {
            expected,
            value: self.clone(),
        })
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn as_int(&self) -> DynResult<i64> {
        if let Self::Int(i) = self {
            Ok(*i)
        } else {
            Err(self.type_mismatch("integer"))
        }
    }

    pub fn as_bool(&self) -> DynResult<bool> {
        if let Self::Bool(b) = self {
            Ok(*b)
        } else {
            Err(self.type_mismatch("bool"))
        }
    }

    pub fn as_float(&self) -> DynResult<f64> {
        if let Self::Float(f) = self {
            Ok(f.into_inner())
        } else {
            Err(self.type_mismatch("float"))
        }
    }

    /// Numeric view that accepts both integers and floats.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_number(&self) -> DynResult<f64> {
        match self {
            Self::Int(i) => Ok(*i as f64),
            Self::Float(f) => Ok(f.into_inner()),
            _ => Err(self.type_mismatch("number")),
        }
    }

    pub fn as_string(&self) -> DynResult<&ArcStr> {
        if let Self::String(s) = self {
            Ok(s)
        } else {
            Err(self.type_mismatch("string"))
        }
    }

    pub fn as_tuple(&self) -> DynResult<&Arc<[Self]>> {
        if let Self::Tuple(t) = self {
            Ok(t)
        } else {
            Err(self.type_mismatch("tuple"))
        }
    }

    pub fn as_array(&self) -> DynResult<&Arc<[Self]>> {
        if let Self::Array(a) = self {
            Ok(a)
        } else {
            Err(self.type_mismatch("array"))
        }
    }

    pub fn as_struct(&self) -> DynResult<&Arc<[(ArcStr, Self)]>> {
        if let Self::Struct(fields) = self {
            Ok(fields)
        } else {
            Err(self.type_mismatch("struct"))
        }
    }

    pub fn as_date_time_naive(&self) -> DynResult<DateTimeNaive> {
        if let Self::DateTimeNaive(dt) = self {
            Ok(*dt)
        } else {
            Err(self.type_mismatch("DateTimeNaive"))
        }
    }

    pub fn as_date_time_utc(&self) -> DynResult<DateTimeUtc> {
        if let Self::DateTimeUtc(dt) = self {
            Ok(*dt)
        } else {
            Err(self.type_mismatch("DateTimeUtc"))
        }
    }

    pub fn as_duration(&self) -> DynResult<Duration> {
        if let Self::Duration(d) = self {
            Ok(*d)
        } else {
            Err(self.type_mismatch("Duration"))
        }
    }

    /// Adds two values of compatible kinds, as used for accumulator deltas.
    #[allow(clippy::cast_precision_loss)]
    pub fn try_add(&self, other: &Self) -> DynResult<Self> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a
                .checked_add(*b)
                .map(Self::Int)
                .ok_or_else(|| Error::ValueError(format!("integer overflow in {a} + {b}")).into()),
            (Self::Float(a), Self::Float(b)) => Ok(Self::from(a.into_inner() + b.into_inner())),
            (Self::Int(a), Self::Float(b)) => Ok(Self::from(*a as f64 + b.into_inner())),
            (Self::Float(a), Self::Int(b)) => Ok(Self::from(a.into_inner() + *b as f64)),
            (Self::Duration(a), Self::Duration(b)) => a
                .checked_add(*b)
                .map(Self::Duration)
                .ok_or_else(|| Error::ValueError(format!("duration overflow in {a} + {b}")).into()),
            (Self::None, value) | (value, Self::None) => Ok(value.clone()),
            (_, value) => Err(self.type_mismatch_with(value)),
        }
    }

    #[cold]
    fn type_mismatch_with(&self, other: &Self) -> DynError {
        DynError::from(Error::ValueError(format!("cannot add {other} to {self}")))
    }
}

impl Display for Value {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::None => write!(fmt, "None"),
            Self::Bool(b) => write!(fmt, "{}", if *b { "True" } else { "False" }),
            Self::Int(i) => write!(fmt, "{i}"),
            Self::Float(OrderedFloat(f)) => write!(fmt, "{f:?}"),
            Self::String(s) => write!(fmt, "{s:?}"),
            Self::Bytes(b) => write!(fmt, "{b:?}"),
            Self::Tuple(vals) => write!(fmt, "({})", vals.iter().format(", ")),
            Self::Array(vals) => write!(fmt, "[{}]", vals.iter().format(", ")),
            Self::Struct(fields) => write!(
                fmt,
                "{{{}}}",
                fields
                    .iter()
                    .format_with(", ", |(name, value), f| f(&format_args!("{name}: {value}")))
            ),
            Self::Map(entries) => write!(
                fmt,
                "{{{}}}",
                entries
                    .iter()
                    .format_with(", ", |(key, value), f| f(&format_args!("{key} => {value}")))
            ),
            Self::DateTimeNaive(date_time) => write!(fmt, "{date_time}"),
            Self::DateTimeUtc(date_time) => write!(fmt, "{date_time}"),
            Self::Duration(duration) => write!(fmt, "{duration}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(OrderedFloat(f))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<ArcStr> for Value {
    fn from(s: ArcStr) -> Self {
        Self::String(s)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.into())
    }
}

impl From<&[Value]> for Value {
    fn from(t: &[Value]) -> Self {
        Self::Tuple(t.into())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(o: Option<T>) -> Self {
        match o {
            None => Self::None,
            Some(v) => v.into(),
        }
    }
}

impl From<DateTimeNaive> for Value {
    fn from(dt: DateTimeNaive) -> Self {
        Self::DateTimeNaive(dt)
    }
}

impl From<DateTimeUtc> for Value {
    fn from(dt: DateTimeUtc) -> Self {
        Self::DateTimeUtc(dt)
    }
}

impl From<Duration> for Value {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Declared output type of a UDF slot. Every type is nullable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Null,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
    Date,
    /// Timezone-aware, stored as UTC.
    Timestamp,
    /// Wall-clock time without a timezone.
    TimestampNaive,
    Duration,
    Array(Arc<Type>),
    Struct(Arc<[Field]>),
    Map(Arc<Type>, Arc<Type>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub type_: Type,
}

impl Field {
    pub fn new(name: impl Into<String>, type_: Type) -> Self {
        Self {
            name: name.into(),
            type_,
        }
    }
}

impl Type {
    pub fn struct_of(fields: impl IntoIterator<Item = Field>) -> Self {
        Self::Struct(fields.into_iter().collect())
    }

    pub fn array_of(element: Type) -> Self {
        Self::Array(Arc::new(element))
    }

    pub fn struct_fields(&self) -> Option<&[Field]> {
        if let Self::Struct(fields) = self {
            Some(fields)
        } else {
            None
        }
    }

    pub fn to_arrow(&self) -> ArrowDataType {
        match self {
            Self::Null => ArrowDataType::Null,
            Self::Bool => ArrowDataType::Boolean,
            Self::Int8 => ArrowDataType::Int8,
            Self::Int16 => ArrowDataType::Int16,
            Self::Int32 => ArrowDataType::Int32,
            Self::Int64 => ArrowDataType::Int64,
            Self::Float32 => ArrowDataType::Float32,
            Self::Float64 => ArrowDataType::Float64,
            Self::String => ArrowDataType::Utf8,
            Self::Bytes => ArrowDataType::Binary,
            Self::Date => ArrowDataType::Date32,
            Self::Timestamp => {
                ArrowDataType::Timestamp(ArrowTimeUnit::Microsecond, Some("UTC".into()))
            }
            Self::TimestampNaive => ArrowDataType::Timestamp(ArrowTimeUnit::Microsecond, None),
            Self::Duration => ArrowDataType::Duration(ArrowTimeUnit::Microsecond),
            Self::Array(element) => {
                ArrowDataType::List(Arc::new(ArrowField::new_list_field(element.to_arrow(), true)))
            }
            Self::Struct(fields) => ArrowDataType::Struct(Self::arrow_fields(fields)),
            Self::Map(key, value) => ArrowDataType::Map(
                Arc::new(ArrowField::new(
                    "entries",
                    ArrowDataType::Struct(Self::map_entry_fields(key, value)),
                    false,
                )),
                false,
            ),
        }
    }

    pub fn arrow_fields(fields: &[Field]) -> ArrowFields {
        fields
            .iter()
            .map(|field| ArrowField::new(&field.name, field.type_.to_arrow(), true))
            .collect()
    }

    pub fn map_entry_fields(key: &Type, value: &Type) -> ArrowFields {
        ArrowFields::from(vec![
            ArrowField::new("key", key.to_arrow(), false),
            ArrowField::new("value", value.to_arrow(), true),
        ])
    }

    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::None) => true,
            (Self::Bool, Value::Bool(_))
            | (Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64, Value::Int(_))
            | (Self::Float32 | Self::Float64, Value::Float(_))
            | (Self::String, Value::String(_))
            | (Self::Bytes, Value::Bytes(_))
            | (Self::Date, Value::DateTimeNaive(_))
            | (Self::Timestamp, Value::DateTimeNaive(_) | Value::DateTimeUtc(_))
            | (Self::TimestampNaive, Value::DateTimeNaive(_))
            | (Self::Duration, Value::Duration(_)) => true,
            (Self::Array(element), Value::Array(values)) => {
                values.iter().all(|value| element.matches(value))
            }
            (Self::Struct(fields), Value::Struct(values)) => {
                fields.len() == values.len()
                    && fields
                        .iter()
                        .zip(values.iter())
                        .all(|(field, (_, value))| field.type_.matches(value))
            }
            (Self::Map(key, value), Value::Map(entries)) => entries
                .iter()
                .all(|(k, v)| key.matches(k) && value.matches(v)),
            _ => false,
        }
    }

    /// Converts a value returned by a row function into the declared type.
    #[allow(clippy::cast_precision_loss)]
    pub fn convert_value(&self, value: Value) -> DynResult<Value> {
        if self.matches(&value) {
            return Ok(value);
        }
        match (value, self) {
            (Value::Int(i), Self::Float32 | Self::Float64) => Ok(Value::from(i as f64)),
            (Value::Tuple(values), Self::Array(element)) => {
                let converted: Vec<_> = values
                    .iter()
                    .map(|value| element.convert_value(value.clone()))
                    .try_collect()?;
                Ok(Value::Array(converted.into()))
            }
            (Value::Tuple(values), Self::Struct(fields)) if values.len() == fields.len() => {
                let converted: Vec<_> = fields
                    .iter()
                    .zip(values.iter())
                    .map(|(field, value)| {
                        field
                            .type_
                            .convert_value(value.clone())
                            .map(|value| (ArcStr::from(field.name.as_str()), value))
                    })
                    .try_collect()?;
                Ok(Value::Struct(converted.into()))
            }
            (value, _) => Err(Error::IncorrectType {
                value,
                type_: self.clone(),
            }
            .into()),
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array(element) => write!(f, "Array[{element}]"),
            Self::Struct(fields) => write!(
                f,
                "Struct[{}]",
                fields
                    .iter()
                    .format_with(", ", |field, f| f(&format_args!(
                        "{}: {}",
                        field.name, field.type_
                    )))
            ),
            Self::Map(key, value) => write!(f, "Map[{key}, {value}]"),
            other => write!(f, "{other:?}"),
        }
    }
}
