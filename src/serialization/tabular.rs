// Copyright © 2024 Pathway

//! Conversion between Arrow arrays and the host tabular representation.

#![allow(clippy::cast_possible_truncation)]

use std::sync::Arc;

use arcstr::ArcStr;
use arrow::array::{
    Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Date32Array, DurationMicrosecondArray,
    Float32Array, Float64Array, GenericListArray, Int16Array, Int32Array, Int64Array, Int8Array,
    ListArray, MapArray, NullArray, OffsetSizeTrait, StringArray, StructArray,
    TimestampMicrosecondArray,
};
use arrow::buffer::{NullBuffer, OffsetBuffer};
use arrow::datatypes::{
    ArrowNativeType as _, ArrowPrimitiveType, DataType as ArrowDataType, Date32Type, Date64Type,
    DurationMicrosecondType, DurationMillisecondType, DurationNanosecondType, DurationSecondType,
    Field as ArrowField, Float16Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    Int8Type, Schema, TimeUnit, TimestampMicrosecondType, TimestampMillisecondType,
    TimestampNanosecondType, TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::record_batch::RecordBatch;
use chrono_tz::Tz;

use crate::engine::time::DateTime as _;
use crate::engine::{
    Column, DateTimeNaive, DateTimeUtc, Duration, Error, Field, Frame, Result, Series, Type, Value,
};

#[derive(Debug, Clone)]
pub struct TabularOptions {
    /// Session time zone used to localize incoming and delocalize outgoing timestamps.
    pub timezone: Option<Tz>,
    /// Reject lossy output conversions instead of truncating.
    pub safecheck: bool,
    pub assign_columns_by_name: bool,
    /// Present struct inputs as nested frames instead of series of struct values.
    pub df_for_struct: bool,
}

impl Default for TabularOptions {
    fn default() -> Self {
        Self {
            timezone: None,
            safecheck: false,
            assign_columns_by_name: true,
            df_for_struct: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TabularConverter {
    options: TabularOptions,
}

fn unit_name(unit: TimeUnit) -> &'static str {
    match unit {
        TimeUnit::Second => "s",
        TimeUnit::Millisecond => "ms",
        TimeUnit::Microsecond => "us",
        TimeUnit::Nanosecond => "ns",
    }
}

fn primitive_values<T: ArrowPrimitiveType>(
    array: &dyn Array,
    convert: impl Fn(T::Native) -> Result<Value>,
) -> Result<Vec<Value>> {
    array
        .as_primitive::<T>()
        .iter()
        .map(|value| value.map_or(Ok(Value::None), &convert))
        .collect()
}

fn raw_timestamps(array: &dyn Array, unit: TimeUnit) -> Vec<Option<i64>> {
    match unit {
        TimeUnit::Second => array.as_primitive::<TimestampSecondType>().iter().collect(),
        TimeUnit::Millisecond => array
            .as_primitive::<TimestampMillisecondType>()
            .iter()
            .collect(),
        TimeUnit::Microsecond => array
            .as_primitive::<TimestampMicrosecondType>()
            .iter()
            .collect(),
        TimeUnit::Nanosecond => array
            .as_primitive::<TimestampNanosecondType>()
            .iter()
            .collect(),
    }
}

fn raw_durations(array: &dyn Array, unit: TimeUnit) -> Vec<Option<i64>> {
    match unit {
        TimeUnit::Second => array.as_primitive::<DurationSecondType>().iter().collect(),
        TimeUnit::Millisecond => array
            .as_primitive::<DurationMillisecondType>()
            .iter()
            .collect(),
        TimeUnit::Microsecond => array
            .as_primitive::<DurationMicrosecondType>()
            .iter()
            .collect(),
        TimeUnit::Nanosecond => array
            .as_primitive::<DurationNanosecondType>()
            .iter()
            .collect(),
    }
}

fn nullable<'v, T>(
    values: &'v [Value],
    mut convert: impl FnMut(&'v Value) -> Result<T>,
) -> Result<Vec<Option<T>>> {
    values
        .iter()
        .map(|value| {
            if value.is_none() {
                Ok(None)
            } else {
                convert(value).map(Some)
            }
        })
        .collect()
}

fn null_buffer(values: &[Value]) -> Option<NullBuffer> {
    values.iter().any(Value::is_none).then(|| {
        values
            .iter()
            .map(|value| !value.is_none())
            .collect::<Vec<bool>>()
            .into()
    })
}

fn incorrect_type(value: &Value, type_: &Type) -> Error {
    Error::IncorrectType {
        value: value.clone(),
        type_: type_.clone(),
    }
}

impl TabularConverter {
    pub fn new(options: TabularOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TabularOptions {
        &self.options
    }

    pub fn batch_to_columns(&self, batch: &RecordBatch) -> Result<Vec<Column>> {
        batch
            .schema()
            .fields()
            .iter()
            .zip(batch.columns())
            .map(|(field, array)| self.array_to_column(field.name(), array.as_ref()))
            .collect()
    }

    /// Like [`Self::batch_to_columns`], but struct columns always stay series.
    pub fn batch_to_series(&self, batch: &RecordBatch) -> Result<Vec<Series>> {
        batch
            .schema()
            .fields()
            .iter()
            .zip(batch.columns())
            .map(|(field, array)| {
                Ok(Series::new(
                    field.name().as_str(),
                    self.array_to_values(array.as_ref())?,
                ))
            })
            .collect()
    }

    pub fn array_to_column(&self, name: &str, array: &dyn Array) -> Result<Column> {
        match array.data_type() {
            ArrowDataType::Struct(fields) if self.options.df_for_struct => {
                let struct_array = array.as_struct();
                let columns = fields
                    .iter()
                    .zip(struct_array.columns())
                    .map(|(field, child)| {
                        Ok(Series::new(
                            field.name().as_str(),
                            self.array_to_values(child.as_ref())?,
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Column::Frame(Frame::new(columns)?))
            }
            _ => Ok(Column::Series(Series::new(
                name,
                self.array_to_values(array)?,
            ))),
        }
    }

    fn localize(&self, timestamp: DateTimeUtc) -> Value {
        match self.options.timezone {
            Some(tz) => Value::DateTimeNaive(timestamp.to_naive_in_timezone(tz)),
            None => Value::DateTimeUtc(timestamp),
        }
    }

    #[allow(clippy::too_many_lines)]
    pub fn array_to_values(&self, array: &dyn Array) -> Result<Vec<Value>> {
        let int = |value: i64| -> Result<Value> { Ok(Value::Int(value)) };
        match array.data_type() {
            ArrowDataType::Null => Ok(vec![Value::None; array.len()]),
            ArrowDataType::Boolean => Ok(array
                .as_boolean()
                .iter()
                .map(|value| value.map_or(Value::None, Value::Bool))
                .collect()),
            ArrowDataType::Int8 => primitive_values::<Int8Type>(array, |v| int(v.into())),
            ArrowDataType::Int16 => primitive_values::<Int16Type>(array, |v| int(v.into())),
            ArrowDataType::Int32 => primitive_values::<Int32Type>(array, |v| int(v.into())),
            ArrowDataType::Int64 => primitive_values::<Int64Type>(array, int),
            ArrowDataType::UInt8 => primitive_values::<UInt8Type>(array, |v| int(v.into())),
            ArrowDataType::UInt16 => primitive_values::<UInt16Type>(array, |v| int(v.into())),
            ArrowDataType::UInt32 => primitive_values::<UInt32Type>(array, |v| int(v.into())),
            ArrowDataType::UInt64 => primitive_values::<UInt64Type>(array, |v| {
                i64::try_from(v)
                    .map(Value::Int)
                    .map_err(|_| Error::ValueError(format!("unsigned value {v} overflows Int64")))
            }),
            ArrowDataType::Float16 => {
                primitive_values::<Float16Type>(array, |v| Ok(Value::from(f64::from(v))))
            }
            ArrowDataType::Float32 => {
                primitive_values::<Float32Type>(array, |v| Ok(Value::from(f64::from(v))))
            }
            ArrowDataType::Float64 => primitive_values::<Float64Type>(array, |v| Ok(Value::from(v))),
            ArrowDataType::Utf8 => Ok(array
                .as_string::<i32>()
                .iter()
                .map(Value::from)
                .collect()),
            ArrowDataType::LargeUtf8 => Ok(array
                .as_string::<i64>()
                .iter()
                .map(Value::from)
                .collect()),
            ArrowDataType::Binary => Ok(array
                .as_binary::<i32>()
                .iter()
                .map(Value::from)
                .collect()),
            ArrowDataType::LargeBinary => Ok(array
                .as_binary::<i64>()
                .iter()
                .map(Value::from)
                .collect()),
            ArrowDataType::Date32 => primitive_values::<Date32Type>(array, |days| {
                Ok(Value::DateTimeNaive(DateTimeNaive::from_days(days)))
            }),
            ArrowDataType::Date64 => primitive_values::<Date64Type>(array, |millis| {
                DateTimeNaive::from_timestamp(millis, "ms").map(Value::DateTimeNaive)
            }),
            ArrowDataType::Timestamp(unit, tz) => raw_timestamps(array, *unit)
                .into_iter()
                .map(|raw| {
                    let Some(raw) = raw else {
                        return Ok(Value::None);
                    };
                    if tz.is_some() {
                        Ok(self.localize(DateTimeUtc::from_timestamp(raw, unit_name(*unit))?))
                    } else {
                        DateTimeNaive::from_timestamp(raw, unit_name(*unit))
                            .map(Value::DateTimeNaive)
                    }
                })
                .collect(),
            ArrowDataType::Duration(unit) => raw_durations(array, *unit)
                .into_iter()
                .map(|raw| {
                    raw.map_or(Ok(Value::None), |raw| {
                        Duration::new_with_unit(raw, unit_name(*unit)).map(Value::Duration)
                    })
                })
                .collect(),
            ArrowDataType::List(_) => self.list_values(array.as_list::<i32>()),
            ArrowDataType::LargeList(_) => self.list_values(array.as_list::<i64>()),
            ArrowDataType::Struct(fields) => {
                let struct_array = array.as_struct();
                let children = struct_array
                    .columns()
                    .iter()
                    .map(|child| self.array_to_values(child.as_ref()))
                    .collect::<Result<Vec<_>>>()?;
                let names: Vec<ArcStr> = fields
                    .iter()
                    .map(|field| ArcStr::from(field.name().as_str()))
                    .collect();
                Ok((0..struct_array.len())
                    .map(|row| {
                        if struct_array.is_null(row) {
                            return Value::None;
                        }
                        let entries: Vec<_> = names
                            .iter()
                            .zip(&children)
                            .map(|(name, child)| (name.clone(), child[row].clone()))
                            .collect();
                        Value::Struct(entries.into())
                    })
                    .collect())
            }
            ArrowDataType::Map(_, _) => {
                let map = array.as_map();
                let keys = self.array_to_values(map.keys().as_ref())?;
                let values = self.array_to_values(map.values().as_ref())?;
                Ok(map
                    .value_offsets()
                    .windows(2)
                    .enumerate()
                    .map(|(row, bounds)| {
                        if map.is_null(row) {
                            return Value::None;
                        }
                        let (begin, end) = (bounds[0].as_usize(), bounds[1].as_usize());
                        let entries: Vec<_> = keys[begin..end]
                            .iter()
                            .cloned()
                            .zip(values[begin..end].iter().cloned())
                            .collect();
                        Value::Map(entries.into())
                    })
                    .collect())
            }
            other => Err(Error::UnsupportedArrowType(other.clone())),
        }
    }

    fn list_values<O: OffsetSizeTrait>(&self, list: &GenericListArray<O>) -> Result<Vec<Value>> {
        let elements = self.array_to_values(list.values().as_ref())?;
        Ok(list
            .value_offsets()
            .windows(2)
            .enumerate()
            .map(|(row, bounds)| {
                if list.is_null(row) {
                    Value::None
                } else {
                    Value::Array(elements[bounds[0].as_usize()..bounds[1].as_usize()].into())
                }
            })
            .collect())
    }

    /// Builds one record batch whose columns are named `_0`, `_1`, ... in order.
    pub fn create_batch<'a>(
        &self,
        outputs: impl IntoIterator<Item = (&'a Column, &'a Type)>,
    ) -> Result<RecordBatch> {
        let (fields, arrays): (Vec<_>, Vec<_>) = outputs
            .into_iter()
            .enumerate()
            .map(|(index, (column, type_))| {
                let array = self.column_to_array(column, type_)?;
                let field = ArrowField::new(format!("_{index}"), array.data_type().clone(), true);
                Ok((field, array))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .unzip();
        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }

    pub fn column_to_array(&self, column: &Column, type_: &Type) -> Result<ArrayRef> {
        match (column, type_) {
            (Column::Frame(frame), Type::Struct(fields)) => self.frame_to_array(frame, fields),
            (Column::Frame(_), other) => Err(Error::ValueError(format!(
                "a frame can only be returned for a struct type, not {other}"
            ))),
            (Column::Series(series), type_) => self.values_to_array(series.values(), type_),
        }
    }

    fn frame_to_array(&self, frame: &Frame, fields: &[Field]) -> Result<ArrayRef> {
        if frame.num_columns() == 0 && frame.is_empty() {
            let columns = vec![Vec::new(); fields.len()];
            return self.struct_array(fields, &columns, None, 0);
        }
        let columns: Vec<&Series> = if self.options.assign_columns_by_name {
            fields
                .iter()
                .map(|field| {
                    frame
                        .column(&field.name)
                        .map_err(|_| Error::StructFieldMissing(field.name.clone()))
                })
                .collect::<Result<_>>()?
        } else {
            if frame.num_columns() < fields.len() {
                return Err(Error::ColumnCountMismatch {
                    expected: fields.len(),
                    actual: frame.num_columns(),
                });
            }
            frame.columns()[..fields.len()].iter().collect()
        };
        let columns: Vec<Vec<Value>> = columns
            .into_iter()
            .map(|series| series.values().to_vec())
            .collect();
        self.struct_array(fields, &columns, None, frame.num_rows())
    }

    fn struct_array(
        &self,
        fields: &[Field],
        columns: &[Vec<Value>],
        nulls: Option<NullBuffer>,
        len: usize,
    ) -> Result<ArrayRef> {
        if fields.is_empty() {
            return Ok(Arc::new(StructArray::new_empty_fields(len, nulls)));
        }
        let arrays = fields
            .iter()
            .zip(columns)
            .map(|(field, values)| self.values_to_array(values, &field.type_))
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(StructArray::try_new(
            Type::arrow_fields(fields),
            arrays,
            nulls,
        )?))
    }

    fn to_int(&self, value: &Value, type_: &Type) -> Result<i64> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            #[allow(clippy::cast_precision_loss)]
            Value::Float(f) => {
                let f = f.into_inner();
                let fits = f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64;
                if self.options.safecheck && (!fits || f.fract() != 0.0) {
                    return Err(Error::UnsafeConversion {
                        value: value.clone(),
                        type_: type_.clone(),
                    });
                }
                Ok(f as i64)
            }
            _ => Err(incorrect_type(value, type_)),
        }
    }

    fn narrow<T: TryFrom<i64>>(
        &self,
        values: &[Value],
        type_: &Type,
        wrapping: fn(i64) -> T,
    ) -> Result<Vec<Option<T>>> {
        nullable(values, |value| {
            let wide = self.to_int(value, type_)?;
            match T::try_from(wide) {
                Ok(narrow) => Ok(narrow),
                Err(_) if self.options.safecheck => Err(Error::UnsafeConversion {
                    value: value.clone(),
                    type_: type_.clone(),
                }),
                Err(_) => Ok(wrapping(wide)),
            }
        })
    }

    /// Whole microseconds of `nanos`, rejecting truncation under `safecheck`.
    fn micros(&self, nanos: (i64, i64), value: &Value, type_: &Type) -> Result<i64> {
        let (whole, remainder) = nanos;
        if remainder != 0 && self.options.safecheck {
            return Err(Error::UnsafeConversion {
                value: value.clone(),
                type_: type_.clone(),
            });
        }
        Ok(whole)
    }

    fn timestamp_micros(&self, value: &Value, type_: &Type) -> Result<i64> {
        let utc = match value {
            Value::DateTimeUtc(timestamp) => *timestamp,
            Value::DateTimeNaive(timestamp) => match self.options.timezone {
                Some(tz) => timestamp.to_utc_from_timezone(tz)?,
                None => DateTimeUtc::new(timestamp.timestamp()),
            },
            _ => return Err(incorrect_type(value, type_)),
        };
        self.micros(utc.timestamp_in_unit("us")?, value, type_)
    }

    fn naive_timestamp_micros(&self, value: &Value, type_: &Type) -> Result<i64> {
        let naive = match value {
            Value::DateTimeNaive(timestamp) => *timestamp,
            Value::DateTimeUtc(timestamp) => match self.options.timezone {
                Some(tz) => timestamp.to_naive_in_timezone(tz),
                None => DateTimeNaive::new(timestamp.timestamp()),
            },
            _ => return Err(incorrect_type(value, type_)),
        };
        self.micros(naive.timestamp_in_unit("us")?, value, type_)
    }

    #[allow(clippy::too_many_lines)]
    pub fn values_to_array(&self, values: &[Value], type_: &Type) -> Result<ArrayRef> {
        let array: ArrayRef = match type_ {
            Type::Null => {
                if let Some(value) = values.iter().find(|value| !value.is_none()) {
                    return Err(incorrect_type(value, type_));
                }
                Arc::new(NullArray::new(values.len()))
            }
            Type::Bool => Arc::new(BooleanArray::from(nullable(values, |value| match value {
                Value::Bool(b) => Ok(*b),
                _ => Err(incorrect_type(value, type_)),
            })?)),
            Type::Int8 => Arc::new(Int8Array::from(self.narrow(values, type_, |i| i as i8)?)),
            Type::Int16 => Arc::new(Int16Array::from(self.narrow(values, type_, |i| i as i16)?)),
            Type::Int32 => Arc::new(Int32Array::from(self.narrow(values, type_, |i| i as i32)?)),
            Type::Int64 => Arc::new(Int64Array::from(nullable(values, |value| {
                self.to_int(value, type_)
            })?)),
            Type::Float32 => Arc::new(Float32Array::from(nullable(values, |value| {
                value
                    .as_number()
                    .map(|f| f as f32)
                    .map_err(|_| incorrect_type(value, type_))
            })?)),
            Type::Float64 => Arc::new(Float64Array::from(nullable(values, |value| {
                value
                    .as_number()
                    .map_err(|_| incorrect_type(value, type_))
            })?)),
            Type::String => Arc::new(StringArray::from(nullable(values, |value| match value {
                Value::String(s) => Ok(s.as_str()),
                _ => Err(incorrect_type(value, type_)),
            })?)),
            Type::Bytes => Arc::new(BinaryArray::from(nullable(values, |value| match value {
                Value::Bytes(b) => Ok(&b[..]),
                Value::String(s) => Ok(s.as_bytes()),
                _ => Err(incorrect_type(value, type_)),
            })?)),
            Type::Date => Arc::new(Date32Array::from(nullable(values, |value| {
                let days = match value {
                    Value::DateTimeNaive(date) => date.days(),
                    Value::DateTimeUtc(date) => DateTimeNaive::new(date.timestamp()).days(),
                    _ => return Err(incorrect_type(value, type_)),
                };
                i32::try_from(days).map_err(|_| Error::UnsafeConversion {
                    value: value.clone(),
                    type_: type_.clone(),
                })
            })?)),
            Type::Timestamp => Arc::new(
                TimestampMicrosecondArray::from(nullable(values, |value| {
                    self.timestamp_micros(value, type_)
                })?)
                .with_timezone("UTC"),
            ),
            Type::TimestampNaive => Arc::new(TimestampMicrosecondArray::from(nullable(
                values,
                |value| self.naive_timestamp_micros(value, type_),
            )?)),
            Type::Duration => Arc::new(DurationMicrosecondArray::from(nullable(
                values,
                |value| match value {
                    Value::Duration(duration) => {
                        self.micros(duration.in_unit("us")?, value, type_)
                    }
                    _ => Err(incorrect_type(value, type_)),
                },
            )?)),
            Type::Array(element) => {
                let mut lengths = Vec::with_capacity(values.len());
                let mut flat = Vec::new();
                for value in values {
                    match value {
                        Value::None => lengths.push(0),
                        Value::Array(items) | Value::Tuple(items) => {
                            lengths.push(items.len());
                            flat.extend(items.iter().cloned());
                        }
                        _ => return Err(incorrect_type(value, type_)),
                    }
                }
                Arc::new(ListArray::try_new(
                    Arc::new(ArrowField::new_list_field(element.to_arrow(), true)),
                    OffsetBuffer::from_lengths(lengths),
                    self.values_to_array(&flat, element)?,
                    null_buffer(values),
                )?)
            }
            Type::Struct(fields) => {
                let mut columns = vec![Vec::with_capacity(values.len()); fields.len()];
                for value in values {
                    let row = self.struct_row(value, fields, type_)?;
                    for (column, cell) in columns.iter_mut().zip(row) {
                        column.push(cell);
                    }
                }
                self.struct_array(fields, &columns, null_buffer(values), values.len())?
            }
            Type::Map(key_type, value_type) => {
                let mut lengths = Vec::with_capacity(values.len());
                let mut keys = Vec::new();
                let mut items = Vec::new();
                for value in values {
                    match value {
                        Value::None => lengths.push(0),
                        Value::Map(entries) => {
                            lengths.push(entries.len());
                            for (key, item) in entries.iter() {
                                if key.is_none() {
                                    return Err(Error::ValueError(
                                        "map keys cannot be null".to_string(),
                                    ));
                                }
                                keys.push(key.clone());
                                items.push(item.clone());
                            }
                        }
                        _ => return Err(incorrect_type(value, type_)),
                    }
                }
                let entry_fields = Type::map_entry_fields(key_type, value_type);
                let entries = StructArray::try_new(
                    entry_fields.clone(),
                    vec![
                        self.values_to_array(&keys, key_type)?,
                        self.values_to_array(&items, value_type)?,
                    ],
                    None,
                )?;
                Arc::new(MapArray::try_new(
                    Arc::new(ArrowField::new(
                        "entries",
                        ArrowDataType::Struct(entry_fields),
                        false,
                    )),
                    OffsetBuffer::from_lengths(lengths),
                    entries,
                    null_buffer(values),
                    false,
                )?)
            }
        };
        Ok(array)
    }

    fn struct_row(&self, value: &Value, fields: &[Field], type_: &Type) -> Result<Vec<Value>> {
        match value {
            Value::None => Ok(vec![Value::None; fields.len()]),
            Value::Struct(entries) if self.options.assign_columns_by_name => fields
                .iter()
                .map(|field| {
                    entries
                        .iter()
                        .find(|(name, _)| name.as_str() == field.name)
                        .map(|(_, cell)| cell.clone())
                        .ok_or_else(|| Error::StructFieldMissing(field.name.clone()))
                })
                .collect(),
            Value::Struct(entries) if entries.len() == fields.len() => {
                Ok(entries.iter().map(|(_, cell)| cell.clone()).collect())
            }
            Value::Tuple(cells) if cells.len() == fields.len() => Ok(cells.to_vec()),
            _ => Err(incorrect_type(value, type_)),
        }
    }
}
