// Copyright © 2024 Pathway

use std::io::{Read, Write};

use log::trace;

use crate::channel::{FrameReader, FrameWriter};
use crate::engine::{Column, Error, Frame, Result, Series, Type, Value};
use crate::serialization::{CogroupReader, TabularConverter, UdfStreamReader, UdfStreamWriter};
use crate::udf::GroupOffsets;

use super::{select, CogroupedMapSlot, GroupedMapSlot};

/// One side of a group: its key values (if the group has rows) and its value columns.
struct Group {
    key: Option<Vec<Value>>,
    values: Frame,
}

impl Group {
    fn split(series: &[Series], offsets: &GroupOffsets) -> Result<Self> {
        let keys = select(series, &offsets.keys)?;
        let key = keys
            .iter()
            .map(|key| key.first().cloned())
            .collect::<Option<Vec<_>>>();
        let values = Frame::new(select(series, &offsets.values)?)?;
        Ok(Self { key, values })
    }
}

fn check_result(result: &Frame, return_type: &Type) -> Result<()> {
    let expected = return_type.struct_fields().map_or(0, <[_]>::len);
    if result.num_columns() != expected {
        return Err(Error::ColumnCountMismatch {
            expected,
            actual: result.num_columns(),
        });
    }
    Ok(())
}

pub(super) fn run_grouped_map<R: Read, W: Write>(
    slot: &GroupedMapSlot,
    converter: &TabularConverter,
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<usize> {
    let mut output = UdfStreamWriter::new(converter, writer);
    for batch in UdfStreamReader::new(converter, reader)? {
        let (num_rows, columns) = batch?;
        let series = columns
            .into_iter()
            .map(Column::into_series)
            .collect::<Result<Vec<_>>>()?;
        let group = Group::split(&series, &slot.offsets)?;
        let key = group.key.ok_or(Error::EmptyGroup)?;
        trace!("Applying grouped map to a group of {num_rows} rows");
        let result = (slot.function)(&key, group.values)?;
        check_result(&result, &slot.return_type)?;
        output.write_columns([(&Column::Frame(result), &slot.return_type)])?;
    }
    output.finish()
}

pub(super) fn run_cogrouped_map<R: Read, W: Write>(
    slot: &CogroupedMapSlot,
    converter: &TabularConverter,
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<usize> {
    let mut output = UdfStreamWriter::new(converter, writer);
    for pair in CogroupReader::new(reader) {
        let (left, right) = pair?;
        let left = Group::split(&converter.batch_to_series(&left)?, &slot.left)?;
        let right = Group::split(&converter.batch_to_series(&right)?, &slot.right)?;
        // Either side may be empty, but not both.
        let key = left
            .key
            .or(right.key)
            .ok_or(Error::EmptyGroup)?;
        let result = (slot.function)(&key, left.values, right.values)?;
        check_result(&result, &slot.return_type)?;
        output.write_columns([(&Column::Frame(result), &slot.return_type)])?;
    }
    output.finish()
}
