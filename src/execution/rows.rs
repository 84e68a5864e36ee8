// Copyright © 2024 Pathway

use std::io::{Read, Write};

use crate::channel::{FrameReader, FrameWriter};
use crate::engine::{DynError, Error, Result, Value};
use crate::serialization::{write_batched, ValueReader, DEFAULT_BATCH_SIZE};
use crate::udf::function::{PartitionFn, RowFn};

use super::{select, Slot};

pub(super) fn run_partition<R: Read, W: Write>(
    function: &PartitionFn,
    split_index: i32,
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<usize> {
    let items = ValueReader::new(reader).map(|item| item.map_err(DynError::from));
    let outputs = function(split_index, Box::new(items));
    write_batched(writer, outputs.map(|item| item.map_err(Error::from)), DEFAULT_BATCH_SIZE)
}

pub(super) fn run_rows<R: Read, W: Write>(
    slots: &[Slot<RowFn>],
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<usize> {
    let outputs = ValueReader::new(reader).map(|row| evaluate_row(slots, &row?));
    write_batched(writer, outputs, DEFAULT_BATCH_SIZE)
}

/// Applies every slot to one input row.
///
/// A single slot yields its value directly, several slots yield a tuple in slot order.
fn evaluate_row(slots: &[Slot<RowFn>], row: &Value) -> Result<Value> {
    let cells = row.as_tuple()?;
    let mut results = slots
        .iter()
        .map(|slot| {
            let args = select(&cells[..], &slot.arg_offsets)?;
            let value = (slot.function)(&args)?;
            Ok(slot.return_type.convert_value(value)?)
        })
        .collect::<Result<Vec<_>>>()?;
    if results.len() == 1 {
        Ok(results.remove(0))
    } else {
        Ok(Value::Tuple(results.into()))
    }
}
