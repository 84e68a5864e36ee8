// Copyright © 2024 Pathway

use std::io::{Read, Write};

use log::trace;

use crate::channel::{FrameReader, FrameWriter};
use crate::engine::{Column, Error, Result, Series, Value};
use crate::serialization::{TabularConverter, UdfStreamReader, UdfStreamWriter};
use crate::udf::function::{AggregateFn, BatchFn};
use crate::udf::WindowBound;

use super::{select, Slot, WindowSlot};

fn into_series(columns: Vec<Column>) -> Result<Vec<Series>> {
    columns.into_iter().map(Column::into_series).collect()
}

pub(super) fn run_scalar<R: Read, W: Write>(
    slots: &[Slot<BatchFn>],
    converter: &TabularConverter,
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<usize> {
    let mut output = UdfStreamWriter::new(converter, writer);
    for batch in UdfStreamReader::new(converter, reader)? {
        let (num_rows, columns) = batch?;
        let results = slots
            .iter()
            .map(|slot| {
                let args = select(&columns, &slot.arg_offsets)?;
                let result = (slot.function)(&args)?;
                if result.len() != num_rows {
                    return Err(Error::ResultLengthMismatch {
                        expected: num_rows,
                        actual: result.len(),
                    });
                }
                Ok(result)
            })
            .collect::<Result<Vec<_>>>()?;
        trace!("Evaluated {} slots over {num_rows} rows", slots.len());
        output.write_columns(results.iter().zip(slots.iter().map(|slot| &slot.return_type)))?;
    }
    output.finish()
}

pub(super) fn run_grouped_agg<R: Read, W: Write>(
    slots: &[Slot<AggregateFn>],
    converter: &TabularConverter,
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<usize> {
    let mut output = UdfStreamWriter::new(converter, writer);
    for batch in UdfStreamReader::new(converter, reader)? {
        let (_, columns) = batch?;
        let series = into_series(columns)?;
        let results = slots
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                let args = select(&series, &slot.arg_offsets)?;
                let value = (slot.function)(&args)?;
                Ok(Column::from(Series::new(format!("_{index}"), vec![value])))
            })
            .collect::<Result<Vec<_>>>()?;
        output.write_columns(results.iter().zip(slots.iter().map(|slot| &slot.return_type)))?;
    }
    output.finish()
}

pub(super) fn run_window_agg<R: Read, W: Write>(
    slots: &[WindowSlot],
    converter: &TabularConverter,
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<usize> {
    let mut output = UdfStreamWriter::new(converter, writer);
    for batch in UdfStreamReader::new(converter, reader)? {
        let (num_rows, columns) = batch?;
        let series = into_series(columns)?;
        let results = slots
            .iter()
            .enumerate()
            .map(|(index, window)| {
                let name = format!("_{index}");
                let args = select(&series, &window.slot.arg_offsets)?;
                let function = &window.slot.function;
                let result = match window.bound {
                    WindowBound::Unbounded => Series::repeat(name, &function(&args)?, num_rows),
                    WindowBound::Bounded => {
                        Series::new(name, evaluate_bounded(function, &args, num_rows)?)
                    }
                };
                Ok(Column::from(result))
            })
            .collect::<Result<Vec<_>>>()?;
        output.write_columns(
            results
                .iter()
                .zip(slots.iter().map(|window| &window.slot.return_type)),
        )?;
    }
    output.finish()
}

/// Evaluates `function` once per row over the row's own `[begin, end)` frame.
///
/// The frames are views into the partition's series.
fn evaluate_bounded(
    function: &AggregateFn,
    args: &[Series],
    num_rows: usize,
) -> Result<Vec<Value>> {
    let [begin, end, data @ ..] = args else {
        return Err(Error::ValueError(
            "bounded window functions take the frame begin and end columns first".to_string(),
        ));
    };
    (0..num_rows)
        .map(|row| {
            let frame_begin = begin.values()[row].as_int()?;
            let frame_end = end.values()[row].as_int()?;
            let (begin, end) = match (usize::try_from(frame_begin), usize::try_from(frame_end)) {
                (Ok(begin), Ok(end)) if begin <= end && end <= num_rows => (begin, end),
                _ => {
                    return Err(Error::InvalidWindowFrame {
                        row,
                        begin: frame_begin,
                        end: frame_end,
                        len: num_rows,
                    })
                }
            };
            let frames = data
                .iter()
                .map(|series| series.slice(begin, end))
                .collect::<Result<Vec<_>>>()?;
            Ok(function(&frames)?)
        })
        .collect()
}
