// Copyright © 2024 Pathway

//! Iterator modes: the user function pulls argument batches lazily and yields
//! result columns, all on the session thread.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::rc::Rc;

use log::debug;

use crate::channel::{FrameReader, FrameWriter};
use crate::engine::{Column, DynError, DynResult, Error, Result};
use crate::serialization::{TabularConverter, UdfStreamReader, UdfStreamWriter};
use crate::udf::function::BatchIterFn;
use crate::udf::RowCountPolicy;

use super::{select, Slot};

/// Input bookkeeping shared between the session loop and the batches handed
/// to the user function.
struct InputState<'a, R: Read> {
    source: UdfStreamReader<'a, R>,
    arg_offsets: Vec<usize>,
    consumed_rows: usize,
    pending_lengths: VecDeque<usize>,
}

impl<R: Read> InputState<'_, R> {
    fn pull(&mut self) -> Option<Result<Vec<Column>>> {
        let (num_rows, columns) = match self.source.next()? {
            Ok(batch) => batch,
            Err(error) => return Some(Err(error)),
        };
        self.consumed_rows += num_rows;
        self.pending_lengths.push_back(num_rows);
        Some(select(&columns, &self.arg_offsets))
    }
}

struct SharedInput<'a, R: Read>(Rc<RefCell<InputState<'a, R>>>);

impl<R: Read> Iterator for SharedInput<'_, R> {
    type Item = DynResult<Vec<Column>>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.0.borrow_mut().pull()?;
        Some(batch.map_err(DynError::from))
    }
}

#[derive(Debug, Clone, Copy)]
enum Contract {
    /// Every result matches its input batch and the input is consumed entirely.
    Scalar,
    Map(RowCountPolicy),
}

pub(super) fn run_scalar_iter<R: Read, W: Write>(
    slot: &Slot<BatchIterFn>,
    converter: &TabularConverter,
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<usize> {
    run_iter(slot, Contract::Scalar, converter, reader, writer)
}

pub(super) fn run_map_iter<R: Read, W: Write>(
    slot: &Slot<BatchIterFn>,
    policy: RowCountPolicy,
    converter: &TabularConverter,
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<usize> {
    run_iter(slot, Contract::Map(policy), converter, reader, writer)
}

fn run_iter<R: Read, W: Write>(
    slot: &Slot<BatchIterFn>,
    contract: Contract,
    converter: &TabularConverter,
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<usize> {
    let state = Rc::new(RefCell::new(InputState {
        source: UdfStreamReader::new(converter, reader)?,
        arg_offsets: slot.arg_offsets.clone(),
        consumed_rows: 0,
        pending_lengths: VecDeque::new(),
    }));
    let mut output = UdfStreamWriter::new(converter, writer);
    let mut produced_rows = 0;
    for result in (slot.function)(Box::new(SharedInput(Rc::clone(&state)))) {
        let column = result?;
        produced_rows += column.len();
        let mut input = state.borrow_mut();
        match contract {
            Contract::Scalar => match input.pending_lengths.pop_front() {
                Some(expected) if expected == column.len() => {}
                Some(expected) => {
                    return Err(Error::ResultLengthMismatch {
                        expected,
                        actual: column.len(),
                    })
                }
                None => {
                    return Err(Error::TooManyOutputRows {
                        input: input.consumed_rows,
                        output: produced_rows,
                    })
                }
            },
            Contract::Map(RowCountPolicy::Unconstrained) => {}
            Contract::Map(RowCountPolicy::Ceiling | RowCountPolicy::ExactTotal) => {
                if produced_rows > input.consumed_rows {
                    return Err(Error::TooManyOutputRows {
                        input: input.consumed_rows,
                        output: produced_rows,
                    });
                }
            }
        }
        drop(input);
        output.write_columns([(&column, &slot.return_type)])?;
    }
    let written = output.finish()?;

    let mut input = state.borrow_mut();
    match contract {
        Contract::Scalar => {
            if input.pull().transpose()?.is_some() {
                return Err(Error::InputNotExhausted);
            }
            if produced_rows != input.consumed_rows {
                return Err(Error::TotalRowCountMismatch {
                    input: input.consumed_rows,
                    output: produced_rows,
                });
            }
        }
        Contract::Map(policy) => {
            let mut skipped = 0;
            while input.pull().transpose()?.is_some() {
                skipped += 1;
            }
            if skipped > 0 {
                debug!("Skipped {skipped} input batches not pulled by the batch map function");
            }
            if policy == RowCountPolicy::ExactTotal && produced_rows != input.consumed_rows {
                return Err(Error::TotalRowCountMismatch {
                    input: input.consumed_rows,
                    output: produced_rows,
                });
            }
        }
    }
    Ok(written)
}
