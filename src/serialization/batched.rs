// Copyright © 2024 Pathway

//! Row-oriented framing: every data frame holds a `bincode`-encoded batch of values.

use std::collections::VecDeque;
use std::io::{Read, Write};

use log::trace;

use crate::channel::{Frame, FrameReader, FrameWriter, SpecialLength};
use crate::engine::{Error, Result, Value};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Lazily decodes items until an end-of-data-section control frame.
pub struct ValueReader<'a, R: Read> {
    reader: &'a mut FrameReader<R>,
    pending: VecDeque<Value>,
    finished: bool,
}

impl<'a, R: Read> ValueReader<'a, R> {
    pub fn new(reader: &'a mut FrameReader<R>) -> Self {
        Self {
            reader,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        while self.pending.is_empty() && !self.finished {
            match self.reader.read_frame()? {
                Frame::Data(payload) => {
                    let batch: Vec<Value> = bincode::deserialize(&payload)?;
                    trace!("Read batch of {} values", batch.len());
                    self.pending.extend(batch);
                }
                Frame::Control(SpecialLength::Null) => self.pending.push_back(Value::None),
                Frame::Control(SpecialLength::EndOfDataSection) => self.finished = true,
                Frame::Control(actual) => {
                    return Err(Error::UnexpectedControl {
                        expected: "serialized batch or end of data section",
                        actual,
                    })
                }
            }
        }
        Ok(())
    }
}

impl<R: Read> Iterator for ValueReader<'_, R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(error) = self.fill() {
            self.finished = true;
            return Some(Err(error));
        }
        self.pending.pop_front().map(Ok)
    }
}

/// Writes `values` in frames of at most `batch_size` items, returning how many were written.
pub fn write_batched<W: Write>(
    writer: &mut FrameWriter<W>,
    values: impl IntoIterator<Item = Result<Value>>,
    batch_size: usize,
) -> Result<usize> {
    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0;
    for value in values {
        batch.push(value?);
        if batch.len() >= batch_size {
            total += flush_batch(writer, &mut batch)?;
        }
    }
    if !batch.is_empty() {
        total += flush_batch(writer, &mut batch)?;
    }
    Ok(total)
}

fn flush_batch<W: Write>(writer: &mut FrameWriter<W>, batch: &mut Vec<Value>) -> Result<usize> {
    writer.write_frame(&bincode::serialize(&*batch)?)?;
    let written = batch.len();
    batch.clear();
    Ok(written)
}
