// Copyright © 2024 Pathway

use std::io::{Read, Write};

use arrow::record_batch::RecordBatch;

use super::arrow_stream::{BatchReader, BatchWriter};
use super::tabular::TabularConverter;
use crate::channel::{FrameReader, FrameWriter};
use crate::engine::{Column, Result, Type};

/// Output side of the columnar modes.
///
/// Each result is converted into a record batch before anything reaches the
/// channel, so a conversion failure on the very first batch is reported before
/// the start-of-stream marker and the peer never sees a half-opened stream.
pub struct UdfStreamWriter<'a, W: Write> {
    converter: &'a TabularConverter,
    batches: BatchWriter<'a, W>,
}

impl<'a, W: Write> UdfStreamWriter<'a, W> {
    pub fn new(converter: &'a TabularConverter, writer: &'a mut FrameWriter<W>) -> Self {
        Self {
            converter,
            batches: BatchWriter::new(writer).with_start_marker(),
        }
    }

    pub fn write_columns<'c>(
        &mut self,
        outputs: impl IntoIterator<Item = (&'c Column, &'c Type)>,
    ) -> Result<()> {
        let batch = self.converter.create_batch(outputs)?;
        self.write_batch(&batch)
    }

    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        self.batches.write(batch)
    }

    pub fn finish(self) -> Result<usize> {
        self.batches.finish()
    }
}

/// Input side of the columnar modes: record batches with their host columns.
pub struct UdfStreamReader<'a, R: Read> {
    converter: &'a TabularConverter,
    batches: BatchReader<'a, R>,
}

impl<'a, R: Read> UdfStreamReader<'a, R> {
    pub fn new(converter: &'a TabularConverter, reader: &'a mut FrameReader<R>) -> Result<Self> {
        Ok(Self {
            converter,
            batches: BatchReader::new(reader)?,
        })
    }
}

impl<R: Read> Iterator for UdfStreamReader<'_, R> {
    type Item = Result<(usize, Vec<Column>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.batches.next()?;
        Some(batch.and_then(|batch| {
            let columns = self.converter.batch_to_columns(&batch)?;
            Ok((batch.num_rows(), columns))
        }))
    }
}
