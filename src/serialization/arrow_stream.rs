// Copyright © 2024 Pathway

use std::io::{Read, Write};

use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use log::trace;

use crate::channel::{FrameReader, FrameWriter, SpecialLength};
use crate::engine::Result;

/// Iterates over one Arrow IPC stream embedded in the channel.
///
/// The underlying reader is unbuffered, so nothing past the end-of-stream
/// marker is consumed and protocol integers that follow stay readable.
pub struct BatchReader<'a, R: Read> {
    inner: StreamReader<&'a mut FrameReader<R>>,
}

impl<'a, R: Read> BatchReader<'a, R> {
    pub fn new(reader: &'a mut FrameReader<R>) -> Result<Self> {
        let inner = StreamReader::try_new(reader, None)?;
        trace!("Opened columnar stream with schema {:?}", inner.schema());
        Ok(Self { inner })
    }

    pub fn schema(&self) -> arrow::datatypes::SchemaRef {
        self.inner.schema()
    }
}

impl<R: Read> Iterator for BatchReader<'_, R> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|batch| batch.map_err(Into::into))
    }
}

/// Reads a whole Arrow IPC stream and returns its schema with all batches.
pub fn read_all<R: Read>(
    reader: &mut FrameReader<R>,
) -> Result<(arrow::datatypes::SchemaRef, Vec<RecordBatch>)> {
    let batches = BatchReader::new(reader)?;
    let schema = batches.schema();
    let batches = batches.collect::<Result<Vec<_>>>()?;
    Ok((schema, batches))
}

enum SinkState<'a, W: Write> {
    Pending(&'a mut FrameWriter<W>),
    Open(StreamWriter<&'a mut FrameWriter<W>>),
}

/// Writes record batches as one Arrow IPC stream.
///
/// The stream is opened with the schema of the first batch. Nothing at all is
/// written when no batch arrives.
pub struct BatchWriter<'a, W: Write> {
    state: Option<SinkState<'a, W>>,
    start_marker: bool,
    batches_written: usize,
}

impl<'a, W: Write> BatchWriter<'a, W> {
    pub fn new(writer: &'a mut FrameWriter<W>) -> Self {
        Self {
            state: Some(SinkState::Pending(writer)),
            start_marker: false,
            batches_written: 0,
        }
    }

    /// Precedes the stream with a [`SpecialLength::StartArrowStream`] control value,
    /// written only once the first batch has been built successfully.
    #[must_use]
    pub fn with_start_marker(mut self) -> Self {
        self.start_marker = true;
        self
    }

    pub fn batches_written(&self) -> usize {
        self.batches_written
    }

    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        let state = match self.state.take() {
            Some(SinkState::Pending(sink)) => {
                if self.start_marker {
                    sink.write_special(SpecialLength::StartArrowStream)?;
                }
                SinkState::Open(StreamWriter::try_new(sink, &batch.schema())?)
            }
            Some(open) => open,
            None => return Ok(()),
        };
        let state = self.state.insert(state);
        if let SinkState::Open(stream) = state {
            stream.write(batch)?;
            self.batches_written += 1;
        }
        Ok(())
    }

    /// Writes the end-of-stream marker if the stream was opened.
    pub fn finish(mut self) -> Result<usize> {
        if let Some(SinkState::Open(mut stream)) = self.state.take() {
            stream.finish()?;
            stream.into_inner()?.flush()?;
        }
        trace!("Closed columnar stream after {} batches", self.batches_written);
        Ok(self.batches_written)
    }
}
