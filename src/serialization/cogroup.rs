// Copyright © 2024 Pathway

use std::io::Read;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use log::trace;

use super::arrow_stream::read_all;
use crate::channel::FrameReader;
use crate::engine::{Error, Result};

/// Reads pairs of co-grouped tables.
///
/// Every pair is announced by an `i32` holding the number of tables that
/// follow: `2` for a pair of Arrow streams, `0` once all groups were sent.
pub struct CogroupReader<'a, R: Read> {
    reader: &'a mut FrameReader<R>,
    finished: bool,
}

impl<'a, R: Read> CogroupReader<'a, R> {
    pub fn new(reader: &'a mut FrameReader<R>) -> Self {
        Self {
            reader,
            finished: false,
        }
    }

    fn read_table(&mut self) -> Result<RecordBatch> {
        let (schema, batches) = read_all(self.reader)?;
        Ok(concat_batches(&schema, &batches)?)
    }

    fn read_pair(&mut self) -> Result<Option<(RecordBatch, RecordBatch)>> {
        match self.reader.read_int()? {
            0 => Ok(None),
            2 => {
                let left = self.read_table()?;
                let right = self.read_table()?;
                trace!(
                    "Read co-group of {} and {} rows",
                    left.num_rows(),
                    right.num_rows()
                );
                Ok(Some((left, right)))
            }
            count => Err(Error::InvalidGroupCount(count)),
        }
    }
}

impl<R: Read> Iterator for CogroupReader<'_, R> {
    type Item = Result<(RecordBatch, RecordBatch)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let pair = self.read_pair().transpose();
        if !matches!(pair, Some(Ok(_))) {
            self.finished = true;
        }
        pair
    }
}
