// Copyright © 2024 Pathway

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::channel::FrameWriter;
use crate::engine::{Result, Value};

/// Accumulator updates collected during the session, keyed by accumulator id.
///
/// Handles are cheap to clone and can be captured by user functions.
#[derive(Debug, Clone, Default)]
pub struct AccumulatorHandle {
    updates: Arc<Mutex<BTreeMap<i64, Value>>>,
}

impl AccumulatorHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to the local value of accumulator `id`.
    pub fn add(&self, id: i64, delta: Value) -> Result<()> {
        let mut updates = self.updates.lock().unwrap_or_else(PoisonError::into_inner);
        let updated = match updates.get(&id) {
            Some(current) => current.try_add(&delta)?,
            None => delta,
        };
        updates.insert(id, updated);
        Ok(())
    }

    pub fn get(&self, id: i64) -> Option<Value> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the update count followed by one frame per `(id, value)` pair and
    /// clears the local state.
    pub fn flush<W: Write>(&self, writer: &mut FrameWriter<W>) -> Result<usize> {
        let updates = {
            let mut guard = self.updates.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        writer.write_count(updates.len())?;
        for update in &updates {
            writer.write_frame(&bincode::serialize(&update)?)?;
        }
        debug!("Flushed {} accumulator updates", updates.len());
        Ok(updates.len())
    }
}
