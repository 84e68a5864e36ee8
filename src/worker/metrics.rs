// Copyright © 2024 Pathway

use std::io::Write;
use std::time::{Duration, Instant};

use log::info;

use crate::channel::{FrameWriter, SpecialLength};
use crate::engine::Result;

fn as_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Phase boundaries of one session.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub started: Instant,
    pub booted: Instant,
    pub initialized: Instant,
    pub finished: Instant,
}

impl Timings {
    pub fn boot(&self) -> Duration {
        self.booted.saturating_duration_since(self.started)
    }

    pub fn init(&self) -> Duration {
        self.initialized.saturating_duration_since(self.booted)
    }

    pub fn execution(&self) -> Duration {
        self.finished.saturating_duration_since(self.initialized)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpillCounters {
    pub memory_bytes: i64,
    pub disk_bytes: i64,
}

pub fn write_report<W: Write>(
    writer: &mut FrameWriter<W>,
    timings: &Timings,
    spills: SpillCounters,
) -> Result<()> {
    info!(
        "Session timings: boot {:?}, init {:?}, execution {:?}",
        timings.boot(),
        timings.init(),
        timings.execution()
    );
    writer.write_special(SpecialLength::TimingData)?;
    writer.write_long(as_millis(timings.boot()))?;
    writer.write_long(as_millis(timings.init()))?;
    writer.write_long(as_millis(timings.execution()))?;
    writer.write_long(spills.memory_bytes)?;
    writer.write_long(spills.disk_bytes)?;
    Ok(())
}
