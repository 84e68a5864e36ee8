// Copyright © 2024 Pathway

//! Worker session loop.
//!
//! One session serves one task: it reads the task description and the
//! functions to run, streams the data through the pipeline and closes with the
//! metrics, accumulator updates and the end-of-stream handshake.

pub mod accumulators;
pub mod broadcast;
pub mod context;
pub mod metrics;
pub mod resources;

use std::fmt;
use std::io::{Read, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::channel::{FrameReader, FrameWriter, SpecialLength};
use crate::engine::{Error, Result};
use crate::udf::{read_pipeline, EvalType, FunctionContext, FunctionRegistry};

pub use self::accumulators::AccumulatorHandle;
pub use self::broadcast::{BroadcastRegistry, BroadcastValue};
pub use self::context::{read_paths, BarrierInfo, ResourceInformation, TaskContext};
pub use self::metrics::{SpillCounters, Timings};
pub use self::resources::ResourceLimit;

/// Exit status of a failed session.
pub const FAILURE_EXIT_CODE: i32 = -1;

/// The `major.minor` version both ends of the channel must agree on.
pub fn protocol_version() -> String {
    format!(
        "{}.{}",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR")
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Handshake,
    ResourceSetup,
    ContextSetup,
    BroadcastSetup,
    FunctionLoad,
    StreamExecute,
    MetricsReport,
    AccumulatorFlush,
    StreamCloseHandshake,
    Exit,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Handshake => "HANDSHAKE",
            Self::ResourceSetup => "RESOURCE_SETUP",
            Self::ContextSetup => "CONTEXT_SETUP",
            Self::BroadcastSetup => "BROADCAST_SETUP",
            Self::FunctionLoad => "FUNCTION_LOAD",
            Self::StreamExecute => "STREAM_EXECUTE",
            Self::MetricsReport => "METRICS_REPORT",
            Self::AccumulatorFlush => "ACCUMULATOR_FLUSH",
            Self::StreamCloseHandshake => "STREAM_CLOSE_HANDSHAKE",
            Self::Exit => "EXIT",
        };
        f.write_str(name)
    }
}

/// How a session that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    Completed,
    /// The driver asked to abort before the handshake.
    Aborted,
    /// The driver did not close the stream properly, the worker must not be reused.
    StreamMismatch,
}

impl SessionExit {
    pub fn code(self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Aborted | Self::StreamMismatch => FAILURE_EXIT_CODE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub memory_limit_mb: Option<u64>,
    /// Process start, the origin of the boot timing.
    pub started: Instant,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: None,
            started: Instant::now(),
        }
    }
}

struct StateTracker(SessionState);

impl StateTracker {
    fn enter(&mut self, next: SessionState) {
        debug_assert!(next > self.0, "session went back from {} to {next}", self.0);
        debug!("Session state {} -> {next}", self.0);
        self.0 = next;
    }
}

pub struct Worker {
    registry: FunctionRegistry,
    config: WorkerConfig,
    broadcasts: BroadcastRegistry,
}

impl Worker {
    pub fn new(registry: FunctionRegistry, config: WorkerConfig) -> Self {
        Self {
            registry,
            config,
            broadcasts: BroadcastRegistry::new(),
        }
    }

    pub fn broadcasts(&self) -> &BroadcastRegistry {
        &self.broadcasts
    }

    /// Runs one session over the given transport and returns the exit status.
    ///
    /// Fatal errors, including panics in user code, are reported to the driver
    /// as an exception frame carrying the diagnostic.
    pub fn serve<R: Read, W: Write>(
        &mut self,
        mut reader: FrameReader<R>,
        mut writer: FrameWriter<W>,
    ) -> i32 {
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.run_session(&mut reader, &mut writer)
        }))
        .unwrap_or_else(|panic_payload| Err(Error::from_panic_payload(panic_payload)));
        match result {
            Ok(exit) => {
                info!("Session ended: {exit:?}");
                exit.code()
            }
            Err(error) => {
                report_fatal(&mut writer, &error);
                FAILURE_EXIT_CODE
            }
        }
    }

    fn run_session<R: Read, W: Write>(
        &mut self,
        reader: &mut FrameReader<R>,
        writer: &mut FrameWriter<W>,
    ) -> Result<SessionExit> {
        let mut state = StateTracker(SessionState::Handshake);
        let split_index = reader.read_int()?;
        if split_index == -1 {
            info!("Driver requested an abort");
            return Ok(SessionExit::Aborted);
        }
        let driver_version = reader.read_utf8()?;
        let worker_version = protocol_version();
        if driver_version != worker_version {
            return Err(Error::VersionMismatch {
                worker: worker_version,
                driver: driver_version,
            });
        }
        let barrier = BarrierInfo::read(reader)?;
        let booted = Instant::now();

        state.enter(SessionState::ResourceSetup);
        if let Some(limit_mb) = self.config.memory_limit_mb {
            ResourceLimit::memory_mb(limit_mb).apply();
        }

        state.enter(SessionState::ContextSetup);
        let task = TaskContext::read(reader, barrier)?;
        let paths = read_paths(reader)?;

        state.enter(SessionState::BroadcastSetup);
        self.broadcasts.read_updates(reader)?;

        state.enter(SessionState::FunctionLoad);
        let eval_type = EvalType::from_code(reader.read_int()?)?;
        let accumulators = AccumulatorHandle::new();
        let context = FunctionContext {
            task: &task,
            broadcasts: &self.broadcasts,
            accumulators: accumulators.clone(),
            paths: &paths,
        };
        let pipeline = read_pipeline(reader, &self.registry, &context, eval_type)?;
        let initialized = Instant::now();

        state.enter(SessionState::StreamExecute);
        pipeline.run(split_index, reader, writer)?;
        let finished = Instant::now();

        state.enter(SessionState::MetricsReport);
        let timings = Timings {
            started: self.config.started,
            booted,
            initialized,
            finished,
        };
        metrics::write_report(writer, &timings, SpillCounters::default())?;

        state.enter(SessionState::AccumulatorFlush);
        writer.write_special(SpecialLength::EndOfDataSection)?;
        accumulators.flush(writer)?;
        writer.flush()?;

        state.enter(SessionState::StreamCloseHandshake);
        let closing = reader.read_int()?;
        let exit = if closing == SpecialLength::EndOfStream.code() {
            writer.write_special(SpecialLength::EndOfStream)?;
            SessionExit::Completed
        } else {
            warn!("Expected the end of stream, got {closing}, this worker must not be reused");
            writer.write_special(SpecialLength::EndOfDataSection)?;
            SessionExit::StreamMismatch
        };
        writer.flush()?;

        state.enter(SessionState::Exit);
        Ok(exit)
    }
}

fn report_fatal<W: Write>(writer: &mut FrameWriter<W>, error: &Error) {
    error!("Worker failed: {error}");
    let reported = writer
        .write_special(SpecialLength::ExceptionThrown)
        .and_then(|()| writer.write_utf8(&error.to_string()))
        .and_then(|()| writer.flush());
    if let Err(write_error) = reported {
        warn!("Failed to report the error to the driver: {write_error}");
    }
}
