// Copyright © 2024 Pathway

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::{Field as ArrowField, Schema};
use arrow::record_batch::RecordBatch;

use udf_worker::channel::{Frame, FrameReader, FrameWriter, SpecialLength};
use udf_worker::engine::{Type, Value};
use udf_worker::serialization::arrow_stream::read_all;
use udf_worker::serialization::BatchWriter;
use udf_worker::udf::{Command, EvalType, FunctionRegistry};
use udf_worker::worker::{protocol_version, Worker, WorkerConfig};

pub type Input = FrameWriter<Cursor<Vec<u8>>>;

/// One UDF slot as sent by the driver.
#[derive(Debug, Clone)]
pub struct SlotPlan {
    pub arg_offsets: Vec<usize>,
    pub chain: Vec<(Command, Type)>,
}

impl SlotPlan {
    pub fn new(arg_offsets: &[usize], name: &str, args: Vec<Value>, return_type: Type) -> Self {
        Self {
            arg_offsets: arg_offsets.to_vec(),
            chain: vec![(Command::new(name, args), return_type)],
        }
    }

    pub fn then(mut self, name: &str, args: Vec<Value>, return_type: Type) -> Self {
        self.chain.push((Command::new(name, args), return_type));
        self
    }
}

/// Everything the driver sends up to and including the functions.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub split_index: i32,
    pub version: String,
    pub eval_type: EvalType,
    pub conf: Vec<(String, String)>,
    pub udfs: Vec<SlotPlan>,
}

impl SessionPlan {
    pub fn new(eval_type: EvalType, udfs: Vec<SlotPlan>) -> Self {
        Self {
            split_index: 0,
            version: protocol_version(),
            eval_type,
            conf: Vec::new(),
            udfs,
        }
    }

    pub fn with_conf(mut self, key: &str, value: &str) -> Self {
        self.conf.push((key.to_string(), value.to_string()));
        self
    }
}

pub fn new_input() -> Input {
    FrameWriter::new(Cursor::new(Vec::new()))
}

pub fn into_bytes(input: Input) -> eyre::Result<Vec<u8>> {
    let mut cursor = input.into_inner()?;
    cursor.set_position(0);
    Ok(cursor.into_inner())
}

/// Handshake, barrier fields, task context and paths.
pub fn write_preamble(input: &mut Input, split_index: i32, version: &str) -> eyre::Result<()> {
    input.write_int(split_index)?;
    input.write_utf8(version)?;
    input.write_bool(false)?;
    input.write_int(0)?;
    input.write_utf8("")?;
    input.write_int(1)?; // stage
    input.write_int(split_index)?; // partition
    input.write_int(0)?; // attempt number
    input.write_long(42)?; // attempt id
    input.write_int(0)?; // resources
    input.write_int(0)?; // local properties
    input.write_utf8("/tmp/udf-worker")?;
    input.write_int(0)?; // include paths
    Ok(())
}

pub fn write_no_broadcasts(input: &mut Input) -> eyre::Result<()> {
    input.write_bool(false)?;
    input.write_int(0)?;
    Ok(())
}

pub fn write_functions(input: &mut Input, session: &SessionPlan) -> eyre::Result<()> {
    input.write_int(session.eval_type.code())?;
    if session.eval_type == EvalType::NonUdf {
        let (command, _) = &session.udfs[0].chain[0];
        input.write_frame(&command.to_bytes()?)?;
        return Ok(());
    }
    if session.eval_type.is_columnar() {
        input.write_count(session.conf.len())?;
        for (key, value) in &session.conf {
            input.write_utf8(key)?;
            input.write_utf8(value)?;
        }
    }
    input.write_count(session.udfs.len())?;
    for udf in &session.udfs {
        input.write_count(udf.arg_offsets.len())?;
        for offset in &udf.arg_offsets {
            input.write_count(*offset)?;
        }
        input.write_count(udf.chain.len())?;
        for (command, return_type) in &udf.chain {
            input.write_frame(&command.to_bytes()?)?;
            input.write_frame(&bincode::serialize(return_type)?)?;
        }
    }
    Ok(())
}

pub fn write_batches(input: &mut Input, batches: &[RecordBatch]) -> eyre::Result<()> {
    let mut writer = BatchWriter::new(input);
    for batch in batches {
        writer.write(batch)?;
    }
    writer.finish()?;
    Ok(())
}

pub fn write_rows(input: &mut Input, rows: &[Value]) -> eyre::Result<()> {
    input.write_frame(&bincode::serialize(rows)?)?;
    input.write_special(SpecialLength::EndOfDataSection)?;
    Ok(())
}

/// A complete session with a columnar data phase and a proper close.
pub fn columnar_session(session: &SessionPlan, batches: &[RecordBatch]) -> eyre::Result<Vec<u8>> {
    session_with(session, |input| write_batches(input, batches))
}

pub fn session_with(
    session: &SessionPlan,
    data: impl FnOnce(&mut Input) -> eyre::Result<()>,
) -> eyre::Result<Vec<u8>> {
    let mut input = new_input();
    write_preamble(&mut input, session.split_index, &session.version)?;
    write_no_broadcasts(&mut input)?;
    write_functions(&mut input, session)?;
    data(&mut input)?;
    input.write_special(SpecialLength::EndOfStream)?;
    into_bytes(input)
}

pub fn int_batch(columns: &[(&str, &[i64])]) -> eyre::Result<RecordBatch> {
    let fields: Vec<ArrowField> = columns
        .iter()
        .map(|(name, _)| ArrowField::new(*name, arrow::datatypes::DataType::Int64, true))
        .collect();
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|(_, values)| Arc::new(Int64Array::from(values.to_vec())) as ArrayRef)
        .collect();
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

pub fn run_worker(registry: FunctionRegistry, input: Vec<u8>) -> (i32, Vec<u8>) {
    let mut worker = Worker::new(registry, WorkerConfig::default());
    run_with(&mut worker, input)
}

pub fn run_with(worker: &mut Worker, input: Vec<u8>) -> (i32, Vec<u8>) {
    let mut output = Vec::new();
    let code = worker.serve(
        FrameReader::new(Cursor::new(input)),
        FrameWriter::new(&mut output),
    );
    (code, output)
}

/// What the worker sent back after a session that did not fail.
#[derive(Debug, Default)]
pub struct SessionOutput {
    pub batches: Vec<RecordBatch>,
    pub values: Vec<Value>,
    pub timings: Vec<i64>,
    pub spills: Vec<i64>,
    pub accumulators: Vec<(i64, Value)>,
    pub closing: i32,
}

#[derive(Debug)]
pub enum Outcome {
    Completed(SessionOutput),
    Failed(String),
}

impl Outcome {
    pub fn completed(self) -> SessionOutput {
        match self {
            Self::Completed(output) => output,
            Self::Failed(message) => panic!("session failed: {message}"),
        }
    }

    pub fn failed(self) -> String {
        match self {
            Self::Failed(message) => message,
            Self::Completed(output) => panic!("session unexpectedly completed: {output:?}"),
        }
    }
}

/// Parses the worker's response, whatever the mode.
pub fn parse_output(bytes: Vec<u8>) -> eyre::Result<Outcome> {
    let mut reader = FrameReader::new(Cursor::new(bytes));
    let mut output = SessionOutput::default();
    loop {
        match reader.read_frame()? {
            Frame::Data(payload) => {
                let values: Vec<Value> = bincode::deserialize(&payload)?;
                output.values.extend(values);
            }
            Frame::Control(SpecialLength::StartArrowStream) => {
                let (_, batches) = read_all(&mut reader)?;
                output.batches.extend(batches);
            }
            Frame::Control(SpecialLength::TimingData) => break,
            Frame::Control(SpecialLength::ExceptionThrown) => {
                return Ok(Outcome::Failed(reader.read_utf8()?));
            }
            Frame::Control(other) => eyre::bail!("unexpected control frame {other:?}"),
        }
    }
    output.timings = (0..3)
        .map(|_| reader.read_long())
        .collect::<Result<_, _>>()?;
    output.spills = (0..2)
        .map(|_| reader.read_long())
        .collect::<Result<_, _>>()?;
    eyre::ensure!(
        reader.read_int()? == SpecialLength::EndOfDataSection.code(),
        "missing end of data section"
    );
    for _ in 0..reader.read_count()? {
        output
            .accumulators
            .push(bincode::deserialize(&reader.read_bytes()?)?);
    }
    output.closing = reader.read_int()?;
    Ok(Outcome::Completed(output))
}

pub fn int_column(batch: &RecordBatch, index: usize) -> Vec<Option<i64>> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("an Int64 column")
        .iter()
        .collect()
}
