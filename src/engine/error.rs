// Copyright © 2024 Pathway

use std::any::Any;
use std::error;
use std::io;
use std::result;
use std::string::FromUtf8Error;

use arrow::datatypes::DataType as ArrowDataType;
use arrow::error::ArrowError;

use super::{Type, Value};
use crate::channel::SpecialLength;
use crate::udf::{EvalType, FunctionKind};

#[allow(clippy::module_name_repetitions)]
pub type DynError = Box<dyn error::Error + Send + Sync>;
pub type DynResult<T> = result::Result<T, DynError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("malformed frame length: {0}")]
    MalformedLength(i32),

    #[error("frame of {0} bytes does not fit into a length prefix")]
    FrameTooLarge(usize),

    #[error("unexpected control frame {actual:?}, expected {expected}")]
    UnexpectedControl {
        expected: &'static str,
        actual: SpecialLength,
    },

    #[error("invalid UTF-8 string on the channel: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error(
        "worker speaks protocol {worker} but the driver requested {driver}, \
         both sides must run the same major.minor version"
    )]
    VersionMismatch { worker: String, driver: String },

    #[error("unknown eval type: {0}")]
    UnknownEvalType(i32),

    #[error("{eval_type:?} expects exactly {expected} UDF, got {actual}")]
    UnexpectedUdfCount {
        eval_type: EvalType,
        expected: usize,
        actual: usize,
    },

    #[error("function {0:?} is not registered")]
    UnknownFunction(String),

    #[error("UDF chain is empty")]
    EmptyChain,

    #[error("function kind mismatch: expected {expected}, got {actual}")]
    FunctionKindMismatch {
        expected: FunctionKind,
        actual: FunctionKind,
    },

    #[error("{0} functions cannot be chained")]
    UnchainableFunction(FunctionKind),

    #[error("invalid window bound type: {0:?}")]
    InvalidWindowBoundType(String),

    #[error("invalid row count policy: {0:?}")]
    InvalidRowCountPolicy(String),

    #[error("runner configuration is missing {0:?}")]
    MissingConf(&'static str),

    #[error("argument offset {offset} is out of range for {columns} columns")]
    InvalidArgOffset { offset: usize, columns: usize },

    #[error("malformed grouped argument offsets: {0:?}")]
    InvalidGroupOffsets(Vec<usize>),

    #[error("invalid number of data frames in group: {0}")]
    InvalidGroupCount(i32),

    #[error("serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("columnar stream error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("unsupported columnar type: {0}")]
    UnsupportedArrowType(ArrowDataType),

    #[error("result vector was not the required length: expected {expected}, got {actual}")]
    ResultLengthMismatch { expected: usize, actual: usize },

    #[error(
        "number of columns of the returned frame doesn't match the declared schema: \
         expected {expected}, got {actual}"
    )]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("scalar iterator UDF did not exhaust its input")]
    InputNotExhausted,

    #[error("iterator UDF produced {output} rows in total for {input} input rows")]
    TotalRowCountMismatch { input: usize, output: usize },

    #[error("iterator UDF produced {output} rows while only {input} rows were consumed")]
    TooManyOutputRows { input: usize, output: usize },

    #[error("invalid window frame [{begin}, {end}) at row {row} for a partition of {len} rows")]
    InvalidWindowFrame {
        row: usize,
        begin: i64,
        end: i64,
        len: usize,
    },

    #[error("cannot recover the key of an empty group")]
    EmptyGroup,

    #[error("length mismatch: expected {expected} rows, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("type mismatch: expected {expected}, got {value:?}")]
    TypeMismatch {
        expected: &'static str,
        value: Value,
    },

    #[error("value {value} cannot be converted to {type_}")]
    IncorrectType { value: Value, type_: Type },

    #[error(
        "converting {value} to {type_} would overflow or truncate, \
         disable arrow.safe_type_conversion to allow it"
    )]
    UnsafeConversion { value: Value, type_: Type },

    #[error("struct field {0:?} is missing in the returned frame")]
    StructFieldMissing(String),

    #[error("column {0:?} not found")]
    ColumnNotFound(String),

    #[error("broadcast id mismatch: expected {expected}, got {actual}")]
    BroadcastIdMismatch { expected: i64, actual: i64 },

    #[error("broadcast variable {0} is not loaded")]
    UnknownBroadcast(i64),

    #[error("date time conversion error")]
    DateTimeConversionError,

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("value error: {0}")]
    ValueError(String),

    #[error("worker panic: {0}")]
    WorkerPanic(String),

    #[error(transparent)]
    Other(DynError),
}

impl Error {
    pub fn from_panic_payload(panic_payload: Box<dyn Any + Send + 'static>) -> Self {
        let message = match panic_payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(panic_payload) => match panic_payload.downcast::<String>() {
                Ok(message) => *message,
                Err(panic_payload) => format!("{panic_payload:?}"),
            },
        };
        Self::WorkerPanic(message)
    }

    pub fn downcast<E: error::Error + 'static>(self) -> Result<E, Self> {
        match self {
            Self::Other(inner) => match inner.downcast::<E>() {
                Ok(error) => Ok(*error),
                Err(other) => Err(Self::Other(other)),
            },
            other => Err(other),
        }
    }
}

impl From<DynError> for Error {
    fn from(value: DynError) -> Self {
        match value.downcast::<Self>() {
            Ok(this) => *this,
            Err(other) => Self::Other(other),
        }
    }
}

pub type Result<T, E = Error> = result::Result<T, E>;
