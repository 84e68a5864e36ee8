// Copyright © 2024 Pathway

use std::fmt;
use std::sync::Arc;

use crate::engine::{Column, DynResult, Error, Frame, Result, Series, Value};

pub type ValueIter<'a> = Box<dyn Iterator<Item = DynResult<Value>> + 'a>;
pub type BatchIter<'a> = Box<dyn Iterator<Item = DynResult<Vec<Column>>> + 'a>;
pub type ColumnIter<'a> = Box<dyn Iterator<Item = DynResult<Column>> + 'a>;

pub type RowFn = Arc<dyn Fn(&[Value]) -> DynResult<Value>>;
pub type BatchFn = Arc<dyn Fn(&[Column]) -> DynResult<Column>>;
pub type BatchIterFn = Arc<dyn for<'a> Fn(BatchIter<'a>) -> ColumnIter<'a>>;
pub type GroupedMapFn = Arc<dyn Fn(&[Value], Frame) -> DynResult<Frame>>;
pub type CogroupedMapFn = Arc<dyn Fn(&[Value], Frame, Frame) -> DynResult<Frame>>;
pub type AggregateFn = Arc<dyn Fn(&[Series]) -> DynResult<Value>>;
pub type PartitionFn = Arc<dyn for<'a> Fn(i32, ValueIter<'a>) -> ValueIter<'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Row,
    Batch,
    BatchIter,
    GroupedMap,
    CogroupedMap,
    Aggregate,
    Partition,
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Row => "row",
            Self::Batch => "batch",
            Self::BatchIter => "batch iterator",
            Self::GroupedMap => "grouped map",
            Self::CogroupedMap => "cogrouped map",
            Self::Aggregate => "aggregate",
            Self::Partition => "partition",
        };
        f.write_str(name)
    }
}

/// A user function as produced by a registered factory.
///
/// Each variant is the calling convention of one family of execution modes.
#[derive(Clone)]
pub enum UserFunction {
    /// One row of arguments to one value.
    Row(RowFn),
    /// Argument columns to a result column of the same length.
    Batch(BatchFn),
    /// A lazy stream of argument batches to a lazy stream of result columns.
    BatchIter(BatchIterFn),
    /// A group key and the group's values to a table.
    GroupedMap(GroupedMapFn),
    /// A group key and the matching groups of two tables to a table.
    CogroupedMap(CogroupedMapFn),
    /// Argument series to a single value.
    Aggregate(AggregateFn),
    /// The split index and the whole item stream to an item stream.
    Partition(PartitionFn),
}

impl fmt::Debug for UserFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserFunction({})", self.kind())
    }
}

impl UserFunction {
    pub fn row(f: impl Fn(&[Value]) -> DynResult<Value> + 'static) -> Self {
        Self::Row(Arc::new(f))
    }

    pub fn batch(f: impl Fn(&[Column]) -> DynResult<Column> + 'static) -> Self {
        Self::Batch(Arc::new(f))
    }

    pub fn batch_iter<F>(f: F) -> Self
    where
        F: for<'a> Fn(BatchIter<'a>) -> ColumnIter<'a> + 'static,
    {
        Self::BatchIter(Arc::new(f))
    }

    pub fn grouped_map(f: impl Fn(&[Value], Frame) -> DynResult<Frame> + 'static) -> Self {
        Self::GroupedMap(Arc::new(f))
    }

    pub fn cogrouped_map(
        f: impl Fn(&[Value], Frame, Frame) -> DynResult<Frame> + 'static,
    ) -> Self {
        Self::CogroupedMap(Arc::new(f))
    }

    pub fn aggregate(f: impl Fn(&[Series]) -> DynResult<Value> + 'static) -> Self {
        Self::Aggregate(Arc::new(f))
    }

    pub fn partition<F>(f: F) -> Self
    where
        F: for<'a> Fn(i32, ValueIter<'a>) -> ValueIter<'a> + 'static,
    {
        Self::Partition(Arc::new(f))
    }

    pub fn kind(&self) -> FunctionKind {
        match self {
            Self::Row(_) => FunctionKind::Row,
            Self::Batch(_) => FunctionKind::Batch,
            Self::BatchIter(_) => FunctionKind::BatchIter,
            Self::GroupedMap(_) => FunctionKind::GroupedMap,
            Self::CogroupedMap(_) => FunctionKind::CogroupedMap,
            Self::Aggregate(_) => FunctionKind::Aggregate,
            Self::Partition(_) => FunctionKind::Partition,
        }
    }

    fn kind_mismatch(&self, expected: FunctionKind) -> Error {
        Error::FunctionKindMismatch {
            expected,
            actual: self.kind(),
        }
    }

    /// Composes `self` with `next`, so that the result computes `next(self(x))`.
    pub fn then(self, next: Self) -> Result<Self> {
        let composed = match (self, next) {
            (Self::Row(f), Self::Row(g)) => {
                Self::row(move |args| g(std::slice::from_ref(&f(args)?)))
            }
            (Self::Batch(f), Self::Batch(g)) => {
                Self::batch(move |args| g(std::slice::from_ref(&f(args)?)))
            }
            (Self::BatchIter(f), Self::BatchIter(g)) => Self::batch_iter(move |input| {
                g(Box::new(f(input).map(|column| column.map(|column| vec![column]))))
            }),
            (Self::GroupedMap(f), Self::GroupedMap(g)) => {
                Self::grouped_map(move |key, frame| g(key, f(key, frame)?))
            }
            (Self::Aggregate(f), Self::Aggregate(g)) => Self::aggregate(move |args| {
                let partial = Series::new("_0", vec![f(args)?]);
                g(std::slice::from_ref(&partial))
            }),
            (Self::Partition(f), Self::Partition(g)) => {
                Self::partition(move |split, items| g(split, f(split, items)))
            }
            (Self::CogroupedMap(_), _) => {
                return Err(Error::UnchainableFunction(FunctionKind::CogroupedMap))
            }
            (first, next) => return Err(next.kind_mismatch(first.kind())),
        };
        Ok(composed)
    }

    /// Chains functions in order: `[f1, f2, f3]` computes `f3(f2(f1(x)))`.
    pub fn chain(functions: impl IntoIterator<Item = Self>) -> Result<Self> {
        let mut functions = functions.into_iter();
        let first = functions.next().ok_or(Error::EmptyChain)?;
        functions.try_fold(first, Self::then)
    }

    pub fn into_row(self) -> Result<RowFn> {
        match self {
            Self::Row(f) => Ok(f),
            other => Err(other.kind_mismatch(FunctionKind::Row)),
        }
    }

    pub fn into_batch(self) -> Result<BatchFn> {
        match self {
            Self::Batch(f) => Ok(f),
            other => Err(other.kind_mismatch(FunctionKind::Batch)),
        }
    }

    pub fn into_batch_iter(self) -> Result<BatchIterFn> {
        match self {
            Self::BatchIter(f) => Ok(f),
            other => Err(other.kind_mismatch(FunctionKind::BatchIter)),
        }
    }

    pub fn into_grouped_map(self) -> Result<GroupedMapFn> {
        match self {
            Self::GroupedMap(f) => Ok(f),
            other => Err(other.kind_mismatch(FunctionKind::GroupedMap)),
        }
    }

    pub fn into_cogrouped_map(self) -> Result<CogroupedMapFn> {
        match self {
            Self::CogroupedMap(f) => Ok(f),
            other => Err(other.kind_mismatch(FunctionKind::CogroupedMap)),
        }
    }

    pub fn into_aggregate(self) -> Result<AggregateFn> {
        match self {
            Self::Aggregate(f) => Ok(f),
            other => Err(other.kind_mismatch(FunctionKind::Aggregate)),
        }
    }

    pub fn into_partition(self) -> Result<PartitionFn> {
        match self {
            Self::Partition(f) => Ok(f),
            other => Err(other.kind_mismatch(FunctionKind::Partition)),
        }
    }
}
