// Copyright © 2024 Pathway

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use arcstr::ArcStr;
use itertools::Itertools as _;

use super::{Error, Result, Value};

/// A named, immutable column of values.
///
/// Slicing shares the underlying storage, so a window frame over a partition
/// is a view and never copies the partition's values.
#[derive(Clone)]
pub struct Series {
    name: ArcStr,
    values: Arc<[Value]>,
    range: Range<usize>,
}

impl Series {
    pub fn new(name: impl Into<ArcStr>, values: impl Into<Arc<[Value]>>) -> Self {
        let values = values.into();
        let range = 0..values.len();
        Self {
            name: name.into(),
            values,
            range,
        }
    }

    /// Series of length `len` holding `value` in every row.
    pub fn repeat(name: impl Into<ArcStr>, value: &Value, len: usize) -> Self {
        Self::new(name, vec![value.clone(); len])
    }

    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    #[must_use]
    pub fn renamed(mut self, name: impl Into<ArcStr>) -> Self {
        self.name = name.into();
        self
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values[self.range.clone()]
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values().get(index)
    }

    pub fn first(&self) -> Option<&Value> {
        self.values().first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values().iter()
    }

    /// Zero-copy view of rows `[begin, end)` of this series.
    pub fn slice(&self, begin: usize, end: usize) -> Result<Self> {
        if begin > end || end > self.len() {
            return Err(Error::ValueError(format!(
                "slice [{begin}, {end}) out of bounds for a series of {} rows",
                self.len()
            )));
        }
        Ok(Self {
            name: self.name.clone(),
            values: self.values.clone(),
            range: self.range.start + begin..self.range.start + end,
        })
    }

    /// Whether the two series share storage.
    pub fn shares_storage_with(&self, other: &Series) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.values() == other.values()
    }
}

impl Eq for Series {}

impl fmt::Debug for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [{}]", self.name, self.iter().format(", "))
    }
}

impl<'a> IntoIterator for &'a Series {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An ordered set of equally long series.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    columns: Vec<Series>,
    num_rows: usize,
}

impl Frame {
    pub fn new(columns: Vec<Series>) -> Result<Self> {
        let num_rows = columns.first().map_or(0, Series::len);
        if let Some(column) = columns.iter().find(|column| column.len() != num_rows) {
            return Err(Error::LengthMismatch {
                expected: num_rows,
                actual: column.len(),
            });
        }
        Ok(Self { columns, num_rows })
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn columns(&self) -> &[Series] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Series> {
        self.columns
    }

    pub fn column(&self, name: &str) -> Result<&Series> {
        self.columns
            .iter()
            .find(|column| column.name().as_str() == name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &ArcStr> {
        self.columns.iter().map(Series::name)
    }

    pub fn row(&self, index: usize) -> Option<Vec<Value>> {
        (index < self.num_rows).then(|| {
            self.columns
                .iter()
                .map(|column| column.values()[index].clone())
                .collect()
        })
    }
}

/// A function argument or result: a plain series, or a nested frame for
/// struct-typed columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Column {
    Series(Series),
    Frame(Frame),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Series(series) => series.len(),
            Self::Frame(frame) => frame.num_rows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_series(&self) -> Result<&Series> {
        match self {
            Self::Series(series) => Ok(series),
            Self::Frame(_) => Err(Error::ValueError(
                "expected a series, got a frame".to_string(),
            )),
        }
    }

    pub fn into_series(self) -> Result<Series> {
        match self {
            Self::Series(series) => Ok(series),
            Self::Frame(_) => Err(Error::ValueError(
                "expected a series, got a frame".to_string(),
            )),
        }
    }

    pub fn as_frame(&self) -> Result<&Frame> {
        match self {
            Self::Frame(frame) => Ok(frame),
            Self::Series(_) => Err(Error::ValueError(
                "expected a frame, got a series".to_string(),
            )),
        }
    }
}

impl From<Series> for Column {
    fn from(series: Series) -> Self {
        Self::Series(series)
    }
}

impl From<Frame> for Column {
    fn from(frame: Frame) -> Self {
        Self::Frame(frame)
    }
}
