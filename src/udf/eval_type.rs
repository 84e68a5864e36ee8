// Copyright © 2024 Pathway

use std::fmt;

use super::FunctionKind;
use crate::engine::{Error, Result};

/// Execution mode of a worker session, selected once by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalType {
    /// A single partition function over the raw item stream, no UDF slots.
    NonUdf,
    BatchedRows,
    Scalar,
    GroupedMap,
    GroupedAgg,
    WindowAgg,
    ScalarIter,
    MapIter,
    CogroupedMap,
}

impl EvalType {
    pub fn code(self) -> i32 {
        match self {
            Self::NonUdf => 0,
            Self::BatchedRows => 100,
            Self::Scalar => 200,
            Self::GroupedMap => 201,
            Self::GroupedAgg => 202,
            Self::WindowAgg => 203,
            Self::ScalarIter => 204,
            Self::MapIter => 205,
            Self::CogroupedMap => 206,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        let eval_type = match code {
            0 => Self::NonUdf,
            100 => Self::BatchedRows,
            200 => Self::Scalar,
            201 => Self::GroupedMap,
            202 => Self::GroupedAgg,
            203 => Self::WindowAgg,
            204 => Self::ScalarIter,
            205 => Self::MapIter,
            206 => Self::CogroupedMap,
            _ => return Err(Error::UnknownEvalType(code)),
        };
        Ok(eval_type)
    }

    /// Whether input and output travel as Arrow streams, configured by a runner conf table.
    pub fn is_columnar(self) -> bool {
        !matches!(self, Self::NonUdf | Self::BatchedRows)
    }

    pub fn df_for_struct(self) -> bool {
        matches!(self, Self::Scalar | Self::ScalarIter | Self::MapIter)
    }

    /// Modes that accept exactly one UDF slot.
    pub fn is_single_slot(self) -> bool {
        matches!(
            self,
            Self::ScalarIter | Self::MapIter | Self::GroupedMap | Self::CogroupedMap
        )
    }

    pub fn function_kind(self) -> FunctionKind {
        match self {
            Self::NonUdf => FunctionKind::Partition,
            Self::BatchedRows => FunctionKind::Row,
            Self::Scalar => FunctionKind::Batch,
            Self::ScalarIter | Self::MapIter => FunctionKind::BatchIter,
            Self::GroupedMap => FunctionKind::GroupedMap,
            Self::CogroupedMap => FunctionKind::CogroupedMap,
            Self::GroupedAgg | Self::WindowAgg => FunctionKind::Aggregate,
        }
    }
}

impl fmt::Display for EvalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.code())
    }
}
