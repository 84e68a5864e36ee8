// Copyright © 2024 Pathway

//! Execution dispatcher: one pipeline variant per execution mode.

mod grouped;
mod iter;
mod rows;
mod scalar;

use std::fmt;
use std::io::{Read, Write};

use log::{debug, info};

use crate::channel::{FrameReader, FrameWriter};
use crate::engine::{Error, Field, Result, Type};
use crate::serialization::TabularConverter;
use crate::udf::function::{
    AggregateFn, BatchFn, BatchIterFn, CogroupedMapFn, GroupedMapFn, PartitionFn, RowFn,
};
use crate::udf::{
    parse_group_offsets, EvalType, GroupOffsets, LoadedUdf, RowCountPolicy, RunnerConf,
    WindowBound,
};

/// A loaded function together with where its arguments come from.
pub struct Slot<F> {
    pub function: F,
    pub arg_offsets: Vec<usize>,
    pub return_type: Type,
}

pub struct WindowSlot {
    pub slot: Slot<AggregateFn>,
    pub bound: WindowBound,
}

pub struct GroupedMapSlot {
    pub function: GroupedMapFn,
    pub offsets: GroupOffsets,
    pub return_type: Type,
}

pub struct CogroupedMapSlot {
    pub function: CogroupedMapFn,
    pub left: GroupOffsets,
    pub right: GroupOffsets,
    pub return_type: Type,
}

pub enum Pipeline {
    Partition(PartitionFn),
    Rows(Vec<Slot<RowFn>>),
    Scalar {
        slots: Vec<Slot<BatchFn>>,
        converter: TabularConverter,
    },
    ScalarIter {
        slot: Slot<BatchIterFn>,
        converter: TabularConverter,
    },
    MapIter {
        slot: Slot<BatchIterFn>,
        policy: RowCountPolicy,
        converter: TabularConverter,
    },
    GroupedMap {
        slot: GroupedMapSlot,
        converter: TabularConverter,
    },
    CogroupedMap {
        slot: CogroupedMapSlot,
        converter: TabularConverter,
    },
    GroupedAgg {
        slots: Vec<Slot<AggregateFn>>,
        converter: TabularConverter,
    },
    WindowAgg {
        slots: Vec<WindowSlot>,
        converter: TabularConverter,
    },
}

fn slots<F>(
    udfs: Vec<LoadedUdf>,
    extract: impl Fn(crate::udf::UserFunction) -> Result<F>,
) -> Result<Vec<Slot<F>>> {
    udfs.into_iter()
        .map(|udf| {
            Ok(Slot {
                function: extract(udf.function)?,
                arg_offsets: udf.arg_offsets,
                return_type: udf.return_type,
            })
        })
        .collect()
}

fn single<T>(items: Vec<T>, eval_type: EvalType) -> Result<T> {
    let actual = items.len();
    let mut items = items.into_iter();
    match (items.next(), items.next()) {
        (Some(item), None) => Ok(item),
        _ => Err(Error::UnexpectedUdfCount {
            eval_type,
            expected: 1,
            actual,
        }),
    }
}

fn struct_return_type(return_type: &Type) -> Result<&[Field]> {
    return_type.struct_fields().ok_or_else(|| {
        Error::ValueError(format!(
            "table-returning functions must declare a struct type, got {return_type}"
        ))
    })
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pipeline").field(&self.name()).finish()
    }
}

impl Pipeline {
    pub fn build(eval_type: EvalType, conf: RunnerConf, udfs: Vec<LoadedUdf>) -> Result<Self> {
        let converter = TabularConverter::new(conf.tabular_options(eval_type.df_for_struct()));
        let pipeline = match eval_type {
            EvalType::NonUdf => {
                let udf = single(udfs, eval_type)?;
                Self::Partition(udf.function.into_partition()?)
            }
            EvalType::BatchedRows => Self::Rows(slots(udfs, |f| f.into_row())?),
            EvalType::Scalar => Self::Scalar {
                slots: slots(udfs, |f| f.into_batch())?,
                converter,
            },
            EvalType::ScalarIter => Self::ScalarIter {
                slot: single(slots(udfs, |f| f.into_batch_iter())?, eval_type)?,
                converter,
            },
            EvalType::MapIter => Self::MapIter {
                slot: single(slots(udfs, |f| f.into_batch_iter())?, eval_type)?,
                policy: conf.row_count_policy,
                converter,
            },
            EvalType::GroupedMap => {
                let udf = single(udfs, eval_type)?;
                struct_return_type(&udf.return_type)?;
                let mut offsets = parse_group_offsets(&udf.arg_offsets)?.into_iter();
                let (Some(offsets), None) = (offsets.next(), offsets.next()) else {
                    return Err(Error::InvalidGroupOffsets(udf.arg_offsets));
                };
                Self::GroupedMap {
                    slot: GroupedMapSlot {
                        function: udf.function.into_grouped_map()?,
                        offsets,
                        return_type: udf.return_type,
                    },
                    converter,
                }
            }
            EvalType::CogroupedMap => {
                let udf = single(udfs, eval_type)?;
                struct_return_type(&udf.return_type)?;
                let mut offsets = parse_group_offsets(&udf.arg_offsets)?.into_iter();
                let (Some(left), Some(right), None) =
                    (offsets.next(), offsets.next(), offsets.next())
                else {
                    return Err(Error::InvalidGroupOffsets(udf.arg_offsets));
                };
                Self::CogroupedMap {
                    slot: CogroupedMapSlot {
                        function: udf.function.into_cogrouped_map()?,
                        left,
                        right,
                        return_type: udf.return_type,
                    },
                    converter,
                }
            }
            EvalType::GroupedAgg => Self::GroupedAgg {
                slots: slots(udfs, |f| f.into_aggregate())?,
                converter,
            },
            EvalType::WindowAgg => {
                let window_slots = slots(udfs, |f| f.into_aggregate())?
                    .into_iter()
                    .enumerate()
                    .map(|(index, slot)| {
                        let bound = conf.window_bound(index)?;
                        if bound == WindowBound::Bounded && slot.arg_offsets.len() < 2 {
                            return Err(Error::ValueError(
                                "bounded window functions take the frame begin and end \
                                 columns as their first two arguments"
                                    .to_string(),
                            ));
                        }
                        Ok(WindowSlot { slot, bound })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Self::WindowAgg {
                    slots: window_slots,
                    converter,
                }
            }
        };
        debug!("Built pipeline for {eval_type}");
        Ok(pipeline)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Partition(_) => "partition",
            Self::Rows(_) => "rows",
            Self::Scalar { .. } => "scalar",
            Self::ScalarIter { .. } => "scalar iterator",
            Self::MapIter { .. } => "batch map",
            Self::GroupedMap { .. } => "grouped map",
            Self::CogroupedMap { .. } => "cogrouped map",
            Self::GroupedAgg { .. } => "grouped aggregate",
            Self::WindowAgg { .. } => "window aggregate",
        }
    }

    /// Consumes the whole input section and streams the results back.
    pub fn run<R: Read, W: Write>(
        &self,
        split_index: i32,
        reader: &mut FrameReader<R>,
        writer: &mut FrameWriter<W>,
    ) -> Result<()> {
        let written = match self {
            Self::Partition(function) => {
                rows::run_partition(function, split_index, reader, writer)
            }
            Self::Rows(slots) => rows::run_rows(slots, reader, writer),
            Self::Scalar { slots, converter } => {
                scalar::run_scalar(slots, converter, reader, writer)
            }
            Self::ScalarIter { slot, converter } => {
                iter::run_scalar_iter(slot, converter, reader, writer)
            }
            Self::MapIter {
                slot,
                policy,
                converter,
            } => iter::run_map_iter(slot, *policy, converter, reader, writer),
            Self::GroupedMap { slot, converter } => {
                grouped::run_grouped_map(slot, converter, reader, writer)
            }
            Self::CogroupedMap { slot, converter } => {
                grouped::run_cogrouped_map(slot, converter, reader, writer)
            }
            Self::GroupedAgg { slots, converter } => {
                scalar::run_grouped_agg(slots, converter, reader, writer)
            }
            Self::WindowAgg { slots, converter } => {
                scalar::run_window_agg(slots, converter, reader, writer)
            }
        }?;
        info!("Pipeline {} wrote {written} output units", self.name());
        Ok(())
    }
}

/// Picks the arguments of one slot out of the input columns.
pub(crate) fn select<T: Clone>(columns: &[T], offsets: &[usize]) -> Result<Vec<T>> {
    offsets
        .iter()
        .map(|&offset| {
            columns
                .get(offset)
                .cloned()
                .ok_or(Error::InvalidArgOffset {
                    offset,
                    columns: columns.len(),
                })
        })
        .collect()
}
