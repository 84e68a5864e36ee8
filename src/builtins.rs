// Copyright © 2024 Pathway

//! Functions registered by the shipped worker binary.

use std::cmp::Ordering;

use crate::engine::{Column, DynResult, Error, Series, Value};
use crate::udf::{FunctionRegistry, UserFunction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Sum,
    Mean,
    Count,
    Min,
    Max,
}

impl Reducer {
    pub const ALL: [Self; 5] = [Self::Sum, Self::Mean, Self::Count, Self::Min, Self::Max];

    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    /// Reduces the non-null values. Sum of nothing is `0`, mean, min and max of
    /// nothing are null.
    #[allow(clippy::cast_precision_loss)]
    pub fn reduce<'a>(self, values: impl IntoIterator<Item = &'a Value>) -> DynResult<Value> {
        let mut values = values.into_iter().filter(|value| !value.is_none());
        match self {
            Self::Sum => values.try_fold(Value::Int(0), |sum, value| sum.try_add(value)),
            Self::Mean => {
                let (count, total) = values.try_fold((0_usize, 0.0), |(count, total), value| {
                    DynResult::Ok((count + 1, total + value.as_number()?))
                })?;
                Ok(if count == 0 {
                    Value::None
                } else {
                    Value::from(total / count as f64)
                })
            }
            Self::Count => Ok(Value::Int(i64::try_from(values.count())?)),
            Self::Min => Ok(extreme(values, Ordering::Less)),
            Self::Max => Ok(extreme(values, Ordering::Greater)),
        }
    }
}

/// Integers and floats compare by numeric value, everything else by `Ord`.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_number(), b.as_number()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

fn extreme<'a>(values: impl Iterator<Item = &'a Value>, wanted: Ordering) -> Value {
    values
        .reduce(|best, value| {
            if compare_values(value, best) == wanted {
                value
            } else {
                best
            }
        })
        .cloned()
        .unwrap_or(Value::None)
}

fn single_arg<'a, T>(args: &'a [T], name: &str) -> DynResult<&'a T> {
    match args {
        [arg] => Ok(arg),
        _ => Err(Error::ValueError(format!(
            "{name} takes exactly one argument, got {}",
            args.len()
        ))
        .into()),
    }
}

fn map_series(
    column: &Column,
    mut f: impl FnMut(&Value) -> DynResult<Value>,
) -> DynResult<Column> {
    let series = column.as_series()?;
    let values = series.iter().map(&mut f).collect::<DynResult<Vec<_>>>()?;
    Ok(Column::from(Series::new(series.name().clone(), values)))
}

fn identity_row(args: &[Value]) -> DynResult<Value> {
    match args {
        [value] => Ok(value.clone()),
        _ => Ok(Value::Tuple(args.into())),
    }
}

pub fn register_builtins(registry: &mut FunctionRegistry) {
    registry
        .register("identity", |_, _| Ok(UserFunction::row(identity_row)))
        .register("add", |args, _| {
            let constant = single_arg(args, "add")?.clone();
            Ok(UserFunction::row(move |row| {
                single_arg(row, "add")?.try_add(&constant)
            }))
        })
        .register("identity_batch", |_, _| {
            Ok(UserFunction::batch(|columns| {
                Ok(single_arg(columns, "identity_batch")?.clone())
            }))
        })
        .register("add_batch", |args, _| {
            let constant = single_arg(args, "add_batch")?.clone();
            Ok(UserFunction::batch(move |columns| {
                map_series(single_arg(columns, "add_batch")?, |value| {
                    value.try_add(&constant)
                })
            }))
        })
        .register("identity_iter", |_, _| {
            Ok(UserFunction::batch_iter(|batches| {
                Box::new(batches.map(|batch| -> DynResult<Column> {
                    let mut columns = batch?;
                    if columns.len() != 1 {
                        return Err(Error::ValueError(format!(
                            "identity_iter takes exactly one argument, got {}",
                            columns.len()
                        ))
                        .into());
                    }
                    Ok(columns.remove(0))
                }))
            }))
        })
        .register("identity_frame", |_, _| {
            Ok(UserFunction::grouped_map(|_key, frame| Ok(frame)))
        })
        .register("identity_partition", |_, _| {
            Ok(UserFunction::partition(|_split_index, items| items))
        });
    for reducer in Reducer::ALL {
        registry.register(reducer.name(), move |_, _| {
            Ok(UserFunction::aggregate(move |series| {
                reducer.reduce(single_arg(series, reducer.name())?)
            }))
        });
    }
}
