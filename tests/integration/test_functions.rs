// Copyright © 2024 Pathway

use std::io::Cursor;

use assert_matches::assert_matches;

use udf_worker::builtins::register_builtins;
use udf_worker::channel::FrameReader;
use udf_worker::engine::{Column, Error, Series, Type, Value};
use udf_worker::udf::{
    read_single_udf, Command, EvalType, FunctionContext, FunctionKind, FunctionRegistry,
    UserFunction,
};
use udf_worker::worker::{AccumulatorHandle, BroadcastRegistry, TaskContext};

use super::helpers::{into_bytes, new_input, write_functions, SessionPlan, SlotPlan};

fn registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    register_builtins(&mut registry);
    registry
        .register("double", |_, _| {
            Ok(UserFunction::row(|args| Ok(Value::Int(args[0].as_int()? * 2))))
        })
        .register("describe", |_, _| {
            Ok(UserFunction::row(|args| Ok(Value::from(format!("<{}>", args[0]).as_str()))))
        });
    registry
}

#[test]
fn test_chain_applies_functions_in_order() -> eyre::Result<()> {
    let add = |c: i64| UserFunction::row(move |args| Ok(Value::Int(args[0].as_int()? + c)));
    let double = UserFunction::row(|args| Ok(Value::Int(args[0].as_int()? * 2)));
    let chained = UserFunction::chain([add(1), double, add(10)])?.into_row()?;
    // ((3 + 1) * 2) + 10
    assert_eq!(chained(&[Value::Int(3)]).map_err(Error::from)?, Value::Int(18));
    Ok(())
}

#[test]
fn test_batch_chain_feeds_each_result_forward() -> eyre::Result<()> {
    let negate = || {
        UserFunction::batch(|columns| {
            let series = columns[0].as_series()?;
            let values = series
                .iter()
                .map(|value| Ok(Value::Int(-value.as_int()?)))
                .collect::<Result<Vec<_>, Error>>()?;
            Ok(Column::from(Series::new(series.name().clone(), values)))
        })
    };
    let chained = UserFunction::chain([negate(), negate(), negate()])?.into_batch()?;
    let input = Column::from(Series::new("a", vec![Value::Int(1), Value::Int(-2)]));
    let result = chained(&[input]).map_err(Error::from)?;
    assert_eq!(result.as_series()?.values(), &[Value::Int(-1), Value::Int(2)]);
    Ok(())
}

#[test]
fn test_chain_rejects_mixed_and_cogrouped_functions() {
    let row = UserFunction::row(|args| Ok(args[0].clone()));
    let batch = UserFunction::batch(|columns| Ok(columns[0].clone()));
    assert_matches!(
        UserFunction::chain([row, batch]),
        Err(Error::FunctionKindMismatch {
            expected: FunctionKind::Row,
            actual: FunctionKind::Batch,
        })
    );

    let cogrouped = || UserFunction::cogrouped_map(|_, left, _| Ok(left));
    assert_matches!(
        UserFunction::chain([cogrouped(), cogrouped()]),
        Err(Error::UnchainableFunction(FunctionKind::CogroupedMap))
    );
    assert_matches!(UserFunction::chain([]), Err(Error::EmptyChain));
    assert!(UserFunction::chain([cogrouped()]).is_ok());
}

#[test]
fn test_slot_keeps_the_last_declared_type() -> eyre::Result<()> {
    let session = SessionPlan::new(
        EvalType::BatchedRows,
        vec![SlotPlan::new(&[1], "double", vec![], Type::Int64)
            .then("describe", vec![], Type::String)],
    );
    let mut input = new_input();
    write_functions(&mut input, &session)?;
    let mut reader = FrameReader::new(Cursor::new(into_bytes(input)?));
    assert_eq!(reader.read_int()?, EvalType::BatchedRows.code());
    assert_eq!(reader.read_int()?, 1);

    let task = TaskContext::default();
    let broadcasts = BroadcastRegistry::new();
    let context = FunctionContext {
        task: &task,
        broadcasts: &broadcasts,
        accumulators: AccumulatorHandle::new(),
        paths: &[],
    };
    let udf = read_single_udf(&mut reader, &registry(), &context, EvalType::BatchedRows)?;
    assert_eq!(udf.arg_offsets, vec![1]);
    assert_eq!(udf.return_type, Type::String);
    let function = udf.function.into_row()?;
    assert_eq!(function(&[Value::Int(21)]).map_err(Error::from)?, Value::from("<42>"));
    Ok(())
}

#[test]
fn test_unknown_function_and_wrong_kind_are_rejected() -> eyre::Result<()> {
    let task = TaskContext::default();
    let broadcasts = BroadcastRegistry::new();
    let context = FunctionContext {
        task: &task,
        broadcasts: &broadcasts,
        accumulators: AccumulatorHandle::new(),
        paths: &[],
    };
    let registry = registry();
    assert_matches!(
        registry.resolve(&Command::new("missing", []), &context),
        Err(Error::UnknownFunction(name)) if name == "missing"
    );

    let session = SessionPlan::new(
        EvalType::Scalar,
        vec![SlotPlan::new(&[0], "double", vec![], Type::Int64)],
    );
    let mut input = new_input();
    write_functions(&mut input, &session)?;
    let mut reader = FrameReader::new(Cursor::new(into_bytes(input)?));
    reader.read_int()?; // eval type
    reader.read_int()?; // empty runner conf
    reader.read_int()?; // one slot
    assert_matches!(
        read_single_udf(&mut reader, &registry, &context, EvalType::Scalar),
        Err(Error::FunctionKindMismatch {
            expected: FunctionKind::Batch,
            actual: FunctionKind::Row,
        })
    );
    Ok(())
}

#[test]
fn test_command_display_and_bytes() -> eyre::Result<()> {
    let command = Command::new("add", [Value::Int(5)]);
    assert_eq!(command.to_string(), "add(5)");
    assert_eq!(Command::from_bytes(&command.to_bytes()?)?, command);
    Ok(())
}

#[test]
fn test_aggregate_chain_wraps_partial_results() -> eyre::Result<()> {
    let mut registry = FunctionRegistry::new();
    register_builtins(&mut registry);
    let task = TaskContext::default();
    let broadcasts = BroadcastRegistry::new();
    let context = FunctionContext {
        task: &task,
        broadcasts: &broadcasts,
        accumulators: AccumulatorHandle::new(),
        paths: &[],
    };
    let sum = registry.resolve(&Command::new("sum", []), &context)?;
    let count = registry.resolve(&Command::new("count", []), &context)?;
    let chained = sum.then(count)?.into_aggregate()?;
    let series = Series::new("v", vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(chained(&[series]).map_err(Error::from)?, Value::Int(1));
    Ok(())
}
