// Copyright © 2024 Pathway

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int8Array, Int64Array, StructArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field as ArrowField, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use assert_matches::assert_matches;

use udf_worker::channel::{FrameReader, SpecialLength};
use udf_worker::engine::{
    Column, DateTimeNaive, DateTimeUtc, Duration, Error, Field, Frame, Series, Type, Value,
};
use udf_worker::serialization::{
    BatchReader, TabularConverter, TabularOptions, UdfStreamReader, UdfStreamWriter,
};

use super::helpers::{into_bytes, int_batch, new_input, write_batches};

fn converter(configure: impl FnOnce(&mut TabularOptions)) -> TabularConverter {
    let mut options = TabularOptions::default();
    configure(&mut options);
    TabularConverter::new(options)
}

#[test]
fn test_columns_survive_a_round_trip() -> eyre::Result<()> {
    let converter = TabularConverter::default();
    let point = Type::struct_of([Field::new("x", Type::Int64), Field::new("label", Type::String)]);
    let columns = [
        (
            Column::from(Series::new("_0", vec![Value::Int(1), Value::None, Value::Int(-3)])),
            Type::Int64,
        ),
        (
            Column::from(Series::new(
                "_1",
                vec![Value::from("a"), Value::from("bc"), Value::None],
            )),
            Type::String,
        ),
        (
            Column::from(Series::new(
                "_2",
                vec![
                    Value::Array(Arc::from(vec![Value::from(1.5), Value::from(2.5)])),
                    Value::Array(Arc::from(Vec::new())),
                    Value::None,
                ],
            )),
            Type::array_of(Type::Float64),
        ),
        (
            Column::from(Series::new(
                "_3",
                vec![
                    Value::Struct(Arc::from(vec![
                        ("x".into(), Value::Int(7)),
                        ("label".into(), Value::from("p")),
                    ])),
                    Value::None,
                    Value::Struct(Arc::from(vec![
                        ("label".into(), Value::from("q")),
                        ("x".into(), Value::Int(8)),
                    ])),
                ],
            )),
            point,
        ),
    ];
    let batch = converter.create_batch(columns.iter().map(|(column, type_)| (column, type_)))?;
    assert_eq!(batch.num_rows(), 3);
    assert_eq!(batch.schema().field(3).name(), "_3");

    let decoded = converter.batch_to_columns(&batch)?;
    assert_eq!(decoded[0], columns[0].0);
    assert_eq!(decoded[1], columns[1].0);
    assert_eq!(decoded[2], columns[2].0);
    let structs = decoded[3].as_series()?;
    assert_eq!(
        structs.values()[2],
        Value::Struct(Arc::from(vec![
            ("x".into(), Value::Int(8)),
            ("label".into(), Value::from("q")),
        ]))
    );
    assert_eq!(structs.values()[1], Value::None);
    Ok(())
}

#[test]
fn test_every_scalar_type_survives_a_round_trip() -> eyre::Result<()> {
    let converter = TabularConverter::default();
    let map = |entries: Vec<(Value, Value)>| Value::Map(Arc::from(entries));
    let cases = [
        (Type::Bool, vec![Value::Bool(true), Value::None, Value::Bool(false)]),
        (Type::Int8, vec![Value::Int(-128), Value::Int(127), Value::None]),
        (Type::Int16, vec![Value::Int(-300), Value::None, Value::Int(32_000)]),
        (Type::Int32, vec![Value::None, Value::Int(-70_000), Value::Int(2_000_000)]),
        (Type::Float32, vec![Value::from(0.5), Value::from(-2.25), Value::None]),
        (
            Type::Bytes,
            vec![Value::from(&b"xy"[..]), Value::None, Value::from(&b""[..])],
        ),
        (
            Type::Date,
            vec![
                Value::DateTimeNaive(DateTimeNaive::from_days(19_000)),
                Value::None,
                Value::DateTimeNaive(DateTimeNaive::from_days(-1)),
            ],
        ),
        (
            Type::Timestamp,
            vec![
                Value::DateTimeUtc(DateTimeUtc::new(1_700_000_000_123_456_000)),
                Value::None,
                Value::DateTimeUtc(DateTimeUtc::new(-1_000)),
            ],
        ),
        (
            Type::TimestampNaive,
            vec![
                Value::None,
                Value::DateTimeNaive(DateTimeNaive::new(1_700_000_000_000_001_000)),
                Value::DateTimeNaive(DateTimeNaive::new(0)),
            ],
        ),
        (
            Type::Duration,
            vec![
                Value::Duration(Duration::new(90_000_000)),
                Value::Duration(Duration::new(-5_000)),
                Value::None,
            ],
        ),
        (
            Type::Map(Arc::new(Type::String), Arc::new(Type::Int64)),
            vec![
                map(vec![(Value::from("a"), Value::Int(1)), (Value::from("b"), Value::None)]),
                Value::None,
                map(Vec::new()),
            ],
        ),
    ];
    let columns: Vec<(Column, Type)> = cases
        .iter()
        .enumerate()
        .map(|(index, (type_, values))| {
            let series = Series::new(format!("_{index}"), values.clone());
            (Column::from(series), type_.clone())
        })
        .collect();
    let batch = converter.create_batch(columns.iter().map(|(column, type_)| (column, type_)))?;
    assert_eq!(batch.num_columns(), cases.len());

    let decoded = converter.batch_to_columns(&batch)?;
    for ((column, type_), decoded) in columns.iter().zip(&decoded) {
        assert_eq!(decoded, column, "{type_} did not survive");
    }
    assert_eq!(
        batch.schema().field(8).data_type(),
        &DataType::Timestamp(TimeUnit::Microsecond, None)
    );
    Ok(())
}

#[test]
fn test_naive_timestamps_stay_naive() -> eyre::Result<()> {
    let micros = 1_700_000_000_000_000_i64;
    let array = TimestampMicrosecondArray::from(vec![Some(micros), None]);
    let schema = Schema::new(vec![ArrowField::new("t", array.data_type().clone(), true)]);
    let batch = RecordBatch::try_new(Arc::new(schema), vec![Arc::new(array)])?;

    // A session timezone must not shift wall-clock values.
    let warsaw = converter(|options| options.timezone = Some(chrono_tz::Europe::Warsaw));
    for converter in [TabularConverter::default(), warsaw] {
        let columns = converter.batch_to_columns(&batch)?;
        let expected = [
            Value::DateTimeNaive(DateTimeNaive::new(micros * 1_000)),
            Value::None,
        ];
        assert_eq!(columns[0].as_series()?.values(), &expected);

        let encoded = converter.column_to_array(&columns[0], &Type::TimestampNaive)?;
        assert_eq!(
            encoded.data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, None)
        );
        let encoded = encoded
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .expect("a microsecond timestamp array");
        assert_eq!(encoded.iter().collect::<Vec<_>>(), vec![Some(micros), None]);
    }
    Ok(())
}

#[test]
fn test_struct_columns_become_frames() -> eyre::Result<()> {
    let x: ArrayRef = Arc::new(Int64Array::from(vec![1, 2]));
    let y: ArrayRef = Arc::new(Int64Array::from(vec![10, 20]));
    let point = StructArray::from(vec![
        (Arc::new(ArrowField::new("x", DataType::Int64, true)), x),
        (Arc::new(ArrowField::new("y", DataType::Int64, true)), y),
    ]);
    let schema = Schema::new(vec![ArrowField::new("p", point.data_type().clone(), true)]);
    let batch = RecordBatch::try_new(Arc::new(schema), vec![Arc::new(point)])?;

    let frames = converter(|options| options.df_for_struct = true);
    let columns = frames.batch_to_columns(&batch)?;
    let frame = columns[0].as_frame()?;
    assert_eq!(frame.num_columns(), 2);
    assert_eq!(frame.column("y")?.values(), &[Value::Int(10), Value::Int(20)]);

    let series = TabularConverter::default().batch_to_columns(&batch)?;
    assert!(series[0].as_series().is_ok());
    Ok(())
}

#[test]
fn test_frames_are_assigned_by_name_or_position() -> eyre::Result<()> {
    let schema = Type::struct_of([Field::new("a", Type::Int64), Field::new("b", Type::Int64)]);
    let frame = Column::from(Frame::new(vec![
        Series::new("b", vec![Value::Int(2)]),
        Series::new("a", vec![Value::Int(1)]),
    ])?);

    let by_name = TabularConverter::default().column_to_array(&frame, &schema)?;
    let by_name = by_name.as_any().downcast_ref::<StructArray>().unwrap();
    let a = by_name.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
    assert_eq!(a.value(0), 1);

    let by_position = converter(|options| options.assign_columns_by_name = false)
        .column_to_array(&frame, &schema)?;
    let by_position = by_position.as_any().downcast_ref::<StructArray>().unwrap();
    let a = by_position.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
    assert_eq!(a.value(0), 2);

    let missing = Column::from(Frame::new(vec![Series::new("a", vec![Value::Int(1)])])?);
    assert_matches!(
        TabularConverter::default().column_to_array(&missing, &schema),
        Err(Error::StructFieldMissing(name)) if name == "b"
    );
    Ok(())
}

#[test]
fn test_timestamps_are_localized_to_the_session_timezone() -> eyre::Result<()> {
    // 2024-01-01T00:00:00Z, one hour ahead in Warsaw in winter
    let micros = 1_704_067_200_000_000_i64;
    let array = TimestampMicrosecondArray::from(vec![Some(micros), None]).with_timezone("UTC");
    let warsaw = converter(|options| options.timezone = Some(chrono_tz::Europe::Warsaw));

    let values = warsaw.array_to_values(&array)?;
    let expected_local = DateTimeNaive::new((micros + 3_600_000_000) * 1_000);
    assert_eq!(values, vec![Value::DateTimeNaive(expected_local), Value::None]);

    let back = warsaw.values_to_array(&values, &Type::Timestamp)?;
    let back = back
        .as_any()
        .downcast_ref::<TimestampMicrosecondArray>()
        .unwrap();
    assert_eq!(back.value(0), micros);
    assert!(back.is_null(1));
    assert_eq!(
        back.data_type(),
        &DataType::Timestamp(arrow::datatypes::TimeUnit::Microsecond, Some("UTC".into()))
    );

    let utc = TabularConverter::default().array_to_values(&array)?;
    assert_eq!(utc[0], Value::DateTimeUtc(DateTimeUtc::new(micros * 1_000)));
    Ok(())
}

#[test]
fn test_safe_conversion_rejects_lossy_output() -> eyre::Result<()> {
    let values = [Value::Int(300)];
    let lenient = TabularConverter::default().values_to_array(&values, &Type::Int8)?;
    let lenient = lenient.as_any().downcast_ref::<Int8Array>().unwrap();
    assert_eq!(lenient.value(0), 44);

    let strict = converter(|options| options.safecheck = true);
    assert_matches!(
        strict.values_to_array(&values, &Type::Int8),
        Err(Error::UnsafeConversion { .. })
    );
    assert_matches!(
        strict.values_to_array(&[Value::from(1.5)], &Type::Int64),
        Err(Error::UnsafeConversion { .. })
    );
    let sub_micro = Value::DateTimeUtc(DateTimeUtc::new(1_500));
    assert_matches!(
        strict.values_to_array(&[sub_micro.clone()], &Type::Timestamp),
        Err(Error::UnsafeConversion { .. })
    );
    assert!(TabularConverter::default()
        .values_to_array(&[sub_micro], &Type::Timestamp)
        .is_ok());
    Ok(())
}

#[test]
fn test_stream_leaves_trailing_protocol_data_unread() -> eyre::Result<()> {
    let mut input = new_input();
    write_batches(
        &mut input,
        &[int_batch(&[("a", &[1, 2])])?, int_batch(&[("a", &[3])])?],
    )?;
    input.write_special(SpecialLength::EndOfStream)?;

    let converter = TabularConverter::default();
    let mut reader = FrameReader::new(Cursor::new(into_bytes(input)?));
    let lengths = UdfStreamReader::new(&converter, &mut reader)?
        .map(|batch| batch.map(|(num_rows, _)| num_rows))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(lengths, vec![2, 1]);
    assert_eq!(reader.read_int()?, SpecialLength::EndOfStream.code());
    Ok(())
}

#[test]
fn test_start_marker_is_written_only_with_output() -> eyre::Result<()> {
    let converter = TabularConverter::default();
    let mut silent = new_input();
    assert_eq!(UdfStreamWriter::new(&converter, &mut silent).finish()?, 0);
    assert!(into_bytes(silent)?.is_empty());

    let mut output = new_input();
    let mut writer = UdfStreamWriter::new(&converter, &mut output);
    let column = Column::from(Series::new("_0", vec![Value::Int(1)]));
    writer.write_columns([(&column, &Type::Int64)])?;
    assert_eq!(writer.finish()?, 1);

    let mut reader = FrameReader::new(Cursor::new(into_bytes(output)?));
    assert_eq!(reader.read_int()?, SpecialLength::StartArrowStream.code());
    let batches = BatchReader::new(&mut reader)?.collect::<Result<Vec<_>, _>>()?;
    assert_eq!(batches.len(), 1);
    Ok(())
}
