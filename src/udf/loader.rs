// Copyright © 2024 Pathway

use std::collections::BTreeMap;
use std::io::Read;
use std::str::FromStr;

use chrono_tz::Tz;
use log::{debug, info};

use super::{Command, EvalType, FunctionContext, FunctionRegistry, UserFunction};
use crate::channel::FrameReader;
use crate::engine::time::parse_timezone;
use crate::engine::{Error, Result, Type};
use crate::execution::Pipeline;
use crate::serialization::TabularOptions;

pub const TIMEZONE_KEY: &str = "session.timezone";
pub const SAFECHECK_KEY: &str = "arrow.safe_type_conversion";
pub const ASSIGN_COLUMNS_BY_NAME_KEY: &str = "struct.assign_columns_by_name";
pub const WINDOW_BOUND_TYPES_KEY: &str = "window.bound_types";
pub const ROW_COUNT_POLICY_KEY: &str = "map_iter.row_count_policy";

/// How strictly the batch map mode relates output rows to input rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RowCountPolicy {
    #[default]
    Unconstrained,
    /// Cumulative output never exceeds cumulative input.
    Ceiling,
    /// Ceiling, and the totals must match once the stream ends.
    ExactTotal,
}

impl FromStr for RowCountPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "unconstrained" => Ok(Self::Unconstrained),
            "ceiling" => Ok(Self::Ceiling),
            "exact_total" => Ok(Self::ExactTotal),
            _ => Err(Error::InvalidRowCountPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowBound {
    Bounded,
    Unbounded,
}

impl FromStr for WindowBound {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bounded" => Ok(Self::Bounded),
            "unbounded" => Ok(Self::Unbounded),
            _ => Err(Error::InvalidWindowBoundType(s.to_string())),
        }
    }
}

/// Key/value configuration sent ahead of the UDFs of the columnar modes.
#[derive(Debug, Clone)]
pub struct RunnerConf {
    pub timezone: Option<Tz>,
    pub safecheck: bool,
    pub assign_columns_by_name: bool,
    pub window_bound_types: Option<Vec<WindowBound>>,
    pub row_count_policy: RowCountPolicy,
    pub entries: BTreeMap<String, String>,
}

impl Default for RunnerConf {
    fn default() -> Self {
        Self {
            timezone: None,
            safecheck: false,
            assign_columns_by_name: true,
            window_bound_types: None,
            row_count_policy: RowCountPolicy::default(),
            entries: BTreeMap::new(),
        }
    }
}

fn parse_flag(entries: &BTreeMap<String, String>, key: &str, default: bool) -> bool {
    entries
        .get(key)
        .map_or(default, |value| value.trim().eq_ignore_ascii_case("true"))
}

impl RunnerConf {
    pub fn read<R: Read>(reader: &mut FrameReader<R>) -> Result<Self> {
        let count = reader.read_count()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key = reader.read_utf8()?;
            let value = reader.read_utf8()?;
            entries.insert(key, value);
        }
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: BTreeMap<String, String>) -> Result<Self> {
        let timezone = entries
            .get(TIMEZONE_KEY)
            .map(|timezone| parse_timezone(timezone))
            .transpose()?;
        let window_bound_types = entries
            .get(WINDOW_BOUND_TYPES_KEY)
            .map(|types| {
                types
                    .split(',')
                    .map(str::parse)
                    .collect::<Result<Vec<WindowBound>>>()
            })
            .transpose()?;
        let row_count_policy = entries
            .get(ROW_COUNT_POLICY_KEY)
            .map(|policy| policy.parse::<RowCountPolicy>())
            .transpose()?
            .unwrap_or_default();
        let conf = Self {
            timezone,
            safecheck: parse_flag(&entries, SAFECHECK_KEY, false),
            assign_columns_by_name: parse_flag(&entries, ASSIGN_COLUMNS_BY_NAME_KEY, true),
            window_bound_types,
            row_count_policy,
            entries,
        };
        debug!("Runner configuration: {conf:?}");
        Ok(conf)
    }

    pub fn window_bound(&self, slot: usize) -> Result<WindowBound> {
        self.window_bound_types
            .as_ref()
            .ok_or(Error::MissingConf(WINDOW_BOUND_TYPES_KEY))?
            .get(slot)
            .copied()
            .ok_or(Error::MissingConf(WINDOW_BOUND_TYPES_KEY))
    }

    pub fn tabular_options(&self, df_for_struct: bool) -> TabularOptions {
        TabularOptions {
            timezone: self.timezone,
            safecheck: self.safecheck,
            assign_columns_by_name: self.assign_columns_by_name,
            df_for_struct,
        }
    }
}

/// One UDF slot: its argument offsets, the composed chain and the declared type
/// of the last function in the chain.
#[derive(Debug, Clone)]
pub struct LoadedUdf {
    pub arg_offsets: Vec<usize>,
    pub function: UserFunction,
    pub return_type: Type,
}

pub fn read_single_udf<R: Read>(
    reader: &mut FrameReader<R>,
    registry: &FunctionRegistry,
    context: &FunctionContext,
    eval_type: EvalType,
) -> Result<LoadedUdf> {
    let num_args = reader.read_count()?;
    let arg_offsets = (0..num_args)
        .map(|_| reader.read_count())
        .collect::<Result<Vec<_>>>()?;
    let chain_length = reader.read_count()?;
    let expected = eval_type.function_kind();
    let mut functions = Vec::with_capacity(chain_length);
    let mut return_type = None;
    for _ in 0..chain_length {
        let command = Command::from_bytes(&reader.read_bytes()?)?;
        let declared: Type = bincode::deserialize(&reader.read_bytes()?)?;
        let function = registry.resolve(&command, context)?;
        if function.kind() != expected {
            return Err(Error::FunctionKindMismatch {
                expected,
                actual: function.kind(),
            });
        }
        functions.push(function);
        return_type = Some(declared);
    }
    let function = UserFunction::chain(functions)?;
    let return_type = return_type.ok_or(Error::EmptyChain)?;
    Ok(LoadedUdf {
        arg_offsets,
        function,
        return_type,
    })
}

/// Reads everything that follows the eval type and builds the pipeline for it.
pub fn read_pipeline<R: Read>(
    reader: &mut FrameReader<R>,
    registry: &FunctionRegistry,
    context: &FunctionContext,
    eval_type: EvalType,
) -> Result<Pipeline> {
    if eval_type == EvalType::NonUdf {
        let command = Command::from_bytes(&reader.read_bytes()?)?;
        let function = registry.resolve(&command, context)?.into_partition()?;
        return Ok(Pipeline::Partition(function));
    }
    let conf = if eval_type.is_columnar() {
        Some(RunnerConf::read(reader)?)
    } else {
        None
    };
    let num_udfs = reader.read_count()?;
    if eval_type.is_single_slot() && num_udfs != 1 {
        return Err(Error::UnexpectedUdfCount {
            eval_type,
            expected: 1,
            actual: num_udfs,
        });
    }
    let udfs = (0..num_udfs)
        .map(|_| read_single_udf(reader, registry, context, eval_type))
        .collect::<Result<Vec<_>>>()?;
    info!("Loaded {num_udfs} UDF(s) for {eval_type}");
    Pipeline::build(eval_type, conf.unwrap_or_default(), udfs)
}

/// Key and value column offsets of one input table of a grouped mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOffsets {
    pub keys: Vec<usize>,
    pub values: Vec<usize>,
}

/// Splits the nested offsets of the grouped modes.
///
/// The encoding repeats `[group_len, key_count, key_offsets..., value_offsets...]`
/// once per input table, `group_len` counting the entries after itself.
pub fn parse_group_offsets(offsets: &[usize]) -> Result<Vec<GroupOffsets>> {
    let invalid = || Error::InvalidGroupOffsets(offsets.to_vec());
    let mut parsed = Vec::new();
    let mut rest = offsets;
    while let Some((&group_len, tail)) = rest.split_first() {
        if group_len > tail.len() {
            return Err(invalid());
        }
        let (group, tail) = tail.split_at(group_len);
        let (&key_count, columns) = group.split_first().ok_or_else(invalid)?;
        if key_count > columns.len() {
            return Err(invalid());
        }
        let (keys, values) = columns.split_at(key_count);
        parsed.push(GroupOffsets {
            keys: keys.to_vec(),
            values: values.to_vec(),
        });
        rest = tail;
    }
    Ok(parsed)
}
