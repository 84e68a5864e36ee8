// Copyright © 2024 Pathway

pub mod eval_type;
pub mod function;
pub mod loader;
pub mod registry;

pub use self::eval_type::EvalType;
pub use self::function::{BatchIter, ColumnIter, FunctionKind, UserFunction, ValueIter};
pub use self::loader::{
    parse_group_offsets, read_pipeline, read_single_udf, GroupOffsets, LoadedUdf,
    RowCountPolicy, RunnerConf, WindowBound,
};
pub use self::registry::{Command, Factory, FunctionContext, FunctionRegistry};
