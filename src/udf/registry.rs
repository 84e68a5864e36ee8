// Copyright © 2024 Pathway

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use log::debug;
use serde::{Deserialize, Serialize};

use super::UserFunction;
use crate::engine::{DynResult, Error, Result, Value};
use crate::worker::{AccumulatorHandle, BroadcastRegistry, TaskContext};

/// The serialized form of a callable: a registered name plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub args: Vec<Value>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (index, arg) in self.args.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

/// Session state visible to function factories while functions are loaded.
pub struct FunctionContext<'a> {
    pub task: &'a TaskContext,
    pub broadcasts: &'a BroadcastRegistry,
    pub accumulators: AccumulatorHandle,
    /// Working directory followed by the include paths shipped with the task.
    pub paths: &'a [PathBuf],
}

pub type Factory = Box<dyn Fn(&[Value], &FunctionContext) -> DynResult<UserFunction>>;

#[derive(Default)]
pub struct FunctionRegistry {
    factories: HashMap<String, Factory>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&[Value], &FunctionContext) -> DynResult<UserFunction> + 'static,
    ) -> &mut Self {
        let name = name.into();
        if self.factories.insert(name.clone(), Box::new(factory)).is_some() {
            debug!("Replaced factory of function {name:?}");
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn resolve(&self, command: &Command, context: &FunctionContext) -> Result<UserFunction> {
        let factory = self
            .factories
            .get(&command.name)
            .ok_or_else(|| Error::UnknownFunction(command.name.clone()))?;
        debug!("Loading function {command}");
        Ok(factory(&command.args, context)?)
    }
}
