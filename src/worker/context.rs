// Copyright © 2024 Pathway

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::debug;

use crate::channel::FrameReader;
use crate::engine::Result;

/// Coordinates of a barrier task group member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierInfo {
    pub port: i32,
    pub secret: String,
}

impl BarrierInfo {
    /// Reads the barrier fields. They are always present on the wire, but only
    /// meaningful when the task is a barrier task.
    pub fn read<R: Read>(reader: &mut FrameReader<R>) -> Result<Option<Self>> {
        let is_barrier = reader.read_bool()?;
        let port = reader.read_int()?;
        let secret = reader.read_utf8()?;
        Ok(is_barrier.then_some(Self { port, secret }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInformation {
    pub name: String,
    pub addresses: Vec<String>,
}

/// Read-only description of the task this worker runs for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskContext {
    pub stage_id: i32,
    pub partition_id: i32,
    pub attempt_number: i32,
    pub attempt_id: i64,
    pub resources: BTreeMap<String, ResourceInformation>,
    pub local_properties: BTreeMap<String, String>,
    pub barrier: Option<BarrierInfo>,
}

impl TaskContext {
    pub fn read<R: Read>(
        reader: &mut FrameReader<R>,
        barrier: Option<BarrierInfo>,
    ) -> Result<Self> {
        let stage_id = reader.read_int()?;
        let partition_id = reader.read_int()?;
        let attempt_number = reader.read_int()?;
        let attempt_id = reader.read_long()?;

        let mut resources = BTreeMap::new();
        for _ in 0..reader.read_count()? {
            let key = reader.read_utf8()?;
            let name = reader.read_utf8()?;
            let addresses = (0..reader.read_count()?)
                .map(|_| reader.read_utf8())
                .collect::<Result<Vec<_>>>()?;
            resources.insert(key, ResourceInformation { name, addresses });
        }

        let mut local_properties = BTreeMap::new();
        for _ in 0..reader.read_count()? {
            let key = reader.read_utf8()?;
            let value = reader.read_utf8()?;
            local_properties.insert(key, value);
        }

        let context = Self {
            stage_id,
            partition_id,
            attempt_number,
            attempt_id,
            resources,
            local_properties,
            barrier,
        };
        debug!(
            "Task context: stage {}, partition {}, attempt {} ({})",
            context.stage_id, context.partition_id, context.attempt_number, context.attempt_id
        );
        Ok(context)
    }

    pub fn is_barrier(&self) -> bool {
        self.barrier.is_some()
    }

    pub fn local_property(&self, key: &str) -> Option<&str> {
        self.local_properties.get(key).map(String::as_str)
    }
}

/// Reads the working directory and the include paths shipped with the task.
///
/// The working directory comes first, include names are resolved against it
/// and duplicates are dropped.
pub fn read_paths<R: Read>(reader: &mut FrameReader<R>) -> Result<Vec<PathBuf>> {
    let workdir = PathBuf::from(reader.read_utf8()?);
    let includes = (0..reader.read_count()?)
        .map(|_| reader.read_utf8())
        .collect::<Result<Vec<_>>>()?;
    Ok(resolve_paths(&workdir, &includes))
}

fn resolve_paths(workdir: &Path, includes: &[String]) -> Vec<PathBuf> {
    std::iter::once(workdir.to_path_buf())
        .chain(includes.iter().map(|include| workdir.join(include)))
        .unique()
        .collect()
}
