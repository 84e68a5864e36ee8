// Copyright © 2024 Pathway

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::OnceLock;

use log::{debug, info};

use crate::channel::{connect_and_authenticate, FrameReader};
use crate::engine::{Error, Result, Value};

/// A broadcast variable, either received in full or stored in a file that is
/// decoded on first access.
#[derive(Debug)]
pub enum BroadcastValue {
    Loaded(Value),
    OnDisk {
        path: PathBuf,
        cache: OnceLock<Value>,
    },
}

impl BroadcastValue {
    pub fn on_disk(path: impl Into<PathBuf>) -> Self {
        Self::OnDisk {
            path: path.into(),
            cache: OnceLock::new(),
        }
    }

    pub fn value(&self) -> Result<&Value> {
        match self {
            Self::Loaded(value) => Ok(value),
            Self::OnDisk { path, cache } => {
                if let Some(value) = cache.get() {
                    return Ok(value);
                }
                debug!("Loading broadcast value from {}", path.display());
                let value: Value = bincode::deserialize(&fs::read(path)?)?;
                Ok(cache.get_or_init(|| value))
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct BroadcastRegistry {
    values: HashMap<i64, BroadcastValue>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: i64, value: BroadcastValue) {
        self.values.insert(id, value);
    }

    pub fn evict(&mut self, id: i64) -> Result<BroadcastValue> {
        self.values.remove(&id).ok_or(Error::UnknownBroadcast(id))
    }

    pub fn get(&self, id: i64) -> Result<&Value> {
        self.values
            .get(&id)
            .ok_or(Error::UnknownBroadcast(id))?
            .value()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.values.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Applies the broadcast section of the session: additions and evictions,
    /// with values coming either from inline paths or from the decryption server.
    pub fn read_updates<R: Read>(&mut self, reader: &mut FrameReader<R>) -> Result<()> {
        let needs_decryption_server = reader.read_bool()?;
        let count = reader.read_count()?;
        let mut server = if needs_decryption_server {
            let port = reader.read_int()?;
            let secret = reader.read_utf8()?;
            let port = u16::try_from(port)
                .map_err(|_| Error::ValueError(format!("invalid broadcast server port {port}")))?;
            Some(connect_and_authenticate(port, &secret)?)
        } else {
            None
        };
        for _ in 0..count {
            let id = reader.read_long()?;
            if id < 0 {
                let evicted = -(id + 1);
                self.evict(evicted)?;
                debug!("Evicted broadcast variable {evicted}");
                continue;
            }
            let value = match &mut server {
                Some((server_reader, _)) => {
                    let echoed = server_reader.read_long()?;
                    if echoed != id {
                        return Err(Error::BroadcastIdMismatch {
                            expected: id,
                            actual: echoed,
                        });
                    }
                    BroadcastValue::Loaded(bincode::deserialize(&server_reader.read_bytes()?)?)
                }
                None => BroadcastValue::on_disk(reader.read_utf8()?),
            };
            self.insert(id, value);
        }
        if let Some((_, mut server_writer)) = server {
            server_writer.write_all(&[1])?;
            server_writer.flush()?;
        }
        info!("{} broadcast variables available", self.values.len());
        Ok(())
    }
}
