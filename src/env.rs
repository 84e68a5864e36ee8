// Copyright © 2024 Pathway

use std::env;
use std::error;
use std::str::FromStr;

pub const FACTORY_PORT_VAR: &str = "UDF_WORKER_FACTORY_PORT";
pub const FACTORY_SECRET_VAR: &str = "UDF_WORKER_FACTORY_SECRET";
pub const MEMORY_MB_VAR: &str = "UDF_WORKER_MEMORY_MB";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("couldn't parse the value of {0:?} environment variable as UTF-8 string")]
    NotUtf8(String),

    #[error("couldn't parse the value of {0:?} environment variable: {1}")]
    ParsingFailed(String, #[source] Box<dyn error::Error + Send + Sync>),

    #[error("environment variable {0:?} is not set")]
    NotSet(String),
}

pub fn parse_env_var<T: FromStr>(name: &str) -> Result<Option<T>, Error>
where
    T::Err: error::Error + Send + Sync + 'static,
{
    if let Some(value) = env::var_os(name) {
        Ok(Some(
            value
                .into_string()
                .map_err(|_| Error::NotUtf8(name.to_string()))?
                .parse()
                .map_err(|err| Error::ParsingFailed(name.to_string(), Box::new(err)))?,
        ))
    } else {
        Ok(None)
    }
}

pub fn parse_env_var_required<T: FromStr>(name: &str) -> Result<T, Error>
where
    T::Err: error::Error + Send + Sync + 'static,
{
    parse_env_var(name)?.ok_or_else(|| Error::NotSet(name.to_string()))
}

/// Settings the worker process receives from its spawner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEnv {
    pub factory_port: u16,
    pub factory_secret: String,
    pub memory_limit_mb: Option<u64>,
}

impl WorkerEnv {
    pub fn from_env() -> Result<Self, Error> {
        let memory_limit_mb = parse_env_var::<i64>(MEMORY_MB_VAR)?
            .and_then(|limit| u64::try_from(limit).ok())
            .filter(|&limit| limit > 0);
        Ok(Self {
            factory_port: parse_env_var_required(FACTORY_PORT_VAR)?,
            factory_secret: parse_env_var_required(FACTORY_SECRET_VAR)?,
            memory_limit_mb,
        })
    }
}
