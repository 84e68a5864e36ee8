// Copyright © 2024 Pathway

use std::process;
use std::time::Instant;

use log::error;

use udf_worker::builtins::register_builtins;
use udf_worker::channel::connect_and_authenticate;
use udf_worker::env::WorkerEnv;
use udf_worker::udf::FunctionRegistry;
use udf_worker::worker::{Worker, WorkerConfig, FAILURE_EXIT_CODE};

fn main() {
    let started = Instant::now();
    env_logger::init();

    let env = match WorkerEnv::from_env() {
        Ok(env) => env,
        Err(err) => {
            error!("Invalid worker environment: {err}");
            process::exit(FAILURE_EXIT_CODE);
        }
    };
    let (reader, writer) = match connect_and_authenticate(env.factory_port, &env.factory_secret) {
        Ok(connection) => connection,
        Err(err) => {
            error!("Failed to connect to port {}: {err}", env.factory_port);
            process::exit(FAILURE_EXIT_CODE);
        }
    };

    let mut registry = FunctionRegistry::new();
    register_builtins(&mut registry);
    let mut worker = Worker::new(
        registry,
        WorkerConfig {
            memory_limit_mb: env.memory_limit_mb,
            started,
        },
    );
    process::exit(worker.serve(reader, writer));
}
