// Copyright © 2024 Pathway

pub mod arrow_stream;
pub mod batched;
pub mod cogroup;
pub mod tabular;
pub mod udf_stream;

pub use self::arrow_stream::{BatchReader, BatchWriter};
pub use self::batched::{write_batched, ValueReader, DEFAULT_BATCH_SIZE};
pub use self::cogroup::CogroupReader;
pub use self::tabular::{TabularConverter, TabularOptions};
pub use self::udf_stream::{UdfStreamReader, UdfStreamWriter};
