pub mod error;
pub use self::error::{DynError, DynResult, Error, Result};

pub mod value;
pub use self::value::{Field, Type, Value};

pub mod series;
pub use self::series::{Column, Frame, Series};

pub mod time;
pub use self::time::{DateTimeNaive, DateTimeUtc, Duration};
