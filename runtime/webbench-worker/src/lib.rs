//! Fan-out query latency benchmark worker.
//!
//! A [`Worker`] is built once per benchmark from a store and a composite
//! query. Each call assembles one entity record by running the entity's
//! sub-queries in parallel, serializes it to JSON and reports how long that
//! took.

pub mod assemble;
pub mod config;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod protocol;
pub mod run;
pub mod task;
pub mod timing;

pub use dispatch::{build, EntityKind, Worker, WorkerConfig};
pub use error::{BenchError, Result};
pub use model::{Movie, Person, User};
pub use protocol::{serve, ServeConfig, ServeSummary};
pub use run::{run, Report, RunConfig};
pub use timing::Measurement;
