//! Store layer for the webbench worker: a blocking object pool, a
//! driver-neutral row model, and SQLite / PostgreSQL drivers behind the
//! [`Store`] trait.

mod error;
mod pool;
mod store;
mod value;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::{DecodeError, Result, StoreError};
pub use pool::{Pool, Pooled};
pub use store::{PreparedQuery, RowSink, Store};
pub use value::{Row, Value};
