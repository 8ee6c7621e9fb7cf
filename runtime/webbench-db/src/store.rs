//! The store capability: prepare a query once, execute it per key.

use std::ops::ControlFlow;

use crate::error::{DecodeError, Result};
use crate::value::Row;

/// Per-row callback. `Break` stops streaming the remaining rows.
pub type RowSink<'a> =
    dyn for<'r, 'v> FnMut(&'r Row<'v>) -> std::result::Result<ControlFlow<()>, DecodeError> + 'a;

/// A relational store that can compile parameterized queries.
pub trait Store: Send + Sync {
    /// Short driver name used in logs.
    fn name(&self) -> &'static str;

    /// Compiles `text` once. The returned query takes exactly one parameter,
    /// the lookup key.
    fn prepare(&self, text: &str) -> Result<Box<dyn PreparedQuery>>;

    /// Releases store-wide resources. Prepared queries must be closed first.
    fn close(&self) -> Result<()>;
}

/// A compiled query bound to a single key parameter.
///
/// Implementations must allow concurrent `for_each_row` calls; each call
/// streams the rows of one execution in the store's natural order.
pub trait PreparedQuery: Send + Sync {
    fn text(&self) -> &str;

    /// Executes with `key` and feeds every row to `sink` until it breaks.
    fn for_each_row(&self, key: &str, sink: &mut RowSink<'_>) -> Result<()>;

    /// Releases the connections held for this query.
    fn close(self: Box<Self>) -> Result<()>;
}
