use webbench_db::{PreparedQuery, Row, Store};
use tracing::{debug, trace};

use crate::decode::FieldSink;
use crate::error::Result;

/// One prepared statement bound to one slot of an entity shape.
pub struct SubQuery {
    slot: usize,
    query: Box<dyn PreparedQuery>,
}

impl SubQuery {
    pub fn prepare(store: &dyn Store, slot: usize, text: &str) -> Result<Self> {
        let query = store.prepare(text)?;
        Ok(Self { slot, query })
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Resets `sink`, then streams this query's rows for `key` into it.
    pub fn execute(&self, key: &str, sink: &mut dyn FieldSink) -> Result<()> {
        sink.reset();
        let mut rows = 0usize;
        let outcome = self.query.for_each_row(key, &mut |row: &Row<'_>| {
            rows += 1;
            sink.accept(row)
        });
        if let Err(err) = &outcome {
            debug!(
                slot = self.slot,
                query = self.query.text(),
                rows,
                %err,
                "sub-query failed"
            );
        }
        outcome?;
        trace!(slot = self.slot, rows, "sub-query complete");
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        self.query.close()?;
        Ok(())
    }
}
