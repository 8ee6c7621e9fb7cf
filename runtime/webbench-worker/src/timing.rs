use std::time::{Duration, Instant};

use crate::assemble::{Aggregate, Assembler};
use crate::dispatch::EntityKind;
use crate::error::Result;

/// Elapsed time of one call and the payload it produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Measurement {
    pub duration: Duration,
    pub payload: String,
}

/// A timed, reusable per-call executor.
pub trait Execute: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Assembles the record for `key` and serializes it. The clock covers
    /// the whole fan-out/fan-in cycle and the serialization.
    fn invoke(&self, key: &str) -> Result<Measurement>;

    fn close(self: Box<Self>) -> Result<()>;
}

impl<A: Aggregate> Execute for Assembler<A> {
    fn kind(&self) -> EntityKind {
        A::KIND
    }

    fn invoke(&self, key: &str) -> Result<Measurement> {
        let start = Instant::now();
        let record = self.assemble(key)?;
        let payload = serde_json::to_string(&*record)?;
        let duration = start.elapsed();
        Ok(Measurement { duration, payload })
    }

    fn close(self: Box<Self>) -> Result<()> {
        Assembler::<A>::close(*self)
    }
}
