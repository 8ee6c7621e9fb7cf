//! Fan-out / fan-in assembly of one aggregate record.
//!
//! An [`Assembler`] owns the sub-queries of one entity shape, a pool of
//! reusable records, and a thread pool that runs the sub-queries of a call
//! in parallel. Every sub-query writes only the field its slot is bound to;
//! the record is handed back only after the scope barrier, once every
//! writer has finished.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use webbench_db::{Pool, Pooled};

use crate::decode::FieldSink;
use crate::dispatch::EntityKind;
use crate::error::{BenchError, Result};
use crate::model::{Movie, Person, User};
use crate::task::SubQuery;

/// An aggregate record with a fixed slot → field binding.
pub trait Aggregate: Default + Serialize + Send + 'static {
    const KIND: EntityKind;

    /// One sink per query slot, in slot order. The borrows are disjoint, so
    /// the sinks can be written concurrently.
    fn sinks(&mut self) -> Vec<&mut dyn FieldSink>;
}

impl Aggregate for Movie {
    const KIND: EntityKind = EntityKind::Movie;

    fn sinks(&mut self) -> Vec<&mut dyn FieldSink> {
        let sinks: [&mut dyn FieldSink; 4] = [
            &mut self.detail,
            &mut self.directors,
            &mut self.cast,
            &mut self.reviews,
        ];
        sinks.into()
    }
}

impl Aggregate for Person {
    const KIND: EntityKind = EntityKind::Person;

    fn sinks(&mut self) -> Vec<&mut dyn FieldSink> {
        let sinks: [&mut dyn FieldSink; 3] =
            [&mut self.detail, &mut self.acted_in, &mut self.directed];
        sinks.into()
    }
}

impl Aggregate for User {
    const KIND: EntityKind = EntityKind::User;

    fn sinks(&mut self) -> Vec<&mut dyn FieldSink> {
        // Header and reviews come from the same flattened row stream.
        vec![self as &mut dyn FieldSink]
    }
}

pub struct Assembler<A: Aggregate> {
    tasks: Vec<SubQuery>,
    records: Arc<Pool<A>>,
    fanout: Option<rayon::ThreadPool>,
}

impl<A: Aggregate> Assembler<A> {
    /// `concurrency` bounds how many calls may assemble at once; further
    /// callers wait for a free record.
    pub fn new(tasks: Vec<SubQuery>, concurrency: usize) -> Result<Self> {
        let expected = A::KIND.slots();
        if tasks.len() != expected {
            return Err(BenchError::QueryCount {
                kind: A::KIND,
                expected,
                actual: tasks.len(),
            });
        }
        let concurrency = concurrency.max(1);
        let fanout = if expected > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(expected * concurrency)
                .thread_name(|index| format!("webbench-fanout-{index}"))
                .build()
                .map_err(|err| BenchError::Config(format!("fan-out pool: {err}")))?;
            Some(pool)
        } else {
            None
        };
        debug!(
            kind = %A::KIND,
            slots = expected,
            concurrency,
            "assembler ready"
        );
        Ok(Self {
            tasks,
            records: Pool::new(concurrency, A::default),
            fanout,
        })
    }

    /// Runs every sub-query for `key` and returns the completed record.
    ///
    /// The record stays checked out until the returned guard is dropped.
    pub fn assemble(&self, key: &str) -> Result<Pooled<A>> {
        let mut record = self
            .records
            .acquire(None)
            .ok_or_else(|| BenchError::QueryExecution("record pool closed".to_string()))?;
        self.fill(key, &mut record)?;
        Ok(record)
    }

    fn fill(&self, key: &str, record: &mut A) -> Result<()> {
        let sinks = record.sinks();
        debug_assert_eq!(sinks.len(), self.tasks.len());

        let Some(fanout) = self.fanout.as_ref() else {
            // Single-slot shape: no fan-out, run on the caller's thread.
            for (task, sink) in self.tasks.iter().zip(sinks) {
                task.execute(key, sink)?;
            }
            return Ok(());
        };

        let mut outcomes: Vec<Result<()>> = self.tasks.iter().map(|_| Ok(())).collect();
        fanout.scope(|scope| {
            for ((task, sink), outcome) in self.tasks.iter().zip(sinks).zip(outcomes.iter_mut()) {
                scope.spawn(move |_| *outcome = task.execute(key, sink));
            }
        });
        // Scope exit is the barrier: all writers are done here.
        outcomes.into_iter().collect()
    }

    pub fn close(self) -> Result<()> {
        let mut first_err = None;
        for task in self.tasks {
            let slot = task.slot();
            if let Err(err) = task.close() {
                warn!(kind = %A::KIND, slot, %err, "closing sub-query failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
