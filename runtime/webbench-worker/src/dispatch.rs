//! Entity classification and worker construction.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use webbench_db::Store;

use crate::assemble::{Aggregate, Assembler};
use crate::error::{BenchError, Result};
use crate::model::{Movie, Person, User};
use crate::task::SubQuery;
use crate::timing::{Execute, Measurement};

/// Separator between the sub-queries of a composite query string.
pub const QUERY_DELIMITER: char = ';';

/// The closed set of entity kinds the worker can benchmark.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Movie,
    Person,
    User,
}

impl EntityKind {
    /// Classifier vocabulary, matched case-sensitively as substrings.
    const VOCABULARY: [(&'static str, EntityKind); 3] = [
        ("users", EntityKind::User),
        ("movie", EntityKind::Movie),
        ("person", EntityKind::Person),
    ];

    /// Picks the kind whose vocabulary word occurs first in `input`.
    pub fn classify(input: &str) -> Result<Self> {
        Self::VOCABULARY
            .iter()
            .filter_map(|(word, kind)| input.find(word).map(|at| (at, *kind)))
            .min_by_key(|(at, _)| *at)
            .map(|(_, kind)| kind)
            .ok_or_else(|| BenchError::Classification(input.to_string()))
    }

    /// Number of sub-queries in this kind's shape.
    pub fn slots(self) -> usize {
        match self {
            EntityKind::Movie => 4,
            EntityKind::Person => 3,
            EntityKind::User => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Movie => "movie",
            EntityKind::Person => "person",
            EntityKind::User => "user",
        }
    }

    /// Splits a composite query into exactly `slots()` trimmed parts. A
    /// single trailing `;` is tolerated.
    pub fn split_queries(self, composite: &str) -> Result<Vec<String>> {
        let mut parts: Vec<&str> = composite.split(QUERY_DELIMITER).map(str::trim).collect();
        if parts.len() > 1 && parts.last().is_some_and(|last| last.is_empty()) {
            parts.pop();
        }
        if parts.len() != self.slots() || parts.iter().any(|part| part.is_empty()) {
            return Err(BenchError::QueryCount {
                kind: self,
                expected: self.slots(),
                actual: parts.iter().filter(|part| !part.is_empty()).count(),
            });
        }
        Ok(parts.into_iter().map(str::to_string).collect())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction input for a [`Worker`].
#[derive(Clone, Debug, Default)]
pub struct WorkerConfig {
    /// Classifier input. When absent the composite query itself is
    /// classified.
    pub kind: Option<String>,
    /// `;`-delimited sub-queries, in slot order.
    pub query: String,
    /// Expected number of simultaneous callers.
    pub concurrency: usize,
}

impl WorkerConfig {
    pub fn new(query: impl Into<String>, concurrency: usize) -> Self {
        Self {
            kind: None,
            query: query.into(),
            concurrency,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn entity_kind(&self) -> Result<EntityKind> {
        EntityKind::classify(self.kind.as_deref().unwrap_or(&self.query))
    }
}

/// A built benchmark worker: a reusable timed executor plus the store its
/// prepared queries came from.
///
/// `invoke` may be called from any number of threads. `close` is the
/// teardown hook and consumes the worker, so it runs at most once.
pub struct Worker {
    executor: Box<dyn Execute>,
    store: Box<dyn Store>,
}

impl Worker {
    pub fn kind(&self) -> EntityKind {
        self.executor.kind()
    }

    pub fn invoke(&self, key: &str) -> Result<Measurement> {
        self.executor.invoke(key)
    }

    /// Releases every prepared query's connections, then the store.
    ///
    /// The store is closed even when a query fails to close; the first
    /// failure is returned.
    pub fn close(self) -> Result<()> {
        let kind = self.executor.kind();
        let store = self.store.name();
        let mut first_err = None;
        if let Err(err) = self.executor.close() {
            first_err.get_or_insert(err);
        }
        if let Err(err) = self.store.close() {
            warn!(%kind, store, %err, "closing store failed");
            first_err.get_or_insert(err.into());
        }
        match first_err {
            Some(err) => Err(err),
            None => {
                info!(%kind, store, "worker closed");
                Ok(())
            }
        }
    }
}

/// Classifies the configured kind, splits and prepares its queries once,
/// and returns the worker that executes them.
///
/// Classification and the query count are checked before anything is
/// prepared.
pub fn build(store: Box<dyn Store>, config: &WorkerConfig) -> Result<Worker> {
    let kind = config.entity_kind()?;
    let queries = kind.split_queries(&config.query)?;
    let executor: Box<dyn Execute> = match kind {
        EntityKind::Movie => Box::new(assembler::<Movie>(store.as_ref(), &queries, config)?),
        EntityKind::Person => Box::new(assembler::<Person>(store.as_ref(), &queries, config)?),
        EntityKind::User => Box::new(assembler::<User>(store.as_ref(), &queries, config)?),
    };
    info!(
        %kind,
        store = store.name(),
        queries = queries.len(),
        concurrency = config.concurrency,
        "worker built"
    );
    Ok(Worker { executor, store })
}

fn assembler<A: Aggregate>(
    store: &dyn Store,
    queries: &[String],
    config: &WorkerConfig,
) -> Result<Assembler<A>> {
    let mut tasks = Vec::with_capacity(queries.len());
    for (slot, text) in queries.iter().enumerate() {
        match SubQuery::prepare(store, slot, text) {
            Ok(task) => tasks.push(task),
            Err(err) => {
                // Release what was already prepared; the prepare error wins.
                for task in tasks {
                    let prepared = task.slot();
                    if let Err(close_err) = task.close() {
                        warn!(
                            slot = prepared,
                            err = %close_err,
                            "releasing prepared sub-query failed"
                        );
                    }
                }
                return Err(err);
            }
        }
    }
    Assembler::new(tasks, config.concurrency)
}
