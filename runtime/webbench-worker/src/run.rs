//! Closed-loop benchmark driver.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, info};

use crate::dispatch::{EntityKind, Worker};
use crate::error::{BenchError, Result};

#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Client threads calling the worker back to back.
    pub concurrency: usize,
    pub warmup: Duration,
    pub duration: Duration,
    /// Distinct payloads kept in the report.
    pub samples: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            warmup: Duration::from_secs(2),
            duration: Duration::from_secs(10),
            samples: 1,
        }
    }
}

/// Latency distribution in microseconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub min: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub max: f64,
}

impl LatencySummary {
    pub fn from_durations(durations: &mut [Duration]) -> Self {
        if durations.is_empty() {
            return Self::default();
        }
        durations.sort_unstable();
        let micros = |duration: Duration| duration.as_nanos() as f64 / 1_000.0;
        let total: Duration = durations.iter().sum();
        Self {
            min: micros(durations[0]),
            mean: micros(total) / durations.len() as f64,
            p50: micros(percentile(durations, 50.0)),
            p90: micros(percentile(durations, 90.0)),
            p99: micros(percentile(durations, 99.0)),
            max: micros(durations[durations.len() - 1]),
        }
    }
}

/// Nearest-rank percentile of an ascending, non-empty slice.
fn percentile(sorted: &[Duration], pct: f64) -> Duration {
    let rank = (pct * sorted.len() as f64 / 100.0).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub kind: EntityKind,
    pub queries: u64,
    pub elapsed_secs: f64,
    pub qps: f64,
    pub latency_us: LatencySummary,
    pub samples: Vec<serde_json::Value>,
}

#[derive(Default)]
struct ClientStats {
    latencies: Vec<Duration>,
    samples: Vec<String>,
}

/// Drives `worker` from `config.concurrency` threads with randomly chosen
/// keys and summarizes the calls that finish after the warmup.
///
/// The first failed call stops every client and is returned.
pub fn run(worker: &Worker, keys: &[String], config: &RunConfig) -> Result<Report> {
    if keys.is_empty() {
        return Err(BenchError::Config("no lookup keys to benchmark".to_string()));
    }
    let concurrency = config.concurrency.max(1);
    let stop = AtomicBool::new(false);
    let start = Instant::now();
    let measure_from = start + config.warmup;
    let deadline = measure_from + config.duration;

    info!(
        kind = %worker.kind(),
        keys = keys.len(),
        concurrency,
        warmup_ms = config.warmup.as_millis() as u64,
        duration_ms = config.duration.as_millis() as u64,
        "benchmark started"
    );

    let outcomes: Vec<Result<ClientStats>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..concurrency)
            .map(|client| {
                let stop = &stop;
                scope.spawn(move || {
                    let outcome = drive(worker, keys, config.samples, measure_from, deadline, stop);
                    if let Err(err) = &outcome {
                        debug!(client, error = %err, "client stopped on error");
                        stop.store(true, Ordering::Release);
                    }
                    outcome
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    });
    let elapsed = Instant::now().saturating_duration_since(measure_from);

    let mut latencies = Vec::new();
    let mut payloads = Vec::new();
    let mut seen = HashSet::new();
    for outcome in outcomes {
        let stats = outcome?;
        latencies.extend(stats.latencies);
        for payload in stats.samples {
            if payloads.len() < config.samples && seen.insert(payload.clone()) {
                payloads.push(payload);
            }
        }
    }
    let samples = payloads
        .iter()
        .map(|payload| serde_json::from_str(payload))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let queries = latencies.len() as u64;
    let elapsed_secs = elapsed.as_secs_f64();
    let qps = if elapsed_secs > 0.0 {
        queries as f64 / elapsed_secs
    } else {
        0.0
    };
    let report = Report {
        kind: worker.kind(),
        queries,
        elapsed_secs,
        qps,
        latency_us: LatencySummary::from_durations(&mut latencies),
        samples,
    };
    info!(
        queries = report.queries,
        qps = report.qps,
        p50_us = report.latency_us.p50,
        p99_us = report.latency_us.p99,
        "benchmark finished"
    );
    Ok(report)
}

fn drive(
    worker: &Worker,
    keys: &[String],
    samples: usize,
    measure_from: Instant,
    deadline: Instant,
    stop: &AtomicBool,
) -> Result<ClientStats> {
    let mut rng = rand::thread_rng();
    let mut stats = ClientStats::default();
    while !stop.load(Ordering::Acquire) && Instant::now() < deadline {
        let Some(key) = keys.choose(&mut rng) else {
            break;
        };
        let measurement = worker.invoke(key)?;
        if Instant::now() < measure_from {
            continue;
        }
        stats.latencies.push(measurement.duration);
        if stats.samples.len() < samples && !stats.samples.contains(&measurement.payload) {
            stats.samples.push(measurement.payload);
        }
    }
    Ok(stats)
}
