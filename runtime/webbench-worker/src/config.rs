//! Command-line and environment configuration.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::debug;
use webbench_db::Store;
use webbench_db::sqlite::SqliteStore;

use crate::dispatch::WorkerConfig;
use crate::error::{BenchError, Result};
use crate::protocol::ServeConfig;
use crate::run::RunConfig;

#[derive(Parser, Debug)]
#[command(name = "webbench-worker", version)]
#[command(about = "Fan-out query latency benchmark worker", long_about = None)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Benchmark one entity kind and print a JSON report on stdout
    Run(RunArgs),
    /// Answer framed lookup requests on stdin/stdout
    Serve(ServeArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Sqlite,
    Postgres,
}

#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    #[arg(long, value_enum, env = "WEBBENCH_BACKEND", default_value_t = Backend::Sqlite)]
    pub backend: Backend,

    /// SQLite database path or PostgreSQL connection string
    #[arg(long, env = "WEBBENCH_DSN")]
    pub dsn: String,

    /// Entity kind (`movie`, `person` or `users`); defaults to classifying
    /// the query text
    #[arg(long, env = "WEBBENCH_KIND")]
    pub kind: Option<String>,

    /// Sub-queries separated by `;`
    #[arg(long, env = "WEBBENCH_QUERY", conflicts_with = "query_file")]
    pub query: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub query_file: Option<PathBuf>,

    /// Expected simultaneous callers; sizes connections and record pools
    #[arg(long, env = "WEBBENCH_CONCURRENCY", default_value_t = 4)]
    pub concurrency: usize,

    /// Extra PEM root certificates for PostgreSQL TLS
    #[arg(long, env = "WEBBENCH_SSL_ROOT_CERT", value_name = "PATH")]
    pub ssl_root_cert: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub worker: WorkerArgs,

    /// File with one lookup key per line
    #[arg(long, value_name = "PATH")]
    pub keys_file: PathBuf,

    /// Warmup seconds before latencies are recorded
    #[arg(long, default_value_t = 2.0)]
    pub warmup: f64,

    /// Measured seconds
    #[arg(long, default_value_t = 10.0)]
    pub duration: f64,

    /// Distinct payloads to include in the report
    #[arg(long, default_value_t = 1)]
    pub samples: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub worker: WorkerArgs,

    #[arg(long, default_value_t = 64)]
    pub max_queue: usize,
}

impl WorkerArgs {
    pub fn query_text(&self) -> Result<String> {
        match (&self.query, &self.query_file) {
            (Some(query), _) => Ok(query.clone()),
            (None, Some(path)) => fs::read_to_string(path).map_err(|err| {
                BenchError::Config(format!("cannot read query file {}: {err}", path.display()))
            }),
            (None, None) => Err(BenchError::Config(
                "one of --query or --query-file is required".to_string(),
            )),
        }
    }

    pub fn worker_config(&self) -> Result<WorkerConfig> {
        if self.concurrency == 0 {
            return Err(BenchError::Config("--concurrency must be at least 1".to_string()));
        }
        Ok(WorkerConfig {
            kind: self.kind.clone(),
            query: self.query_text()?,
            concurrency: self.concurrency,
        })
    }

    pub fn open_store(&self) -> Result<Box<dyn Store>> {
        debug!(backend = ?self.backend, "opening store");
        match self.backend {
            Backend::Sqlite => Ok(Box::new(SqliteStore::open(&self.dsn, self.concurrency)?)),
            Backend::Postgres => self.open_postgres(),
        }
    }

    #[cfg(feature = "postgres")]
    fn open_postgres(&self) -> Result<Box<dyn Store>> {
        use webbench_db::postgres::{PgStore, PgStoreConfig};

        let mut config = PgStoreConfig::new(self.dsn.clone());
        config.connections_per_query = self.concurrency;
        config.ssl_root_cert = self.ssl_root_cert.clone();
        Ok(Box::new(PgStore::connect(config)?))
    }

    #[cfg(not(feature = "postgres"))]
    fn open_postgres(&self) -> Result<Box<dyn Store>> {
        Err(BenchError::Config(
            "built without PostgreSQL support; enable the `postgres` feature".to_string(),
        ))
    }
}

impl RunArgs {
    pub fn run_config(&self) -> Result<RunConfig> {
        Ok(RunConfig {
            concurrency: self.worker.concurrency,
            warmup: seconds("--warmup", self.warmup)?,
            duration: seconds("--duration", self.duration)?,
            samples: self.samples,
        })
    }

    /// Blank lines and `#` comments are skipped.
    pub fn load_keys(&self) -> Result<Vec<String>> {
        let content = fs::read_to_string(&self.keys_file).map_err(|err| {
            BenchError::Config(format!(
                "cannot read keys file {}: {err}",
                self.keys_file.display()
            ))
        })?;
        Ok(parse_keys(&content))
    }
}

impl ServeArgs {
    pub fn serve_config(&self) -> ServeConfig {
        ServeConfig {
            concurrency: self.worker.concurrency,
            max_queue: self.max_queue,
        }
    }
}

fn seconds(flag: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|err| BenchError::Config(format!("{flag} {value}: {err}")))
}

fn parse_keys(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
