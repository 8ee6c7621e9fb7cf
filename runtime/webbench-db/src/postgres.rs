//! PostgreSQL driver for the store layer.
//!
//! Queries run on a private multi-threaded Tokio runtime; the store exposes
//! the same blocking interface as the SQLite driver so callers can fan out
//! on plain threads.

use std::fmt::Display;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rustls::{ClientConfig, RootCertStore};
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Statement};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, error, warn};

use crate::error::{Result, StoreError};
use crate::store::{PreparedQuery, RowSink, Store};
use crate::value::{Row, Value};
use crate::{Pool, Pooled};

/// How long a closed client's connection task may take to finish.
const CONNECTION_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type ConnectionTask = JoinHandle<std::result::Result<(), tokio_postgres::Error>>;

#[derive(Clone, Debug)]
pub struct PgStoreConfig {
    pub dsn: String,
    /// Connections opened for every prepared query.
    pub connections_per_query: usize,
    pub connect_timeout: Duration,
    pub ssl_root_cert: Option<std::path::PathBuf>,
}

impl PgStoreConfig {
    pub fn new(dsn: String) -> Self {
        Self {
            dsn,
            connections_per_query: 1,
            connect_timeout: Duration::from_secs(5),
            ssl_root_cert: None,
        }
    }
}

#[derive(Clone)]
enum PgTls {
    None,
    Rustls(MakeRustlsConnect),
}

struct PgConn {
    client: Client,
    statement: Statement,
    key_type: KeyType,
    task: ConnectionTask,
}

impl PgConn {
    async fn connect(config: &Config, tls: &PgTls) -> Result<(Client, ConnectionTask)> {
        match tls {
            PgTls::None => {
                let (client, connection) = config
                    .connect(NoTls)
                    .await
                    .map_err(|err| StoreError::Connection(err.to_string()))?;
                Ok((client, spawn_connection(connection)))
            }
            PgTls::Rustls(tls) => {
                let (client, connection) = config
                    .connect(tls.clone())
                    .await
                    .map_err(|err| StoreError::Connection(err.to_string()))?;
                Ok((client, spawn_connection(connection)))
            }
        }
    }

    /// Drops the client and waits for its connection task to wind down.
    fn close(self, handle: &Handle) -> Result<()> {
        let PgConn { client, task, .. } = self;
        drop(client);
        await_connection(handle, task, CONNECTION_CLOSE_TIMEOUT)
    }
}

fn spawn_connection<F>(connection: F) -> ConnectionTask
where
    F: Future<Output = std::result::Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = connection.await;
        if let Err(err) = &result {
            error!("Postgres connection error: {err}");
        }
        result
    })
}

fn await_connection<E: Display>(
    handle: &Handle,
    task: JoinHandle<std::result::Result<(), E>>,
    limit: Duration,
) -> Result<()> {
    match handle.block_on(async move { tokio::time::timeout(limit, task).await }) {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(err))) => Err(StoreError::Close(format!("connection ended with error: {err}"))),
        Ok(Err(err)) => Err(StoreError::Close(format!("connection task failed: {err}"))),
        Err(_) => Err(StoreError::Close(format!(
            "connection did not close within {limit:?}"
        ))),
    }
}

/// How the lookup key is bound, derived from the statement's inferred
/// parameter type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KeyType {
    Text,
    Int4,
    Int8,
}

impl KeyType {
    fn from_type(ty: &Type) -> Option<Self> {
        match *ty {
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                Some(KeyType::Text)
            }
            Type::INT4 => Some(KeyType::Int4),
            Type::INT8 => Some(KeyType::Int8),
            _ => None,
        }
    }
}

pub struct PgStore {
    config: PgStoreConfig,
    pg_config: Config,
    tls: PgTls,
    /// Taken and shut down by [`Store::close`].
    runtime: Mutex<Option<Runtime>>,
}

impl PgStore {
    /// Validates the DSN and opens one connection to check the server.
    pub fn connect(config: PgStoreConfig) -> Result<Self> {
        let mut pg_config = Config::from_str(&config.dsn)
            .map_err(|err| StoreError::Connection(format!("invalid Postgres DSN: {err}")))?;
        pg_config.connect_timeout(config.connect_timeout);
        let tls = match (pg_config.get_ssl_mode(), build_tls_connector(&config)?) {
            (SslMode::Disable, _) => PgTls::None,
            (_, Some(connector)) => PgTls::Rustls(connector),
            (SslMode::Require, None) => {
                return Err(StoreError::Connection(
                    "sslmode=require but no root certificates are available".to_string(),
                ));
            }
            (_, None) => {
                warn!("no root certificates available, connecting without TLS");
                PgTls::None
            }
        };
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("webbench-pg")
            .enable_all()
            .build()
            .map_err(|err| StoreError::Connection(format!("tokio runtime: {err}")))?;
        let check = runtime.block_on(async {
            let (client, _task) = PgConn::connect(&pg_config, &tls).await?;
            client
                .simple_query("SELECT 1")
                .await
                .map_err(|err| StoreError::Connection(err.to_string()))
        });
        check?;
        Ok(Self {
            config,
            pg_config,
            tls,
            runtime: Mutex::new(Some(runtime)),
        })
    }
}

impl Store for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn prepare(&self, text: &str) -> Result<Box<dyn PreparedQuery>> {
        let count = self.config.connections_per_query.max(1);
        let runtime = self.runtime.lock();
        let runtime = runtime
            .as_ref()
            .ok_or_else(|| StoreError::Connection("postgres store already closed".to_string()))?;
        let conns = runtime.block_on(async {
            let mut conns = Vec::with_capacity(count);
            for _ in 0..count {
                let (client, task) = PgConn::connect(&self.pg_config, &self.tls).await?;
                let statement = client
                    .prepare(text)
                    .await
                    .map_err(|err| StoreError::Prepare {
                        query: text.to_string(),
                        message: err.to_string(),
                    })?;
                let key_type = match statement.params() {
                    [ty] => KeyType::from_type(ty).ok_or_else(|| StoreError::Prepare {
                        query: text.to_string(),
                        message: format!("unsupported key parameter type {ty}"),
                    })?,
                    params => {
                        return Err(StoreError::Prepare {
                            query: text.to_string(),
                            message: format!(
                                "expected exactly one parameter, found {}",
                                params.len()
                            ),
                        });
                    }
                };
                conns.push(PgConn {
                    client,
                    statement,
                    key_type,
                    task,
                });
            }
            Ok::<_, StoreError>(conns)
        })?;
        debug!(connections = conns.len(), "prepared postgres query");
        Ok(Box::new(PgQuery {
            text: text.to_string(),
            handle: runtime.handle().clone(),
            conns: Pool::from_items(conns),
        }))
    }

    fn close(&self) -> Result<()> {
        shutdown_runtime(&self.runtime)
    }
}

fn shutdown_runtime(slot: &Mutex<Option<Runtime>>) -> Result<()> {
    let runtime = slot
        .lock()
        .take()
        .ok_or_else(|| StoreError::Close("postgres store already closed".to_string()))?;
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    debug!("postgres runtime shut down");
    Ok(())
}

struct PgQuery {
    text: String,
    handle: Handle,
    conns: Arc<Pool<PgConn>>,
}

impl PgQuery {
    fn checkout(&self) -> Result<Pooled<PgConn>> {
        self.conns
            .acquire(None)
            .ok_or_else(|| StoreError::Query("postgres query already closed".to_string()))
    }
}

impl PreparedQuery for PgQuery {
    fn text(&self) -> &str {
        &self.text
    }

    fn for_each_row(&self, key: &str, sink: &mut RowSink<'_>) -> Result<()> {
        let conn = self.checkout()?;
        match conn.key_type {
            KeyType::Text => self.stream(&conn, &key, sink),
            KeyType::Int4 => self.stream(&conn, &parse_key::<i32>(key)?, sink),
            KeyType::Int8 => self.stream(&conn, &parse_key::<i64>(key)?, sink),
        }
    }

    fn close(self: Box<Self>) -> Result<()> {
        let conns = self.conns.drain();
        let released = conns.len();
        let mut first_err = None;
        for conn in conns {
            if let Err(err) = conn.close(&self.handle) {
                first_err.get_or_insert(err);
            }
        }
        if let Err(err) = self.conns.ensure_returned() {
            first_err.get_or_insert(err);
        }
        debug!(released, "closed postgres query");
        first_err.map_or(Ok(()), Err)
    }
}

impl PgQuery {
    fn stream(
        &self,
        conn: &PgConn,
        param: &(dyn ToSql + Sync),
        sink: &mut RowSink<'_>,
    ) -> Result<()> {
        let rows = self
            .handle
            .block_on(conn.client.query(&conn.statement, &[param]))
            .map_err(|err| StoreError::Query(err.to_string()))?;
        let mut values = Vec::new();
        for row in &rows {
            values.clear();
            for (index, column) in row.columns().iter().enumerate() {
                values.push(convert(row, index, column.type_())?);
            }
            if sink(&Row::new(&values))?.is_break() {
                break;
            }
        }
        Ok(())
    }
}

fn parse_key<T: FromStr>(key: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    key.parse::<T>()
        .map_err(|err| StoreError::Query(format!("key {key:?} is not a valid integer: {err}")))
}

fn convert(row: &tokio_postgres::Row, index: usize, ty: &Type) -> Result<Value> {
    let value = match *ty {
        Type::INT2 => row
            .try_get::<_, Option<i16>>(index)
            .map(|v| Value::from(v.map(i64::from))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(index)
            .map(|v| Value::from(v.map(i64::from))),
        Type::INT8 => row.try_get::<_, Option<i64>>(index).map(Value::from),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(index)
            .map(|v| Value::from(v.map(f64::from))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(index).map(Value::from),
        Type::NUMERIC => row.try_get::<_, Option<Decimal>>(index).map(numeric_value),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            row.try_get::<_, Option<String>>(index).map(Value::from)
        }
        ref other => {
            return Err(StoreError::Unsupported(format!(
                "column {index} has type {other}"
            )));
        }
    };
    value.map_err(|err| StoreError::Query(err.to_string()))
}

/// NUMERIC columns (e.g. `avg(rating)`) widen to a float.
fn numeric_value(value: Option<Decimal>) -> Value {
    Value::from(value.and_then(|decimal| decimal.to_f64()))
}

/// Returns `None` when neither the platform nor `ssl_root_cert` supplies a
/// root certificate.
fn build_tls_connector(config: &PgStoreConfig) -> Result<Option<MakeRustlsConnect>> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        warn!("failed to load a native certificate: {err}");
    }
    for cert in native.certs {
        roots
            .add(cert)
            .map_err(|err| StoreError::Connection(err.to_string()))?;
    }
    if let Some(path) = config.ssl_root_cert.as_ref() {
        let pem = std::fs::read(path).map_err(|err| StoreError::Connection(err.to_string()))?;
        let mut cursor = std::io::Cursor::new(pem);
        let certs = rustls_pemfile::certs(&mut cursor)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| StoreError::Connection(err.to_string()))?;
        for cert in certs {
            roots
                .add(cert)
                .map_err(|err| StoreError::Connection(err.to_string()))?;
        }
    }
    if roots.is_empty() {
        return Ok(None);
    }
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| StoreError::Connection(err.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Some(MakeRustlsConnect::new(tls_config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_type_follows_inferred_parameter() {
        assert_eq!(KeyType::from_type(&Type::TEXT), Some(KeyType::Text));
        assert_eq!(KeyType::from_type(&Type::VARCHAR), Some(KeyType::Text));
        assert_eq!(KeyType::from_type(&Type::INT4), Some(KeyType::Int4));
        assert_eq!(KeyType::from_type(&Type::INT8), Some(KeyType::Int8));
        assert_eq!(KeyType::from_type(&Type::BYTEA), None);
    }

    #[test]
    fn integer_keys_must_parse() {
        assert_eq!(parse_key::<i32>("42").expect("int"), 42);
        assert!(matches!(parse_key::<i64>("tt01"), Err(StoreError::Query(_))));
    }

    #[test]
    fn numeric_columns_widen_to_real() {
        assert_eq!(numeric_value(Some(Decimal::new(425, 2))), Value::Real(4.25));
        assert_eq!(numeric_value(Some(Decimal::from(3))), Value::Real(3.0));
        assert_eq!(numeric_value(None), Value::Null);
    }

    fn test_runtime() -> Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("runtime")
    }

    #[test]
    fn closing_reports_connection_failures() {
        let runtime = test_runtime();
        let clean = runtime.spawn(async { Ok::<(), String>(()) });
        assert!(await_connection(runtime.handle(), clean, Duration::from_secs(1)).is_ok());

        let reset = runtime.spawn(async { Err::<(), String>("connection reset".to_string()) });
        let err = await_connection(runtime.handle(), reset, Duration::from_secs(1))
            .expect_err("failed connection");
        assert!(matches!(&err, StoreError::Close(msg) if msg.contains("connection reset")));

        let stuck = runtime.spawn(std::future::pending::<std::result::Result<(), String>>());
        let err = await_connection(runtime.handle(), stuck, Duration::from_millis(20))
            .expect_err("stuck connection");
        assert!(matches!(&err, StoreError::Close(msg) if msg.contains("did not close")));
    }

    #[test]
    fn runtime_shuts_down_once() {
        let slot = Mutex::new(Some(test_runtime()));
        shutdown_runtime(&slot).expect("first close");
        assert!(slot.lock().is_none());
        assert!(matches!(shutdown_runtime(&slot), Err(StoreError::Close(_))));
    }

    #[test]
    fn invalid_dsn_is_a_connection_error() {
        let config = PgStoreConfig::new("host=localhost port=notaport".to_string());
        let err = PgStore::connect(config).err().expect("invalid dsn");
        assert!(matches!(err, StoreError::Connection(_)));
    }
}
