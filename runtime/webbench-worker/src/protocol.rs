//! Length-prefixed request/response server.
//!
//! Each frame is a little-endian `u32` byte count followed by an envelope
//! encoded as MessagePack or JSON. A response always uses the codec of the
//! request it answers.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::dispatch::Worker;
use crate::error::{BenchError, Result};

pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireCodec {
    Json,
    Msgpack,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub request_id: u64,
    pub key: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    InvalidInput,
    Busy,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: u64,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ns: Option<u64>,
    /// The assembled record as JSON text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn ok(request_id: u64, duration_ns: u64, payload: String) -> Self {
        Self {
            request_id,
            status: Status::Ok,
            duration_ns: Some(duration_ns),
            payload: Some(payload),
            error: None,
        }
    }

    fn failed(request_id: u64, status: Status, error: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            duration_ns: None,
            payload: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ServeConfig {
    /// Worker threads draining the request queue.
    pub concurrency: usize,
    /// Requests queued beyond this are answered with `Busy`.
    pub max_queue: usize,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_queue: 64,
        }
    }
}

/// Counters reported when the input stream ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServeSummary {
    pub received: u64,
    pub completed: u64,
    pub busy: u64,
    pub invalid: u64,
}

/// Returns `Ok(None)` on a clean end of stream.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    if let Err(err) = reader.read_exact(&mut header) {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(err);
    }
    let size = u32::from_le_bytes(header) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {size} bytes exceeds the {MAX_FRAME_SIZE} byte limit"),
        ));
    }
    let mut buf = vec![0u8; size];
    reader.read_exact(&mut buf)?;
    Ok(Some(buf))
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let size = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_all(&size.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// MessagePack is tried first; anything else must be JSON.
pub fn decode_request(bytes: &[u8]) -> std::result::Result<(Request, WireCodec), String> {
    if let Ok(request) = rmp_serde::from_slice::<Request>(bytes) {
        return Ok((request, WireCodec::Msgpack));
    }
    serde_json::from_slice::<Request>(bytes)
        .map(|request| (request, WireCodec::Json))
        .map_err(|err| format!("invalid request: {err}"))
}

pub fn encode_response(
    response: &Response,
    wire: WireCodec,
) -> std::result::Result<Vec<u8>, String> {
    match wire {
        WireCodec::Msgpack => rmp_serde::to_vec_named(response).map_err(|err| err.to_string()),
        WireCodec::Json => serde_json::to_vec(response).map_err(|err| err.to_string()),
    }
}

/// Serves requests from `input` until it ends or an invocation fails.
///
/// A failed invocation is answered with an `Error` response, after which
/// no further requests are executed and the error is returned.
pub fn serve<R, W>(worker: &Worker, input: R, output: W, config: ServeConfig) -> Result<ServeSummary>
where
    R: Read + Send + 'static,
    W: Write + Send,
{
    let concurrency = config.concurrency.max(1);
    let max_queue = config.max_queue.max(1);

    // The reader is detached: a blocked read must not keep a failed server
    // alive.
    let (frame_tx, frame_rx) = bounded::<io::Result<Vec<u8>>>(1);
    thread::Builder::new()
        .name("webbench-reader".to_string())
        .spawn(move || read_loop(input, frame_tx))?;

    let (request_tx, request_rx) = bounded::<(Request, WireCodec)>(max_queue);
    let (response_tx, response_rx) = bounded::<(WireCodec, Response)>(max_queue);
    let (fatal_tx, fatal_rx) = bounded::<BenchError>(1);
    let stopped = AtomicBool::new(false);
    let completed = AtomicU64::new(0);
    let mut summary = ServeSummary::default();

    info!(kind = %worker.kind(), concurrency, max_queue, "serving requests");

    let (fatal, written) = thread::scope(|scope| {
        let writer = scope.spawn(move || write_loop(response_rx, output));
        let workers: Vec<_> = (0..concurrency)
            .map(|_| {
                let request_rx = request_rx.clone();
                let response_tx = response_tx.clone();
                let fatal_tx = fatal_tx.clone();
                let stopped = &stopped;
                let completed = &completed;
                scope.spawn(move || {
                    worker_loop(worker, request_rx, response_tx, fatal_tx, stopped, completed)
                })
            })
            .collect();
        drop(request_rx);
        drop(fatal_tx);

        let mut fatal = None;
        loop {
            let event = select! {
                recv(frame_rx) -> frame => frame.map_or(Event::Closed, Event::Frame),
                recv(fatal_rx) -> err => Event::Failed(err.ok()),
            };
            match event {
                Event::Frame(Ok(frame)) => {
                    summary.received += 1;
                    match decode_request(&frame) {
                        Ok((request, wire)) => match request_tx.try_send((request, wire)) {
                            Ok(()) => {}
                            Err(TrySendError::Full((request, wire))) => {
                                summary.busy += 1;
                                let response = Response::failed(
                                    request.request_id,
                                    Status::Busy,
                                    "worker queue full",
                                );
                                let _ = response_tx.send((wire, response));
                            }
                            Err(TrySendError::Disconnected(_)) => break,
                        },
                        Err(err) => {
                            summary.invalid += 1;
                            warn!(%err, "undecodable request frame");
                            let response = Response::failed(0, Status::InvalidInput, err);
                            let _ = response_tx.send((WireCodec::Json, response));
                        }
                    }
                }
                Event::Frame(Err(err)) => {
                    summary.invalid += 1;
                    warn!(%err, "unreadable input stream");
                    let response = Response::failed(0, Status::InvalidInput, err.to_string());
                    let _ = response_tx.send((WireCodec::Json, response));
                    break;
                }
                Event::Closed => {
                    debug!("input stream closed");
                    break;
                }
                Event::Failed(err) => {
                    fatal = err;
                    break;
                }
            }
        }

        drop(request_tx);
        drop(response_tx);
        for handle in workers {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
        // A failure can land after the input ended.
        let fatal = fatal.or_else(|| fatal_rx.try_recv().ok());
        let written = writer
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
        (fatal, written)
    });

    summary.completed = completed.load(Ordering::Relaxed);
    if let Some(err) = fatal {
        error!(error = %err, "invocation failed, server stopped");
        return Err(err);
    }
    let written = written?;
    info!(
        received = summary.received,
        completed = summary.completed,
        busy = summary.busy,
        invalid = summary.invalid,
        responses = written,
        "input closed, server stopped"
    );
    Ok(summary)
}

enum Event {
    Frame(io::Result<Vec<u8>>),
    Closed,
    Failed(Option<BenchError>),
}

fn read_loop<R: Read>(mut input: R, frames: Sender<io::Result<Vec<u8>>>) {
    loop {
        match read_frame(&mut input) {
            Ok(Some(frame)) => {
                if frames.send(Ok(frame)).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                let _ = frames.send(Err(err));
                return;
            }
        }
    }
}

fn worker_loop(
    worker: &Worker,
    requests: Receiver<(Request, WireCodec)>,
    responses: Sender<(WireCodec, Response)>,
    fatal: Sender<BenchError>,
    stopped: &AtomicBool,
    completed: &AtomicU64,
) {
    while let Ok((request, wire)) = requests.recv() {
        if stopped.load(Ordering::Acquire) {
            break;
        }
        let response = match worker.invoke(&request.key) {
            Ok(measurement) => {
                completed.fetch_add(1, Ordering::Relaxed);
                let duration_ns = u64::try_from(measurement.duration.as_nanos()).unwrap_or(u64::MAX);
                Response::ok(request.request_id, duration_ns, measurement.payload)
            }
            Err(err) => {
                stopped.store(true, Ordering::Release);
                let response =
                    Response::failed(request.request_id, Status::Error, err.to_string());
                let _ = responses.send((wire, response));
                let _ = fatal.try_send(err);
                break;
            }
        };
        if responses.send((wire, response)).is_err() {
            break;
        }
    }
}

fn write_loop<W: Write>(responses: Receiver<(WireCodec, Response)>, mut output: W) -> io::Result<u64> {
    let mut written = 0u64;
    while let Ok((wire, response)) = responses.recv() {
        let encoded = match encode_response(&response, wire) {
            Ok(encoded) => encoded,
            Err(err) => {
                error!(%err, request_id = response.request_id, "failed to encode response");
                continue;
            }
        };
        write_frame(&mut output, &encoded)?;
        written += 1;
    }
    Ok(written)
}
