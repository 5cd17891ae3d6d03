//! Manager-process store
//!
//! A dedicated process owns a [`ThreadStore`] and answers requests over a
//! Unix socket. Every other process holds a [`ManagerClient`], which makes the
//! store look local. Frames are a little-endian `u32` length followed by a
//! postcard body.
//!
//! Only [`Reading`]s cross the socket. The manager derives every stored
//! measurement itself and each client rebuilds the current one on receipt,
//! both through the metric engine.

use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use alco_core::calibration::Baseline;
use alco_core::config::MetricParams;
use alco_core::history::{HistoryEntry, TimeOfDay};
use alco_core::metrics::{Measurement, Reading};
use alco_core::store::{MeasurementStore, StoreError};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::ThreadStore;

/// Largest frame either side accepts. A full history is well under 1 KiB.
pub const MAX_FRAME_LEN: usize = 16 * 1024;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("manager socket I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("manager frame encoding failed: {0}")]
    Codec(postcard::Error),
    #[error("manager frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    Oversized { len: usize },
    #[error("manager closed the connection")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Publish {
        reading: Reading,
        timestamp: TimeOfDay,
    },
    Snapshot,
    History,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Published,
    /// `None` until the first publish
    Current(Option<Reading>),
    History(Vec<HistoryEntry>),
    Failed(String),
}

fn rebuild(reading: Reading, params: &MetricParams) -> Measurement {
    Measurement::compute(reading.raw, Baseline::new(reading.baseline), params)
}

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), ManagerError> {
    let body = postcard::to_allocvec(message).map_err(ManagerError::Codec)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ManagerError::Oversized { len: body.len() });
    }
    writer.write_all(&(body.len() as u32).to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>, ManagerError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ManagerError::Oversized { len });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    postcard::from_bytes(&body)
        .map(Some)
        .map_err(ManagerError::Codec)
}

/// Store owner, one thread per connected client.
pub struct ManagerServer {
    store: Arc<ThreadStore>,
    params: MetricParams,
}

impl ManagerServer {
    pub fn new(store: Arc<ThreadStore>, params: MetricParams) -> Self {
        Self { store, params }
    }

    fn publish(&self, reading: Reading, timestamp: TimeOfDay) -> Response {
        if !reading.in_adc_range() {
            warn!("Rejected out of range reading {:?}", reading);
            return Response::Failed(format!(
                "reading raw {} baseline {} is outside the ADC range",
                reading.raw, reading.baseline
            ));
        }
        let measurement = rebuild(reading, &self.params);
        let entry = HistoryEntry::new(timestamp, measurement.concentration());
        match self.store.publish(measurement, entry) {
            Ok(()) => Response::Published,
            Err(e) => Response::Failed(e.to_string()),
        }
    }

    fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::Publish { reading, timestamp } => return self.publish(reading, timestamp),
            Request::Snapshot => self.store.snapshot().map(|m| {
                Response::Current((m != Measurement::initial()).then(|| m.reading()))
            }),
            Request::History => self.store.snapshot_history().map(Response::History),
        };
        result.unwrap_or_else(|e| Response::Failed(e.to_string()))
    }

    /// Answer requests on `stream` until the client disconnects.
    pub fn serve_connection(&self, mut stream: UnixStream) -> Result<(), ManagerError> {
        while let Some(request) = read_frame::<_, Request>(&mut stream)? {
            let response = self.handle(request);
            write_frame(&mut stream, &response)?;
        }
        Ok(())
    }

    /// Bind `path`, replacing a stale socket file, and serve forever.
    pub fn bind_and_serve(&self, path: &Path) -> io::Result<()> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        info!("Store manager listening on {}", path.display());
        self.serve(listener)
    }

    pub fn serve(&self, listener: UnixListener) -> io::Result<()> {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to accept manager client: {}", e);
                    continue;
                }
            };
            let server = Self::new(Arc::clone(&self.store), self.params);
            thread::Builder::new()
                .name("manager-conn".to_string())
                .spawn(move || {
                    debug!("Manager client connected");
                    match server.serve_connection(stream) {
                        Ok(()) => debug!("Manager client disconnected"),
                        Err(e) => warn!("Manager client dropped: {}", e),
                    }
                })?;
        }
        Ok(())
    }
}

/// Client handle to the manager's store.
///
/// A failed call drops the connection; the next call reconnects when the
/// client was created from a socket path.
pub struct ManagerClient {
    path: Option<PathBuf>,
    timeout: Duration,
    params: MetricParams,
    stream: Mutex<Option<UnixStream>>,
}

impl ManagerClient {
    pub fn connect(
        path: &Path,
        timeout: Duration,
        params: MetricParams,
    ) -> Result<Self, ManagerError> {
        let stream = Self::open_stream(path, timeout)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            timeout,
            params,
            stream: Mutex::new(Some(stream)),
        })
    }

    /// Keep trying to connect while the manager process starts up.
    pub fn connect_with_retry(
        path: &Path,
        timeout: Duration,
        params: MetricParams,
        attempts: u32,
        backoff: Duration,
    ) -> Result<Self, ManagerError> {
        let mut last = ManagerError::Closed;
        for attempt in 1..=attempts.max(1) {
            match Self::connect(path, timeout, params) {
                Ok(client) => return Ok(client),
                Err(e) => {
                    debug!("Manager connect attempt {} failed: {}", attempt, e);
                    last = e;
                    thread::sleep(backoff);
                }
            }
        }
        Err(last)
    }

    /// Client over an already connected stream; it cannot reconnect.
    pub fn from_stream(
        stream: UnixStream,
        timeout: Duration,
        params: MetricParams,
    ) -> Result<Self, ManagerError> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(Self {
            path: None,
            timeout,
            params,
            stream: Mutex::new(Some(stream)),
        })
    }

    fn open_stream(path: &Path, timeout: Duration) -> Result<UnixStream, ManagerError> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(stream)
    }

    fn call(&self, request: &Request) -> Result<Response, StoreError> {
        let mut slot = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none()
            && let Some(path) = &self.path
        {
            let stream = Self::open_stream(path, self.timeout)
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            info!("Reconnected to store manager");
            *slot = Some(stream);
        }
        let Some(stream) = slot.as_mut() else {
            return Err(StoreError::Transport(ManagerError::Closed.to_string()));
        };

        let result = write_frame(stream, request).and_then(|()| {
            read_frame::<_, Response>(stream)?.ok_or(ManagerError::Closed)
        });
        match result {
            Ok(Response::Failed(message)) => Err(StoreError::Rejected(message)),
            Ok(response) => Ok(response),
            Err(e) => {
                // The stream may hold half a frame now; start over next time.
                *slot = None;
                Err(StoreError::Transport(e.to_string()))
            }
        }
    }
}

fn unexpected(response: Response) -> StoreError {
    StoreError::Rejected(format!("unexpected manager response {:?}", response))
}

impl MeasurementStore for ManagerClient {
    fn publish(&self, measurement: Measurement, entry: HistoryEntry) -> Result<(), StoreError> {
        let request = Request::Publish {
            reading: measurement.reading(),
            timestamp: entry.timestamp,
        };
        match self.call(&request)? {
            Response::Published => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    fn snapshot(&self) -> Result<Measurement, StoreError> {
        match self.call(&Request::Snapshot)? {
            Response::Current(Some(reading)) => Ok(rebuild(reading, &self.params)),
            Response::Current(None) => Ok(Measurement::initial()),
            other => Err(unexpected(other)),
        }
    }

    fn snapshot_history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        match self.call(&Request::History)? {
            Response::History(history) => Ok(history),
            other => Err(unexpected(other)),
        }
    }
}
