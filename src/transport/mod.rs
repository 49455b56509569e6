// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

//! Byte transports to the RS-485 bus.
//!
//! The wallpad bus is usually reached through a serial-to-TCP bridge
//! (EW11 and similar) or a local USB adapter. Both look the same to the
//! gateway: an ordered byte stream plus the time since it last moved.

#[cfg(feature = "serial")]
mod serial;
mod tcp;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use crate::constants::{DEFAULT_SERIAL_BAUD, DEFAULT_TCP_PORT};
use crate::error::{GatewayError, Result};

#[cfg(feature = "serial")]
pub use serial::SerialConnection;
pub use tcp::TcpConnection;

/// A reopenable byte stream to the bus.
///
/// All methods are called from the single task that owns the connection.
pub trait Connection: Send {
    fn open(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Write all of `data`. Fails with [`GatewayError::Disconnected`] when not open.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Read up to `max` bytes, waiting at most `timeout`.
    ///
    /// Returns an empty buffer on timeout. End of stream closes the
    /// connection and returns [`GatewayError::Disconnected`].
    fn receive(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Time since the last byte was sent or received.
    fn idle_time(&self) -> Duration;

    fn is_open(&self) -> bool;
}

/// Where the bus is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Serial { path: String, baud_rate: u32 },
}

impl Endpoint {
    /// Build an endpoint from a host and optional port.
    ///
    /// A host starting with `/` is a serial device path and the port is ignored.
    pub fn new(host: &str, port: Option<u16>) -> Result<Self> {
        if host.is_empty() {
            return Err(GatewayError::InvalidEndpoint {
                details: "empty host".to_string(),
            });
        }
        if host.starts_with('/') {
            return Ok(Self::Serial {
                path: host.to_string(),
                baud_rate: DEFAULT_SERIAL_BAUD,
            });
        }
        Ok(Self::Tcp {
            host: host.to_string(),
            port: port.unwrap_or(DEFAULT_TCP_PORT),
        })
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Serial { .. })
    }
}

impl FromStr for Endpoint {
    type Err = GatewayError;

    /// `host`, `host:port` or `/dev/ttyX`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with('/') {
            return Self::new(s, None);
        }
        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| GatewayError::InvalidEndpoint {
                    details: format!("bad port in {s}"),
                })?;
                Self::new(host, Some(port))
            }
            None => Self::new(s, None),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Serial { path, baud_rate } => write!(f, "{path}@{baud_rate}"),
        }
    }
}

/// Connection chosen at runtime from an [`Endpoint`].
pub enum AnyConnection {
    Tcp(TcpConnection),
    #[cfg(feature = "serial")]
    Serial(SerialConnection),
}

impl AnyConnection {
    pub fn from_endpoint(endpoint: &Endpoint, connect_timeout: Duration) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp { host, port } => Ok(Self::Tcp(TcpConnection::new(
                host.clone(),
                *port,
                connect_timeout,
            ))),
            #[cfg(feature = "serial")]
            Endpoint::Serial { path, baud_rate } => {
                Ok(Self::Serial(SerialConnection::new(path.clone(), *baud_rate)))
            }
            #[cfg(not(feature = "serial"))]
            Endpoint::Serial { path, .. } => Err(GatewayError::InvalidEndpoint {
                details: format!("{path}: built without serial support"),
            }),
        }
    }
}

impl Connection for AnyConnection {
    async fn open(&mut self) -> Result<()> {
        match self {
            Self::Tcp(c) => c.open().await,
            #[cfg(feature = "serial")]
            Self::Serial(c) => c.open().await,
        }
    }

    async fn close(&mut self) {
        match self {
            Self::Tcp(c) => c.close().await,
            #[cfg(feature = "serial")]
            Self::Serial(c) => c.close().await,
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        match self {
            Self::Tcp(c) => c.send(data).await,
            #[cfg(feature = "serial")]
            Self::Serial(c) => c.send(data).await,
        }
    }

    async fn receive(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        match self {
            Self::Tcp(c) => c.receive(max, timeout).await,
            #[cfg(feature = "serial")]
            Self::Serial(c) => c.receive(max, timeout).await,
        }
    }

    fn idle_time(&self) -> Duration {
        match self {
            Self::Tcp(c) => c.idle_time(),
            #[cfg(feature = "serial")]
            Self::Serial(c) => c.idle_time(),
        }
    }

    fn is_open(&self) -> bool {
        match self {
            Self::Tcp(c) => c.is_open(),
            #[cfg(feature = "serial")]
            Self::Serial(c) => c.is_open(),
        }
    }
}

/// Outcome of one bounded read on a stream.
pub(crate) enum ReadOutcome {
    Data(Vec<u8>),
    Timeout,
    Closed,
}

/// Read up to `max` bytes from `stream`, giving up after `timeout`.
pub(crate) async fn read_chunk<S>(stream: &mut S, max: usize, timeout: Duration) -> Result<ReadOutcome>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; max];
    match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
        Err(_) => Ok(ReadOutcome::Timeout),
        Ok(Ok(0)) => Ok(ReadOutcome::Closed),
        Ok(Ok(n)) => {
            buf.truncate(n);
            Ok(ReadOutcome::Data(buf))
        }
        Ok(Err(e)) => Err(GatewayError::Io(e)),
    }
}

/// Tracks when a stream last carried traffic.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Activity {
    last: Instant,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last = Instant::now();
    }

    pub fn idle_time(&self) -> Duration {
        self.last.elapsed()
    }
}
