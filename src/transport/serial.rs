// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use crate::error::{GatewayError, Result};

use super::{Activity, Connection, ReadOutcome, read_chunk};

/// Local RS-485 adapter.
pub struct SerialConnection {
    path: String,
    baud_rate: u32,
    port: Option<SerialStream>,
    activity: Activity,
}

impl SerialConnection {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            port: None,
            activity: Activity::new(),
        }
    }
}

impl Connection for SerialConnection {
    async fn open(&mut self) -> Result<()> {
        let port = tokio_serial::new(&self.path, self.baud_rate)
            .open_native_async()
            .map_err(std::io::Error::from)?;
        self.port = Some(port);
        self.activity.touch();
        info!("Connection opened for serial {} at {} baud", self.path, self.baud_rate);
        Ok(())
    }

    async fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closing serial port {}", self.path);
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let port = self.port.as_mut().ok_or(GatewayError::Disconnected)?;
        debug!("Sending: {}", hex::encode(data));
        let written = port.write_all(data).await;
        if let Err(e) = written {
            self.port = None;
            return Err(GatewayError::Io(e));
        }
        self.activity.touch();
        Ok(data.len())
    }

    async fn receive(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        let port = self.port.as_mut().ok_or(GatewayError::Disconnected)?;
        match read_chunk(port, max, timeout).await {
            Ok(ReadOutcome::Data(chunk)) => {
                self.activity.touch();
                Ok(chunk)
            }
            Ok(ReadOutcome::Timeout) => Ok(Vec::new()),
            Ok(ReadOutcome::Closed) => {
                self.port = None;
                Err(GatewayError::Disconnected)
            }
            Err(e) => {
                self.port = None;
                Err(e)
            }
        }
    }

    fn idle_time(&self) -> Duration {
        self.activity.idle_time()
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
