// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, error, info};

use crate::error::{GatewayError, Result};

use super::{Activity, Connection, ReadOutcome, read_chunk};

/// TCP connection to a serial-to-Ethernet bridge on the bus.
pub struct TcpConnection {
    host: String,
    port: u16,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    activity: Activity,
}

impl TcpConnection {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
            stream: None,
            activity: Activity::new(),
        }
    }
}

impl Connection for TcpConnection {
    async fn open(&mut self) -> Result<()> {
        info!("Connecting to bus bridge at {}:{}", self.host, self.port);
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| GatewayError::ConnectTimeout)?
            .map_err(|e| {
                error!("TCP connect failed: {}", e);
                GatewayError::Io(e)
            })?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        self.activity.touch();
        info!("Connection opened for socket {}:{}", self.host, self.port);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            info!("Closing connection to {}:{}", self.host, self.port);
            let _ = stream.shutdown().await;
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(GatewayError::Disconnected)?;
        debug!("Sending: {}", hex::encode(data));
        let written = stream.write_all(data).await;
        if let Err(e) = written {
            self.stream = None;
            return Err(GatewayError::Io(e));
        }
        self.activity.touch();
        Ok(data.len())
    }

    async fn receive(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(GatewayError::Disconnected)?;
        match read_chunk(stream, max, timeout).await {
            Ok(ReadOutcome::Data(chunk)) => {
                self.activity.touch();
                Ok(chunk)
            }
            Ok(ReadOutcome::Timeout) => Ok(Vec::new()),
            Ok(ReadOutcome::Closed) => {
                debug!("Bus bridge closed the connection");
                self.stream = None;
                Err(GatewayError::Disconnected)
            }
            Err(e) => {
                self.stream = None;
                Err(e)
            }
        }
    }

    fn idle_time(&self) -> Duration {
        self.activity.idle_time()
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_send_and_receive_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 3];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&[0xAA, 0x55]).await.unwrap();
            buf
        });

        let mut conn = TcpConnection::new("127.0.0.1", port, Duration::from_secs(1));
        assert!(!conn.is_open());
        conn.open().await.unwrap();
        assert_eq!(conn.send(&[1, 2, 3]).await.unwrap(), 3);
        assert_eq!(peer.await.unwrap(), [1, 2, 3]);

        let mut received = Vec::new();
        while received.len() < 2 {
            received.extend(conn.receive(512, Duration::from_millis(500)).await.unwrap());
        }
        assert_eq!(received, vec![0xAA, 0x55]);
    }

    #[tokio::test]
    async fn test_receive_when_closed() {
        let mut conn = TcpConnection::new("127.0.0.1", 1, Duration::from_millis(100));
        assert!(matches!(
            conn.receive(16, Duration::from_millis(10)).await,
            Err(GatewayError::Disconnected)
        ));
        assert!(matches!(conn.send(&[0]).await, Err(GatewayError::Disconnected)));
    }
}
