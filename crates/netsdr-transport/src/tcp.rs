//! TCP control channel transport.
//!
//! [`TcpTransport`] implements [`StreamSocket`] over a tokio `TcpStream`.
//! The NetSDR control channel is plain TCP on port 50000 by default.
//!
//! # Example
//!
//! ```no_run
//! use netsdr_transport::TcpTransport;
//! use netsdr_core::transport::StreamSocket;
//!
//! # async fn example() -> netsdr_core::Result<()> {
//! let mut transport = TcpTransport::connect("192.168.1.50:50000".parse().unwrap()).await?;
//!
//! // Set channel 1 to 14.010 MHz
//! transport
//!     .send(&[0x0A, 0x00, 0x20, 0x00, 0x00, 0x90, 0xC6, 0xD5, 0x00, 0x00])
//!     .await?;
//!
//! let mut buf = [0u8; 64];
//! let n = transport.receive(&mut buf).await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use netsdr_core::error::{Error, Result};
use netsdr_core::transport::StreamSocket;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default connection timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP stream socket for the receiver's control channel.
#[derive(Debug)]
pub struct TcpTransport {
    /// `None` after `shutdown()`.
    stream: Option<TcpStream>,
    addr: SocketAddr,
}

impl TcpTransport {
    /// Connect using [`DEFAULT_CONNECT_TIMEOUT`].
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect, giving up after `timeout`.
    pub async fn connect_with_timeout(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        tracing::debug!(
            addr = %addr,
            timeout_ms = timeout.as_millis(),
            "Connecting to control port"
        );

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %addr, "TCP connection timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::error!(addr = %addr, error = %e, "TCP connection failed");
                map_connect_error(e, addr)
            })?;

        // Control messages are a few bytes each.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(
                addr = %addr,
                error = %e,
                "Failed to set TCP_NODELAY (continuing anyway)"
            );
        }

        tracing::info!(addr = %addr, "Control connection established");

        Ok(Self {
            stream: Some(stream),
            addr,
        })
    }

    /// Remote address of the control connection.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl StreamSocket for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(addr = %self.addr, bytes = data.len(), data = ?data, "Sending data");

        stream.write_all(data).await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Failed to send data");
            map_io_error(e)
        })?;

        stream.flush().await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Failed to flush TCP stream");
            map_io_error(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        match stream.read(buf).await {
            Ok(0) => {
                tracing::debug!(addr = %self.addr, "Peer closed connection (0 bytes read)");
                Ok(0)
            }
            Ok(n) => {
                tracing::trace!(addr = %self.addr, bytes = n, data = ?&buf[..n], "Received data");
                Ok(n)
            }
            Err(e) => {
                tracing::error!(addr = %self.addr, error = %e, "Failed to receive data");
                Err(map_io_error(e))
            }
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!(addr = %self.addr, "Closing control connection");

            if let Err(e) = stream.shutdown().await {
                tracing::warn!(
                    addr = %self.addr,
                    error = %e,
                    "Failed to shutdown TCP stream (continuing anyway)"
                );
            }

            tracing::info!(addr = %self.addr, "Control connection closed");
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if self.stream.is_some() {
            tracing::debug!(addr = %self.addr, "TcpTransport dropped, closing connection");
        }
    }
}

fn map_connect_error(e: std::io::Error, addr: SocketAddr) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {}", addr))
        }
        _ => Error::Io(e),
    }
}

fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn test_listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[tokio::test]
    async fn connect_send_receive() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(&buf[..n]).await.unwrap();
        });

        let mut transport = TcpTransport::connect(addr).await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.addr(), addr);

        let cmd = [0x08, 0x00, 0x18, 0x00, 0x00, 0x02, 0x01, 0x0A];
        transport.send(&cmd).await.unwrap();

        let mut buf = [0u8; 64];
        let n = transport.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &cmd);

        transport.shutdown().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpTransport::connect(addr).await.unwrap_err();
        match &err {
            Error::Transport(msg) => assert!(msg.contains("connection refused"), "{}", msg),
            other => panic!("expected Transport error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn peer_close_reads_zero() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut transport = TcpTransport::connect(addr).await.unwrap();
        server.await.unwrap();

        let mut buf = [0u8; 64];
        let n = transport.receive(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn send_after_shutdown_returns_not_connected() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpTransport::connect(addr).await.unwrap();
        transport.shutdown().await.unwrap();
        assert!(!transport.is_connected());

        assert!(matches!(transport.send(&[0x02, 0x00]).await, Err(Error::NotConnected)));

        let mut buf = [0u8; 8];
        assert!(matches!(transport.receive(&mut buf).await, Err(Error::NotConnected)));

        // Second shutdown is a no-op.
        transport.shutdown().await.unwrap();

        server.abort();
    }

    #[tokio::test]
    async fn receive_is_cancel_safe() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            stream.write_all(&[0x02, 0x00]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let mut transport = TcpTransport::connect(addr).await.unwrap();
        let mut buf = [0u8; 8];

        let first =
            tokio::time::timeout(Duration::from_millis(10), transport.receive(&mut buf)).await;
        assert!(first.is_err());

        let n = transport.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x02, 0x00]);

        server.abort();
    }
}
