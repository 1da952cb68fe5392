//! TCP transport used to simulate the radio link during development

use crate::transport::traits::{BoxedStream, Transport, TransportListener, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluechat_shared::PeerIdentity;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// TCP stream wrapper implementing TransportStream
pub struct TcpTransportStream {
    inner: TcpStream,
}

impl TcpTransportStream {
    pub fn new(stream: TcpStream) -> Self {
        Self { inner: stream }
    }
}

impl AsyncRead for TcpTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpTransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl TransportStream for TcpTransportStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

/// Configuration for the TCP simulation transport
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Local address the listener binds
    pub listen_addr: String,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9000".into(),
        }
    }
}

/// Accepting half of the TCP simulation
pub struct TcpTransportListener {
    inner: TcpListener,
}

#[async_trait]
impl TransportListener for TcpTransportListener {
    async fn accept(&mut self) -> Result<(BoxedStream, PeerIdentity)> {
        let (stream, addr) = self.inner.accept().await?;
        debug!("[TCP] Accepted {}", addr);
        Ok((
            Box::new(TcpTransportStream::new(stream)),
            PeerIdentity::unnamed(addr.to_string()),
        ))
    }
}

/// TCP transport listening on one address and dialing `host:port` peers
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen(&self) -> Result<Box<dyn TransportListener>> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| anyhow!("TCP bind {} failed: {}", self.config.listen_addr, e))?;
        debug!("[TCP] Listening on {}", listener.local_addr()?);
        Ok(Box::new(TcpTransportListener { inner: listener }))
    }

    async fn connect(&self, address: &str) -> Result<(BoxedStream, PeerIdentity)> {
        let stream = TcpStream::connect(address).await?;
        let peer = stream.peer_addr()?;
        Ok((
            Box::new(TcpTransportStream::new(stream)),
            PeerIdentity::unnamed(peer.to_string()),
        ))
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_default_config() {
        let config = TcpConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(TcpTransport::new(config).name(), "TCP");
    }

    #[tokio::test]
    async fn test_listen_and_connect_loopback() {
        let transport = TcpTransport::new(TcpConfig {
            listen_addr: "127.0.0.1:0".into(),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut accepting = TcpTransportListener { inner: listener };

        let target = addr.to_string();
        let (dialed, accepted) = tokio::join!(transport.connect(&target), accepting.accept());
        let (mut dialed, dialed_peer) = dialed.unwrap();
        let (mut accepted, _) = accepted.unwrap();
        assert_eq!(dialed_peer.address, target);

        dialed.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = TcpTransport::new(TcpConfig::default());
        assert!(transport.connect(&addr.to_string()).await.is_err());
    }
}
