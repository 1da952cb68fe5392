//! RFCOMM transport implementation for Bluetooth links

use crate::transport::traits::{BoxedStream, Transport, TransportListener, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluechat_shared::{ChatError, PeerIdentity};
use bluer::rfcomm::{Listener as RfcommListener, SocketAddr as RfcommAddr, Stream as RfcommStream};
use bluer::{Adapter, Address};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{info, warn};

/// Default RFCOMM channel for the chat service
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// Seconds the adapter stays discoverable after listening starts
pub const DEFAULT_DISCOVERABLE_TIMEOUT_SECS: u32 = 300;

/// RFCOMM stream wrapper implementing TransportStream
pub struct RfcommTransportStream {
    inner: RfcommStream,
}

impl RfcommTransportStream {
    pub fn new(stream: RfcommStream) -> Self {
        Self { inner: stream }
    }
}

impl AsyncRead for RfcommTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RfcommTransportStream {
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
impl TransportStream for RfcommTransportStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

/// Configuration for the RFCOMM transport
#[derive(Debug, Clone)]
pub struct RfcommConfig {
    /// RFCOMM channel number, shared by both peers
    pub channel: u8,
    /// Make the adapter discoverable while listening
    pub discoverable: bool,
    /// How long the adapter stays discoverable
    pub discoverable_timeout: u32,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_RFCOMM_CHANNEL,
            discoverable: false,
            discoverable_timeout: DEFAULT_DISCOVERABLE_TIMEOUT_SECS,
        }
    }
}

/// Parse a `AA:BB:CC:DD:EE:FF` device address
pub fn parse_address(address: &str) -> Result<Address, ChatError> {
    address
        .trim()
        .parse::<Address>()
        .map_err(|_| ChatError::InvalidAddress(address.to_string()))
}

/// Look up the device name the adapter knows, falling back to the address
async fn resolve_peer(adapter: &Adapter, addr: Address) -> PeerIdentity {
    let name = match adapter.device(addr) {
        Ok(device) => device.name().await.ok().flatten(),
        Err(_) => None,
    };
    match name {
        Some(name) => PeerIdentity::new(addr.to_string(), name),
        None => PeerIdentity::unnamed(addr.to_string()),
    }
}

/// Bound RFCOMM server socket
pub struct RfcommTransportListener {
    inner: RfcommListener,
    adapter: Adapter,
}

#[async_trait]
impl TransportListener for RfcommTransportListener {
    async fn accept(&mut self) -> Result<(BoxedStream, PeerIdentity)> {
        let (stream, sa) = self
            .inner
            .accept()
            .await
            .map_err(|e| anyhow!("RFCOMM accept failed: {}", e))?;
        let peer = resolve_peer(&self.adapter, sa.addr).await;
        info!("[BT] Accepted {}", peer);
        Ok((Box::new(RfcommTransportStream::new(stream)), peer))
    }
}

/// Bluetooth RFCOMM transport bound to one adapter
pub struct RfcommTransport {
    adapter: Adapter,
    config: RfcommConfig,
}

impl RfcommTransport {
    /// Create a transport on an adapter that is already powered
    pub fn new(adapter: Adapter, config: RfcommConfig) -> Self {
        Self { adapter, config }
    }

    async fn make_discoverable(&self) -> Result<()> {
        self.adapter
            .set_discoverable_timeout(self.config.discoverable_timeout)
            .await?;
        self.adapter.set_discoverable(true).await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    async fn listen(&self) -> Result<Box<dyn TransportListener>> {
        if self.config.discoverable {
            if let Err(e) = self.make_discoverable().await {
                warn!("[BT] Could not make {} discoverable: {}", self.adapter.name(), e);
            }
        }

        let local = RfcommAddr::new(Address::any(), self.config.channel);
        let listener = RfcommListener::bind(local)
            .await
            .map_err(|e| anyhow!("RFCOMM bind on channel {} failed: {}", self.config.channel, e))?;
        info!("[BT] Listening on channel {}", self.config.channel);

        Ok(Box::new(RfcommTransportListener {
            inner: listener,
            adapter: self.adapter.clone(),
        }))
    }

    async fn connect(&self, address: &str) -> Result<(BoxedStream, PeerIdentity)> {
        let target_addr = parse_address(address)?;
        let socket_addr = RfcommAddr::new(target_addr, self.config.channel);
        info!("[BT] Connecting to {} channel {}", target_addr, self.config.channel);

        let stream = RfcommStream::connect(socket_addr)
            .await
            .map_err(|e| anyhow!("RFCOMM connect failed: {}", e))?;

        let peer = resolve_peer(&self.adapter, target_addr).await;
        info!("[BT] Connected to {}", peer);
        Ok((Box::new(RfcommTransportStream::new(stream)), peer))
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RfcommConfig::default();
        assert_eq!(config.channel, DEFAULT_RFCOMM_CHANNEL);
        assert!(!config.discoverable);
        assert_eq!(config.discoverable_timeout, 300);
    }

    #[test]
    fn test_parse_address() {
        let addr = parse_address("00:11:22:33:44:55").unwrap();
        assert_eq!(addr, Address::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]));
        assert!(matches!(
            parse_address("not-an-address"),
            Err(ChatError::InvalidAddress(a)) if a == "not-an-address"
        ));
        assert!(parse_address("AA:BB").is_err());
    }
}
