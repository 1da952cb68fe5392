//! Transport trait abstraction for pluggable link backends

use anyhow::Result;
use async_trait::async_trait;
use bluechat_shared::PeerIdentity;
use tokio::io::{AsyncRead, AsyncWrite};

/// An established byte stream to a single peer
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the transport gracefully
    async fn shutdown(&mut self) -> Result<()>;
}

/// Port handed from a listener or dialer to the supervisor
pub type BoxedStream = Box<dyn TransportStream>;

/// A bound, discoverable endpoint waiting for inbound peers
#[async_trait]
pub trait TransportListener: Send + 'static {
    /// Block until a peer connects
    async fn accept(&mut self) -> Result<(BoxedStream, PeerIdentity)>;
}

/// Factory for listening and dialing on one kind of link
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Bind the local endpoint
    async fn listen(&self) -> Result<Box<dyn TransportListener>>;

    /// Attempt to connect to `address`, returning a stream on success
    async fn connect(&self, address: &str) -> Result<(BoxedStream, PeerIdentity)>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
