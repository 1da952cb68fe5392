//! In-process transport for exercising the link manager without a radio
//!
//! [`memory_link`] returns the transport handed to the manager and a
//! [`MemoryRemote`] that plays the other side: it injects inbound
//! connections and decides the outcome of every outbound dial.

use crate::transport::traits::{BoxedStream, Transport, TransportListener, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluechat_shared::PeerIdentity;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, oneshot, Notify};

const DUPLEX_BUFFER: usize = 4096;

#[async_trait]
impl TransportStream for DuplexStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(self).await?;
        Ok(())
    }
}

type Inbound = (DuplexStream, PeerIdentity);

#[derive(Default)]
struct HubState {
    pending: VecDeque<Inbound>,
    open_listeners: usize,
    listens: usize,
}

struct Hub {
    state: Mutex<HubState>,
    arrived: Notify,
    dial_tx: mpsc::UnboundedSender<DialRequest>,
}

impl Hub {
    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Create a connected transport/remote pair
pub fn memory_link() -> (MemoryTransport, MemoryRemote) {
    let (dial_tx, dial_rx) = mpsc::unbounded_channel();
    let hub = Arc::new(Hub {
        state: Mutex::new(HubState::default()),
        arrived: Notify::new(),
        dial_tx,
    });
    (
        MemoryTransport { hub: hub.clone() },
        MemoryRemote { hub, dial_rx },
    )
}

/// Transport half given to the manager
pub struct MemoryTransport {
    hub: Arc<Hub>,
}

/// Remote half driven by tests
pub struct MemoryRemote {
    hub: Arc<Hub>,
    dial_rx: mpsc::UnboundedReceiver<DialRequest>,
}

/// An outbound dial waiting for the remote to answer
///
/// Dropping the request refuses the connection.
pub struct DialRequest {
    pub address: String,
    reply: oneshot::Sender<(BoxedStream, PeerIdentity)>,
}

impl DialRequest {
    /// Accept the dial as `peer`, returning the remote end of the port
    ///
    /// If the dialer already gave up, the returned stream reads EOF.
    pub fn accept(self, peer: PeerIdentity) -> DuplexStream {
        let (local, remote) = tokio::io::duplex(DUPLEX_BUFFER);
        self.accept_with(local, peer);
        remote
    }

    /// Accept the dial as `peer` over a caller-supplied port
    pub fn accept_with(self, port: impl TransportStream, peer: PeerIdentity) {
        let _ = self.reply.send((Box::new(port), peer));
    }

    pub fn refuse(self) {}
}

impl MemoryRemote {
    /// Connect to the manager's listener as `peer`
    ///
    /// With no listener bound the connection is refused and the returned
    /// stream reads EOF.
    pub fn dial_in(&self, peer: PeerIdentity) -> DuplexStream {
        let (local, remote) = tokio::io::duplex(DUPLEX_BUFFER);
        let mut state = self.hub.state();
        if state.open_listeners > 0 {
            state.pending.push_back((local, peer));
            drop(state);
            self.hub.arrived.notify_one();
        }
        remote
    }

    /// Wait for the manager's next outbound dial
    pub async fn next_dial(&mut self) -> Option<DialRequest> {
        self.dial_rx.recv().await
    }

    /// Number of listeners currently bound
    pub fn open_listeners(&self) -> usize {
        self.hub.state().open_listeners
    }

    /// Number of times a listener was bound
    pub fn listens(&self) -> usize {
        self.hub.state().listens
    }
}

/// Listener bound on the memory hub
pub struct MemoryListener {
    hub: Arc<Hub>,
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        let mut state = self.hub.state();
        state.open_listeners -= 1;
        if state.open_listeners == 0 {
            // Closing the endpoint resets connections nobody accepted
            state.pending.clear();
        }
    }
}

#[async_trait]
impl TransportListener for MemoryListener {
    async fn accept(&mut self) -> Result<(BoxedStream, PeerIdentity)> {
        loop {
            let arrived = self.hub.arrived.notified();
            let next = self.hub.state().pending.pop_front();
            if let Some((stream, peer)) = next {
                return Ok((Box::new(stream), peer));
            }
            arrived.await;
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn listen(&self) -> Result<Box<dyn TransportListener>> {
        let mut state = self.hub.state();
        state.open_listeners += 1;
        state.listens += 1;
        Ok(Box::new(MemoryListener {
            hub: self.hub.clone(),
        }))
    }

    async fn connect(&self, address: &str) -> Result<(BoxedStream, PeerIdentity)> {
        let (reply, answer) = oneshot::channel();
        self.hub
            .dial_tx
            .send(DialRequest {
                address: address.to_string(),
                reply,
            })
            .map_err(|_| anyhow!("no remote for {}", address))?;

        let (stream, peer) = answer
            .await
            .map_err(|_| anyhow!("connection to {} refused", address))?;
        Ok((stream, peer))
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_dial_in_reaches_listener() {
        let (transport, remote) = memory_link();
        let mut listener = transport.listen().await.unwrap();
        assert_eq!(remote.open_listeners(), 1);

        let mut theirs = remote.dial_in(PeerIdentity::new("AA:BB", "peer1"));
        let (mut ours, peer) = listener.accept().await.unwrap();
        assert_eq!(peer.name, "peer1");

        theirs.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        ours.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        drop(listener);
        assert_eq!(remote.open_listeners(), 0);
        assert_eq!(remote.listens(), 1);
    }

    #[tokio::test]
    async fn test_dial_in_without_listener_is_refused() {
        let (_transport, remote) = memory_link();
        let mut theirs = remote.dial_in(PeerIdentity::unnamed("AA:BB"));
        let mut buf = [0u8; 1];
        assert_eq!(theirs.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refused_dial_fails() {
        let (transport, mut remote) = memory_link();
        let dial = tokio::spawn(async move { transport.connect("AA:BB").await.map(|_| ()) });

        let request = remote.next_dial().await.unwrap();
        assert_eq!(request.address, "AA:BB");
        request.refuse();

        assert!(dial.await.unwrap().is_err());
    }
}
