//! Connection manager: the link state machine and the only owner of roles
//!
//! Listener, dialer and link pump tasks never touch manager state directly.
//! They hand their outcome (a port, a failure, received bytes) back through
//! the methods on [`Shared`], which re-check under the lock that the role is
//! still the one the manager wants before acting on it.

use super::config::ConnectionConfig;
use super::observer::Observer;
use super::roles::{join_role, LinkHandle, RoleHandle, RoleId, RoleKind, RoleRegistry};
use super::{dialer, listener, pump};
use crate::transport::{BoxedStream, Transport};
use bluechat_shared::{
    ChatError, ConnectionState, LinkEvent, LinkFailure, LinkStateMachine, Notification,
    PeerIdentity, TransitionResult,
};
use bytes::Bytes;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// State guarded by the manager lock
#[derive(Default)]
struct Inner {
    fsm: LinkStateMachine,
    /// Set once by `stop()`; the manager cannot be restarted
    stopped: bool,
    next_role_id: RoleId,
    listener: Option<RoleHandle>,
    dialer: Option<RoleHandle>,
    link: Option<LinkHandle>,
    /// Cancelled or finished roles not yet joined
    retired: Vec<JoinHandle<()>>,
}

impl Inner {
    fn next_id(&mut self) -> RoleId {
        self.next_role_id += 1;
        self.next_role_id
    }

    fn retire(&mut self, task: JoinHandle<()>) {
        self.retired.retain(|t| !t.is_finished());
        self.retired.push(task);
    }

    fn cancel_dialer(&mut self) {
        if let Some(dialer) = self.dialer.take() {
            debug!("[CHAT] Cancelling dialer #{}", dialer.id);
            let task = dialer.cancel();
            self.retire(task);
        }
    }

    fn cancel_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            debug!("[CHAT] Cancelling listener #{}", listener.id);
            let task = listener.cancel();
            self.retire(task);
        }
    }

    fn cancel_link(&mut self) {
        if let Some(link) = self.link.take() {
            debug!("[CHAT] Closing link #{} to {}", link.role.id, link.peer);
            let task = link.role.cancel();
            self.retire(task);
        }
    }

    /// Cancel every live role and hand back all tasks for joining
    fn drain_roles(&mut self) -> Vec<JoinHandle<()>> {
        self.cancel_listener();
        self.cancel_dialer();
        self.cancel_link();
        std::mem::take(&mut self.retired)
    }

    fn is_current(&self, kind: RoleKind, id: RoleId) -> bool {
        let handle = match kind {
            RoleKind::Listener => self.listener.as_ref(),
            RoleKind::Dialer => self.dialer.as_ref(),
        };
        handle.map(|h| h.id) == Some(id)
    }
}

/// Everything the manager shares with its role tasks
pub(crate) struct Shared {
    inner: Mutex<Inner>,
    roles: RoleRegistry,
    /// Flips to true once `stop()` has joined every role
    torn_down: watch::Sender<bool>,
    observer: Box<dyn Observer>,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) config: ConnectionConfig,
}

impl Shared {
    fn emit(&self, notification: Notification) {
        self.observer.notify(notification);
    }

    /// Drive the state machine, telling the observer about real changes
    fn apply(&self, inner: &mut Inner, event: LinkEvent) -> bool {
        match inner.fsm.process_event(event) {
            TransitionResult::Changed { from, to } => {
                info!("[CHAT] State {} -> {}", from, to);
                self.emit(Notification::StateChanged(to));
                true
            }
            TransitionResult::Unchanged(_) => false,
            TransitionResult::Invalid { from, event } => {
                warn!("[CHAT] Ignoring {:?} in state {}", event, from);
                false
            }
        }
    }

    fn spawn_listener(self: &Arc<Self>, inner: &mut Inner) {
        let id = inner.next_id();
        let shared = Arc::clone(self);
        debug!("[CHAT] Spawning listener #{}", id);
        inner.listener = Some(RoleHandle::spawn(&self.roles, id, move |cancel| {
            listener::run(shared, id, cancel)
        }));
    }

    fn spawn_dialer(self: &Arc<Self>, inner: &mut Inner, address: String) {
        let id = inner.next_id();
        let shared = Arc::clone(self);
        debug!("[CHAT] Spawning dialer #{} to {}", id, address);
        inner.dialer = Some(RoleHandle::spawn(&self.roles, id, move |cancel| {
            dialer::run(shared, id, address, cancel)
        }));
    }

    /// Fall back to listening after a link or dial failure
    fn relisten(self: &Arc<Self>, inner: &mut Inner, event: LinkEvent) {
        if self.apply(inner, event) && inner.listener.is_none() {
            self.spawn_listener(inner);
        }
    }

    /// Offer a freshly produced port to the manager
    ///
    /// The first port whose role is still wanted becomes the link; any other
    /// port is handed back so the caller closes it.
    pub(crate) async fn promote(
        self: &Arc<Self>,
        kind: RoleKind,
        id: RoleId,
        stream: BoxedStream,
        peer: PeerIdentity,
    ) -> Option<BoxedStream> {
        let mut inner = self.inner.lock().await;

        let state = inner.fsm.state();
        let wanted = !inner.stopped
            && inner.is_current(kind, id)
            && match kind {
                RoleKind::Listener => {
                    matches!(state, ConnectionState::Listening | ConnectionState::Connecting)
                }
                RoleKind::Dialer => state == ConnectionState::Connecting,
            };
        if !wanted {
            debug!("[CHAT] Discarding stale port from {} #{} ({})", kind, id, peer);
            return Some(stream);
        }

        // The winner exits on its own; the sibling loses the race
        let (own, sibling) = match kind {
            RoleKind::Listener => (inner.listener.take(), inner.dialer.take()),
            RoleKind::Dialer => (inner.dialer.take(), inner.listener.take()),
        };
        if let Some(own) = own {
            let task = own.finish();
            inner.retire(task);
        }
        if let Some(sibling) = sibling {
            debug!("[CHAT] Cancelling sibling #{}", sibling.id);
            let task = sibling.cancel();
            inner.retire(task);
        }
        inner.cancel_link();

        if kind == RoleKind::Listener {
            self.apply(&mut inner, LinkEvent::PortAccepted);
        }

        let pump_id = inner.next_id();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::clone(self);
        let pump_peer = peer.clone();
        let role = RoleHandle::spawn(&self.roles, pump_id, move |cancel| {
            pump::run(shared, pump_id, stream, pump_peer, outbound_rx, cancel)
        });
        info!("[CHAT] Link #{} to {} via {} #{}", pump_id, peer, kind, id);

        // The pump reports through `deliver`, which waits for this lock, so
        // nothing it reads can overtake the notifications below
        let name = peer.name.clone();
        inner.link = Some(LinkHandle {
            role,
            outbound,
            peer,
        });
        self.emit(Notification::PeerKnown { name });
        self.apply(&mut inner, LinkEvent::Promoted);
        None
    }

    /// The dialer could not produce a port
    pub(crate) async fn dial_failed(self: &Arc<Self>, id: RoleId, reason: &str) {
        let mut inner = self.inner.lock().await;
        if inner.stopped || !inner.is_current(RoleKind::Dialer, id) {
            debug!("[CHAT] Ignoring failure of stale dialer #{}: {}", id, reason);
            return;
        }
        if let Some(dialer) = inner.dialer.take() {
            let task = dialer.finish();
            inner.retire(task);
        }

        warn!("[DIAL] #{} failed: {}", id, reason);
        self.emit(Notification::failure(LinkFailure::ConnectFailed));
        self.relisten(&mut inner, LinkEvent::DialFailed);
    }

    /// The listener exited without a port
    pub(crate) async fn listener_exited(&self, id: RoleId) {
        let mut inner = self.inner.lock().await;
        if inner.is_current(RoleKind::Listener, id) {
            if let Some(listener) = inner.listener.take() {
                let task = listener.finish();
                inner.retire(task);
            }
        }
    }

    /// Forward a pump notification if the pump still owns the link
    pub(crate) async fn deliver(&self, pump_id: RoleId, notification: Notification) -> bool {
        let inner = self.inner.lock().await;
        let current = !inner.stopped && inner.link.as_ref().map(|l| l.role.id) == Some(pump_id);
        if current {
            self.emit(notification);
        }
        current
    }

    /// The pump hit an I/O error on the link
    pub(crate) async fn link_lost(self: &Arc<Self>, pump_id: RoleId, reason: &str) {
        let mut inner = self.inner.lock().await;
        let current = !inner.stopped && inner.link.as_ref().map(|l| l.role.id) == Some(pump_id);
        if !current {
            debug!("[CHAT] Ignoring loss of superseded link #{}", pump_id);
            return;
        }
        if let Some(link) = inner.link.take() {
            warn!("[LINK] #{} to {} lost: {}", pump_id, link.peer, reason);
            let task = link.role.finish();
            inner.retire(task);
        }

        self.emit(Notification::failure(LinkFailure::ConnectionLost));
        self.relisten(&mut inner, LinkEvent::LinkLost);
    }
}

/// Manages one point-to-point chat link
///
/// Listens for inbound peers after [`start`](Self::start), dials on
/// [`connect`](Self::connect), and falls back to listening whenever a dial
/// fails or an established link drops. Everything the link does is reported
/// to the [`Observer`] given at construction.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager in state `None`
    pub fn new(
        transport: impl Transport,
        config: ConnectionConfig,
        observer: impl Observer,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                roles: RoleRegistry::default(),
                torn_down: watch::channel(false).0,
                observer: Box::new(observer),
                transport: Box::new(transport),
                config,
            }),
        }
    }

    /// Create a manager whose notifications arrive on a channel
    pub fn with_channel(
        transport: impl Transport,
        config: ConnectionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (Self::new(transport, config, event_tx), event_rx)
    }

    /// Start listening for inbound peers
    ///
    /// Does nothing if already started. The radio must already be enabled.
    pub async fn start(&self) -> Result<(), ChatError> {
        let mut inner = self.shared.inner.lock().await;
        if inner.stopped {
            return Err(ChatError::ShutDown);
        }
        if self.shared.apply(&mut inner, LinkEvent::Started) {
            info!("[CHAT] Starting on {}", self.shared.transport.name());
            self.shared.spawn_listener(&mut inner);
        }
        Ok(())
    }

    /// Dial `address`, dropping any current link or dial in progress
    ///
    /// The outcome is reported asynchronously to the observer.
    pub async fn connect(&self, address: &str) -> Result<(), ChatError> {
        let mut inner = self.shared.inner.lock().await;
        if inner.stopped {
            return Err(ChatError::ShutDown);
        }
        if inner.fsm.state() == ConnectionState::None {
            return Err(ChatError::NotStarted);
        }

        inner.cancel_dialer();
        inner.cancel_link();
        self.shared.apply(&mut inner, LinkEvent::DialRequested);
        // Inbound peers can still win while the dial is in flight
        if inner.listener.is_none() {
            self.shared.spawn_listener(&mut inner);
        }
        self.shared.spawn_dialer(&mut inner, address.to_string());
        Ok(())
    }

    /// Queue bytes for the connected peer
    ///
    /// Returns immediately; `DataSent` follows once the bytes are written.
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<(), ChatError> {
        let inner = self.shared.inner.lock().await;
        let link = match (&inner.link, inner.fsm.state()) {
            (Some(link), ConnectionState::Connected) => link,
            _ => return Err(ChatError::NotConnected),
        };

        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }
        link.outbound
            .send(data)
            .map_err(|_| ChatError::NotConnected)
    }

    /// Current link state
    pub async fn state(&self) -> ConnectionState {
        self.shared.inner.lock().await.fsm.state()
    }

    /// The connected peer, if any
    pub async fn peer(&self) -> Option<PeerIdentity> {
        let inner = self.shared.inner.lock().await;
        inner.link.as_ref().map(|l| l.peer.clone())
    }

    /// Permanently shut down
    ///
    /// Cancels every role and returns once all role tasks have ended and
    /// their ports are closed. Each role gets at most `shutdown_timeout`.
    /// Concurrent callers all wait for the same teardown.
    pub async fn stop(&self) {
        let tasks = {
            let mut inner = self.shared.inner.lock().await;
            if inner.stopped {
                let mut done = self.shared.torn_down.subscribe();
                drop(inner);
                let _ = done.wait_for(|stopped| *stopped).await;
                return;
            }
            inner.stopped = true;
            let tasks = inner.drain_roles();
            self.shared.apply(&mut inner, LinkEvent::Stopped);
            tasks
        };

        info!("[CHAT] Stopping, waiting for {} role(s)", tasks.len());
        let limit = self.shared.config.shutdown_timeout;
        join_all(tasks.into_iter().map(|task| join_role(task, limit))).await;
        self.shared.torn_down.send_replace(true);
        info!("[CHAT] Stopped");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // Role tasks keep `Shared` alive, so they must not outlive the manager.
        // The registry is reachable even while a role holds the lock.
        self.shared.roles.abort_all();
        if let Ok(mut inner) = self.shared.inner.try_lock() {
            inner.stopped = true;
            inner.drain_roles();
        }
    }
}
