//! Handles to the concurrently running listener, dialer and link pump tasks

use crate::transport::{BoxedStream, TransportStream};
use bytes::Bytes;
use bluechat_shared::PeerIdentity;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, warn};

pub(crate) type RoleId = u64;

/// Cancellation signal handed to a role; resolves on cancel or handle drop
pub(crate) type CancelSignal = oneshot::Receiver<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoleKind {
    Listener,
    Dialer,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKind::Listener => write!(f, "listener"),
            RoleKind::Dialer => write!(f, "dialer"),
        }
    }
}

/// A spawned role task and the means to cancel it
pub(crate) struct RoleHandle {
    pub(crate) id: RoleId,
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RoleHandle {
    pub(crate) fn spawn<F, Fut>(registry: &RoleRegistry, id: RoleId, role: F) -> Self
    where
        F: FnOnce(CancelSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel, signal) = oneshot::channel();
        let task = tokio::spawn(role(signal));
        registry.register(task.abort_handle());
        Self { id, cancel, task }
    }

    /// Signal the role to stop and return its task for joining
    pub(crate) fn cancel(self) -> JoinHandle<()> {
        let _ = self.cancel.send(());
        self.task
    }

    /// Release the handle of a role that is finishing on its own
    pub(crate) fn finish(self) -> JoinHandle<()> {
        self.task
    }
}

#[derive(Default)]
struct RegistryState {
    closed: bool,
    tasks: Vec<AbortHandle>,
}

/// Abort handles of every role task, reachable without the manager lock
#[derive(Default)]
pub(crate) struct RoleRegistry {
    state: Mutex<RegistryState>,
}

impl RoleRegistry {
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, task: AbortHandle) {
        let mut state = self.state();
        if state.closed {
            task.abort();
            return;
        }
        state.tasks.retain(|t| !t.is_finished());
        state.tasks.push(task);
    }

    /// Abort every registered role, and any spawned from now on
    pub(crate) fn abort_all(&self) {
        let mut state = self.state();
        state.closed = true;
        for task in state.tasks.drain(..) {
            task.abort();
        }
    }
}

/// The active link: its pump task, write queue and peer
pub(crate) struct LinkHandle {
    pub(crate) role: RoleHandle,
    pub(crate) outbound: mpsc::UnboundedSender<Bytes>,
    pub(crate) peer: PeerIdentity,
}

/// Close a port, giving the peer at most `limit` to see a clean shutdown
pub(crate) async fn close_port(mut stream: BoxedStream, limit: Duration) {
    match timeout(limit, TransportStream::shutdown(&mut *stream)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("[CHAT] Port shutdown error: {}", e),
        Err(_) => debug!("[CHAT] Port shutdown timed out"),
    }
}

/// Wait for a role task, aborting it if it overruns `limit`
pub(crate) async fn join_role(mut task: JoinHandle<()>, limit: Duration) {
    if timeout(limit, &mut task).await.is_err() {
        warn!("[CHAT] Role did not stop within {:?}, aborting", limit);
        task.abort();
        let _ = task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_reaches_role() {
        let registry = RoleRegistry::default();
        let handle = RoleHandle::spawn(&registry, 7, |signal| async move {
            let _ = signal.await;
        });
        assert_eq!(handle.id, 7);
        join_role(handle.cancel(), Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_join_aborts_stuck_role() {
        let registry = RoleRegistry::default();
        let handle = RoleHandle::spawn(&registry, 1, |_signal| async move {
            std::future::pending::<()>().await;
        });
        let task = handle.cancel();
        join_role(task, Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_abort_all_reaches_late_roles() {
        let registry = RoleRegistry::default();
        let early = RoleHandle::spawn(&registry, 1, |_signal| std::future::pending::<()>());
        registry.abort_all();
        let late = RoleHandle::spawn(&registry, 2, |_signal| std::future::pending::<()>());

        assert!(early.finish().await.unwrap_err().is_cancelled());
        assert!(late.finish().await.unwrap_err().is_cancelled());
    }
}
