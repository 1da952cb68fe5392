//! Listener role: accept one inbound peer and offer it for promotion

use super::manager::Shared;
use super::roles::{close_port, CancelSignal, RoleId, RoleKind};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) async fn run(shared: Arc<Shared>, id: RoleId, mut cancel: CancelSignal) {
    let mut endpoint = tokio::select! {
        _ = &mut cancel => return,
        bound = shared.transport.listen() => match bound {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("[LISTEN] #{} could not bind: {}", id, e);
                shared.listener_exited(id).await;
                return;
            }
        },
    };

    // Dropping the endpoint closes it, which is what unblocks a cancelled accept
    let accepted = tokio::select! {
        _ = &mut cancel => {
            debug!("[LISTEN] #{} cancelled", id);
            return;
        }
        accepted = endpoint.accept() => accepted,
    };
    drop(endpoint);

    match accepted {
        Ok((stream, peer)) => {
            info!("[LISTEN] #{} accepted {}", id, peer);
            if let Some(stale) = shared.promote(RoleKind::Listener, id, stream, peer).await {
                close_port(stale, shared.config.close_timeout).await;
            }
        }
        Err(e) => {
            warn!("[LISTEN] #{} accept failed: {}", id, e);
            shared.listener_exited(id).await;
        }
    }
}
