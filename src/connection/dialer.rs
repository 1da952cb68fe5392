//! Dialer role: open one outbound port and offer it for promotion

use super::manager::Shared;
use super::roles::{close_port, CancelSignal, RoleId, RoleKind};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info};

pub(crate) async fn run(shared: Arc<Shared>, id: RoleId, address: String, mut cancel: CancelSignal) {
    info!("[DIAL] #{} connecting to {} via {}", id, address, shared.transport.name());

    let limit = shared.config.connect_timeout;
    let attempt = tokio::select! {
        _ = &mut cancel => {
            debug!("[DIAL] #{} to {} cancelled", id, address);
            return;
        }
        attempt = timeout(limit, shared.transport.connect(&address)) => attempt,
    };

    match attempt {
        Ok(Ok((stream, peer))) => {
            // A late success after cancellation is refused by `promote`
            if let Some(stale) = shared.promote(RoleKind::Dialer, id, stream, peer).await {
                close_port(stale, shared.config.close_timeout).await;
            }
        }
        Ok(Err(e)) => shared.dial_failed(id, &e.to_string()).await,
        Err(_) => {
            let reason = format!("no answer from {} within {:?}", address, limit);
            shared.dial_failed(id, &reason).await
        }
    }
}
