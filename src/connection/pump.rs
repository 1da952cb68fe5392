//! Link pump: exclusive owner of the promoted port
//!
//! One task multiplexes the read loop and the write queue with `select!`.
//! Reads are cancel-safe, so a pending read never holds back a queued write;
//! each frame is written whole before the next read or write is polled.
//! Only cancellation may interrupt a frame, and it closes the port at once.
//! The first I/O error ends the pump and is reported once as a lost link.

use super::manager::Shared;
use super::roles::{close_port, CancelSignal, RoleId};
use crate::transport::BoxedStream;
use bluechat_shared::{Notification, PeerIdentity};
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

pub(crate) async fn run(
    shared: Arc<Shared>,
    id: RoleId,
    stream: BoxedStream,
    peer: PeerIdentity,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    mut cancel: CancelSignal,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut read_buf = vec![0u8; shared.config.read_buffer_size];

    let reason = loop {
        tokio::select! {
            _ = &mut cancel => {
                debug!("[LINK] #{} to {} closed by manager", id, peer);
                close_port(reader.unsplit(writer), shared.config.close_timeout).await;
                return;
            }

            Some(frame) = outbound.recv() => {
                // A peer that stops reading must not pin a cancelled pump
                let written = tokio::select! {
                    _ = &mut cancel => {
                        debug!("[LINK] #{} to {} closed mid-write", id, peer);
                        close_port(reader.unsplit(writer), shared.config.close_timeout).await;
                        return;
                    }
                    written = write_frame(&mut writer, &frame) => written,
                };
                if let Err(e) = written {
                    break format!("write error: {}", e);
                }
                if !shared.deliver(id, Notification::DataSent { data: frame }).await {
                    return;
                }
            }

            result = reader.read(&mut read_buf) => match result {
                Ok(0) => break "peer closed the link".to_string(),
                Ok(n) => {
                    let data = Bytes::copy_from_slice(&read_buf[..n]);
                    let received = Notification::DataReceived { data, peer: peer.clone() };
                    if !shared.deliver(id, received).await {
                        return;
                    }
                }
                Err(e) => break format!("read error: {}", e),
            },
        }
    };

    shared.link_lost(id, &reason).await;
}
