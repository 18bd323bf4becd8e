//! Reader and writer tasks
//!
//! Each started session runs exactly one of each. The reader owns the read half
//! and the cleanup; the writer owns the write half and hands it back to the
//! reader when it stops so the connection is released after the close listeners.

use super::listener::{guarded, MessageHandler};
use super::Session;
use crate::error::SessionError;
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Read until the connection ends, the handler fails or the session closes
pub(super) async fn read_loop<R, W>(
    session: Arc<Session>,
    mut reader: R,
    writer: JoinHandle<W>,
    handler: MessageHandler,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let max_empty_reads = session.config().max_empty_reads.max(1);
    let mut buf = vec![0u8; session.config().read_buffer_size.max(1)];
    let mut empty_reads = 0;
    let mut shutdown = session.shutdown_signal();

    loop {
        let read = tokio::select! {
            biased;
            _ = shutdown.wait_for(|closing| *closing) => break,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                empty_reads += 1;
                if empty_reads >= max_empty_reads {
                    debug!("connection closed by peer");
                    break;
                }
                tokio::task::yield_now().await;
            }
            Ok(n) => {
                empty_reads = 0;
                let dispatched = guarded("session.on_message", session.sid(), || {
                    handler(session.as_ref(), &buf[..n])
                })
                .unwrap_or_else(|| Err(anyhow::anyhow!("message handler panicked")));

                if let Err(err) = dispatched {
                    let err = SessionError::Dispatch(err);
                    warn!(error = %err, "dispatch failed, closing session");
                    session.emit_error(&err);
                    break;
                }
            }
            Err(err) => {
                let err = SessionError::TransportRead(err);
                debug!(error = %err, "read failed, closing session");
                session.emit_error(&err);
                break;
            }
        }
    }

    session.begin_close();
    session.release(writer).await;
}

/// Drain the outbound queue in order until the session closes or a write fails.
///
/// Closing interrupts a write in progress, so a peer that stopped reading cannot
/// hold up cleanup. The payload being written at that moment may reach the peer
/// truncated; payloads still queued are dropped.
pub(super) async fn write_loop<W>(
    session: Arc<Session>,
    mut writer: W,
    mut outbound: mpsc::Receiver<Bytes>,
) -> W
where
    W: AsyncWrite + Unpin,
{
    let mut shutdown = session.shutdown_signal();

    loop {
        let payload = tokio::select! {
            biased;
            _ = shutdown.wait_for(|closing| *closing) => break,
            payload = outbound.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };

        let written = tokio::select! {
            biased;
            _ = shutdown.wait_for(|closing| *closing) => break,
            written = write_payload(&mut writer, &payload) => written,
        };

        if let Err(err) = written {
            let err = SessionError::TransportWrite(err);
            warn!(error = %err, "write failed, closing session");
            session.emit_error(&err);
            session.close();
            break;
        }
    }

    writer
}

async fn write_payload<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(payload).await?;
    writer.flush().await
}
