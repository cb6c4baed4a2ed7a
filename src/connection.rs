//! Per-connection handler.
//!
//! A connection carries exactly one request/response cycle:
//! 1. Read into a [`ReceiveBuffer`] until the last byte received is `\n`
//! 2. Append the packet to the shared log and stream the whole log back,
//!    as one locked transaction
//! 3. Close
//!
//! Anything the client sends after its first complete line is ignored.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::buffer::{ReceiveBuffer, BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::storage::SharedLog;

/// A single accepted client connection.
pub struct Connection<S> {
    stream: S,
    peer: SocketAddr,
    buffer: ReceiveBuffer,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            buffer: ReceiveBuffer::new(),
        }
    }

    /// Serve this connection to completion.
    ///
    /// Only failures of the shared log are returned as errors; a client that
    /// disappears at any point just ends the connection.
    pub async fn serve(mut self, log: &SharedLog) -> Result<()> {
        let packet = match self.read_packet().await {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                debug!(
                    peer = %self.peer,
                    received = self.buffer.len(),
                    "Connection closed before a full line"
                );
                return Ok(());
            }
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "Read failed");
                return Ok(());
            }
        };

        match log.append_and_dump(&packet, &mut self.stream).await {
            Ok(sent) => trace!(peer = %self.peer, sent, "Sent log contents"),
            Err(Error::ClientGone(e)) => {
                debug!(peer = %self.peer, error = %e, "Client went away during dump");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        // The peer may already be gone; nothing else to deliver.
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    /// Read until the buffer ends in a newline.
    ///
    /// Returns `None` on end-of-stream before a full line.
    async fn read_packet(&mut self) -> Result<Option<Bytes>> {
        let mut block = vec![0u8; BLOCK_SIZE];
        loop {
            let n = self.stream.read(&mut block).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buffer.append(&block[..n]);

            if self.buffer.has_complete_line() {
                trace!(
                    peer = %self.peer,
                    bytes = self.buffer.len(),
                    capacity = self.buffer.capacity(),
                    "Received packet"
                );
                let buffer = std::mem::take(&mut self.buffer);
                return Ok(Some(buffer.into_packet()));
            }
        }
    }
}

/// Accept-loop entry point for one connection.
pub async fn handle_connection<S>(stream: S, peer: SocketAddr, log: Arc<SharedLog>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(peer = %peer, "Accepted connection");
    let result = Connection::new(stream, peer).serve(&log).await;
    debug!(peer = %peer, "Closed connection");
    result
}
