//! One client connection

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use rce_shared::codec::{self, CodecError, MAX_MESSAGE_SIZE};
use rce_shared::envelope::Payload;
use rce_shared::transport::{BoxedStream, FrameReader};
use rce_shared::{Envelope, ErrorKind, RpcError};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::server::Server;
use crate::service;

/// Shared write side of a connection. Replies from concurrent requests are
/// serialized through the lock, one whole frame at a time.
#[derive(Clone)]
pub struct SessionWriter {
    writer: Arc<Mutex<WriteHalf<BoxedStream>>>,
}

impl SessionWriter {
    /// Answer request `sequence_id`
    ///
    /// A reply too large to frame is replaced by an `Internal` error under the
    /// same sequence id, so the caller is always answered.
    pub async fn send_reply(&self, sequence_id: u64, reply: Payload) -> Result<()> {
        let frame = encode_reply(sequence_id, reply)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }
}

fn encode_reply(sequence_id: u64, reply: Payload) -> Result<Bytes, CodecError> {
    let name = reply.name();
    match codec::encode(&Envelope::new(sequence_id, reply)) {
        Err(CodecError::MessageTooLarge(len)) => {
            warn!(sequence_id, reply = name, len, "reply too large, answering with an error");
            let error = RpcError::new(
                ErrorKind::Internal,
                format!("{name} reply is {len} bytes, over the {MAX_MESSAGE_SIZE} byte frame limit"),
            );
            codec::encode(&Envelope::new(sequence_id, Payload::Error(error)))
        }
        encoded => encoded,
    }
}

/// A connected client
///
/// Every request is handled in its own task, so a blocked Wait never holds
/// up other requests on the same connection.
pub struct Session {
    addr: SocketAddr,
    reader: FrameReader<ReadHalf<BoxedStream>>,
    writer: SessionWriter,
    closed: watch::Sender<bool>,
}

impl Session {
    pub fn new(stream: BoxedStream, addr: SocketAddr) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (closed, _) = watch::channel(false);

        Self {
            addr,
            reader: FrameReader::new(reader),
            writer: SessionWriter {
                writer: Arc::new(Mutex::new(writer)),
            },
            closed,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve requests until the peer disconnects or sends garbage
    pub async fn run(mut self, server: Arc<Server>) {
        loop {
            let envelope = match self.reader.recv().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    debug!(addr = %self.addr, "connection closed");
                    break;
                }
                Err(e) => {
                    warn!(addr = %self.addr, error = %e, "dropping connection");
                    break;
                }
            };

            let sequence_id = envelope.sequence_id();
            let server = server.clone();
            let writer = self.writer.clone();
            let closed = self.closed.subscribe();
            let addr = self.addr;

            tokio::spawn(async move {
                let reply = service::handle_request(&server, envelope.payload, closed).await;
                if let Err(e) = writer.send_reply(sequence_id, reply).await {
                    warn!(%addr, sequence_id, error = %e, "failed to send reply");
                }
            });
        }

        // Cancels any Wait still outstanding on this connection
        self.closed.send_replace(true);
    }
}
