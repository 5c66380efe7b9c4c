//! Byte stream abstraction and frame I/O used by both ends of a connection

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{self, CodecError, FrameDecoder};
use crate::Envelope;

/// A transport stream that can read and write bytes (plain TCP or TLS)
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> TransportStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn TransportStream>;

/// Reads length-prefixed envelopes from the read half of a stream
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Read the next envelope
    ///
    /// Returns `Ok(None)` when the peer closed the connection. Safe to use as a
    /// `select!` branch: bytes are only consumed once a read has completed.
    pub async fn recv(&mut self) -> Result<Option<Envelope>, CodecError> {
        loop {
            if let Some(envelope) = self.decoder.decode_next()? {
                return Ok(Some(envelope));
            }

            let n = self.reader.read(&mut self.read_buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.extend(&self.read_buf[..n]);
        }
    }
}

/// Encode and write one envelope
pub async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<(), CodecError> {
    let encoded = codec::encode(envelope)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{envelope::Payload, Id};

    #[tokio::test]
    async fn test_frames_cross_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(64);
        let (_, mut client_write) = tokio::io::split(client);
        let (server_read, _) = tokio::io::split(server);
        let mut reader = FrameReader::new(server_read);

        let sent = Envelope::new(3, Payload::GetStatus(Id { id: "x".into() }));
        let writer = tokio::spawn(async move {
            write_envelope(&mut client_write, &sent).await.expect("write");
            write_envelope(&mut client_write, &sent).await.expect("write");
        });

        let first = reader.recv().await.expect("recv").expect("frame");
        let second = reader.recv().await.expect("recv").expect("frame");
        assert_eq!(first.sequence_id(), 3);
        assert_eq!(first, second);
        writer.await.expect("writer task");
    }

    #[tokio::test]
    async fn test_eof_is_none() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut reader = FrameReader::new(server);
        assert!(reader.recv().await.expect("clean eof").is_none());
    }
}
