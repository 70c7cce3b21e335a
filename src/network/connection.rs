use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::service::{EngineError, EngineResult};

use super::{FrameCodec, Packet};

/// Frame-at-a-time reader over a byte stream.
///
/// The accumulation buffer lives here, not in the caller, so a timed-out
/// read never discards bytes already received: the next call resumes where
/// the stream left off.
#[derive(Debug)]
pub struct FramedReader<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(reader: R, read_buffer_size: usize) -> FramedReader<R> {
        FramedReader {
            reader,
            buffer: BytesMut::with_capacity(read_buffer_size),
        }
    }

    /// Reads exactly one frame: the 4-byte prefix first, then exactly that
    /// many payload bytes. A zero-byte read, whether the buffer is empty or
    /// holds a partial frame, means the peer is gone and the session must
    /// come down.
    pub async fn read_packet(&mut self, codec: &FrameCodec) -> EngineResult<Packet> {
        loop {
            if let Some(packet) = codec.parse(&mut self.buffer)? {
                return Ok(packet);
            }
            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return Err(EngineError::ConnectionClosing);
            }
        }
    }
}

/// Writes one framed packet and flushes. Returns the total bytes put on the
/// wire, prefix included.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    codec: &FrameCodec,
    packet: &Packet,
) -> EngineResult<usize> {
    let frame = codec.encode(packet)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(frame.len())
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::{write_packet, FramedReader};
    use crate::network::{FrameCodec, Packet};
    use crate::service::EngineError;

    #[tokio::test]
    async fn round_trips_one_packet() {
        let codec = FrameCodec::new(1024);
        let (mut tx, rx) = tokio::io::duplex(256);
        let mut reader = FramedReader::new(rx, 64);

        let sent = Packet::copy_from_slice(b"hello framing");
        let written = write_packet(&mut tx, &codec, &sent).await.unwrap();
        assert_eq!(written, 4 + sent.len());

        let received = reader.read_packet(&codec).await.unwrap();
        assert_eq!(received.payload(), sent.payload());
    }

    #[tokio::test]
    async fn assembles_a_frame_split_across_writes() {
        let codec = FrameCodec::new(1024);
        let (mut tx, rx) = tokio::io::duplex(256);
        let frame = codec.encode(&Packet::copy_from_slice(b"split me")).unwrap();

        let read_task = tokio::spawn(async move {
            let mut reader = FramedReader::new(rx, 16);
            reader.read_packet(&codec).await
        });

        tx.write_all(&frame[..3]).await.unwrap();
        tokio::task::yield_now().await;
        tx.write_all(&frame[3..]).await.unwrap();

        let packet = read_task.await.unwrap().unwrap();
        assert_eq!(packet.payload(), b"split me");
    }

    #[tokio::test]
    async fn eof_mid_frame_reports_connection_closing() {
        let codec = FrameCodec::new(1024);
        let (mut tx, rx) = tokio::io::duplex(256);
        let frame = codec.encode(&Packet::new(vec![1u8; 100])).unwrap();

        tx.write_all(&frame[..44]).await.unwrap();
        drop(tx);

        let mut reader = FramedReader::new(rx, 64);
        let err = reader.read_packet(&codec).await.unwrap_err();
        assert!(matches!(err, EngineError::ConnectionClosing));
    }

    #[tokio::test]
    async fn clean_eof_reports_connection_closing() {
        let codec = FrameCodec::new(1024);
        let (tx, rx) = tokio::io::duplex(256);
        drop(tx);

        let mut reader = FramedReader::new(rx, 64);
        let err = reader.read_packet(&codec).await.unwrap_err();
        assert!(matches!(err, EngineError::ConnectionClosing));
    }
}
