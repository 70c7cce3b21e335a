use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::service::{EngineError, EngineResult};

use super::Packet;

/// Size of the length prefix preceding every payload on the wire.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encoder/decoder for the `[u32 length N][N bytes payload]` wire format.
///
/// The prefix is host-native byte order, used consistently by both ends of
/// the engine. Decoding is incremental over a `BytesMut` accumulator: the
/// internal `Incomplete` marker surfaces as `Ok(None)` so callers keep
/// reading until a whole frame is buffered.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_packet_size: usize,
}

impl FrameCodec {
    pub fn new(max_packet_size: usize) -> FrameCodec {
        FrameCodec { max_packet_size }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn check(&self, buffer: &mut BytesMut) -> EngineResult<()> {
        if buffer.remaining() < LENGTH_PREFIX_SIZE {
            return Err(EngineError::Incomplete);
        }
        let prefix: [u8; LENGTH_PREFIX_SIZE] = buffer
            .get(0..LENGTH_PREFIX_SIZE)
            .expect("prefix length checked above")
            .try_into()
            .expect("slice is exactly prefix sized");
        let body_size = u32::from_ne_bytes(prefix) as usize;
        if body_size > self.max_packet_size {
            return Err(EngineError::ProtocolFraming(format!(
                "frame of length {} exceeds the {} byte limit",
                body_size, self.max_packet_size
            )));
        }
        if buffer.remaining() < body_size + LENGTH_PREFIX_SIZE {
            buffer.reserve(body_size + LENGTH_PREFIX_SIZE);
            return Err(EngineError::Incomplete);
        }
        Ok(())
    }

    /// Incremental parse; `Ok(None)` means more bytes are needed.
    pub fn parse(&self, buffer: &mut BytesMut) -> EngineResult<Option<Packet>> {
        match self.check(buffer) {
            Ok(()) => {
                let body_size = buffer.get_u32_ne() as usize;
                let body = buffer.split_to(body_size).freeze();
                Ok(Some(Packet::new(body)))
            }
            Err(EngineError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn encode(&self, packet: &Packet) -> EngineResult<Bytes> {
        if packet.len() > self.max_packet_size {
            return Err(EngineError::ProtocolFraming(format!(
                "payload of length {} exceeds the {} byte limit",
                packet.len(),
                self.max_packet_size
            )));
        }
        let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + packet.len());
        frame.put_u32_ne(packet.len() as u32);
        frame.put_slice(packet.payload());
        Ok(frame.freeze())
    }

    /// Decodes one datagram, which must hold exactly one frame. A short body
    /// or trailing garbage is a framing violation.
    pub fn parse_datagram(&self, datagram: &[u8]) -> EngineResult<Packet> {
        if datagram.len() < LENGTH_PREFIX_SIZE {
            return Err(EngineError::ProtocolFraming(format!(
                "datagram of {} bytes is shorter than the length prefix",
                datagram.len()
            )));
        }
        let prefix: [u8; LENGTH_PREFIX_SIZE] = datagram[..LENGTH_PREFIX_SIZE]
            .try_into()
            .expect("slice is exactly prefix sized");
        let body_size = u32::from_ne_bytes(prefix) as usize;
        if body_size > self.max_packet_size {
            return Err(EngineError::ProtocolFraming(format!(
                "frame of length {} exceeds the {} byte limit",
                body_size, self.max_packet_size
            )));
        }
        if body_size != datagram.len() - LENGTH_PREFIX_SIZE {
            return Err(EngineError::ProtocolFraming(format!(
                "prefix declares {} bytes but datagram carries {}",
                body_size,
                datagram.len() - LENGTH_PREFIX_SIZE
            )));
        }
        Ok(Packet::copy_from_slice(&datagram[LENGTH_PREFIX_SIZE..]))
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};
    use rstest::rstest;

    use super::{FrameCodec, LENGTH_PREFIX_SIZE};
    use crate::network::Packet;

    fn codec() -> FrameCodec {
        FrameCodec::new(1024)
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(20)]
    #[case(1024)]
    fn encode_writes_prefix_matching_payload_length(#[case] size: usize) {
        let packet = Packet::new(vec![7u8; size]);
        let frame = codec().encode(&packet).unwrap();
        assert_eq!(frame.len(), LENGTH_PREFIX_SIZE + size);
        let prefix = u32::from_ne_bytes(frame[..4].try_into().unwrap());
        assert_eq!(prefix as usize, packet.len());
    }

    #[test]
    fn parse_waits_for_a_complete_frame() {
        let codec = codec();
        let frame = codec.encode(&Packet::new(vec![1u8, 2, 3])).unwrap();

        let mut buffer = BytesMut::new();
        buffer.put_slice(&frame[..2]);
        assert!(codec.parse(&mut buffer).unwrap().is_none());

        buffer.put_slice(&frame[2..5]);
        assert!(codec.parse(&mut buffer).unwrap().is_none());

        buffer.put_slice(&frame[5..]);
        let packet = codec.parse(&mut buffer).unwrap().unwrap();
        assert_eq!(packet.payload(), &[1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn parse_decodes_back_to_back_frames_in_order() {
        let codec = codec();
        let mut buffer = BytesMut::new();
        for b in [b"first".as_slice(), b"second".as_slice()] {
            buffer.put_slice(&codec.encode(&Packet::copy_from_slice(b)).unwrap());
        }
        assert_eq!(
            codec.parse(&mut buffer).unwrap().unwrap().payload(),
            b"first"
        );
        assert_eq!(
            codec.parse(&mut buffer).unwrap().unwrap().payload(),
            b"second"
        );
        assert!(codec.parse(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn oversized_prefix_is_a_framing_error() {
        let codec = codec();
        let mut buffer = BytesMut::new();
        buffer.put_u32_ne(2048);
        buffer.put_slice(&[0u8; 8]);
        assert!(codec.parse(&mut buffer).is_err());
    }

    #[test]
    fn oversized_payload_is_rejected_on_encode() {
        let packet = Packet::new(vec![0u8; 2048]);
        assert!(codec().encode(&packet).is_err());
    }

    #[test]
    fn datagram_must_hold_exactly_one_frame() {
        let codec = codec();
        let frame = codec.encode(&Packet::copy_from_slice(b"dgram")).unwrap();
        assert_eq!(codec.parse_datagram(&frame).unwrap().payload(), b"dgram");

        // truncated body
        assert!(codec.parse_datagram(&frame[..frame.len() - 1]).is_err());
        // trailing garbage
        let mut padded = frame.to_vec();
        padded.push(0);
        assert!(codec.parse_datagram(&padded).is_err());
        // shorter than the prefix itself
        assert!(codec.parse_datagram(&frame[..2]).is_err());
    }
}
