use bytes::Bytes;

/// The wire unit of every transfer: an immutable payload sealed at
/// construction.
///
/// The payload is backed by [`Bytes`], so a `Packet` is shared by atomic
/// reference count; cloning bumps the count and never copies the bytes. The
/// session, the dispatcher's in-flight operation record, and any callback
/// consumer can hold the same buffer safely, and it is freed when the last
/// handle drops. There is no resize: build a new `Packet` instead.
///
/// The 4-byte length prefix is not part of the payload; the codec writes it
/// on send and strips it on receive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    payload: Bytes,
}

impl Packet {
    pub fn new(payload: impl Into<Bytes>) -> Packet {
        Packet {
            payload: payload.into(),
        }
    }

    pub fn copy_from_slice(data: &[u8]) -> Packet {
        Packet {
            payload: Bytes::copy_from_slice(data),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
