//! Wire-level building blocks: the reference-counted [`Packet`], the
//! length-prefixed [`FrameCodec`], and the incremental [`FramedReader`] that
//! reassembles frames from a byte stream.
//!
//! Everything exchanged between two endpoints of this engine is one framed
//! packet: a 4-byte native-order length prefix followed by exactly that many
//! payload bytes. A partial or zero-byte read in either phase is treated as
//! connection-closed.

pub use connection::{write_packet, FramedReader};
pub use frame::{FrameCodec, LENGTH_PREFIX_SIZE};
pub use packet::Packet;

mod connection;
mod frame;
mod packet;
