//! Session lifecycle and framed I/O for TCP connections and UDP peer
//! bindings.
//!
//! A session owns its socket handles exclusively; the dispatcher and the
//! servers reach it only through shared `Arc` references and the crate-
//! private `AsyncIo` seam. State transitions serialize under a session-wide
//! lock, which is what makes `connect`/`disconnect` idempotent and the
//! disconnect notification single-shot.

pub use state::SessionState;
pub use tcp::TcpSession;
pub use udp::{UdpPeerSession, UdpSession};

mod state;
mod tcp;
mod udp;
