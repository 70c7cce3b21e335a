//! Server engines.
//!
//! [`TcpServer`] accepts connections and runs one request-processing cycle
//! per session on the shared worker pool. [`UdpServer`] serves every peer
//! from a single bound socket, demultiplexing datagrams into per-peer
//! sessions. Both expose the same lifecycle: `start`, `stop`, and
//! per-session asynchronous send/kill routed through an I/O dispatcher.

pub use tcp_server::TcpServer;
pub use udp_server::UdpServer;

mod tcp_server;
mod udp_server;

/// Server lifecycle. `start` is valid only from `Stopped`, `stop` only from
/// `Listening`; anything else is a no-op or an error, so concurrent calls
/// cannot double-start or double-stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

impl ServerState {
    pub fn is_listening(&self) -> bool {
        matches!(self, ServerState::Listening)
    }
}
