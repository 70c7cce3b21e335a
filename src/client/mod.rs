//! Client facades.
//!
//! [`TcpClient`] is the blocking-style surface: each call finishes its
//! operation before returning. [`AsyncTcpClient`] and [`AsyncUdpClient`]
//! queue prioritized operations on a per-session dispatcher and can run a
//! background receive pump that feeds `on_receive`.

pub use tcp::{AsyncTcpClient, TcpClient};
pub use udp::AsyncUdpClient;

mod tcp;
mod udp;
