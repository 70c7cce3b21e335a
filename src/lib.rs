//! An asynchronous TCP/UDP engine with length-prefixed packet framing,
//! prioritized per-session operation queues, and bounded worker pools.
//!
//! Servers accept connections (or demultiplex datagrams) into sessions and
//! run application callbacks on pool workers; clients expose the same
//! sessions behind blocking-style or asynchronous facades. Every wire frame
//! is a 4-byte length prefix followed by the payload.

mod client;
mod dispatch;
mod handler;
mod network;
mod pool;
mod server;
mod service;
mod session;
mod sync;
mod utils;

pub use client::{AsyncTcpClient, AsyncUdpClient, TcpClient};
pub use dispatch::{KillTicket, Priority, PriorityQueue, ReceiveTicket, SendTicket};
pub use handler::{ServerHandler, SessionHandler};
pub use network::{write_packet, FrameCodec, FramedReader, Packet, LENGTH_PREFIX_SIZE};
pub use pool::{PoolHandler, WorkerPool, WorkerPoolConfig};
pub use server::{ServerState, TcpServer, UdpServer};
pub use service::{
    setup_file_tracing, setup_local_tracing, wait_time, EngineConfig, EngineError, EngineResult,
    NetworkConfig, PoolConfig, Shutdown, INFINITE,
};
pub use session::{SessionState, TcpSession, UdpPeerSession, UdpSession};
pub use sync::{CompletionEvent, WaitOutcome};
