use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Mutex;
use tracing::debug;

use crate::dispatch::AsyncIo;
use crate::network::{FrameCodec, Packet, LENGTH_PREFIX_SIZE};
use crate::service::{EngineError, EngineResult};
use crate::sync::CompletionEvent;
use crate::utils::maybe_timeout;

use super::SessionState;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A client-side UDP peer binding: one connected socket exchanging framed
/// datagrams with a single remote address. Same lifecycle state machine and
/// idempotency rules as [`TcpSession`](super::TcpSession).
#[derive(Debug)]
pub struct UdpSession {
    id: u64,
    general_lock: Mutex<()>,
    state: parking_lot::Mutex<SessionState>,
    socket: parking_lot::Mutex<Option<Arc<UdpSocket>>>,
    peer: parking_lot::Mutex<Option<SocketAddr>>,
    closing: CompletionEvent,
    codec: FrameCodec,
    // reused across receives; a fresh allocation per datagram would cost a
    // full max-packet-size buffer every call
    recv_buf: Mutex<Vec<u8>>,
}

impl UdpSession {
    pub fn new(codec: FrameCodec) -> UdpSession {
        UdpSession {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            general_lock: Mutex::new(()),
            state: parking_lot::Mutex::new(SessionState::Disconnected),
            socket: parking_lot::Mutex::new(None),
            peer: parking_lot::Mutex::new(None),
            closing: CompletionEvent::new(),
            codec,
            recv_buf: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }

    fn live_socket(&self) -> EngineResult<Arc<UdpSocket>> {
        if !self.is_connected() {
            return Err(EngineError::NotConnected);
        }
        self.socket
            .lock()
            .clone()
            .ok_or(EngineError::NotConnected)
    }

    /// Binds a local socket and connects it to the first usable resolved
    /// candidate. `Ok(false)` when already connected, `Ok(true)` when this
    /// call established the binding.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> EngineResult<bool> {
        let _guard = self.general_lock.lock().await;
        if self.is_connected() {
            return Ok(false);
        }
        *self.state.lock() = SessionState::Connecting;

        match maybe_timeout(timeout, Self::connect_any(host, port)).await {
            Ok(Ok((socket, peer))) => {
                *self.socket.lock() = Some(Arc::new(socket));
                *self.peer.lock() = Some(peer);
                self.closing.reset();
                *self.state.lock() = SessionState::Connected;
                debug!(id = self.id, %peer, "udp session connected");
                Ok(true)
            }
            Ok(Err(e)) => {
                *self.state.lock() = SessionState::Disconnected;
                Err(e)
            }
            Err(_) => {
                *self.state.lock() = SessionState::Disconnected;
                Err(EngineError::TimedOut)
            }
        }
    }

    async fn connect_any(host: &str, port: u16) -> EngineResult<(UdpSocket, SocketAddr)> {
        let candidates = lookup_host((host, port)).await.map_err(|e| {
            EngineError::ConnectionError(format!("failed to resolve {host}:{port}: {e}"))
        })?;
        let mut last_error = None;
        for addr in candidates {
            let local: SocketAddr = if addr.is_ipv4() {
                "0.0.0.0:0".parse().expect("static addr")
            } else {
                "[::]:0".parse().expect("static addr")
            };
            let socket = match UdpSocket::bind(local).await {
                Ok(socket) => socket,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };
            match socket.connect(addr).await {
                Ok(()) => return Ok((socket, addr)),
                Err(e) => last_error = Some(e),
            }
        }
        Err(EngineError::ConnectionError(match last_error {
            Some(e) => format!("unable to connect to {host}:{port}: {e}"),
            None => format!("no addresses resolved for {host}:{port}"),
        }))
    }

    /// Drops the socket. Idempotent; `true` for exactly one caller per
    /// established binding.
    pub async fn disconnect(&self) -> bool {
        let _guard = self.general_lock.lock().await;
        if !self.is_connected() {
            return false;
        }
        *self.state.lock() = SessionState::Disconnecting;
        self.closing.set();
        self.socket.lock().take();
        *self.peer.lock() = None;
        *self.state.lock() = SessionState::Disconnected;
        debug!(id = self.id, "udp session disconnected");
        true
    }

    /// Sends one framed datagram.
    pub async fn send(&self, packet: &Packet, timeout: Option<Duration>) -> EngineResult<usize> {
        let socket = self.live_socket()?;
        let frame = self.codec.encode(packet)?;
        tokio::select! {
            res = maybe_timeout(timeout, socket.send(&frame)) => match res {
                Ok(Ok(sent)) => Ok(sent),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(EngineError::TimedOut),
            },
            _ = self.closing.wait(None) => Err(EngineError::ConnectionClosing),
        }
    }

    /// Receives one framed datagram from the connected peer. The whole frame
    /// must fit in a single datagram; anything else is `ProtocolFraming`.
    pub async fn receive(&self, timeout: Option<Duration>) -> EngineResult<Packet> {
        let socket = self.live_socket()?;
        let mut buf = self.recv_buf.lock().await;
        let frame_cap = LENGTH_PREFIX_SIZE + self.codec.max_packet_size();
        if buf.len() < frame_cap {
            buf.resize(frame_cap, 0);
        }
        tokio::select! {
            res = maybe_timeout(timeout, socket.recv(&mut buf)) => match res {
                Ok(Ok(0)) => Err(EngineError::ConnectionClosing),
                Ok(Ok(received)) => self.codec.parse_datagram(&buf[..received]),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(EngineError::TimedOut),
            },
            _ = self.closing.wait(None) => Err(EngineError::ConnectionClosing),
        }
    }
}

impl AsyncIo for UdpSession {
    async fn send_now(&self, packet: Packet, timeout: Option<Duration>) -> EngineResult<usize> {
        self.send(&packet, timeout).await
    }

    async fn receive_now(&self, timeout: Option<Duration>) -> EngineResult<Packet> {
        self.receive(timeout).await
    }

    async fn close_now(&self) -> bool {
        self.disconnect().await
    }
}

/// One remote peer observed by a UDP server, bound to the server's shared
/// socket.
///
/// Receives are driven by the server's demultiplex loop, never through the
/// peer session itself; sends go out via `send_to` on the shared socket.
/// Disconnecting marks the binding dead (the shared socket stays open for
/// the other peers) and the server roster drops the entry.
#[derive(Debug)]
pub struct UdpPeerSession {
    id: u64,
    general_lock: Mutex<()>,
    state: parking_lot::Mutex<SessionState>,
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    closing: CompletionEvent,
    codec: FrameCodec,
}

impl UdpPeerSession {
    pub(crate) fn new(socket: Arc<UdpSocket>, peer: SocketAddr, codec: FrameCodec) -> UdpPeerSession {
        UdpPeerSession {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            general_lock: Mutex::new(()),
            state: parking_lot::Mutex::new(SessionState::Connected),
            socket,
            peer,
            closing: CompletionEvent::new(),
            codec,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Sends one framed datagram to this peer over the shared socket.
    pub async fn send(&self, packet: &Packet, timeout: Option<Duration>) -> EngineResult<usize> {
        if !self.is_connected() {
            return Err(EngineError::NotConnected);
        }
        let frame = self.codec.encode(packet)?;
        tokio::select! {
            res = maybe_timeout(timeout, self.socket.send_to(&frame, self.peer)) => match res {
                Ok(Ok(sent)) => Ok(sent),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(EngineError::TimedOut),
            },
            _ = self.closing.wait(None) => Err(EngineError::ConnectionClosing),
        }
    }

    /// Marks the binding dead. Idempotent; `true` for exactly one caller.
    pub async fn disconnect(&self) -> bool {
        let _guard = self.general_lock.lock().await;
        if !self.is_connected() {
            return false;
        }
        *self.state.lock() = SessionState::Disconnecting;
        self.closing.set();
        *self.state.lock() = SessionState::Disconnected;
        debug!(id = self.id, peer = %self.peer, "udp peer disconnected");
        true
    }
}

impl AsyncIo for UdpPeerSession {
    async fn send_now(&self, packet: Packet, timeout: Option<Duration>) -> EngineResult<usize> {
        self.send(&packet, timeout).await
    }

    async fn receive_now(&self, _timeout: Option<Duration>) -> EngineResult<Packet> {
        // receives for server peers flow through the demux loop
        Err(EngineError::IllegalState(
            "receive on a server peer is driven by the server".to_string(),
        ))
    }

    async fn close_now(&self) -> bool {
        self.disconnect().await
    }
}
