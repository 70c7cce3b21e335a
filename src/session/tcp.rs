use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::Mutex;
use tracing::debug;

use crate::dispatch::AsyncIo;
use crate::network::{write_packet, FrameCodec, FramedReader, Packet};
use crate::service::{EngineError, EngineResult};
use crate::sync::CompletionEvent;
use crate::utils::maybe_timeout;

use super::SessionState;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

const READ_BUFFER_SIZE: usize = 4 * 1024;

/// One TCP connection: the socket handles, the lifecycle state machine, and
/// the framed send/receive operations.
///
/// The socket handles exist exactly while the state is `Connected` (or the
/// transient `Disconnecting`); any operation outside `Connected` fails with
/// `NotConnected` without touching a handle. The `general_lock` serializes
/// connect/disconnect so concurrent callers are idempotent, and exactly one
/// caller per established connection observes `disconnect() == true`; that
/// caller owes the disconnect notification.
///
/// Fatal send/receive errors do not fire callbacks from inside the session;
/// the owning facade or server task runs the disconnect sequence. That keeps
/// the session free of handler types and the notification single-sourced.
#[derive(Debug)]
pub struct TcpSession {
    id: u64,
    // serializes connect/disconnect; never held across send/receive
    general_lock: Mutex<()>,
    state: parking_lot::Mutex<SessionState>,
    reader: Mutex<Option<FramedReader<OwnedReadHalf>>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    peer: parking_lot::Mutex<Option<SocketAddr>>,
    // wakes operations blocked on a dead-or-dying connection
    closing: CompletionEvent,
    codec: FrameCodec,
}

impl TcpSession {
    /// A disconnected session ready for [`connect`](Self::connect).
    pub fn new(codec: FrameCodec) -> TcpSession {
        TcpSession {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            general_lock: Mutex::new(()),
            state: parking_lot::Mutex::new(SessionState::Disconnected),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            peer: parking_lot::Mutex::new(None),
            closing: CompletionEvent::new(),
            codec,
        }
    }

    /// Wraps an already-established stream, e.g. an accepted server
    /// connection.
    pub fn from_stream(stream: TcpStream, codec: FrameCodec) -> TcpSession {
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        TcpSession {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            general_lock: Mutex::new(()),
            state: parking_lot::Mutex::new(SessionState::Connected),
            reader: Mutex::new(Some(FramedReader::new(read_half, READ_BUFFER_SIZE))),
            writer: Mutex::new(Some(write_half)),
            peer: parking_lot::Mutex::new(peer),
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

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }

    /// Connects to `host:port`, trying each resolved candidate address in
    /// order until one succeeds.
    ///
    /// Returns `Ok(false)` when the session was already connected (a no-op,
    /// no new socket is created) and `Ok(true)` when this call established
    /// the connection.
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
            Ok(Ok(stream)) => {
                let peer = stream.peer_addr().ok();
                let (read_half, write_half) = stream.into_split();
                *self.reader.lock().await = Some(FramedReader::new(read_half, READ_BUFFER_SIZE));
                *self.writer.lock().await = Some(write_half);
                *self.peer.lock() = peer;
                self.closing.reset();
                *self.state.lock() = SessionState::Connected;
                debug!(id = self.id, ?peer, "session connected");
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

    async fn connect_any(host: &str, port: u16) -> EngineResult<TcpStream> {
        let candidates = lookup_host((host, port)).await.map_err(|e| {
            EngineError::ConnectionError(format!("failed to resolve {host}:{port}: {e}"))
        })?;
        let mut last_error = None;
        for addr in candidates {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(EngineError::ConnectionError(match last_error {
            Some(e) => format!("unable to connect to {host}:{port}: {e}"),
            None => format!("no addresses resolved for {host}:{port}"),
        }))
    }

    /// Tears the connection down: half-closes the send side, then drops both
    /// handles.
    ///
    /// Idempotent under concurrency; `true` is returned to exactly one
    /// caller per established connection. Pending sends and receives observe
    /// the teardown immediately through the closing signal rather than by
    /// having their syscall interrupted.
    pub async fn disconnect(&self) -> bool {
        let _guard = self.general_lock.lock().await;
        if !self.is_connected() {
            return false;
        }
        *self.state.lock() = SessionState::Disconnecting;
        self.closing.set();
        if let Some(mut writer) = self.writer.lock().await.take() {
            // best effort: the handle is dropped either way
            if let Err(e) = writer.shutdown().await {
                debug!(id = self.id, "send-side shutdown failed: {e}");
            }
        }
        self.reader.lock().await.take();
        *self.peer.lock() = None;
        *self.state.lock() = SessionState::Disconnected;
        debug!(id = self.id, "session disconnected");
        true
    }

    /// Writes the 4-byte length prefix and the payload, returning the bytes
    /// put on the wire. The timeout bounds the wait for writability; once
    /// the socket is writable the frame goes out whole, so a `TimedOut`,
    /// which never tears the session down, cannot leave a torn frame
    /// behind.
    pub async fn send(&self, packet: &Packet, timeout: Option<Duration>) -> EngineResult<usize> {
        if !self.is_connected() {
            return Err(EngineError::NotConnected);
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(EngineError::NotConnected)?;
        tokio::select! {
            ready = maybe_timeout(timeout, writer.writable()) => match ready {
                Ok(Ok(())) => write_packet(writer, &self.codec, packet).await,
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(EngineError::TimedOut),
            },
            _ = self.closing.wait(None) => Err(EngineError::ConnectionClosing),
        }
    }

    /// Blocks until one whole frame is available: the 4-byte prefix first,
    /// then exactly that many payload bytes.
    ///
    /// `TimedOut` leaves the session connected and loses nothing: partial
    /// bytes stay buffered for the next call. A zero-byte read in either
    /// phase is `ConnectionClosing`; framing violations are
    /// `ProtocolFraming`. Both invalidate the connection.
    pub async fn receive(&self, timeout: Option<Duration>) -> EngineResult<Packet> {
        if !self.is_connected() {
            return Err(EngineError::NotConnected);
        }
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(EngineError::NotConnected)?;
        tokio::select! {
            res = maybe_timeout(timeout, reader.read_packet(&self.codec)) => match res {
                Ok(packet_result) => packet_result,
                Err(_) => Err(EngineError::TimedOut),
            },
            _ = self.closing.wait(None) => Err(EngineError::ConnectionClosing),
        }
    }
}

impl AsyncIo for TcpSession {
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
