use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::dispatch::{IoDispatcher, KillTicket, Priority, SendTicket};
use crate::handler::ServerHandler;
use crate::network::{FrameCodec, Packet};
use crate::pool::{PoolHandler, WorkerPool, WorkerPoolConfig};
use crate::service::{wait_time, EngineConfig, EngineError, EngineResult, Shutdown};
use crate::session::UdpPeerSession;
use crate::sync::CompletionEvent;
use crate::utils::maybe_timeout;

use super::ServerState;

struct PeerEntry {
    session: Arc<UdpPeerSession>,
    dispatcher: IoDispatcher,
}

/// One well-formed datagram, routed to its peer session. `first` marks the
/// datagram that created the peer, so the accept and connect callbacks run
/// before its payload is delivered.
struct PacketTask {
    session: Arc<UdpPeerSession>,
    packet: Packet,
    first: bool,
}

struct PacketWorker<H> {
    handler: Arc<H>,
}

impl<H> Clone for PacketWorker<H> {
    fn clone(&self) -> Self {
        PacketWorker {
            handler: self.handler.clone(),
        }
    }
}

impl<H: ServerHandler<UdpPeerSession>> PoolHandler<PacketTask> for PacketWorker<H> {
    async fn handle(&self, task: PacketTask) {
        if task.first {
            self.handler.on_accept(&task.session).await;
        }
        if !task.session.is_connected() {
            return;
        }
        self.handler.on_receive(&task.session, task.packet).await;
    }
}

/// UDP server: one bound socket, with traffic demultiplexed into per-peer
/// sessions keyed by source address.
///
/// A peer session is created lazily on the first well-formed datagram from an
/// address and lives until it is killed or the server stops; UDP has no
/// transport-level close, so peer teardown is always explicit. A malformed
/// datagram invalidates its peer: the peer is removed and torn down with one
/// disconnect notification, but the socket and every other peer keep going.
pub struct UdpServer<H> {
    config: EngineConfig,
    handler: Arc<H>,
    state: parking_lot::Mutex<ServerState>,
    shutdown: Shutdown,
    peers: Arc<DashMap<SocketAddr, PeerEntry>>,
    pool: Arc<WorkerPool<PacketTask, PacketWorker<H>>>,
    demux_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
}

impl<H: ServerHandler<UdpPeerSession>> UdpServer<H> {
    pub fn new(config: EngineConfig, handler: Arc<H>) -> UdpServer<H> {
        let shutdown = Shutdown::new();
        let worker = PacketWorker {
            handler: handler.clone(),
        };
        let pool_config = WorkerPoolConfig {
            max_workers: config.pool.max_workers,
            wait_time: wait_time(config.pool.wait_time_ms),
        };
        let pool = Arc::new(WorkerPool::new(worker, pool_config, shutdown.clone()));
        UdpServer {
            config,
            handler,
            state: parking_lot::Mutex::new(ServerState::Stopped),
            shutdown,
            peers: Arc::new(DashMap::new()),
            pool,
            demux_handle: parking_lot::Mutex::new(None),
            local_addr: parking_lot::Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Binds the socket and spawns the demultiplex loop.
    pub async fn start(&self) -> EngineResult<()> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, ServerState::Stopped) {
                return Err(EngineError::IllegalState(
                    "server is already started".to_string(),
                ));
            }
            *state = ServerState::Starting;
        }
        // a previous stop() left the latch set; clear it before anything
        // subscribes to it
        self.shutdown.rearm();
        let addr = format!(
            "{}:{}",
            self.config.network.host, self.config.network.port
        );
        let socket = match UdpSocket::bind(&addr).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                *self.state.lock() = ServerState::Stopped;
                return Err(EngineError::ConnectionError(format!(
                    "failed to bind {addr}: {e}"
                )));
            }
        };
        info!("udp server listening on {addr}");
        *self.local_addr.lock() = socket.local_addr().ok();
        *self.state.lock() = ServerState::Listening;

        let handle = tokio::spawn(demux_loop(
            socket,
            self.config.clone(),
            self.handler.clone(),
            self.peers.clone(),
            self.pool.clone(),
            self.shutdown.clone(),
        ));
        *self.demux_handle.lock() = Some(handle);
        Ok(())
    }

    /// Stops the server: unblocks the demultiplex wait, tears every peer
    /// down with one notification each, and joins everything within the wait
    /// budget. Idempotent.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if !matches!(*state, ServerState::Listening) {
                return;
            }
            *state = ServerState::Stopping;
        }
        info!("udp server stopping");
        self.shutdown.trigger();

        let peers: Vec<_> = self
            .peers
            .iter()
            .map(|entry| entry.session.clone())
            .collect();
        self.peers.clear();
        for session in peers {
            if session.disconnect().await {
                self.handler.on_disconnect(&session).await;
            }
        }

        let wait = self.config.wait_time();
        let demux_handle = self.demux_handle.lock().take();
        if let Some(mut handle) = demux_handle {
            if maybe_timeout(wait, &mut handle).await.is_err() {
                error!("demux loop did not stop within the wait budget, aborting");
                handle.abort();
            }
        }
        self.pool.shutdown().await;
        *self.local_addr.lock() = None;
        *self.state.lock() = ServerState::Stopped;
        info!("udp server stopped");
    }

    /// Queues an asynchronous send on one peer's dispatcher.
    pub fn send_async(
        &self,
        peer: SocketAddr,
        packet: Packet,
        priority: Priority,
        event: Option<Arc<CompletionEvent>>,
    ) -> EngineResult<SendTicket> {
        let entry = self.peers.get(&peer).ok_or(EngineError::NotConnected)?;
        entry.dispatcher.send(packet, priority, None, event)
    }

    /// Queues a peer teardown at the requester's priority.
    pub fn kill_peer(
        &self,
        peer: SocketAddr,
        priority: Priority,
        event: Option<Arc<CompletionEvent>>,
    ) -> EngineResult<KillTicket> {
        let (_, entry) = self
            .peers
            .remove(&peer)
            .ok_or(EngineError::NotConnected)?;
        entry.dispatcher.kill(priority, event)
    }
}

async fn demux_loop<H: ServerHandler<UdpPeerSession>>(
    socket: Arc<UdpSocket>,
    config: EngineConfig,
    handler: Arc<H>,
    peers: Arc<DashMap<SocketAddr, PeerEntry>>,
    pool: Arc<WorkerPool<PacketTask, PacketWorker<H>>>,
    shutdown: Shutdown,
) {
    let codec = FrameCodec::new(config.network.max_packet_size);
    let mut buf = vec![0u8; codec.max_packet_size() + crate::network::LENGTH_PREFIX_SIZE];
    loop {
        let (len, from) = tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    // transient per-datagram errors, keep serving
                    debug!("recv_from failed: {e}");
                    continue;
                }
            },
            _ = shutdown.wait() => {
                debug!("demux loop received shutdown signal");
                break;
            }
        };

        let packet = match codec.parse_datagram(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(peer = %from, "malformed datagram: {e}");
                // the peer is invalidated, the socket keeps serving others
                if let Some((_, entry)) = peers.remove(&from) {
                    if let Err(e) = entry.dispatcher.kill(Priority::High, None) {
                        debug!(peer = %from, "kill after malformed datagram failed: {e}");
                    }
                }
                continue;
            }
        };

        let mut first = false;
        let session = match peers.get(&from) {
            Some(entry) => entry.session.clone(),
            None => {
                let max = config.network.max_connections;
                if max != 0 && peers.len() >= max {
                    debug!(peer = %from, "peer limit {max} reached, dropping datagram");
                    continue;
                }
                first = true;
                let session =
                    Arc::new(UdpPeerSession::new(socket.clone(), from, codec.clone()));
                let dispatcher = IoDispatcher::attach(
                    session.clone(),
                    handler.clone(),
                    false,
                    shutdown.clone(),
                );
                peers.insert(
                    from,
                    PeerEntry {
                        session: session.clone(),
                        dispatcher,
                    },
                );
                session
            }
        };

        if let Err(e) = pool.submit(
            PacketTask {
                session,
                packet,
                first,
            },
            config.pool.default_priority,
        ) {
            error!("failed to queue datagram: {e}");
        }
    }
    debug!("demux loop exited");
}
