use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info};

use crate::dispatch::{IoDispatcher, KillTicket, Priority, SendTicket};
use crate::handler::ServerHandler;
use crate::network::{FrameCodec, Packet};
use crate::pool::{PoolHandler, WorkerPool, WorkerPoolConfig};
use crate::service::{wait_time, EngineConfig, EngineError, EngineResult, Shutdown};
use crate::session::TcpSession;
use crate::sync::CompletionEvent;
use crate::utils::maybe_timeout;

use super::ServerState;

/// Roster entry for one accepted connection: the session plus its attached
/// dispatcher.
struct SessionEntry {
    session: Arc<TcpSession>,
    dispatcher: IoDispatcher,
}

/// The job queued for every accepted connection: run its request cycle.
struct ConnectionTask {
    session: Arc<TcpSession>,
}

/// Pool handler running one connection's request-processing cycle:
/// `on_accept`, then a receive loop feeding `on_receive`, then the
/// disconnect sequence when the peer goes away or the server stops.
struct ConnectionWorker<H> {
    handler: Arc<H>,
    sessions: Arc<DashMap<u64, SessionEntry>>,
    shutdown: Shutdown,
}

impl<H> Clone for ConnectionWorker<H> {
    fn clone(&self) -> Self {
        ConnectionWorker {
            handler: self.handler.clone(),
            sessions: self.sessions.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<H: ServerHandler<TcpSession>> PoolHandler<ConnectionTask> for ConnectionWorker<H> {
    async fn handle(&self, task: ConnectionTask) {
        let session = task.session;
        self.handler.on_accept(&session).await;
        loop {
            let result = tokio::select! {
                result = session.receive(None) => result,
                _ = self.shutdown.wait() => {
                    debug!(id = session.id(), "connection cycle received shutdown signal");
                    break;
                }
            };
            match result {
                Ok(packet) => self.handler.on_receive(&session, packet).await,
                Err(e) => {
                    if e.closes_session() {
                        debug!(id = session.id(), "connection closed: {e}");
                    }
                    break;
                }
            }
        }
        if session.disconnect().await {
            self.handler.on_disconnect(&session).await;
        }
        // detach stops the session's drive task; without it every dead
        // connection would leave one task parked on an open queue
        if let Some((_, entry)) = self.sessions.remove(&session.id()) {
            entry.dispatcher.detach();
        }
    }
}

/// TCP server: listens, accepts, and hands each new session to the worker
/// pool and its own I/O dispatcher.
///
/// Connections beyond `max_connections` are closed immediately:
/// intentional backpressure rather than a silent drop. Stopping unblocks
/// the accept wait through the shutdown latch, kills the remaining
/// sessions (each notified exactly once), and joins everything within the
/// configured wait budget.
pub struct TcpServer<H> {
    config: EngineConfig,
    handler: Arc<H>,
    state: parking_lot::Mutex<ServerState>,
    shutdown: Shutdown,
    sessions: Arc<DashMap<u64, SessionEntry>>,
    pool: Arc<WorkerPool<ConnectionTask, ConnectionWorker<H>>>,
    accept_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
}

impl<H: ServerHandler<TcpSession>> TcpServer<H> {
    pub fn new(config: EngineConfig, handler: Arc<H>) -> TcpServer<H> {
        let shutdown = Shutdown::new();
        let sessions: Arc<DashMap<u64, SessionEntry>> = Arc::new(DashMap::new());
        let worker = ConnectionWorker {
            handler: handler.clone(),
            sessions: sessions.clone(),
            shutdown: shutdown.clone(),
        };
        let pool_config = WorkerPoolConfig {
            max_workers: config.pool.max_workers,
            wait_time: wait_time(config.pool.wait_time_ms),
        };
        let pool = Arc::new(WorkerPool::new(worker, pool_config, shutdown.clone()));
        TcpServer {
            config,
            handler,
            state: parking_lot::Mutex::new(ServerState::Stopped),
            shutdown,
            sessions,
            pool,
            accept_handle: parking_lot::Mutex::new(None),
            local_addr: parking_lot::Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    /// Bound listen address, available while the server is listening. With a
    /// configured port of 0 this carries the kernel-assigned port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Binds the listener and spawns the accept loop.
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
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.lock() = ServerState::Stopped;
                return Err(EngineError::ConnectionError(format!(
                    "failed to bind {addr}: {e}"
                )));
            }
        };
        info!("tcp server listening on {addr}");
        *self.local_addr.lock() = listener.local_addr().ok();
        *self.state.lock() = ServerState::Listening;

        let handle = tokio::spawn(accept_loop(
            listener,
            self.config.clone(),
            self.handler.clone(),
            self.sessions.clone(),
            self.pool.clone(),
            self.shutdown.clone(),
        ));
        *self.accept_handle.lock() = Some(handle);
        Ok(())
    }

    /// Stops the server: unblocks the accept wait, disconnects every live
    /// session (one notification each), and joins the accept loop and pool
    /// within the wait budget. Idempotent.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if !matches!(*state, ServerState::Listening) {
                return;
            }
            *state = ServerState::Stopping;
        }
        info!("tcp server stopping");
        self.shutdown.trigger();

        let sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.session.clone())
            .collect();
        self.sessions.clear();
        for session in sessions {
            if session.disconnect().await {
                self.handler.on_disconnect(&session).await;
            }
        }

        let wait = self.config.wait_time();
        let accept_handle = self.accept_handle.lock().take();
        if let Some(mut handle) = accept_handle {
            if maybe_timeout(wait, &mut handle).await.is_err() {
                error!("accept loop did not stop within the wait budget, aborting");
                handle.abort();
            }
        }
        self.pool.shutdown().await;
        *self.local_addr.lock() = None;
        *self.state.lock() = ServerState::Stopped;
        info!("tcp server stopped");
    }

    /// Queues an asynchronous send on one session's dispatcher.
    pub fn send_async(
        &self,
        session_id: u64,
        packet: Packet,
        priority: Priority,
        event: Option<Arc<CompletionEvent>>,
    ) -> EngineResult<SendTicket> {
        let entry = self
            .sessions
            .get(&session_id)
            .ok_or(EngineError::NotConnected)?;
        entry.dispatcher.send(packet, priority, None, event)
    }

    /// Queues a kill at the requester's priority; it pre-empts queued
    /// lower-priority operations on that session.
    pub fn kill_session(
        &self,
        session_id: u64,
        priority: Priority,
        event: Option<Arc<CompletionEvent>>,
    ) -> EngineResult<KillTicket> {
        let entry = self
            .sessions
            .get(&session_id)
            .ok_or(EngineError::NotConnected)?;
        entry.dispatcher.kill(priority, event)
    }
}

async fn accept_loop<H: ServerHandler<TcpSession>>(
    listener: TcpListener,
    config: EngineConfig,
    handler: Arc<H>,
    sessions: Arc<DashMap<u64, SessionEntry>>,
    pool: Arc<WorkerPool<ConnectionTask, ConnectionWorker<H>>>,
    shutdown: Shutdown,
) {
    let codec = FrameCodec::new(config.network.max_packet_size);
    loop {
        let stream = tokio::select! {
            result = accept_with_backoff(&listener) => match result {
                Ok(stream) => stream,
                Err(e) => {
                    error!("accept loop giving up: {e}");
                    break;
                }
            },
            _ = shutdown.wait() => {
                debug!("accept loop received shutdown signal");
                break;
            }
        };

        let max = config.network.max_connections;
        if max != 0 && sessions.len() >= max {
            debug!("connection limit {max} reached, closing new connection");
            drop(stream);
            continue;
        }

        let session = Arc::new(TcpSession::from_stream(stream, codec.clone()));
        let dispatcher = IoDispatcher::attach(
            session.clone(),
            handler.clone(),
            false,
            shutdown.clone(),
        );
        sessions.insert(
            session.id(),
            SessionEntry {
                session: session.clone(),
                dispatcher,
            },
        );
        debug!(id = session.id(), peer = ?session.peer_addr(), "accepted connection");
        if let Err(e) = pool.submit(
            ConnectionTask {
                session: session.clone(),
            },
            config.pool.default_priority,
        ) {
            error!("failed to queue accepted connection: {e}");
            sessions.remove(&session.id());
            session.disconnect().await;
        }
    }
    debug!("accept loop exited");
}

async fn accept_with_backoff(listener: &TcpListener) -> EngineResult<TcpStream> {
    let mut backoff = 1;
    loop {
        match listener.accept().await {
            Ok((stream, _)) => return Ok(stream),
            Err(e) => {
                if backoff > 64 {
                    return Err(EngineError::SocketError(format!("accept failed: {e}")));
                }
            }
        }
        time::sleep(Duration::from_secs(backoff)).await;
        backoff *= 2;
    }
}
