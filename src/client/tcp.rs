use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::dispatch::{IoDispatcher, KillTicket, Priority, ReceiveTicket, SendTicket};
use crate::handler::SessionHandler;
use crate::network::{FrameCodec, Packet};
use crate::service::{EngineConfig, EngineError, EngineResult, Shutdown};
use crate::session::TcpSession;
use crate::sync::{CompletionEvent, WaitOutcome};
use crate::utils::maybe_timeout;

/// Blocking-style TCP client: every call completes the operation before
/// returning.
///
/// The client owns the connect/disconnect callbacks: `on_connect` fires
/// after each established connection, `on_disconnect` exactly once per
/// established connection, whether the teardown came from an explicit
/// `disconnect`, a fatal send/receive error, or the peer going away.
pub struct TcpClient<H> {
    config: EngineConfig,
    session: Arc<TcpSession>,
    handler: Arc<H>,
}

impl<H: SessionHandler<TcpSession>> TcpClient<H> {
    pub fn new(config: EngineConfig, handler: Arc<H>) -> TcpClient<H> {
        let codec = FrameCodec::new(config.network.max_packet_size);
        TcpClient {
            config,
            session: Arc::new(TcpSession::new(codec)),
            handler,
        }
    }

    pub fn session(&self) -> &Arc<TcpSession> {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Connects to the configured host and port. A second call on a live
    /// connection is a no-op that reports success without reconnecting.
    pub async fn connect(&self) -> EngineResult<()> {
        let established = self
            .session
            .connect(
                &self.config.network.host,
                self.config.network.port,
                self.config.wait_time(),
            )
            .await?;
        if established {
            self.handler.on_connect(&self.session).await;
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        if self.session.disconnect().await {
            self.handler.on_disconnect(&self.session).await;
        }
    }

    /// Sends one packet, returning the bytes put on the wire including the
    /// length prefix.
    pub async fn send(&self, packet: &Packet, timeout: Option<Duration>) -> EngineResult<usize> {
        self.finish(self.session.send(packet, timeout).await).await
    }

    /// Receives the next whole packet.
    pub async fn receive(&self, timeout: Option<Duration>) -> EngineResult<Packet> {
        self.finish(self.session.receive(timeout).await).await
    }

    /// Runs the disconnect sequence behind any fatal I/O error, so the
    /// caller observes both the error and the callback-visible teardown.
    async fn finish<T>(&self, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(e) = &result {
            if e.closes_session() && self.session.disconnect().await {
                self.handler.on_disconnect(&self.session).await;
            }
        }
        result
    }
}

/// TCP client with prioritized asynchronous operations.
///
/// Send, receive, and kill are queued on a per-session dispatcher and
/// executed in priority order, each completing through its ticket and
/// optional event. With the asynchronous-receive option enabled, a receive
/// pump runs for the life of the connection and feeds every inbound packet
/// to `on_receive`.
pub struct AsyncTcpClient<H> {
    config: EngineConfig,
    session: Arc<TcpSession>,
    handler: Arc<H>,
    shutdown: Shutdown,
    dispatcher: parking_lot::Mutex<Option<IoDispatcher>>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<H: SessionHandler<TcpSession>> AsyncTcpClient<H> {
    pub fn new(config: EngineConfig, handler: Arc<H>) -> AsyncTcpClient<H> {
        let codec = FrameCodec::new(config.network.max_packet_size);
        AsyncTcpClient {
            config,
            session: Arc::new(TcpSession::new(codec)),
            handler,
            shutdown: Shutdown::new(),
            dispatcher: parking_lot::Mutex::new(None),
            pump: parking_lot::Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Arc<TcpSession> {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Connects, attaches the dispatcher, and starts the receive pump when
    /// the asynchronous-receive option is on.
    pub async fn connect(&self) -> EngineResult<()> {
        let established = self
            .session
            .connect(
                &self.config.network.host,
                self.config.network.port,
                self.config.wait_time(),
            )
            .await?;
        if !established {
            return Ok(());
        }
        // a previous disconnect left the latch set; clear it before the
        // dispatcher and pump subscribe to it
        self.shutdown.rearm();
        let dispatcher = IoDispatcher::attach(
            self.session.clone(),
            self.handler.clone(),
            true,
            self.shutdown.clone(),
        );
        *self.dispatcher.lock() = Some(dispatcher);
        self.handler.on_connect(&self.session).await;
        if self.config.network.async_receive {
            let handle = tokio::spawn(receive_pump(
                self.session.clone(),
                self.handler.clone(),
                self.shutdown.clone(),
            ));
            *self.pump.lock() = Some(handle);
        }
        Ok(())
    }

    /// Disconnects: stops the pump and the dispatcher, cancels whatever is
    /// still queued, and fires `on_disconnect` once. Idempotent.
    pub async fn disconnect(&self) {
        self.shutdown.trigger();
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.detach();
        }
        if self.session.disconnect().await {
            self.handler.on_disconnect(&self.session).await;
        }
        let pump = self.pump.lock().take();
        if let Some(mut handle) = pump {
            if maybe_timeout(self.config.wait_time(), &mut handle)
                .await
                .is_err()
            {
                error!("receive pump did not stop within the wait budget, aborting");
                handle.abort();
            }
        }
    }

    /// Queues a prioritized send. The ticket resolves when the packet has
    /// been written, failed, or was cancelled by a kill.
    pub fn send_async(
        &self,
        packet: Packet,
        priority: Priority,
        timeout: Option<Duration>,
        event: Option<Arc<CompletionEvent>>,
    ) -> EngineResult<SendTicket> {
        self.with_dispatcher(|d| d.send(packet, priority, timeout, event))
    }

    /// Queues a prioritized receive; the packet also reaches `on_receive`.
    pub fn receive_async(
        &self,
        priority: Priority,
        timeout: Option<Duration>,
        event: Option<Arc<CompletionEvent>>,
    ) -> EngineResult<ReceiveTicket> {
        self.with_dispatcher(|d| d.receive(priority, timeout, event))
    }

    /// Queues a teardown at the given priority: it pre-empts every queued
    /// operation of lower priority, which complete as cancelled.
    pub fn kill(
        &self,
        priority: Priority,
        event: Option<Arc<CompletionEvent>>,
    ) -> EngineResult<KillTicket> {
        self.with_dispatcher(|d| d.kill(priority, event))
    }

    /// Waits until every queued operation has completed.
    pub async fn drain(&self, timeout: Option<Duration>) -> WaitOutcome {
        let dispatcher = self.dispatcher.lock().clone();
        match dispatcher {
            Some(d) => d.drain(timeout).await,
            None => WaitOutcome::Signaled,
        }
    }

    /// Number of queued operations whose tickets have not resolved yet.
    pub fn in_flight(&self) -> usize {
        match self.dispatcher.lock().as_ref() {
            Some(d) => d.in_flight(),
            None => 0,
        }
    }

    fn with_dispatcher<T>(
        &self,
        f: impl FnOnce(&IoDispatcher) -> EngineResult<T>,
    ) -> EngineResult<T> {
        match self.dispatcher.lock().as_ref() {
            Some(dispatcher) => f(dispatcher),
            None => Err(EngineError::NotConnected),
        }
    }
}

/// Continuous read loop feeding `on_receive`, selected against the client
/// shutdown signal. A fatal error runs the disconnect sequence; a timeout
/// cannot occur because the wait is unbounded.
async fn receive_pump<H: SessionHandler<TcpSession>>(
    session: Arc<TcpSession>,
    handler: Arc<H>,
    shutdown: Shutdown,
) {
    loop {
        let result = tokio::select! {
            result = session.receive(None) => result,
            _ = shutdown.wait() => {
                debug!(id = session.id(), "receive pump received shutdown signal");
                break;
            }
        };
        match result {
            Ok(packet) => handler.on_receive(&session, packet).await,
            Err(e) => {
                if e.closes_session() {
                    debug!(id = session.id(), "connection closed: {e}");
                    if session.disconnect().await {
                        handler.on_disconnect(&session).await;
                    }
                }
                break;
            }
        }
    }
    debug!(id = session.id(), "receive pump exited");
}
