use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::dispatch::{IoDispatcher, KillTicket, Priority, ReceiveTicket, SendTicket};
use crate::handler::SessionHandler;
use crate::network::{FrameCodec, Packet};
use crate::service::{EngineConfig, EngineError, EngineResult, Shutdown};
use crate::session::UdpSession;
use crate::sync::{CompletionEvent, WaitOutcome};
use crate::utils::maybe_timeout;

/// UDP client with prioritized asynchronous operations, mirroring
/// [`AsyncTcpClient`](crate::client::AsyncTcpClient) over a connected
/// datagram socket.
///
/// "Connected" here is local bookkeeping plus the kernel's address filter;
/// no traffic is exchanged to establish it. Each datagram carries exactly
/// one length-prefixed frame, and a malformed datagram is fatal to the
/// session the same way a framing violation is on a stream.
pub struct AsyncUdpClient<H> {
    config: EngineConfig,
    session: Arc<UdpSession>,
    handler: Arc<H>,
    shutdown: Shutdown,
    dispatcher: parking_lot::Mutex<Option<IoDispatcher>>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<H: SessionHandler<UdpSession>> AsyncUdpClient<H> {
    pub fn new(config: EngineConfig, handler: Arc<H>) -> AsyncUdpClient<H> {
        let codec = FrameCodec::new(config.network.max_packet_size);
        AsyncUdpClient {
            config,
            session: Arc::new(UdpSession::new(codec)),
            handler,
            shutdown: Shutdown::new(),
            dispatcher: parking_lot::Mutex::new(None),
            pump: parking_lot::Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Arc<UdpSession> {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

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

    pub fn send_async(
        &self,
        packet: Packet,
        priority: Priority,
        timeout: Option<Duration>,
        event: Option<Arc<CompletionEvent>>,
    ) -> EngineResult<SendTicket> {
        self.with_dispatcher(|d| d.send(packet, priority, timeout, event))
    }

    pub fn receive_async(
        &self,
        priority: Priority,
        timeout: Option<Duration>,
        event: Option<Arc<CompletionEvent>>,
    ) -> EngineResult<ReceiveTicket> {
        self.with_dispatcher(|d| d.receive(priority, timeout, event))
    }

    pub fn kill(
        &self,
        priority: Priority,
        event: Option<Arc<CompletionEvent>>,
    ) -> EngineResult<KillTicket> {
        self.with_dispatcher(|d| d.kill(priority, event))
    }

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

async fn receive_pump<H: SessionHandler<UdpSession>>(
    session: Arc<UdpSession>,
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
                    debug!(id = session.id(), "session closed: {e}");
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
