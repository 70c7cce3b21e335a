use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::handler::SessionHandler;
use crate::network::Packet;
use crate::service::{EngineResult, Shutdown};
use crate::sync::{CompletionEvent, WaitOutcome};

use super::operation::IoOp;
use super::{KillTicket, Priority, PriorityQueue, ReceiveTicket, SendTicket};

/// The socket-facing surface the dispatcher drives.
///
/// Sessions expose exactly what the drive loop needs and nothing else; the
/// public session contract stays separate from this internal seam.
pub(crate) trait AsyncIo: Send + Sync + 'static {
    fn send_now(
        &self,
        packet: Packet,
        timeout: Option<Duration>,
    ) -> impl Future<Output = EngineResult<usize>> + Send;

    fn receive_now(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = EngineResult<Packet>> + Send;

    /// Tears the session down; `true` for the one caller that performed the
    /// transition and therefore owes the disconnect notification.
    fn close_now(&self) -> impl Future<Output = bool> + Send;
}

/// Queues asynchronous operations for one session and executes them on a
/// dedicated drive task, highest priority first and FIFO within a tier.
///
/// Every accepted operation yields exactly one completion: its ticket is
/// resolved and its optional event set whether the operation succeeded,
/// failed, or was cancelled by a kill draining the queue behind it. A
/// high-priority kill therefore pre-empts queued lower-priority sends.
#[derive(Debug, Clone)]
pub struct IoDispatcher {
    queue: Arc<PriorityQueue<IoOp>>,
    in_flight: Arc<AtomicUsize>,
    drained: Arc<CompletionEvent>,
}

impl IoDispatcher {
    pub(crate) fn attach<S, H>(
        session: Arc<S>,
        handler: Arc<H>,
        deliver_receives: bool,
        shutdown: Shutdown,
    ) -> IoDispatcher
    where
        S: AsyncIo,
        H: SessionHandler<S>,
    {
        let queue = Arc::new(PriorityQueue::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(CompletionEvent::new());
        drained.set();

        let dispatcher = IoDispatcher {
            queue: queue.clone(),
            in_flight: in_flight.clone(),
            drained: drained.clone(),
        };
        tokio::spawn(async move {
            Self::drive(
                session,
                handler,
                deliver_receives,
                queue,
                in_flight,
                drained,
                shutdown,
            )
            .await;
        });
        dispatcher
    }

    async fn drive<S, H>(
        session: Arc<S>,
        handler: Arc<H>,
        deliver_receives: bool,
        queue: Arc<PriorityQueue<IoOp>>,
        in_flight: Arc<AtomicUsize>,
        drained: Arc<CompletionEvent>,
        shutdown: Shutdown,
    ) where
        S: AsyncIo,
        H: SessionHandler<S>,
    {
        loop {
            let op = tokio::select! {
                op = queue.pop() => op,
                _ = shutdown.wait() => {
                    debug!("dispatcher drive loop received shutdown signal");
                    break;
                }
            };
            let Some(op) = op else { break };
            let killed = Self::run_op(&session, &handler, deliver_receives, op).await;
            if in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                drained.set();
            }
            if killed {
                break;
            }
        }
        // whatever is still queued gets its cancellation completion
        queue.close();
        while let Some(op) = queue.pop().await {
            op.cancel();
            if in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                drained.set();
            }
        }
        debug!("dispatcher drive loop exited");
    }

    /// Executes one operation and delivers its completion. Returns `true`
    /// when the operation was a kill and the drive loop must wind down.
    async fn run_op<S, H>(
        session: &Arc<S>,
        handler: &Arc<H>,
        deliver_receives: bool,
        op: IoOp,
    ) -> bool
    where
        S: AsyncIo,
        H: SessionHandler<S>,
    {
        match op {
            IoOp::Send {
                packet,
                timeout,
                event,
                result,
            } => {
                let res = session.send_now(packet, timeout).await;
                let fatal = matches!(&res, Err(e) if e.closes_session());
                let _ = result.send(res);
                if let Some(event) = event {
                    event.set();
                }
                if fatal && session.close_now().await {
                    handler.on_disconnect(session).await;
                }
                false
            }
            IoOp::Receive {
                timeout,
                event,
                result,
            } => {
                let res = session.receive_now(timeout).await;
                let fatal = matches!(&res, Err(e) if e.closes_session());
                if deliver_receives {
                    if let Ok(packet) = &res {
                        handler.on_receive(session, packet.clone()).await;
                    }
                }
                let _ = result.send(res);
                if let Some(event) = event {
                    event.set();
                }
                if fatal && session.close_now().await {
                    handler.on_disconnect(session).await;
                }
                false
            }
            IoOp::Kill { event, result } => {
                if session.close_now().await {
                    handler.on_disconnect(session).await;
                }
                let _ = result.send(Ok(()));
                if let Some(event) = event {
                    event.set();
                }
                true
            }
        }
    }

    pub fn send(
        &self,
        packet: Packet,
        priority: Priority,
        timeout: Option<Duration>,
        event: Option<Arc<CompletionEvent>>,
    ) -> EngineResult<SendTicket> {
        let (tx, rx) = oneshot::channel();
        self.submit(
            IoOp::Send {
                packet,
                timeout,
                event,
                result: tx,
            },
            priority,
        )?;
        Ok(SendTicket { rx })
    }

    pub fn receive(
        &self,
        priority: Priority,
        timeout: Option<Duration>,
        event: Option<Arc<CompletionEvent>>,
    ) -> EngineResult<ReceiveTicket> {
        let (tx, rx) = oneshot::channel();
        self.submit(
            IoOp::Receive {
                timeout,
                event,
                result: tx,
            },
            priority,
        )?;
        Ok(ReceiveTicket { rx })
    }

    /// Queues a teardown at the requester's priority: it runs behind
    /// higher-priority work but ahead of anything below it, cancelling
    /// whatever is still queued once it executes.
    pub fn kill(
        &self,
        priority: Priority,
        event: Option<Arc<CompletionEvent>>,
    ) -> EngineResult<KillTicket> {
        let (tx, rx) = oneshot::channel();
        self.submit(IoOp::Kill { event, result: tx }, priority)?;
        Ok(KillTicket { rx })
    }

    fn submit(&self, op: IoOp, priority: Priority) -> EngineResult<()> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.drained.reset();
        if let Err(e) = self.queue.push(op, priority) {
            if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.drained.set();
            }
            return Err(e);
        }
        Ok(())
    }

    /// Operations submitted but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Waits until every submitted operation has delivered its completion, so
    /// teardown can let in-flight work settle before releasing the session.
    pub async fn drain(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.drained.wait(timeout).await
    }

    /// Stops accepting new operations; already-queued work still completes.
    pub fn detach(&self) {
        self.queue.close();
    }
}
