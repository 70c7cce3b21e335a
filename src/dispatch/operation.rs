use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::network::Packet;
use crate::service::{EngineError, EngineResult};
use crate::sync::CompletionEvent;

/// One outstanding operation queued with the dispatcher. Created when an
/// asynchronous send/receive/kill is issued; consumed when its completion is
/// delivered exactly once, as success, failure, or cancellation.
#[derive(Debug)]
pub(crate) enum IoOp {
    Send {
        packet: Packet,
        timeout: Option<Duration>,
        event: Option<Arc<CompletionEvent>>,
        result: oneshot::Sender<EngineResult<usize>>,
    },
    Receive {
        timeout: Option<Duration>,
        event: Option<Arc<CompletionEvent>>,
        result: oneshot::Sender<EngineResult<Packet>>,
    },
    Kill {
        event: Option<Arc<CompletionEvent>>,
        result: oneshot::Sender<EngineResult<()>>,
    },
}

impl IoOp {
    /// Cancelled operations still deliver their one completion.
    pub(crate) fn cancel(self) {
        match self {
            IoOp::Send { event, result, .. } => {
                let _ = result.send(Err(EngineError::ConnectionClosing));
                signal(event);
            }
            IoOp::Receive { event, result, .. } => {
                let _ = result.send(Err(EngineError::ConnectionClosing));
                signal(event);
            }
            IoOp::Kill { event, result } => {
                let _ = result.send(Ok(()));
                signal(event);
            }
        }
    }
}

fn signal(event: Option<Arc<CompletionEvent>>) {
    if let Some(event) = event {
        event.set();
    }
}

/// Future-style handle for an asynchronous send; resolves to the bytes put
/// on the wire.
#[derive(Debug)]
pub struct SendTicket {
    pub(crate) rx: oneshot::Receiver<EngineResult<usize>>,
}

impl SendTicket {
    pub async fn wait(self) -> EngineResult<usize> {
        self.rx.await.unwrap_or(Err(EngineError::ConnectionClosing))
    }
}

/// Future-style handle for an asynchronous receive; resolves to the packet.
#[derive(Debug)]
pub struct ReceiveTicket {
    pub(crate) rx: oneshot::Receiver<EngineResult<Packet>>,
}

impl ReceiveTicket {
    pub async fn wait(self) -> EngineResult<Packet> {
        self.rx.await.unwrap_or(Err(EngineError::ConnectionClosing))
    }
}

/// Future-style handle for a queued kill; resolves when the teardown has
/// run.
#[derive(Debug)]
pub struct KillTicket {
    pub(crate) rx: oneshot::Receiver<EngineResult<()>>,
}

impl KillTicket {
    pub async fn wait(self) -> EngineResult<()> {
        self.rx.await.unwrap_or(Err(EngineError::ConnectionClosing))
    }
}
