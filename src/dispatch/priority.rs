use async_channel::{Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};

use crate::service::{EngineError, EngineResult};

/// Priority of one queued operation or job. Higher tiers are always drained
/// first; within a tier, order is FIFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

/// A tiered MPMC queue: one FIFO channel per priority level.
///
/// `push` never blocks. `pop` always prefers the highest non-empty tier and
/// keeps draining after `close` until the queue is empty, so shutdown never
/// loses items that consumers still want to account for.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    tiers: [(Sender<T>, Receiver<T>); 3],
}

impl<T: Send> PriorityQueue<T> {
    pub fn new() -> PriorityQueue<T> {
        PriorityQueue {
            tiers: [
                async_channel::unbounded(),
                async_channel::unbounded(),
                async_channel::unbounded(),
            ],
        }
    }

    pub fn push(&self, item: T, priority: Priority) -> EngineResult<()> {
        self.tiers[priority.index()]
            .0
            .try_send(item)
            .map_err(|_| EngineError::ChannelSendError("priority queue is closed".to_string()))
    }

    pub fn len(&self) -> usize {
        self.tiers.iter().map(|(sender, _)| sender.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn close(&self) {
        for (sender, _) in &self.tiers {
            sender.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tiers.iter().all(|(sender, _)| sender.is_closed())
    }

    /// Next item in priority order, or `None` once the queue is closed and
    /// drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            // strict tier preference over whatever is already queued
            for (_, receiver) in &self.tiers {
                match receiver.try_recv() {
                    Ok(item) => return Some(item),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => {}
                }
            }
            if self
                .tiers
                .iter()
                .all(|(_, receiver)| receiver.is_closed() && receiver.is_empty())
            {
                return None;
            }
            let (high, normal, low) = (
                &self.tiers[0].1,
                &self.tiers[1].1,
                &self.tiers[2].1,
            );
            tokio::select! {
                biased;
                Ok(item) = high.recv() => return Some(item),
                Ok(item) = normal.recv() => return Some(item),
                Ok(item) = low.recv() => return Some(item),
                else => {}
            }
        }
    }
}

impl<T: Send> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
