//! Priority-ordered asynchronous I/O dispatch.
//!
//! Operations (send, receive, kill) are queued per session on a tiered FIFO
//! queue and executed by a dedicated drive task, preserving submission order
//! within a priority level. Completion is delivered exactly once per
//! operation through a ticket, an optional completion event, and the
//! session's callback object.

pub use dispatcher::IoDispatcher;
pub use operation::{KillTicket, ReceiveTicket, SendTicket};
pub use priority::{Priority, PriorityQueue};

pub(crate) use dispatcher::AsyncIo;

mod dispatcher;
mod operation;
mod priority;
