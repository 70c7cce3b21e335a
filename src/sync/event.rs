use std::time::Duration;

use tokio::sync::watch;

use crate::utils::maybe_timeout;

/// Outcome of a bounded wait on a [`CompletionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// A resettable binary signal: one setter, any number of waiters.
///
/// Doubles as the I/O completion notifier handed to asynchronous operations
/// and as a drain marker for dispatcher teardown. `wait(None)` blocks until
/// the event is set; a `Some` timeout bounds the wait.
#[derive(Debug)]
pub struct CompletionEvent {
    state: watch::Sender<bool>,
}

impl CompletionEvent {
    pub fn new() -> CompletionEvent {
        let (state, _) = watch::channel(false);
        CompletionEvent { state }
    }

    pub fn set(&self) {
        self.state.send_replace(true);
    }

    pub fn reset(&self) {
        self.state.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    pub async fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        let mut receiver = self.state.subscribe();
        let outcome = match maybe_timeout(timeout, receiver.wait_for(|set| *set)).await {
            Ok(_) => WaitOutcome::Signaled,
            Err(_) => WaitOutcome::TimedOut,
        };
        outcome
    }
}

impl Default for CompletionEvent {
    fn default() -> Self {
        Self::new()
    }
}
