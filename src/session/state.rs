/// Lifecycle of one session.
///
/// `Connecting` and `Disconnecting` are transient: they are only entered
/// while the session-wide lock is held by the transition, so concurrent
/// connects and disconnects serialize and become idempotent no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        matches!(self, SessionState::Connected)
    }
}
