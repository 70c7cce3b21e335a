use std::future::Future;
use std::sync::Arc;

use crate::network::Packet;

/// Callback object consumed by the engine for one session type.
///
/// Callbacks run on worker or dispatcher tasks, never on an accept loop,
/// and never re-entrantly for the same session. `on_disconnect` fires
/// exactly once per established connection, however many components race to
/// tear it down.
pub trait SessionHandler<S>: Send + Sync + 'static {
    fn on_connect(&self, _session: &Arc<S>) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn on_disconnect(&self, _session: &Arc<S>) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn on_receive(&self, session: &Arc<S>, packet: Packet) -> impl Future<Output = ()> + Send;
}

/// Server-side additions to [`SessionHandler`]. `on_accept` runs as the
/// first job of a freshly registered session, from a pool worker.
pub trait ServerHandler<S>: SessionHandler<S> {
    fn on_accept(&self, _session: &Arc<S>) -> impl Future<Output = ()> + Send {
        async {}
    }
}
