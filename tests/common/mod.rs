#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use framewire::{
    EngineConfig, Packet, ServerHandler, SessionHandler, TcpSession, UdpPeerSession,
};

/// Engine config pointing at loopback with an ephemeral port and an
/// unbounded worker pool, so tests never collide on addresses or starve on
/// worker caps.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.network.host = "127.0.0.1".to_string();
    config.network.port = 0;
    config.pool.max_workers = 0;
    config.pool.wait_time_ms = 2000;
    config
}

/// Shared observation point for callback activity.
#[derive(Default)]
pub struct Recorder {
    pub accepts: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub received: Mutex<Vec<Vec<u8>>>,
}

impl Recorder {
    pub fn received_payloads(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }
}

/// Handler that records every callback without touching the session. Works
/// for any session type, client or server side.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub recorder: Arc<Recorder>,
}

impl<S: Send + Sync + 'static> SessionHandler<S> for RecordingHandler {
    async fn on_connect(&self, _session: &Arc<S>) {
        self.recorder.connects.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_disconnect(&self, _session: &Arc<S>) {
        self.recorder.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_receive(&self, _session: &Arc<S>, packet: Packet) {
        self.recorder
            .received
            .lock()
            .unwrap()
            .push(packet.payload().to_vec());
    }
}

impl<S: Send + Sync + 'static> ServerHandler<S> for RecordingHandler {
    async fn on_accept(&self, _session: &Arc<S>) {
        self.recorder.accepts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Server handler echoing every TCP packet straight back.
#[derive(Clone, Default)]
pub struct TcpEchoHandler {
    pub recorder: Arc<Recorder>,
}

impl SessionHandler<TcpSession> for TcpEchoHandler {
    async fn on_disconnect(&self, _session: &Arc<TcpSession>) {
        self.recorder.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_receive(&self, session: &Arc<TcpSession>, packet: Packet) {
        self.recorder
            .received
            .lock()
            .unwrap()
            .push(packet.payload().to_vec());
        let _ = session.send(&packet, None).await;
    }
}

impl ServerHandler<TcpSession> for TcpEchoHandler {
    async fn on_accept(&self, _session: &Arc<TcpSession>) {
        self.recorder.accepts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Server handler echoing every UDP datagram back to its peer.
#[derive(Clone, Default)]
pub struct UdpEchoHandler {
    pub recorder: Arc<Recorder>,
}

impl SessionHandler<UdpPeerSession> for UdpEchoHandler {
    async fn on_disconnect(&self, _session: &Arc<UdpPeerSession>) {
        self.recorder.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_receive(&self, session: &Arc<UdpPeerSession>, packet: Packet) {
        self.recorder
            .received
            .lock()
            .unwrap()
            .push(packet.payload().to_vec());
        let _ = session.send(&packet, None).await;
    }
}

impl ServerHandler<UdpPeerSession> for UdpEchoHandler {
    async fn on_accept(&self, _session: &Arc<UdpPeerSession>) {
        self.recorder.accepts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Polls `condition` until it holds or the deadline passes.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
