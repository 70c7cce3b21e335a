//! Session lifecycle behavior over real loopback sockets.

use std::time::Duration;

use framewire::{
    EngineError, FrameCodec, Packet, SessionState, TcpSession, UdpSession, LENGTH_PREFIX_SIZE,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::Instant;

fn session() -> TcpSession {
    TcpSession::new(FrameCodec::new(1024))
}

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

#[tokio::test]
async fn connect_on_a_live_session_is_a_noop() {
    let (listener, port) = listener().await;
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        std::future::pending::<()>().await;
    });

    let session = session();
    assert!(session.connect("127.0.0.1", port, None).await.unwrap());
    assert!(session.is_connected());

    // second call reports success without reconnecting
    assert!(!session.connect("127.0.0.1", port, None).await.unwrap());
    assert!(session.is_connected());
}

#[tokio::test]
async fn connect_to_a_closed_port_fails_and_stays_disconnected() {
    let (listener, port) = listener().await;
    drop(listener);

    let session = session();
    let err = session
        .connect("127.0.0.1", port, Some(Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ConnectionError(_)));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn concurrent_disconnects_have_exactly_one_winner() {
    let (listener, port) = listener().await;
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        std::future::pending::<()>().await;
    });

    let session = std::sync::Arc::new(session());
    session.connect("127.0.0.1", port, None).await.unwrap();

    let a = tokio::spawn({
        let session = session.clone();
        async move { session.disconnect().await }
    });
    let b = tokio::spawn({
        let session = session.clone();
        async move { session.disconnect().await }
    });
    let (won_a, won_b) = (a.await.unwrap(), b.await.unwrap());
    assert_ne!(won_a, won_b, "exactly one disconnect call must win");
    assert_eq!(session.state(), SessionState::Disconnected);

    // and a later call is a plain no-op
    assert!(!session.disconnect().await);
}

#[tokio::test]
async fn receive_timeout_leaves_the_session_connected() {
    let (listener, port) = listener().await;
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        std::future::pending::<()>().await;
    });

    let session = session();
    session.connect("127.0.0.1", port, None).await.unwrap();

    let start = Instant::now();
    let err = session
        .receive(Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TimedOut));
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(session.is_connected(), "a timeout must not tear down the session");
}

#[tokio::test]
async fn truncated_frame_then_eof_closes_the_connection() {
    let (listener, port) = listener().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // prefix declares 100 bytes, only 40 arrive before the close
        stream.write_all(&100u32.to_ne_bytes()).await.unwrap();
        stream.write_all(&[7u8; 40]).await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let session = session();
    session.connect("127.0.0.1", port, None).await.unwrap();

    let err = session.receive(None).await.unwrap_err();
    assert!(matches!(err, EngineError::ConnectionClosing));
    assert!(err.closes_session());

    // the caller that observes the fatal error owns the teardown
    assert!(session.disconnect().await);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn operations_on_a_disconnected_session_fail_fast() {
    let session = session();
    let err = session
        .send(&Packet::copy_from_slice(b"nope"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotConnected));

    let err = session.receive(Some(Duration::from_millis(10))).await.unwrap_err();
    assert!(matches!(err, EngineError::NotConnected));
}

#[tokio::test]
async fn disconnect_unblocks_a_pending_receive() {
    let (listener, port) = listener().await;
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        std::future::pending::<()>().await;
    });

    let session = std::sync::Arc::new(session());
    session.connect("127.0.0.1", port, None).await.unwrap();

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.receive(None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(session.disconnect().await);
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::ConnectionClosing));
}

#[tokio::test]
async fn udp_session_round_trips_consecutive_datagrams() {
    let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = remote.local_addr().unwrap().port();

    let session = UdpSession::new(FrameCodec::new(1024));
    assert!(session.connect("127.0.0.1", port, None).await.unwrap());

    // the remote learns the session's address from its first datagram
    session
        .send(&Packet::copy_from_slice(b"hello"), None)
        .await
        .unwrap();
    let mut buf = [0u8; 64];
    let (len, from) = remote.recv_from(&mut buf).await.unwrap();
    assert_eq!(&buf[LENGTH_PREFIX_SIZE..len], b"hello");

    // shrinking payloads catch stale bytes left over from an earlier,
    // larger datagram in the receive path
    for payload in [b"a-much-longer-payload".as_slice(), b"medium", b"x"] {
        let mut frame = (payload.len() as u32).to_ne_bytes().to_vec();
        frame.extend_from_slice(payload);
        remote.send_to(&frame, from).await.unwrap();
        let packet = session
            .receive(Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(packet.payload(), payload);
    }

    assert!(session.disconnect().await);
}
