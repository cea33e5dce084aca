//! End-to-end tests against a loopback `TcpListener` standing in for the
//! head controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_core::{ConnectionState, FramerConfig, PacketFramer, SessionEndpoint, WireFormat};
use bridge_node::application::forward_packets::{forward_packets, log_inbound, ChannelSink};
use bridge_node::application::supervise_session::{
    wait_connected, DisconnectPolicy, RetryPolicy, SessionSupervisor, SupervisorConfig,
};
use bridge_node::infrastructure::serial::mock::ScriptedChunkSource;
use bridge_node::infrastructure::serial::SerialLine;
use bridge_node::infrastructure::session::{Session, SessionConfig};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn head_controller() -> (TcpListener, SessionEndpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = SessionEndpoint::new("ep0", listener.local_addr().unwrap());
    (listener, endpoint)
}

async fn read_exactly(peer: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    time::timeout(TIMEOUT, peer.read_exact(&mut buf))
        .await
        .expect("timed out waiting for bytes")
        .unwrap();
    buf
}

#[tokio::test]
async fn test_serial_chunks_arrive_as_nul_terminated_packets() {
    // Arrange
    let (listener, endpoint) = head_controller().await;
    let (session, events) = Session::new(endpoint, SessionConfig::default());
    tokio::spawn(log_inbound("ep0".to_string(), events));
    session.connect().await.unwrap();
    let (mut peer, _) = listener.accept().await.unwrap();

    let (sink, packets) = ChannelSink::new("com1");
    let framer = PacketFramer::new("com1", FramerConfig::default(), Box::new(sink)).unwrap();
    let source = ScriptedChunkSource::new(
        "com1",
        vec![b"$GPRMC,1".to_vec(), b"23\n$HCH".to_vec(), b"DG\n".to_vec()],
    );
    let forwarder = tokio::spawn(forward_packets(
        "com1".to_string(),
        packets,
        session.clone(),
        WireFormat::NulTerminated,
    ));

    // Act
    let line = SerialLine::new(source, Arc::new(framer))
        .spawn(Arc::new(AtomicBool::new(true)))
        .unwrap();

    // Assert
    assert_eq!(read_exactly(&mut peer, 12).await, b"$GPRMC,123\n\0");
    assert_eq!(read_exactly(&mut peer, 8).await, b"$HCHDG\n\0");
    let _ = tokio::task::spawn_blocking(move || line.join()).await.unwrap();
    let stats = time::timeout(TIMEOUT, forwarder).await.unwrap().unwrap();
    assert_eq!(stats.forwarded, 2);
}

#[tokio::test]
async fn test_supervisor_restores_forwarding_after_peer_drop() {
    // Arrange
    let (listener, endpoint) = head_controller().await;
    let (session, events) = Session::new(endpoint, SessionConfig::default());
    tokio::spawn(log_inbound("ep0".to_string(), events));
    let running = Arc::new(AtomicBool::new(true));
    let supervisor = SessionSupervisor::new(
        session.clone(),
        SupervisorConfig {
            retry: RetryPolicy::Fixed {
                delay: Duration::from_millis(20),
            },
            max_attempts: None,
            on_disconnect: DisconnectPolicy::Reconnect,
        },
    )
    .spawn(Arc::clone(&running));

    // Act: first connection is dropped by the head controller
    let (first, _) = time::timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap();
    drop(first);
    let (mut second, _) = time::timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap();
    wait_connected(&session, TIMEOUT).await.unwrap();
    session.send(b"$GPVTG\n\0").await.unwrap();

    // Assert
    assert_eq!(read_exactly(&mut second, 8).await, b"$GPVTG\n\0");

    running.store(false, Ordering::Relaxed);
    let result = time::timeout(TIMEOUT, supervisor).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_packets_framed_while_disconnected_are_not_replayed() {
    // Arrange: nothing is connected yet
    let (listener, endpoint) = head_controller().await;
    let (session, events) = Session::new(endpoint, SessionConfig::default());
    tokio::spawn(log_inbound("ep0".to_string(), events));
    let (sink, packets) = ChannelSink::new("com1");
    let framer = Arc::new(PacketFramer::new("com1", FramerConfig::default(), Box::new(sink)).unwrap());
    let forwarder = tokio::spawn(forward_packets(
        "com1".to_string(),
        packets,
        session.clone(),
        WireFormat::NulTerminated,
    ));

    // Act: one packet while down, then connect, then another packet
    let f = Arc::clone(&framer);
    tokio::task::spawn_blocking(move || f.ingest(b"early\n").unwrap())
        .await
        .unwrap();
    // Let the forwarder drain the slot before the session comes up.
    time::sleep(Duration::from_millis(50)).await;
    session.connect().await.unwrap();
    let (mut peer, _) = listener.accept().await.unwrap();
    tokio::task::spawn_blocking(move || {
        framer.ingest(b"late\n").unwrap();
    })
    .await
    .unwrap();

    // Assert: only the packet framed after connecting is delivered
    assert_eq!(read_exactly(&mut peer, 6).await, b"late\n\0");
    let stats = time::timeout(TIMEOUT, forwarder).await.unwrap().unwrap();
    assert_eq!(stats.forwarded, 1);
    assert_eq!(stats.dropped_disconnected, 1);
}
