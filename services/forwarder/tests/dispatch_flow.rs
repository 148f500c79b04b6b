
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use harness::{handshake, make_route, read_until_closed, ForwarderHandle, ScriptedManager};
use mcfwd_forwarder::manager::UnmanagedManager;
use mcfwd_forwarder::{ManagerState, Messages};
use mcfwd_packet::{query_status, Disconnect, NextState};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

const LIMIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn status_query_while_stopped_reports_stopped_message() {
    let manager = ScriptedManager::new(ManagerState::Stopped);
    let forwarder = ForwarderHandle::spawn(vec![make_route("mc.example.com", &[], manager.clone())])
        .await
        .unwrap();

    let mut stream = forwarder.connect().await.unwrap();
    let status = timeout(LIMIT, query_status(&mut stream, "mc.example.com", 25565))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(status.description.text, Messages::default().stopped);
    assert_eq!(status.description.color.as_deref(), Some("red"));
    assert_eq!(status.version.protocol, -1);
    assert!(status.players.sample.is_empty());

    assert_eq!(manager.start_count(), 0);
    assert_eq!(manager.current_state(), ManagerState::Stopped);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(forwarder.stats.status_served.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn login_while_stopped_starts_backend_once() {
    let manager = ScriptedManager::new(ManagerState::Stopped);
    let forwarder = ForwarderHandle::spawn(vec![make_route("mc.example.com", &[], manager.clone())])
        .await
        .unwrap();

    let mut stream = forwarder.connect().await.unwrap();
    stream
        .write_all(&handshake("mc.example.com", NextState::Login).encode())
        .await
        .unwrap();

    let disconnect = timeout(LIMIT, Disconnect::read_from(&mut stream))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(disconnect.reason.text, "Successfully started the server!");
    assert_eq!(disconnect.reason.color.as_deref(), Some("green"));
    assert!(read_until_closed(&mut stream, LIMIT).await.is_empty());

    assert_eq!(manager.start_count(), 1);
}

#[tokio::test]
async fn login_while_stopped_reports_start_failure() {
    let manager = ScriptedManager::failing_start(ManagerState::Stopped);
    let mut messages = Messages::default();
    messages.start_failed = "Could not boot, try again later".to_string();
    let forwarder = ForwarderHandle::spawn_with_messages(
        vec![make_route("mc.example.com", &[], manager.clone())],
        messages,
    )
    .await
    .unwrap();

    let mut stream = forwarder.connect().await.unwrap();
    stream
        .write_all(&handshake("mc.example.com", NextState::Login).encode())
        .await
        .unwrap();

    let disconnect = timeout(LIMIT, Disconnect::read_from(&mut stream))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(disconnect.reason.text, "Could not boot, try again later");
    assert_eq!(manager.start_count(), 1);
}

#[tokio::test]
async fn login_while_pending_gets_pending_disconnect() {
    let manager = ScriptedManager::new(ManagerState::Pending);
    let forwarder = ForwarderHandle::spawn(vec![make_route("mc.example.com", &[], manager.clone())])
        .await
        .unwrap();

    let mut stream = forwarder.connect().await.unwrap();
    stream
        .write_all(&handshake("mc.example.com", NextState::Login).encode())
        .await
        .unwrap();

    let disconnect = timeout(LIMIT, Disconnect::read_from(&mut stream))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(disconnect.reason.text, "PENDING...");
    assert_eq!(manager.start_count(), 0);
}

#[tokio::test]
async fn alias_routes_to_primary_manager() {
    let pending = ScriptedManager::new(ManagerState::Pending);
    let stopping = ScriptedManager::new(ManagerState::Stopping);
    let forwarder = ForwarderHandle::spawn(vec![
        make_route("lobby.example.com", &["hub.example.com"], pending),
        make_route("smp.example.com", &["survival.example.com"], stopping),
    ])
    .await
    .unwrap();

    for (address, expected) in [
        ("smp.example.com", "STOPPING..."),
        ("survival.example.com", "STOPPING..."),
        ("HUB.example.com.", "PENDING..."),
    ] {
        let mut stream = forwarder.connect().await.unwrap();
        let status = timeout(LIMIT, query_status(&mut stream, address, 25565))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.description.text, expected, "address {}", address);
    }
}

#[tokio::test]
async fn unrouted_connection_is_closed_silently() {
    let manager = ScriptedManager::new(ManagerState::Stopped);
    let forwarder = ForwarderHandle::spawn(vec![make_route("mc.example.com", &[], manager.clone())])
        .await
        .unwrap();

    let mut stream = forwarder.connect().await.unwrap();
    stream
        .write_all(&handshake("elsewhere.example.com", NextState::Login).encode())
        .await
        .unwrap();

    assert!(read_until_closed(&mut stream, LIMIT).await.is_empty());
    assert_eq!(manager.start_count(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(forwarder.stats.routes_failed.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn unmanaged_backend_closes_without_response() {
    let forwarder = ForwarderHandle::spawn(vec![make_route(
        "mc.example.com",
        &[],
        Arc::new(UnmanagedManager::new()),
    )])
    .await
    .unwrap();

    let mut stream = forwarder.connect().await.unwrap();
    stream
        .write_all(&handshake("mc.example.com", NextState::Status).encode())
        .await
        .unwrap();

    assert!(read_until_closed(&mut stream, LIMIT).await.is_empty());
}

#[tokio::test]
async fn garbage_instead_of_handshake_is_dropped() {
    let forwarder = ForwarderHandle::spawn(vec![]).await.unwrap();

    let mut stream = forwarder.connect().await.unwrap();
    // Declares a frame far beyond the packet size limit.
    stream.write_all(&[0xff, 0xff, 0xff, 0x7f]).await.unwrap();

    assert!(read_until_closed(&mut stream, LIMIT).await.is_empty());

    // The counter is bumped after the connection is torn down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(forwarder.stats.handshake_failed.load(Ordering::Relaxed), 1);
}
