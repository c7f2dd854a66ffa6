//! Session Integration Tests
//!
//! End-to-end tests driving two coordinators over the in-memory radio.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;

use blemsg_core::{
    ConnectionState, DeviceOrigin, MemoryAir, MemoryRadio, MessageDirection, OperationResult,
    OperationStream, PeerDevice, ProgressState, SessionConfig, SessionCoordinator, SessionError,
    SessionEvent, SessionPhase,
};

// ----------------------------------------------------------------------------
// Test Configuration
// ----------------------------------------------------------------------------

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn session(radio: &Arc<MemoryRadio>) -> SessionCoordinator {
    SessionCoordinator::new(radio.clone(), SessionConfig::default())
}

/// The single outcome between the progress markers of a command
async fn outcome<T: std::fmt::Debug + PartialEq>(stream: OperationStream<T>) -> OperationResult<T> {
    let results: Vec<_> = timeout(TEST_TIMEOUT, stream.collect())
        .await
        .expect("command timed out");
    assert_eq!(results.len(), 3, "expected Loading, outcome, Idle");
    assert_eq!(results[0], OperationResult::Status(ProgressState::Loading));
    assert_eq!(results[2], OperationResult::Status(ProgressState::Idle));
    results.into_iter().nth(1).unwrap()
}

async fn next_peers(scan: &mut OperationStream<Vec<PeerDevice>>) -> Vec<PeerDevice> {
    loop {
        let item = timeout(TEST_TIMEOUT, scan.next())
            .await
            .expect("scan stalled")
            .expect("scan ended early");
        if let Some(peers) = item.into_data() {
            return peers;
        }
    }
}

/// Connect `client` to `server` (which listens) and wait for both ends
async fn connect_pair(
    air: &MemoryAir,
    client: &SessionCoordinator,
    server: &SessionCoordinator,
    server_address: &str,
) {
    let listening = tokio::spawn(outcome(server.connect_as_server(true)));
    air.wait_for_listener(server_address).await;

    let connected = outcome(client.connect_as_client(server_address, true)).await;
    assert_eq!(connected.state(), Some(ConnectionState::Connected));
    let accepted = listening.await.unwrap();
    assert_eq!(accepted.state(), Some(ConnectionState::Connected));
}

async fn wait_for_state(session: &SessionCoordinator, expected: ConnectionState) {
    let mut state = session.watch_connection_state();
    timeout(TEST_TIMEOUT, state.wait_for(|state| *state == expected))
        .await
        .expect("state never reached")
        .unwrap();
}

// ----------------------------------------------------------------------------
// Discovery
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_scan_emits_paired_snapshot_first() {
    let air = MemoryAir::new();
    let alice = air.radio("AA:01", "alice");
    let bob = air.radio("BB:01", "bob");
    let _carol = air.radio("CC:01", "carol");
    air.pair(&alice, &bob);

    let session = session(&alice);
    let mut scan = session.scan();
    assert_eq!(
        scan.next().await,
        Some(OperationResult::Status(ProgressState::Loading))
    );

    let paired = next_peers(&mut scan).await;
    assert_eq!(paired.len(), 1);
    assert_eq!(paired[0].address(), "BB:01");
    assert_eq!(paired[0].origin(), DeviceOrigin::Paired);
    assert_eq!(session.phase(), SessionPhase::Scanning);

    let mut peers = paired;
    while peers.len() < 2 {
        peers = next_peers(&mut scan).await;
    }
    assert_eq!(peers[0].address(), "BB:01");
    assert_eq!(peers[0].origin(), DeviceOrigin::Paired);
    assert_eq!(peers[1].address(), "CC:01");
    assert_eq!(peers[1].origin(), DeviceOrigin::Scanned);
    assert_eq!(session.peers(), peers);

    session.stop_scan().await;
    assert_eq!(
        scan.next().await,
        Some(OperationResult::Status(ProgressState::Idle))
    );
    assert!(scan.next().await.is_none());
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert_eq!(session.progress(), ProgressState::Idle);
}

#[tokio::test]
async fn test_no_peer_after_scan_cancelled() {
    let air = MemoryAir::new();
    let alice = air.radio("AA:01", "alice");
    let session = session(&alice);
    let mut events = session.subscribe();

    let mut scan = session.scan();
    assert!(next_peers(&mut scan).await.is_empty());
    session.stop_scan().await;
    assert_eq!(air.active_scans(), 0);

    let _late = air.radio("DD:01", "dave");
    let rest: Vec<_> = scan.collect().await;
    assert_eq!(rest, vec![OperationResult::Status(ProgressState::Idle)]);
    assert!(session.peers().is_empty());

    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::ScanFinished { discovered: 0 }
    );
}

#[tokio::test]
async fn test_scan_with_radio_off_reports_unavailable() {
    let air = MemoryAir::new();
    let alice = air.radio("AA:01", "alice");
    alice.set_powered(false);

    let results: Vec<_> = session(&alice).scan().collect().await;
    assert_eq!(results.len(), 3);
    assert!(matches!(
        results[1].error(),
        Some(SessionError::TransportUnavailable { .. })
    ));
}

#[tokio::test]
async fn test_dropping_scan_releases_radio() {
    let air = MemoryAir::new();
    let alice = air.radio("AA:01", "alice");
    let _bob = air.radio("BB:01", "bob");
    let session = session(&alice);

    let mut scan = session.scan();
    next_peers(&mut scan).await;
    next_peers(&mut scan).await;
    drop(scan);

    timeout(TEST_TIMEOUT, async {
        while air.active_scans() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("scan registration leaked");
    assert_eq!(session.progress(), ProgressState::Idle);
    assert_eq!(session.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn test_overlapping_scans_keep_scanning_phase() {
    let air = MemoryAir::new();
    let alice = air.radio("AA:01", "alice");
    let _bob = air.radio("BB:01", "bob");
    let session = session(&alice);
    let mut events = session.subscribe();

    let mut first = session.scan();
    assert!(next_peers(&mut first).await.is_empty());
    let mut second = session.scan();
    assert!(next_peers(&mut second).await.is_empty());

    // The second scan replaced the first, which now runs to its end
    timeout(TEST_TIMEOUT, first.collect::<Vec<_>>())
        .await
        .expect("superseded scan never ended");
    assert_eq!(session.phase(), SessionPhase::Scanning);
    assert_eq!(session.progress(), ProgressState::Loading);
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, SessionEvent::ScanFinished { .. }));
    }

    let peers = next_peers(&mut second).await;
    assert_eq!(peers.len(), 1);
    assert_eq!(session.phase(), SessionPhase::Scanning);

    session.stop_scan().await;
    let rest: Vec<_> = second.collect().await;
    assert_eq!(rest, vec![OperationResult::Status(ProgressState::Idle)]);
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert_eq!(session.progress(), ProgressState::Idle);
    let finished = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|event| matches!(event, SessionEvent::ScanFinished { .. }))
        .count();
    assert_eq!(finished, 1);
}

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_without_listener_fails() {
    let air = MemoryAir::new();
    let alice = air.radio("AA:01", "alice");
    let _bob = air.radio("BB:01", "bob");
    let session = session(&alice);
    let mut events = session.subscribe();

    let result = outcome(session.connect_as_client("BB:01", true)).await;
    assert_eq!(result.state(), Some(ConnectionState::Failed));
    assert!(result.data().is_none());
    assert!(matches!(result.error(), Some(SessionError::ConnectFailed { .. })));

    assert_eq!(session.connection_state(), ConnectionState::None);
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert!(session.connected_peer().is_none());

    let mut seen = Vec::new();
    while let Ok(SessionEvent::ConnectionStateChanged(state)) = events.try_recv() {
        seen.push(state);
    }
    assert_eq!(
        seen,
        vec![
            ConnectionState::Initializing,
            ConnectionState::Failed,
            ConnectionState::None
        ]
    );
}

#[tokio::test]
async fn test_second_connection_is_rejected() {
    let air = MemoryAir::new();
    let alice_radio = air.radio("AA:01", "alice");
    let bob_radio = air.radio("BB:01", "bob");
    let alice = session(&alice_radio);
    let bob = session(&bob_radio);
    connect_pair(&air, &alice, &bob, "BB:01").await;

    let again = outcome(alice.connect_as_client("BB:01", true)).await;
    assert_eq!(again.error(), Some(&SessionError::AlreadyConnected));
    assert_eq!(alice.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_gives_up_on_listen() {
    let air = MemoryAir::new();
    let bob = air.radio("BB:01", "bob");
    let session = SessionCoordinator::new(
        bob,
        SessionConfig::default().with_connect_timeout(Duration::from_secs(2)),
    );

    let result = outcome(session.connect_as_server(false)).await;
    assert!(matches!(result.error(), Some(SessionError::AcceptFailed { .. })));
    assert!(!air.has_listener("BB:01"));
    assert_eq!(session.connection_state(), ConnectionState::None);
}

// ----------------------------------------------------------------------------
// Messaging
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_send_without_connection_is_not_connected() {
    let air = MemoryAir::new();
    let alice = air.radio("AA:01", "alice");
    let session = session(&alice);

    let result = outcome(session.send("hello")).await;
    assert_eq!(result.error(), Some(&SessionError::NotConnected));
    assert_eq!(result.state(), Some(ConnectionState::None));
    assert!(session.messages().is_empty());
}

#[tokio::test]
async fn test_message_round_trip() {
    let air = MemoryAir::new();
    let alice_radio = air.radio("AA:01", "alice");
    let bob_radio = air.radio("BB:01", "bob");
    let alice = session(&alice_radio);
    let bob = session(&bob_radio);
    connect_pair(&air, &alice, &bob, "BB:01").await;

    assert_eq!(
        alice.connected_peer().map(|peer| peer.address().to_string()),
        Some("BB:01".to_string())
    );
    assert_eq!(
        bob.connected_peer().map(|peer| peer.name().to_string()),
        Some("alice".to_string())
    );

    let sent = outcome(alice.send("hi bob")).await;
    assert_eq!(sent.state(), Some(ConnectionState::Connected));

    let mut log = bob.watch_messages();
    let received = timeout(TEST_TIMEOUT, log.wait_for(|log| !log.is_empty()))
        .await
        .expect("message never arrived")
        .unwrap()
        .clone();
    assert_eq!(received[0].text, "hi bob");
    assert_eq!(received[0].direction, MessageDirection::Received);
    assert_eq!(bob.phase(), SessionPhase::Receiving);
}

#[tokio::test]
async fn test_sequential_sends_are_logged_in_order() {
    let air = MemoryAir::new();
    let alice_radio = air.radio("AA:01", "alice");
    let bob_radio = air.radio("BB:01", "bob");
    let alice = session(&alice_radio);
    let bob = session(&bob_radio);
    connect_pair(&air, &alice, &bob, "BB:01").await;

    outcome(alice.send("hi")).await;
    outcome(alice.send("there")).await;

    let log = alice.messages();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].text, "hi");
    assert_eq!(log[1].text, "there");
    assert!(log.iter().all(|m| m.direction == MessageDirection::Sent));
}

#[tokio::test]
async fn test_new_connection_starts_new_log() {
    let air = MemoryAir::new();
    let alice_radio = air.radio("AA:01", "alice");
    let bob_radio = air.radio("BB:01", "bob");
    let alice = session(&alice_radio);
    let bob = session(&bob_radio);

    connect_pair(&air, &alice, &bob, "BB:01").await;
    outcome(alice.send("first session")).await;
    alice.disconnect().await;
    assert_eq!(alice.messages().len(), 1);
    wait_for_state(&bob, ConnectionState::None).await;

    connect_pair(&air, &alice, &bob, "BB:01").await;
    assert!(alice.messages().is_empty());
}

// ----------------------------------------------------------------------------
// Disconnect
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let air = MemoryAir::new();
    let alice_radio = air.radio("AA:01", "alice");
    let bob_radio = air.radio("BB:01", "bob");
    let alice = session(&alice_radio);
    let bob = session(&bob_radio);
    connect_pair(&air, &alice, &bob, "BB:01").await;

    let first = alice.disconnect().await;
    assert_eq!(first.state(), Some(ConnectionState::Closed));
    let second = alice.disconnect().await;
    assert!(second.error().is_none());
    assert_eq!(alice.connection_state(), ConnectionState::Closed);
    assert_eq!(alice.phase(), SessionPhase::Closed);
    assert!(alice.connected_peer().is_none());

    let after = outcome(alice.send("gone")).await;
    assert_eq!(after.error(), Some(&SessionError::NotConnected));
}

#[tokio::test]
async fn test_peer_disconnect_tears_down_session() {
    let air = MemoryAir::new();
    let alice_radio = air.radio("AA:01", "alice");
    let bob_radio = air.radio("BB:01", "bob");
    let alice = session(&alice_radio);
    let bob = session(&bob_radio);
    connect_pair(&air, &alice, &bob, "BB:01").await;

    let mut events = alice.subscribe();

    bob.disconnect().await;
    wait_for_state(&alice, ConnectionState::None).await;
    assert!(alice.connected_peer().is_none());
    assert_eq!(alice.phase(), SessionPhase::Idle);

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::ConnectionStateChanged(state) = event {
            states.push(state);
        }
    }
    assert_eq!(states, vec![ConnectionState::Failed, ConnectionState::None]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_send_racing_disconnect_leaves_no_handle() {
    for _ in 0..10 {
        let air = MemoryAir::new();
        let alice_radio = air.radio("AA:01", "alice");
        let bob_radio = air.radio("BB:01", "bob");
        let alice = session(&alice_radio);
        let bob = session(&bob_radio);
        connect_pair(&air, &alice, &bob, "BB:01").await;

        let sending = tokio::spawn(outcome(alice.send("racing")));
        let closing = tokio::spawn({
            let alice = alice.clone();
            async move { alice.disconnect().await }
        });
        let sent = sending.await.unwrap();
        let closed = closing.await.unwrap();

        assert_eq!(closed.state(), Some(ConnectionState::Closed));
        assert_eq!(alice.connection_state(), ConnectionState::Closed);
        assert!(alice.connected_peer().is_none());
        match sent.error() {
            None => {
                let log = alice.messages();
                assert_eq!(log.len(), 1);
                assert_eq!(log[0].text, "racing");
                assert_eq!(log[0].direction, MessageDirection::Sent);
            }
            Some(SessionError::WriteFailed { .. }) | Some(SessionError::NotConnected) => {
                assert!(alice.messages().is_empty());
            }
            Some(other) => panic!("unexpected send error: {:?}", other),
        }

        let after = outcome(alice.send("late")).await;
        assert_eq!(after.error(), Some(&SessionError::NotConnected));
    }
}
