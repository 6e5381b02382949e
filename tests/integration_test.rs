//! Integration tests for the full link flow over the in-memory radio.

use std::sync::Arc;
use std::time::Duration;

use btlink::bluetooth::constants::toast;
use btlink::bluetooth::{
    ConnectionState, LinkOptions, LinkService, MemoryMedium, MemoryRadio, Notification,
    Notifications, OverflowPolicy, PeerAddress, PeerDirectory, PeerIdentity, SecurityMode,
    ToastKind,
};

const TIMEOUT: Duration = Duration::from_secs(2);

async fn next(rx: &Notifications) -> Notification {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("notification stream closed")
}

/// Collect notifications up to and including `want`.
async fn until(rx: &Notifications, want: &Notification) -> Vec<Notification> {
    let mut seen = Vec::new();
    loop {
        let notification = next(rx).await;
        let done = &notification == want;
        seen.push(notification);
        if done {
            return seen;
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

fn state(state: ConnectionState) -> Notification {
    Notification::StateChanged { state }
}

fn has_error_toast(seen: &[Notification]) -> bool {
    seen.iter().any(|n| {
        matches!(
            n,
            Notification::Toast {
                kind: ToastKind::Error,
                ..
            }
        )
    })
}

struct Node {
    radio: Arc<MemoryRadio>,
    service: LinkService<MemoryRadio>,
    rx: Notifications,
}

fn node(medium: &MemoryMedium, name: &str) -> Node {
    node_with(medium, name, LinkOptions::default())
}

fn node_with(medium: &MemoryMedium, name: &str, options: LinkOptions) -> Node {
    let radio = medium.add_node(name);
    let (service, rx) = LinkService::new(radio.clone(), options);
    Node { radio, service, rx }
}

async fn listening(node: &Node) {
    node.service.start_listening();
    assert_eq!(next(&node.rx).await, state(ConnectionState::Listening));
    let radio = node.radio.clone();
    wait_until(move || {
        radio.has_service(SecurityMode::Secure) && radio.has_service(SecurityMode::Insecure)
    })
    .await;
}

/// A listens, B dials A. Returns once both sides report `Connected`.
async fn connected_pair(medium: &MemoryMedium, mode: SecurityMode) -> (Node, Node) {
    let a = node(medium, "Firefly-A");
    let b = node(medium, "Phone-B");
    medium.bond(a.radio.address(), b.radio.address()).unwrap();

    listening(&a).await;
    b.service.connect(a.radio.identity(), mode);

    until(&a.rx, &state(ConnectionState::Connected)).await;
    until(&b.rx, &state(ConnectionState::Connected)).await;
    (a, b)
}

#[tokio::test]
async fn test_secure_connect() {
    let medium = MemoryMedium::new();
    let a = node(&medium, "Firefly-A");
    let b = node(&medium, "Phone-B");
    medium.bond(a.radio.address(), b.radio.address()).unwrap();

    listening(&a).await;
    b.service.connect(a.radio.identity(), SecurityMode::Secure);

    let b_seen = until(&b.rx, &state(ConnectionState::Connected)).await;
    assert_eq!(
        b_seen,
        vec![
            state(ConnectionState::Connecting),
            Notification::PeerConnected {
                name: "Firefly-A".to_string(),
                address: a.radio.address(),
            },
            state(ConnectionState::Connected),
        ]
    );

    let a_seen = until(&a.rx, &state(ConnectionState::Connected)).await;
    assert_eq!(
        a_seen,
        vec![
            Notification::PeerConnected {
                name: "Phone-B".to_string(),
                address: b.radio.address(),
            },
            state(ConnectionState::Connected),
        ]
    );

    assert!(a.service.is_connection_open());
    assert_eq!(
        b.service.connected_peer(),
        Some((a.radio.identity(), SecurityMode::Secure))
    );
    assert_eq!(
        a.service.connected_peer().map(|(_, mode)| mode),
        Some(SecurityMode::Secure)
    );
}

#[tokio::test]
async fn test_insecure_connect_without_bond() {
    let medium = MemoryMedium::new();
    let a = node(&medium, "Firefly-A");
    let b = node(&medium, "Phone-B");

    listening(&a).await;
    b.service.connect(a.radio.identity(), SecurityMode::Insecure);

    let seen = until(&b.rx, &state(ConnectionState::Connected)).await;
    assert!(!has_error_toast(&seen));
    assert_eq!(
        b.service.connected_peer().map(|(_, mode)| mode),
        Some(SecurityMode::Insecure)
    );
}

#[tokio::test]
async fn test_unreachable_peer_resumes_listening() {
    let medium = MemoryMedium::new();
    let b = node(&medium, "Phone-B");
    let ghost = PeerIdentity::new(
        PeerAddress::new([0x02, 0, 0, 0, 0xFF, 0xFF]),
        Some("Ghost".to_string()),
    );

    b.service.connect(ghost, SecurityMode::Secure);

    assert_eq!(next(&b.rx).await, state(ConnectionState::Connecting));
    assert_eq!(
        next(&b.rx).await,
        Notification::error_toast(toast::CONNECT_FAILED)
    );
    assert_eq!(next(&b.rx).await, state(ConnectionState::Idle));
    assert_eq!(next(&b.rx).await, state(ConnectionState::Listening));
    assert_eq!(b.service.state(), ConnectionState::Listening);
}

#[tokio::test]
async fn test_secure_connect_requires_bond() {
    let medium = MemoryMedium::new();
    let a = node(&medium, "Firefly-A");
    let b = node(&medium, "Phone-B");

    listening(&a).await;
    b.service.connect(a.radio.identity(), SecurityMode::Secure);

    let seen = until(&b.rx, &state(ConnectionState::Listening)).await;
    assert!(seen.contains(&Notification::error_toast(toast::CONNECT_FAILED)));
    assert_eq!(a.service.state(), ConnectionState::Listening);
}

#[tokio::test]
async fn test_second_connect_replaces_first() {
    let medium = MemoryMedium::new();
    let a = node(&medium, "Firefly-A");
    let b = node(&medium, "Phone-B");
    let ghost = PeerIdentity::new(PeerAddress::new([0x02, 0, 0, 0, 0xFF, 0xFF]), None);

    listening(&a).await;
    b.service.connect(ghost, SecurityMode::Insecure);
    b.service.connect(a.radio.identity(), SecurityMode::Insecure);

    let seen = until(&b.rx, &state(ConnectionState::Connected)).await;
    assert!(!has_error_toast(&seen));
    assert_eq!(b.service.connected_peer().map(|(p, _)| p), Some(a.radio.identity()));
}

#[tokio::test]
async fn test_send_and_receive() {
    let medium = MemoryMedium::new();
    let (a, b) = connected_pair(&medium, SecurityMode::Secure).await;

    assert!(a.service.send(&[0x41, 0x42, 0x0D]).await);
    assert_eq!(
        next(&a.rx).await,
        Notification::MessageSent {
            payload: vec![0x41, 0x42, 0x0D],
        }
    );
    assert_eq!(
        next(&b.rx).await,
        Notification::MessageReceived {
            payload: vec![0x41, 0x42],
        }
    );

    // Partial message stays buffered until its delimiter arrives.
    assert!(b.service.send(b"hel").await);
    assert!(b.service.send(b"lo\rwor").await);
    assert!(b.service.send(b"ld\r").await);
    assert_eq!(
        next(&a.rx).await,
        Notification::MessageReceived {
            payload: b"hello".to_vec(),
        }
    );
    assert_eq!(
        next(&a.rx).await,
        Notification::MessageReceived {
            payload: b"world".to_vec(),
        }
    );
}

#[tokio::test]
async fn test_send_chunked() {
    let medium = MemoryMedium::new();
    let (a, b) = connected_pair(&medium, SecurityMode::Insecure).await;

    let data = b"a longer line that goes out in pieces\r";
    assert!(a.service.send_chunked(data, 4).await);
    assert!(!a.service.send_chunked(data, 0).await);

    assert_eq!(
        next(&b.rx).await,
        Notification::MessageReceived {
            payload: data[..data.len() - 1].to_vec(),
        }
    );
}

#[tokio::test]
async fn test_oversized_message_discarded() {
    let medium = MemoryMedium::new();
    let options = LinkOptions {
        max_message_len: 4,
        overflow: OverflowPolicy::Discard,
    };
    let a = node(&medium, "Firefly-A");
    let b = node_with(&medium, "Phone-B", options);

    listening(&a).await;
    b.service.connect(a.radio.identity(), SecurityMode::Insecure);
    until(&a.rx, &state(ConnectionState::Connected)).await;
    until(&b.rx, &state(ConnectionState::Connected)).await;

    assert!(a.service.send(b"toolong\rok\r").await);
    assert_eq!(
        next(&b.rx).await,
        Notification::MessageReceived {
            payload: b"ok".to_vec(),
        }
    );
}

#[tokio::test]
async fn test_send_when_not_connected() {
    let medium = MemoryMedium::new();
    let a = node(&medium, "Firefly-A");

    assert!(!a.service.send(b"hello\r").await);
    listening(&a).await;
    assert!(!a.service.send(b"hello\r").await);
    assert!(a.rx.is_empty());
}

#[tokio::test]
async fn test_stop_twice_is_noop() {
    let medium = MemoryMedium::new();
    let a = node(&medium, "Firefly-A");

    // Stopping an idle service emits nothing.
    a.service.stop();
    assert!(a.rx.is_empty());

    listening(&a).await;
    a.service.stop();
    assert_eq!(next(&a.rx).await, state(ConnectionState::Idle));

    let radio = a.radio.clone();
    wait_until(move || {
        !radio.has_service(SecurityMode::Secure) && !radio.has_service(SecurityMode::Insecure)
    })
    .await;

    a.service.close_connection();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(a.rx.is_empty());
    assert_eq!(a.service.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_connected_cancels_listeners() {
    let medium = MemoryMedium::new();
    let a = node(&medium, "Firefly-A");
    let b = node(&medium, "Phone-B");

    listening(&a).await;
    listening(&b).await;
    b.service.connect(a.radio.identity(), SecurityMode::Insecure);
    until(&b.rx, &state(ConnectionState::Connected)).await;
    until(&a.rx, &state(ConnectionState::Connected)).await;

    for radio in [a.radio.clone(), b.radio.clone()] {
        wait_until(move || {
            !radio.has_service(SecurityMode::Secure) && !radio.has_service(SecurityMode::Insecure)
        })
        .await;
    }

    // A third node cannot reach either side while they are connected.
    let c = node(&medium, "Laptop-C");
    c.service.connect(a.radio.identity(), SecurityMode::Insecure);
    let seen = until(&c.rx, &state(ConnectionState::Listening)).await;
    assert!(seen.contains(&Notification::error_toast(toast::CONNECT_FAILED)));
    assert!(a.service.is_connection_open());
}

#[tokio::test]
async fn test_connection_lost_resumes_listening() {
    let medium = MemoryMedium::new();
    let (a, b) = connected_pair(&medium, SecurityMode::Secure).await;

    b.service.stop();
    assert_eq!(next(&b.rx).await, state(ConnectionState::Idle));

    assert_eq!(
        next(&a.rx).await,
        Notification::error_toast(toast::CONNECTION_LOST)
    );
    assert_eq!(next(&a.rx).await, state(ConnectionState::Idle));
    assert_eq!(next(&a.rx).await, state(ConnectionState::Listening));
    assert_eq!(a.service.connected_peer(), None);

    // Listening again, so B can come back.
    let radio = a.radio.clone();
    wait_until(move || radio.has_service(SecurityMode::Secure)).await;
    b.service.connect(a.radio.identity(), SecurityMode::Secure);
    until(&a.rx, &state(ConnectionState::Connected)).await;
}

#[tokio::test]
async fn test_radio_off_reports_unavailable() {
    let medium = MemoryMedium::new();
    let a = node(&medium, "Firefly-A");
    a.radio.set_enabled(false);

    assert!(!a.service.is_enabled());
    a.service.start_listening();
    assert_eq!(
        next(&a.rx).await,
        Notification::error_toast(toast::TRANSPORT_UNAVAILABLE)
    );
    assert_eq!(a.service.state(), ConnectionState::Idle);
    assert!(a.service.paired_peers(|_| true).await.is_empty());
}

#[tokio::test]
async fn test_paired_peers_filter() {
    let medium = MemoryMedium::new();
    let a = node(&medium, "Laptop-A");
    let firefly = medium.add_node("FireFly 3");
    let phone = medium.add_node("Phone");
    medium.add_node("Firefly unbonded");
    medium.bond(a.radio.address(), firefly.address()).unwrap();
    medium.bond(a.radio.address(), phone.address()).unwrap();

    let all = a.service.paired_peers(|_| true).await;
    assert_eq!(all.len(), 2);

    let matching = a.service.paired_peers_matching("firefly").await;
    assert_eq!(matching, vec![firefly.identity()]);
}

#[tokio::test]
async fn test_discovery_toggle() {
    let medium = MemoryMedium::new();
    let a = node(&medium, "Laptop-A");
    let b = medium.add_node("Phone-B");

    assert!(a.service.start_discovery().await);
    assert_eq!(next(&a.rx).await, Notification::DiscoveryStarted);
    assert_eq!(
        next(&a.rx).await,
        Notification::PeerFound {
            peer: b.identity()
        }
    );

    let late = medium.add_node("Firefly-Late");
    assert_eq!(
        next(&a.rx).await,
        Notification::PeerFound {
            peer: late.identity()
        }
    );

    // A second start stops the running discovery.
    assert!(!a.service.start_discovery().await);
    assert_eq!(
        next(&a.rx).await,
        Notification::info_toast(toast::DISCOVERY_STOPPED)
    );
    assert_eq!(next(&a.rx).await, Notification::DiscoveryFinished);
}

#[tokio::test]
async fn test_connect_stops_discovery() {
    let medium = MemoryMedium::new();
    let a = node(&medium, "Firefly-A");
    let b = node(&medium, "Phone-B");

    listening(&a).await;
    assert!(b.service.start_discovery().await);
    b.service.connect(a.radio.identity(), SecurityMode::Insecure);

    let seen = until(&b.rx, &state(ConnectionState::Connected)).await;
    assert!(seen.contains(&Notification::DiscoveryStarted));
    assert!(!b.radio.is_discovering());
    if !seen.contains(&Notification::DiscoveryFinished) {
        until(&b.rx, &Notification::DiscoveryFinished).await;
    }
}

fn both_bound(radio: &MemoryRadio) -> bool {
    radio.has_service(SecurityMode::Secure) && radio.has_service(SecurityMode::Insecure)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_after_stop_rebinds_both_records() {
    let medium = MemoryMedium::new();
    let a = node(&medium, "Firefly-A");

    for _ in 0..100 {
        a.service.start_listening();
        let radio = a.radio.clone();
        wait_until(move || both_bound(&radio)).await;

        a.service.stop();
        a.service.start_listening();
        assert_eq!(a.service.state(), ConnectionState::Listening);

        let radio = a.radio.clone();
        wait_until(move || both_bound(&radio)).await;
        a.service.stop();
    }
}

#[tokio::test]
async fn test_accept_failure_needs_restart() {
    let medium = MemoryMedium::new();
    let a = node(&medium, "Firefly-A");

    listening(&a).await;

    // Power cycling unbinds both records and fails the pending accepts.
    a.radio.set_enabled(false);
    a.radio.set_enabled(true);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!a.radio.has_service(SecurityMode::Secure));
    assert!(!a.radio.has_service(SecurityMode::Insecure));
    assert_eq!(a.service.state(), ConnectionState::Listening);
    assert!(a.rx.is_empty());

    listening(&a).await;
    assert!(both_bound(&a.radio));
}
