//! Alice calls Bob: roles, media offer/answer, chat ordering and hang-up

mod common;

use common::{connect, connect_with_media, count, TestPeer};
use pretty_assertions::assert_eq;

use peerlink_peer_core::{
    CloseReason, ConnectionState, LifecycleState, MemoryRendezvous, MessageDirection, PeerEvent, RenderOptions, Role,
};

#[tokio::test]
async fn test_alice_calls_bob_roles_and_single_offer() {
    let rendezvous = MemoryRendezvous::new();
    let mut alice = TestPeer::registered(&rendezvous, "alice").await;
    let mut bob = TestPeer::registered(&rendezvous, "bob").await;

    let info = alice.agent.dial("bob").await.unwrap();
    assert_eq!(info.role, Role::Caller);
    assert_eq!(info.state, ConnectionState::Open);
    assert_eq!(info.remote.as_str(), "bob");

    let bob_events = bob
        .until(|e| matches!(e, PeerEvent::RemoteStreamReceived { .. }))
        .await;
    let alice_events = alice
        .until(|e| matches!(e, PeerEvent::RemoteStreamReceived { .. }))
        .await;

    let incoming = bob_events.iter().find_map(|e| match e {
        PeerEvent::IncomingConnection { connection } => Some(connection.clone()),
        _ => None,
    });
    let incoming = incoming.expect("bob saw the inbound dial");
    assert_eq!(incoming.role, Role::Callee);
    assert_eq!(incoming.remote.as_str(), "alice");

    // only the caller offers, only the callee answers
    assert_eq!(count(&alice_events, |e| matches!(e, PeerEvent::MediaOfferSent { .. })), 1);
    assert_eq!(count(&bob_events, |e| matches!(e, PeerEvent::MediaOfferSent { .. })), 0);
    assert_eq!(count(&bob_events, |e| matches!(e, PeerEvent::MediaAnswered { .. })), 1);
    assert_eq!(count(&alice_events, |e| matches!(e, PeerEvent::MediaAnswered { .. })), 0);

    // self-preview muted, remote unmuted and full size
    for peer in [&alice, &bob] {
        assert_eq!(peer.preview.attached().map(|(_, o)| o), Some(RenderOptions::PREVIEW));
        assert_eq!(peer.remote.attached().map(|(_, o)| o), Some(RenderOptions::REMOTE));
        assert_eq!(peer.device.acquisitions(), 1);
    }

    let bob_current = bob.agent.current().await.unwrap().unwrap();
    assert_eq!(bob_current.role, Role::Callee);
    assert_eq!(bob_current.state, ConnectionState::Open);
    assert!(bob_current.media_live);

    let later = alice.drain().await;
    assert_eq!(count(&later, |e| matches!(e, PeerEvent::MediaOfferSent { .. })), 0);
}

#[tokio::test]
async fn test_transcripts_follow_local_observation_order() {
    let rendezvous = MemoryRendezvous::new();
    let mut alice = TestPeer::registered(&rendezvous, "alice").await;
    let mut bob = TestPeer::registered(&rendezvous, "bob").await;
    connect(&mut alice, &mut bob, "bob").await;

    bob.agent.send("hello").await.unwrap();
    alice
        .until(|e| matches!(e, PeerEvent::MessageReceived { .. }))
        .await;
    alice.agent.send("hi").await.unwrap();
    bob.until(|e| matches!(e, PeerEvent::MessageReceived { .. }))
        .await;

    let summary = |messages: Vec<peerlink_peer_core::ChatMessage>| {
        messages
            .into_iter()
            .map(|m| (m.direction, m.author.to_string(), m.body))
            .collect::<Vec<_>>()
    };

    assert_eq!(
        summary(alice.agent.transcript().await.unwrap()),
        vec![
            (MessageDirection::Received, "bob".to_string(), "hello".to_string()),
            (MessageDirection::Sent, "alice".to_string(), "hi".to_string()),
        ]
    );
    assert_eq!(
        summary(bob.agent.transcript().await.unwrap()),
        vec![
            (MessageDirection::Sent, "bob".to_string(), "hello".to_string()),
            (MessageDirection::Received, "alice".to_string(), "hi".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_repeated_send_appends_distinct_messages() {
    let rendezvous = MemoryRendezvous::new();
    let mut alice = TestPeer::registered(&rendezvous, "alice").await;
    let mut bob = TestPeer::registered(&rendezvous, "bob").await;
    connect(&mut alice, &mut bob, "bob").await;

    let first = alice.agent.send("hi").await.unwrap();
    let second = alice.agent.send("hi").await.unwrap();
    assert!(second.id > first.id);

    let transcript = alice.agent.transcript().await.unwrap();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].id, first.id);
    assert_eq!(transcript[1].id, second.id);
}

#[tokio::test]
async fn test_hang_up_converges_both_sides_to_idle() {
    let rendezvous = MemoryRendezvous::new();
    let mut alice = TestPeer::registered(&rendezvous, "alice").await;
    let mut bob = TestPeer::registered(&rendezvous, "bob").await;
    connect_with_media(&mut alice, &mut bob, "bob").await;
    alice.agent.send("bye").await.unwrap();

    assert!(alice.agent.hang_up().await.unwrap());

    let closed = alice
        .until(|e| matches!(e, PeerEvent::ConnectionClosed { .. }))
        .await;
    assert!(matches!(
        closed.last(),
        Some(PeerEvent::ConnectionClosed { reason: CloseReason::LocalHangUp, .. })
    ));
    let closed = bob
        .until(|e| matches!(e, PeerEvent::ConnectionClosed { .. }))
        .await;
    assert!(matches!(
        closed.last(),
        Some(PeerEvent::ConnectionClosed { reason: CloseReason::RemoteHangUp, .. })
    ));

    for peer in [&alice, &bob] {
        peer.wait_state(LifecycleState::Idle).await;
        assert_eq!(peer.agent.current().await.unwrap(), None);
        assert!(peer.agent.transcript().await.unwrap().is_empty());
        assert_eq!(peer.preview.attached(), None);
        assert_eq!(peer.remote.attached(), None);
        assert_eq!(peer.device.live_streams(), 0);
        assert_eq!(peer.device.releases(), 1);
    }
}

#[tokio::test]
async fn test_teardown_is_idempotent() {
    let rendezvous = MemoryRendezvous::new();
    let mut alice = TestPeer::registered(&rendezvous, "alice").await;
    let mut bob = TestPeer::registered(&rendezvous, "bob").await;
    connect_with_media(&mut alice, &mut bob, "bob").await;

    // both sides hang up at once; each sees the other's close after its own
    let (a, b) = tokio::join!(alice.agent.hang_up(), bob.agent.hang_up());
    assert!(a.unwrap() || b.unwrap());
    assert!(!alice.agent.hang_up().await.unwrap());
    assert!(!bob.agent.hang_up().await.unwrap());

    for peer in [&mut alice, &mut bob] {
        let events = peer.drain().await;
        assert_eq!(count(&events, |e| matches!(e, PeerEvent::ConnectionClosed { .. })), 1);
        assert_eq!(
            count(&events, |e| matches!(
                e,
                PeerEvent::StateChanged { current: LifecycleState::Idle, .. }
            )),
            1
        );
        assert_eq!(peer.device.releases(), 1);
        assert_eq!(peer.device.double_releases(), 0);
    }
}

#[tokio::test]
async fn test_lifecycle_states_are_published() {
    let rendezvous = MemoryRendezvous::new();
    let mut alice = TestPeer::unregistered(&rendezvous, Default::default());
    let mut bob = TestPeer::registered(&rendezvous, "bob").await;

    assert_eq!(alice.agent.state().await.unwrap(), LifecycleState::Unnamed);
    alice.agent.register("alice").await.unwrap();
    connect(&mut alice, &mut bob, "bob").await;
    alice.agent.hang_up().await.unwrap();

    let states: Vec<_> = alice
        .until(|e| matches!(e, PeerEvent::StateChanged { current: LifecycleState::Idle, previous: LifecycleState::Active }))
        .await
        .into_iter()
        .filter_map(|e| match e {
            PeerEvent::StateChanged { current, .. } => Some(current),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            LifecycleState::Idle,
            LifecycleState::Pending,
            LifecycleState::Active,
            LifecycleState::Idle
        ]
    );
}
