//! End-to-end hub behaviour over the in-memory transport.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{
    handler_fn, Connection, ConnectionConfig, HandlerError, Hub, HubError, MessageHandler, UserId,
};
use switchboard_protocol::envelope::kinds;
use switchboard_protocol::Envelope;
use switchboard_transport::memory::{self, MemoryPeer};
use switchboard_transport::WireFrame;

/// Answers `ping` with `pong`, echoes everything else, fails on `fail` and
/// panics on `panic`.
fn handler() -> Arc<dyn MessageHandler> {
    handler_fn(|_conn: &Arc<Connection>, envelope: Envelope| {
        match envelope.kind.as_str() {
            kinds::PING => Ok(Envelope::pong(envelope.data)),
            "fail" => Err(HandlerError::new("nope")),
            "panic" => panic!("handler blew up"),
            _ => Ok(envelope),
        }
    })
}

async fn connect(hub: &Hub, user: impl Into<UserId>, heartbeat: bool) -> (Arc<Connection>, MemoryPeer) {
    let (transport, peer) = memory::duplex();
    let conn = hub.add(transport, user, heartbeat, handler()).await.unwrap();
    (conn, peer)
}

/// Poll until `cond` holds, failing after a generous deadline.
async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn ping_from_user_42_gets_pong() {
    let hub = Hub::default();
    let (_conn, mut peer) = connect(&hub, 42, false).await;

    assert!(peer.send_text(r#"{"type":"ping","data":null}"#));

    match peer.recv().await {
        Some(WireFrame::Text(text)) => assert_eq!(text, r#"{"type":"pong","data":null}"#),
        other => panic!("Expected pong text frame, got {:?}", other),
    }

    let stats = hub.stats();
    assert_eq!(stats.messages_received, 1);
    assert_eq!(stats.messages_sent, 1);
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let hub = Hub::default();
    let (_conn, mut peer) = connect(&hub, "alice", false).await;

    for i in 0..50 {
        assert_eq!(hub.set_message("alice", &Envelope::new("seq", i)).await.unwrap(), 1);
    }
    for i in 0..50 {
        assert_eq!(peer.recv_envelope().await, Some(Envelope::new("seq", i)));
    }
}

#[tokio::test]
async fn set_message_reaches_every_connection_of_the_user() {
    let hub = Hub::default();
    let (_a1, mut p1) = connect(&hub, "alice", false).await;
    let (_a2, mut p2) = connect(&hub, "alice", false).await;
    let (_b1, mut p3) = connect(&hub, "bob", false).await;

    let envelope = Envelope::new("notify", json!({"text": "hi"}));
    assert_eq!(hub.set_message("alice", &envelope).await.unwrap(), 2);

    assert_eq!(p1.recv_envelope().await, Some(envelope.clone()));
    assert_eq!(p2.recv_envelope().await, Some(envelope));
    assert!(p3.try_recv().is_none());
    assert_eq!(hub.stats().messages_sent, 2);
}

#[tokio::test]
async fn broadcast_skips_closed_connection() {
    let hub = Hub::default();
    let (a1, _p1) = connect(&hub, "a", false).await;
    let (_a2, mut p2) = connect(&hub, "a", false).await;
    let (_b1, mut p3) = connect(&hub, "b", false).await;

    a1.close();
    let before = hub.stats().messages_sent;

    let envelope = Envelope::empty("announce");
    assert_eq!(hub.broadcast(&envelope).await.unwrap(), 2);
    assert_eq!(hub.stats().messages_sent, before + 2);

    assert_eq!(p2.recv_envelope().await, Some(envelope.clone()));
    assert_eq!(p3.recv_envelope().await, Some(envelope));
}

#[tokio::test]
async fn stats_after_adds_and_closes() {
    let hub = Hub::default();
    let mut conns = Vec::new();
    let mut peers = Vec::new();
    for user in ["u1", "u1", "u2", "u3", "u3"] {
        let (conn, peer) = connect(&hub, user, false).await;
        conns.push(conn);
        peers.push(peer);
    }

    conns[0].close();
    conns[3].close();

    let stats = hub.stats();
    assert_eq!(stats.total_connections, 5);
    assert_eq!(stats.active_connections, 3);
    assert_eq!(hub.connection_count(), 3);
    assert_eq!(hub.user_connection_count(&UserId::from("u1")), 1);
}

#[tokio::test]
async fn peer_hangup_unregisters_connection() {
    let hub = Hub::default();
    let (conn, mut peer) = connect(&hub, "carol", false).await;
    let carol = UserId::from("carol");

    peer.disconnect();

    eventually(|| hub.user_connection_count(&carol) == 0).await;
    assert!(!conn.is_connected());
    assert_eq!(hub.active_users(), 0);
    assert_eq!(hub.stats().active_connections, 0);
}

#[tokio::test]
async fn handler_error_becomes_error_envelope() {
    let hub = Hub::default();
    let (conn, mut peer) = connect(&hub, "dave", false).await;

    assert!(peer.send_envelope(&Envelope::empty("fail")));
    assert_eq!(peer.recv_envelope().await, Some(Envelope::error("nope")));
    assert!(conn.is_connected());
}

#[tokio::test]
async fn handler_panic_becomes_error_envelope() {
    let hub = Hub::default();
    let (conn, mut peer) = connect(&hub, "erin", false).await;

    assert!(peer.send_envelope(&Envelope::empty("panic")));
    let reply = peer.recv_envelope().await.unwrap();
    assert!(reply.is_error());
    assert_eq!(reply.data, json!("internal error while handling message"));

    // The connection survives and keeps serving.
    assert!(peer.send_envelope(&Envelope::new("echo", 1)));
    assert_eq!(peer.recv_envelope().await, Some(Envelope::new("echo", 1)));
    assert!(conn.is_connected());
}

#[tokio::test]
async fn malformed_frame_does_not_count_as_received() {
    let hub = Hub::default();
    let (conn, mut peer) = connect(&hub, "frank", false).await;

    assert!(peer.send_text("not json at all"));
    assert!(peer.send_envelope(&Envelope::empty("echo")));

    assert_eq!(peer.recv_envelope().await, Some(Envelope::empty("echo")));
    assert!(conn.is_connected());
    assert_eq!(hub.stats().messages_received, 1);
}

#[tokio::test]
async fn rejected_upgrade_registers_nothing() {
    let hub = Hub::default();
    let (transport, peer) = memory::duplex();
    peer.reject_upgrade();

    let result = hub.add(transport, "gina", false, handler()).await;
    assert!(matches!(result, Err(HubError::Transport(_))));
    assert_eq!(hub.connection_count(), 0);
    assert_eq!(hub.stats().total_connections, 0);
}

#[tokio::test]
async fn failed_write_unregisters_connection() {
    let hub = Hub::default();
    let (conn, peer) = connect(&hub, "hank", false).await;

    peer.fail_writes(true);
    assert_eq!(hub.set_message("hank", &Envelope::empty("x")).await.unwrap(), 1);

    eventually(|| hub.connection_count() == 0).await;
    assert!(!conn.is_connected());
    assert_eq!(hub.stats().active_connections, 0);
}

#[tokio::test]
async fn direct_send_after_close_is_rejected() {
    let hub = Hub::default();
    let (conn, _peer) = connect(&hub, "ivy", false).await;

    conn.close();
    assert!(matches!(
        conn.direct_send(&Envelope::empty("late")).await,
        Err(HubError::Closed)
    ));
    assert!(!conn.send(&Envelope::empty("late")).await);
}

#[tokio::test]
async fn concurrent_closes_close_transport_once() {
    let hub = Hub::default();
    let (conn, mut peer) = connect(&hub, "jo", true).await;

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let conn = conn.clone();
            tokio::spawn(async move { conn.close() })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    while peer.recv().await.is_some() {}
    assert_eq!(peer.close_count(), 1);
    assert_eq!(hub.stats().active_connections, 0);
    assert_eq!(hub.connection_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn silent_peer_is_dropped_by_heartbeat() {
    let config = ConnectionConfig {
        read_timeout: Duration::from_secs(3600),
        ..Default::default()
    };
    let hub = Hub::new(config);
    let (conn, mut peer) = connect(&hub, "kim", true).await;

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(conn.is_connected());
    let mut pings = 0;
    while let Some(frame) = peer.try_recv() {
        if frame == WireFrame::Ping(Default::default()) {
            pings += 1;
        }
    }
    assert_eq!(pings, 2);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!conn.is_connected());
    assert_eq!(hub.connection_count(), 0);
    assert_eq!(hub.stats().active_connections, 0);
}

#[tokio::test]
async fn cleanup_closes_all_connections() {
    let hub = Hub::default();
    let mut peers = Vec::new();
    for user in 0..4u64 {
        let (_conn, peer) = connect(&hub, user, true).await;
        peers.push(peer);
    }

    hub.cleanup();
    assert_eq!(hub.connection_count(), 0);
    assert_eq!(hub.stats().active_connections, 0);

    for peer in &mut peers {
        while peer.recv().await.is_some() {}
        assert_eq!(peer.close_count(), 1);
    }
}
