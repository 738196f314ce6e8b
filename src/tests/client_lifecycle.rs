use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::client::{ConnState, EnqueueOutcome};
use crate::hub::{Hub, Message};
use crate::membership::StaticMembership;
use crate::pubsub::LoopbackBus;

use super::raw_client_pair;

fn lifecycle_hub(user: &str, rooms: &[&str]) -> Arc<Hub> {
    Hub::new(
        Arc::new(StaticMembership::new().grant(user, rooms)),
        Arc::new(LoopbackBus::new()),
    )
}

fn sample_message() -> Message {
    Message {
        room: "r1".to_string(),
        data: "payload".to_string(),
        iv: "00".to_string(),
        sender_id: "someone".to_string(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn room_membership_is_symmetric() {
    let hub = lifecycle_hub("alice", &["r1", "r2"]);
    let (client, _socket) = raw_client_pair(&hub, "alice").await;

    assert_eq!(client.state(), ConnState::Connected);
    let mut rooms = client.room_ids();
    rooms.sort();
    assert_eq!(rooms, vec!["r1".to_string(), "r2".to_string()]);
    for id in ["r1", "r2"] {
        let room = hub.find_room(id).expect("room registered");
        assert!(room.contains("alice"));
        assert_eq!(room.client_count(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cleanup_is_idempotent_and_terminal() {
    let hub = lifecycle_hub("alice", &["r1"]);
    let (client, _socket) = raw_client_pair(&hub, "alice").await;
    let room = hub.find_room("r1").unwrap();

    assert_eq!(client.try_enqueue(&sample_message()), EnqueueOutcome::Delivered);

    client.cleanup().await;

    assert_eq!(client.state(), ConnState::Disconnected);
    assert!(client.room_ids().is_empty());
    assert!(!room.contains("alice"));
    assert_eq!(room.client_count(), 0);
    // The send queue is closed once cleanup has run.
    assert_eq!(client.try_enqueue(&sample_message()), EnqueueOutcome::Closed);

    // Any number of further calls, from any task, settle on the same state.
    let concurrent = client.clone();
    let again = tokio::spawn(async move { concurrent.cleanup().await });
    client.cleanup().await;
    again.await.unwrap();
    assert_eq!(client.state(), ConnState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cleanup_sends_a_going_away_close_frame() {
    let hub = lifecycle_hub("alice", &["r1"]);
    let (client, mut socket) = raw_client_pair(&hub, "alice").await;

    client.cleanup().await;

    let frame = loop {
        match tokio::time::timeout(Duration::from_secs(5), socket.next()).await {
            Ok(Some(Ok(WsMessage::Close(frame)))) => break frame,
            Ok(Some(Ok(_))) => continue,
            other => panic!("expected close frame, got {other:?}"),
        }
    };
    let frame = frame.expect("close frame carries a reason");
    assert_eq!(frame.code, CloseCode::Away);
    assert_eq!(frame.reason.as_str(), "Server closing connection");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn graceful_close_is_idempotent() {
    let hub = lifecycle_hub("alice", &["r1"]);
    let (client, mut socket) = raw_client_pair(&hub, "alice").await;

    // Drive the client side so the close handshake can complete.
    let reader = tokio::spawn(async move {
        let mut closes = 0usize;
        while let Some(Ok(frame)) = socket.next().await {
            if matches!(frame, WsMessage::Close(_)) {
                closes += 1;
            }
        }
        closes
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    client
        .initiate_graceful_close(deadline, CloseCode::Away, "Server is shutting down")
        .await;
    // Second call returns immediately: the state transition only happens once.
    client
        .initiate_graceful_close(deadline, CloseCode::Away, "Server is shutting down")
        .await;

    assert_eq!(client.state(), ConnState::Disconnected);
    assert_eq!(reader.await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disconnecting_peer_triggers_cleanup() {
    let hub = lifecycle_hub("alice", &["r1"]);
    let (client, socket) = raw_client_pair(&hub, "alice").await;
    let room = hub.find_room("r1").unwrap();

    drop(socket);

    // Disconnected is the last cleanup step, so every other effect is
    // visible once it is observed.
    let gone = async {
        while client.state() != ConnState::Disconnected {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), gone)
        .await
        .expect("client was never cleaned up");
    assert!(!room.contains("alice"));
    assert!(client.disconnect_error().is_some());
    assert!(client.last_activity_ms() > 0);
}
