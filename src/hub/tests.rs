use std::sync::Arc;

use super::message::{ClientMessage, ErrorMessage, Message};
use super::Hub;
use crate::membership::StaticMembership;
use crate::pubsub::LoopbackBus;

fn test_hub() -> Arc<Hub> {
    Hub::new(
        Arc::new(StaticMembership::new()),
        Arc::new(LoopbackBus::new()),
    )
}

#[test]
fn inbound_message_deserializes_from_the_wire_shape() {
    let msg: ClientMessage =
        serde_json::from_str(r#"{"room":"r1","data":"cipher","iv":"00ff"}"#).unwrap();
    assert_eq!(msg.room, "r1");
    assert_eq!(msg.data, "cipher");
    assert_eq!(msg.iv, "00ff");
}

#[test]
fn outbound_message_carries_the_sender_id() {
    let inbound: ClientMessage =
        serde_json::from_str(r#"{"room":"r1","data":"cipher","iv":"00ff"}"#).unwrap();
    let outbound = Message::from_client(inbound, "user-a".to_string());

    let value: serde_json::Value =
        serde_json::from_str(&serde_json::to_string(&outbound).unwrap()).unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "room": "r1",
            "data": "cipher",
            "iv": "00ff",
            "sender_id": "user-a",
        })
    );
}

#[test]
fn bus_payloads_round_trip() {
    let message = Message {
        room: "r1".to_string(),
        data: "cipher".to_string(),
        iv: "00ff".to_string(),
        sender_id: "user-a".to_string(),
    };
    let payload = serde_json::to_string(&message).unwrap();
    let decoded: Message = serde_json::from_str(&payload).unwrap();
    assert_eq!(decoded, message);
}

#[test]
fn error_frame_omits_empty_details() {
    let frame = ErrorMessage {
        error: "Access Denied".to_string(),
        details: String::new(),
    };
    let json = serde_json::to_string(&frame).unwrap();
    assert_eq!(json, r#"{"error":"Access Denied"}"#);

    let frame = ErrorMessage {
        error: "Access Denied".to_string(),
        details: "You do not have permission to access room r2 or it does not exist".to_string(),
    };
    let json = serde_json::to_string(&frame).unwrap();
    assert!(json.contains("\"details\""));
}

#[tokio::test]
async fn rooms_are_created_lazily_and_reused() {
    let hub = test_hub();
    assert!(hub.find_room("r1").is_none());

    let (first, created) = hub.room("r1");
    assert!(created);
    let (second, created) = hub.room("r1");
    assert!(!created);
    assert!(Arc::ptr_eq(&first, &second));

    let found = hub.find_room("r1").unwrap();
    assert!(Arc::ptr_eq(&first, &found));
}

#[tokio::test]
async fn room_channel_names_follow_the_bus_contract() {
    let hub = test_hub();
    let (room, _) = hub.room("a1b2");
    assert_eq!(room.channel(), "room-a1b2");
}

#[tokio::test]
async fn graceful_shutdown_is_idempotent() {
    let hub = test_hub();
    hub.room("r1");

    let first = hub.graceful_shutdown(std::time::Duration::from_secs(2)).await;
    assert!(first.is_ok());
    let second = hub.graceful_shutdown(std::time::Duration::from_secs(2)).await;
    assert!(second.is_ok());
    assert!(hub.is_shutting_down());
}

#[tokio::test]
async fn room_shutdown_is_idempotent() {
    let hub = test_hub();
    let (room, _) = hub.room("r1");

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    let (count, result) = room.shutdown(deadline).await;
    assert_eq!(count, 0);
    assert!(result.is_ok());

    let (count, result) = room.shutdown(deadline).await;
    assert_eq!(count, 0);
    assert!(result.is_ok());
}
