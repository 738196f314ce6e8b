use serde::{Deserialize, Serialize};

/// A message as sent by a client.
///
/// `data` and `iv` are opaque to the server: clients encrypt payloads, the
/// server only routes them, unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub room: String,
    pub data: String,
    pub iv: String,
}

/// A message as delivered to clients and published across the bus.
///
/// This is the client message stamped with the authenticated sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub room: String,
    pub data: String,
    pub iv: String,
    pub sender_id: String,
}

impl Message {
    pub fn from_client(msg: ClientMessage, sender_id: String) -> Self {
        Self {
            room: msg.room,
            data: msg.data,
            iv: msg.iv,
            sender_id,
        }
    }
}

/// An error frame sent to a client. The connection stays open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}
