//! Error types for the fan-out core.
//!
//! Errors local to one client never propagate past its lifecycle: they
//! terminate that client and are logged. The only fatal error is the loss
//! of the pub/sub stream, which the hub reports so the process can exit
//! and be restarted by the orchestrator.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FanoutError {
    /// The WebSocket connection was closed by either side.
    #[error("websocket connection closed")]
    ConnectionClosed,

    /// A client addressed a room it is not a member of.
    #[error("room access denied: {0}")]
    RoomAccess(String),

    /// An inbound frame exceeded the maximum message size.
    #[error("message exceeds maximum size")]
    MessageTooLarge,

    /// A socket write did not complete within the write deadline.
    #[error("write operation timed out")]
    WriteTimeout,

    /// No frame (and no pong) arrived within the read deadline.
    #[error("read operation timed out")]
    ReadTimeout,

    /// An inbound frame was not a valid protocol message.
    #[error("invalid message format at offset {offset}: {detail}")]
    InvalidMessage { offset: usize, detail: String },

    /// The transport failed in a way other than a clean close.
    #[error("client disconnected: {0}")]
    ClientDisconnect(String),

    /// The membership oracle could not be queried.
    #[error("database access error: {0}")]
    DbAccess(String),

    /// A publish to the cross-instance bus failed or timed out.
    #[error("failed to publish message to the bus: {0}")]
    BusPublishFailed(String),

    /// The dedicated pub/sub subscriber stream ended. Fatal.
    #[error("pub/sub stream lost")]
    BusStreamLost,

    /// Graceful shutdown did not finish before its deadline.
    #[error("graceful shutdown timed out")]
    ShutdownTimeout,

    /// The access token presented at the upgrade was rejected.
    #[error("invalid access token: {0}")]
    InvalidToken(String),

    /// The WebSocket handshake itself failed or was rejected.
    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    /// A bug or unexpected runtime condition inside the server.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FanoutError {
    /// Short human tag used in error frames and log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            FanoutError::ConnectionClosed => "Connection Closed",
            FanoutError::RoomAccess(_) => "Access Denied",
            FanoutError::MessageTooLarge => "Message Too Large",
            FanoutError::WriteTimeout => "Write Timeout",
            FanoutError::ReadTimeout => "Read Timeout",
            FanoutError::InvalidMessage { .. } => "Invalid Message",
            FanoutError::ClientDisconnect(_) => "Client Disconnected",
            FanoutError::DbAccess(_) => "Database Error",
            FanoutError::BusPublishFailed(_) => "Publish Failed",
            FanoutError::BusStreamLost => "Bus Stream Lost",
            FanoutError::ShutdownTimeout => "Shutdown Timeout",
            FanoutError::InvalidToken(_) => "Invalid Access Token",
            FanoutError::Handshake(_) => "Upgrade Failed",
            FanoutError::Internal(_) => "Internal Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FanoutError;

    #[test]
    fn tags_are_stable() {
        assert_eq!(
            FanoutError::RoomAccess("r1".to_string()).tag(),
            "Access Denied"
        );
        assert_eq!(FanoutError::MessageTooLarge.tag(), "Message Too Large");
        assert_eq!(
            FanoutError::InvalidMessage {
                offset: 4,
                detail: "expected string".to_string()
            }
            .tag(),
            "Invalid Message"
        );
    }

    #[test]
    fn display_includes_detail() {
        let err = FanoutError::BusPublishFailed("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}
