//! WebSocket listener and upgrade handshake.
//!
//! One route accepts the protocol upgrade. Authentication happens inside
//! the handshake header callback: a missing `access_token` cookie is
//! rejected with HTTP 400, an invalid or expired token with 401, and a
//! refresh token with 400. Accepted sockets become clients.

use std::sync::{Arc, OnceLock};

use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::protocol::WebSocketConfig;

use crate::client::connection::MAX_MESSAGE_SIZE;
use crate::client::Client;
use crate::config::Settings;
use crate::hub::Hub;
use crate::transport::auth::{self, TokenClaims};
use crate::utils::FanoutError;

/// Accept connections until the hub's shutdown signal fires.
pub async fn start_websocket_server(
    addr: String,
    hub: Arc<Hub>,
    settings: Settings,
) -> Result<(), FanoutError> {
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| FanoutError::Internal(format!("failed to bind {addr}: {e}")))?;

    info!("WebSocket server listening on ws://{addr}");

    let shutdown = hub.shutdown_signal();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("No longer accepting new connections");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {e}");
                        continue;
                    }
                };
                let hub = hub.clone();
                let settings = settings.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, hub, settings).await {
                        warn!("Connection from {peer} terminated during setup: {e}");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    hub: Arc<Hub>,
    settings: Settings,
) -> Result<(), FanoutError> {
    let claims_slot: Arc<OnceLock<TokenClaims>> = Arc::new(OnceLock::new());

    let slot = claims_slot.clone();
    let secret = settings.auth.jwt_secret.clone();
    let callback = move |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let cookie_header = req
            .headers()
            .get("cookie")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        let Some(token) = auth::token_from_cookies(cookie_header) else {
            return Err(reject(StatusCode::BAD_REQUEST, "missing access_token cookie"));
        };

        let claims = match auth::validate_token(&secret, token) {
            Ok(claims) => claims,
            Err(e) => return Err(reject(StatusCode::UNAUTHORIZED, &e.to_string())),
        };

        if claims.is_refresh {
            return Err(reject(
                StatusCode::BAD_REQUEST,
                "refresh tokens cannot open a connection",
            ));
        }

        let _ = slot.set(claims);
        Ok(response)
    };

    let config = WebSocketConfig::default()
        .max_message_size(Some(MAX_MESSAGE_SIZE))
        .max_frame_size(Some(MAX_MESSAGE_SIZE));

    let socket = tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(config))
        .await
        .map_err(|e| FanoutError::Handshake(e.to_string()))?;

    let claims = claims_slot
        .get()
        .cloned()
        .ok_or_else(|| FanoutError::Internal("handshake produced no claims".to_string()))?;

    let user_id = claims.user_id.clone();
    Client::connect(socket, claims, &hub).await?;
    info!("Client with id {user_id} connected");
    Ok(())
}

fn reject(status: StatusCode, body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
}
