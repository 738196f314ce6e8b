//! End-to-end tests for the fan-out engine.
//!
//! These run real hubs over real sockets, with the in-process loopback bus
//! standing in for the external pub/sub and a static membership map
//! standing in for the database.

mod client_lifecycle;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::client::Client;
use crate::config::Settings;
use crate::hub::Hub;
use crate::membership::StaticMembership;
use crate::pubsub::LoopbackBus;
use crate::transport::auth::{self, TokenClaims};
use crate::transport::start_websocket_server;

const TEST_SECRET: &str = "integration-secret";

type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.auth.jwt_secret = TEST_SECRET.to_string();
    settings
}

/// Spin up one full instance: hub, run loop and websocket listener.
async fn start_instance(bus: LoopbackBus, membership: StaticMembership) -> (Arc<Hub>, String) {
    let hub = Hub::new(Arc::new(membership), Arc::new(bus));
    tokio::spawn(hub.clone().run());

    let port = portpicker::pick_unused_port().expect("No free ports");
    let addr = format!("127.0.0.1:{port}");
    tokio::spawn(start_websocket_server(
        addr.clone(),
        hub.clone(),
        test_settings(),
    ));

    // Give the server a moment to start up
    tokio::time::sleep(Duration::from_millis(100)).await;
    (hub, addr)
}

/// Connect through the real upgrade endpoint with a signed cookie.
async fn connect_user(addr: &str, user: &str) -> ClientSocket {
    let token = auth::sign_token(TEST_SECRET, user, false, chrono::Duration::minutes(10))
        .expect("sign token");
    let mut request = format!("ws://{addr}/")
        .into_client_request()
        .expect("client request");
    request.headers_mut().insert(
        "Cookie",
        format!("access_token={token}").parse().expect("header"),
    );
    let (socket, _) = connect_async(request).await.expect("WebSocket handshake failed");
    socket
}

/// Read frames until a text frame arrives and parse it as JSON.
async fn recv_json(socket: &mut ClientSocket, wait: Duration) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(wait, socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match frame {
            WsMessage::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("valid JSON frame")
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Build a connected server-side `Client` directly over a socket pair,
/// bypassing the upgrade endpoint. Used by the lifecycle tests.
async fn raw_client_pair(hub: &Arc<Hub>, user: &str) -> (Arc<Client>, ClientSocket) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        tokio_tungstenite::accept_async(stream).await.expect("server handshake")
    });

    let (client_side, _) = connect_async(format!("ws://{addr}/"))
        .await
        .expect("client handshake");
    let server_side = accept.await.expect("accept task");

    let claims = TokenClaims {
        user_id: user.to_string(),
        is_refresh: false,
        exp: (chrono::Utc::now() + chrono::Duration::minutes(10)).timestamp() as usize,
    };
    let client = Client::connect(server_side, claims, hub)
        .await
        .expect("client connect");
    (client, client_side)
}
