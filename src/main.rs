//! CLI for roomcast
//!
//! Subcommands:
//! - `server`: run the fan-out server
//! - `client`: run a simple smoke-test client (connects, sends one message)

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use roomcast::config::load_config;
use roomcast::hub::Hub;
use roomcast::membership::PostgresMembership;
use roomcast::pubsub::{LoopbackBus, PubSub, RedisBus};
use roomcast::transport::{auth, start_websocket_server};
use roomcast::utils::logging;

/// How long graceful shutdown may take before remaining clients are dropped.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "roomcast")]
enum Command {
    /// Start the fan-out server
    Server,
    /// Run the smoke-test client (connects, sends one message, prints replies)
    Client {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        /// User id to mint a local token for
        #[arg(long, default_value = "smoke-test-user")]
        user: String,
        /// Room to send the test message to
        #[arg(long, default_value = "r1")]
        room: String,
    },
}

#[tokio::main]
async fn main() {
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(settings.server.debug);

    match cmd {
        Command::Server => {
            if let Err(e) = run_server(settings).await {
                error!("Server failed: {}", e);
                std::process::exit(1);
            }
        }
        Command::Client { url, user, room } => {
            if let Err(e) = run_client(settings, &url, &user, &room).await {
                error!("Client failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn run_server(settings: roomcast::config::Settings) -> Result<(), Box<dyn std::error::Error>> {
    let membership = Arc::new(PostgresMembership::connect_with_retry(&settings.database.url).await?);

    let bus: Arc<dyn PubSub> = if settings.pubsub.url.is_empty() {
        info!("No pub/sub url configured, using the in-process loopback bus");
        Arc::new(LoopbackBus::new())
    } else {
        Arc::new(RedisBus::connect(&settings.pubsub).await?)
    };

    let hub = Hub::new(membership, bus);

    // The hub run loop lives for the whole process. Losing the pub/sub
    // stream is fatal; the orchestrator restarts the process.
    {
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = hub.run().await {
                error!("Multi instance pub sub stream failed: {}", e);
                std::process::exit(1);
            }
        });
    }

    let addr = format!(
        "{}:{}",
        settings.server.host, settings.server.websocket_port
    );
    tokio::select! {
        result = start_websocket_server(addr, hub.clone(), settings.clone()) => {
            if let Err(e) = result {
                error!("WebSocket server exited unexpectedly: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    hub.graceful_shutdown(SHUTDOWN_TIMEOUT).await?;
    Ok(())
}

async fn run_client(
    settings: roomcast::config::Settings,
    url: &str,
    user: &str,
    room: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    // Mint a short-lived token locally; in production the auth subsystem
    // sets this cookie.
    let token = auth::sign_token(
        &settings.auth.jwt_secret,
        user,
        false,
        chrono::Duration::minutes(10),
    )?;

    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        "Cookie",
        format!("access_token={token}").parse().expect("valid header"),
    );

    let (mut ws_stream, _response) = connect_async(request).await?;

    let outbound = json!({ "room": room, "data": "Hello from the smoke test", "iv": "00" });
    ws_stream
        .send(WsMessage::text(outbound.to_string()))
        .await?;

    // Read whatever comes back first: our own fan-out copy if we are a
    // member of the room, or an error frame if we are not.
    if let Some(Ok(WsMessage::Text(incoming))) = ws_stream.next().await {
        println!("Incoming: {incoming}");
    }

    ws_stream.close(None).await?;
    Ok(())
}
