use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// This struct aggregates all configuration parameters required to run the
/// roomcast server, covering the network listeners, token validation, the
/// membership database and the cross-instance pub/sub bus.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Network settings for the server processes.
    pub server: ServerSettings,
    /// Token validation and cookie settings.
    pub auth: AuthSettings,
    /// Connection settings for the membership database.
    pub database: DatabaseSettings,
    /// Connection settings for the cross-instance pub/sub bus.
    pub pubsub: PubSubSettings,
}

/// Configuration settings for the server listeners.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    /// The host address (e.g., "127.0.0.1" or "0.0.0.0") the server will bind to.
    pub host: String,
    /// The port of the REST backend that owns user/chat CRUD.
    pub backend_port: u16,
    /// The port the WebSocket listener binds to.
    pub websocket_port: u16,
    /// Enables verbose logging when set.
    pub debug: bool,
}

/// Settings for validating the access tokens presented at the upgrade.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    /// Secret used to verify the HS256 signature of access tokens.
    pub jwt_secret: String,
    /// Domain the auth subsystem scopes its cookies to.
    pub cookie_domain: String,
}

/// Settings for the membership database.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    /// SQL connection URL of the membership database.
    pub url: String,
}

/// Settings for the external pub/sub bus.
///
/// An empty `url` selects the in-process loopback bus, which limits the
/// deployment to a single instance.
#[derive(Debug, Deserialize, Clone)]
pub struct PubSubSettings {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Client name announced to the bus for observability.
    pub client_name: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub auth: Option<PartialAuthSettings>,
    pub database: Option<PartialDatabaseSettings>,
    pub pubsub: Option<PartialPubSubSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub backend_port: Option<u16>,
    pub websocket_port: Option<u16>,
    pub debug: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialAuthSettings {
    pub jwt_secret: Option<String>,
    pub cookie_domain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialDatabaseSettings {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialPubSubSettings {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_name: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                backend_port: 4000,
                websocket_port: 8080,
                debug: false,
            },
            auth: AuthSettings {
                jwt_secret: String::new(),
                cookie_domain: String::new(),
            },
            database: DatabaseSettings { url: String::new() },
            pubsub: PubSubSettings {
                url: String::new(),
                username: String::new(),
                password: String::new(),
                client_name: String::new(),
            },
        }
    }
}
