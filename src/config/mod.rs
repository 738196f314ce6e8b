//! The `config` module handles the application's configuration management.
//!
//! It defines the structure of the application settings, provides default values,
//! and implements the logic for loading configuration from various sources,
//! such as configuration files and environment variables.
//!
//! This module uses the `config` crate for flexible and layered configuration.

pub mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::Settings;

pub use settings::{AuthSettings, DatabaseSettings, PubSubSettings, ServerSettings};

/// Loads application settings from file, environment, and defaults.
///
/// This function reads configuration values from:
/// 1. An optional `config/default` file (TOML/YAML/JSON).
/// 2. Environment variables with `__` separators (e.g., `SERVER__WEBSOCKET_PORT`).
///
/// Missing fields are filled using default values defined in `Settings::default()`;
/// unrecognized options are ignored.
///
/// # Environment Variable Examples
///
/// - `SERVER__HOST=0.0.0.0`
/// - `AUTH__JWT_SECRET=super-secret`
/// - `PUBSUB__URL=redis://127.0.0.1:6379`
///
/// # Errors
///
/// Returns an error if the config file cannot be parsed or deserialized.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("__"));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    Ok(Settings {
        server: ServerSettings {
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            backend_port: partial
                .server
                .as_ref()
                .and_then(|s| s.backend_port)
                .unwrap_or(default.server.backend_port),
            websocket_port: partial
                .server
                .as_ref()
                .and_then(|s| s.websocket_port)
                .unwrap_or(default.server.websocket_port),
            debug: partial
                .server
                .as_ref()
                .and_then(|s| s.debug)
                .unwrap_or(default.server.debug),
        },
        auth: AuthSettings {
            jwt_secret: partial
                .auth
                .as_ref()
                .and_then(|a| a.jwt_secret.clone())
                .unwrap_or(default.auth.jwt_secret),
            cookie_domain: partial
                .auth
                .as_ref()
                .and_then(|a| a.cookie_domain.clone())
                .unwrap_or(default.auth.cookie_domain),
        },
        database: DatabaseSettings {
            url: partial
                .database
                .as_ref()
                .and_then(|d| d.url.clone())
                .unwrap_or(default.database.url),
        },
        pubsub: PubSubSettings {
            url: partial
                .pubsub
                .as_ref()
                .and_then(|p| p.url.clone())
                .unwrap_or(default.pubsub.url),
            username: partial
                .pubsub
                .as_ref()
                .and_then(|p| p.username.clone())
                .unwrap_or(default.pubsub.username),
            password: partial
                .pubsub
                .as_ref()
                .and_then(|p| p.password.clone())
                .unwrap_or(default.pubsub.password),
            client_name: partial
                .pubsub
                .as_ref()
                .and_then(|p| p.client_name.clone())
                .unwrap_or(default.pubsub.client_name),
        },
    })
}

#[cfg(test)]
mod tests;
