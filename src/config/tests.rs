use super::settings::Settings;
use super::load_config;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.backend_port, 4000);
    assert_eq!(settings.server.websocket_port, 8080);
    assert!(!settings.server.debug);
    assert!(settings.auth.jwt_secret.is_empty());
    assert!(settings.pubsub.url.is_empty());
}

#[test]
fn load_config_from_environment_overrides_defaults() {
    std::env::set_var("SERVER__WEBSOCKET_PORT", "9090");
    std::env::set_var("AUTH__JWT_SECRET", "env_secret");
    std::env::set_var("PUBSUB__CLIENT_NAME", "roomcast-test");

    let cfg = load_config().expect("load_config failed");
    assert_eq!(cfg.server.websocket_port, 9090);
    assert_eq!(cfg.auth.jwt_secret, "env_secret");
    assert_eq!(cfg.pubsub.client_name, "roomcast-test");
    // Untouched sections keep their defaults
    assert_eq!(cfg.server.backend_port, 4000);
    assert!(cfg.database.url.is_empty());

    std::env::remove_var("SERVER__WEBSOCKET_PORT");
    std::env::remove_var("AUTH__JWT_SECRET");
    std::env::remove_var("PUBSUB__CLIENT_NAME");
}
