//! Logging setup for the server binary.

use tracing::Level;

/// Install the global tracing subscriber.
///
/// The configuration's debug flag selects between info and debug
/// verbosity. Repeated calls are no-ops, so tests may initialize freely.
pub fn init(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}
