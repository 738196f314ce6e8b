//! The `client` module defines the representation of one authenticated
//! WebSocket connection.
//!
//! It provides the `Client` struct, which owns the connection's send queue,
//! its set of joined rooms, the per-connection statistics, and the
//! reader/writer lifecycle with cooperative cancellation.

pub mod connection;

pub use connection::{Client, ConnState, EnqueueOutcome};
