//! # Roomcast
//!
//! `roomcast` is the realtime fan-out core of a horizontally scalable chat
//! backend. Clients hold a long-lived WebSocket connection to one of N
//! stateless server instances; a message sent on one instance is delivered
//! to every authorized recipient connected to any instance through an
//! external pub/sub bus, one channel per room.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `hub`: The per-process engine that owns all rooms and bridges the pub/sub bus.
//! - `client`: Represents one authenticated WebSocket connection and its lifecycle.
//! - `transport`: The WebSocket listener, handshake authentication and framing.
//! - `pubsub`: The cross-instance bus contract with Redis and in-process backends.
//! - `membership`: The oracle answering which rooms a user may join.
//! - `config`: Handles loading and managing server configuration.
//! - `utils`: Contains shared utilities, such as error types and logging setup.

pub mod client;
pub mod config;
pub mod hub;
pub mod membership;
pub mod pubsub;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
