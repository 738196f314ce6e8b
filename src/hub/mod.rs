//! The `hub` module is the core of the fan-out engine.
//!
//! It contains the following main components:
//!
//! - `Hub`: The per-process owner of all rooms and the bridge to the pub/sub bus.
//! - `Room`: The local subscriber set for one logical chat room.
//! - `Message`: The wire messages exchanged with clients and across the bus.
//!
//! The hub is responsible for routing every message arriving on the bus to
//! the local room it addresses.

pub mod engine;
pub mod message;
pub mod room;

pub use engine::Hub;
pub use message::{ClientMessage, ErrorMessage, Message};
pub use room::Room;

#[cfg(test)]
mod tests;
