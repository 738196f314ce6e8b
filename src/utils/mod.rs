//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `roomcast` application.
//!
//! This module centralizes reusable components, such as the error types
//! shared by the fan-out core and the logging setup.

pub mod error;
pub mod logging;

pub use error::FanoutError;
