//! Lifecycle manager for a local Open WebUI container and its Docker Model
//! Runner integration function.

pub mod api;
pub mod auth;
pub mod config;
pub mod container;
pub mod error;
pub mod functions;
pub mod http;
pub mod integration;
pub mod logging;
pub mod retry;

pub use error::{BridgeError, BridgeResult};
