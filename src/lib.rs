//! Client library for the rce agent
//!
//! Connects to an agent over TCP (optionally mutual TLS) and exposes the
//! command lifecycle: start a whitelisted command, poll or wait for its
//! status, stop it, list what the agent is tracking.

pub mod client;
pub mod connection;
pub mod error;
pub mod transport;

pub use client::Client;
pub use connection::ConnectionConfig;
pub use error::ClientError;
pub use rce_shared::{ErrorKind, State, Status};
