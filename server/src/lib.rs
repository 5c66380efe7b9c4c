//! rce agent: runs whitelisted commands on behalf of remote callers
//!
//! A caller starts a command by name, gets back an opaque id, and then polls
//! its status, waits for it, or stops it. The core is [`Server`]; the
//! listener and session modules put it on the network.

pub mod command;
pub mod config;
pub mod error;
pub mod listener;
pub mod policy;
pub mod server;
pub mod service;
pub mod session;

pub use config::{AgentSettings, ServerArgs, ServerConfig};
pub use error::{AgentError, ConfigError};
pub use listener::{bind, ServerHandle};
pub use policy::SecurityPolicy;
pub use server::Server;
