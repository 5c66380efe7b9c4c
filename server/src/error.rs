//! Agent error types
//!
//! [`ConfigError`] is startup-fatal: the agent refuses to start. [`AgentError`]
//! is returned per request and never stops the agent. A command that fails to
//! launch or exits nonzero is neither; it shows up as a `Fail` status.

use rce_shared::tls::TlsError;
use rce_shared::{ErrorKind, RpcError, Status};
use thiserror::Error;
use tokio::runtime::TryCurrentError;

use crate::command::WhitelistError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("allow-any-command cannot be combined with a command whitelist")]
    ConflictingPolicy,

    #[error("allow-any-command without TLS requires disable-security")]
    InsecureConfig,

    #[error("whitelist: {0}")]
    Whitelist(#[from] WhitelistError),

    #[error("TLS: {0}")]
    Tls(#[from] TlsError),
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("command not allowed: {0}")]
    CommandNotAllowed(String),

    #[error("command id {0} not found")]
    NotFound(String),

    #[error("duplicate command id {0}")]
    DuplicateId(String),

    #[error("cannot launch command: {0}")]
    NoRuntime(#[from] TryCurrentError),

    /// The caller gave up waiting. Carries the last status observed before
    /// the command was reaped.
    #[error("wait on command {} cancelled", .0.id)]
    Cancelled(Box<Status>),
}

impl AgentError {
    /// The kind reported to remote callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::UnknownCommand(_) => ErrorKind::InvalidArgument,
            AgentError::CommandNotAllowed(_) => ErrorKind::PermissionDenied,
            AgentError::NotFound(_) => ErrorKind::NotFound,
            AgentError::DuplicateId(_) => ErrorKind::AlreadyExists,
            AgentError::NoRuntime(_) => ErrorKind::Internal,
            AgentError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    pub fn to_rpc(&self) -> RpcError {
        RpcError::new(self.kind(), self.to_string())
    }
}
