//! Client error types

use std::time::Duration;

use rce_shared::{ErrorKind, RpcError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("not connected, call open first")]
    NotConnected,

    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid server name {0}")]
    InvalidServerName(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,

    /// The agent rejected the request
    #[error("{kind:?}: {message}")]
    Remote { kind: ErrorKind, message: String },

    #[error("unexpected reply: {0}")]
    UnexpectedReply(&'static str),
}

impl ClientError {
    /// The agent's error kind, when the agent answered with an error
    pub fn remote_kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        ClientError::Remote {
            kind: err.error_kind(),
            message: err.message,
        }
    }
}
