//! Decides what a caller may run

use std::path::Path;

use crate::command::Whitelist;
use crate::error::{AgentError, ConfigError};

/// A command name resolved to something the agent may execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub name: String,
    pub path: String,
    pub fixed_args: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum SecurityPolicy {
    /// Only names listed in the whitelist
    Whitelist(Whitelist),
    /// The name is itself an absolute executable path
    AllowAny,
    /// Nothing configured, every start is rejected
    DenyAll,
}

impl SecurityPolicy {
    /// Validate the startup combination of settings
    ///
    /// Allow-any and a whitelist are mutually exclusive. Allow-any over a
    /// plaintext transport must be explicitly opted into with
    /// `disable_security`.
    pub fn new(
        allowed: Option<Whitelist>,
        allow_any: bool,
        tls_configured: bool,
        disable_security: bool,
    ) -> Result<Self, ConfigError> {
        let allowed = allowed.filter(|w| !w.is_empty());

        match (allowed, allow_any) {
            (Some(_), true) => Err(ConfigError::ConflictingPolicy),
            (None, true) if !tls_configured && !disable_security => {
                Err(ConfigError::InsecureConfig)
            }
            (None, true) => Ok(SecurityPolicy::AllowAny),
            (Some(whitelist), false) => Ok(SecurityPolicy::Whitelist(whitelist)),
            (None, false) => Ok(SecurityPolicy::DenyAll),
        }
    }

    /// Resolve a caller-supplied name
    pub fn resolve(&self, name: &str) -> Result<ResolvedCommand, AgentError> {
        match self {
            SecurityPolicy::Whitelist(whitelist) => {
                let spec = whitelist
                    .find_by_name(name)
                    .map_err(|_| AgentError::UnknownCommand(name.to_string()))?;
                Ok(ResolvedCommand {
                    name: spec.name.clone(),
                    path: spec.path().to_string(),
                    fixed_args: spec.args().to_vec(),
                })
            }
            SecurityPolicy::AllowAny => {
                if !Path::new(name).is_absolute() {
                    return Err(AgentError::CommandNotAllowed(name.to_string()));
                }
                Ok(ResolvedCommand {
                    name: name.to_string(),
                    path: name.to_string(),
                    fixed_args: Vec::new(),
                })
            }
            SecurityPolicy::DenyAll => Err(AgentError::CommandNotAllowed(name.to_string())),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SecurityPolicy::Whitelist(w) => format!("whitelist ({} commands)", w.len()),
            SecurityPolicy::AllowAny => "allow any command".to_string(),
            SecurityPolicy::DenyAll => "deny all".to_string(),
        }
    }
}
