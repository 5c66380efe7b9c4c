//! Agent configuration: command-line flags, validation and assembly
//!
//! Everything is validated once here. A config that builds is safe to serve.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rce_shared::tls::TlsFiles;
use tokio_rustls::rustls;

use crate::command::{load_whitelist, Whitelist};
use crate::error::ConfigError;
use crate::policy::SecurityPolicy;

pub const DEFAULT_ADDR: &str = "127.0.0.1:5501";

/// Remote command execution agent
#[derive(Parser, Debug, Clone)]
#[command(name = "rce-agent", version, about)]
pub struct ServerArgs {
    /// Address to listen on
    #[arg(long, env = "RCE_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// YAML file listing the commands callers may run
    #[arg(long, env = "RCE_COMMANDS")]
    pub commands: Option<PathBuf>,

    /// Treat the command name as an absolute executable path and run anything
    #[arg(long, env = "RCE_ALLOW_ANY_COMMAND")]
    pub allow_any_command: bool,

    /// Permit --allow-any-command without TLS
    #[arg(long, env = "RCE_DISABLE_SECURITY")]
    pub disable_security: bool,

    /// Root CA certificate (PEM) used to verify clients
    #[arg(long, env = "RCE_TLS_CA")]
    pub tls_ca: Option<PathBuf>,

    /// Agent certificate chain (PEM)
    #[arg(long, env = "RCE_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// Agent private key (PEM)
    #[arg(long, env = "RCE_TLS_KEY")]
    pub tls_key: Option<PathBuf>,
}

impl ServerArgs {
    /// Read the whitelist file (if any) and produce a config
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let allowed_commands = self
            .commands
            .map(|path| load_whitelist(&path))
            .transpose()?;
        let tls = TlsFiles {
            root_cert: self.tls_ca,
            cert: self.tls_cert,
            key: self.tls_key,
        };

        Ok(ServerConfig {
            addr: self.addr,
            allowed_commands,
            allow_any_command: self.allow_any_command,
            disable_security: self.disable_security,
            tls: (!tls.is_empty()).then_some(tls),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub allowed_commands: Option<Whitelist>,
    pub allow_any_command: bool,
    pub disable_security: bool,
    pub tls: Option<TlsFiles>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            allowed_commands: None,
            allow_any_command: false,
            disable_security: false,
            tls: None,
        }
    }
}

/// Validated settings, ready to serve
pub struct AgentSettings {
    pub addr: String,
    pub policy: SecurityPolicy,
    pub tls: Option<Arc<rustls::ServerConfig>>,
}

impl ServerConfig {
    /// Check the policy combination without touching the filesystem
    pub fn validate(&self) -> Result<SecurityPolicy, ConfigError> {
        SecurityPolicy::new(
            self.allowed_commands.clone(),
            self.allow_any_command,
            self.tls.as_ref().is_some_and(|t| !t.is_empty()),
            self.disable_security,
        )
    }

    /// Validate the policy and load TLS material
    pub fn build(self) -> Result<AgentSettings, ConfigError> {
        let policy = self.validate()?;

        let tls = match &self.tls {
            Some(files) => files.load()?.map(|bundle| bundle.server_config()).transpose()?,
            None => None,
        };

        Ok(AgentSettings {
            addr: self.addr,
            policy,
            tls,
        })
    }
}
