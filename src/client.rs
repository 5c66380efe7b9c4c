//! Client for an rce agent
//!
//! ```no_run
//! # async fn demo() -> Result<(), rce_client::ClientError> {
//! let mut client = rce_client::Client::new(None);
//! client.open("127.0.0.1", 5501).await?;
//! let id = client.start("exit.zero", Vec::new()).await?;
//! let status = client.wait(&id).await?;
//! status.print();
//! client.close();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use rce_shared::envelope::Payload;
use rce_shared::{timing, Command, Empty, Id, Status};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tracing::debug;

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use crate::transport::{TcpConnector, TlsConnector};

pub struct Client {
    tls: Option<Arc<ClientConfig>>,
    config: ConnectionConfig,
    request_timeout: Duration,
    conn: Option<Connection>,
}

impl Client {
    /// Create a client. With `tls`, connections use mutual TLS.
    pub fn new(tls: Option<Arc<ClientConfig>>) -> Self {
        Self {
            tls,
            config: ConnectionConfig::default(),
            request_timeout: Duration::from_millis(timing::REQUEST_TIMEOUT_MS),
            conn: None,
        }
    }

    /// Override how long `open` keeps retrying
    pub fn with_connection_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Connect to the agent at `host:port`, closing any previous connection
    pub async fn open(&mut self, host: &str, port: u16) -> Result<(), ClientError> {
        self.close();

        let addr = format!("{host}:{port}");
        let conn = match &self.tls {
            Some(tls) => {
                let server_name = ServerName::try_from(host.to_string())
                    .map_err(|_| ClientError::InvalidServerName(host.to_string()))?;
                Connection::establish(TlsConnector::new(addr, server_name, tls.clone()), &self.config)
                    .await?
            }
            None => Connection::establish(TcpConnector::new(addr), &self.config).await?,
        };

        self.conn = Some(conn);
        Ok(())
    }

    /// Close the connection. Any Wait outstanding on it is cancelled by the agent.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(addr = conn.addr(), "closing connection");
            conn.close();
        }
    }

    /// `host:port` of the connected agent
    pub fn agent_addr(&self) -> Option<&str> {
        self.conn.as_ref().map(Connection::addr)
    }

    /// Start a command by name and return its id
    pub async fn start(&self, name: &str, args: Vec<String>) -> Result<String, ClientError> {
        let command = Command {
            name: name.to_string(),
            arguments: args,
        };
        match self.call(Payload::Start(command), true).await? {
            Payload::CommandId(Id { id }) => Ok(id),
            other => Err(ClientError::UnexpectedReply(other.name())),
        }
    }

    /// Block until the command finishes. No deadline.
    pub async fn wait(&self, id: &str) -> Result<Status, ClientError> {
        match self.call(Payload::Wait(id_of(id)), false).await? {
            Payload::Status(status) => Ok(status),
            other => Err(ClientError::UnexpectedReply(other.name())),
        }
    }

    pub async fn get_status(&self, id: &str) -> Result<Status, ClientError> {
        match self.call(Payload::GetStatus(id_of(id)), true).await? {
            Payload::Status(status) => Ok(status),
            other => Err(ClientError::UnexpectedReply(other.name())),
        }
    }

    pub async fn stop(&self, id: &str) -> Result<(), ClientError> {
        match self.call(Payload::Stop(id_of(id)), true).await? {
            Payload::Ack(_) => Ok(()),
            other => Err(ClientError::UnexpectedReply(other.name())),
        }
    }

    /// Ids of every command the agent still tracks
    pub async fn running(&self) -> Result<Vec<String>, ClientError> {
        match self.call(Payload::Running(Empty {}), true).await? {
            Payload::Ids(list) => Ok(list.ids),
            other => Err(ClientError::UnexpectedReply(other.name())),
        }
    }

    async fn call(&self, payload: Payload, deadline: bool) -> Result<Payload, ClientError> {
        let conn = self.conn.as_ref().ok_or(ClientError::NotConnected)?;
        let deadline = deadline.then_some(self.request_timeout);

        match conn.call(payload, deadline).await? {
            Payload::Error(err) => Err(err.into()),
            reply => Ok(reply),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

fn id_of(id: &str) -> Id {
    Id { id: id.to_string() }
}
