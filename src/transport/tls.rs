//! Mutual TLS over TCP

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;

use crate::transport::traits::TransportConnector;

/// Dials the agent over TCP, then performs a TLS handshake presenting the
/// client certificate from `config`
pub struct TlsConnector {
    address: String,
    server_name: ServerName<'static>,
    connector: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// `server_name` is checked against the agent certificate
    pub fn new(
        address: impl Into<String>,
        server_name: ServerName<'static>,
        config: Arc<ClientConfig>,
    ) -> Self {
        Self {
            address: address.into(),
            server_name,
            connector: tokio_rustls::TlsConnector::from(config),
        }
    }
}

#[async_trait]
impl TransportConnector for TlsConnector {
    type Stream = TlsStream<TcpStream>;

    async fn connect(&self) -> Result<Self::Stream> {
        let tcp = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("connect to {}", self.address))?;
        tcp.set_nodelay(true)?;

        let stream = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .context("TLS handshake")?;
        Ok(stream)
    }

    fn addr(&self) -> &str {
        &self.address
    }

    fn name(&self) -> &'static str {
        "tls"
    }
}
