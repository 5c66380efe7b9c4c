//! Plaintext TCP transport

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::transport::traits::TransportConnector;

/// TCP connector for an agent address
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> Result<Self::Stream> {
        let stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("connect to {}", self.address))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn addr(&self) -> &str {
        &self.address
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
