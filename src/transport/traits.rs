//! Transport trait abstraction for pluggable connection backends

use anyhow::Result;
use async_trait::async_trait;
use rce_shared::transport::TransportStream;

/// Factory for creating transport connections to one agent
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// The stream type this connector produces
    type Stream: TransportStream;

    /// Attempt to connect once, returning a stream on success
    async fn connect(&self) -> Result<Self::Stream>;

    /// The agent address this connector dials
    fn addr(&self) -> &str;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
