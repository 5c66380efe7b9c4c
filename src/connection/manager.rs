//! One multiplexed connection to an agent
//!
//! Requests from any number of callers share one stream. Each request is
//! tagged with a fresh sequence id; the background task routes every reply
//! back to the caller waiting on that id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rce_shared::envelope::Payload;
use rce_shared::timing;
use rce_shared::transport::{write_envelope, FrameReader, TransportStream};
use rce_shared::Envelope;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::transport::TransportConnector;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Payload>>>>;

/// Configuration for establishing a connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Total time to keep retrying before giving up
    pub connect_timeout: Duration,
    /// First delay between attempts
    pub reconnect_delay: Duration,
    /// Maximum delay between attempts
    pub max_reconnect_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(timing::CONNECT_TIMEOUT_MS),
            reconnect_delay: Duration::from_millis(timing::CONNECT_BACKOFF_INITIAL_MS),
            max_reconnect_delay: Duration::from_millis(timing::CONNECT_BACKOFF_MAX_MS),
        }
    }
}

pub struct Connection {
    addr: String,
    sequence_id: AtomicU64,
    outbound_tx: mpsc::Sender<Envelope>,
    pending: Pending,
    task: JoinHandle<()>,
}

impl Connection {
    /// Connect, retrying with exponential backoff until `config.connect_timeout` elapses
    pub async fn establish<C: TransportConnector>(
        connector: C,
        config: &ConnectionConfig,
    ) -> Result<Self, ClientError> {
        let stream = connect_with_backoff(&connector, config).await?;
        debug!(addr = connector.addr(), transport = connector.name(), "connected");

        let (outbound_tx, outbound_rx) = mpsc::channel::<Envelope>(100);
        let pending: Pending = Arc::default();
        let task = tokio::spawn(io_loop(stream, outbound_rx, pending.clone()));

        Ok(Self {
            addr: connector.addr().to_string(),
            sequence_id: AtomicU64::new(0),
            outbound_tx,
            pending,
            task,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Get the next sequence ID
    fn next_sequence_id(&self) -> u64 {
        self.sequence_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Send a request and wait for its reply, giving up after `deadline` if set
    pub async fn call(
        &self,
        payload: Payload,
        deadline: Option<Duration>,
    ) -> Result<Payload, ClientError> {
        let seq = self.next_sequence_id();
        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(seq, reply_tx);

        let request = async {
            self.outbound_tx
                .send(Envelope::new(seq, payload))
                .await
                .map_err(|_| ClientError::Closed)?;
            reply_rx.await.map_err(|_| ClientError::Closed)
        };

        let result = match deadline {
            Some(deadline) => timeout(deadline, request)
                .await
                .unwrap_or(Err(ClientError::Timeout(deadline))),
            None => request.await,
        };

        if result.is_err() {
            lock(&self.pending).remove(&seq);
        }
        result
    }

    /// Close the stream. Outstanding calls fail with [`ClientError::Closed`].
    pub fn close(&self) {
        self.task.abort();
        lock(&self.pending).clear();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Payload>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn connect_with_backoff<C: TransportConnector>(
    connector: &C,
    config: &ConnectionConfig,
) -> Result<C::Stream, ClientError> {
    let deadline = Instant::now() + config.connect_timeout;
    let mut delay = config.reconnect_delay;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let err = match timeout(remaining, connector.connect()).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => e,
            Err(_) => anyhow::anyhow!("timed out after {:?}", config.connect_timeout),
        };

        if Instant::now() + delay >= deadline {
            return Err(ClientError::Connect {
                addr: connector.addr().to_string(),
                source: err.into(),
            });
        }

        debug!(addr = connector.addr(), error = %err, ?delay, "connect failed, retrying");
        sleep(delay).await;

        // Exponential backoff
        delay = std::cmp::min(delay * 2, config.max_reconnect_delay);
    }
}

/// Pump outbound requests onto the stream and route replies to their callers
async fn io_loop<S: TransportStream>(
    stream: S,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    pending: Pending,
) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = FrameReader::new(reader);

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(envelope) = outbound else {
                    break;
                };
                if let Err(e) = write_envelope(&mut writer, &envelope).await {
                    warn!(error = %e, "write failed");
                    break;
                }
            }

            inbound = reader.recv() => {
                let envelope = match inbound {
                    Ok(Some(envelope)) => envelope,
                    Ok(None) => {
                        debug!("agent closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "read failed");
                        break;
                    }
                };

                let seq = envelope.sequence_id();
                let waiter = lock(&pending).remove(&seq);
                match (waiter, envelope.payload) {
                    (Some(waiter), Some(payload)) => {
                        let _ = waiter.send(payload);
                    }
                    (Some(_), None) => warn!(seq, "reply without payload"),
                    (None, _) => debug!(seq, "reply for abandoned request"),
                }
            }
        }
    }

    // Refuse new requests, then fail everything still waiting
    outbound_rx.close();
    lock(&pending).clear();
}
