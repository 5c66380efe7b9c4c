//! rce shared protocol types
//!
//! This crate provides the wire messages, framing codec, state derivation and
//! TLS setup used by both the agent (server) and the client library.

pub mod codec;
pub mod proto;
pub mod state_machine;
pub mod tls;
pub mod transport;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use proto::*;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Get current timestamp in nanoseconds since Unix epoch
pub fn now_ns() -> i64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    i64::try_from(nanos).unwrap_or(i64::MAX)
}

/// Timing parameters shared by agent and client
pub mod timing {
    /// Deadline for every client call except Wait
    pub const REQUEST_TIMEOUT_MS: u64 = 1000;

    /// Total time the client keeps retrying to establish a connection
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Upper bound of the exponential backoff between connect attempts
    pub const CONNECT_BACKOFF_MAX_MS: u64 = 2000;

    /// First backoff delay between connect attempts
    pub const CONNECT_BACKOFF_INITIAL_MS: u64 = 100;
}

/// Exit code reported before a command exits, or when it was killed by a signal
pub const EXIT_CODE_UNSET: i64 = -1;

impl Header {
    /// Create a new header for the given sequence id
    pub fn new(sequence_id: u64) -> Self {
        Self {
            sequence_id,
            timestamp_ms: now_ms(),
        }
    }
}

impl Envelope {
    /// Wrap a payload with a header carrying `sequence_id`
    pub fn new(sequence_id: u64, payload: envelope::Payload) -> Self {
        Self {
            header: Some(Header::new(sequence_id)),
            payload: Some(payload),
        }
    }

    /// Sequence id from the header, zero when the header is missing
    pub fn sequence_id(&self) -> u64 {
        self.header.as_ref().map_or(0, |h| h.sequence_id)
    }
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The decoded kind, `Unknown` for values this build does not know
    pub fn error_kind(&self) -> ErrorKind {
        ErrorKind::try_from(self.kind).unwrap_or(ErrorKind::Unknown)
    }
}

impl Status {
    /// The decoded state, `Unknown` for values this build does not know
    pub fn lifecycle_state(&self) -> State {
        State::try_from(self.state).unwrap_or(State::Unknown)
    }

    /// Dump every field to stdout, one per line. Handy when debugging a client.
    pub fn print(&self) {
        println!("ID          {}", self.id);
        println!("Name        {}", self.name);
        println!("PID         {}", self.pid);
        println!("State       {:?}", self.lifecycle_state());
        println!("StartTime   {}", self.start_time);
        println!("StopTime    {}", self.stop_time);
        println!("ExitCode    {}", self.exit_code);
        println!("Args        {:?}", self.args);
        println!("Stdout      {:?}", self.stdout);
        println!("Stderr      {:?}", self.stderr);
        println!("Error       {}", self.error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_creation() {
        let header = Header::new(7);
        assert_eq!(header.sequence_id, 7);
        assert!(header.timestamp_ms > 0);
    }

    #[test]
    fn test_envelope_sequence_id() {
        let envelope = Envelope::new(42, envelope::Payload::Running(Empty {}));
        assert_eq!(envelope.sequence_id(), 42);

        let bare = Envelope {
            header: None,
            payload: None,
        };
        assert_eq!(bare.sequence_id(), 0);
    }

    #[test]
    fn test_rpc_error_kind() {
        let err = RpcError::new(ErrorKind::NotFound, "gone");
        assert_eq!(err.error_kind(), ErrorKind::NotFound);

        let unknown = RpcError {
            kind: 99,
            message: String::new(),
        };
        assert_eq!(unknown.error_kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_now_ns_is_after_now_ms() {
        let ms = now_ms() as i64;
        let ns = now_ns();
        assert!(ns / 1_000_000 >= ms);
    }
}
