//! Wire messages exchanged between the agent and its clients.
//!
//! Every frame carries one [`Envelope`]. Requests and replies share the
//! envelope; a reply echoes the `sequence_id` of the request it answers.

use prost::{Enumeration, Message};

/// Lifecycle state of a command, derived from its timestamps and exit code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum State {
    Unknown = 0,
    Pending = 1,
    Running = 2,
    Complete = 3,
    Fail = 4,
}

/// Machine-readable failure kind carried by [`RpcError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum ErrorKind {
    Unknown = 0,
    InvalidArgument = 1,
    AlreadyExists = 2,
    NotFound = 3,
    PermissionDenied = 4,
    Cancelled = 5,
    Internal = 6,
}

#[derive(Clone, PartialEq, Message)]
pub struct Header {
    #[prost(uint64, tag = "1")]
    pub sequence_id: u64,

    #[prost(uint64, tag = "2")]
    pub timestamp_ms: u64,
}

/// A request to run a named command with trailing arguments
#[derive(Clone, PartialEq, Message)]
pub struct Command {
    #[prost(string, tag = "1")]
    pub name: String,

    #[prost(string, repeated, tag = "2")]
    pub arguments: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Id {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct IdList {
    #[prost(string, repeated, tag = "1")]
    pub ids: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Empty {}

/// Point-in-time view of one command
///
/// `start_time` and `stop_time` are Unix nanoseconds; zero means unset.
#[derive(Clone, PartialEq, Message)]
pub struct Status {
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(string, tag = "2")]
    pub name: String,

    #[prost(enumeration = "State", tag = "3")]
    pub state: i32,

    #[prost(int64, tag = "4")]
    pub pid: i64,

    #[prost(int64, tag = "5")]
    pub start_time: i64,

    #[prost(int64, tag = "6")]
    pub stop_time: i64,

    #[prost(int64, tag = "7")]
    pub exit_code: i64,

    #[prost(string, repeated, tag = "8")]
    pub args: Vec<String>,

    #[prost(string, repeated, tag = "9")]
    pub stdout: Vec<String>,

    #[prost(string, repeated, tag = "10")]
    pub stderr: Vec<String>,

    #[prost(string, tag = "11")]
    pub error: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RpcError {
    #[prost(enumeration = "ErrorKind", tag = "1")]
    pub kind: i32,

    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,

    #[prost(oneof = "envelope::Payload", tags = "2, 3, 4, 5, 6, 7, 8, 9, 10, 11")]
    pub payload: Option<envelope::Payload>,
}

pub mod envelope {
    use prost::Oneof;

    #[derive(Clone, PartialEq, Oneof)]
    pub enum Payload {
        // requests
        #[prost(message, tag = "2")]
        Start(super::Command),
        #[prost(message, tag = "3")]
        Wait(super::Id),
        #[prost(message, tag = "4")]
        GetStatus(super::Id),
        #[prost(message, tag = "5")]
        Stop(super::Id),
        #[prost(message, tag = "6")]
        Running(super::Empty),

        // replies
        #[prost(message, tag = "7")]
        CommandId(super::Id),
        #[prost(message, tag = "8")]
        Status(super::Status),
        #[prost(message, tag = "9")]
        Ack(super::Empty),
        #[prost(message, tag = "10")]
        Ids(super::IdList),
        #[prost(message, tag = "11")]
        Error(super::RpcError),
    }

    impl Payload {
        /// Short name used in logs and error messages
        pub fn name(&self) -> &'static str {
            match self {
                Payload::Start(_) => "start",
                Payload::Wait(_) => "wait",
                Payload::GetStatus(_) => "get_status",
                Payload::Stop(_) => "stop",
                Payload::Running(_) => "running",
                Payload::CommandId(_) => "command_id",
                Payload::Status(_) => "status",
                Payload::Ack(_) => "ack",
                Payload::Ids(_) => "ids",
                Payload::Error(_) => "error",
            }
        }
    }
}

