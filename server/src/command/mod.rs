//! Commands the agent runs
//!
//! - `spec`: the operator whitelist (name -> argv prefix)
//! - `exec`: one child process and its captured output
//! - `handle`: a started command with its id
//! - `registry`: id -> handle map shared by all connections

mod exec;
mod handle;
mod registry;
mod spec;

pub use exec::{Execution, Snapshot};
pub use handle::CommandHandle;
pub use registry::CommandRegistry;
pub use spec::{load_whitelist, CommandSpec, Whitelist, WhitelistError};
