mod manager;

pub use manager::{Connection, ConnectionConfig};
