pub mod tcp;
pub mod tls;
pub mod traits;

pub use tcp::TcpConnector;
pub use tls::TlsConnector;
pub use traits::TransportConnector;
