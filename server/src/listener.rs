//! TCP accept loop, optionally wrapped in mutual TLS

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rce_shared::transport::BoxedStream;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::server::Server;
use crate::session::Session;

/// A running listener
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound address, useful when binding port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting new connections. Connected clients are served until they disconnect.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "accept loop ended abnormally");
        }
    }
}

/// Bind `addr` and start accepting connections in the background
pub async fn bind(
    addr: &str,
    server: Arc<Server>,
    tls: Option<Arc<rustls::ServerConfig>>,
) -> Result<ServerHandle> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let local_addr = listener.local_addr()?;
    let acceptor = tls.map(TlsAcceptor::from);

    info!(
        %local_addr,
        tls = acceptor.is_some(),
        policy = %server.policy().describe(),
        "agent listening"
    );

    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(accept_loop(listener, server, acceptor, shutdown_rx));

    Ok(ServerHandle {
        local_addr,
        shutdown,
        task,
    })
}

async fn accept_loop(
    listener: TcpListener,
    server: Arc<Server>,
    acceptor: Option<TlsAcceptor>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (socket, addr) = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };
        debug!(%addr, "connection accepted");

        let server = server.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            match establish(socket, acceptor).await {
                Ok(stream) => Session::new(stream, addr).run(server).await,
                Err(e) => warn!(%addr, error = %e, "handshake failed"),
            }
        });
    }

    info!("agent stopped accepting connections");
}

async fn establish(socket: TcpStream, acceptor: Option<TlsAcceptor>) -> Result<BoxedStream> {
    socket.set_nodelay(true)?;
    match acceptor {
        Some(acceptor) => {
            let stream = acceptor.accept(socket).await.context("TLS handshake")?;
            Ok(Box::new(stream))
        }
        None => Ok(Box::new(socket)),
    }
}
