//! Listener and accept loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::PrivateKey;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::handler::ConnectionHandler;
use crate::config::ServerConfig;
use crate::error::{GatewayError, Result};
use crate::metrics::GatewayMetrics;
use crate::session::SessionHandler;

/// How long a connection may outlive shutdown to deliver exit statuses.
pub const CONNECTION_LINGER: Duration = Duration::from_secs(5);

/// Pause after a failed `accept`, so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bind the listening socket. This is the only fatal startup error.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| GatewayError::Bind { addr, source })
}

/// SSH gateway server.
pub struct GatewayServer {
    ssh_config: Arc<russh::server::Config>,
    sessions: SessionHandler,
    metrics: Arc<GatewayMetrics>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("tasks", &self.tracker.len())
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl GatewayServer {
    /// Create a server that runs `sessions` for every client.
    ///
    /// Cancelling `shutdown` stops accepting connections and ends every
    /// session; it should be the token `sessions` was built with.
    #[must_use]
    pub fn new(
        config: &ServerConfig,
        host_key: PrivateKey,
        sessions: SessionHandler,
        shutdown: CancellationToken,
    ) -> Self {
        let ssh_config = russh::server::Config {
            keys: vec![host_key],
            inactivity_timeout: config.inactivity_timeout(),
            keepalive_interval: config.keepalive_interval(),
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::ZERO),
            ..Default::default()
        };

        Self {
            ssh_config: Arc::new(ssh_config),
            metrics: Arc::clone(sessions.metrics()),
            sessions,
            shutdown,
            tracker: TaskTracker::new(),
        }
    }

    /// Accept connections on `listener` until shutdown, then wait for every
    /// connection and session to finish.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        match listener.local_addr() {
            Ok(addr) => tracing::info!(%addr, "listening"),
            Err(e) => tracing::warn!(error = %e, "listening on unknown address"),
        }

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => self.spawn_connection(stream, peer_addr),
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        self.tracker.close();
        tracing::info!(tasks = self.tracker.len(), "waiting for sessions to finish");
        self.tracker.wait().await;
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        self.metrics.connections_accepted.inc();
        tracing::debug!(remote = %peer_addr, "connection accepted");

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(remote = %peer_addr, error = %e, "failed to set TCP_NODELAY");
        }

        let handler = ConnectionHandler::new(self.sessions.clone(), self.tracker.clone(), peer_addr);
        let ssh_config = Arc::clone(&self.ssh_config);
        let shutdown = self.shutdown.clone();

        self.tracker.spawn(async move {
            let running = match russh::server::run_stream(ssh_config, stream, handler).await {
                Ok(running) => running,
                Err(e) => {
                    tracing::debug!(remote = %peer_addr, error = %e, "SSH handshake failed");
                    return;
                }
            };

            let linger = async {
                shutdown.cancelled().await;
                tokio::time::sleep(CONNECTION_LINGER).await;
            };

            tokio::select! {
                result = running => {
                    if let Err(e) = result {
                        tracing::debug!(remote = %peer_addr, error = %e, "connection ended with error");
                    }
                }
                () = linger => {
                    tracing::debug!(remote = %peer_addr, "dropping connection at shutdown");
                }
            }
            tracing::debug!(remote = %peer_addr, "connection closed");
        });
    }
}
