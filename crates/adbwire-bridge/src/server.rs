use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, BridgeContext};
use crate::error::Result;
use crate::socket::BridgeSocket;

/// Accepts client connections and serves each one as a [`BridgeSocket`].
pub struct BridgeServer {
    listener: TcpListener,
    context: BridgeContext,
    shutdown: CancellationToken,
    next_connection_id: AtomicU64,
}

/// Stops a running [`BridgeServer`] from another task.
#[derive(Debug, Clone)]
pub struct BridgeCloser {
    shutdown: CancellationToken,
}

impl BridgeCloser {
    /// Stop accepting and end every live connection.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl BridgeServer {
    /// Bind a TCP listener for bridge clients.
    pub async fn bind(addr: impl ToSocketAddrs, config: BridgeConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, config))
    }

    /// Serve on an already-bound listener.
    pub fn from_listener(listener: TcpListener, config: BridgeConfig) -> Self {
        Self {
            listener,
            context: BridgeContext::new(&config),
            shutdown: CancellationToken::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn closer(&self) -> BridgeCloser {
        BridgeCloser {
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Accept until closed. Connections still open at close are ended and
    /// awaited before this returns.
    pub async fn run(&self) -> Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, "bridge listening");
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn(&mut connections, stream, peer),
                    Err(err) => warn!(error = %err, "accept failed"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = %err, "bridge connection task failed");
                    }
                }
            }
        }

        debug!(live = connections.len(), "bridge closing");
        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "bridge connection task failed");
            }
        }
        info!(%addr, "bridge closed");
        Ok(())
    }

    fn spawn(&self, connections: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = stream.set_nodelay(true) {
            debug!(connection = id, error = %err, "could not disable Nagle");
        }
        info!(connection = id, %peer, "client connected");
        let context = self.context.clone();
        let shutdown = self.shutdown.child_token();
        connections.spawn(async move {
            match BridgeSocket::serve(stream, context, shutdown).await {
                Ok(()) => info!(connection = id, %peer, "client disconnected"),
                Err(err) => warn!(connection = id, %peer, error = %err, "client connection ended"),
            }
        });
    }
}

impl std::fmt::Debug for BridgeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("context", &self.context)
            .field("closed", &self.shutdown.is_cancelled())
            .finish()
    }
}
