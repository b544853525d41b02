//! Accepting side: accept loop, connection registry and listener fan-out.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use infinitetcp_wire::Codec;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::address::validate_port;
use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionEvents};
use crate::error::{TcpError, TcpResult};
use crate::listener::{ListenerSet, ServerListener};
use crate::registry::ConnectionRegistry;
use crate::state::LifecycleState;

/// A TCP server exchanging line-encoded `T` records with every client.
///
/// `Server` is a cheap handle; clones share one instance. [`start`](Self::start)
/// runs the accept loop on the calling task and only returns once the server
/// stops, so run it on a task of its own and keep a clone to call
/// [`stop`](Self::stop) with:
///
/// ```rust,no_run
/// use infinitetcp::{Server, TextCodec};
///
/// # async fn run() -> infinitetcp::TcpResult<()> {
/// let server = Server::new(TextCodec::new());
/// server.bind(7000)?;
///
/// let accept = tokio::spawn({
///     let server = server.clone();
///     async move { server.start().await }
/// });
///
/// // ...
/// server.stop()?;
/// accept.await.expect("accept task panicked")?;
/// # Ok(())
/// # }
/// ```
///
/// Stopping the server closes the listening socket only; accepted
/// connections stay up until they end on their own or
/// [`disconnect_all`](Self::disconnect_all) is called.
pub struct Server<T> {
    inner: Arc<ServerInner<T>>,
}

impl<T> Clone for Server<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ServerInner<T> {
    codec: Arc<dyn Codec<T>>,
    config: ConnectionConfig,
    lifecycle: Mutex<Lifecycle>,
    shared: Arc<ServerShared<T>>,
}

#[derive(Debug, Default)]
struct Lifecycle {
    state: LifecycleState,
    port: Option<u16>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<CancellationToken>,
}

/// State every connection of one server reports into.
struct ServerShared<T> {
    registry: ConnectionRegistry<T>,
    listeners: ListenerSet<dyn ServerListener<T>>,
}

impl<T: 'static> fmt::Debug for Server<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.inner.lifecycle.lock();
        f.debug_struct("Server")
            .field("state", &lifecycle.state)
            .field("port", &lifecycle.port)
            .field("local_addr", &lifecycle.local_addr)
            .field("codec", &self.inner.codec.name())
            .field("connections", &self.inner.shared.registry)
            .field("listeners", &self.inner.shared.listeners)
            .finish()
    }
}

impl<T> Server<T>
where
    T: Send + Sync + 'static,
{
    /// Create an unbound server with the default configuration
    pub fn new(codec: impl Codec<T>) -> Self {
        Self::with_config(codec, ConnectionConfig::default())
    }

    /// Create an unbound server
    pub fn with_config(codec: impl Codec<T>, config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                codec: Arc::new(codec),
                config,
                lifecycle: Mutex::new(Lifecycle::default()),
                shared: Arc::new(ServerShared {
                    registry: ConnectionRegistry::new(),
                    listeners: ListenerSet::new(),
                }),
            }),
        }
    }

    /// Create a server already bound to `port`
    ///
    /// # Errors
    ///
    /// [`TcpError::OutOfRange`] if `port` is not in `0..=65535`.
    pub fn bound_to(codec: impl Codec<T>, port: impl Into<i64>) -> TcpResult<Self> {
        let server = Self::new(codec);
        server.bind(port)?;
        Ok(server)
    }

    /// Set the port to listen on; `0` picks an ephemeral port at start.
    ///
    /// # Errors
    ///
    /// [`TcpError::InvalidState`] if already bound, [`TcpError::OutOfRange`]
    /// if `port` is not in `0..=65535`.
    pub fn bind(&self, port: impl Into<i64>) -> TcpResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.state.is_bound() {
            return Err(TcpError::invalid_state("bind", lifecycle.state));
        }
        let port = validate_port(port)?;
        lifecycle.port = Some(port);
        lifecycle.state = LifecycleState::Bound;
        debug!(port, "Server bound");
        Ok(())
    }

    /// Listen and run the accept loop until [`stop`](Self::stop) is called.
    ///
    /// Each accepted socket is registered, announced to every listener's
    /// `on_connect` (in registration order, awaited) and only then starts
    /// receiving; the next client is accepted after that.
    ///
    /// # Errors
    ///
    /// [`TcpError::InvalidState`] unless bound and not yet started,
    /// [`TcpError::Io`] if the port cannot be listened on or accepting fails.
    /// A stop request ends the loop with `Ok(())`.
    pub async fn start(&self) -> TcpResult<()> {
        let (port, shutdown) = {
            let mut lifecycle = self.inner.lifecycle.lock();
            let port = match (lifecycle.state, lifecycle.port) {
                (LifecycleState::Bound, Some(port)) => port,
                (state, _) => return Err(TcpError::invalid_state("start", state)),
            };
            let shutdown = CancellationToken::new();
            lifecycle.state = LifecycleState::Started;
            lifecycle.shutdown = Some(shutdown.clone());
            (port, shutdown)
        };

        let bind_addr = SocketAddr::new(self.inner.config.server_ip, port);
        let listening = TcpListener::bind(bind_addr)
            .await
            .and_then(|listener| listener.local_addr().map(|addr| (listener, addr)));
        let (listener, local_addr) = match listening {
            Ok(listening) => listening,
            Err(e) => {
                error!(%bind_addr, error = %e, "Failed to bind TCP listener");
                let mut lifecycle = self.inner.lifecycle.lock();
                if lifecycle.state.is_started() {
                    lifecycle.state = LifecycleState::Bound;
                }
                lifecycle.shutdown = None;
                return Err(TcpError::Io(format!("Failed to listen on {bind_addr}: {e}")));
            }
        };

        self.inner.lifecycle.lock().local_addr = Some(local_addr);
        info!("Server listening on {}", local_addr);

        let result = loop {
            let accepted = tokio::select! {
                biased;
                () = shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.accept(stream, peer).await,
                Err(e) => {
                    error!(error = %e, "Failed to accept TCP connection");
                    break Err(TcpError::from(e));
                }
            }
        };

        drop(listener);
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            lifecycle.state = LifecycleState::Stopped;
            lifecycle.local_addr = None;
            lifecycle.shutdown = None;
        }
        info!(
            "Server on {} stopped accepting, {} connections remain",
            local_addr,
            self.connection_count()
        );
        result
    }

    async fn accept(&self, stream: TcpStream, peer: SocketAddr) {
        let connection = match Connection::open(stream, Arc::clone(&self.inner.codec), &self.inner.config) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(%peer, error = %e, "Dropping accepted socket");
                return;
            }
        };
        info!("Accepted TCP connection from {}", peer);

        let shared = Arc::clone(&self.inner.shared);
        shared.registry.insert(Arc::clone(&connection));
        for listener in shared.listeners.snapshot() {
            listener.on_connect(&connection).await;
        }
        connection.start_receiving(shared);
    }

    /// Stop accepting and close the listening socket.
    ///
    /// Returns once the request is made; the accept loop in
    /// [`start`](Self::start) exits at its next wake-up.
    ///
    /// # Errors
    ///
    /// [`TcpError::InvalidState`] if the server is not started.
    pub fn stop(&self) -> TcpResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if !lifecycle.state.is_started() {
            return Err(TcpError::invalid_state("stop", lifecycle.state));
        }
        lifecycle.state = LifecycleState::Stopped;
        if let Some(shutdown) = lifecycle.shutdown.take() {
            shutdown.cancel();
        }
        info!("Stopping server");
        Ok(())
    }

    /// Send `item` to every live connection.
    ///
    /// Returns how many connections accepted the record.
    pub async fn broadcast(&self, item: &T) -> usize {
        let mut delivered = 0;
        for connection in self.connections() {
            match connection.send(item).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!(peer = %connection.peer_addr(), error = %e, "Broadcast skipped connection"),
            }
        }
        delivered
    }

    /// Stop every live connection; each one leaves the registry and reports
    /// its disconnect as its receive loop winds down.
    pub fn disconnect_all(&self) {
        for connection in self.connections() {
            connection.stop();
        }
    }

    /// Register a listener for every current and future connection
    pub fn add_listener(&self, listener: Arc<dyn ServerListener<T>>) {
        self.inner.shared.listeners.add(listener);
    }

    /// Remove the first registration of `listener`; returns whether one was removed
    pub fn remove_listener(&self, listener: &Arc<dyn ServerListener<T>>) -> bool {
        self.inner.shared.listeners.remove(listener)
    }
}

impl<T> Server<T> {
    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.lock().state
    }

    /// The bound port, as given to [`bind`](Self::bind)
    pub fn port(&self) -> Option<u16> {
        self.inner.lifecycle.lock().port
    }

    /// The listening address, available while the accept loop runs
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lifecycle.lock().local_addr
    }

    /// Snapshot of the live connections
    pub fn connections(&self) -> Vec<Arc<Connection<T>>> {
        self.inner.shared.registry.snapshot()
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.inner.shared.registry.len()
    }
}

#[async_trait]
impl<T> ConnectionEvents<T> for ServerShared<T>
where
    T: Send + Sync + 'static,
{
    async fn received(&self, connection: &Arc<Connection<T>>, item: T) {
        for listener in self.listeners.snapshot() {
            listener.on_receive(connection, &item).await;
        }
    }

    async fn closed(&self, connection: &Arc<Connection<T>>) {
        if !self.registry.remove(connection) {
            return;
        }
        info!("TCP connection from {} closed", connection.peer_addr());
        for listener in self.listeners.snapshot() {
            listener.on_disconnect(connection).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infinitetcp_wire::TextCodec;

    #[test]
    fn test_bind_twice_is_invalid_state() {
        let server = Server::new(TextCodec::new());
        server.bind(0).unwrap();
        assert_eq!(server.state(), LifecycleState::Bound);

        let err = server.bind(8080).unwrap_err();
        assert!(matches!(
            err,
            TcpError::InvalidState {
                operation: "bind",
                state: LifecycleState::Bound
            }
        ));
        assert_eq!(server.port(), Some(0));
    }

    #[test]
    fn test_bind_out_of_range() {
        let server = Server::new(TextCodec::new());
        assert!(matches!(server.bind(-1), Err(TcpError::OutOfRange(-1))));
        assert!(matches!(
            server.bind(65536),
            Err(TcpError::OutOfRange(65536))
        ));
        assert_eq!(server.state(), LifecycleState::Unbound);
        assert!(Server::bound_to(TextCodec::new(), 70000).is_err());
    }

    #[tokio::test]
    async fn test_start_requires_bind() {
        let server = Server::new(TextCodec::new());
        assert!(matches!(
            server.start().await,
            Err(TcpError::InvalidState {
                state: LifecycleState::Unbound,
                ..
            })
        ));
    }

    #[test]
    fn test_stop_requires_start() {
        let server = Server::bound_to(TextCodec::new(), 0).unwrap();
        assert!(matches!(
            server.stop(),
            Err(TcpError::InvalidState {
                operation: "stop",
                ..
            })
        ));
        assert_eq!(server.state(), LifecycleState::Bound);
    }

    #[test]
    fn test_debug_output() {
        let server = Server::bound_to(TextCodec::new(), 0).unwrap();
        let debug = format!("{server:?}");
        assert!(debug.contains("Server"));
        assert!(debug.contains("text"));
    }
}
