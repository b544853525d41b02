//! Connecting side: one outbound connection per client.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use infinitetcp_wire::Codec;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tracing::{debug, error, info};

use crate::address::{resolve, validate_port};
use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionEvents};
use crate::error::{TcpError, TcpResult};
use crate::listener::{Listener, ListenerSet};
use crate::state::LifecycleState;

/// A TCP client exchanging line-encoded `T` records with one server.
///
/// `Client` is a cheap handle; clones share one instance. Dropping the last
/// handle closes the connection without notifying listeners.
pub struct Client<T> {
    inner: Arc<ClientInner<T>>,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ClientInner<T> {
    codec: Arc<dyn Codec<T>>,
    config: ConnectionConfig,
    lifecycle: Mutex<Lifecycle<T>>,
    listeners: Arc<ListenerSet<dyn Listener<T>>>,
}

struct Lifecycle<T> {
    state: LifecycleState,
    remote: Option<SocketAddr>,
    connection: Option<Arc<Connection<T>>>,
}

impl<T> Drop for ClientInner<T> {
    fn drop(&mut self) {
        if let Some(connection) = self.lifecycle.get_mut().connection.take() {
            connection.stop();
        }
    }
}

/// An in-flight [`Client::start`].
///
/// Dropped without a connection installed (failed connect, or the `start`
/// future abandoned mid-connect) it puts a still-`Started` client back to
/// `Bound`.
struct StartAttempt<'a, T> {
    lifecycle: &'a Mutex<Lifecycle<T>>,
}

impl<T> Drop for StartAttempt<'_, T> {
    fn drop(&mut self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state.is_started() && lifecycle.connection.is_none() {
            lifecycle.state = LifecycleState::Bound;
        }
    }
}

/// Receive-loop sink for a client's connection.
///
/// Holds the client weakly so an abandoned client can still be dropped
/// while its receive loop is running.
struct ClientEvents<T> {
    client: Weak<ClientInner<T>>,
    listeners: Arc<ListenerSet<dyn Listener<T>>>,
}

impl<T: 'static> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.inner.lifecycle.lock();
        f.debug_struct("Client")
            .field("state", &lifecycle.state)
            .field("remote", &lifecycle.remote)
            .field("connection", &lifecycle.connection)
            .field("codec", &self.inner.codec.name())
            .field("listeners", &self.inner.listeners)
            .finish()
    }
}

impl<T> Client<T>
where
    T: Send + Sync + 'static,
{
    /// Create an unbound client with the default configuration
    pub fn new(codec: impl Codec<T>) -> Self {
        Self::with_config(codec, ConnectionConfig::default())
    }

    /// Create an unbound client
    pub fn with_config(codec: impl Codec<T>, config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                codec: Arc::new(codec),
                config,
                lifecycle: Mutex::new(Lifecycle {
                    state: LifecycleState::Unbound,
                    remote: None,
                    connection: None,
                }),
                listeners: Arc::new(ListenerSet::new()),
            }),
        }
    }

    /// Create a client already bound to `host:port`
    ///
    /// # Errors
    ///
    /// As for [`bind`](Self::bind).
    pub async fn bound_to(codec: impl Codec<T>, host: &str, port: impl Into<i64>) -> TcpResult<Self> {
        let client = Self::new(codec);
        client.bind(host, port).await?;
        Ok(client)
    }

    /// Resolve and record the server address. Nothing is opened yet.
    ///
    /// # Errors
    ///
    /// [`TcpError::InvalidState`] if already bound,
    /// [`TcpError::OutOfRange`] if `port` is not in `0..=65535`,
    /// [`TcpError::InvalidAddress`] if `host` does not resolve.
    pub async fn bind(&self, host: &str, port: impl Into<i64>) -> TcpResult<()> {
        self.ensure_unbound()?;
        let port = validate_port(port)?;
        let addr = resolve(host, port).await?;
        self.set_remote(addr)
    }

    /// Record an already resolved server address.
    ///
    /// # Errors
    ///
    /// [`TcpError::InvalidState`] if already bound,
    /// [`TcpError::OutOfRange`] if `port` is not in `0..=65535`.
    pub fn bind_addr(&self, ip: IpAddr, port: impl Into<i64>) -> TcpResult<()> {
        self.ensure_unbound()?;
        let port = validate_port(port)?;
        self.set_remote(SocketAddr::new(ip, port))
    }

    fn ensure_unbound(&self) -> TcpResult<()> {
        let state = self.inner.lifecycle.lock().state;
        if state.is_bound() {
            return Err(TcpError::invalid_state("bind", state));
        }
        Ok(())
    }

    fn set_remote(&self, addr: SocketAddr) -> TcpResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock();
        // Re-checked: another handle may have bound while we were resolving.
        if lifecycle.state.is_bound() {
            return Err(TcpError::invalid_state("bind", lifecycle.state));
        }
        lifecycle.remote = Some(addr);
        lifecycle.state = LifecycleState::Bound;
        debug!(%addr, "Client bound");
        Ok(())
    }

    /// Connect to the bound address and start receiving.
    ///
    /// A failed connect leaves the client bound so it can be retried.
    ///
    /// # Errors
    ///
    /// [`TcpError::InvalidState`] unless bound and not yet started,
    /// [`TcpError::Io`] if the connection cannot be established within
    /// the configured connect timeout.
    pub async fn start(&self) -> TcpResult<()> {
        let (remote, _attempt) = self.begin_start()?;

        let opened = self.connect(remote).await.and_then(|stream| {
            Connection::open(stream, Arc::clone(&self.inner.codec), &self.inner.config)
        });
        let connection = match opened {
            Ok(connection) => connection,
            Err(e) => {
                error!(%remote, error = %e, "Failed to connect");
                return Err(e);
            }
        };

        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if !lifecycle.state.is_started() {
                // Stopped while connecting.
                connection.stop();
                return Err(TcpError::invalid_state("start", lifecycle.state));
            }
            lifecycle.connection = Some(Arc::clone(&connection));
        }

        info!("Connected to {}", remote);
        let events: Arc<dyn ConnectionEvents<T>> = Arc::new(ClientEvents {
            client: Arc::downgrade(&self.inner),
            listeners: Arc::clone(&self.inner.listeners),
        });
        connection.start_receiving(events);
        Ok(())
    }

    /// Move a bound client to `Started` for the duration of a connect attempt.
    fn begin_start(&self) -> TcpResult<(SocketAddr, StartAttempt<'_, T>)> {
        let mut lifecycle = self.inner.lifecycle.lock();
        let remote = match (lifecycle.state, lifecycle.remote) {
            (LifecycleState::Bound, Some(remote)) => remote,
            (state, _) => return Err(TcpError::invalid_state("start", state)),
        };
        lifecycle.state = LifecycleState::Started;
        Ok((
            remote,
            StartAttempt {
                lifecycle: &self.inner.lifecycle,
            },
        ))
    }

    async fn connect(&self, remote: SocketAddr) -> TcpResult<TcpStream> {
        let timeout = self.inner.config.connect_timeout;
        match tokio::time::timeout(timeout, TcpStream::connect(remote)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(TcpError::Io(format!("Failed to connect to {remote}: {e}"))),
            Err(_) => Err(TcpError::Io(format!(
                "Connection to {remote} timed out after {timeout:?}"
            ))),
        }
    }

    /// Close the connection and wait for its receive loop to finish.
    ///
    /// Disconnect listeners run once, before this returns (unless called from
    /// inside a listener). Calling it on a client that is not started does
    /// nothing.
    pub async fn stop(&self) {
        let connection = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if !lifecycle.state.is_started() {
                return;
            }
            lifecycle.state = LifecycleState::Stopped;
            lifecycle.connection.take()
        };

        if let Some(connection) = connection {
            info!("Disconnecting from {}", connection.peer_addr());
            connection
                .stop_and_wait(self.inner.config.shutdown_timeout)
                .await;
        }
    }

    /// Send `item` to the server.
    ///
    /// # Errors
    ///
    /// [`TcpError::NotConnected`] unless connected,
    /// [`TcpError::Decode`] if `item` cannot be encoded.
    pub async fn send(&self, item: &T) -> TcpResult<()> {
        let connection = self.connection().ok_or(TcpError::NotConnected)?;
        connection.send(item).await
    }

    /// Register a listener
    pub fn add_listener(&self, listener: Arc<dyn Listener<T>>) {
        self.inner.listeners.add(listener);
    }

    /// Remove the first registration of `listener`; returns whether one was removed
    pub fn remove_listener(&self, listener: &Arc<dyn Listener<T>>) -> bool {
        self.inner.listeners.remove(listener)
    }
}

impl<T> Client<T> {
    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.lock().state
    }

    /// Whether the client is started and its connection is still up
    pub fn is_connected(&self) -> bool {
        let lifecycle = self.inner.lifecycle.lock();
        lifecycle.state.is_started()
            && lifecycle.connection.as_ref().is_some_and(|c| c.is_alive())
    }

    /// The bound server address
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.lifecycle.lock().remote
    }

    /// The live connection, if any
    pub fn connection(&self) -> Option<Arc<Connection<T>>> {
        let lifecycle = self.inner.lifecycle.lock();
        if lifecycle.state.is_started() {
            lifecycle.connection.clone()
        } else {
            None
        }
    }
}

impl<T> ClientInner<T> {
    /// Forget `connection` if it is still the current one.
    fn connection_lost(&self, connection: &Arc<Connection<T>>) {
        let mut lifecycle = self.lifecycle.lock();
        let current = lifecycle
            .connection
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(c, connection));
        if current {
            lifecycle.connection = None;
            lifecycle.state = LifecycleState::Stopped;
        }
    }
}

#[async_trait]
impl<T> ConnectionEvents<T> for ClientEvents<T>
where
    T: Send + Sync + 'static,
{
    async fn received(&self, _connection: &Arc<Connection<T>>, item: T) {
        for listener in self.listeners.snapshot() {
            listener.on_receive(&item).await;
        }
    }

    async fn closed(&self, connection: &Arc<Connection<T>>) {
        if let Some(client) = self.client.upgrade() {
            client.connection_lost(connection);
        }
        info!("Connection to {} closed", connection.peer_addr());
        for listener in self.listeners.snapshot() {
            listener.on_disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infinitetcp_wire::TextCodec;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bind_twice_is_invalid_state() {
        let client = Client::new(TextCodec::new());
        client.bind("127.0.0.1", 9000).await.unwrap();
        assert_eq!(client.state(), LifecycleState::Bound);
        assert_eq!(client.remote_addr(), Some("127.0.0.1:9000".parse().unwrap()));

        let err = client.bind("127.0.0.1", 9001).await.unwrap_err();
        assert!(matches!(
            err,
            TcpError::InvalidState {
                operation: "bind",
                state: LifecycleState::Bound
            }
        ));
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_input() {
        let client = Client::new(TextCodec::new());
        assert!(matches!(
            client.bind("127.0.0.1", -1).await,
            Err(TcpError::OutOfRange(-1))
        ));
        assert!(matches!(
            client.bind("127.0.0.1", 65536).await,
            Err(TcpError::OutOfRange(65536))
        ));
        assert!(matches!(
            client.bind("no such host.invalid", 80).await,
            Err(TcpError::InvalidAddress(_))
        ));
        assert_eq!(client.state(), LifecycleState::Unbound);
    }

    #[tokio::test]
    async fn test_start_requires_bind() {
        let client = Client::new(TextCodec::new());
        assert!(matches!(
            client.start().await,
            Err(TcpError::InvalidState {
                operation: "start",
                state: LifecycleState::Unbound
            })
        ));
    }

    #[tokio::test]
    async fn test_stop_and_send_before_start() {
        let client = Client::new(TextCodec::new());
        client.stop().await;
        assert_eq!(client.state(), LifecycleState::Unbound);
        assert!(matches!(
            client.send(&"hello".to_string()).await,
            Err(TcpError::NotConnected)
        ));
        assert!(!client.is_connected());
        assert!(client.connection().is_none());
        assert!(format!("{client:?}").contains("text"));
    }

    #[tokio::test]
    async fn test_failed_connect_stays_bound() {
        // Grab a free port, then close it so nothing is listening there.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let config = ConnectionConfig::builder()
            .connect_timeout(Duration::from_secs(2))
            .build();
        let client = Client::with_config(TextCodec::new(), config);
        client
            .bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
            .unwrap();

        assert!(matches!(client.start().await, Err(TcpError::Io(_))));
        assert_eq!(client.state(), LifecycleState::Bound);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_abandoned_start_attempt_returns_to_bound() {
        let client = Client::new(TextCodec::new());
        client.bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000).unwrap();

        let (remote, attempt) = client.begin_start().unwrap();
        assert_eq!(remote.port(), 9000);
        assert_eq!(client.state(), LifecycleState::Started);
        assert!(matches!(
            client.begin_start(),
            Err(TcpError::InvalidState {
                state: LifecycleState::Started,
                ..
            })
        ));

        drop(attempt);
        assert_eq!(client.state(), LifecycleState::Bound);
    }

    #[tokio::test]
    async fn test_start_can_be_retried_after_being_cancelled() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = Client::new(TextCodec::new());
        client
            .bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
            .unwrap();

        // Usually abandoned while the connect is still pending.
        let _ = tokio::time::timeout(Duration::ZERO, client.start()).await;
        if !client.is_connected() {
            assert_eq!(client.state(), LifecycleState::Bound);
            client.start().await.unwrap();
        }
        assert!(client.is_connected());

        client.stop().await;
        assert_eq!(client.state(), LifecycleState::Stopped);
    }
}
