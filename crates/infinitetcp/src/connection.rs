//! One live socket: a single receive loop plus an ordered outbound queue.
//!
//! ## Task layout
//!
//! ```text
//!              send() ──► mpsc queue ──► writer task ──► FramedWrite<LinesCodec>
//!  listeners ◄── events ◄── reader task ◄── FramedRead<InboundLines>
//! ```
//!
//! Only the reader task ever touches the read half and only the writer task
//! touches the write half. Records queued by `send` reach the peer in the
//! order they were queued.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use infinitetcp_wire::{Codec, ensure_single_line};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{TcpError, TcpResult};
use crate::framing::{Inbound, InboundLines};
use crate::metrics::{AtomicStats, ConnectionStats};

/// Id reported by [`Connection::id`] until [`Connection::set_id`] is called.
pub const UNASSIGNED_ID: i64 = -1;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    // Serial of the connection whose receive loop is running on this task.
    static RECEIVING: u64;
}

type LineReader = FramedRead<OwnedReadHalf, InboundLines>;
type LineWriter = FramedWrite<OwnedWriteHalf, LinesCodec>;

/// Where a connection's receive loop reports to: the owning client or server.
#[async_trait]
pub(crate) trait ConnectionEvents<T>: Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    /// A record was decoded.
    async fn received(&self, connection: &Arc<Connection<T>>, item: T);

    /// The receive loop has ended for good.
    async fn closed(&self, connection: &Arc<Connection<T>>);
}

/// A live bidirectional session with one peer.
///
/// Connections are created by [`Client`](crate::Client) and
/// [`Server`](crate::Server) and handed out as `Arc<Connection<T>>`; two
/// connections are the same only if they are the same `Arc`
/// (`Arc::ptr_eq`). The numeric [`id`](Self::id) is caller bookkeeping and
/// plays no part in that.
pub struct Connection<T> {
    serial: u64,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    id: AtomicI64,
    alive: AtomicBool,
    codec: Arc<dyn Codec<T>>,
    outgoing: mpsc::Sender<String>,
    shutdown: CancellationToken,
    stats: Arc<AtomicStats>,
    pending_reader: Mutex<Option<LineReader>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: 'static> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("serial", &self.serial)
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .field("id", &self.id())
            .field("alive", &self.is_alive())
            .field("codec", &self.codec.name())
            .finish()
    }
}

impl<T> Connection<T>
where
    T: Send + Sync + 'static,
{
    /// Wrap a connected stream and start its writer task.
    ///
    /// The receive loop is not running until [`start_receiving`](Self::start_receiving).
    pub(crate) fn open(
        stream: TcpStream,
        codec: Arc<dyn Codec<T>>,
        config: &ConnectionConfig,
    ) -> TcpResult<Arc<Self>> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);

        if config.nodelay
            && let Err(e) = stream.set_nodelay(true)
        {
            warn!(conn = serial, peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let reader = FramedRead::new(read_half, InboundLines::new(config.max_line_length));
        let writer = FramedWrite::new(write_half, LinesCodec::new());

        let (outgoing, queue) = mpsc::channel(config.outbound_queue.max(1));
        let shutdown = CancellationToken::new();
        let stats = Arc::new(AtomicStats::default());

        let writer_task = tokio::spawn(write_loop(
            writer,
            queue,
            shutdown.clone(),
            Arc::clone(&stats),
            serial,
            config.shutdown_timeout,
        ));

        debug!(conn = serial, peer = %peer_addr, local = %local_addr, "Connection opened");

        Ok(Arc::new(Self {
            serial,
            peer_addr,
            local_addr,
            id: AtomicI64::new(UNASSIGNED_ID),
            alive: AtomicBool::new(true),
            codec,
            outgoing,
            shutdown,
            stats,
            pending_reader: Mutex::new(Some(reader)),
            reader_task: Mutex::new(None),
            writer_task: Mutex::new(Some(writer_task)),
        }))
    }

    /// Launch the receive loop. Has no effect after the first call.
    pub(crate) fn start_receiving(self: &Arc<Self>, events: Arc<dyn ConnectionEvents<T>>) {
        let Some(reader) = self.pending_reader.lock().take() else {
            return;
        };
        let receive = Arc::clone(self).read_loop(reader, events);
        let handle = tokio::spawn(RECEIVING.scope(self.serial, receive));
        *self.reader_task.lock() = Some(handle);
    }

    /// Encode `item` and queue it for the peer.
    ///
    /// Records from one connection are written whole and in the order their
    /// `send` calls completed. Waits only while the outbound queue is full;
    /// it does not wait for the bytes to reach the peer.
    ///
    /// # Errors
    ///
    /// [`TcpError::Decode`] if the codec fails or produces a line that would
    /// not arrive intact (blank, or holding `\n` or `\r`),
    /// [`TcpError::NotConnected`] once the connection has ended.
    pub async fn send(&self, item: &T) -> TcpResult<()> {
        if !self.is_alive() {
            return Err(TcpError::NotConnected);
        }
        let line = self.codec.encode(item)?;
        ensure_single_line(&line)?;
        self.outgoing
            .send(line)
            .await
            .map_err(|_| TcpError::NotConnected)
    }

    /// [`stop`](Self::stop), then wait up to `timeout` for both tasks to finish.
    ///
    /// Does not wait on the receive loop when called from inside it (i.e. from a listener).
    pub(crate) async fn stop_and_wait(&self, timeout: Duration) {
        self.stop();

        let inside_receive_loop = RECEIVING
            .try_with(|serial| *serial == self.serial)
            .unwrap_or(false);
        let reader = if inside_receive_loop {
            None
        } else {
            self.reader_task.lock().take()
        };
        let writer = self.writer_task.lock().take();

        for (name, handle) in [("receive", reader), ("send", writer)] {
            let Some(handle) = handle else { continue };
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(conn = self.serial, task = name, error = %e, "Connection task ended abnormally");
                }
                Err(_) => {
                    warn!(conn = self.serial, task = name, ?timeout, "Connection task did not finish in time");
                }
            }
        }
    }

    async fn read_loop(self: Arc<Self>, mut reader: LineReader, events: Arc<dyn ConnectionEvents<T>>) {
        debug!(conn = self.serial, peer = %self.peer_addr, "Receive loop started");

        loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                next = reader.next() => next,
            };

            match next {
                Some(Ok(Inbound::Line(line))) => self.handle_line(line, events.as_ref()).await,
                Some(Ok(Inbound::Oversized)) => {
                    self.stats.record_skipped();
                    warn!(conn = self.serial, peer = %self.peer_addr, "Skipping oversized line");
                }
                Some(Ok(Inbound::NotUtf8)) => {
                    self.stats.record_skipped();
                    warn!(conn = self.serial, peer = %self.peer_addr, "Skipping non UTF-8 line");
                }
                Some(Err(e)) => {
                    info!(conn = self.serial, peer = %self.peer_addr, error = %e, "Read failed, closing connection");
                    break;
                }
                None => {
                    info!(conn = self.serial, peer = %self.peer_addr, "Peer closed connection");
                    break;
                }
            }
        }

        drop(reader);
        self.stop();
        events.closed(&self).await;
        debug!(conn = self.serial, peer = %self.peer_addr, "Receive loop finished");
    }

    async fn handle_line(self: &Arc<Self>, line: String, events: &dyn ConnectionEvents<T>) {
        self.stats.record_read(line.len());

        // Blank lines carry no record.
        if line.trim().is_empty() {
            return;
        }

        match self.codec.decode(&line) {
            Ok(item) => {
                self.stats.record_delivered();
                events.received(self, item).await;
            }
            Err(e) => {
                self.stats.record_skipped();
                warn!(
                    conn = self.serial,
                    peer = %self.peer_addr,
                    codec = self.codec.name(),
                    error = %e,
                    "Skipping undecodable record"
                );
            }
        }
    }
}

impl<T> Connection<T> {
    /// Address of the remote end
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Address of the local end
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Caller-assigned id, [`UNASSIGNED_ID`] until set
    pub fn id(&self) -> i64 {
        self.id.load(Ordering::Relaxed)
    }

    /// Assign an id for the caller's own bookkeeping
    pub fn set_id(&self, id: i64) {
        self.id.store(id, Ordering::Relaxed);
    }

    /// Whether the connection can still send and receive
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Traffic counters so far
    pub fn stats(&self) -> ConnectionStats {
        self.stats.snapshot()
    }

    /// Close the connection.
    ///
    /// Returns immediately. The receive loop stops before handling another
    /// record, records already queued are still flushed, then the socket is
    /// closed and disconnect listeners run once. Calling it again does nothing.
    pub fn stop(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            debug!(conn = self.serial, peer = %self.peer_addr, "Stop requested");
        }
        self.shutdown.cancel();
    }
}

async fn write_loop(
    mut writer: LineWriter,
    mut queue: mpsc::Receiver<String>,
    shutdown: CancellationToken,
    stats: Arc<AtomicStats>,
    serial: u64,
    grace: Duration,
) {
    debug!(conn = serial, "Send loop started");

    // Once stopped, flushing what is queued gets `grace` before the socket is dropped.
    let deadline = async {
        shutdown.cancelled().await;
        tokio::time::sleep(grace).await;
    };

    let result = tokio::select! {
        result = pump(&mut writer, &mut queue, &shutdown, &stats) => result,
        () = deadline => {
            warn!(conn = serial, ?grace, "Dropping unsent records after stop");
            Ok(())
        }
    };

    if let Err(e) = result {
        error!(conn = serial, error = %e, "Write failed, closing connection");
        shutdown.cancel();
    }
    debug!(conn = serial, "Send loop finished");
}

async fn pump(
    writer: &mut LineWriter,
    queue: &mut mpsc::Receiver<String>,
    shutdown: &CancellationToken,
    stats: &AtomicStats,
) -> Result<(), LinesCodecError> {
    loop {
        let next = tokio::select! {
            biased;
            next = queue.recv() => next,
            () = shutdown.cancelled() => break,
        };
        let Some(line) = next else { break };
        let len = line.len();
        writer.send(line).await?;
        stats.record_sent(len);
    }

    queue.close();
    while let Some(line) = queue.recv().await {
        let len = line.len();
        writer.send(line).await?;
        stats.record_sent(len);
    }
    SinkExt::<String>::close(writer).await
}
