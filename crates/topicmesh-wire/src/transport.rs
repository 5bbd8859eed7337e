//! Transport — TCP listener, read loops and outbound connections.
//!
//! Every participant (the master and every node) embeds one [`Transport`].
//! It binds a listener, runs an independent read loop for each accepted
//! connection, and keeps a cache of outbound connections keyed by the
//! `host:port` string of the target. Outbound connections get a read loop of
//! their own, so a peer can answer on the connection it was reached through.
//!
//! All of a transport's background work (the accept loop, every read loop and
//! any task handed to [`Transport::spawn`]) lives in one `JoinSet`, which
//! [`Transport::stop`] aborts.

use crate::codec::{encode_frame, CodecError, FrameDecoder};

use async_trait::async_trait;
use bytes::BytesMut;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use topicmesh_types::config::TransportConfig;
use topicmesh_types::{Address, HandlerError, Message};
use tracing::{debug, error, info, warn};

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("Failed to connect to {address} after {attempts} attempts: {source}")]
    ConnectFailed {
        address: Address,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection closed mid-frame ({buffered} bytes of an unfinished frame)")]
    IncompleteFrame { buffered: usize },
    #[error("Transport is already listening on {0}")]
    AlreadyListening(Address),
    #[error("Transport stopped")]
    Stopped,
}

/// Receives every message read from any connection of a transport.
///
/// Called from the connection's read loop and awaited before the next frame of
/// that connection is read, so messages from one connection arrive in the order
/// they were written. An error is logged and the loop moves on.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    async fn on_message(
        &self,
        transport: &Transport,
        message: Message,
        origin: Connection,
    ) -> Result<(), HandlerError>;
}

/// Writable handle to one open TCP connection.
///
/// Cheap to clone; all clones share the same write half.
#[derive(Clone)]
pub struct Connection {
    peer: SocketAddr,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    max_frame_size: u32,
}

impl Connection {
    fn new(peer: SocketAddr, writer: OwnedWriteHalf, max_frame_size: u32) -> Self {
        Self {
            peer,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            max_frame_size,
        }
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether two handles refer to the same connection.
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.writer, &other.writer)
    }

    /// Write one framed message and wait for it to be flushed.
    ///
    /// A message larger than the transport's `max_frame_size` is refused with
    /// `CodecError::FrameTooLarge` before anything is written.
    pub async fn write_message(&self, message: &Message) -> Result<(), WireError> {
        let bytes = encode_frame(message, self.max_frame_size)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut down the write side. Errors are ignored.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish()
    }
}

/// Where [`Transport::send`] should write a message.
#[derive(Debug, Clone)]
pub enum Destination {
    /// A listening endpoint; uses the cached connection or opens one.
    Address(Address),
    /// An already open connection.
    Connection(Connection),
}

impl From<Address> for Destination {
    fn from(addr: Address) -> Self {
        Self::Address(addr)
    }
}

impl From<&Address> for Destination {
    fn from(addr: &Address) -> Self {
        Self::Address(addr.clone())
    }
}

impl From<Connection> for Destination {
    fn from(conn: Connection) -> Self {
        Self::Connection(conn)
    }
}

impl From<&Connection> for Destination {
    fn from(conn: &Connection) -> Self {
        Self::Connection(conn.clone())
    }
}

struct TransportInner {
    config: TransportConfig,
    handler: Arc<dyn FrameHandler>,
    local_addr: RwLock<Option<Address>>,
    connections: Mutex<HashMap<String, Connection>>,
    tasks: Mutex<JoinSet<()>>,
    stopped: AtomicBool,
}

/// Framed message transport shared by masters and nodes.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

/// Non-owning handle for background tasks, so a task never keeps its own
/// transport alive.
#[derive(Clone)]
pub struct WeakTransport {
    inner: Weak<TransportInner>,
}

impl WeakTransport {
    /// The transport, if any strong handle is still alive.
    pub fn upgrade(&self) -> Option<Transport> {
        self.inner.upgrade().map(|inner| Transport { inner })
    }
}

impl Transport {
    /// Create a transport that delivers every inbound message to `handler`.
    pub fn new(config: TransportConfig, handler: Arc<dyn FrameHandler>) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                config,
                handler,
                local_addr: RwLock::new(None),
                connections: Mutex::new(HashMap::new()),
                tasks: Mutex::new(JoinSet::new()),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Transport settings.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Port 0 is replaced by the port the OS picked; the returned address (also
    /// available from [`Transport::local_addr`]) carries the concrete port.
    pub async fn listen(&self, address: &Address) -> Result<Address, WireError> {
        if self.is_stopped() {
            return Err(WireError::Stopped);
        }
        if let Some(bound) = self.local_addr() {
            return Err(WireError::AlreadyListening(bound));
        }

        let listener = TcpListener::bind((address.host.as_str(), address.port)).await?;
        let bound = address.with_port(listener.local_addr()?.port());
        *self
            .inner
            .local_addr
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(bound.clone());

        info!("listening on {}", bound);
        self.spawn(accept_loop(listener, self.downgrade()));
        Ok(bound)
    }

    /// The resolved listening address, once [`Transport::listen`] succeeded.
    pub fn local_addr(&self) -> Option<Address> {
        self.inner
            .local_addr
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Open an outbound connection, retrying on failure.
    ///
    /// Makes up to `connect_attempts` attempts with `connect_retry_delay`
    /// between them. The new connection replaces any cached one for the same
    /// address.
    pub async fn connect(&self, address: &Address) -> Result<Connection, WireError> {
        let attempts = self.inner.config.connect_attempts.max(1);
        let delay = self.inner.config.connect_retry_delay();
        let mut last_error =
            std::io::Error::new(std::io::ErrorKind::NotConnected, "no connection attempt made");

        for attempt in 1..=attempts {
            if self.is_stopped() {
                return Err(WireError::Stopped);
            }
            match TcpStream::connect((address.host.as_str(), address.port)).await {
                Ok(stream) => {
                    let peer = stream.peer_addr()?;
                    let conn = self.attach(stream, peer);
                    self.inner
                        .connections
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(address.to_string(), conn.clone());
                    info!("connected to {}", address);
                    return Ok(conn);
                }
                Err(e) => {
                    if attempt < attempts {
                        warn!(
                            %address,
                            attempt,
                            error = %e,
                            "connect attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = e;
                }
            }
        }

        error!(
            "failed to connect to {} after {} attempts",
            address, attempts
        );
        Err(WireError::ConnectFailed {
            address: address.clone(),
            attempts,
            source: last_error,
        })
    }

    /// The cached connection for `address`, or a new one.
    pub async fn connection_to(&self, address: &Address) -> Result<Connection, WireError> {
        let cached = self
            .inner
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&address.to_string())
            .cloned();
        match cached {
            Some(conn) => Ok(conn),
            None => {
                debug!("no cached connection to {}, opening one", address);
                self.connect(address).await
            }
        }
    }

    /// Keys of the cached outbound connections, sorted.
    pub fn cached_connections(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Send a message and report the outcome as an error.
    ///
    /// A write failure on a cached connection evicts it, so the next send to
    /// the same address reconnects.
    pub async fn try_send(
        &self,
        message: &Message,
        destination: impl Into<Destination>,
    ) -> Result<(), WireError> {
        if self.is_stopped() {
            return Err(WireError::Stopped);
        }
        match destination.into() {
            Destination::Address(address) => {
                let conn = self.connection_to(&address).await?;
                if let Err(e) = conn.write_message(message).await {
                    // An unencodable message leaves the connection intact.
                    if !matches!(e, WireError::Codec(_)) {
                        self.evict(&address, &conn);
                    }
                    return Err(e);
                }
                Ok(())
            }
            Destination::Connection(conn) => conn.write_message(message).await,
        }
    }

    /// Send a message; `false` on any failure, which is logged.
    pub async fn send(&self, message: &Message, destination: impl Into<Destination>) -> bool {
        let destination = destination.into();
        match self.try_send(message, destination.clone()).await {
            Ok(()) => {
                debug!(topic = %message.topic, "message sent");
                true
            }
            Err(e) => {
                let target = match &destination {
                    Destination::Address(addr) => addr.to_string(),
                    Destination::Connection(conn) => conn.peer_addr().to_string(),
                };
                warn!(topic = %message.topic, %target, error = %e, "send failed");
                false
            }
        }
    }

    /// Run a background task in this transport's task group.
    ///
    /// Tasks spawned after [`Transport::stop`] are dropped.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            debug!("transport stopped, not spawning task");
            return;
        }
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
        // Reap finished tasks so the set does not grow without bound.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Whether [`Transport::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Close the listener and all cached connections and cancel every task.
    ///
    /// Idempotent; teardown errors are ignored.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            "stopping transport{}",
            self.local_addr()
                .map(|a| format!(" on {a}"))
                .unwrap_or_default()
        );

        let connections: Vec<Connection> = self
            .inner
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, conn)| conn)
            .collect();
        let closing = connections.iter().map(|conn| conn.close());
        // A writer stuck on a full socket buffer must not block shutdown.
        let _ = tokio::time::timeout(Duration::from_secs(1), futures::future::join_all(closing))
            .await;

        let mut tasks =
            std::mem::take(&mut *self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        tasks.abort_all();
    }

    /// A handle that does not keep the transport alive.
    pub fn downgrade(&self) -> WeakTransport {
        WeakTransport {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Split a stream, start its read loop and return the write handle.
    fn attach(&self, stream: TcpStream, peer: SocketAddr) -> Connection {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        let conn = Connection::new(peer, writer, self.inner.config.max_frame_size);
        self.spawn(read_loop(
            reader,
            conn.clone(),
            self.downgrade(),
            self.inner.config.max_frame_size,
        ));
        conn
    }

    fn evict(&self, address: &Address, conn: &Connection) {
        let mut connections = self
            .inner
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let key = address.to_string();
        if connections.get(&key).is_some_and(|c| c.same_as(conn)) {
            connections.remove(&key);
            debug!("evicted broken connection to {}", address);
        }
    }
}

/// Accept connections until the listener fails for good or the transport is gone.
async fn accept_loop(listener: TcpListener, transport: WeakTransport) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let Some(transport) = transport.upgrade() else {
                    break;
                };
                debug!("accepted connection from {}", peer);
                transport.attach(stream, peer);
            }
            Err(e) => {
                error!("accept error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Read loop for one connection.
async fn read_loop(
    mut reader: OwnedReadHalf,
    origin: Connection,
    transport: WeakTransport,
    max_frame_size: u32,
) {
    let peer = origin.peer_addr();
    match pump_frames(&mut reader, &origin, &transport, max_frame_size).await {
        Ok(()) => debug!("connection with {} closed", peer),
        Err(e) => warn!("connection with {} ended: {}", peer, e),
    }
}

async fn pump_frames(
    reader: &mut OwnedReadHalf,
    origin: &Connection,
    transport: &WeakTransport,
    max_frame_size: u32,
) -> Result<(), WireError> {
    let mut decoder = FrameDecoder::new(max_frame_size);
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(message)) => {
                    let Some(transport) = transport.upgrade() else {
                        return Ok(());
                    };
                    debug!(
                        peer = %origin.peer_addr(),
                        topic = %message.topic,
                        "frame received"
                    );
                    let topic = message.topic.clone();
                    let handler = Arc::clone(&transport.inner.handler);
                    if let Err(e) = handler
                        .on_message(&transport, message, origin.clone())
                        .await
                    {
                        warn!(
                            peer = %origin.peer_addr(),
                            %topic,
                            error = %e,
                            "message handler failed"
                        );
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        peer = %origin.peer_addr(),
                        error = %e,
                        "dropping undecodable frame"
                    );
                }
            }
        }

        if reader.read_buf(&mut buf).await? == 0 {
            if buf.is_empty() && !decoder.is_skipping() {
                return Ok(());
            }
            return Err(WireError::IncompleteFrame {
                buffered: buf.len(),
            });
        }
    }
}
