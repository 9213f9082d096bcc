// src/node/mod.rs
//! The correlation engine.
//!
//! [`Node`] owns one transport and multiplexes every caller over it.
//!
//! # Architecture
//!
//! Each request takes the next correlation id, registers a oneshot channel
//! in the pending table and only then writes its frame. A single dispatch
//! task reads frames from the transport handle and routes each one:
//!
//! - a frame with a `method` goes to every subscriber of that topic;
//! - a frame whose `id` is pending completes that request.
//!
//! The two routes are independent; one frame may take both.
//!
//! # Concurrency
//!
//! `Node` is cheap to clone and every method may be called from any task.
//! The pending table and the subscriber registry sit behind separate locks,
//! are never locked together and are never held across an `.await`.
//!
//! # Shutdown
//!
//! Shutdown and transport failure both close the pending table under its
//! write lock. Requests already waiting are completed immediately with
//! `Shutdown` or `ConnectionLost`; requests arriving later fail without
//! touching the transport.

mod dispatch;
mod keepalive;
mod pending;
mod response;
mod subscriptions;

use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use crate::protocol::{CorrelationId, IdGenerator, RequestEnvelope};
use crate::{
    //
    log_debug,
    log_error,
    log_info,
    log_trace,
    NodeConfig,
    Result,
    RpcError,
    TransportError,
    TransportHandle,
    TransportPtr,
};

use pending::PendingTable;
use subscriptions::SubscriberRegistry;

pub use response::{Notification, Response};
pub use subscriptions::SubscriptionHandle;

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// None of the guarded state has invariants spanning a panic; the worst
/// outcome is a dropped or unmatched response.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_ignore_poison<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    // ---
    match l.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_ignore_poison<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    // ---
    match l.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Tasks and transport belonging to a live connection.
struct Connection {
    transport: TransportPtr,
    dispatch: JoinHandle<()>,
    keep_alive: Option<JoinHandle<()>>,
}

enum ConnState {
    Idle,
    Connecting,
    Connected(Connection),
    Closed,
}

struct Inner {
    // ---
    config: NodeConfig,
    ids: IdGenerator,
    state: Mutex<ConnState>,
    pending: RwLock<PendingTable>,
    subscriptions: SubscriberRegistry,
    errors: watch::Sender<Option<TransportError>>,
}

impl Inner {
    /// Move to `Closed`, returning the live connection if there was one.
    fn take_connection(&self) -> Option<Connection> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        match std::mem::replace(&mut *state, ConnState::Closed) {
            ConnState::Connected(conn) => Some(conn),
            _ => None,
        }
    }

    /// Fail every waiter and end every subscription.
    fn close_tables<F>(&self, reason: F) -> usize
    where
        F: Fn() -> RpcError,
    {
        // ---
        let failed = write_ignore_poison(&self.pending).close(reason);
        self.subscriptions.close();
        failed
    }

    /// Called by the dispatch task when the transport reports failure.
    async fn fail_connection(&self, err: TransportError) {
        // ---
        log_error!("connection lost: {err}");
        self.errors.send_replace(Some(err.clone()));

        let conn = self.take_connection();
        let _failed = self.close_tables(|| RpcError::ConnectionLost(err.clone()));
        log_debug!("failed {_failed} pending request(s) after connection loss");

        if let Some(conn) = conn {
            if let Some(keep_alive) = conn.keep_alive {
                keep_alive.abort();
            }
            // `conn.dispatch` is the calling task; dropping the handle detaches it.
            if let Err(_err) = conn.transport.close().await {
                log_debug!("transport close after failure: {_err}");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // ---
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let ConnState::Connected(conn) = std::mem::replace(state, ConnState::Closed) {
            conn.dispatch.abort();
            if let Some(keep_alive) = conn.keep_alive {
                keep_alive.abort();
            }
        }
    }
}

/// Removes a request's pending entry when the request ends, however it ends.
///
/// Removal after a delivered response finds nothing and is a no-op.
struct PendingEntryGuard<'a> {
    pending: &'a RwLock<PendingTable>,
    id: CorrelationId,
}

impl Drop for PendingEntryGuard<'_> {
    fn drop(&mut self) {
        write_ignore_poison(self.pending).remove(self.id);
    }
}

/// Client connection to one server.
///
/// Cheap to clone (internally `Arc`-backed); all clones share the same
/// connection, id counter and tables.
///
/// # Example
///
/// ```no_run
/// use electrum_rpc::{topics, Node};
/// use serde_json::json;
///
/// # async fn example() -> electrum_rpc::Result<()> {
/// let node = Node::new();
/// node.connect_tcp("electrum.example.org:50001").await?;
///
/// let version: Vec<String> = node
///     .request("server.version", vec![json!("my-wallet"), json!("1.4")])
///     .await?;
///
/// let mut headers = node.subscribe(topics::HEADERS);
/// let _tip: serde_json::Value = node.request(topics::HEADERS, vec![]).await?;
/// while let Some(update) = headers.recv().await {
///     println!("new tip: {}", String::from_utf8_lossy(update.frame()));
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Node {
    inner: Arc<Inner>,
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    // ---

    /// Unconnected node with default configuration.
    pub fn new() -> Self {
        Self::with_config(NodeConfig::default())
    }

    /// Unconnected node with the given configuration.
    pub fn with_config(config: NodeConfig) -> Self {
        // ---
        let (errors, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                ids: IdGenerator::new(),
                state: Mutex::new(ConnState::Idle),
                pending: RwLock::new(PendingTable::new()),
                subscriptions: SubscriberRegistry::new(),
                errors,
            }),
        }
    }

    /// Configuration this node was built with.
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Connect over plain TCP.
    ///
    /// # Errors
    ///
    /// - `RpcError::AlreadyConnected` if a transport is attached or being attached
    /// - `RpcError::Shutdown` if the node was shut down
    /// - `RpcError::Io` if the server cannot be reached; the node stays connectable
    pub async fn connect_tcp(&self, addr: &str) -> Result<()> {
        // ---
        self.begin_connect()?;
        let config = self.inner.config.transport_config();
        match crate::create_tcp_transport(addr, &config).await {
            Ok((transport, handle)) => self.attach(transport, handle).await,
            Err(err) => {
                self.abandon_connect();
                Err(err)
            }
        }
    }

    /// Connect over TLS.
    ///
    /// # Errors
    ///
    /// As [`connect_tcp`](Self::connect_tcp), plus `RpcError::Tls` if the
    /// handshake fails.
    #[cfg(feature = "transport_tls")]
    pub async fn connect_tls(&self, addr: &str, tls: &crate::TlsConfig) -> Result<()> {
        // ---
        self.begin_connect()?;
        let config = self.inner.config.transport_config();
        match crate::create_tls_transport(addr, tls, &config).await {
            Ok((transport, handle)) => self.attach(transport, handle).await,
            Err(err) => {
                self.abandon_connect();
                Err(err)
            }
        }
    }

    /// Attach an already established transport.
    ///
    /// This is the constructor you want for tests and custom transports.
    ///
    /// # Errors
    ///
    /// `RpcError::AlreadyConnected` or `RpcError::Shutdown`; the given
    /// transport is closed in that case and the existing connection is not
    /// affected.
    pub async fn connect_with(&self, transport: TransportPtr, handle: TransportHandle) -> Result<()> {
        // ---
        if let Err(err) = self.begin_connect() {
            let _ = transport.close().await;
            return Err(err);
        }
        self.attach(transport, handle).await
    }

    /// Claim the connection slot: `Idle` → `Connecting`.
    fn begin_connect(&self) -> Result<()> {
        // ---
        let mut state = lock_ignore_poison(&self.inner.state);
        match *state {
            ConnState::Idle => {
                *state = ConnState::Connecting;
                Ok(())
            }
            ConnState::Connecting | ConnState::Connected(_) => Err(RpcError::AlreadyConnected),
            ConnState::Closed => Err(RpcError::Shutdown),
        }
    }

    /// Dial failed: release the slot unless shutdown already took it.
    fn abandon_connect(&self) {
        // ---
        let mut state = lock_ignore_poison(&self.inner.state);
        if matches!(*state, ConnState::Connecting) {
            *state = ConnState::Idle;
        }
    }

    /// `Connecting` → `Connected`: start the dispatch (and keep-alive) tasks.
    async fn attach(&self, transport: TransportPtr, handle: TransportHandle) -> Result<()> {
        // ---
        let attached = {
            let mut state = lock_ignore_poison(&self.inner.state);
            if matches!(*state, ConnState::Connecting) {
                let weak = Arc::downgrade(&self.inner);
                let dispatch = tokio::spawn(dispatch::run(weak.clone(), handle));
                let keep_alive = self
                    .inner
                    .config
                    .keep_alive
                    .map(|interval| tokio::spawn(keepalive::run(weak, interval)));

                log_info!("{}: connected ({})", transport.peer(), transport.kind());

                *state = ConnState::Connected(Connection {
                    transport: transport.clone(),
                    dispatch,
                    keep_alive,
                });
                true
            } else {
                false
            }
        };

        if attached {
            Ok(())
        } else {
            // Shutdown won the race while we were dialing.
            let _ = transport.close().await;
            Err(RpcError::Shutdown)
        }
    }

    fn transport(&self) -> Result<TransportPtr> {
        // ---
        match &*lock_ignore_poison(&self.inner.state) {
            ConnState::Connected(conn) => Ok(conn.transport.clone()),
            ConnState::Closed => Err(RpcError::Shutdown),
            ConnState::Idle | ConnState::Connecting => Err(RpcError::NotConnected),
        }
    }

    /// Call `method` and decode the `result` member into `R`.
    ///
    /// Use `R = serde_json::Value` to keep the result untyped, or `()` to
    /// ignore it.
    ///
    /// # Errors
    ///
    /// - `RpcError::Protocol` if the server answered with an error; nothing is decoded
    /// - `RpcError::Serialization` if the result does not decode into `R`
    /// - any error from [`call`](Self::call)
    pub async fn request<R>(&self, method: &str, params: Vec<Value>) -> Result<R>
    where
        R: DeserializeOwned,
    {
        // ---
        let response = self.call(method, params).await?;
        Ok(response.result()?)
    }

    /// Call `method` and return the raw response.
    ///
    /// The pending entry is registered before the frame is written, so a
    /// response can never arrive ahead of its waiter. The entry is removed on
    /// every outcome, including when the returned future is dropped.
    ///
    /// `request_timeout` bounds the whole call: writing the frame and waiting
    /// for the answer share one deadline. A write cut short by the deadline
    /// leaves a partial frame behind, so the transport retires the
    /// connection.
    ///
    /// # Errors
    ///
    /// - `RpcError::Shutdown` / `RpcError::NotConnected` before anything is sent
    /// - `RpcError::IdCollision` if the next id is still outstanding
    /// - `RpcError::Transport` if the frame cannot be written
    /// - `RpcError::Timeout` when the deadline passes
    /// - `RpcError::ConnectionLost` / `RpcError::Shutdown` if the connection
    ///   ends while sending or waiting
    /// - `RpcError::Protocol` if the server answered with an error
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Response> {
        // ---
        let transport = self.transport()?;
        let deadline = time::Instant::now() + self.inner.config.request_timeout;

        let id = self.inner.ids.next_id();
        let frame = RequestEnvelope::new(id, method, params).to_frame()?;

        let mut rx = write_ignore_poison(&self.inner.pending).register(id)?;
        let _entry = PendingEntryGuard {
            pending: &self.inner.pending,
            id,
        };

        log_trace!("request {id}: {method}");

        let sent = match time::timeout_at(deadline, transport.send(frame)).await {
            Ok(sent) => sent,
            Err(_) => {
                log_debug!("request {id} ({method}) timed out while sending");
                return Err(RpcError::Timeout);
            }
        };

        let reply = match sent {
            Ok(()) => match time::timeout_at(deadline, rx).await {
                Ok(Ok(reply)) => reply,
                // Sender dropped without a reply: the table went away with the node.
                Ok(Err(_)) => return Err(RpcError::Shutdown),
                Err(_) => {
                    log_debug!("request {id} ({method}) timed out");
                    return Err(RpcError::Timeout);
                }
            },
            // A closed table has already queued the reason (shutdown or lost
            // connection); it explains the failed write better than the
            // transport's own error.
            Err(err) => match rx.try_recv() {
                Ok(reply) => reply,
                Err(_) => return Err(err),
            },
        };

        let envelope = reply?;
        if let Some(api) = envelope.error.clone() {
            log_debug!("request {id} ({method}) failed: {api}");
            return Err(RpcError::Protocol(api));
        }
        Ok(Response::new(envelope))
    }

    /// Register a new subscriber for push notifications on `topic`.
    ///
    /// Returns immediately. The topic is not checked and repeated calls add
    /// independent subscribers. Each subscriber has a buffer of
    /// `subscriber_capacity`; while it is full, further notifications for
    /// that subscriber are dropped (drop-newest) so the dispatch loop never
    /// waits.
    ///
    /// Subscribing does not tell the server anything; the caller still has
    /// to issue the protocol's subscribe request.
    pub fn subscribe(&self, topic: &str) -> SubscriptionHandle {
        // ---
        self.inner
            .subscriptions
            .subscribe(topic, self.inner.config.subscriber_capacity)
    }

    /// Stop accepting requests and release the connection.
    ///
    /// Requests already waiting fail immediately with `RpcError::Shutdown`,
    /// subscription streams end, the dispatch task stops and the transport is
    /// closed. Calling it again has no effect.
    pub async fn shutdown(&self) {
        // ---
        let conn = self.inner.take_connection();
        let _failed = self.inner.close_tables(|| RpcError::Shutdown);

        if let Some(conn) = conn {
            conn.dispatch.abort();
            if let Some(keep_alive) = conn.keep_alive {
                keep_alive.abort();
            }
            if let Err(_err) = conn.transport.close().await {
                log_debug!("transport close on shutdown: {_err}");
            }
            log_info!("{}: shut down, failed {_failed} pending request(s)", conn.transport.peer());
        }
    }

    /// Stream-level failure reports. The value becomes `Some` exactly once,
    /// when the transport fails.
    pub fn errors(&self) -> watch::Receiver<Option<TransportError>> {
        self.inner.errors.subscribe()
    }

    /// The transport failure, if one has happened.
    pub fn transport_error(&self) -> Option<TransportError> {
        self.inner.errors.borrow().clone()
    }

    /// True while a transport is attached and alive.
    pub fn is_connected(&self) -> bool {
        matches!(
            *lock_ignore_poison(&self.inner.state),
            ConnState::Connected(_)
        )
    }

    /// True after shutdown or transport failure.
    pub fn is_closed(&self) -> bool {
        read_ignore_poison(&self.inner.pending).is_closed()
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        read_ignore_poison(&self.inner.pending).len()
    }

    /// Number of subscribers under `topic` whose handles are still alive.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.subscriptions.subscriber_count(topic)
    }
}
