//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track connection state (Registered → Bound | Closed)
//! - Generate unique connection IDs for tracing
//! - Hold the accepted socket until the protocol layer claims it
//! - Force-close a connection from any task
//!
//! # Design Decisions
//! - State is a single atomic so `bind` and `close` race safely
//! - Closing cancels a token the owning task selects on, so a socket that
//!   was already handed off is still torn down

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::net::TcpStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::observability::metrics;
use crate::routing::table::Binding;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted and waiting for its request to be routed.
    Registered = 0,
    /// Claimed by a listener.
    Bound = 1,
    /// Closed by error, shutdown or request completion.
    Closed = 2,
}

impl From<u8> for ConnectionState {
    fn from(val: u8) -> Self {
        match val {
            0 => ConnectionState::Registered,
            1 => ConnectionState::Bound,
            _ => ConnectionState::Closed,
        }
    }
}

/// One accepted client connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    secure: bool,
    stream: Mutex<Option<TcpStream>>,
    state: AtomicU8,
    binding: OnceLock<Binding>,
    closed: CancellationToken,
    _guard: ConnectionGuard,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        secure: bool,
        guard: ConnectionGuard,
    ) -> Self {
        Self {
            id: guard.id(),
            peer_addr,
            local_addr,
            secure,
            stream: Mutex::new(Some(stream)),
            state: AtomicU8::new(ConnectionState::Registered as u8),
            binding: OnceLock::new(),
            closed: CancellationToken::new(),
            _guard: guard,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load(Ordering::Acquire).into()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Take the socket out of the connection. Returns `None` once taken or
    /// after the connection was closed.
    pub fn take_stream(&self) -> Option<TcpStream> {
        if self.is_closed() {
            return None;
        }
        self.stream.lock().ok().and_then(|mut s| s.take())
    }

    /// Attach the routed binding. Only a registered connection can be bound.
    pub fn bind(&self, binding: Binding) -> bool {
        let bound = self
            .state
            .compare_exchange(
                ConnectionState::Registered as u8,
                ConnectionState::Bound as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if bound {
            let _ = self.binding.set(binding);
        }
        bound
    }

    /// The binding this connection was routed to, once bound.
    pub fn binding(&self) -> Option<&Binding> {
        self.binding.get()
    }

    /// Force-close the connection. Idempotent.
    pub fn close(&self) {
        let previous = self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if previous == ConnectionState::Closed as u8 {
            return;
        }
        self.closed.cancel();
        if let Ok(mut stream) = self.stream.lock() {
            stream.take();
        }
        tracing::trace!(connection_id = %self.id, peer_addr = %self.peer_addr, "Connection closed");
    }

    /// Resolves once the connection has been closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}

/// Tracks live connections for one endpoint.
///
/// A labeled tracker publishes the live count as a gauge whenever a
/// connection is tracked or its guard is dropped.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    /// Current count of live connections.
    active_count: Arc<AtomicU64>,
    label: Option<Arc<str>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker that reports its count under the `endpoint` label.
    pub fn labeled(label: impl Into<Arc<str>>) -> Self {
        Self {
            active_count: Arc::default(),
            label: Some(label.into()),
        }
    }

    /// Record a new live connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let count = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        publish(self.label.as_deref(), count);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            label: self.label.clone(),
            id: ConnectionId::new(),
        }
    }

    /// Get current live connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

fn publish(label: Option<&str>, count: u64) {
    if let Some(label) = label {
        metrics::record_live_connections(label, count);
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    label: Option<Arc<str>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let count = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        publish(self.label.as_deref(), count);
    }
}
