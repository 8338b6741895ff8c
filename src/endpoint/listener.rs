//! One listening endpoint.
//!
//! # Responsibilities
//! - Own the socket acceptor for one address and port
//! - Route contexts through the endpoint's prefix table
//! - Track unrouted connections and tear them down on close
//!
//! # Design Decisions
//! - The accept task holds only a weak reference to the endpoint
//! - A connection leaves the registry the moment it is bound or released
//! - `close` is idempotent and returns after every unrouted connection is closed

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::endpoint::vhost::Listener;
use crate::endpoint::{ConnectionHandler, EndpointDeps, EndpointKey, EndpointOptions};
use crate::http::context::HttpContext;
use crate::net::acceptor::{Accept, SocketAcceptor};
use crate::net::connection::{Connection, ConnectionTracker};
use crate::net::registry::ConnectionRegistry;
use crate::net::socket::{self, BindError, BindOptions};
use crate::net::tls::ServerIdentity;
use crate::observability::metrics;
use crate::routing::matcher::RequestTarget;
use crate::routing::prefix::Prefix;
use crate::routing::table::{Binding, Removal, RouteError, RoutingTable};

pub struct EndpointListener {
    key: EndpointKey,
    label: String,
    local_addr: SocketAddr,
    secure: bool,
    dual_mode: bool,
    routes: RoutingTable,
    connections: ConnectionRegistry,
    tracker: ConnectionTracker,
    acceptor: OnceLock<SocketAcceptor>,
    handler: Arc<dyn ConnectionHandler>,
    identity: Option<Arc<ServerIdentity>>,
    closed: AtomicBool,
    released: CancellationToken,
}

impl EndpointListener {
    /// Bind a socket for `options` and start accepting.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(options: EndpointOptions, deps: &EndpointDeps) -> Result<Arc<Self>, BindError> {
        let bound = socket::bind_listener(
            deps.socket_factory.as_ref(),
            BindOptions {
                addr: options.key.socket_addr(),
                enable_dual_mode: options.enable_dual_mode,
                backlog: options.backlog,
            },
        )?;
        let local_addr = bound.local_addr;
        let listener = TcpListener::from_std(bound.listener)
            .map_err(|source| BindError::Listen { addr: local_addr, source })?;

        Ok(Self::with_source(listener, local_addr, bound.dual_mode, options, deps))
    }

    /// Start an endpoint on an already prepared accept source.
    pub fn with_source<A: Accept>(
        source: A,
        local_addr: SocketAddr,
        dual_mode: bool,
        options: EndpointOptions,
        deps: &EndpointDeps,
    ) -> Arc<Self> {
        let endpoint = Arc::new(Self {
            key: options.key,
            label: options.key.to_string(),
            local_addr,
            secure: options.secure,
            dual_mode,
            routes: RoutingTable::new(),
            connections: ConnectionRegistry::new(),
            tracker: ConnectionTracker::labeled(options.key.to_string()),
            acceptor: OnceLock::new(),
            handler: deps.handler.clone(),
            identity: deps.identity.clone(),
            closed: AtomicBool::new(false),
            released: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&endpoint);
        let acceptor = SocketAcceptor::spawn(endpoint.label.clone(), source, move |stream, peer| match weak.upgrade() {
            Some(endpoint) => endpoint.on_accepted(stream, peer),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "endpoint dropped")),
        });
        let _ = endpoint.acceptor.set(acceptor);

        tracing::info!(
            endpoint = %endpoint.label,
            address = %local_addr,
            secure = endpoint.secure,
            dual_mode,
            "Endpoint listening"
        );
        endpoint
    }

    fn on_accepted(self: &Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "endpoint closed"));
        }

        let local_addr = stream.local_addr()?;
        let connection = Arc::new(Connection::new(
            stream,
            peer_addr,
            local_addr,
            self.secure,
            self.tracker.track(),
        ));
        self.connections.register(connection.clone());

        // close() may have drained the registry between the check above and
        // the registration.
        if self.is_closed() {
            self.release(&connection);
            return Ok(());
        }

        tracing::debug!(
            endpoint = %self.label,
            connection_id = %connection.id(),
            peer_addr = %peer_addr,
            "Connection accepted"
        );

        let handler = self.handler.clone();
        let endpoint = Arc::clone(self);
        tokio::spawn(async move {
            handler.handle(connection, endpoint).await;
        });
        Ok(())
    }

    pub fn key(&self) -> EndpointKey {
        self.key
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn dual_mode(&self) -> bool {
        self.dual_mode
    }

    pub fn identity(&self) -> Option<Arc<ServerIdentity>> {
        self.identity.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn add_prefix(&self, prefix: Prefix, listener: Arc<dyn Listener>) -> Result<(), RouteError> {
        let name = listener.name().to_string();
        let shown = prefix.to_string();
        self.routes.add(prefix, listener)?;
        metrics::record_prefix_count(&self.label, self.routes.len());
        tracing::info!(endpoint = %self.label, prefix = %shown, listener = %name, "Prefix registered");
        Ok(())
    }

    /// Remove a prefix. `Removal::Removed { now_empty: true }` tells the
    /// caller this endpoint has nothing left to serve.
    pub fn remove_prefix(&self, prefix: &Prefix, listener: &Arc<dyn Listener>) -> Removal {
        let removal = self.routes.remove(prefix, listener);
        match removal {
            Removal::Removed { now_empty } => {
                metrics::record_prefix_count(&self.label, self.routes.len());
                tracing::info!(endpoint = %self.label, prefix = %prefix, now_empty, "Prefix removed");
            }
            Removal::NotFound => {
                tracing::debug!(endpoint = %self.label, prefix = %prefix, "Prefix not registered, nothing to remove");
            }
        }
        removal
    }

    pub fn resolve(&self, target: &RequestTarget) -> Option<Binding> {
        self.routes.resolve(target)
    }

    pub fn prefixes(&self) -> Vec<Prefix> {
        self.routes.prefixes()
    }

    pub fn prefixes_of(&self, listener: &Arc<dyn Listener>) -> Vec<Prefix> {
        self.routes.prefixes_of(listener)
    }

    pub fn prefix_count(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Route `context` to its listener.
    ///
    /// On success the context's connection is bound to the matched prefix
    /// and leaves the registry. Returns `false` when nothing matches or the
    /// connection was closed meanwhile.
    pub fn bind_context(&self, context: &mut HttpContext) -> bool {
        let Some(binding) = self.resolve(context.target()) else {
            tracing::debug!(
                endpoint = %self.label,
                connection_id = %context.connection().id(),
                url = %context.url(),
                "No prefix matched"
            );
            return false;
        };

        let connection = context.connection().clone();
        let prefix = binding.prefix().to_string();
        let listener = binding.listener().name().to_string();
        if !connection.bind(binding) {
            return false;
        }
        self.connections.unregister(connection.id());

        tracing::debug!(
            endpoint = %self.label,
            connection_id = %connection.id(),
            prefix = %prefix,
            listener = %listener,
            "Request bound"
        );
        true
    }

    /// Notify the owning listener that `context` has been processed.
    pub fn unbind_context(&self, context: &HttpContext) {
        if let Some(listener) = context.listener() {
            listener.unbind_context(context);
        }
    }

    /// Drop an unrouted connection: unregister and close it.
    pub fn release(&self, connection: &Connection) {
        self.connections.unregister(connection.id());
        connection.close();
    }

    /// Connections accepted but not yet routed.
    pub fn pending_connections(&self) -> usize {
        self.connections.len()
    }

    /// Connections accepted and not yet dropped, routed or not.
    pub fn live_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Stop accepting, release the socket and close unrouted connections.
    /// Every caller returns only after the socket is released.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            self.released.cancelled().await;
            return;
        }
        if let Some(acceptor) = self.acceptor.get() {
            acceptor.close().await;
        }
        let closed = self.connections.close_all();
        metrics::record_prefix_count(&self.label, self.routes.len());
        self.released.cancel();
        tracing::info!(endpoint = %self.label, closed_connections = closed, "Endpoint closed");
    }

    /// Resolves once `close` has finished and the listening socket is gone.
    pub fn released(&self) -> WaitForCancellationFuture<'_> {
        self.released.cancelled()
    }
}

impl std::fmt::Debug for EndpointListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointListener")
            .field("key", &self.key)
            .field("local_addr", &self.local_addr)
            .field("secure", &self.secure)
            .field("dual_mode", &self.dual_mode)
            .field("prefixes", &self.routes.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
