//! Endpoint subsystem.
//!
//! # Data Flow
//! ```text
//! Listener registers "http://host:port/path/"
//!     → manager.rs (parse, find-or-create endpoint for address+port)
//!     → listener.rs (insert into the endpoint's routing table)
//!
//! Accepted connection
//!     → listener.rs (register, spawn protocol handler)
//!     → ConnectionHandler reads the request head
//!     → listener.rs bind_context (resolve, unregister, bind)
//!     → vhost.rs (listener queue) | not-found response
//! ```
//!
//! # Design Decisions
//! - One endpoint per (address, port); many listeners share it
//! - The manager is an explicit value owned by the caller, not a global
//! - An endpoint closes as soon as its last prefix is removed

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;

use crate::net::connection::Connection;
use crate::net::socket::{BindError, SocketFactory};
use crate::net::tls::ServerIdentity;
use crate::routing::prefix::PrefixError;
use crate::routing::table::RouteError;

pub mod listener;
pub mod manager;
pub mod vhost;

pub use listener::EndpointListener;
pub use manager::EndpointManager;
pub use vhost::{Listener, VirtualHost};

/// Error type for prefix registration.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Prefix(#[from] PrefixError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("endpoint {endpoint} serves {existing} traffic; cannot add '{prefix}'")]
    SchemeMismatch {
        endpoint: EndpointKey,
        existing: &'static str,
        prefix: String,
    },
}

/// Identifies one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub address: IpAddr,
    pub port: u16,
}

impl EndpointKey {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Per-endpoint bind parameters.
#[derive(Debug, Clone, Copy)]
pub struct EndpointOptions {
    pub key: EndpointKey,
    pub secure: bool,
    pub enable_dual_mode: bool,
    /// 0 selects the platform maximum.
    pub backlog: u32,
}

/// Collaborators an endpoint threads through to its connections.
#[derive(Clone)]
pub struct EndpointDeps {
    pub socket_factory: Arc<dyn SocketFactory>,
    pub handler: Arc<dyn ConnectionHandler>,
    pub identity: Option<Arc<ServerIdentity>>,
}

impl fmt::Debug for EndpointDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDeps")
            .field("socket_factory", &self.socket_factory)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Protocol initialization for accepted connections.
///
/// Runs on its own task per connection. Implementations either route the
/// connection with [`EndpointListener::bind_context`] or give it back with
/// [`EndpointListener::release`].
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle(&self, connection: Arc<Connection>, endpoint: Arc<EndpointListener>);
}
