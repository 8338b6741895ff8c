//! Socket-level HTTP endpoint listener for a media server.
//!
//! Logical listeners register URL prefixes; prefixes that share an address
//! and port share one listening socket. Accepted connections are read up to
//! their request head, routed to the listener with the best matching prefix,
//! and handed over as an [`http::HttpContext`].

pub mod config;
pub mod endpoint;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;

pub use config::schema::MediaServerConfig;
pub use endpoint::{EndpointListener, EndpointManager, Listener, RegistrationError, VirtualHost};
pub use http::{HttpContext, HttpProtocol};
pub use lifecycle::{Server, Shutdown};
