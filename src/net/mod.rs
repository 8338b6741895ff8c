//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Bind request (address, port, secure)
//!     → socket.rs (create socket, dual-stack fallback, bind, listen)
//!     → acceptor.rs (accept loop on a Tokio task)
//!     → connection.rs (lifecycle tracking, state machine)
//!     → registry.rs (held until routed or closed)
//!     → Hand off to HTTP layer
//!
//! Connection States:
//!     Registered → Bound | Closed
//! ```
//!
//! # Design Decisions
//! - Accept errors stay inside the loop; only bind errors reach callers
//! - Each unrouted connection is registered for shutdown teardown
//! - TLS identity is carried, not interpreted

pub mod acceptor;
pub mod connection;
pub mod registry;
pub mod socket;
pub mod tls;
