//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection
//!     → server.rs (protocol initialization, head read with limits)
//!     → request.rs (request line, Host, absolute URI)
//!     → context.rs (request + connection handed to the listener)
//!     → response.rs (not-found and error responses)
//! ```

pub mod context;
pub mod request;
pub mod response;
pub mod server;

pub use context::HttpContext;
pub use server::HttpProtocol;
