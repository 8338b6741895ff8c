//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Load identity → Register listeners
//!
//! Reload (startup.rs):
//!     New config → Diff registrations → Remove stale → Add fresh
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop consumers → Close endpoints → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then identity, then endpoints
//! - Ordered shutdown: stop accept, close unrouted connections, exit

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::Server;
