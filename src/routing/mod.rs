//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration:
//!     "http://host:port/path/"
//!     → prefix.rs (parse, normalize, classify host)
//!     → table.rs (duplicate check, copy-on-write insert)
//!
//! Incoming request (host, port, path)
//!     → table.rs (exact hosts, then "*", then "+")
//!     → matcher.rs (longest path prefix within a class)
//!     → Return: Binding or no match
//! ```
//!
//! # Design Decisions
//! - The table is an immutable snapshot swapped atomically; lookups never lock
//! - Concurrent writers retry until their change lands on the latest snapshot
//! - Deterministic: ties go to the earliest registration

pub mod matcher;
pub mod prefix;
pub mod table;

pub use prefix::{HostKind, Prefix, PrefixError};
pub use table::{Binding, Removal, RouteError, RoutingTable};
