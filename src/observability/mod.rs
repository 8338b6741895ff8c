//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Endpoint subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Connection IDs flow through every accept/route log line
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
