//! Logical listeners (virtual hosts).
//!
//! # Responsibilities
//! - Define the contract a listener offers to the endpoint
//! - Provide a queue-backed listener for applications to consume
//!
//! # Design Decisions
//! - Listeners are compared by identity, so one listener can own many
//!   prefixes across several endpoints
//! - Routed contexts are queued, never processed on the accept path

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::http::context::HttpContext;

/// A logical virtual host that receives routed requests.
pub trait Listener: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Take ownership of a routed context.
    fn dispatch(&self, context: HttpContext);

    /// Called once the context has been processed.
    fn unbind_context(&self, context: &HttpContext);
}

/// Listener that forwards routed contexts to an unbounded queue.
pub struct VirtualHost {
    name: String,
    queue: mpsc::UnboundedSender<HttpContext>,
    in_flight: AtomicU64,
    completed: AtomicU64,
}

impl VirtualHost {
    /// Create a listener and the receiving end of its context queue.
    pub fn new(name: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<HttpContext>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let host = Arc::new(Self {
            name: name.into(),
            queue: tx,
            in_flight: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        });
        (host, rx)
    }

    /// Contexts dispatched but not yet unbound.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }
}

impl Listener for VirtualHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn dispatch(&self, context: HttpContext) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(context)) = self.queue.send(context) {
            tracing::warn!(listener = %self.name, connection_id = %context.connection().id(), "Listener queue closed, dropping request");
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            context.connection().close();
        }
    }

    fn unbind_context(&self, context: &HttpContext) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(listener = %self.name, connection_id = %context.connection().id(), "Context processed");
    }
}

impl fmt::Debug for VirtualHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualHost")
            .field("name", &self.name)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
