//! HTTP protocol initialization for accepted connections.
//!
//! # Responsibilities
//! - Read the request head off a freshly accepted connection
//! - Build the request URI and hand the context to the endpoint for routing
//! - Answer unroutable or malformed requests and release the connection
//!
//! # Design Decisions
//! - Head reads are bounded in size and time
//! - Closing the endpoint interrupts a head read in progress
//! - Routed contexts are dispatched without waiting on the listener

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::endpoint::{ConnectionHandler, EndpointListener};
use crate::http::context::HttpContext;
use crate::http::request::{read_head, HeadError};
use crate::http::response;
use crate::net::connection::Connection;
use crate::observability::metrics;

/// Reads one HTTP/1.x request head per connection and routes it.
#[derive(Debug, Clone)]
pub struct HttpProtocol {
    max_head_bytes: usize,
    head_timeout: Duration,
}

impl HttpProtocol {
    pub fn new(max_head_bytes: usize, head_timeout: Duration) -> Self {
        Self {
            max_head_bytes,
            head_timeout,
        }
    }
}

impl Default for HttpProtocol {
    fn default() -> Self {
        Self::new(8192, Duration::from_secs(10))
    }
}

#[async_trait]
impl ConnectionHandler for HttpProtocol {
    async fn handle(&self, connection: Arc<Connection>, endpoint: Arc<EndpointListener>) {
        let Some(mut stream) = connection.take_stream() else {
            endpoint.release(&connection);
            return;
        };

        let read = tokio::select! {
            _ = connection.closed() => {
                tracing::trace!(connection_id = %connection.id(), "Connection closed before request head");
                return;
            }
            read = tokio::time::timeout(self.head_timeout, read_head(&mut stream, self.max_head_bytes)) => read,
        };

        let (head, buffered) = match read {
            Ok(Ok(parsed)) => parsed,
            Ok(Err(HeadError::Closed)) => {
                tracing::trace!(connection_id = %connection.id(), "Peer closed before sending a request");
                endpoint.release(&connection);
                return;
            }
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %connection.id(), error = %e, "Rejecting request head");
                let _ = response::write_response(&mut stream, 400, "Bad Request", "Bad Request").await;
                endpoint.release(&connection);
                return;
            }
            Err(_) => {
                tracing::debug!(
                    connection_id = %connection.id(),
                    timeout_secs = self.head_timeout.as_secs(),
                    "Request head timed out"
                );
                endpoint.release(&connection);
                return;
            }
        };

        let url = match head.url(connection.is_secure(), connection.local_addr()) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(connection_id = %connection.id(), target = %head.target, error = %e, "Invalid request URI");
                let _ = response::write_response(&mut stream, 400, "Bad Request", "Bad Request").await;
                endpoint.release(&connection);
                return;
            }
        };

        let mut context = HttpContext::new(
            head,
            url,
            connection.clone(),
            stream,
            buffered,
            Arc::downgrade(&endpoint),
            endpoint.identity(),
        );

        if endpoint.bind_context(&mut context) {
            metrics::record_route("bound");
            if let Some(listener) = context.listener().cloned() {
                listener.dispatch(context);
            }
            return;
        }

        metrics::record_route("not_found");
        if !connection.is_closed() {
            if let Some(stream) = context.stream_mut() {
                let _ = response::not_found(stream).await;
            }
        }
        endpoint.release(&connection);
    }
}
