//! Per-request context handed from the endpoint to a listener.

use std::fmt;
use std::sync::{Arc, Weak};

use tokio::net::TcpStream;
use url::Url;

use crate::endpoint::listener::EndpointListener;
use crate::endpoint::vhost::Listener;
use crate::http::request::RequestHead;
use crate::http::response;
use crate::net::connection::Connection;
use crate::net::tls::ServerIdentity;
use crate::routing::matcher::RequestTarget;
use crate::routing::table::Binding;

/// A request whose head has been read, together with its connection.
pub struct HttpContext {
    head: RequestHead,
    url: Url,
    target: RequestTarget,
    connection: Arc<Connection>,
    stream: Option<TcpStream>,
    buffered: Vec<u8>,
    endpoint: Weak<EndpointListener>,
    identity: Option<Arc<ServerIdentity>>,
}

impl HttpContext {
    pub fn new(
        head: RequestHead,
        url: Url,
        connection: Arc<Connection>,
        stream: TcpStream,
        buffered: Vec<u8>,
        endpoint: Weak<EndpointListener>,
        identity: Option<Arc<ServerIdentity>>,
    ) -> Self {
        let target = RequestTarget::from_url(&url);
        Self {
            head,
            url,
            target,
            connection,
            stream: Some(stream),
            buffered,
            endpoint,
            identity,
        }
    }

    pub fn request(&self) -> &RequestHead {
        &self.head
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn target(&self) -> &RequestTarget {
        &self.target
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The binding the endpoint matched, once bound.
    pub fn binding(&self) -> Option<&Binding> {
        self.connection.binding()
    }

    pub fn listener(&self) -> Option<&Arc<dyn Listener>> {
        self.binding().map(|b| b.listener())
    }

    /// Body bytes that arrived together with the head.
    pub fn buffered(&self) -> &[u8] {
        &self.buffered
    }

    pub fn identity(&self) -> Option<&Arc<ServerIdentity>> {
        self.identity.as_ref()
    }

    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    /// Take the socket for protocol handling outside the context.
    pub fn take_stream(&mut self) -> Option<TcpStream> {
        self.stream.take()
    }

    /// Send a plain-text response on the context's socket.
    pub async fn respond(&mut self, status: u16, reason: &str, body: &str) -> std::io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => response::write_response(stream, status, reason, body).await,
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "context socket already taken",
            )),
        }
    }

    /// Mark the request processed: notify the owning listener and close
    /// the connection.
    pub fn finish(mut self) {
        if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.unbind_context(&self);
        }
        self.stream.take();
        self.connection.close();
    }
}

impl fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpContext")
            .field("connection_id", &self.connection.id())
            .field("method", &self.head.method)
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}
