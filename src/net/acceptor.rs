//! Asynchronous accept loop.
//!
//! # Responsibilities
//! - Own the listening socket for as long as the endpoint is open
//! - Accept connections continuously on a Tokio task
//! - Hand each accepted socket to a dispatch callback
//! - Stop cleanly when closed
//!
//! # Design Decisions
//! - Cancellation is a token, checked again after every completion so a
//!   late accept is discarded once the endpoint is closed
//! - Connection resets and per-connection failures never end the loop
//! - No backoff: the next accept is issued immediately

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;

/// Source of accepted sockets.
#[async_trait]
pub trait Accept: Send + Sync + 'static {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Accept for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// A client that went away between accept and completion.
pub fn is_connection_reset(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

/// Handle to a running accept loop.
#[derive(Debug)]
pub struct SocketAcceptor {
    label: String,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SocketAcceptor {
    /// Start accepting from `source` on a new task.
    ///
    /// `dispatch` owns each accepted socket; returning an error drops it.
    /// Must be called from within a Tokio runtime.
    pub fn spawn<A, F>(label: String, source: A, dispatch: F) -> Self
    where
        A: Accept,
        F: FnMut(TcpStream, SocketAddr) -> io::Result<()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(source, cancel.clone(), label.clone(), dispatch));
        Self {
            label,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the loop and wait until the listening socket is released.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(endpoint = %self.label, error = %e, "Accept loop task failed");
            }
        }
    }
}

impl Drop for SocketAcceptor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Accept until `cancel` fires.
pub async fn accept_loop<A, F>(source: A, cancel: CancellationToken, label: String, mut dispatch: F)
where
    A: Accept,
    F: FnMut(TcpStream, SocketAddr) -> io::Result<()> + Send,
{
    tracing::debug!(endpoint = %label, "Accept loop started");

    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = source.accept() => res,
        };

        if cancel.is_cancelled() {
            // Closed while this completion was in flight.
            break;
        }

        match accepted {
            Ok((stream, peer_addr)) => {
                metrics::record_accept(&label);
                if let Err(e) = dispatch(stream, peer_addr) {
                    metrics::record_accept_error(&label, "other");
                    tracing::warn!(
                        endpoint = %label,
                        peer_addr = %peer_addr,
                        error = %e,
                        "Failed to set up accepted connection"
                    );
                }
            }
            Err(e) if is_connection_reset(&e) => {
                metrics::record_accept_error(&label, "reset");
                tracing::debug!(endpoint = %label, error = %e, "Connection reset before accept completed");
            }
            Err(e) => {
                metrics::record_accept_error(&label, "other");
                tracing::warn!(endpoint = %label, error = %e, "Accept failed");
                tokio::task::yield_now().await;
            }
        }
    }

    tracing::debug!(endpoint = %label, "Accept loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Fails the first `resets` accepts with a connection reset, then one
    /// with an unrelated error, then behaves.
    struct FlakyAccept {
        inner: TcpListener,
        resets: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Accept for FlakyAccept {
        async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.resets {
                return Err(io::Error::from(io::ErrorKind::ConnectionReset));
            }
            if call == self.resets {
                return Err(io::Error::other("too many open files"));
            }
            self.inner.accept().await
        }
    }

    async fn flaky(resets: usize) -> (FlakyAccept, SocketAddr) {
        let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = inner.local_addr().unwrap();
        (
            FlakyAccept {
                inner,
                resets,
                calls: AtomicUsize::new(0),
            },
            addr,
        )
    }

    #[tokio::test]
    async fn resets_do_not_stop_the_loop() {
        let (source, addr) = flaky(3).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let acceptor = SocketAcceptor::spawn("test".into(), source, move |stream, peer| {
            let _ = tx.send(peer);
            drop(stream);
            Ok(())
        });

        let client = TcpStream::connect(addr).await.unwrap();
        let peer = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(peer, client.local_addr().unwrap());

        acceptor.close().await;
        assert!(acceptor.is_closed());
    }

    #[tokio::test]
    async fn dispatch_errors_do_not_stop_the_loop() {
        let (source, addr) = flaky(0).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut seen = 0usize;
        let acceptor = SocketAcceptor::spawn("test".into(), source, move |_stream, peer| {
            seen += 1;
            if seen == 1 {
                return Err(io::Error::other("setup failed"));
            }
            let _ = tx.send(peer);
            Ok(())
        });

        let _first = TcpStream::connect(addr).await.unwrap();
        let second = TcpStream::connect(addr).await.unwrap();
        let peer = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(peer, second.local_addr().unwrap());

        acceptor.close().await;
    }

    #[tokio::test]
    async fn close_releases_the_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = SocketAcceptor::spawn("test".into(), listener, |_, _| Ok(()));

        acceptor.close().await;
        acceptor.close().await;

        assert!(TcpStream::connect(addr).await.is_err());
    }
}
