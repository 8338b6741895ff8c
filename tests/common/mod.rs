//! Shared utilities for integration testing.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use media_endpoint::endpoint::manager::EndpointSettings;
use media_endpoint::endpoint::{EndpointDeps, EndpointManager};
use media_endpoint::net::socket::SystemSocketFactory;
use media_endpoint::HttpProtocol;

/// IPv4-only manager with short head timeouts, binding 0.0.0.0 for
/// wildcard hosts.
#[allow(dead_code)]
pub fn ipv4_manager() -> EndpointManager {
    EndpointManager::new(
        EndpointSettings {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            enable_dual_mode: false,
            backlog: 0,
        },
        EndpointDeps {
            socket_factory: Arc::new(SystemSocketFactory),
            handler: Arc::new(HttpProtocol::new(8192, Duration::from_secs(2))),
            identity: None,
        },
    )
}

pub fn local(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// Send one request head and return the whole response.
#[allow(dead_code)]
pub async fn send_request(addr: SocketAddr, host: &str, path: &str) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    let head = format!("GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", path, host);
    stream.write_all(head.as_bytes()).await?;

    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "no response"))??;
    Ok(response)
}

/// Status code from a raw response.
#[allow(dead_code)]
pub fn status(response: &str) -> Option<u16> {
    response.split_whitespace().nth(1)?.parse().ok()
}

/// Poll `check` until it holds or a second passes.
#[allow(dead_code)]
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
