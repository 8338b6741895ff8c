//! Minimal status responses.
//!
//! # Responsibilities
//! - Answer requests the endpoint could not route
//! - Give listeners a plain-text response helper
//!
//! # Design Decisions
//! - Every response closes the connection; keep-alive belongs to the
//!   protocol layer a listener brings

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Write a complete plain-text response and shut down the write side.
pub async fn write_response<W>(stream: &mut W, status: u16, reason: &str, body: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}

pub async fn not_found<W>(stream: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_response(stream, 404, "Not Found", "Not Found").await
}
