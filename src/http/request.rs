//! Request head extraction.
//!
//! # Responsibilities
//! - Read bytes until the end of the request head
//! - Extract method, request target, version and `Host`
//! - Build the absolute request URI used for routing
//!
//! # Design Decisions
//! - Framing and token rules come from `httparse`; only what routing needs
//!   is copied out, other headers pass through untouched
//! - Head size is capped before the terminator is found
//! - A `Host` value must be a bare authority before it becomes part of a URI
//! - Bytes read past the head are kept for the listener

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

/// Error type for reading a request head.
#[derive(Debug, thiserror::Error)]
pub enum HeadError {
    #[error("connection closed before the request head was complete")]
    Closed,
    #[error("request head exceeds {0} bytes")]
    TooLarge(usize),
    #[error("malformed request head: {0}")]
    Malformed(&'static str),
    #[error("invalid request head: {0}")]
    Parse(#[from] httparse::Error),
    #[error("invalid request URI: {0}")]
    Uri(#[from] url::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The parts of a request head the endpoint cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub host: Option<String>,
}

impl RequestHead {
    /// Absolute URI for this request.
    ///
    /// Origin-form targets are combined with the `Host` header, or with the
    /// local address when the client sent none.
    pub fn url(&self, secure: bool, local_addr: SocketAddr) -> Result<Url, HeadError> {
        let lower = self.target.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(Url::parse(&self.target)?);
        }
        if !self.target.starts_with('/') {
            return Err(HeadError::Malformed("unsupported request target form"));
        }

        let scheme = if secure { "https" } else { "http" };
        let authority = match self.host.as_deref() {
            Some(host) => checked_authority(host)?.to_string(),
            None => local_addr.to_string(),
        };
        Ok(Url::parse(&format!("{}://{}{}", scheme, authority, self.target))?)
    }
}

/// `host[:port]` and nothing else: no userinfo, path, query or fragment.
fn checked_authority(host: &str) -> Result<&str, HeadError> {
    let stray = |c: char| matches!(c, '/' | '\\' | '?' | '#' | '@') || c.is_whitespace() || c.is_control();
    if host.is_empty() || host.chars().any(stray) {
        return Err(HeadError::Malformed("invalid Host header"));
    }
    Ok(host)
}

/// Most headers accepted in one head.
const MAX_HEADERS: usize = 64;

/// Parse a request head from `buf`.
///
/// Returns `Ok(None)` while the head is still incomplete, otherwise the
/// head and the number of bytes it occupied.
pub fn parse_head(buf: &[u8]) -> Result<Option<(RequestHead, usize)>, HeadError> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut header_storage);
    let used = match request.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    let method = request.method.ok_or(HeadError::Malformed("missing method"))?;
    let target = request.path.ok_or(HeadError::Malformed("missing request target"))?;
    let version = request.version.ok_or(HeadError::Malformed("missing protocol version"))?;

    let mut host = None;
    for header in request.headers.iter() {
        if !header.name.eq_ignore_ascii_case("host") {
            continue;
        }
        if host.is_some() {
            return Err(HeadError::Malformed("duplicate Host header"));
        }
        let value = std::str::from_utf8(header.value)
            .map_err(|_| HeadError::Malformed("Host header is not UTF-8"))?
            .trim();
        if !value.is_empty() {
            host = Some(value.to_string());
        }
    }

    let head = RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version: format!("HTTP/1.{}", version),
        host,
    };
    Ok(Some((head, used)))
}

/// Read from `stream` until a full head arrives.
///
/// Returns the head and any bytes received after it.
pub async fn read_head<R>(stream: &mut R, limit: usize) -> Result<(RequestHead, Vec<u8>), HeadError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(HeadError::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some((head, used)) = parse_head(&buf)? {
            let rest = buf.split_off(used);
            return Ok((head, rest));
        }
        if buf.len() >= limit {
            return Err(HeadError::TooLarge(limit));
        }
    }
}
