//! Prefix binding strings.
//!
//! # Responsibilities
//! - Parse `scheme://host:port/path/` binding strings
//! - Classify the host (exact name, `*`, `+`)
//! - Store the path in one canonical, slash-terminated form
//!
//! # Design Decisions
//! - Host names are lower-cased; paths are case-sensitive
//! - Paths are percent-decoded once at parse time so matching compares
//!   decoded request paths against decoded prefixes
//! - Equality ignores the original spelling of the binding string

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use percent_encoding::percent_decode_str;

/// Error type for prefix parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrefixError {
    #[error("prefix '{0}' has no scheme separator")]
    MissingScheme(String),
    #[error("prefix '{0}' uses an unsupported scheme (expected http or https)")]
    UnsupportedScheme(String),
    #[error("prefix '{0}' has an empty host")]
    EmptyHost(String),
    #[error("prefix '{0}' has an invalid port")]
    InvalidPort(String),
    #[error("prefix '{0}' must have a path ending in '/'")]
    MissingTrailingSlash(String),
    #[error("prefix '{0}' must not contain a query or fragment")]
    QueryOrFragment(String),
}

/// How a prefix matches the request host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostKind {
    /// A literal host name or address; port must match as well.
    Exact,
    /// `*`: any host not claimed by an exact prefix.
    AnyUnhandledHost,
    /// `+`: every host, checked last.
    AllHosts,
}

/// An immutable, routable binding.
#[derive(Debug, Clone)]
pub struct Prefix {
    original: String,
    secure: bool,
    host: String,
    port: u16,
    path: String,
    kind: HostKind,
}

impl Prefix {
    /// Parse a binding string such as `http://*:8096/media/`.
    pub fn parse(input: &str) -> Result<Self, PrefixError> {
        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| PrefixError::MissingScheme(input.to_string()))?;

        let secure = if scheme.eq_ignore_ascii_case("http") {
            false
        } else if scheme.eq_ignore_ascii_case("https") {
            true
        } else {
            return Err(PrefixError::UnsupportedScheme(input.to_string()));
        };

        let path_start = rest
            .find('/')
            .ok_or_else(|| PrefixError::MissingTrailingSlash(input.to_string()))?;
        let (authority, raw_path) = rest.split_at(path_start);

        let (host, port) = split_authority(authority, secure)
            .ok_or_else(|| PrefixError::InvalidPort(input.to_string()))?;
        if host.is_empty() {
            return Err(PrefixError::EmptyHost(input.to_string()));
        }

        if raw_path.contains('?') || raw_path.contains('#') {
            return Err(PrefixError::QueryOrFragment(input.to_string()));
        }
        if !raw_path.ends_with('/') {
            return Err(PrefixError::MissingTrailingSlash(input.to_string()));
        }
        let path = percent_decode_str(raw_path).decode_utf8_lossy().into_owned();

        let kind = match host {
            "*" => HostKind::AnyUnhandledHost,
            "+" => HostKind::AllHosts,
            _ => HostKind::Exact,
        };

        Ok(Self {
            original: input.to_string(),
            secure,
            host: host.to_ascii_lowercase(),
            port,
            path,
            kind,
        })
    }

    /// The binding string as registered.
    pub fn as_str(&self) -> &str {
        &self.original
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn kind(&self) -> HostKind {
        self.kind
    }

    /// Canonical path, always slash-terminated.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The path without its trailing slash (`/media` for `/media/`).
    pub fn trimmed_path(&self) -> &str {
        &self.path[..self.path.len() - 1]
    }

    /// Literal IP address in the host position, if any.
    ///
    /// Bracketed IPv6 hosts are accepted.
    pub fn ip_host(&self) -> Option<IpAddr> {
        if self.kind != HostKind::Exact {
            return None;
        }
        self.host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .ok()
    }

    /// Whether an exact prefix accepts the given request host and port.
    pub fn matches_host(&self, host: &str, port: u16) -> bool {
        self.kind == HostKind::Exact && self.port == port && self.host.eq_ignore_ascii_case(host)
    }

    /// Whether either form of a request path starts with this prefix.
    pub fn matches_path(&self, raw: &str, slashed: &str) -> bool {
        raw.starts_with(&self.path) || slashed.starts_with(&self.path)
    }
}

fn split_authority(authority: &str, secure: bool) -> Option<(&str, u16)> {
    let default_port = if secure { 443 } else { 80 };

    // Bracketed IPv6 literals carry colons of their own.
    let port_sep = if authority.starts_with('[') {
        let close = authority.find(']')?;
        match &authority[close + 1..] {
            "" => None,
            rest if rest.starts_with(':') => Some(close + 1),
            _ => return None,
        }
    } else {
        authority.rfind(':')
    };

    match port_sep {
        None => Some((authority, default_port)),
        Some(idx) => {
            let port: u16 = authority[idx + 1..].parse().ok()?;
            if port == 0 {
                return None;
            }
            Some((&authority[..idx], port))
        }
    }
}

impl PartialEq for Prefix {
    fn eq(&self, other: &Self) -> bool {
        if self.path != other.path {
            return false;
        }
        match (self.kind, other.kind) {
            (HostKind::Exact, HostKind::Exact) => self.port == other.port && self.host == other.host,
            (a, b) => a == b,
        }
    }
}

impl Eq for Prefix {}

impl Hash for Prefix {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}
