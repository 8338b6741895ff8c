//! Route matching logic.
//!
//! # Responsibilities
//! - Reduce a request URI to the host, port and path forms used for matching
//! - Pick the longest matching prefix among candidates
//!
//! # Design Decisions
//! - Host matching is case-insensitive
//! - Path matching is case-sensitive and runs on decoded paths
//! - Linear scan; ties keep the first candidate seen

use percent_encoding::percent_decode_str;
use url::Url;

use crate::routing::table::Binding;

/// The routing-relevant parts of a request URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    host: Option<String>,
    port: u16,
    path: String,
    slashed: String,
}

impl RequestTarget {
    /// Build a target from an absolute request URI.
    pub fn from_url(url: &Url) -> Self {
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(|h| h.to_ascii_lowercase());
        let port = url.port_or_known_default().unwrap_or(80);
        Self::new(host, port, url.path())
    }

    /// Build a target from its parts; `path` may still be percent-encoded.
    pub fn new(host: Option<String>, port: u16, path: &str) -> Self {
        let mut path = percent_decode_str(path).decode_utf8_lossy().into_owned();
        if path.is_empty() {
            path.push('/');
        }
        let slashed = if path.ends_with('/') {
            path.clone()
        } else {
            format!("{}/", path)
        };
        Self {
            host,
            port,
            path,
            slashed,
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Decoded request path as received.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decoded request path with a trailing slash.
    pub fn slashed_path(&self) -> &str {
        &self.slashed
    }
}

/// Select the binding with the longest path matching `target`.
///
/// `host_filter` decides which candidates are eligible at all.
pub(crate) fn longest_match<'a, I, F>(candidates: I, target: &RequestTarget, host_filter: F) -> Option<&'a Binding>
where
    I: IntoIterator<Item = &'a Binding>,
    F: Fn(&Binding) -> bool,
{
    let mut best: Option<&'a Binding> = None;
    for binding in candidates {
        if !host_filter(binding) {
            continue;
        }
        if !binding.prefix().matches_path(target.path(), target.slashed_path()) {
            continue;
        }
        let longer = best
            .map(|b| binding.prefix().path().len() > b.prefix().path().len())
            .unwrap_or(true);
        if longer {
            best = Some(binding);
        }
    }
    best
}
