//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! endpoint server. All types derive Serde traits for deserialization
//! from config files.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct MediaServerConfig {
    /// Socket and protocol settings shared by every endpoint.
    pub server: ServerConfig,

    /// Server identity for `https` prefixes.
    pub tls: Option<TlsConfig>,

    /// Logical listeners and the prefixes they claim.
    pub listeners: Vec<ListenerConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl MediaServerConfig {
    /// Every (listener name, prefix) pair in declaration order.
    pub fn registrations(&self) -> Vec<(String, String)> {
        self.listeners
            .iter()
            .flat_map(|l| l.prefixes.iter().map(move |p| (l.name.clone(), p.clone())))
            .collect()
    }
}

/// Socket and protocol settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address endpoints bind when a prefix host is not an IP literal.
    pub bind_address: IpAddr,

    /// Default plain HTTP port.
    pub port: u16,

    /// Default HTTPS port.
    pub secure_port: u16,

    /// Accept IPv4 on IPv6 wildcard sockets.
    pub enable_dual_mode: bool,

    /// Listen backlog; 0 selects the platform maximum.
    pub backlog: u32,

    /// Largest request head accepted before the connection is dropped.
    pub max_head_bytes: usize,

    /// Time allowed for a client to send its request head.
    pub head_read_timeout_secs: u64,
}

impl ServerConfig {
    pub fn head_read_timeout(&self) -> Duration {
        Duration::from_secs(self.head_read_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
            port: 8096,
            secure_port: 8920,
            enable_dual_mode: true,
            backlog: 0,
            max_head_bytes: 8192,
            head_read_timeout_secs: 10,
        }
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// A logical listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ListenerConfig {
    /// Listener identifier for logging.
    pub name: String,

    /// URL prefixes, e.g. "http://*:8096/".
    #[serde(default)]
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9096".to_string(),
        }
    }
}
