//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check every prefix parses and is claimed only once
//! - Validate value ranges (head limits > 0)
//! - Require a server identity for secure prefixes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MediaServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashMap;

use crate::config::schema::MediaServerConfig;
use crate::routing::prefix::{Prefix, PrefixError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener #{index} has an empty name")]
    EmptyListenerName { index: usize },

    #[error("listener '{listener}': invalid prefix '{prefix}': {source}")]
    InvalidPrefix {
        listener: String,
        prefix: String,
        #[source]
        source: PrefixError,
    },

    #[error("prefix '{prefix}' is claimed by both '{first}' and '{second}'")]
    DuplicatePrefix {
        prefix: String,
        first: String,
        second: String,
    },

    #[error("listener '{listener}': secure prefix '{prefix}' requires a [tls] section")]
    MissingTls { listener: String, prefix: String },

    #[error("server.{field} must be greater than zero")]
    Zero { field: &'static str },
}

pub fn validate_config(config: &MediaServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.max_head_bytes == 0 {
        errors.push(ValidationError::Zero { field: "max_head_bytes" });
    }
    if config.server.head_read_timeout_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "head_read_timeout_secs",
        });
    }

    // Keyed by the parsed prefix, so "HTTP://Host/" and "http://host/" collide.
    let mut claimed: HashMap<String, &str> = HashMap::new();

    for (index, listener) in config.listeners.iter().enumerate() {
        if listener.name.trim().is_empty() {
            errors.push(ValidationError::EmptyListenerName { index });
        }

        for raw in &listener.prefixes {
            let prefix = match Prefix::parse(raw) {
                Ok(prefix) => prefix,
                Err(source) => {
                    errors.push(ValidationError::InvalidPrefix {
                        listener: listener.name.clone(),
                        prefix: raw.clone(),
                        source,
                    });
                    continue;
                }
            };

            if prefix.is_secure() && config.tls.is_none() {
                errors.push(ValidationError::MissingTls {
                    listener: listener.name.clone(),
                    prefix: raw.clone(),
                });
            }

            let key = format!(
                "{}://{}:{}{}",
                if prefix.is_secure() { "https" } else { "http" },
                prefix.host(),
                prefix.port(),
                prefix.path()
            );
            if let Some(first) = claimed.insert(key, &listener.name) {
                errors.push(ValidationError::DuplicatePrefix {
                    prefix: raw.clone(),
                    first: first.to_string(),
                    second: listener.name.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ListenerConfig, TlsConfig};

    fn listener(name: &str, prefixes: &[&str]) -> ListenerConfig {
        ListenerConfig {
            name: name.to_string(),
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&MediaServerConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = MediaServerConfig::default();
        config.server.max_head_bytes = 0;
        config.listeners = vec![
            listener("", &["http://*:8096/web"]),
            listener("web", &["http://*:8096/", "https://*:8920/"]),
            listener("api", &["HTTP://*:8096/"]),
        ];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::Zero { field: "max_head_bytes" }));
        assert!(errors.contains(&ValidationError::EmptyListenerName { index: 0 }));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidPrefix { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingTls { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicatePrefix { first, second, .. } if first == "web" && second == "api")));
    }

    #[test]
    fn secure_prefix_with_tls_is_valid() {
        let mut config = MediaServerConfig::default();
        config.tls = Some(TlsConfig {
            cert_path: "cert.pem".into(),
            key_path: "key.pem".into(),
        });
        config.listeners = vec![listener("web", &["https://*:8920/", "http://*:8096/"])];
        assert!(validate_config(&config).is_ok());
    }
}
