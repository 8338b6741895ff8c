//! Endpoint manager.
//!
//! # Responsibilities
//! - Map (address, port) to a live endpoint
//! - Open an endpoint on the first prefix for its port
//! - Close and forget an endpoint when its last prefix goes away
//!
//! # Design Decisions
//! - Adding holds the map entry while the prefix is inserted, so a
//!   concurrent teardown can never close an endpoint that just gained a prefix
//! - Teardown removes the entry only if the endpoint is still empty
//! - A removed endpoint stays in `retiring` until its socket is released;
//!   an add for the same key waits for that before binding again

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;

use crate::endpoint::listener::EndpointListener;
use crate::endpoint::vhost::Listener;
use crate::endpoint::{EndpointDeps, EndpointKey, EndpointOptions, RegistrationError};
use crate::routing::prefix::{Prefix, PrefixError};
use crate::routing::table::Removal;

/// Bind settings shared by every endpoint the manager opens.
#[derive(Debug, Clone, Copy)]
pub struct EndpointSettings {
    /// Address used when a prefix host is not an IP literal.
    pub bind_address: IpAddr,
    pub enable_dual_mode: bool,
    pub backlog: u32,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
            enable_dual_mode: true,
            backlog: 0,
        }
    }
}

#[derive(Debug)]
pub struct EndpointManager {
    endpoints: DashMap<EndpointKey, Arc<EndpointListener>>,
    retiring: DashMap<EndpointKey, Arc<EndpointListener>>,
    settings: EndpointSettings,
    deps: EndpointDeps,
}

impl EndpointManager {
    pub fn new(settings: EndpointSettings, deps: EndpointDeps) -> Self {
        Self {
            endpoints: DashMap::new(),
            retiring: DashMap::new(),
            settings,
            deps,
        }
    }

    pub fn settings(&self) -> &EndpointSettings {
        &self.settings
    }

    fn key_for(&self, prefix: &Prefix) -> EndpointKey {
        EndpointKey {
            address: prefix.ip_host().unwrap_or(self.settings.bind_address),
            port: prefix.port(),
        }
    }

    /// Register `prefix` for `listener`, opening the endpoint if needed.
    ///
    /// When the endpoint for the same address and port is still shutting
    /// down, this waits for its socket to be released and then opens a
    /// fresh one.
    pub async fn add_prefix(&self, prefix: &str, listener: Arc<dyn Listener>) -> Result<(), RegistrationError> {
        let prefix = Prefix::parse(prefix)?;
        let key = self.key_for(&prefix);

        loop {
            match self.try_add(key, &prefix, &listener) {
                Ok(()) => return Ok(()),
                Err(Attempt::Failed(e)) => return Err(e),
                Err(Attempt::Retiring(previous)) => {
                    tracing::debug!(endpoint = %key, "Waiting for the previous endpoint to release its socket");
                    previous.released().await;
                }
            }
        }
    }

    fn try_add(&self, key: EndpointKey, prefix: &Prefix, listener: &Arc<dyn Listener>) -> Result<(), Attempt> {
        // `retiring` is filled under this same entry lock, so a vacant entry
        // with no retiring endpoint means the port is free of our own sockets.
        let entry = self.endpoints.entry(key).or_try_insert_with(|| {
            if let Some(previous) = self.retiring.get(&key) {
                return Err(Attempt::Retiring(previous.value().clone()));
            }
            EndpointListener::open(
                EndpointOptions {
                    key,
                    secure: prefix.is_secure(),
                    enable_dual_mode: self.settings.enable_dual_mode,
                    backlog: self.settings.backlog,
                },
                &self.deps,
            )
            .map_err(|e| Attempt::Failed(e.into()))
        })?;

        let endpoint = entry.value();
        if endpoint.is_secure() != prefix.is_secure() {
            return Err(Attempt::Failed(RegistrationError::SchemeMismatch {
                endpoint: key,
                existing: if endpoint.is_secure() { "https" } else { "http" },
                prefix: prefix.to_string(),
            }));
        }
        endpoint
            .add_prefix(prefix.clone(), listener.clone())
            .map_err(|e| Attempt::Failed(e.into()))
    }

    /// Remove `prefix` from `listener`. Unknown prefixes and prefixes owned
    /// by another listener are ignored.
    pub async fn remove_prefix(&self, prefix: &str, listener: &Arc<dyn Listener>) -> Result<(), PrefixError> {
        let prefix = Prefix::parse(prefix)?;
        let key = self.key_for(&prefix);
        let Some(endpoint) = self.endpoint_by_key(&key) else {
            return Ok(());
        };

        if let Removal::Removed { now_empty: true } = endpoint.remove_prefix(&prefix, listener) {
            self.teardown(key).await;
        }
        Ok(())
    }

    /// Remove every prefix owned by `listener`, on every endpoint.
    pub async fn remove_listener(&self, listener: &Arc<dyn Listener>) -> usize {
        let mut removed = 0;
        for endpoint in self.endpoints() {
            for prefix in endpoint.prefixes_of(listener) {
                match endpoint.remove_prefix(&prefix, listener) {
                    Removal::Removed { now_empty } => {
                        removed += 1;
                        if now_empty {
                            self.teardown(endpoint.key()).await;
                        }
                    }
                    Removal::NotFound => {}
                }
            }
        }
        tracing::info!(listener = %listener.name(), removed, "Listener removed");
        removed
    }

    async fn teardown(&self, key: EndpointKey) {
        let Some(endpoint) = self.retire(key, |endpoint| endpoint.is_empty()) else {
            return;
        };
        tracing::info!(endpoint = %key, "Last prefix removed, closing endpoint");
        self.finish_retiring(key, &endpoint).await;
    }

    /// Move the endpoint for `key` from the live map to `retiring` if
    /// `should_retire` agrees. Both maps change under the entry lock.
    fn retire<F>(&self, key: EndpointKey, should_retire: F) -> Option<Arc<EndpointListener>>
    where
        F: FnOnce(&EndpointListener) -> bool,
    {
        self.endpoints
            .remove_if(&key, |_, endpoint| {
                let retire = should_retire(endpoint.as_ref());
                if retire {
                    self.retiring.insert(key, endpoint.clone());
                }
                retire
            })
            .map(|(_, endpoint)| endpoint)
    }

    async fn finish_retiring(&self, key: EndpointKey, endpoint: &Arc<EndpointListener>) {
        endpoint.close().await;
        self.retiring.remove_if(&key, |_, retired| Arc::ptr_eq(retired, endpoint));
    }

    pub fn endpoint(&self, address: IpAddr, port: u16) -> Option<Arc<EndpointListener>> {
        self.endpoint_by_key(&EndpointKey { address, port })
    }

    /// The endpoint a prefix string would be registered on, if it is open.
    pub fn endpoint_for(&self, prefix: &str) -> Result<Option<Arc<EndpointListener>>, PrefixError> {
        let prefix = Prefix::parse(prefix)?;
        Ok(self.endpoint_by_key(&self.key_for(&prefix)))
    }

    fn endpoint_by_key(&self, key: &EndpointKey) -> Option<Arc<EndpointListener>> {
        self.endpoints.get(key).map(|entry| entry.value().clone())
    }

    pub fn endpoints(&self) -> Vec<Arc<EndpointListener>> {
        self.endpoints.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Close and forget every endpoint.
    pub async fn close_all(&self) {
        let keys: Vec<EndpointKey> = self.endpoints.iter().map(|entry| *entry.key()).collect();
        for key in keys {
            if let Some(endpoint) = self.retire(key, |_| true) {
                self.finish_retiring(key, &endpoint).await;
            }
        }
        tracing::info!("All endpoints closed");
    }
}

/// Why one attempt to add a prefix did not finish.
enum Attempt {
    Failed(RegistrationError),
    Retiring(Arc<EndpointListener>),
}
