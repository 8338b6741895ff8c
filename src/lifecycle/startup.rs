//! Startup orchestration.
//!
//! # Responsibilities
//! - Load the server identity when TLS is configured
//! - Build the endpoint manager with the HTTP protocol initializer
//! - Create one virtual host per configured listener and register its prefixes
//! - Apply prefix differences when the configuration changes
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and closes what was opened
//! - Reload failures are logged per prefix; the rest of the revision applies
//! - A listener without prefixes is dropped, which ends its consumer

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::config::schema::{MediaServerConfig, ServerConfig};
use crate::endpoint::manager::EndpointSettings;
use crate::endpoint::{EndpointDeps, EndpointManager, Listener, RegistrationError, VirtualHost};
use crate::http::{HttpContext, HttpProtocol};
use crate::lifecycle::shutdown::Shutdown;
use crate::net::socket::SystemSocketFactory;
use crate::net::tls::ServerIdentity;

/// A (listener name, prefix) pair.
pub type Registration = (String, String);

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to load server identity: {0}")]
    Identity(#[source] std::io::Error),

    #[error("listener '{listener}' could not register '{prefix}': {source}")]
    Registration {
        listener: String,
        prefix: String,
        #[source]
        source: RegistrationError,
    },
}

/// Outcome of applying a configuration revision.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: usize,
    pub removed: usize,
    pub failed: usize,
}

/// The registrations a configuration asks for.
///
/// Without any `[[listeners]]`, a "default" listener claims every host on
/// the configured port, plus the secure port when TLS is configured.
pub fn registrations(config: &MediaServerConfig) -> BTreeSet<Registration> {
    if !config.listeners.is_empty() {
        return config.registrations().into_iter().collect();
    }

    let mut defaults = BTreeSet::new();
    defaults.insert(("default".to_string(), format!("http://+:{}/", config.server.port)));
    if config.tls.is_some() {
        defaults.insert(("default".to_string(), format!("https://+:{}/", config.server.secure_port)));
    }
    defaults
}

/// A running set of listeners bound to their endpoints.
pub struct Server {
    manager: Arc<EndpointManager>,
    hosts: HashMap<String, Arc<VirtualHost>>,
    active: BTreeSet<Registration>,
    settings: ServerConfig,
    shutdown: Arc<Shutdown>,
}

impl Server {
    pub async fn start(config: &MediaServerConfig, shutdown: Arc<Shutdown>) -> Result<Self, StartupError> {
        let identity = match &config.tls {
            Some(tls) => Some(Arc::new(
                ServerIdentity::from_pem_files(Path::new(&tls.cert_path), Path::new(&tls.key_path))
                    .map_err(StartupError::Identity)?,
            )),
            None => None,
        };

        let manager = EndpointManager::new(
            EndpointSettings {
                bind_address: config.server.bind_address,
                enable_dual_mode: config.server.enable_dual_mode,
                backlog: config.server.backlog,
            },
            EndpointDeps {
                socket_factory: Arc::new(SystemSocketFactory),
                handler: Arc::new(HttpProtocol::new(
                    config.server.max_head_bytes,
                    config.server.head_read_timeout(),
                )),
                identity,
            },
        );

        let mut server = Self {
            manager: Arc::new(manager),
            hosts: HashMap::new(),
            active: BTreeSet::new(),
            settings: config.server.clone(),
            shutdown,
        };

        for (listener, prefix) in registrations(config) {
            if let Err(source) = server.register(&listener, &prefix).await {
                server.stop().await;
                return Err(StartupError::Registration {
                    listener,
                    prefix,
                    source,
                });
            }
        }

        tracing::info!(
            listeners = server.hosts.len(),
            prefixes = server.active.len(),
            endpoints = server.manager.endpoint_count(),
            "Server started"
        );
        Ok(server)
    }

    pub fn manager(&self) -> &Arc<EndpointManager> {
        &self.manager
    }

    pub fn host(&self, name: &str) -> Option<&Arc<VirtualHost>> {
        self.hosts.get(name)
    }

    pub fn active(&self) -> &BTreeSet<Registration> {
        &self.active
    }

    async fn register(&mut self, listener: &str, prefix: &str) -> Result<(), RegistrationError> {
        let host = self.host_or_spawn(listener);
        self.manager.add_prefix(prefix, host).await?;
        self.active.insert((listener.to_string(), prefix.to_string()));
        Ok(())
    }

    fn host_or_spawn(&mut self, name: &str) -> Arc<VirtualHost> {
        if let Some(host) = self.hosts.get(name) {
            return host.clone();
        }
        let (host, queue) = VirtualHost::new(name);
        tokio::spawn(consume(name.to_string(), queue, self.shutdown.subscribe()));
        self.hosts.insert(name.to_string(), host.clone());
        host
    }

    /// Bring the live registrations in line with `config`.
    pub async fn apply(&mut self, config: &MediaServerConfig) -> ReloadSummary {
        if config.server != self.settings {
            tracing::warn!("Server settings changed; they take effect after a restart");
        }

        let wanted = registrations(config);
        let stale: Vec<Registration> = self.active.difference(&wanted).cloned().collect();
        let fresh: Vec<Registration> = wanted.difference(&self.active).cloned().collect();
        let mut summary = ReloadSummary::default();

        for (listener, prefix) in stale {
            if let Some(host) = self.hosts.get(&listener).cloned() {
                let host: Arc<dyn Listener> = host;
                if let Err(e) = self.manager.remove_prefix(&prefix, &host).await {
                    tracing::warn!(listener = %listener, prefix = %prefix, error = %e, "Failed to remove prefix");
                }
            }
            self.active.remove(&(listener, prefix));
            summary.removed += 1;
        }

        for (listener, prefix) in fresh {
            match self.register(&listener, &prefix).await {
                Ok(()) => summary.added += 1,
                Err(e) => {
                    tracing::error!(listener = %listener, prefix = %prefix, error = %e, "Failed to register prefix");
                    summary.failed += 1;
                }
            }
        }

        let active = &self.active;
        self.hosts.retain(|name, _| active.iter().any(|(listener, _)| listener == name));

        tracing::info!(
            added = summary.added,
            removed = summary.removed,
            failed = summary.failed,
            endpoints = self.manager.endpoint_count(),
            "Configuration applied"
        );
        summary
    }

    /// Close every endpoint.
    pub async fn stop(&self) {
        self.manager.close_all().await;
    }
}

/// Answer each routed context with a one-line summary of the request.
async fn consume(name: String, mut queue: mpsc::UnboundedReceiver<HttpContext>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            next = queue.recv() => match next {
                Some(context) => {
                    tokio::spawn(respond(name.clone(), context));
                }
                None => break,
            },
        }
    }
    tracing::debug!(listener = %name, "Listener consumer stopped");
}

async fn respond(name: String, mut context: HttpContext) {
    let body = format!("{} {} {}\n", name, context.request().method, context.url().path());
    if let Err(e) = context.respond(200, "OK", &body).await {
        tracing::debug!(listener = %name, connection_id = %context.connection().id(), error = %e, "Response failed");
    }
    context.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ListenerConfig, TlsConfig};
    use std::net::{IpAddr, Ipv4Addr};

    fn config(listeners: &[(&str, &[&str])]) -> MediaServerConfig {
        let mut config = MediaServerConfig::default();
        config.server.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.server.enable_dual_mode = false;
        config.listeners = listeners
            .iter()
            .map(|(name, prefixes)| ListenerConfig {
                name: name.to_string(),
                prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
            })
            .collect();
        config
    }

    #[test]
    fn default_registrations_follow_ports() {
        let mut config = MediaServerConfig::default();
        let plain: Vec<_> = registrations(&config).into_iter().collect();
        assert_eq!(plain, vec![("default".to_string(), "http://+:8096/".to_string())]);

        config.tls = Some(TlsConfig {
            cert_path: "c".into(),
            key_path: "k".into(),
        });
        assert!(registrations(&config).contains(&("default".to_string(), "https://+:8920/".to_string())));
    }

    #[tokio::test]
    async fn apply_adds_and_removes_differences() {
        let shutdown = Arc::new(Shutdown::new());
        let initial = config(&[("web", &["http://*:38120/web/"]), ("api", &["http://*:38121/api/"])]);
        let mut server = Server::start(&initial, shutdown.clone()).await.unwrap();
        assert_eq!(server.manager().endpoint_count(), 2);

        let next = config(&[("web", &["http://*:38120/web/", "http://*:38120/static/"])]);
        let summary = server.apply(&next).await;
        assert_eq!(
            summary,
            ReloadSummary {
                added: 1,
                removed: 1,
                failed: 0
            }
        );
        assert_eq!(server.manager().endpoint_count(), 1);
        assert!(server.host("api").is_none());
        assert_eq!(server.active().len(), 2);

        server.stop().await;
        shutdown.trigger();
        assert_eq!(server.manager().endpoint_count(), 0);
    }

    #[tokio::test]
    async fn failed_registration_closes_everything() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let busy = format!("http://*:{}/", port);
        let config = config(&[("api", &["http://*:38122/"]), ("web", &[busy.as_str()])]);

        let err = Server::start(&config, Arc::new(Shutdown::new())).await.err().unwrap();
        assert!(matches!(err, StartupError::Registration { ref listener, .. } if listener == "web"));
        assert!(std::net::TcpListener::bind("127.0.0.1:38122").is_ok());
    }
}
