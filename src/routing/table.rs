//! Prefix routing table.
//!
//! # Responsibilities
//! - Store prefix → listener bindings in three priority classes
//! - Reject duplicate registrations
//! - Resolve a request target to the best binding
//!
//! # Design Decisions
//! - The whole table is one immutable `RouteSet` behind an `ArcSwap`
//! - Writers clone, modify and compare-and-swap, retrying on conflict
//! - Readers take one snapshot per lookup and never block
//! - Priority order: exact host+port, then `*`, then `+`

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};

use crate::endpoint::vhost::Listener;
use crate::observability::metrics;
use crate::routing::matcher::{longest_match, RequestTarget};
use crate::routing::prefix::{HostKind, Prefix};

/// Error type for routing table mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("binding already exists for prefix '{prefix}'")]
    AlreadyExists { prefix: String },
}

/// A prefix together with the listener it routes to.
#[derive(Clone)]
pub struct Binding {
    prefix: Prefix,
    listener: Arc<dyn Listener>,
}

impl Binding {
    pub fn new(prefix: Prefix, listener: Arc<dyn Listener>) -> Self {
        Self { prefix, listener }
    }

    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    pub fn listener(&self) -> &Arc<dyn Listener> {
        &self.listener
    }

    pub fn is_owned_by(&self, listener: &Arc<dyn Listener>) -> bool {
        same_listener(&self.listener, listener)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("prefix", &self.prefix.as_str())
            .field("listener", &self.listener.name())
            .finish()
    }
}

/// Compares listener identity, not listener contents.
pub fn same_listener(a: &Arc<dyn Listener>, b: &Arc<dyn Listener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Outcome of a removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// No binding for that prefix and listener; nothing changed.
    NotFound,
    /// The binding was removed. `now_empty` is set only by the removal that
    /// emptied the table.
    Removed { now_empty: bool },
}

#[derive(Clone, Default)]
struct RouteSet {
    exact: HashMap<Prefix, Binding>,
    any_host: Vec<Binding>,
    all_hosts: Vec<Binding>,
}

impl RouteSet {
    fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.any_host.is_empty() && self.all_hosts.is_empty()
    }

    fn len(&self) -> usize {
        self.exact.len() + self.any_host.len() + self.all_hosts.len()
    }

    /// `*` and `+` share one path namespace; exact prefixes are keyed by
    /// host, port and path.
    fn contains(&self, prefix: &Prefix) -> bool {
        match prefix.kind() {
            HostKind::Exact => self.exact.contains_key(prefix),
            HostKind::AnyUnhandledHost | HostKind::AllHosts => self
                .any_host
                .iter()
                .chain(self.all_hosts.iter())
                .any(|b| b.prefix().path() == prefix.path()),
        }
    }

    fn insert(&mut self, binding: Binding) {
        match binding.prefix().kind() {
            HostKind::Exact => {
                self.exact.insert(binding.prefix().clone(), binding);
            }
            HostKind::AnyUnhandledHost => self.any_host.push(binding),
            HostKind::AllHosts => self.all_hosts.push(binding),
        }
    }

    fn remove(&mut self, prefix: &Prefix, listener: &Arc<dyn Listener>) -> bool {
        match prefix.kind() {
            HostKind::Exact => match self.exact.get(prefix) {
                Some(b) if b.is_owned_by(listener) => self.exact.remove(prefix).is_some(),
                _ => false,
            },
            HostKind::AnyUnhandledHost => remove_from(&mut self.any_host, prefix, listener),
            HostKind::AllHosts => remove_from(&mut self.all_hosts, prefix, listener),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.exact
            .values()
            .chain(self.any_host.iter())
            .chain(self.all_hosts.iter())
    }
}

fn remove_from(list: &mut Vec<Binding>, prefix: &Prefix, listener: &Arc<dyn Listener>) -> bool {
    match list
        .iter()
        .position(|b| b.prefix() == prefix && b.is_owned_by(listener))
    {
        Some(idx) => {
            list.remove(idx);
            true
        }
        None => false,
    }
}

/// Lock-free prefix routing table.
pub struct RoutingTable {
    routes: ArcSwap<RouteSet>,
    #[cfg(test)]
    cas_delay: Option<std::time::Duration>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            routes: ArcSwap::from_pointee(RouteSet::default()),
            #[cfg(test)]
            cas_delay: None,
        }
    }

    /// Register `prefix` for `listener`.
    pub fn add(&self, prefix: Prefix, listener: Arc<dyn Listener>) -> Result<(), RouteError> {
        let binding = Binding::new(prefix, listener);
        self.compare_and_swap(|routes| {
            if routes.contains(binding.prefix()) {
                let err = RouteError::AlreadyExists {
                    prefix: binding.prefix().to_string(),
                };
                return (None, Err(err));
            }
            let mut next = routes.clone();
            next.insert(binding.clone());
            (Some(next), Ok(()))
        })
    }

    /// Remove the binding of `prefix` owned by `listener`.
    pub fn remove(&self, prefix: &Prefix, listener: &Arc<dyn Listener>) -> Removal {
        self.compare_and_swap(|routes| {
            let mut next = routes.clone();
            if !next.remove(prefix, listener) {
                return (None, Removal::NotFound);
            }
            let now_empty = next.is_empty();
            (Some(next), Removal::Removed { now_empty })
        })
    }

    /// Resolve a request target to its binding.
    pub fn resolve(&self, target: &RequestTarget) -> Option<Binding> {
        let routes = self.routes.load();

        if let Some(host) = target.host() {
            let port = target.port();
            if let Some(found) = longest_match(routes.exact.values(), target, |b| {
                b.prefix().matches_host(host, port)
            }) {
                return Some(found.clone());
            }
        }

        longest_match(&routes.any_host, target, |_| true)
            .or_else(|| longest_match(&routes.all_hosts, target, |_| true))
            .cloned()
    }

    /// Prefixes currently bound to `listener`.
    pub fn prefixes_of(&self, listener: &Arc<dyn Listener>) -> Vec<Prefix> {
        self.routes
            .load()
            .iter()
            .filter(|b| b.is_owned_by(listener))
            .map(|b| b.prefix().clone())
            .collect()
    }

    pub fn prefixes(&self) -> Vec<Prefix> {
        self.routes.load().iter().map(|b| b.prefix().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.load().is_empty()
    }

    /// Clone-modify-swap loop. `build` returns `None` to leave the table
    /// untouched.
    fn compare_and_swap<F, T>(&self, mut build: F) -> T
    where
        F: FnMut(&RouteSet) -> (Option<RouteSet>, T),
    {
        let mut current = self.routes.load_full();
        loop {
            let (next, outcome) = build(&current);
            let Some(next) = next else {
                return outcome;
            };

            #[cfg(test)]
            if let Some(delay) = self.cas_delay {
                std::thread::sleep(delay);
            }

            let previous = self.routes.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &current) {
                return outcome;
            }
            metrics::record_cas_retry();
            current = Guard::into_inner(previous);
        }
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::context::HttpContext;
    use std::time::Duration;

    #[derive(Debug)]
    struct Named(&'static str);

    impl Listener for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn dispatch(&self, _context: HttpContext) {}

        fn unbind_context(&self, _context: &HttpContext) {}
    }

    fn listener(name: &'static str) -> Arc<dyn Listener> {
        Arc::new(Named(name))
    }

    fn prefix(s: &str) -> Prefix {
        Prefix::parse(s).unwrap()
    }

    fn target(host: &str, port: u16, path: &str) -> RequestTarget {
        RequestTarget::new(Some(host.to_string()), port, path)
    }

    fn resolved_name(table: &RoutingTable, t: &RequestTarget) -> Option<String> {
        table.resolve(t).map(|b| b.listener().name().to_string())
    }

    #[test]
    fn duplicate_registration_fails() {
        let table = RoutingTable::new();
        let l = listener("web");

        table.add(prefix("http://*:8096/media/"), l.clone()).unwrap();
        let err = table.add(prefix("http://*:8096/media/"), l.clone()).unwrap_err();
        assert!(matches!(err, RouteError::AlreadyExists { .. }));

        assert_eq!(
            table.remove(&prefix("http://*:8096/media/"), &l),
            Removal::Removed { now_empty: true }
        );
        table.add(prefix("http://*:8096/media/"), l).unwrap();
    }

    #[test]
    fn wildcard_classes_share_paths() {
        let table = RoutingTable::new();
        table.add(prefix("http://*:8096/media/"), listener("a")).unwrap();
        assert!(table.add(prefix("http://+:8096/media/"), listener("b")).is_err());
        table.add(prefix("http://host1:8096/media/"), listener("c")).unwrap();
        assert!(table.add(prefix("http://host1:8096/media/"), listener("d")).is_err());
        table.add(prefix("http://host2:8096/media/"), listener("e")).unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn longest_prefix_wins() {
        let table = RoutingTable::new();
        table.add(prefix("http://*:80/a/"), listener("short")).unwrap();
        table.add(prefix("http://*:80/a/b/"), listener("long")).unwrap();

        assert_eq!(resolved_name(&table, &target("x", 80, "/a/b/c")).as_deref(), Some("long"));
        assert_eq!(resolved_name(&table, &target("x", 80, "/a/x")).as_deref(), Some("short"));
        assert_eq!(resolved_name(&table, &target("x", 80, "/a/b")).as_deref(), Some("long"));
        assert_eq!(resolved_name(&table, &target("x", 80, "/z")), None);
    }

    #[test]
    fn exact_host_beats_wildcards() {
        let table = RoutingTable::new();
        table.add(prefix("http://host1:80/p/"), listener("exact")).unwrap();
        table.add(prefix("http://*:80/p/"), listener("any")).unwrap();
        table.add(prefix("http://+:80/"), listener("all")).unwrap();

        assert_eq!(resolved_name(&table, &target("host1", 80, "/p/x")).as_deref(), Some("exact"));
        assert_eq!(resolved_name(&table, &target("HOST1", 80, "/p/x")).as_deref(), Some("exact"));
        assert_eq!(resolved_name(&table, &target("host1", 81, "/p/x")).as_deref(), Some("any"));
        assert_eq!(resolved_name(&table, &target("other", 80, "/p/x")).as_deref(), Some("any"));
        assert_eq!(resolved_name(&table, &target("other", 80, "/q")).as_deref(), Some("all"));
    }

    #[test]
    fn hostless_targets_skip_exact_prefixes() {
        let table = RoutingTable::new();
        table.add(prefix("http://host1:80/p/"), listener("exact")).unwrap();
        let t = RequestTarget::new(None, 80, "/p/x");
        assert!(table.resolve(&t).is_none());
    }

    #[test]
    fn removing_last_prefix_signals_once() {
        let table = RoutingTable::new();
        let l = listener("web");
        table.add(prefix("http://*:80/a/"), l.clone()).unwrap();
        table.add(prefix("http://host:80/b/"), l.clone()).unwrap();

        assert_eq!(table.remove(&prefix("http://*:80/a/"), &l), Removal::Removed { now_empty: false });
        assert_eq!(table.remove(&prefix("http://host:80/b/"), &l), Removal::Removed { now_empty: true });
        assert_eq!(table.remove(&prefix("http://host:80/b/"), &l), Removal::NotFound);
        assert!(table.resolve(&target("host", 80, "/b/c")).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn remove_ignores_other_listeners() {
        let table = RoutingTable::new();
        let owner = listener("owner");
        let stranger = listener("stranger");
        table.add(prefix("http://*:80/a/"), owner.clone()).unwrap();

        assert_eq!(table.remove(&prefix("http://*:80/a/"), &stranger), Removal::NotFound);
        assert_eq!(table.prefixes_of(&owner).len(), 1);
        assert!(table.prefixes_of(&stranger).is_empty());
    }

    #[test]
    fn concurrent_adds_are_not_lost() {
        let mut table = RoutingTable::new();
        table.cas_delay = Some(Duration::from_millis(1));
        let table = Arc::new(table);
        let l = listener("web");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let table = table.clone();
                let l = l.clone();
                std::thread::spawn(move || {
                    for j in 0..8 {
                        let p = prefix(&format!("http://*:80/t{}/{}/", i, j));
                        table.add(p, l.clone()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(table.len(), 16 * 8);
        for i in 0..16 {
            for j in 0..8 {
                let t = target("x", 80, &format!("/t{}/{}/file", i, j));
                assert!(table.resolve(&t).is_some());
            }
        }
    }
}
