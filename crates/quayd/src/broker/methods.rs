//! Hierarchical method registry.
//!
//! Dotted method paths (`calc.add`) resolve through a namespace trie to
//! either a daemon-internal handler or the service connection owning the
//! method. Exact matches only; an unresolved path is a normal outcome
//! the caller is told about, not a registry failure.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::connections::ConnectionId;

/// Daemon-internal method callback.
///
/// Handlers run synchronously on the reactor thread. They receive the
/// registry (read-only, for introspection methods) and the opaque call
/// payload; a returned `Err` becomes an error reply to the caller.
pub type LocalHandler = Arc<dyn Fn(&MethodRegistry, &Value) -> Result<Value, String> + Send + Sync>;

/// What a method path resolves to.
#[derive(Clone)]
pub enum MethodEntry {
    /// Executed in-process, no network hop.
    Local(LocalHandler),
    /// Forwarded verbatim to the owning service connection.
    Remote { owner: ConnectionId },
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(_) => formatter.write_str("Local(..)"),
            Self::Remote { owner } => write!(formatter, "Remote {{ owner: {owner} }}"),
        }
    }
}

/// A malformed method path: empty, or containing an empty segment.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid method path '{path}'")]
pub struct MethodPathError {
    path: String,
}

#[derive(Debug, Default)]
struct Namespace {
    children: HashMap<String, Namespace>,
    methods: HashMap<String, MethodEntry>,
}

impl Namespace {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.methods.is_empty()
    }
}

/// The namespace trie mapping dotted paths to method entries.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    root: Namespace,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a daemon-internal method; used at startup only, never
    /// reachable from peer messages.
    pub fn register_local(
        &mut self,
        path: &str,
        handler: LocalHandler,
    ) -> Result<Option<MethodEntry>, MethodPathError> {
        self.install(path, MethodEntry::Local(handler))
    }

    /// Installs or replaces a remote method owned by `owner`.
    ///
    /// Missing namespace nodes are created implicitly. Re-registering an
    /// existing path transfers ownership to the new connection, so a
    /// restarted service can re-announce without a special case; the
    /// replaced entry is returned for the caller to log.
    pub fn register_remote(
        &mut self,
        path: &str,
        owner: ConnectionId,
    ) -> Result<Option<MethodEntry>, MethodPathError> {
        self.install(path, MethodEntry::Remote { owner })
    }

    fn install(
        &mut self,
        path: &str,
        entry: MethodEntry,
    ) -> Result<Option<MethodEntry>, MethodPathError> {
        let segments = split_path(path).ok_or_else(|| MethodPathError {
            path: path.to_owned(),
        })?;
        let (method, namespaces) = segments
            .split_last()
            .ok_or_else(|| MethodPathError {
                path: path.to_owned(),
            })?;
        let mut node = &mut self.root;
        for segment in namespaces {
            node = node.children.entry((*segment).to_owned()).or_default();
        }
        Ok(node.methods.insert((*method).to_owned(), entry))
    }

    /// Removes one entry; a missing path is a no-op. Namespace nodes
    /// left empty by the removal are pruned.
    pub fn unregister(&mut self, path: &str) -> Option<MethodEntry> {
        let segments = split_path(path)?;
        remove_at(&mut self.root, &segments)
    }

    /// Removes every remote entry owned by `owner`; returns how many
    /// were removed. Used on service disconnect and withdrawal.
    pub fn unregister_owned_by(&mut self, owner: ConnectionId) -> usize {
        sweep_owner(&mut self.root, owner)
    }

    /// Exact-match lookup; `None` means unknown method.
    pub fn resolve(&self, path: &str) -> Option<&MethodEntry> {
        let segments = split_path(path)?;
        let (method, namespaces) = segments.split_last()?;
        let mut node = &self.root;
        for segment in namespaces {
            node = node.children.get(*segment)?;
        }
        node.methods.get(*method)
    }

    /// Every registered path, sorted; backs the introspection built-in.
    pub fn paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_paths(&self.root, &mut String::new(), &mut paths);
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.paths().len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

fn split_path(path: &str) -> Option<Vec<&str>> {
    if path.is_empty() {
        return None;
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return None;
    }
    Some(segments)
}

fn remove_at(node: &mut Namespace, segments: &[&str]) -> Option<MethodEntry> {
    match segments {
        [] => None,
        [method] => node.methods.remove(*method),
        [head, rest @ ..] => {
            let child = node.children.get_mut(*head)?;
            let removed = remove_at(child, rest);
            if child.is_empty() {
                node.children.remove(*head);
            }
            removed
        }
    }
}

fn sweep_owner(node: &mut Namespace, owner: ConnectionId) -> usize {
    let before = node.methods.len();
    node.methods
        .retain(|_, entry| !matches!(entry, MethodEntry::Remote { owner: o } if *o == owner));
    let mut removed = before - node.methods.len();
    node.children.retain(|_, child| {
        removed += sweep_owner(child, owner);
        !child.is_empty()
    });
    removed
}

fn collect_paths(node: &Namespace, prefix: &mut String, out: &mut Vec<String>) {
    for name in node.methods.keys() {
        if prefix.is_empty() {
            out.push(name.clone());
        } else {
            out.push(format!("{prefix}.{name}"));
        }
    }
    for (name, child) in &node.children {
        let saved = prefix.len();
        if !prefix.is_empty() {
            prefix.push('.');
        }
        prefix.push_str(name);
        collect_paths(child, prefix, out);
        prefix.truncate(saved);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn conn_ids(count: usize) -> Vec<ConnectionId> {
        (1..=count as u64).map(ConnectionId::stub).collect()
    }

    fn owner_of(registry: &MethodRegistry, path: &str) -> Option<ConnectionId> {
        match registry.resolve(path) {
            Some(MethodEntry::Remote { owner }) => Some(*owner),
            _ => None,
        }
    }

    #[test]
    fn resolves_registered_remote_methods() {
        let ids = conn_ids(1);
        let mut registry = MethodRegistry::new();
        registry
            .register_remote("calc.add", ids[0])
            .expect("register");
        assert_eq!(owner_of(&registry, "calc.add"), Some(ids[0]));
        assert!(registry.resolve("calc.sub").is_none());
        assert!(registry.resolve("calc").is_none());
        assert!(registry.resolve("calc.add.extra").is_none());
    }

    #[test]
    fn creates_nested_namespaces_implicitly() {
        let ids = conn_ids(1);
        let mut registry = MethodRegistry::new();
        registry
            .register_remote("org.example.calc.add", ids[0])
            .expect("register");
        assert_eq!(owner_of(&registry, "org.example.calc.add"), Some(ids[0]));
        assert_eq!(registry.paths(), vec!["org.example.calc.add".to_owned()]);
    }

    #[test]
    fn reregistration_transfers_ownership() {
        let ids = conn_ids(2);
        let mut registry = MethodRegistry::new();
        registry
            .register_remote("calc.add", ids[0])
            .expect("register");
        let replaced = registry
            .register_remote("calc.add", ids[1])
            .expect("register");
        assert!(matches!(
            replaced,
            Some(MethodEntry::Remote { owner }) if owner == ids[0]
        ));
        assert_eq!(owner_of(&registry, "calc.add"), Some(ids[1]));
    }

    #[test]
    fn unregister_prunes_empty_namespaces() {
        let ids = conn_ids(1);
        let mut registry = MethodRegistry::new();
        registry
            .register_remote("a.b.c.method", ids[0])
            .expect("register");
        assert!(registry.unregister("a.b.c.method").is_some());
        assert!(registry.is_empty());
        // Second removal is a no-op.
        assert!(registry.unregister("a.b.c.method").is_none());
    }

    #[test]
    fn unregister_keeps_sibling_entries() {
        let ids = conn_ids(1);
        let mut registry = MethodRegistry::new();
        registry.register_remote("calc.add", ids[0]).expect("add");
        registry.register_remote("calc.sub", ids[0]).expect("sub");
        registry.unregister("calc.add");
        assert!(registry.resolve("calc.sub").is_some());
    }

    #[test]
    fn owner_sweep_removes_only_that_owner() {
        let ids = conn_ids(2);
        let mut registry = MethodRegistry::new();
        registry.register_remote("calc.add", ids[0]).expect("add");
        registry.register_remote("calc.sub", ids[1]).expect("sub");
        registry
            .register_remote("text.upper", ids[0])
            .expect("upper");
        let removed = registry.unregister_owned_by(ids[0]);
        assert_eq!(removed, 2);
        assert_eq!(registry.paths(), vec!["calc.sub".to_owned()]);
    }

    #[test]
    fn owner_sweep_spares_local_entries() {
        let ids = conn_ids(1);
        let mut registry = MethodRegistry::new();
        registry
            .register_local("quay.ping", Arc::new(|_, payload| Ok(payload.clone())))
            .expect("local");
        registry.register_remote("calc.add", ids[0]).expect("add");
        registry.unregister_owned_by(ids[0]);
        assert!(matches!(
            registry.resolve("quay.ping"),
            Some(MethodEntry::Local(_))
        ));
    }

    #[rstest]
    #[case::empty("")]
    #[case::lone_dot(".")]
    #[case::trailing_dot("calc.")]
    #[case::leading_dot(".add")]
    #[case::doubled_dot("calc..add")]
    fn rejects_malformed_paths(#[case] path: &str) {
        let ids = conn_ids(1);
        let mut registry = MethodRegistry::new();
        assert!(
            registry.register_remote(path, ids[0]).is_err(),
            "path {path:?} should be rejected"
        );
        assert!(registry.resolve(path).is_none());
    }

    #[test]
    fn paths_come_back_sorted() {
        let ids = conn_ids(1);
        let mut registry = MethodRegistry::new();
        for path in ["zeta.last", "calc.add", "calc.sub", "alpha.first"] {
            registry.register_remote(path, ids[0]).expect("register");
        }
        let paths = registry.paths();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
        assert_eq!(paths.len(), 4);
    }

    #[test]
    fn local_handler_can_inspect_the_registry() {
        let mut registry = MethodRegistry::new();
        registry
            .register_local(
                "quay.methods",
                Arc::new(|reg, _| Ok(Value::from(reg.paths()))),
            )
            .expect("local");
        let entry = registry.resolve("quay.methods").cloned().expect("entry");
        let MethodEntry::Local(handler) = entry else {
            panic!("expected local entry");
        };
        let listing = handler(&registry, &Value::Null).expect("handler");
        assert_eq!(listing, Value::from(vec!["quay.methods".to_owned()]));
    }
}
