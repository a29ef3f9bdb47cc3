//! Endpoints through which agents and tasks are exposed, keyed by `(port, path)`.
//!
//! The registry is an ordinary value handed to whatever serves the endpoints;
//! there is no process-wide table.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::task::TaskRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum EndpointTarget {
    Agent(String),
    Task(TaskRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub port: u16,
    pub path: String,
    pub target: EndpointTarget,
    pub registered_at: DateTime<Utc>,
}

type PortTable = BTreeMap<u16, BTreeMap<String, Endpoint>>;

#[derive(Clone, Default)]
pub struct ServerRegistry {
    endpoints: Arc<RwLock<PortTable>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, PortTable> {
        match self.endpoints.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, PortTable> {
        match self.endpoints.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register `target` at `path` on `port`.
    ///
    /// Paths are normalized to a single leading slash and no trailing slash,
    /// so `"agents/"` and `"/agents"` name the same endpoint.
    pub fn register(
        &self,
        port: u16,
        path: &str,
        target: EndpointTarget,
    ) -> Result<Endpoint, RegistryError> {
        let path = normalize_path(path)?;
        let mut table = self.write();
        let routes = table.entry(port).or_default();
        if routes.contains_key(&path) {
            return Err(RegistryError::DuplicateEndpoint { port, path });
        }
        let endpoint = Endpoint {
            port,
            path: path.clone(),
            target,
            registered_at: Utc::now(),
        };
        routes.insert(path, endpoint.clone());
        tracing::debug!(target: "agentflow.registry", port, path = %endpoint.path, "endpoint registered");
        Ok(endpoint)
    }

    pub fn lookup(&self, port: u16, path: &str) -> Option<Endpoint> {
        let path = normalize_path(path).ok()?;
        self.read().get(&port)?.get(&path).cloned()
    }

    pub fn remove(&self, port: u16, path: &str) -> Option<Endpoint> {
        let path = normalize_path(path).ok()?;
        let mut table = self.write();
        let routes = table.get_mut(&port)?;
        let removed = routes.remove(&path);
        if routes.is_empty() {
            table.remove(&port);
        }
        removed
    }

    /// Endpoints on `port`, sorted by path.
    pub fn endpoints_on(&self, port: u16) -> Vec<Endpoint> {
        self.read()
            .get(&port)
            .map(|routes| routes.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ports(&self) -> Vec<u16> {
        self.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("ports", &self.ports())
            .field("endpoints", &self.len())
            .finish()
    }
}

fn normalize_path(path: &str) -> Result<String, RegistryError> {
    let trimmed = path.trim();
    if trimmed.chars().any(|c| c.is_whitespace() || c == '?' || c == '#') {
        return Err(RegistryError::InvalidPath(path.to_string()));
    }
    let inner = trimmed.trim_matches('/');
    Ok(format!("/{inner}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_path_on_same_port_is_rejected() {
        let reg = ServerRegistry::new();
        reg.register(8000, "/agents", EndpointTarget::Agent("writer".into()))
            .unwrap();
        let err = reg
            .register(8000, "agents/", EndpointTarget::Agent("editor".into()))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateEndpoint {
                port: 8000,
                path: "/agents".into()
            }
        );

        reg.register(8001, "/agents", EndpointTarget::Agent("editor".into()))
            .unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.ports(), vec![8000, 8001]);
    }

    #[test]
    fn lookup_and_remove() {
        let reg = ServerRegistry::new();
        reg.register(9000, "/", EndpointTarget::Task(TaskRef::Name("summary".into())))
            .unwrap();
        let found = reg.lookup(9000, "").unwrap();
        assert_eq!(found.path, "/");
        assert_eq!(found.target, EndpointTarget::Task(TaskRef::Name("summary".into())));

        assert!(reg.remove(9000, "/").is_some());
        assert!(reg.lookup(9000, "/").is_none());
        assert!(reg.is_empty());
        assert!(reg.ports().is_empty());
    }

    #[test]
    fn clones_share_endpoints() {
        let reg = ServerRegistry::new();
        let other = reg.clone();
        other
            .register(7000, "/a", EndpointTarget::Agent("a".into()))
            .unwrap();
        assert_eq!(reg.endpoints_on(7000).len(), 1);
        assert!(matches!(
            reg.register(7000, "/bad path", EndpointTarget::Agent("b".into())),
            Err(RegistryError::InvalidPath(_))
        ));
    }
}
