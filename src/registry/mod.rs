//! # Object Registry
//!
//! The registry is the single store of every modeled object for one build:
//! hosts, routers, route servers, networks and the layers themselves. Layers
//! never hold references to each other; they find the objects they need here.
//!
//! ## Keys
//!
//! Entries are addressed by a `(scope, kind, name)` triple:
//!
//! ```text
//! (150, hnode, web)        host "web" in AS150
//! (150, net, net0)         local network "net0" in AS150
//! (ix, net, ix100)         peering LAN of exchange 100
//! (ix, rs, ix100)          route server of exchange 100
//! (seedemu, layer, Base)   the Base layer
//! ```
//!
//! A key can be registered exactly once. Entries keep their insertion order,
//! which is the iteration order every consumer (and the binding resolver's
//! FIRST/LAST actions) observes.
//!
//! ## Scoped Views
//!
//! [`ScopedRegistry`] narrows the registry to one scope, e.g. "every router in
//! AS150" is `registry.scoped(Scope::Asn(150)).get_by_type(ObjectKind::Router)`.

pub mod key;
pub mod scoped;

pub use key::{ObjectKind, RegistryKey, Scope};
pub use scoped::ScopedRegistry;

use crate::error::{EmuError, Result};
use crate::model::{Network, Node};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Registry record of a layer; the layer object itself lives in the emulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerEntry {
    pub type_name: String,
}

/// Any object that can be stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryObject {
    Node(Node),
    Network(Network),
    Layer(LayerEntry),
}

impl RegistryObject {
    /// The kind this object must be registered under.
    pub fn kind(&self) -> ObjectKind {
        match self {
            RegistryObject::Node(node) => node.role.kind(),
            RegistryObject::Network(_) => ObjectKind::Network,
            RegistryObject::Layer(_) => ObjectKind::Layer,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            RegistryObject::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_network(&self) -> Option<&Network> {
        match self {
            RegistryObject::Network(net) => Some(net),
            _ => None,
        }
    }
}

/// One `(key, object)` pair in serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub key: RegistryKey,
    pub object: RegistryObject,
}

/// Insertion-ordered store of every object in one build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RegistryEntry>", into = "Vec<RegistryEntry>")]
pub struct Registry {
    entries: IndexMap<RegistryKey, RegistryObject>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object under `(scope, kind, name)`.
    ///
    /// Fails if the key is taken or if the object does not fit `kind`.
    pub fn register(
        &mut self,
        scope: impl Into<Scope>,
        kind: ObjectKind,
        name: impl Into<String>,
        object: RegistryObject,
    ) -> Result<&mut RegistryObject> {
        self.register_key(RegistryKey::new(scope, kind, name), object)
    }

    pub fn register_key(&mut self, key: RegistryKey, object: RegistryObject) -> Result<&mut RegistryObject> {
        if object.kind() != key.kind {
            return Err(EmuError::KindMismatch {
                found: object.kind(),
                key,
            });
        }
        if self.entries.contains_key(&key) {
            return Err(EmuError::DuplicateRegistration { key });
        }
        log::debug!("Registering {}", key);
        let entry = self.entries.entry(key).or_insert(object);
        Ok(entry)
    }

    /// Look up an entry, failing if it is absent.
    pub fn get(&self, scope: impl Into<Scope>, kind: ObjectKind, name: &str) -> Result<&RegistryObject> {
        self.get_by_key(&RegistryKey::new(scope, kind, name))
    }

    pub fn get_by_key(&self, key: &RegistryKey) -> Result<&RegistryObject> {
        self.entries
            .get(key)
            .ok_or_else(|| EmuError::NotFound { key: key.clone() })
    }

    pub fn get_mut_by_key(&mut self, key: &RegistryKey) -> Result<&mut RegistryObject> {
        self.entries
            .get_mut(key)
            .ok_or_else(|| EmuError::NotFound { key: key.clone() })
    }

    pub fn contains(&self, key: &RegistryKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Every entry, in registration order.
    pub fn get_all(&self) -> impl Iterator<Item = (&RegistryKey, &RegistryObject)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RegistryKey> {
        self.entries.keys()
    }

    pub fn scoped(&self, scope: Scope) -> ScopedRegistry<'_> {
        ScopedRegistry::new(self, scope)
    }

    pub fn node(&self, key: &RegistryKey) -> Result<&Node> {
        match self.get_by_key(key)? {
            RegistryObject::Node(node) => Ok(node),
            other => Err(EmuError::KindMismatch {
                key: key.clone(),
                found: other.kind(),
            }),
        }
    }

    pub fn node_mut(&mut self, key: &RegistryKey) -> Result<&mut Node> {
        match self.get_mut_by_key(key)? {
            RegistryObject::Node(node) => Ok(node),
            other => Err(EmuError::KindMismatch {
                found: other.kind(),
                key: key.clone(),
            }),
        }
    }

    pub fn network(&self, key: &RegistryKey) -> Result<&Network> {
        match self.get_by_key(key)? {
            RegistryObject::Network(net) => Ok(net),
            other => Err(EmuError::KindMismatch {
                key: key.clone(),
                found: other.kind(),
            }),
        }
    }

    pub fn network_mut(&mut self, key: &RegistryKey) -> Result<&mut Network> {
        match self.get_mut_by_key(key)? {
            RegistryObject::Network(net) => Ok(net),
            other => Err(EmuError::KindMismatch {
                found: other.kind(),
                key: key.clone(),
            }),
        }
    }

    /// Keys of every host node, in registration order.
    pub fn host_keys(&self) -> Vec<RegistryKey> {
        self.entries
            .keys()
            .filter(|key| key.kind == ObjectKind::Host)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TryFrom<Vec<RegistryEntry>> for Registry {
    type Error = String;

    fn try_from(entries: Vec<RegistryEntry>) -> Result<Self, Self::Error> {
        let mut registry = Registry::new();
        for entry in entries {
            registry
                .register_key(entry.key, entry.object)
                .map_err(|e| e.to_string())?;
        }
        Ok(registry)
    }
}

impl From<Registry> for Vec<RegistryEntry> {
    fn from(registry: Registry) -> Self {
        registry
            .entries
            .into_iter()
            .map(|(key, object)| RegistryEntry { key, object })
            .collect()
    }
}
