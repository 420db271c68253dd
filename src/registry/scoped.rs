//! Scope-filtered registry view.

use super::{ObjectKind, Registry, RegistryKey, RegistryObject, Scope};
use crate::error::Result;

/// Read-only view of the entries in one scope.
#[derive(Debug, Clone, Copy)]
pub struct ScopedRegistry<'a> {
    registry: &'a Registry,
    scope: Scope,
}

impl<'a> ScopedRegistry<'a> {
    pub fn new(registry: &'a Registry, scope: Scope) -> Self {
        ScopedRegistry { registry, scope }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn get(&self, kind: ObjectKind, name: &str) -> Result<&'a RegistryObject> {
        self.registry.get(self.scope, kind, name)
    }

    pub fn contains(&self, kind: ObjectKind, name: &str) -> bool {
        self.registry.contains(&RegistryKey::new(self.scope, kind, name))
    }

    /// Every entry of `kind` in this scope, in registration order.
    pub fn get_by_type(&self, kind: ObjectKind) -> Vec<(&'a RegistryKey, &'a RegistryObject)> {
        let scope = self.scope;
        self.registry
            .get_all()
            .filter(|(key, _)| key.scope == scope && key.kind == kind)
            .collect()
    }

    pub fn get_all(&self) -> Vec<(&'a RegistryKey, &'a RegistryObject)> {
        let scope = self.scope;
        self.registry
            .get_all()
            .filter(|(key, _)| key.scope == scope)
            .collect()
    }
}
