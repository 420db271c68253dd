//! Build context handed to layers in every pipeline phase.

use super::Layer;
use crate::binding::{Binding, BindingResolver};
use crate::error::{EmuError, Result};
use crate::model::Node;
use crate::registry::{ObjectKind, Registry, RegistryKey, RegistryObject, Scope};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Construct,
    Configure,
    Render,
    Rendered,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Construct => "construct",
            Phase::Configure => "configure",
            Phase::Render => "render",
            Phase::Rendered => "rendered",
        };
        f.write_str(name)
    }
}

/// Registry, bindings and phase state for one build.
///
/// New objects may be registered while constructing or configuring. During
/// render the set of objects is fixed; layers may still mutate existing
/// nodes. After render everything is read-only.
#[derive(Debug)]
pub struct BuildContext {
    registry: Registry,
    resolver: BindingResolver,
    phase: Phase,
    pending_layers: Vec<Box<dyn Layer>>,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BuildContext {
    pub fn new(seed: Option<u64>) -> Self {
        BuildContext {
            registry: Registry::new(),
            resolver: BindingResolver::new(seed),
            phase: Phase::Construct,
            pending_layers: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        log::debug!("Entering {} phase", phase);
        self.phase = phase;
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Structural access to the registry, refused once render starts.
    pub fn registry_mut(&mut self) -> Result<&mut Registry> {
        match self.phase {
            Phase::Construct | Phase::Configure => Ok(&mut self.registry),
            phase => Err(EmuError::phase("modify the registry", phase)),
        }
    }

    pub fn register(
        &mut self,
        scope: impl Into<Scope>,
        kind: ObjectKind,
        name: impl Into<String>,
        object: RegistryObject,
    ) -> Result<&mut RegistryObject> {
        self.registry_mut()?.register(scope, kind, name, object)
    }

    pub fn node(&self, key: &RegistryKey) -> Result<&Node> {
        self.registry.node(key)
    }

    /// Mutable node access; allowed until render completes.
    pub fn node_mut(&mut self, key: &RegistryKey) -> Result<&mut Node> {
        if self.phase == Phase::Rendered {
            return Err(EmuError::phase("modify a node", self.phase));
        }
        self.registry.node_mut(key)
    }

    pub fn resolver(&self) -> &BindingResolver {
        &self.resolver
    }

    pub(crate) fn resolver_mut(&mut self) -> &mut BindingResolver {
        &mut self.resolver
    }

    pub fn add_binding(&mut self, binding: Binding) -> Result<()> {
        match self.phase {
            Phase::Construct | Phase::Configure => {
                self.resolver.add_binding(binding);
                Ok(())
            }
            phase => Err(EmuError::phase("add a binding", phase)),
        }
    }

    /// Bind `vnode` to a physical node.
    ///
    /// Resolution happens while configuring. During render only virtual
    /// nodes that were already bound can be looked up.
    pub fn resolve_vnode(&mut self, vnode: &str) -> Result<RegistryKey> {
        match self.phase {
            Phase::Configure => self.resolver.resolve(vnode, &mut self.registry),
            Phase::Render | Phase::Rendered => self.resolver.bound_node(vnode).cloned(),
            Phase::Construct => Err(EmuError::phase(format!("resolve virtual node '{}'", vnode), self.phase)),
        }
    }

    /// Side-effect-free binding lookup, usable in any phase.
    pub fn peek_vnode(&self, vnode: &str) -> Result<Option<RegistryKey>> {
        self.resolver.peek(vnode, &self.registry)
    }

    /// Queue a layer created while configuring; it is configured before
    /// render starts.
    pub fn add_layer(&mut self, layer: Box<dyn Layer>) -> Result<()> {
        if self.phase != Phase::Configure {
            return Err(EmuError::phase(format!("add layer '{}'", layer.name()), self.phase));
        }
        log::debug!("Queued layer '{}' added during configure", layer.name());
        self.pending_layers.push(layer);
        Ok(())
    }

    pub(crate) fn take_pending_layers(&mut self) -> Vec<Box<dyn Layer>> {
        std::mem::take(&mut self.pending_layers)
    }

    pub(crate) fn into_parts(self) -> (Registry, BindingResolver) {
        (self.registry, self.resolver)
    }
}
