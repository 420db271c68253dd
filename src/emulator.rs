//! # Emulator
//!
//! Ties the pieces together: an ordered list of layers, the build context
//! (registry plus binding resolver) and the pipeline driving them.
//!
//! ## Lifecycle
//!
//! 1. **Construct**: add layers, bindings and free-standing objects.
//! 2. **Render**: every layer is configured, then rendered, in dependency
//!    order. Virtual nodes are bound during configuration.
//! 3. **Compile**: a [`Compiler`] turns the frozen registry into artifacts.
//!
//! An unrendered emulator can be dumped to a snapshot, loaded back and
//! merged with another one. A rendered emulator can only be inspected and
//! compiled.

use crate::binding::Binding;
use crate::compiler::Compiler;
use crate::error::{EmuError, Result};
use crate::layer::{configure_all, register_layer, render_all, BuildContext, Layer, Phase};
use crate::merge::{merge_emulators, Merger};
use crate::registry::{ObjectKind, Registry, RegistryEntry, RegistryKey, RegistryObject, Scope};
use crate::snapshot::{EmulatorSnapshot, LayerCatalog, SnapshotFormat};
use std::path::{Path, PathBuf};

/// Everything an unrendered emulator is made of, detached from the build
/// context. Used by merge and snapshot restore.
pub(crate) struct EmulatorParts {
    pub seed: Option<u64>,
    pub layers: Vec<Box<dyn Layer>>,
    /// Registry entries other than layer records
    pub objects: Vec<RegistryEntry>,
    pub bindings: Vec<Binding>,
}

#[derive(Debug)]
pub struct Emulator {
    seed: Option<u64>,
    layers: Vec<Box<dyn Layer>>,
    ctx: BuildContext,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    pub fn new() -> Self {
        Self::with_seed(None)
    }

    /// Emulator whose RANDOM bindings are reproducible for a given seed.
    pub fn with_seed(seed: Option<u64>) -> Self {
        Emulator {
            seed,
            layers: Vec::new(),
            ctx: BuildContext::new(seed),
        }
    }

    pub(crate) fn from_parts(parts: EmulatorParts) -> Result<Self> {
        let mut emulator = Emulator::with_seed(parts.seed);
        let registry = emulator.ctx.registry_mut()?;
        for entry in parts.objects {
            registry.register_key(entry.key, entry.object)?;
        }
        for layer in parts.layers {
            emulator.add_boxed_layer(layer)?;
        }
        for binding in parts.bindings {
            emulator.add_binding(binding)?;
        }
        Ok(emulator)
    }

    pub(crate) fn into_parts(self) -> Result<EmulatorParts> {
        if self.is_rendered() {
            return Err(EmuError::AlreadyRendered);
        }
        let (registry, resolver) = self.ctx.into_parts();
        let objects = Vec::<RegistryEntry>::from(registry)
            .into_iter()
            .filter(|entry| entry.key.kind != ObjectKind::Layer)
            .collect();
        Ok(EmulatorParts {
            seed: self.seed,
            layers: self.layers,
            objects,
            bindings: resolver.into_bindings(),
        })
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Replace the seed used by RANDOM bindings.
    pub fn reseed(&mut self, seed: u64) {
        self.seed = Some(seed);
        self.ctx.resolver_mut().reseed(seed);
    }

    pub fn is_rendered(&self) -> bool {
        self.ctx.phase() == Phase::Rendered
    }

    fn ensure_unrendered(&self) -> Result<()> {
        if self.is_rendered() {
            Err(EmuError::AlreadyRendered)
        } else {
            Ok(())
        }
    }

    pub fn add_layer<L: Layer>(&mut self, layer: L) -> Result<()> {
        self.add_boxed_layer(Box::new(layer))
    }

    pub fn add_boxed_layer(&mut self, layer: Box<dyn Layer>) -> Result<()> {
        self.ensure_unrendered()?;
        register_layer(&mut self.layers, &mut self.ctx, layer)
    }

    /// Register a free-standing object that no layer owns.
    pub fn register(
        &mut self,
        scope: impl Into<Scope>,
        kind: ObjectKind,
        name: impl Into<String>,
        object: RegistryObject,
    ) -> Result<()> {
        self.ensure_unrendered()?;
        self.ctx.register(scope, kind, name, object)?;
        Ok(())
    }

    pub fn add_binding(&mut self, binding: Binding) -> Result<()> {
        self.ensure_unrendered()?;
        self.ctx.add_binding(binding)
    }

    /// Configure and render every layer. Runs at most once.
    pub fn render(&mut self) -> Result<()> {
        self.ensure_unrendered()?;
        log::info!("Rendering emulator with {} layers", self.layers.len());
        configure_all(&mut self.layers, &mut self.ctx)?;
        render_all(&mut self.layers, &mut self.ctx)?;
        log::info!(
            "Render complete: {} registry entries, {} virtual nodes bound",
            self.ctx.registry().len(),
            self.ctx.resolver().bound().count()
        );
        Ok(())
    }

    pub fn layers(&self) -> impl Iterator<Item = &dyn Layer> {
        self.layers.iter().map(|layer| layer.as_ref())
    }

    pub fn layer(&self, name: &str) -> Option<&dyn Layer> {
        self.layers().find(|layer| layer.name() == name)
    }

    /// Typed access to a layer, e.g. `get_layer::<Base>("Base")`.
    pub fn get_layer<T: Layer>(&self, name: &str) -> Option<&T> {
        self.layer(name)?.as_any().downcast_ref::<T>()
    }

    pub fn get_layer_mut<T: Layer>(&mut self, name: &str) -> Option<&mut T> {
        self.layers
            .iter_mut()
            .find(|layer| layer.name() == name)?
            .as_any_mut()
            .downcast_mut::<T>()
    }

    pub fn registry(&self) -> &Registry {
        self.ctx.registry()
    }

    pub fn bindings(&self) -> &[Binding] {
        self.ctx.resolver().bindings()
    }

    /// Physical node a virtual node was bound to while rendering.
    pub fn resolved_node(&self, vnode: &str) -> Result<&RegistryKey> {
        self.ctx.resolver().bound_node(vnode)
    }

    /// Where `vnode` is or would be bound, without binding it.
    pub fn peek_vnode(&self, vnode: &str) -> Result<Option<RegistryKey>> {
        self.ctx.peek_vnode(vnode)
    }

    /// Every `(virtual node, physical node)` pair, in resolution order.
    pub fn bound_vnodes(&self) -> impl Iterator<Item = (&str, &RegistryKey)> {
        self.ctx.resolver().bound()
    }

    pub fn describe(&self) -> String {
        let mut out = format!(
            "Emulator ({} layers, {} bindings, {}):\n",
            self.layers.len(),
            self.bindings().len(),
            if self.is_rendered() { "rendered" } else { "not rendered" }
        );
        for layer in &self.layers {
            out.push_str(&layer.describe(2));
        }
        for binding in self.bindings() {
            out.push_str(&format!(
                "  bind '{}' -> {} [{}]\n",
                binding.source(),
                binding.action,
                binding.filter
            ));
        }
        out
    }

    pub fn dump(&self, path: &Path, format: SnapshotFormat, compression_level: i32) -> Result<()> {
        EmulatorSnapshot::capture(self)?.write(path, format, compression_level)
    }

    pub fn load(path: &Path, catalog: &LayerCatalog) -> Result<Self> {
        EmulatorSnapshot::read(path)?.restore(catalog)
    }

    /// Merge `other` into this emulator; see [`merge_emulators`].
    pub fn merge(self, other: Emulator, mergers: &[Box<dyn Merger>], vnode_prefix: Option<&str>) -> Result<Self> {
        merge_emulators(self, other, mergers, vnode_prefix)
    }

    pub fn compile(&self, compiler: &dyn Compiler, output_dir: &Path) -> Result<Vec<PathBuf>> {
        if !self.is_rendered() {
            return Err(EmuError::NotRendered);
        }
        log::info!("Compiling with the {} compiler into {}", compiler.name(), output_dir.display());
        compiler.compile(self.registry(), output_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::Base;
    use crate::compiler::ManifestCompiler;
    use crate::service::{Service, WebServer};
    use tempfile::TempDir;

    fn small() -> Emulator {
        let mut base = Base::new();
        let asys = base.create_autonomous_system(150).unwrap();
        asys.create_network("net0").unwrap();
        asys.create_router("router0").unwrap().join_network("net0");
        asys.create_host("web").unwrap().join_network("net0");
        let mut emu = Emulator::with_seed(Some(1));
        emu.add_layer(base).unwrap();
        emu
    }

    #[test]
    fn test_render_runs_once() {
        let mut emu = small();
        emu.render().unwrap();
        assert!(emu.is_rendered());
        assert!(matches!(emu.render(), Err(EmuError::AlreadyRendered)));
        assert!(matches!(emu.add_layer(Base::new()), Err(EmuError::AlreadyRendered)));
    }

    #[test]
    fn test_service_without_base_is_missing_dependency() {
        let mut emu = Emulator::new();
        emu.add_layer(Service::<WebServer>::new()).unwrap();
        let err = emu.render().unwrap_err();
        assert_eq!(err.to_string(), "Layer 'WebService' has a missing dependency: Base");
    }

    #[test]
    fn test_typed_layer_access() {
        let mut emu = small();
        emu.get_layer_mut::<Base>("Base")
            .unwrap()
            .autonomous_system_mut(150)
            .unwrap()
            .create_host("db")
            .unwrap()
            .join_network("net0");
        assert_eq!(emu.get_layer::<Base>("Base").unwrap().autonomous_system(150).unwrap().hosts().count(), 2);
        assert!(emu.get_layer::<Service<WebServer>>("Base").is_none());
    }

    #[test]
    fn test_compile_requires_render() {
        let dir = TempDir::new().unwrap();
        let mut emu = small();
        assert!(matches!(
            emu.compile(&ManifestCompiler::default(), dir.path()),
            Err(EmuError::NotRendered)
        ));
        emu.render().unwrap();
        let files = emu.compile(&ManifestCompiler::default(), dir.path()).unwrap();
        assert!(files[0].exists());
    }

    #[test]
    fn test_describe_lists_layers() {
        let emu = small();
        let text = emu.describe();
        assert!(text.contains("Base:"));
        assert!(text.contains("AS150:"));
        assert!(text.contains("not rendered"));
    }
}
