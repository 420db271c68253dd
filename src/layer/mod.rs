//! # Layers
//!
//! A layer is a self-contained unit of topology or protocol logic. Layers do
//! not call each other; they cooperate through the registry and the binding
//! resolver reachable from the [`BuildContext`] passed to every phase.
//!
//! ## Lifecycle
//!
//! ```text
//! construct ──> configure (every layer, dependency order)
//!           ──> render    (every layer, dependency order recomputed)
//!           ──> rendered  (registry frozen, handed to a compiler)
//! ```
//!
//! `configure` computes cross-object logic and resolves virtual-node
//! bindings; `render` materializes files and start commands once the whole
//! topology is stable.
//!
//! ## Dependencies
//!
//! Each layer lists [`Dependency`] entries. A hard dependency must be present
//! and runs first; a soft one only orders the two layers when both exist. A
//! reverse dependency is declared by the layer that must run *first*, which
//! lets a layer order itself before layers it does not own.

pub mod context;
pub mod engine;

pub use context::{BuildContext, Phase};
pub use engine::{check_conflicts, compute_order, configure_all, register_layer, render_all};

use crate::error::Result;
use std::any::Any;
use std::fmt;

/// One declared ordering constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Name of the other layer
    pub layer: String,
    /// Only constrain order when the other layer is present
    pub soft: bool,
    /// The other layer runs after the declaring layer
    pub reverse: bool,
}

impl Dependency {
    pub fn new(layer: impl Into<String>, soft: bool, reverse: bool) -> Self {
        Dependency {
            layer: layer.into(),
            soft,
            reverse,
        }
    }

    /// `layer` must exist and run before the declaring layer.
    pub fn hard(layer: impl Into<String>) -> Self {
        Self::new(layer, false, false)
    }

    /// If `layer` exists, it runs before the declaring layer.
    pub fn soft(layer: impl Into<String>) -> Self {
        Self::new(layer, true, false)
    }

    /// If `layer` exists, it runs after the declaring layer.
    pub fn reverse(layer: impl Into<String>) -> Self {
        Self::new(layer, true, true)
    }

    /// Make the dependency required.
    pub fn required(mut self) -> Self {
        self.soft = false;
        self
    }
}

/// Contract implemented by every layer.
pub trait Layer: fmt::Debug + Any {
    fn name(&self) -> &str;

    /// Key used to pick a merger and a snapshot loader. Defaults to the name.
    fn type_name(&self) -> &str {
        self.name()
    }

    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    /// Layers that must not be present together with this one.
    fn conflicts(&self) -> Vec<String> {
        Vec::new()
    }

    fn configure(&mut self, ctx: &mut BuildContext) -> Result<()>;

    fn render(&mut self, ctx: &mut BuildContext) -> Result<()>;

    /// Human-readable summary, indented by `indent` spaces.
    fn describe(&self, indent: usize) -> String {
        format!("{:indent$}{}\n", "", self.name(), indent = indent)
    }

    /// Namespace every virtual-node name this layer declares.
    fn prefix_virtual_nodes(&mut self, _prefix: &str) {}

    /// Persistable state, consumed by the matching snapshot loader.
    fn save(&self) -> Result<serde_json::Value>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}
