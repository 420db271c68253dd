//! Error types for topology construction, layering, binding and merging.
//!
//! Every failure here is a construction-time logic error: the build aborts
//! and the message carries enough context (key, layer, virtual node, filter)
//! to fix the topology description.

use crate::registry::{ObjectKind, RegistryKey};

/// Convenience alias used across the library.
pub type Result<T, E = EmuError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum EmuError {
    #[error("Duplicate registration: {key} is already registered")]
    DuplicateRegistration { key: RegistryKey },

    #[error("Registry entry not found: {key}")]
    NotFound { key: RegistryKey },

    #[error("Object registered as {key} is a {found}, not a {}", .key.kind)]
    KindMismatch { key: RegistryKey, found: ObjectKind },

    #[error("Layer '{layer}' has a missing dependency: {dependency}")]
    MissingDependency { layer: String, dependency: String },

    #[error("Dependency cycle between layers: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("Layer '{layer}' conflicts with layer '{other}'; they cannot both be present")]
    LayerConflict { layer: String, other: String },

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("No binding matches virtual node '{vnode}'")]
    NoBinding { vnode: String },

    #[error("No candidate node for virtual node '{vnode}' (filter: {filter})")]
    NoCandidate { vnode: String, filter: String },

    #[error("Virtual node '{vnode}' has not been bound")]
    NotBound { vnode: String },

    #[error("Merge collision on {what}: defined by both '{ours}' and '{theirs}'")]
    MergeCollision {
        what: String,
        ours: String,
        theirs: String,
    },

    #[error("No merger for layer '{name}' of type '{type_name}' present in both emulators")]
    NoMerger { name: String, type_name: String },

    #[error("Layer '{name}' of type '{type_name}' is not a {expected}")]
    LayerTypeMismatch {
        name: String,
        type_name: String,
        expected: &'static str,
    },

    #[error("Cannot {operation} during the {phase} phase")]
    Phase { operation: String, phase: String },

    #[error("Emulator has already been rendered")]
    AlreadyRendered,

    #[error("Emulator has not been rendered yet")]
    NotRendered,

    #[error("Invalid topology: {0}")]
    Topology(String),

    #[error("Invalid prefix '{0}'")]
    InvalidPrefix(String),

    #[error("Invalid virtual-node prefix '{0}': use letters, digits, '-', '_' or '.'")]
    InvalidVnodePrefix(String),

    #[error("Unknown layer type '{0}' in snapshot")]
    UnknownLayerType(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Binary encoding error: {0}")]
    Bincode(#[from] bincode::Error),
}

impl EmuError {
    pub(crate) fn phase(operation: impl Into<String>, phase: impl std::fmt::Display) -> Self {
        EmuError::Phase {
            operation: operation.into(),
            phase: phase.to_string(),
        }
    }
}
