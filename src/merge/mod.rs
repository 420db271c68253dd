//! # Topology Merge
//!
//! Combines two independently built emulators into one. Both inputs must be
//! unrendered: merging works on layer definitions and bindings, and the
//! merged emulator rebuilds its registry when it is rendered.
//!
//! ## Algorithm
//!
//! 1. Optionally namespace every virtual node of the second emulator with a
//!    prefix (its layers' declarations and its binding patterns).
//! 2. Union the non-layer registry entries. A key present on both sides is
//!    a collision.
//! 3. Layers present on only one side are carried over. A layer present on
//!    both sides is reconciled by the [`Merger`] registered for its type;
//!    without one the merge fails.
//! 4. Bindings are concatenated, first emulator first, so first-match-wins
//!    still holds.

use crate::binding::Binding;
use crate::emulator::{Emulator, EmulatorParts};
use crate::error::{EmuError, Result};
use crate::layer::Layer;
use crate::registry::{RegistryEntry, RegistryKey};
use indexmap::IndexMap;

/// Reconciles two layers of the same type and name.
pub trait Merger {
    /// Layer type this merger handles.
    fn target_type(&self) -> &str;

    fn merge(&self, ours: Box<dyn Layer>, theirs: Box<dyn Layer>) -> Result<Box<dyn Layer>>;
}

/// Recover the concrete layer type behind a trait object.
pub fn downcast_layer<T: Layer>(layer: Box<dyn Layer>) -> Result<T> {
    let name = layer.name().to_string();
    let type_name = layer.type_name().to_string();
    layer
        .into_any()
        .downcast::<T>()
        .map(|layer| *layer)
        .map_err(|_| EmuError::LayerTypeMismatch {
            name,
            type_name,
            expected: std::any::type_name::<T>(),
        })
}

pub(crate) fn validate_vnode_prefix(prefix: &str) -> Result<()> {
    let valid = !prefix.is_empty()
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(EmuError::InvalidVnodePrefix(prefix.to_string()))
    }
}

fn merge_objects(ours: Vec<RegistryEntry>, theirs: Vec<RegistryEntry>) -> Result<Vec<RegistryEntry>> {
    let mut merged: IndexMap<RegistryKey, RegistryEntry> =
        ours.into_iter().map(|entry| (entry.key.clone(), entry)).collect();
    for entry in theirs {
        if merged.contains_key(&entry.key) {
            return Err(EmuError::MergeCollision {
                what: entry.key.to_string(),
                ours: "first emulator".to_string(),
                theirs: "second emulator".to_string(),
            });
        }
        merged.insert(entry.key.clone(), entry);
    }
    Ok(merged.into_values().collect())
}

fn merge_layers(
    ours: Vec<Box<dyn Layer>>,
    theirs: Vec<Box<dyn Layer>>,
    mergers: &[Box<dyn Merger>],
) -> Result<Vec<Box<dyn Layer>>> {
    let mut theirs: IndexMap<String, Box<dyn Layer>> = theirs
        .into_iter()
        .map(|layer| (layer.name().to_string(), layer))
        .collect();

    let mut merged = Vec::with_capacity(ours.len() + theirs.len());
    for layer in ours {
        let Some(other) = theirs.shift_remove(layer.name()) else {
            merged.push(layer);
            continue;
        };
        if layer.type_name() != other.type_name() {
            return Err(EmuError::MergeCollision {
                what: format!("layer '{}'", layer.name()),
                ours: layer.type_name().to_string(),
                theirs: other.type_name().to_string(),
            });
        }
        let merger = mergers
            .iter()
            .find(|m| m.target_type() == layer.type_name())
            .ok_or_else(|| EmuError::NoMerger {
                name: layer.name().to_string(),
                type_name: layer.type_name().to_string(),
            })?;
        log::info!("Merging layer '{}' with {}", layer.name(), merger.target_type());
        merged.push(merger.merge(layer, other)?);
    }
    merged.extend(theirs.into_values());
    Ok(merged)
}

/// Merge emulator `b` into emulator `a`.
///
/// When `vnode_prefix` is given, every virtual node `b` declares or binds is
/// renamed to `{prefix}{name}` first. The merged emulator keeps `a`'s seed.
pub fn merge_emulators(
    a: Emulator,
    b: Emulator,
    mergers: &[Box<dyn Merger>],
    vnode_prefix: Option<&str>,
) -> Result<Emulator> {
    let ours = a.into_parts()?;
    let mut theirs = b.into_parts()?;

    if let Some(prefix) = vnode_prefix {
        validate_vnode_prefix(prefix)?;
        log::info!("Prefixing virtual nodes of the second emulator with '{}'", prefix);
        for layer in theirs.layers.iter_mut() {
            layer.prefix_virtual_nodes(prefix);
        }
        theirs.bindings = theirs
            .bindings
            .iter()
            .map(|binding| binding.with_prefix(prefix))
            .collect::<Result<Vec<Binding>>>()?;
    }

    let objects = merge_objects(ours.objects, theirs.objects)?;
    let layers = merge_layers(ours.layers, theirs.layers, mergers)?;
    let mut bindings = ours.bindings;
    bindings.extend(theirs.bindings);

    Emulator::from_parts(EmulatorParts {
        seed: ours.seed,
        layers,
        objects,
        bindings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{Base, BaseMerger};
    use crate::binding::{Action, Filter};
    use crate::model::{Node, NodeRole};
    use crate::registry::{ObjectKind, RegistryObject};
    use crate::service::{Service, WebServer};

    fn emulator_with_as(asn: u32) -> Emulator {
        let mut base = Base::new();
        let asys = base.create_autonomous_system(asn).unwrap();
        asys.create_network("net0").unwrap();
        asys.create_host("host0").unwrap().join_network("net0");
        let mut emu = Emulator::with_seed(Some(7));
        emu.add_layer(base).unwrap();
        emu
    }

    fn mergers() -> Vec<Box<dyn Merger>> {
        vec![Box::new(BaseMerger)]
    }

    #[test]
    fn test_same_layer_without_merger_fails() {
        let err = merge_emulators(emulator_with_as(150), emulator_with_as(151), &[], None).unwrap_err();
        assert!(matches!(err, EmuError::NoMerger { ref name, .. } if name == "Base"));
    }

    #[test]
    fn test_downcast_to_the_wrong_type_names_both_types() {
        let layer: Box<dyn Layer> = Box::new(Service::<WebServer>::new());
        let err = downcast_layer::<Base>(layer).unwrap_err();
        match &err {
            EmuError::LayerTypeMismatch { name, type_name, expected } => {
                assert_eq!(name, "WebService");
                assert_eq!(type_name, "WebService");
                assert!(expected.ends_with("Base"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.to_string().contains("No merger"));
    }

    #[test]
    fn test_vnode_prefix_charset() {
        assert!(validate_vnode_prefix("lib_1.a-").is_ok());
        assert!(matches!(validate_vnode_prefix(""), Err(EmuError::InvalidVnodePrefix(_))));
        assert!(matches!(validate_vnode_prefix("a b"), Err(EmuError::InvalidVnodePrefix(_))));
    }

    #[test]
    fn test_bindings_concatenate_and_get_prefixed() {
        let mut a = emulator_with_as(150);
        a.add_binding(Binding::new("web", Filter::new().asn(150), Action::First).unwrap())
            .unwrap();
        let mut b = emulator_with_as(151);
        b.add_binding(Binding::new("web", Filter::new().asn(151), Action::First).unwrap())
            .unwrap();

        let merged = merge_emulators(a, b, &mergers(), Some("b_")).unwrap();
        let sources: Vec<&str> = merged.bindings().iter().map(|b| b.source()).collect();
        assert_eq!(sources, vec!["web", "b_(?:web)"]);
        assert!(merged.bindings()[1].matches("b_web"));
        assert!(!merged.bindings()[1].matches("web"));
    }

    #[test]
    fn test_colliding_objects_name_both_sides() {
        let mut a = Emulator::new();
        let mut b = Emulator::new();
        for emu in [&mut a, &mut b] {
            emu.register(150, ObjectKind::Host, "extra", RegistryObject::Node(Node::new("extra", 150, NodeRole::Host)))
                .unwrap();
        }
        let err = merge_emulators(a, b, &mergers(), None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("(150, hnode, extra)"));
        assert!(message.contains("first emulator") && message.contains("second emulator"));
    }

    #[test]
    fn test_invalid_vnode_prefix_rejected() {
        let err = merge_emulators(Emulator::new(), Emulator::new(), &[], Some("bad prefix")).unwrap_err();
        assert!(matches!(err, EmuError::InvalidVnodePrefix(_)));
    }

    #[test]
    fn test_rendered_input_refused() {
        let mut a = emulator_with_as(150);
        a.render().unwrap();
        let err = merge_emulators(a, Emulator::new(), &mergers(), None).unwrap_err();
        assert!(matches!(err, EmuError::AlreadyRendered));
    }
}
