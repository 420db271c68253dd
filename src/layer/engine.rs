//! Dependency ordering and the configure/render pipeline.
//!
//! The order is a topological sort (Kahn's algorithm) over the declared
//! dependencies. Among layers that are ready at the same time, the one
//! registered first runs first, so the order is deterministic.

use super::{BuildContext, Layer, Phase};
use crate::error::{EmuError, Result};
use crate::registry::{LayerEntry, RegistryKey, RegistryObject};
use std::collections::{BTreeSet, HashMap};

/// Register `layer` in the registry and append it to `layers`.
pub fn register_layer(
    layers: &mut Vec<Box<dyn Layer>>,
    ctx: &mut BuildContext,
    layer: Box<dyn Layer>,
) -> Result<()> {
    let entry = LayerEntry {
        type_name: layer.type_name().to_string(),
    };
    ctx.registry_mut()?
        .register_key(RegistryKey::layer(layer.name()), RegistryObject::Layer(entry))?;
    log::debug!("Registered layer '{}'", layer.name());
    layers.push(layer);
    Ok(())
}

/// Fail if two mutually exclusive layers are both present.
pub fn check_conflicts(layers: &[Box<dyn Layer>]) -> Result<()> {
    let present: BTreeSet<&str> = layers.iter().map(|l| l.name()).collect();
    for layer in layers {
        for other in layer.conflicts() {
            if other != layer.name() && present.contains(other.as_str()) {
                return Err(EmuError::LayerConflict {
                    layer: layer.name().to_string(),
                    other,
                });
            }
        }
    }
    Ok(())
}

/// Indices of `layers` in an order consistent with every dependency.
pub fn compute_order(layers: &[Box<dyn Layer>]) -> Result<Vec<usize>> {
    let index: HashMap<&str, usize> = layers
        .iter()
        .enumerate()
        .map(|(i, layer)| (layer.name(), i))
        .collect();

    // successors[a] contains b when a must run before b
    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); layers.len()];
    for (i, layer) in layers.iter().enumerate() {
        for dep in layer.dependencies() {
            let Some(&j) = index.get(dep.layer.as_str()) else {
                if dep.soft {
                    log::debug!("Layer '{}': optional dependency '{}' not present", layer.name(), dep.layer);
                    continue;
                }
                return Err(EmuError::MissingDependency {
                    layer: layer.name().to_string(),
                    dependency: dep.layer.clone(),
                });
            };
            if dep.reverse {
                successors[i].insert(j);
            } else {
                successors[j].insert(i);
            }
        }
    }

    let mut in_degree = vec![0usize; layers.len()];
    for succ in &successors {
        for &j in succ {
            in_degree[j] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..layers.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(layers.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &j in &successors[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.insert(j);
            }
        }
    }

    if order.len() < layers.len() {
        let remaining: BTreeSet<usize> = (0..layers.len()).filter(|&i| in_degree[i] > 0).collect();
        let cycle = find_cycle(&successors, &remaining)
            .into_iter()
            .map(|i| layers[i].name().to_string())
            .collect();
        return Err(EmuError::DependencyCycle { cycle });
    }
    Ok(order)
}

/// Walk predecessor links among the unsorted layers until one repeats.
///
/// Every unsorted layer has an unsorted predecessor, so the walk always
/// closes a loop. The result starts and ends with the same layer and reads
/// in execution direction.
fn find_cycle(successors: &[BTreeSet<usize>], remaining: &BTreeSet<usize>) -> Vec<usize> {
    let predecessor = |node: usize| {
        remaining
            .iter()
            .copied()
            .find(|&p| successors[p].contains(&node))
    };

    let Some(&start) = remaining.iter().next() else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    loop {
        let Some(&current) = path.last() else {
            return Vec::new();
        };
        let Some(pred) = predecessor(current) else {
            return remaining.iter().copied().collect();
        };
        if let Some(&at) = position.get(&pred) {
            let mut cycle = vec![pred];
            cycle.extend(path[at + 1..].iter().rev());
            cycle.push(pred);
            return cycle;
        }
        position.insert(pred, path.len());
        path.push(pred);
    }
}

fn order_names(layers: &[Box<dyn Layer>], order: &[usize]) -> String {
    order
        .iter()
        .map(|&i| layers[i].name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Run `configure` on every layer, once, in dependency order.
///
/// Layers queued on the context while configuring are registered and
/// configured in follow-up rounds.
pub fn configure_all(layers: &mut Vec<Box<dyn Layer>>, ctx: &mut BuildContext) -> Result<()> {
    ctx.set_phase(Phase::Configure);
    let mut configured = 0;
    loop {
        check_conflicts(layers)?;
        let order = compute_order(layers)?;
        let round: Vec<usize> = order.into_iter().filter(|&i| i >= configured).collect();
        log::info!("Configure order: [{}]", order_names(layers, &round));

        for i in round {
            log::debug!("Configuring layer '{}'", layers[i].name());
            layers[i].configure(ctx)?;
        }
        configured = layers.len();

        let pending = ctx.take_pending_layers();
        if pending.is_empty() {
            return Ok(());
        }
        for layer in pending {
            register_layer(layers, ctx, layer)?;
        }
    }
}

/// Run `render` on every layer, once, in a freshly computed order.
pub fn render_all(layers: &mut [Box<dyn Layer>], ctx: &mut BuildContext) -> Result<()> {
    check_conflicts(layers)?;
    let order = compute_order(layers)?;
    ctx.set_phase(Phase::Render);
    log::info!("Render order: [{}]", order_names(layers, &order));

    for i in order {
        log::debug!("Rendering layer '{}'", layers[i].name());
        layers[i].render(ctx)?;
    }
    ctx.set_phase(Phase::Rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::testing::{Journal, Recorder};
    use crate::layer::Dependency;

    fn build(specs: Vec<(&str, Vec<Dependency>)>, journal: &Journal) -> Vec<Box<dyn Layer>> {
        specs
            .into_iter()
            .map(|(name, deps)| Box::new(Recorder::new(name, deps, journal)) as Box<dyn Layer>)
            .collect()
    }

    fn names(layers: &[Box<dyn Layer>], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| layers[i].name().to_string()).collect()
    }

    #[test]
    fn test_dependency_runs_first() {
        let journal = Journal::default();
        let layers = build(
            vec![("B", vec![Dependency::hard("A")]), ("A", vec![])],
            &journal,
        );
        let order = compute_order(&layers).unwrap();
        assert_eq!(names(&layers, &order), vec!["A", "B"]);
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let journal = Journal::default();
        let layers = build(
            vec![
                ("C", vec![]),
                ("A", vec![]),
                ("D", vec![Dependency::hard("C")]),
                ("B", vec![]),
            ],
            &journal,
        );
        let order = compute_order(&layers).unwrap();
        assert_eq!(names(&layers, &order), vec!["C", "A", "D", "B"]);
    }

    #[test]
    fn test_missing_hard_dependency_is_named() {
        let journal = Journal::default();
        let layers = build(vec![("A", vec![]), ("B", vec![Dependency::hard("C")])], &journal);
        let err = compute_order(&layers).unwrap_err();
        assert!(matches!(
            &err,
            EmuError::MissingDependency { layer, dependency } if layer == "B" && dependency == "C"
        ));
        assert!(err.to_string().contains("missing dependency: C"));
    }

    #[test]
    fn test_soft_dependency_only_orders_when_present() {
        let journal = Journal::default();
        let absent = build(vec![("B", vec![Dependency::soft("X")])], &journal);
        assert_eq!(compute_order(&absent).unwrap(), vec![0]);

        let present = build(
            vec![("B", vec![Dependency::soft("A")]), ("A", vec![])],
            &journal,
        );
        let order = compute_order(&present).unwrap();
        assert_eq!(names(&present, &order), vec!["A", "B"]);
    }

    #[test]
    fn test_reverse_dependency_orders_target_after_declarer() {
        let journal = Journal::default();
        // Routing declares that Service must run after it
        let layers = build(
            vec![("Service", vec![]), ("Routing", vec![Dependency::reverse("Service")])],
            &journal,
        );
        let order = compute_order(&layers).unwrap();
        assert_eq!(names(&layers, &order), vec!["Routing", "Service"]);

        let hard_missing = build(vec![("Routing", vec![Dependency::reverse("Service").required()])], &journal);
        assert!(matches!(
            compute_order(&hard_missing),
            Err(EmuError::MissingDependency { .. })
        ));
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let journal = Journal::default();
        let layers = build(
            vec![
                ("A", vec![Dependency::hard("C")]),
                ("B", vec![Dependency::hard("A")]),
                ("C", vec![Dependency::hard("B")]),
                ("D", vec![Dependency::hard("A")]),
            ],
            &journal,
        );
        match compute_order(&layers).unwrap_err() {
            EmuError::DependencyCycle { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
                let mut members: Vec<_> = cycle[..3].to_vec();
                members.sort();
                assert_eq!(members, vec!["A", "B", "C"]);
                // Consecutive entries follow execution direction: C before A, A before B
                let pos = |n: &str| cycle.iter().position(|c| c == n).unwrap();
                assert_eq!(cycle[(pos("C") + 1) % 3], "A");
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let journal = Journal::default();
        let layers = build(vec![("A", vec![Dependency::hard("A")])], &journal);
        match compute_order(&layers).unwrap_err() {
            EmuError::DependencyCycle { cycle } => assert_eq!(cycle, vec!["A", "A"]),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_conflicting_layers_fail() {
        let journal = Journal::default();
        let mut authoritative = Recorder::new("DomainNameService", vec![], &journal);
        authoritative.conflicts = vec!["DomainNameCachingService".to_string()];
        let caching = Recorder::new("DomainNameCachingService", vec![], &journal);
        let layers: Vec<Box<dyn Layer>> = vec![Box::new(authoritative), Box::new(caching)];

        let err = check_conflicts(&layers).unwrap_err();
        assert!(matches!(err, EmuError::LayerConflict { .. }));
    }

    #[test]
    fn test_pipeline_runs_each_phase_once_in_order() {
        let journal = Journal::default();
        let mut ctx = BuildContext::new(Some(0));
        let mut layers = Vec::new();
        for layer in build(
            vec![("B", vec![Dependency::hard("A")]), ("A", vec![])],
            &journal,
        ) {
            register_layer(&mut layers, &mut ctx, layer).unwrap();
        }

        configure_all(&mut layers, &mut ctx).unwrap();
        render_all(&mut layers, &mut ctx).unwrap();

        assert_eq!(
            *journal.borrow(),
            vec!["configure:A", "configure:B", "render:A", "render:B"]
        );
        assert_eq!(ctx.phase(), Phase::Rendered);
    }

    #[test]
    fn test_layers_added_during_configure_join_both_phases() {
        let journal = Journal::default();
        let mut ctx = BuildContext::new(Some(0));
        let mut spawner = Recorder::new("Spawner", vec![], &journal);
        spawner
            .spawns
            .push(Recorder::new("Child", vec![Dependency::hard("Spawner")], &journal));
        let mut layers = Vec::new();
        register_layer(&mut layers, &mut ctx, Box::new(spawner)).unwrap();

        configure_all(&mut layers, &mut ctx).unwrap();
        assert_eq!(layers.len(), 2);
        assert!(ctx.registry().contains(&RegistryKey::layer("Child")));
        render_all(&mut layers, &mut ctx).unwrap();

        assert_eq!(
            *journal.borrow(),
            vec!["configure:Spawner", "configure:Child", "render:Spawner", "render:Child"]
        );

        // Queuing outside configure is rejected
        let late = Recorder::new("Late", vec![], &journal);
        assert!(matches!(ctx.add_layer(Box::new(late)), Err(EmuError::Phase { .. })));
    }

    #[test]
    fn test_layer_registration_is_unique() {
        let journal = Journal::default();
        let mut ctx = BuildContext::new(Some(0));
        let mut layers = Vec::new();
        register_layer(&mut layers, &mut ctx, Box::new(Recorder::new("A", vec![], &journal))).unwrap();
        let err = register_layer(&mut layers, &mut ctx, Box::new(Recorder::new("A", vec![], &journal))).unwrap_err();
        assert!(matches!(err, EmuError::DuplicateRegistration { .. }));
        assert_eq!(layers.len(), 1);
    }
}
