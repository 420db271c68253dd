//! Virtual-node to physical-node resolution.

use super::{Action, Binding, Filter};
use crate::error::{EmuError, Result};
use crate::model::{connect, Interface, Network, NetworkKind, Node, NodeRole, HOST_ADDRESS_START};
use crate::registry::{ObjectKind, Registry, RegistryKey, RegistryObject, Scope};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::net::Ipv4Addr;

/// Owns the binding rules and the record of which virtual node landed where.
///
/// The bound state lives here, not on the nodes: `bound` maps each virtual
/// node to its physical node and `occupants` maps each physical node back to
/// the virtual nodes it hosts.
#[derive(Debug)]
pub struct BindingResolver {
    bindings: Vec<Binding>,
    bound: IndexMap<String, RegistryKey>,
    occupants: IndexMap<RegistryKey, Vec<String>>,
    rng: StdRng,
}

impl Default for BindingResolver {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BindingResolver {
    /// Create a resolver; `seed` makes [`Action::Random`] reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        BindingResolver {
            bindings: Vec::new(),
            bound: IndexMap::new(),
            occupants: IndexMap::new(),
            rng,
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn add_binding(&mut self, binding: Binding) {
        log::debug!("Adding {:?}", binding);
        self.bindings.push(binding);
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub(crate) fn into_bindings(self) -> Vec<Binding> {
        self.bindings
    }

    /// Every resolved `(virtual node, physical node)` pair, in resolution order.
    pub fn bound(&self) -> impl Iterator<Item = (&str, &RegistryKey)> {
        self.bound.iter().map(|(vnode, key)| (vnode.as_str(), key))
    }

    pub fn is_bound(&self, node: &RegistryKey) -> bool {
        self.occupants.contains_key(node)
    }

    /// Virtual nodes hosted by `node`.
    pub fn occupants(&self, node: &RegistryKey) -> &[String] {
        self.occupants.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve `vnode` to a physical node, recording the result.
    ///
    /// A virtual node that is already bound keeps its node.
    pub fn resolve(&mut self, vnode: &str, registry: &mut Registry) -> Result<RegistryKey> {
        if let Some(key) = self.bound.get(vnode) {
            log::debug!("Virtual node '{}' already bound to {}", vnode, key);
            return Ok(key.clone());
        }

        let index = self.binding_index(vnode)?;
        let binding = &self.bindings[index];
        let key = match binding.action {
            Action::New => create_node(vnode, &binding.filter, registry)?,
            action => {
                let candidates = self.candidates(vnode, &binding.filter, action, registry)?;
                select(vnode, &binding.filter, action, &candidates, &mut self.rng)?
            }
        };

        log::info!(
            "Bound virtual node '{}' to {} (binding '{}', {})",
            vnode,
            key,
            binding.source(),
            binding.action
        );
        self.bound.insert(vnode.to_string(), key.clone());
        self.occupants.entry(key.clone()).or_default().push(vnode.to_string());
        Ok(key)
    }

    /// Side-effect-free lookup of where `vnode` is (or would be) bound.
    ///
    /// Returns the recorded node when bound. Otherwise the resolution is run
    /// without recording anything; [`Action::New`] yields `None` since no node
    /// exists yet.
    pub fn peek(&self, vnode: &str, registry: &Registry) -> Result<Option<RegistryKey>> {
        if let Some(key) = self.bound.get(vnode) {
            return Ok(Some(key.clone()));
        }
        let binding = &self.bindings[self.binding_index(vnode)?];
        if binding.action == Action::New {
            return Ok(None);
        }
        let candidates = self.candidates(vnode, &binding.filter, binding.action, registry)?;
        let mut rng = self.rng.clone();
        select(vnode, &binding.filter, binding.action, &candidates, &mut rng).map(Some)
    }

    /// Recorded node for `vnode`, failing if it was never resolved.
    pub fn bound_node(&self, vnode: &str) -> Result<&RegistryKey> {
        self.bound.get(vnode).ok_or_else(|| EmuError::NotBound {
            vnode: vnode.to_string(),
        })
    }

    fn binding_index(&self, vnode: &str) -> Result<usize> {
        self.bindings
            .iter()
            .position(|binding| binding.matches(vnode))
            .ok_or_else(|| EmuError::NoBinding {
                vnode: vnode.to_string(),
            })
    }

    /// Host nodes passing `filter`, in registry order. [`Action::First`]
    /// stops at the first hit.
    fn candidates(
        &self,
        vnode: &str,
        filter: &Filter,
        action: Action,
        registry: &Registry,
    ) -> Result<Vec<RegistryKey>> {
        let mut found = Vec::new();
        for key in registry.host_keys() {
            let node = registry.node(&key)?;
            if filter.matches(vnode, node, self.is_bound(&key)) {
                found.push(key);
                if action == Action::First {
                    break;
                }
            }
        }
        Ok(found)
    }
}

fn select(
    vnode: &str,
    filter: &Filter,
    action: Action,
    candidates: &[RegistryKey],
    rng: &mut StdRng,
) -> Result<RegistryKey> {
    let chosen = match action {
        Action::First => candidates.first(),
        Action::Last => candidates.last(),
        Action::Random => candidates.choose(rng),
        Action::New => None,
    };
    chosen.cloned().ok_or_else(|| EmuError::NoCandidate {
        vnode: vnode.to_string(),
        filter: filter.to_string(),
    })
}

/// Materialize a host for `vnode` in an AS and network consistent with the
/// filter. The new node must pass the filter it was created for.
fn create_node(vnode: &str, filter: &Filter, registry: &mut Registry) -> Result<RegistryKey> {
    let no_candidate = |reason: String| EmuError::NoCandidate {
        vnode: vnode.to_string(),
        filter: format!("{}; {}", filter, reason),
    };

    let local_networks: Vec<Network> = registry
        .get_all()
        .filter_map(|(key, object)| match object {
            RegistryObject::Network(net)
                if net.kind == NetworkKind::Local && filter.asn.map_or(true, |asn| key.scope == Scope::Asn(asn)) =>
            {
                Some(net.clone())
            }
            _ => None,
        })
        .collect();

    // Address constraints may point anywhere; otherwise stay in the first AS
    let networks: Vec<Network> = if filter.asn.is_some() || filter.ip.is_some() || filter.prefix.is_some() {
        local_networks
    } else {
        match local_networks.first().map(|net| net.scope) {
            Some(scope) => local_networks.into_iter().filter(|net| net.scope == scope).collect(),
            None => Vec::new(),
        }
    };
    if networks.is_empty() {
        return Err(no_candidate("no local network can hold a new node".to_string()));
    }

    let (network, address) = networks
        .iter()
        .find_map(|net| placement_address(net, filter).map(|address| (net, address)))
        .ok_or_else(|| match filter.ip {
            Some(ip) if networks.iter().any(|net| net.is_address_used(ip)) => {
                no_candidate(format!("address {} is already in use", ip))
            }
            _ => no_candidate("no local network has a free address matching the filter".to_string()),
        })?;

    let base_name = match &filter.node_name {
        Some(pattern) => match pattern.literal() {
            Some(literal) => literal,
            None if pattern.is_match(vnode) => vnode,
            None => {
                return Err(no_candidate(format!(
                    "cannot derive a node name matching '{}' for a new node",
                    pattern.as_str()
                )))
            }
        },
        None => vnode,
    }
    .to_string();
    let mut name = base_name.clone();
    let mut suffix = 1;
    while registry.contains(&RegistryKey::new(network.scope, ObjectKind::Host, name.as_str())) {
        name = format!("{}-{}", base_name, suffix);
        suffix += 1;
    }

    let mut node = Node::new(name.as_str(), network.scope, NodeRole::Host);
    node.set_label("seedemu.vnode", vnode);
    let key = node.key();
    let network_key = network.key();

    let mut placed = node.clone();
    placed.interfaces.push(Interface {
        network: network_key.clone(),
        address,
    });
    if !filter.matches(vnode, &placed, false) {
        return Err(no_candidate(format!(
            "a new host {} at {} would not pass the filter",
            key, address
        )));
    }

    registry.register_key(key.clone(), RegistryObject::Node(node))?;
    connect(registry, &key, &network_key, address)?;

    log::info!(
        "Created host {} at {} on {} for virtual node '{}'",
        key,
        address,
        network_key,
        vnode
    );
    Ok(key)
}

/// Free host address on `network` that satisfies the filter's `ip` and
/// `prefix`. Addresses from [`HOST_ADDRESS_START`] upward are preferred.
fn placement_address(network: &Network, filter: &Filter) -> Option<Ipv4Addr> {
    if let Some(ip) = filter.ip {
        let offset = network.prefix.offset_of(ip)?;
        let usable = network.prefix.host(offset) == Some(ip)
            && filter.prefix.map_or(true, |prefix| prefix.contains(ip))
            && !network.is_address_used(ip);
        return usable.then_some(ip);
    }

    let range = match filter.prefix {
        Some(prefix) if !prefix.overlaps(&network.prefix) => return None,
        Some(prefix) if prefix.prefix_len() > network.prefix.prefix_len() => prefix,
        _ => network.prefix,
    };
    let low = network.prefix.offset_of(range.network())?;
    let high = low + u32::try_from(range.size() - 1).ok()?;

    let preferred = (low..=high).filter(|n| *n >= HOST_ADDRESS_START);
    let below = (low..=high).take_while(|n| *n < HOST_ADDRESS_START);
    preferred
        .chain(below)
        .filter_map(|n| network.prefix.host(n))
        .find(|address| !network.is_address_used(*address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Prefix;

    /// AS150 with net0 and hosts web, web2, db; AS151 with net0 and host web.
    fn topology() -> Registry {
        let mut registry = Registry::new();
        for asn in [150u32, 151] {
            let prefix: Prefix = format!("10.{}.0.0/24", asn).parse().unwrap();
            let net = Network::local("net0", asn, prefix);
            let net_key = net.key();
            registry.register_key(net_key.clone(), RegistryObject::Network(net)).unwrap();

            let hosts: &[&str] = if asn == 150 { &["web", "web2", "db"] } else { &["web"] };
            for (i, name) in hosts.iter().enumerate() {
                let node = Node::new(*name, asn, NodeRole::Host);
                let key = node.key();
                registry.register_key(key.clone(), RegistryObject::Node(node)).unwrap();
                connect(&mut registry, &key, &net_key, prefix.host(71 + i as u32).unwrap()).unwrap();
            }
        }
        registry
    }

    fn resolver_with(pattern: &str, filter: Filter, action: Action) -> BindingResolver {
        let mut resolver = BindingResolver::new(Some(7));
        resolver.add_binding(Binding::new(pattern, filter, action).unwrap());
        resolver
    }

    #[test]
    fn test_first_and_last_follow_registry_order() {
        let mut registry = topology();
        for _ in 0..3 {
            let mut first = resolver_with(".*", Filter::new().asn(150), Action::First);
            let key = first.resolve("v", &mut registry).unwrap();
            assert_eq!(key, RegistryKey::new(150, ObjectKind::Host, "web"));

            let mut last = resolver_with(".*", Filter::new().asn(150), Action::Last);
            let key = last.resolve("v", &mut registry).unwrap();
            assert_eq!(key, RegistryKey::new(150, ObjectKind::Host, "db"));
        }
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut registry = topology();
        let mut resolver = resolver_with("web.*", Filter::new().asn(150), Action::First);

        let first = resolver.resolve("web150", &mut registry).unwrap();
        let second = resolver.resolve("web150", &mut registry).unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.occupants(&first), &["web150".to_string()]);

        // A different vnode skips the now-bound node
        let other = resolver.resolve("web150b", &mut registry).unwrap();
        assert_eq!(other, RegistryKey::new(150, ObjectKind::Host, "web2"));
    }

    #[test]
    fn test_allow_bound_reuses_node() {
        let mut registry = topology();
        let filter = Filter::new().asn(151).allow_bound(true);
        let mut resolver = resolver_with(".*", filter, Action::First);
        let a = resolver.resolve("a", &mut registry).unwrap();
        let b = resolver.resolve("b", &mut registry).unwrap();
        assert_eq!(a, b);
        assert_eq!(resolver.occupants(&a).len(), 2);
    }

    #[test]
    fn test_first_matching_binding_is_authoritative() {
        let mut registry = topology();
        let mut resolver = BindingResolver::new(Some(1));
        resolver.add_binding(Binding::new("web.*", Filter::new().asn(152), Action::First).unwrap());
        resolver.add_binding(Binding::new(".*", Filter::new().asn(150), Action::First).unwrap());

        let err = resolver.resolve("web150", &mut registry).unwrap_err();
        match err {
            EmuError::NoCandidate { vnode, filter } => {
                assert_eq!(vnode, "web150");
                assert_eq!(filter, "asn=152");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(resolver.resolve("db150", &mut registry).is_ok());
    }

    #[test]
    fn test_unmatched_vnode_fails() {
        let mut registry = topology();
        let mut resolver = resolver_with("web.*", Filter::new(), Action::First);
        let err = resolver.resolve("dns", &mut registry).unwrap_err();
        assert!(matches!(err, EmuError::NoBinding { .. }));
    }

    #[test]
    fn test_random_is_reproducible_with_seed() {
        let pick = |seed: u64| {
            let mut registry = topology();
            let mut resolver = BindingResolver::new(Some(seed));
            resolver.add_binding(Binding::new(".*", Filter::new(), Action::Random).unwrap());
            (0..4)
                .map(|i| resolver.resolve(&format!("v{i}"), &mut registry).unwrap())
                .collect::<Vec<_>>()
        };
        let run = pick(42);
        assert_eq!(run, pick(42));
        // Four vnodes over four hosts without reuse covers every host
        let mut names: Vec<_> = run.iter().map(|k| format!("{}/{}", k.scope, k.name)).collect();
        names.sort();
        assert_eq!(names, vec!["150/db", "150/web", "150/web2", "151/web"]);
    }

    #[test]
    fn test_new_without_constraints_creates_host() {
        let mut registry = topology();
        let before = registry.host_keys().len();
        let mut resolver = resolver_with("w.*", Filter::new(), Action::New);

        let key = resolver.resolve("web0", &mut registry).unwrap();
        assert_eq!(registry.host_keys().len(), before + 1);
        assert_eq!(key, RegistryKey::new(150, ObjectKind::Host, "web0"));

        let node = registry.node(&key).unwrap();
        assert_eq!(node.addresses().next(), Some(Ipv4Addr::new(10, 150, 0, 74)));
        assert_eq!(node.label("seedemu.vnode"), Some("web0"));
        let net = registry.network(&RegistryKey::new(150, ObjectKind::Network, "net0")).unwrap();
        assert_eq!(net.member_address(&key), Some(Ipv4Addr::new(10, 150, 0, 74)));
    }

    #[test]
    fn test_new_honours_asn_name_and_ip() {
        let mut registry = topology();
        let filter = Filter::new()
            .asn(151)
            .node_name("srv")
            .unwrap()
            .ip(Ipv4Addr::new(10, 151, 0, 99));
        let mut resolver = resolver_with(".*", filter.clone(), Action::New);

        let key = resolver.resolve("x", &mut registry).unwrap();
        assert_eq!(key, RegistryKey::new(151, ObjectKind::Host, "srv"));
        let node = registry.node(&key).unwrap();
        assert!(node.has_address(Ipv4Addr::new(10, 151, 0, 99)));
        assert!(filter.matches("x", node, false));
    }

    #[test]
    fn test_new_suffixes_a_taken_vnode_name() {
        let mut registry = topology();
        let mut resolver = resolver_with(".*", Filter::new().asn(151), Action::New);
        let key = resolver.resolve("web", &mut registry).unwrap();
        assert_eq!(key, RegistryKey::new(151, ObjectKind::Host, "web-1"));
    }

    #[test]
    fn test_new_rejects_a_taken_literal_name() {
        let mut registry = topology();
        let filter = Filter::new().asn(151).node_name("web").unwrap();
        let mut resolver = resolver_with(".*", filter, Action::New);
        assert!(matches!(
            resolver.resolve("x", &mut registry),
            Err(EmuError::NoCandidate { .. })
        ));
        assert!(!registry.contains(&RegistryKey::new(151, ObjectKind::Host, "web-1")));
    }

    #[test]
    fn test_new_follows_ip_into_another_as() {
        let mut registry = topology();
        let mut resolver = resolver_with(".*", Filter::new().ip(Ipv4Addr::new(10, 151, 0, 99)), Action::New);

        let key = resolver.resolve("x", &mut registry).unwrap();
        assert_eq!(key, RegistryKey::new(151, ObjectKind::Host, "x"));
        let net = registry.network(&RegistryKey::new(151, ObjectKind::Network, "net0")).unwrap();
        assert_eq!(net.member_address(&key), Some(Ipv4Addr::new(10, 151, 0, 99)));
    }

    #[test]
    fn test_new_follows_prefix_into_another_as() {
        let mut registry = topology();
        let prefix: Prefix = "10.151.0.0/16".parse().unwrap();
        let mut resolver = resolver_with(".*", Filter::new().prefix(prefix), Action::New);

        let key = resolver.resolve("x", &mut registry).unwrap();
        assert_eq!(key.scope, Scope::Asn(151));
        assert_eq!(registry.node(&key).unwrap().addresses().next(), Some(Ipv4Addr::new(10, 151, 0, 72)));
    }

    #[test]
    fn test_new_stays_inside_a_narrow_prefix() {
        let mut registry = topology();
        let filter = Filter::new().asn(150).prefix("10.150.0.128/25".parse().unwrap());
        let mut resolver = resolver_with(".*", filter.clone(), Action::New);

        let key = resolver.resolve("x", &mut registry).unwrap();
        let node = registry.node(&key).unwrap();
        assert_eq!(node.addresses().next(), Some(Ipv4Addr::new(10, 150, 0, 128)));
        assert!(filter.matches("x", node, false));

        // The new node is a candidate for the same filter afterwards
        let mut first = resolver_with(".*", filter.allow_bound(true), Action::First);
        assert_eq!(first.resolve("y", &mut registry).unwrap(), key);
    }

    #[test]
    fn test_new_rejects_prefix_and_ip_that_disagree() {
        let mut registry = topology();
        let filter = Filter::new()
            .ip(Ipv4Addr::new(10, 150, 0, 99))
            .prefix("10.150.0.128/25".parse().unwrap());
        let mut resolver = resolver_with(".*", filter, Action::New);
        assert!(matches!(
            resolver.resolve("x", &mut registry),
            Err(EmuError::NoCandidate { .. })
        ));
    }

    #[test]
    fn test_new_needs_a_name_matching_the_pattern() {
        let mut registry = topology();
        let before = registry.host_keys().len();
        let filter = Filter::new().asn(150).node_name("web.*").unwrap();
        let mut resolver = resolver_with(".*", filter.clone(), Action::New);

        let err = resolver.resolve("db1", &mut registry).unwrap_err();
        assert!(err.to_string().contains("web.*"));
        assert_eq!(registry.host_keys().len(), before);

        let key = resolver.resolve("web9", &mut registry).unwrap();
        assert!(filter.matches("web9", registry.node(&key).unwrap(), false));
    }

    #[test]
    fn test_new_checks_custom_predicate() {
        let mut registry = topology();
        let filter = Filter::new().asn(150).custom(|_, node| node.name.starts_with("web"));
        let mut resolver = resolver_with(".*", filter, Action::New);
        assert!(matches!(
            resolver.resolve("db1", &mut registry),
            Err(EmuError::NoCandidate { .. })
        ));
        assert!(!registry.contains(&RegistryKey::new(150, ObjectKind::Host, "db1")));
    }

    #[test]
    fn test_new_without_networks_fails() {
        let mut registry = topology();
        let mut resolver = resolver_with(".*", Filter::new().asn(999), Action::New);
        assert!(matches!(
            resolver.resolve("x", &mut registry),
            Err(EmuError::NoCandidate { .. })
        ));
    }

    #[test]
    fn test_peek_records_nothing() {
        let mut registry = topology();
        let mut resolver = resolver_with(".*", Filter::new().asn(150), Action::First);

        let peeked = resolver.peek("web150", &registry).unwrap();
        assert_eq!(peeked, Some(RegistryKey::new(150, ObjectKind::Host, "web")));
        assert!(resolver.bound().next().is_none());
        assert!(!resolver.is_bound(&RegistryKey::new(150, ObjectKind::Host, "web")));

        let resolved = resolver.resolve("web150", &mut registry).unwrap();
        assert_eq!(resolver.peek("web150", &registry).unwrap(), Some(resolved));
        assert!(matches!(resolver.bound_node("nope"), Err(EmuError::NotBound { .. })));
    }

    #[test]
    fn test_peek_new_is_none() {
        let registry = topology();
        let resolver = resolver_with(".*", Filter::new(), Action::New);
        assert_eq!(resolver.peek("x", &registry).unwrap(), None);
    }
}
