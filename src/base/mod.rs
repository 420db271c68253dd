//! # Base Layer
//!
//! The Base layer holds the physical topology: autonomous systems with their
//! networks, routers and hosts, and internet exchanges. Its configure step
//! registers every definition as a registry object and assigns addresses;
//! its render step gives routers forwarding and hosts a default route.
//!
//! ## Addressing
//!
//! | Attachment | Default address |
//! |---|---|
//! | host on a local network | first free from `.71` upward |
//! | router on a local network | first free from the top of the prefix down |
//! | router on exchange `ixN` | the member's ASN as host offset |
//! | route server of `ixN` | top of the peering LAN |
//!
//! ```rust
//! use seedemu::base::Base;
//!
//! let mut base = Base::new();
//! base.create_internet_exchange(100)?;
//! let as150 = base.create_autonomous_system(150)?;
//! as150.create_network("net0")?;
//! as150.create_router("router0")?.join_network("net0").join_network("ix100");
//! as150.create_host("web")?.join_network("net0");
//! # Ok::<(), seedemu::EmuError>(())
//! ```

pub mod autonomous_system;
pub mod exchange;
pub mod merger;

pub use autonomous_system::{AutonomousSystem, Link, NetworkSpec, NodeSpec};
pub use exchange::InternetExchange;
pub use merger::BaseMerger;

use crate::error::{EmuError, Result};
use crate::layer::{BuildContext, Layer};
use crate::model::{connect, Network, NetworkKind, Node, NodeRole, Prefix, HOST_ADDRESS_START};
use crate::registry::{ObjectKind, Registry, RegistryKey, RegistryObject, Scope};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

pub const BASE_LAYER: &str = "Base";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Base {
    autonomous_systems: BTreeMap<u32, AutonomousSystem>,
    exchanges: BTreeMap<u32, InternetExchange>,
}

impl Base {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_autonomous_system(&mut self, asn: u32) -> Result<&mut AutonomousSystem> {
        if self.autonomous_systems.contains_key(&asn) {
            return Err(EmuError::Topology(format!("AS{} already exists", asn)));
        }
        Ok(self
            .autonomous_systems
            .entry(asn)
            .or_insert_with(|| AutonomousSystem::new(asn)))
    }

    pub fn create_internet_exchange(&mut self, id: u32) -> Result<&mut InternetExchange> {
        let ix = InternetExchange::new(id)?;
        self.add_internet_exchange(ix)
    }

    pub fn create_internet_exchange_with_prefix(&mut self, id: u32, prefix: Prefix) -> Result<&mut InternetExchange> {
        self.add_internet_exchange(InternetExchange::with_prefix(id, prefix))
    }

    fn add_internet_exchange(&mut self, ix: InternetExchange) -> Result<&mut InternetExchange> {
        if self.exchanges.contains_key(&ix.id) {
            return Err(EmuError::Topology(format!("IX{} already exists", ix.id)));
        }
        Ok(self.exchanges.entry(ix.id).or_insert(ix))
    }

    pub fn autonomous_system(&self, asn: u32) -> Option<&AutonomousSystem> {
        self.autonomous_systems.get(&asn)
    }

    pub fn autonomous_system_mut(&mut self, asn: u32) -> Option<&mut AutonomousSystem> {
        self.autonomous_systems.get_mut(&asn)
    }

    pub fn asns(&self) -> impl Iterator<Item = u32> + '_ {
        self.autonomous_systems.keys().copied()
    }

    pub fn internet_exchange(&self, id: u32) -> Option<&InternetExchange> {
        self.exchanges.get(&id)
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<u32, AutonomousSystem>, BTreeMap<u32, InternetExchange>) {
        (self.autonomous_systems, self.exchanges)
    }

    pub(crate) fn from_parts(
        autonomous_systems: BTreeMap<u32, AutonomousSystem>,
        exchanges: BTreeMap<u32, InternetExchange>,
    ) -> Self {
        Base {
            autonomous_systems,
            exchanges,
        }
    }

    pub fn load(state: serde_json::Value) -> Result<Box<dyn Layer>> {
        let base: Base = serde_json::from_value(state)?;
        Ok(Box::new(base))
    }

    fn register_exchanges(&self, registry: &mut Registry) -> Result<()> {
        for ix in self.exchanges.values() {
            let net = Network::exchange(ix.id, ix.prefix);
            let net_key = net.key();
            registry.register_key(net_key.clone(), RegistryObject::Network(net))?;

            if ix.route_server {
                let rs = Node::new(ix.name(), Scope::Ix, NodeRole::RouteServer);
                let rs_key = rs.key();
                registry.register_key(rs_key.clone(), RegistryObject::Node(rs))?;
                let address = registry
                    .network(&net_key)?
                    .next_free_from_top()
                    .ok_or_else(|| EmuError::Topology(format!("{} has no room for a route server", net_key)))?;
                connect(registry, &rs_key, &net_key, address)?;
            }
        }
        Ok(())
    }

    fn register_autonomous_system(&self, asys: &AutonomousSystem, registry: &mut Registry) -> Result<()> {
        for spec in asys.networks() {
            let net = Network::local(spec.name.as_str(), asys.asn, spec.prefix);
            registry.register_key(net.key(), RegistryObject::Network(net))?;
        }

        for spec in asys.routers().chain(asys.hosts()) {
            let mut node = Node::new(spec.name.as_str(), asys.asn, spec.role);
            node.display_name = spec.display_name.clone();
            node.description = spec.description.clone();
            for (key, value) in &spec.labels {
                node.set_label(key.as_str(), value.as_str());
            }
            registry.register_key(node.key(), RegistryObject::Node(node))?;
        }

        // Links with fixed addresses first so automatic picks avoid them
        let mut links: Vec<(RegistryKey, NodeRole, &Link)> = asys
            .routers()
            .chain(asys.hosts())
            .flat_map(|spec| {
                let key = RegistryKey::new(asys.asn, spec.role.kind(), spec.name.as_str());
                spec.links.iter().map(move |link| (key.clone(), spec.role, link))
            })
            .collect();
        links.sort_by_key(|(_, _, link)| link.address.is_none());

        for (node_key, role, link) in links {
            let net_key = self.network_key(asys, &link.network, &node_key)?;
            if net_key.scope == Scope::Ix && role == NodeRole::Host {
                return Err(EmuError::Topology(format!(
                    "{}: hosts cannot join exchange network '{}'",
                    node_key, link.network
                )));
            }
            let address = match link.address {
                Some(address) => address,
                None => automatic_address(registry.network(&net_key)?, role, asys.asn)
                    .ok_or_else(|| EmuError::Topology(format!("{} has no free address for {}", net_key, node_key)))?,
            };
            connect(registry, &node_key, &net_key, address)?;
        }
        Ok(())
    }

    fn network_key(&self, asys: &AutonomousSystem, name: &str, node: &RegistryKey) -> Result<RegistryKey> {
        if asys.network(name).is_some() {
            return Ok(RegistryKey::new(asys.asn, ObjectKind::Network, name));
        }
        if self.exchanges.values().any(|ix| ix.name() == name) {
            return Ok(RegistryKey::new(Scope::Ix, ObjectKind::Network, name));
        }
        Err(EmuError::Topology(format!("{} joins unknown network '{}'", node, name)))
    }
}

fn automatic_address(network: &Network, role: NodeRole, asn: u32) -> Option<Ipv4Addr> {
    match (network.kind, role.is_routing()) {
        (NetworkKind::Exchange, _) => network
            .prefix
            .host(asn)
            .filter(|addr| !network.is_address_used(*addr))
            .or_else(|| network.next_free_from_top()),
        (NetworkKind::Local, true) => network.next_free_from_top(),
        (NetworkKind::Local, false) => network
            .next_free_from(HOST_ADDRESS_START)
            .or_else(|| network.next_free_from(1)),
    }
}

/// Address of the first router attached to the host's first network.
fn default_gateway(registry: &Registry, host: &Node) -> Option<Ipv4Addr> {
    let iface = host.interfaces.first()?;
    let network = registry.network(&iface.network).ok()?;
    network
        .members()
        .iter()
        .find(|member| member.node.kind == ObjectKind::Router)
        .map(|member| member.address)
}

impl Layer for Base {
    fn name(&self) -> &str {
        BASE_LAYER
    }

    fn configure(&mut self, ctx: &mut BuildContext) -> Result<()> {
        let registry = ctx.registry_mut()?;
        self.register_exchanges(registry)?;
        for asys in self.autonomous_systems.values() {
            self.register_autonomous_system(asys, registry)?;
        }
        log::info!(
            "Base: registered {} autonomous systems and {} exchanges",
            self.autonomous_systems.len(),
            self.exchanges.len()
        );
        Ok(())
    }

    fn render(&mut self, ctx: &mut BuildContext) -> Result<()> {
        let mut forwarding = Vec::new();
        let mut routes = Vec::new();
        let mut route_servers = Vec::new();
        for (key, object) in ctx.registry().get_all() {
            let RegistryObject::Node(node) = object else {
                continue;
            };
            match node.role {
                NodeRole::Router | NodeRole::CrossConnect => forwarding.push(key.clone()),
                NodeRole::RouteServer => route_servers.push(key.clone()),
                NodeRole::Host => match default_gateway(ctx.registry(), node) {
                    Some(gateway) => routes.push((key.clone(), gateway)),
                    None => log::warn!("{} has no router on its network; no default route set", key),
                },
            }
        }

        for key in forwarding {
            ctx.node_mut(&key)?
                .add_start_command("sysctl -w net.ipv4.ip_forward=1", false);
        }
        for key in route_servers {
            ctx.node_mut(&key)?.add_software("bird2");
        }
        for (key, gateway) in routes {
            ctx.node_mut(&key)?
                .add_start_command(format!("ip route replace default via {}", gateway), false);
        }
        Ok(())
    }

    fn describe(&self, indent: usize) -> String {
        let mut out = format!("{:indent$}Base:\n", "", indent = indent);
        for ix in self.exchanges.values() {
            out.push_str(&format!("{:indent$}IX{} ({})\n", "", ix.id, ix.prefix, indent = indent + 2));
        }
        for asys in self.autonomous_systems.values() {
            out.push_str(&asys.describe(indent + 2));
        }
        out
    }

    fn save(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
