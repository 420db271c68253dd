//! Autonomous system definitions.
//!
//! An AS owns local networks, routers and hosts. Definitions are plain data
//! until the Base layer's configure step registers them as registry objects.

use crate::error::{EmuError, Result};
use crate::model::{NodeRole, Prefix};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Declared attachment of a node to a network, by network name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub network: String,
    /// Fixed address; assigned automatically when absent
    pub address: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    pub prefix: Prefix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub role: NodeRole,
    pub links: Vec<Link>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl NodeSpec {
    fn new(name: &str, role: NodeRole) -> Self {
        NodeSpec {
            name: name.to_string(),
            role,
            links: Vec::new(),
            display_name: None,
            description: None,
            labels: BTreeMap::new(),
        }
    }

    /// Attach to `network` (a local network name or `ixN`).
    pub fn join_network(&mut self, network: &str) -> &mut Self {
        self.links.push(Link {
            network: network.to_string(),
            address: None,
        });
        self
    }

    pub fn join_network_at(&mut self, network: &str, address: Ipv4Addr) -> &mut Self {
        self.links.push(Link {
            network: network.to_string(),
            address: Some(address),
        });
        self
    }

    pub fn set_display_name(&mut self, name: &str) -> &mut Self {
        self.display_name = Some(name.to_string());
        self
    }

    pub fn set_description(&mut self, description: &str) -> &mut Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn set_label(&mut self, key: &str, value: &str) -> &mut Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomousSystem {
    pub asn: u32,
    networks: IndexMap<String, NetworkSpec>,
    routers: IndexMap<String, NodeSpec>,
    hosts: IndexMap<String, NodeSpec>,
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(EmuError::Topology(format!("invalid object name '{}'", name)))
    }
}

impl AutonomousSystem {
    pub fn new(asn: u32) -> Self {
        AutonomousSystem {
            asn,
            networks: IndexMap::new(),
            routers: IndexMap::new(),
            hosts: IndexMap::new(),
        }
    }

    /// Create a local network with an automatic `10.{asn}.{n}.0/24` prefix.
    pub fn create_network(&mut self, name: &str) -> Result<&mut NetworkSpec> {
        let n = self.networks.len();
        let prefix = match (u8::try_from(self.asn), u8::try_from(n)) {
            (Ok(asn), Ok(n)) => Prefix::new(Ipv4Addr::new(10, asn, n, 0), 24)?,
            _ => {
                return Err(EmuError::Topology(format!(
                    "AS{}: cannot pick a prefix for network '{}' automatically; specify one",
                    self.asn, name
                )))
            }
        };
        self.create_network_with_prefix(name, prefix)
    }

    pub fn create_network_with_prefix(&mut self, name: &str, prefix: Prefix) -> Result<&mut NetworkSpec> {
        validate_name(name)?;
        if self.networks.contains_key(name) {
            return Err(EmuError::Topology(format!("AS{}: network '{}' already exists", self.asn, name)));
        }
        if let Some(clash) = self.networks.values().find(|n| n.prefix.overlaps(&prefix)) {
            return Err(EmuError::Topology(format!(
                "AS{}: prefix {} of '{}' overlaps network '{}' ({})",
                self.asn, prefix, name, clash.name, clash.prefix
            )));
        }
        let spec = NetworkSpec {
            name: name.to_string(),
            prefix,
        };
        Ok(self.networks.entry(name.to_string()).or_insert(spec))
    }

    pub fn create_router(&mut self, name: &str) -> Result<&mut NodeSpec> {
        validate_name(name)?;
        if self.routers.contains_key(name) {
            return Err(EmuError::Topology(format!("AS{}: router '{}' already exists", self.asn, name)));
        }
        Ok(self
            .routers
            .entry(name.to_string())
            .or_insert_with(|| NodeSpec::new(name, NodeRole::Router)))
    }

    pub fn create_host(&mut self, name: &str) -> Result<&mut NodeSpec> {
        validate_name(name)?;
        if self.hosts.contains_key(name) {
            return Err(EmuError::Topology(format!("AS{}: host '{}' already exists", self.asn, name)));
        }
        Ok(self
            .hosts
            .entry(name.to_string())
            .or_insert_with(|| NodeSpec::new(name, NodeRole::Host)))
    }

    pub fn network(&self, name: &str) -> Option<&NetworkSpec> {
        self.networks.get(name)
    }

    pub fn router_mut(&mut self, name: &str) -> Option<&mut NodeSpec> {
        self.routers.get_mut(name)
    }

    pub fn host_mut(&mut self, name: &str) -> Option<&mut NodeSpec> {
        self.hosts.get_mut(name)
    }

    pub fn networks(&self) -> impl Iterator<Item = &NetworkSpec> {
        self.networks.values()
    }

    pub fn routers(&self) -> impl Iterator<Item = &NodeSpec> {
        self.routers.values()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &NodeSpec> {
        self.hosts.values()
    }

    /// Union with another definition of the same AS. Any name defined on
    /// both sides is a collision.
    pub fn merge(mut self, other: AutonomousSystem) -> Result<Self> {
        for (name, net) in other.networks {
            if let Some(ours) = self.networks.get(&name) {
                return Err(EmuError::MergeCollision {
                    what: format!("network '{}' of AS{}", name, self.asn),
                    ours: ours.prefix.to_string(),
                    theirs: net.prefix.to_string(),
                });
            }
            self.create_network_with_prefix(&name, net.prefix)?;
        }
        for (kind, ours, theirs) in [
            ("router", &mut self.routers, other.routers),
            ("host", &mut self.hosts, other.hosts),
        ] {
            for (name, spec) in theirs {
                if ours.contains_key(&name) {
                    return Err(EmuError::MergeCollision {
                        what: format!("{} '{}' of AS{}", kind, name, self.asn),
                        ours: "first emulator".to_string(),
                        theirs: "second emulator".to_string(),
                    });
                }
                ours.insert(name, spec);
            }
        }
        Ok(self)
    }

    pub(crate) fn describe(&self, indent: usize) -> String {
        let pad = " ".repeat(indent);
        let mut out = format!("{}AS{}:\n", pad, self.asn);
        for net in self.networks.values() {
            out.push_str(&format!("{}  network {} ({})\n", pad, net.name, net.prefix));
        }
        for node in self.routers.values().chain(self.hosts.values()) {
            let role = if node.role == NodeRole::Router { "router" } else { "host" };
            let links: Vec<&str> = node.links.iter().map(|l| l.network.as_str()).collect();
            out.push_str(&format!("{}  {} {} -> [{}]\n", pad, role, node.name, links.join(", ")));
        }
        out
    }
}
