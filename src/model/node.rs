//! Physical nodes: hosts, routers, route servers and cross-connect nodes.

use super::address::Prefix;
use crate::registry::{ObjectKind, RegistryKey, Scope};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

/// What a node is. Fixed at construction; routing capability is a property
/// of the role rather than something a node turns into later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    Host,
    Router,
    RouteServer,
    CrossConnect,
}

impl NodeRole {
    pub fn kind(&self) -> ObjectKind {
        match self {
            NodeRole::Host => ObjectKind::Host,
            NodeRole::Router => ObjectKind::Router,
            NodeRole::RouteServer => ObjectKind::RouteServer,
            NodeRole::CrossConnect => ObjectKind::CrossConnect,
        }
    }

    /// True for roles that forward packets between networks.
    pub fn is_routing(&self) -> bool {
        !matches!(self, NodeRole::Host)
    }
}

/// A node's attachment to one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Key of the owning network
    pub network: RegistryKey,
    pub address: Ipv4Addr,
}

/// File materialized inside the node's container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFile {
    pub path: String,
    pub content: String,
}

/// Command executed when the node's container boots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCommand {
    pub command: String,
    /// Run in the background instead of blocking later commands
    pub fork: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub scope: Scope,
    pub role: NodeRole,
    pub interfaces: Vec<Interface>,
    files: Vec<NodeFile>,
    start_commands: Vec<StartCommand>,
    software: BTreeSet<String>,
    labels: BTreeMap<String, String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

impl Node {
    pub fn new(name: impl Into<String>, scope: impl Into<Scope>, role: NodeRole) -> Self {
        Node {
            name: name.into(),
            scope: scope.into(),
            role,
            interfaces: Vec::new(),
            files: Vec::new(),
            start_commands: Vec::new(),
            software: BTreeSet::new(),
            labels: BTreeMap::new(),
            display_name: None,
            description: None,
        }
    }

    pub fn key(&self) -> RegistryKey {
        RegistryKey::new(self.scope, self.role.kind(), self.name.clone())
    }

    pub fn asn(&self) -> Option<u32> {
        self.scope.asn()
    }

    pub fn addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.interfaces.iter().map(|iface| iface.address)
    }

    pub fn has_address(&self, ip: Ipv4Addr) -> bool {
        self.addresses().any(|addr| addr == ip)
    }

    /// True if any interface address falls inside `prefix`.
    pub fn in_prefix(&self, prefix: &Prefix) -> bool {
        self.addresses().any(|addr| prefix.contains(addr))
    }

    pub fn interface_on(&self, network: &RegistryKey) -> Option<&Interface> {
        self.interfaces.iter().find(|iface| &iface.network == network)
    }

    /// Add or replace a file; a replaced file keeps its position.
    pub fn set_file(&mut self, path: impl Into<String>, content: impl Into<String>) -> &mut Self {
        let path = path.into();
        let content = content.into();
        match self.files.iter_mut().find(|f| f.path == path) {
            Some(existing) => existing.content = content,
            None => self.files.push(NodeFile { path, content }),
        }
        self
    }

    pub fn file(&self, path: &str) -> Option<&NodeFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn files(&self) -> &[NodeFile] {
        &self.files
    }

    pub fn add_start_command(&mut self, command: impl Into<String>, fork: bool) -> &mut Self {
        self.start_commands.push(StartCommand {
            command: command.into(),
            fork,
        });
        self
    }

    pub fn start_commands(&self) -> &[StartCommand] {
        &self.start_commands
    }

    pub fn add_software(&mut self, package: impl Into<String>) -> &mut Self {
        self.software.insert(package.into());
        self
    }

    pub fn software(&self) -> &BTreeSet<String> {
        &self.software
    }

    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_keep_order_on_replace() {
        let mut node = Node::new("web", 150, NodeRole::Host);
        node.set_file("/a", "1").set_file("/b", "2").set_file("/a", "3");
        let paths: Vec<_> = node.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/b"]);
        assert_eq!(node.file("/a").unwrap().content, "3");
    }

    #[test]
    fn test_key_follows_role() {
        let host = Node::new("web", 150, NodeRole::Host);
        assert_eq!(host.key(), RegistryKey::new(150, ObjectKind::Host, "web"));

        let rs = Node::new("ix100", Scope::Ix, NodeRole::RouteServer);
        assert_eq!(rs.key().to_string(), "(ix, rs, ix100)");
        assert_eq!(rs.asn(), None);
    }

    #[test]
    fn test_prefix_membership() {
        let mut node = Node::new("web", 150, NodeRole::Host);
        node.interfaces.push(Interface {
            network: RegistryKey::new(150, ObjectKind::Network, "net0"),
            address: Ipv4Addr::new(10, 150, 0, 71),
        });
        assert!(node.in_prefix(&"10.150.0.0/24".parse().unwrap()));
        assert!(!node.in_prefix(&"10.151.0.0/24".parse().unwrap()));
        assert!(node.has_address(Ipv4Addr::new(10, 150, 0, 71)));
    }
}
