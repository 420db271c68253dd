//! # Services
//!
//! A service layer installs one kind of server software onto virtual nodes.
//! Servers are declared against virtual-node names; the physical node is
//! only chosen when the layer is configured, through the binding resolver.
//!
//! ```rust
//! use seedemu::service::{Service, WebServer};
//!
//! let mut web = Service::<WebServer>::new();
//! web.install("web150").set_port(8080);
//! assert_eq!(web.vnodes().collect::<Vec<_>>(), vec!["web150"]);
//! ```

pub mod web;

pub use web::WebServer;

use crate::base::BASE_LAYER;
use crate::error::{EmuError, Result};
use crate::layer::{BuildContext, Dependency, Layer};
use crate::merge::{downcast_layer, Merger};
use crate::model::Node;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

/// Server software installable on a node.
pub trait Server: fmt::Debug + Clone + Default + Serialize + DeserializeOwned + 'static {
    /// Layer name and type name of the owning [`Service`].
    const SERVICE_NAME: &'static str;

    /// Write files, packages and start commands onto the bound node.
    fn install(&self, node: &mut Node, vnode: &str);
}

/// Layer holding one server per virtual node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "S: Server")]
pub struct Service<S: Server> {
    servers: IndexMap<String, S>,
}

impl<S: Server> Default for Service<S> {
    fn default() -> Self {
        Service {
            servers: IndexMap::new(),
        }
    }
}

impl<S: Server> Service<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a server on `vnode`, returning the existing one if already
    /// declared.
    pub fn install(&mut self, vnode: &str) -> &mut S {
        self.servers.entry(vnode.to_string()).or_default()
    }

    pub fn server(&self, vnode: &str) -> Option<&S> {
        self.servers.get(vnode)
    }

    pub fn vnodes(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    pub fn load(state: serde_json::Value) -> Result<Box<dyn Layer>> {
        let service: Service<S> = serde_json::from_value(state)?;
        Ok(Box::new(service))
    }
}

impl<S: Server> Layer for Service<S> {
    fn name(&self) -> &str {
        S::SERVICE_NAME
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::hard(BASE_LAYER)]
    }

    fn configure(&mut self, ctx: &mut BuildContext) -> Result<()> {
        for vnode in self.servers.keys() {
            let node = ctx.resolve_vnode(vnode)?;
            log::debug!("{}: '{}' will be installed on {}", S::SERVICE_NAME, vnode, node);
        }
        Ok(())
    }

    fn render(&mut self, ctx: &mut BuildContext) -> Result<()> {
        for (vnode, server) in &self.servers {
            let key = ctx.resolve_vnode(vnode)?;
            let node = ctx.node_mut(&key)?;
            server.install(node, vnode);
        }
        Ok(())
    }

    fn describe(&self, indent: usize) -> String {
        let mut out = format!("{:indent$}{}:\n", "", S::SERVICE_NAME, indent = indent);
        for (vnode, server) in &self.servers {
            out.push_str(&format!("{:indent$}{}: {:?}\n", "", vnode, server, indent = indent + 2));
        }
        out
    }

    fn prefix_virtual_nodes(&mut self, prefix: &str) {
        self.servers = std::mem::take(&mut self.servers)
            .into_iter()
            .map(|(vnode, server)| (format!("{}{}", prefix, vnode), server))
            .collect();
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

/// Unions the servers of two [`Service`] layers; a virtual node declared on
/// both sides is a collision.
#[derive(Debug)]
pub struct ServiceMerger<S>(PhantomData<S>);

impl<S> Default for ServiceMerger<S> {
    fn default() -> Self {
        ServiceMerger(PhantomData)
    }
}

impl<S: Server> ServiceMerger<S> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: Server> Merger for ServiceMerger<S> {
    fn target_type(&self) -> &str {
        S::SERVICE_NAME
    }

    fn merge(&self, ours: Box<dyn Layer>, theirs: Box<dyn Layer>) -> Result<Box<dyn Layer>> {
        let mut merged: Service<S> = downcast_layer(ours)?;
        let theirs: Service<S> = downcast_layer(theirs)?;
        for (vnode, server) in theirs.servers {
            if merged.servers.contains_key(&vnode) {
                return Err(EmuError::MergeCollision {
                    what: format!("{} server on virtual node '{}'", S::SERVICE_NAME, vnode),
                    ours: "first emulator".to_string(),
                    theirs: "second emulator".to_string(),
                });
            }
            merged.servers.insert(vnode, server);
        }
        Ok(Box::new(merged))
    }
}
