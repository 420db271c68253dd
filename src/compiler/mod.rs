//! Compiler backends turning a rendered registry into artifacts on disk.

use crate::error::Result;
use crate::model::{NodeFile, StartCommand};
use crate::registry::{Registry, RegistryObject};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// A backend consuming the frozen registry of a rendered emulator.
pub trait Compiler {
    fn name(&self) -> &str;

    /// Write artifacts into `output_dir`, returning the files written.
    fn compile(&self, registry: &Registry, output_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// Writes one `manifest.json` describing every node and network.
#[derive(Debug, Clone)]
pub struct ManifestCompiler {
    file_name: String,
}

impl Default for ManifestCompiler {
    fn default() -> Self {
        ManifestCompiler {
            file_name: "manifest.json".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ManifestInterface {
    network: String,
    address: String,
}

#[derive(Debug, Serialize)]
struct ManifestNode<'a> {
    key: String,
    scope: String,
    role: &'static str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    interfaces: Vec<ManifestInterface>,
    software: &'a BTreeSet<String>,
    files: &'a [NodeFile],
    start_commands: &'a [StartCommand],
    labels: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct ManifestMember {
    node: String,
    address: String,
}

#[derive(Debug, Serialize)]
struct ManifestNetwork {
    key: String,
    prefix: String,
    members: Vec<ManifestMember>,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    generated_at: String,
    nodes: Vec<ManifestNode<'a>>,
    networks: Vec<ManifestNetwork>,
}

impl ManifestCompiler {
    pub fn new(file_name: &str) -> Self {
        ManifestCompiler {
            file_name: file_name.to_string(),
        }
    }

    fn manifest<'a>(&self, registry: &'a Registry) -> Manifest<'a> {
        let mut nodes = Vec::new();
        let mut networks = Vec::new();
        for (key, object) in registry.get_all() {
            match object {
                RegistryObject::Node(node) => nodes.push(ManifestNode {
                    key: key.to_string(),
                    scope: key.scope.to_string(),
                    role: key.kind.as_str(),
                    name: &node.name,
                    display_name: node.display_name.as_deref(),
                    interfaces: node
                        .interfaces
                        .iter()
                        .map(|iface| ManifestInterface {
                            network: iface.network.to_string(),
                            address: iface.address.to_string(),
                        })
                        .collect(),
                    software: node.software(),
                    files: node.files(),
                    start_commands: node.start_commands(),
                    labels: node.labels(),
                }),
                RegistryObject::Network(network) => networks.push(ManifestNetwork {
                    key: key.to_string(),
                    prefix: network.prefix.to_string(),
                    members: network
                        .members()
                        .iter()
                        .map(|m| ManifestMember {
                            node: m.node.to_string(),
                            address: m.address.to_string(),
                        })
                        .collect(),
                }),
                RegistryObject::Layer(_) => {}
            }
        }
        Manifest {
            generated_at: chrono::Utc::now().to_rfc3339(),
            nodes,
            networks,
        }
    }
}

impl Compiler for ManifestCompiler {
    fn name(&self) -> &str {
        "manifest"
    }

    fn compile(&self, registry: &Registry, output_dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(output_dir)?;
        let manifest = self.manifest(registry);
        let path = output_dir.join(&self.file_name);
        fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
        log::info!(
            "Wrote manifest with {} nodes and {} networks to {}",
            manifest.nodes.len(),
            manifest.networks.len(),
            path.display()
        );
        Ok(vec![path])
    }
}
