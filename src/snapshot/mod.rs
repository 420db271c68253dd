//! # Emulator Snapshots
//!
//! A snapshot is the persisted state of one unrendered emulator: its
//! non-layer registry objects, every layer's saved state and the binding
//! list. A later run loads it as a reusable base, typically to merge it
//! with another topology.
//!
//! ## Encodings
//!
//! - **JSON**: pretty-printed, for inspection and diffs.
//! - **Binary**: a magic header and version byte followed by
//!   zstd-compressed bincode, for large topologies.
//!
//! Reading detects the encoding from the header, so callers never need to
//! know which one a file uses.
//!
//! ## Layer Catalog
//!
//! Layers are trait objects, so loading needs a [`LayerCatalog`] mapping
//! each layer type name to a constructor that rebuilds it from its state.

use crate::base::{Base, BASE_LAYER};
use crate::binding::{Binding, BindingSpec};
use crate::emulator::{Emulator, EmulatorParts};
use crate::error::{EmuError, Result};
use crate::layer::Layer;
use crate::registry::{ObjectKind, RegistryEntry};
use crate::service::{Server, Service, WebServer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

const BINARY_MAGIC: &[u8; 7] = b"SEEDEMU";
const BINARY_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    #[default]
    Json,
    Binary,
}

impl SnapshotFormat {
    /// Format implied by a file extension: `.bin`/`.zst` are binary,
    /// anything else JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("bin") | Some("zst") => SnapshotFormat::Binary,
            _ => SnapshotFormat::Json,
        }
    }
}

/// Saved state of one layer. The state is kept as JSON text so the binary
/// encoding can carry it too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerState {
    pub type_name: String,
    pub name: String,
    pub state_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorSnapshot {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub seed: Option<u64>,
    pub registry: Vec<RegistryEntry>,
    pub layers: Vec<LayerState>,
    pub bindings: Vec<BindingSpec>,
}

impl EmulatorSnapshot {
    /// Capture an unrendered emulator.
    pub fn capture(emulator: &Emulator) -> Result<Self> {
        if emulator.is_rendered() {
            return Err(EmuError::AlreadyRendered);
        }

        let registry = emulator
            .registry()
            .get_all()
            .filter(|(key, _)| key.kind != ObjectKind::Layer)
            .map(|(key, object)| RegistryEntry {
                key: key.clone(),
                object: object.clone(),
            })
            .collect();

        let layers = emulator
            .layers()
            .map(|layer| {
                Ok(LayerState {
                    type_name: layer.type_name().to_string(),
                    name: layer.name().to_string(),
                    state_json: serde_json::to_string(&layer.save()?)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let bindings = emulator
            .bindings()
            .iter()
            .inspect(|binding| {
                if binding.filter.custom.is_some() {
                    log::warn!(
                        "Binding '{}' has a custom predicate, which is not saved in snapshots",
                        binding.source()
                    );
                }
            })
            .map(Binding::to_spec)
            .collect();

        Ok(EmulatorSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            created_at: Utc::now(),
            seed: emulator.seed(),
            registry,
            layers,
            bindings,
        })
    }

    /// Rebuild an emulator, constructing layers through `catalog`.
    pub fn restore(self, catalog: &LayerCatalog) -> Result<Emulator> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(EmuError::Snapshot(format!(
                "unsupported format version {} (expected {})",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        let layers = self
            .layers
            .iter()
            .map(|state| catalog.load(state))
            .collect::<Result<Vec<_>>>()?;
        let bindings = self
            .bindings
            .into_iter()
            .map(Binding::try_from)
            .collect::<Result<Vec<_>>>()?;

        Emulator::from_parts(EmulatorParts {
            seed: self.seed,
            layers,
            objects: self.registry,
            bindings,
        })
    }

    pub fn to_bytes(&self, format: SnapshotFormat, compression_level: i32) -> Result<Vec<u8>> {
        match format {
            SnapshotFormat::Json => Ok(serde_json::to_vec_pretty(self)?),
            SnapshotFormat::Binary => {
                let payload = bincode::serialize(self)?;
                let mut out = Vec::with_capacity(payload.len() / 2 + BINARY_MAGIC.len() + 1);
                out.extend_from_slice(BINARY_MAGIC);
                out.push(BINARY_VERSION);
                out.extend(zstd::encode_all(payload.as_slice(), compression_level)?);
                Ok(out)
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Some(rest) = bytes.strip_prefix(BINARY_MAGIC.as_slice()) else {
            return Ok(serde_json::from_slice(bytes)?);
        };
        let (&version, compressed) = rest
            .split_first()
            .ok_or_else(|| EmuError::Snapshot("truncated binary header".to_string()))?;
        if version != BINARY_VERSION {
            return Err(EmuError::Snapshot(format!("unsupported binary version {}", version)));
        }
        let payload = zstd::decode_all(compressed)?;
        Ok(bincode::deserialize(&payload)?)
    }

    pub fn write(&self, path: &Path, format: SnapshotFormat, compression_level: i32) -> Result<()> {
        let bytes = self.to_bytes(format, compression_level)?;
        fs::write(path, &bytes)?;
        log::info!(
            "Wrote {:?} snapshot with {} layers to {} ({} bytes)",
            format,
            self.layers.len(),
            path.display(),
            bytes.len()
        );
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let snapshot = Self::from_bytes(&bytes)?;
        log::info!(
            "Read snapshot from {} created at {}",
            path.display(),
            snapshot.created_at.to_rfc3339()
        );
        Ok(snapshot)
    }
}

pub type LayerLoader = fn(serde_json::Value) -> Result<Box<dyn Layer>>;

/// Maps layer type names to the constructors used when loading.
#[derive(Debug, Clone, Default)]
pub struct LayerCatalog {
    loaders: BTreeMap<String, LayerLoader>,
}

impl LayerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of the layers shipped with this crate.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        catalog.register(BASE_LAYER, Base::load);
        catalog.register(WebServer::SERVICE_NAME, Service::<WebServer>::load);
        catalog
    }

    pub fn register(&mut self, type_name: &str, loader: LayerLoader) -> &mut Self {
        self.loaders.insert(type_name.to_string(), loader);
        self
    }

    pub fn load(&self, state: &LayerState) -> Result<Box<dyn Layer>> {
        let loader = self
            .loaders
            .get(&state.type_name)
            .ok_or_else(|| EmuError::UnknownLayerType(state.type_name.clone()))?;
        let layer = loader(serde_json::from_str(&state.state_json)?)?;
        if layer.name() != state.name {
            return Err(EmuError::Snapshot(format!(
                "layer '{}' of type '{}' loaded with name '{}'",
                state.name,
                state.type_name,
                layer.name()
            )));
        }
        Ok(layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Action, Filter};
    use tempfile::TempDir;

    fn sample() -> Emulator {
        let mut base = Base::new();
        let asys = base.create_autonomous_system(150).unwrap();
        asys.create_network("net0").unwrap();
        asys.create_host("web").unwrap().join_network("net0");
        let mut web = Service::<WebServer>::new();
        web.install("web150").set_port(8080);

        let mut emu = Emulator::with_seed(Some(3));
        emu.add_layer(base).unwrap();
        emu.add_layer(web).unwrap();
        emu.add_binding(
            Binding::new("web150", Filter::new().asn(150).node_name("web").unwrap(), Action::First).unwrap(),
        )
        .unwrap();
        emu
    }

    #[test]
    fn test_both_encodings_restore_the_same_emulator() {
        let snapshot = EmulatorSnapshot::capture(&sample()).unwrap();
        for format in [SnapshotFormat::Json, SnapshotFormat::Binary] {
            let bytes = snapshot.to_bytes(format, 3).unwrap();
            let restored = EmulatorSnapshot::from_bytes(&bytes)
                .unwrap()
                .restore(&LayerCatalog::standard())
                .unwrap();
            let names: Vec<&str> = restored.layers().map(|l| l.name()).collect();
            assert_eq!(names, vec!["Base", "WebService"]);
            assert_eq!(restored.bindings()[0].filter.to_spec(), sample().bindings()[0].filter.to_spec());
            assert_eq!(restored.seed(), Some(3));
        }
    }

    #[test]
    fn test_binary_header_detected() {
        let snapshot = EmulatorSnapshot::capture(&sample()).unwrap();
        let bytes = snapshot.to_bytes(SnapshotFormat::Binary, 3).unwrap();
        assert!(bytes.starts_with(BINARY_MAGIC));

        let mut bad = bytes.clone();
        bad[BINARY_MAGIC.len()] = 9;
        assert!(matches!(EmulatorSnapshot::from_bytes(&bad), Err(EmuError::Snapshot(_))));
    }

    #[test]
    fn test_unknown_layer_type_fails() {
        let snapshot = EmulatorSnapshot::capture(&sample()).unwrap();
        let mut catalog = LayerCatalog::new();
        catalog.register(BASE_LAYER, Base::load);
        let err = snapshot.restore(&catalog).unwrap_err();
        assert!(matches!(err, EmuError::UnknownLayerType(ref t) if t == "WebService"));
    }

    #[test]
    fn test_write_and_read_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("topology.bin");
        let snapshot = EmulatorSnapshot::capture(&sample()).unwrap();
        snapshot
            .write(&path, SnapshotFormat::from_path(&path), 3)
            .unwrap();

        let read = EmulatorSnapshot::read(&path).unwrap();
        assert_eq!(read.layers, snapshot.layers);
        assert_eq!(read.created_at, snapshot.created_at);
    }

    #[test]
    fn test_rendered_emulator_cannot_be_captured() {
        let mut emu = sample();
        emu.render().unwrap();
        assert!(matches!(EmulatorSnapshot::capture(&emu), Err(EmuError::AlreadyRendered)));
    }
}
