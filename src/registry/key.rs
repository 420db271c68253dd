//! Registry key types.
//!
//! Every object is addressed by a `(scope, kind, name)` triple. Scopes and
//! kinds serialize to the short string tags used throughout snapshots and
//! manifests (`"150"`, `"ix"`, `"seedemu"`; `"hnode"`, `"rnode"`, ...).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Partition of the registry an object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    /// Objects owned by an autonomous system
    Asn(u32),
    /// Objects owned by internet exchanges
    Ix,
    /// Process-global objects (layers)
    Global,
}

impl Scope {
    pub fn asn(&self) -> Option<u32> {
        match self {
            Scope::Asn(asn) => Some(*asn),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Asn(asn) => write!(f, "{}", asn),
            Scope::Ix => f.write_str("ix"),
            Scope::Global => f.write_str("seedemu"),
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ix" => Ok(Scope::Ix),
            "seedemu" => Ok(Scope::Global),
            other => other
                .parse::<u32>()
                .map(Scope::Asn)
                .map_err(|_| format!("invalid registry scope '{}'", other)),
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

impl From<u32> for Scope {
    fn from(asn: u32) -> Self {
        Scope::Asn(asn)
    }
}

/// Short type tag of a registered object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ObjectKind {
    Host,
    Router,
    RouteServer,
    CrossConnect,
    Network,
    Layer,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Host => "hnode",
            ObjectKind::Router => "rnode",
            ObjectKind::RouteServer => "rs",
            ObjectKind::CrossConnect => "csnode",
            ObjectKind::Network => "net",
            ObjectKind::Layer => "layer",
        }
    }

    /// True for every kind that stores a [`crate::model::Node`].
    pub fn is_node(&self) -> bool {
        !matches!(self, ObjectKind::Network | ObjectKind::Layer)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hnode" => Ok(ObjectKind::Host),
            "rnode" => Ok(ObjectKind::Router),
            "rs" => Ok(ObjectKind::RouteServer),
            "csnode" => Ok(ObjectKind::CrossConnect),
            "net" => Ok(ObjectKind::Network),
            "layer" => Ok(ObjectKind::Layer),
            other => Err(format!("invalid object kind '{}'", other)),
        }
    }
}

impl TryFrom<String> for ObjectKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ObjectKind> for String {
    fn from(kind: ObjectKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Unique address of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegistryKey {
    pub scope: Scope,
    pub kind: ObjectKind,
    pub name: String,
}

impl RegistryKey {
    pub fn new(scope: impl Into<Scope>, kind: ObjectKind, name: impl Into<String>) -> Self {
        RegistryKey {
            scope: scope.into(),
            kind,
            name: name.into(),
        }
    }

    pub fn layer(name: impl Into<String>) -> Self {
        RegistryKey::new(Scope::Global, ObjectKind::Layer, name)
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.scope, self.kind, self.name)
    }
}
