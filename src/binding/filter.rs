//! Candidate filters for virtual-node bindings.

use crate::error::{EmuError, Result};
use crate::model::{Node, Prefix};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Arbitrary predicate over `(vnode name, candidate node)`.
pub type CustomPredicate = Arc<dyn Fn(&str, &Node) -> bool + Send + Sync>;

/// Regex compiled once, matched against the whole input.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let regex = Regex::new(&format!("^(?:{})$", source)).map_err(|e| EmuError::InvalidPattern {
            pattern: source.clone(),
            source: e,
        })?;
        Ok(Pattern { source, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// The pattern text if it contains no regex syntax.
    pub fn literal(&self) -> Option<&str> {
        (regex::escape(&self.source) == self.source).then_some(self.source.as_str())
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.source)
    }
}

/// Conjunction of optional predicates over a candidate physical node.
///
/// Predicates are evaluated in a fixed order: asn, node name, ip, prefix,
/// custom, then the already-bound exclusion.
#[derive(Clone, Default)]
pub struct Filter {
    pub asn: Option<u32>,
    pub node_name: Option<Pattern>,
    pub ip: Option<Ipv4Addr>,
    pub prefix: Option<Prefix>,
    pub custom: Option<CustomPredicate>,
    pub allow_bound: bool,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asn(mut self, asn: u32) -> Self {
        self.asn = Some(asn);
        self
    }

    pub fn node_name(mut self, pattern: &str) -> Result<Self> {
        self.node_name = Some(Pattern::new(pattern)?);
        Ok(self)
    }

    pub fn ip(mut self, ip: Ipv4Addr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn prefix(mut self, prefix: Prefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    pub fn custom(mut self, predicate: impl Fn(&str, &Node) -> bool + Send + Sync + 'static) -> Self {
        self.custom = Some(Arc::new(predicate));
        self
    }

    pub fn allow_bound(mut self, allow: bool) -> Self {
        self.allow_bound = allow;
        self
    }

    /// Check `node` against every predicate. `is_bound` tells whether the node
    /// already hosts another virtual node.
    pub fn matches(&self, vnode: &str, node: &Node, is_bound: bool) -> bool {
        if let Some(asn) = self.asn {
            if node.asn() != Some(asn) {
                return false;
            }
        }
        if let Some(pattern) = &self.node_name {
            if !pattern.is_match(&node.name) {
                return false;
            }
        }
        if let Some(ip) = self.ip {
            if !node.has_address(ip) {
                return false;
            }
        }
        if let Some(prefix) = &self.prefix {
            if !node.in_prefix(prefix) {
                return false;
            }
        }
        if let Some(custom) = &self.custom {
            if !custom(vnode, node) {
                return false;
            }
        }
        self.allow_bound || !is_bound
    }

    pub fn to_spec(&self) -> FilterSpec {
        FilterSpec {
            asn: self.asn,
            node_name: self.node_name.as_ref().map(|p| p.as_str().to_string()),
            ip: self.ip,
            prefix: self.prefix,
            allow_bound: self.allow_bound,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(asn) = self.asn {
            parts.push(format!("asn={}", asn));
        }
        if let Some(pattern) = &self.node_name {
            parts.push(format!("nodeName={}", pattern.as_str()));
        }
        if let Some(ip) = self.ip {
            parts.push(format!("ip={}", ip));
        }
        if let Some(prefix) = &self.prefix {
            parts.push(format!("prefix={}", prefix));
        }
        if self.custom.is_some() {
            parts.push("custom".to_string());
        }
        if self.allow_bound {
            parts.push("allowBound".to_string());
        }
        if parts.is_empty() {
            f.write_str("<any>")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({})", self)
    }
}

/// Serializable form of a [`Filter`]. Custom predicates cannot be persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub asn: Option<u32>,
    pub node_name: Option<String>,
    pub ip: Option<Ipv4Addr>,
    pub prefix: Option<Prefix>,
    pub allow_bound: bool,
}

impl TryFrom<FilterSpec> for Filter {
    type Error = EmuError;

    fn try_from(spec: FilterSpec) -> Result<Self> {
        Ok(Filter {
            asn: spec.asn,
            node_name: spec.node_name.map(Pattern::new).transpose()?,
            ip: spec.ip,
            prefix: spec.prefix,
            custom: None,
            allow_bound: spec.allow_bound,
        })
    }
}
