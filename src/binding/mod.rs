//! # Virtual-Node Bindings
//!
//! Layers declare intent ("run a web server on `web150`") against virtual
//! node names. A [`Binding`] maps a virtual-node name pattern to a selection
//! policy over physical host nodes: a [`Filter`] narrowing the candidates and
//! an [`Action`] choosing among them. The [`BindingResolver`] applies them at
//! configure time.
//!
//! ## Resolution
//!
//! 1. The first binding whose pattern matches the virtual-node name decides;
//!    later bindings are never consulted for that name.
//! 2. Host nodes are scanned in registry order and checked against the filter.
//! 3. The action picks the candidate (or, for [`Action::New`], creates one).
//! 4. The pairing is recorded so repeated resolutions return the same node.
//!
//! A virtual node that no binding matches, or whose filter matches nothing,
//! fails the build.
//!
//! ```rust
//! use seedemu::binding::{Action, Binding, Filter};
//!
//! let binding = Binding::new("web.*", Filter::new().asn(150), Action::First)?;
//! assert!(binding.matches("web150"));
//! assert!(!binding.matches("dns150"));
//! # Ok::<(), seedemu::EmuError>(())
//! ```

pub mod filter;
pub mod resolver;

pub use filter::{CustomPredicate, Filter, FilterSpec, Pattern};
pub use resolver::BindingResolver;

use crate::error::{EmuError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a binding picks among candidate nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// First candidate in registry order
    First,
    /// Last candidate in registry order
    Last,
    /// Uniform choice among all candidates
    Random,
    /// Create a new host node instead of searching
    New,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::First => "FIRST",
            Action::Last => "LAST",
            Action::Random => "RANDOM",
            Action::New => "NEW",
        };
        f.write_str(name)
    }
}

/// Rule mapping virtual-node names to a physical-node selection policy.
#[derive(Clone)]
pub struct Binding {
    source: Pattern,
    pub filter: Filter,
    pub action: Action,
}

impl Binding {
    pub fn new(source: &str, filter: Filter, action: Action) -> Result<Self> {
        Ok(Binding {
            source: Pattern::new(source)?,
            filter,
            action,
        })
    }

    pub fn source(&self) -> &str {
        self.source.as_str()
    }

    pub fn matches(&self, vnode: &str) -> bool {
        self.source.is_match(vnode)
    }

    /// Copy of this binding that only matches names carrying `prefix`.
    pub fn with_prefix(&self, prefix: &str) -> Result<Self> {
        if prefix.is_empty() {
            return Ok(self.clone());
        }
        let source = format!("{}(?:{})", regex::escape(prefix), self.source.as_str());
        Binding::new(&source, self.filter.clone(), self.action)
    }

    pub fn to_spec(&self) -> BindingSpec {
        BindingSpec {
            source: self.source.as_str().to_string(),
            filter: self.filter.to_spec(),
            action: self.action,
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binding({:?} -> {:?}, {})", self.source, self.filter, self.action)
    }
}

/// Serializable form of a [`Binding`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingSpec {
    pub source: String,
    pub filter: FilterSpec,
    pub action: Action,
}

impl TryFrom<BindingSpec> for Binding {
    type Error = EmuError;

    fn try_from(spec: BindingSpec) -> Result<Self> {
        Binding::new(&spec.source, Filter::try_from(spec.filter)?, spec.action)
    }
}
