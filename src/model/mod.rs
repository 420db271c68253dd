//! Physical topology primitives.
//!
//! Nodes and networks are stored in the [`crate::registry::Registry`]. An
//! interface refers to its network by registry key; the network's member list
//! is the authoritative record of what is attached to it.

pub mod address;
pub mod network;
pub mod node;

pub use address::Prefix;
pub use network::{connect, Member, Network, NetworkKind, HOST_ADDRESS_START};
pub use node::{Interface, Node, NodeFile, NodeRole, StartCommand};
