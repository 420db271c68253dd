//! # seedemu - Topology composition core for an Internet emulator
//!
//! This library lets independently written layers cooperatively build one
//! consistent network topology (autonomous systems, routers, networks,
//! internet exchanges and the services running on them) and hands the
//! result to a compiler backend.
//!
//! ## Overview
//!
//! Four pieces carry the composition logic:
//!
//! - **Registry**: the single store of every object, keyed by
//!   `(scope, kind, name)`.
//! - **Layer engine**: orders layers by their declared dependencies and runs
//!   them through configure and render.
//! - **Binding resolver**: maps virtual nodes declared by services onto
//!   physical nodes, selected by filters at build time.
//! - **Merge engine**: combines two independently built emulators.
//!
//! ## Architecture
//!
//! - `error`: error taxonomy shared by every module
//! - `config`: YAML build configuration and validation
//! - `registry`: keys, objects and the registry itself
//! - `model`: nodes, networks and IPv4 prefixes
//! - `layer`: the `Layer` trait, build context and dependency engine
//! - `binding`: filters, bindings and the resolver
//! - `base`: the Base layer (autonomous systems and exchanges)
//! - `service`: generic service layers and the web server
//! - `merge`: per-type mergers and emulator merging
//! - `snapshot`: dump/load of unrendered emulators
//! - `compiler`: backends consuming a rendered registry
//! - `emulator`: the façade driving the pipeline
//!
//! ## Example Usage
//!
//! ```rust
//! use seedemu::base::Base;
//! use seedemu::binding::{Action, Binding, Filter};
//! use seedemu::service::{Service, WebServer};
//! use seedemu::Emulator;
//!
//! let mut base = Base::new();
//! base.create_internet_exchange(100)?;
//! for asn in [150, 151] {
//!     let asys = base.create_autonomous_system(asn)?;
//!     asys.create_network("net0")?;
//!     asys.create_router("router0")?.join_network("net0").join_network("ix100");
//!     asys.create_host("web")?.join_network("net0");
//! }
//!
//! let mut web = Service::<WebServer>::new();
//! web.install("web150");
//!
//! let mut emu = Emulator::with_seed(Some(42));
//! emu.add_layer(base)?;
//! emu.add_layer(web)?;
//! emu.add_binding(Binding::new("web150", Filter::new().asn(150).node_name("web")?, Action::First)?)?;
//! emu.render()?;
//!
//! assert_eq!(emu.resolved_node("web150")?.to_string(), "(150, hnode, web)");
//! # Ok::<(), seedemu::EmuError>(())
//! ```
//!
//! ## Error Handling
//!
//! Library operations return [`EmuError`] through the crate's `Result`
//! alias. The command-line tool and the configuration loader wrap errors
//! with `color_eyre` for context-rich reports.

pub mod base;
pub mod binding;
pub mod compiler;
pub mod config;
pub mod emulator;
pub mod error;
pub mod layer;
pub mod merge;
pub mod model;
pub mod registry;
pub mod service;
pub mod snapshot;

pub use emulator::Emulator;
pub use error::{EmuError, Result};
