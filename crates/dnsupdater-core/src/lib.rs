// # dnsupdater-core
//
// Core library for routing DNS updates through pluggable updaters.
//
// ## Architecture Overview
//
// - **UpdateRequest**: One update, parsed from a target string
// - **Updater**: Trait for applying an update over some transport
// - **UpdaterRegistry**: Plugin-based registry of updaters by protocol tag
// - **Config**: Layered per-protocol settings and downstream protocol overrides
// - **AddressResolver**: Turns address tokens into concrete addresses
// - **Dispatcher / DnsUpdater**: The single path by which updates are applied
//
// ## Design Principles
//
// 1. **Plugin-Based**: Updaters are registered at startup, dispatch has no protocol chains
// 2. **Indirection Through Dispatch**: Tunnelling updaters delegate, they never update
// 3. **Library-First**: The binary is a thin layer over this crate

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod target;
pub mod traits;

// Re-export core types for convenience
pub use config::Config;
pub use dispatcher::{Dispatcher, DnsUpdater, UpdateOptions, resolve_protocol};
pub use error::{Error, Result};
pub use registry::UpdaterRegistry;
pub use request::{IpToken, UpdateRequest};
pub use resolver::{AddressResolver, LocalInterfaces, PeerAddress, ResolvedAddressSet};
pub use traits::{ClientResolver, Updater, UpdaterFactory};
