//! Core traits for dnsupdater
//!
//! This module defines the abstract interfaces that updater crates implement.
//!
//! - [`Updater`]: Apply one update request over some transport
//! - [`UpdaterFactory`]: Build updaters bound to the dispatcher and describe their settings
//! - [`ClientResolver`]: Report the address of "the client" in a given context

pub mod client_resolver;
pub mod updater;

pub use client_resolver::ClientResolver;
pub use updater::{Updater, UpdaterFactory};
