//! Configuration model and loader for axon daemons.
//!
//! A daemon is described by a single YAML document holding one top-level key
//! (the daemon kind, for example `ServiceDaemon`) whose value is a [`Config`].
//! [`ConfigLoader::parse_config`] reads that document, upgrades it through the
//! migration chain in [`migrate`], overlays the command line described by
//! [`CliArgs`], and writes the merged result back when the file was missing
//! or gained generated identity fields.
//!
//! Listeners and stores live in [`NamedRegistry`] maps keyed by name. The
//! registries reject duplicate names on load and report disabled entries
//! through [`RegistryError::ServiceDisabled`] instead of returning them.

mod cli;
mod error;
mod files;
mod identity;
mod loader;
pub mod migrate;
mod model;
mod registry;

pub use cli::{
    CliArgs, ListenerOverride, apply_listener_overrides, apply_matching_overrides, split_overrides,
};
pub use error::{ConfigError, IdentityError, MigrationError, RegistryError};
pub use identity::{
    MIN_COOKIE_SECRET_LEN, SECRET_LEN, Secret, current_user_name, resolve_group, resolve_user,
};
pub use loader::{ConfigLoader, LoadedConfig, parse_document, render};
pub use model::*;
pub use registry::{Named, NamedRegistry};
