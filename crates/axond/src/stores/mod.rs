//! Data stores opened at boot: relational pools, LDAP connections and file
//! roots.
//!
//! [`StoreManager`] opens each configured store through a [`StoreConnector`]
//! and binds exactly one relational store as the main store.

mod connector;
mod errors;
mod handle;
mod manager;
mod plan;

pub use connector::{StoreConnector, SystemConnector};
pub use errors::StoreError;
pub use handle::{FileStore, LdapStore, SqlPool, SqlStore, StoreHandle};
pub use manager::StoreManager;
pub use plan::{DbKind, PoolPlan, SyncPool};

pub(crate) const STORE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::stores");

/// Target of sqlx pool events, enabled by `echo_pool`.
pub(crate) const POOL_ECHO_TARGET: &str = "sqlx::pool";
