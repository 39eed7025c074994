use std::io;

use axon_config::LdapMethod;
use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while opening, closing or binding stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No store of that name is configured.
    #[error("store '{name}' is not configured")]
    UnknownStore {
        /// Requested store.
        name: String,
    },
    /// The store was applied twice without closing it.
    #[error("store '{name}' is already open")]
    AlreadyOpen {
        /// Store name.
        name: String,
    },
    /// The store has not been applied.
    #[error("store '{name}' is not open")]
    NotOpen {
        /// Store name.
        name: String,
    },
    /// The connection string names a database without a driver.
    #[error("store '{name}' uses an unsupported database '{scheme}'")]
    UnsupportedDatabase {
        /// Store name.
        name: String,
        /// Scheme of the connection string.
        scheme: String,
    },
    /// The LDAP bind method is not implemented.
    #[error("store '{name}' requests unsupported LDAP method '{method}'")]
    UnsupportedLdapMethod {
        /// Store name.
        name: String,
        /// Requested method.
        method: LdapMethod,
    },
    /// Only LDAPv3 is spoken.
    #[error("store '{name}' requests unsupported LDAP version {version}")]
    UnsupportedLdapVersion {
        /// Store name.
        name: String,
        /// Requested protocol version.
        version: u8,
    },
    /// The database runtime could not be started.
    #[error("failed to start database runtime: {source}")]
    Runtime {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A connection pool could not be created.
    #[error("failed to create pool for store '{name}': {source}")]
    Pool {
        /// Store name.
        name: String,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },
    /// Connecting or binding to the directory failed.
    #[error("LDAP connection to {url} for store '{name}' failed: {source}")]
    Ldap {
        /// Store name.
        name: String,
        /// Directory URL.
        url: String,
        /// Client error.
        #[source]
        source: ldap3::LdapError,
    },
    /// The file store root could not be created.
    #[error("failed to prepare file store root '{path}': {source}")]
    FileRoot {
        /// Root directory.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A different main store is already bound.
    #[error("main store is already bound to '{current}', cannot bind '{requested}'")]
    MainAlreadyBound {
        /// Bound store.
        current: String,
        /// Store requested now.
        requested: String,
    },
    /// Only relational stores can be the main store.
    #[error("store '{name}' is not a relational store and cannot be the main store")]
    MainNotRelational {
        /// Store name.
        name: String,
    },
}
