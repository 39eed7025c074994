//! Data store configuration records.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::registry::Named;

/// Name of the relational store created by the service defaults.
pub const DEFAULT_STORE_NAME: &str = "sql_main";

/// Pool implementation requested for synchronous connections.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
pub enum PoolClass {
    /// One connection per thread.
    SingletonThreadPool,
    /// Bounded pool with overflow.
    #[default]
    QueuePool,
    /// No pooling; every checkout opens a connection.
    NullPool,
    /// Exactly one shared connection.
    StaticPool,
    /// At most one checked out connection at a time.
    AssertionPool,
}

/// Relational database store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalStoreConfig {
    /// Unique store name.
    pub name: String,
    /// Backend label, informational.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Connection URL, for example `postgresql://user:@/db`.
    pub conn_str: String,
    /// Pooled connections kept open.
    pub pool_size: u32,
    /// Seconds after which connections are recycled.
    pub pool_recycle: u64,
    /// Seconds to wait for a free connection.
    pub pool_timeout: u64,
    /// Extra connections allowed above `pool_size`.
    pub max_overflow: u32,
    /// Whether connections are tested before checkout.
    pub pool_pre_ping: bool,
    /// Whether the most recently returned connection is reused first.
    pub pool_use_lifo: bool,
    /// Whether pool events are logged.
    pub echo_pool: bool,
    /// Whether a blocking pool is created.
    pub sync_pool: bool,
    /// Blocking pool implementation.
    pub sync_pool_type: PoolClass,
    /// Whether an asynchronous pool is created.
    pub async_pool: bool,
}

impl Default for RelationalStoreConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            backend: Some("sqlalchemy".to_owned()),
            conn_str: String::new(),
            pool_size: 10,
            pool_recycle: 3600,
            pool_timeout: 30,
            max_overflow: 3,
            pool_pre_ping: false,
            pool_use_lifo: false,
            echo_pool: false,
            sync_pool: true,
            sync_pool_type: PoolClass::default(),
            async_pool: true,
        }
    }
}

impl RelationalStoreConfig {
    /// Connection string naming the current user and a database derived from
    /// the daemon name.
    #[must_use]
    pub fn default_conn_str(daemon_name: &str, user: &str) -> String {
        format!("postgresql://{user}:@/{daemon_name}_{user}")
    }
}

/// Authentication method for LDAP binds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LdapMethod {
    /// Simple bind with a DN and password.
    #[default]
    Simple,
    /// Kerberos via SASL GSSAPI.
    Gssapi,
    /// Generic SASL.
    Sasl,
}

/// LDAP directory store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LdapStoreConfig {
    /// Unique store name.
    pub name: String,
    /// Backend label, informational.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Bind method.
    pub method: LdapMethod,
    /// Directory host.
    pub host: String,
    /// Directory port.
    pub port: u16,
    /// Search base.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dn: Option<String>,
    /// Bind DN for simple binds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_dn: Option<String>,
    /// Bind password for simple binds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Connect timeout in seconds.
    pub timeout: u64,
    /// Protocol version.
    pub version: u8,
    /// Whether the connection is encrypted.
    pub use_tls: bool,
    /// Whether referrals are chased.
    pub referrals: bool,
}

impl Default for LdapStoreConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            backend: Some("python-ldap".to_owned()),
            method: LdapMethod::default(),
            host: "localhost".to_owned(),
            port: 389,
            base_dn: None,
            bind_dn: None,
            password: None,
            timeout: 10,
            version: 3,
            use_tls: false,
            referrals: false,
        }
    }
}

/// Filesystem store rooted at a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    /// Unique store name.
    pub name: String,
    /// Backend label, informational.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Root directory.
    pub path: Utf8PathBuf,
}

/// Configured data store, tagged by kind in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreConfig {
    /// Relational database.
    RelationalStore(RelationalStoreConfig),
    /// LDAP directory.
    LdapStore(LdapStoreConfig),
    /// Directory on the local filesystem.
    FileStore(FileStoreConfig),
}

impl StoreConfig {
    /// Tag used for this store kind in the configuration file.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RelationalStore(_) => "RelationalStore",
            Self::LdapStore(_) => "LdapStore",
            Self::FileStore(_) => "FileStore",
        }
    }
}

impl Named for StoreConfig {
    const KIND: &'static str = "store";

    fn name(&self) -> &str {
        match self {
            Self::RelationalStore(store) => &store.name,
            Self::LdapStore(store) => &store.name,
            Self::FileStore(store) => &store.name,
        }
    }
}
