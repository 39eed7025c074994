//! Open store handles.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use ldap3::LdapConn;
use sqlx::postgres::PgPool;
use sqlx::sqlite::SqlitePool;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use super::{PoolPlan, STORE_TARGET};
use crate::reactor::is_reactor_thread;

/// Blocking pool of a relational store.
#[derive(Debug, Clone)]
pub enum SqlPool {
    /// PostgreSQL pool.
    Postgres(PgPool),
    /// SQLite pool.
    Sqlite(SqlitePool),
}

impl SqlPool {
    async fn close(&self) {
        match self {
            Self::Postgres(pool) => pool.close().await,
            Self::Sqlite(pool) => pool.close().await,
        }
    }
}

/// Open relational store.
pub struct SqlStore {
    name: String,
    plan: PoolPlan,
    runtime: Arc<Runtime>,
    sync_pool: Option<SqlPool>,
    async_pool: Option<PgPool>,
    debug_reactor: bool,
}

impl SqlStore {
    pub(crate) fn new(
        name: impl Into<String>,
        plan: PoolPlan,
        runtime: Arc<Runtime>,
        sync_pool: Option<SqlPool>,
        async_pool: Option<PgPool>,
        debug_reactor: bool,
    ) -> Self {
        Self {
            name: name.into(),
            plan,
            runtime,
            sync_pool,
            async_pool,
            debug_reactor,
        }
    }

    /// Store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pool layout the store was opened with.
    #[must_use]
    pub const fn plan(&self) -> &PoolPlan {
        &self.plan
    }

    /// Pool used through [`SqlStore::block_on`].
    #[must_use]
    pub const fn sync_pool(&self) -> Option<&SqlPool> {
        self.sync_pool.as_ref()
    }

    /// Non-blocking PostgreSQL pool.
    #[must_use]
    pub const fn async_pool(&self) -> Option<&PgPool> {
        self.async_pool.as_ref()
    }

    /// Runs a query future to completion on the store runtime.
    ///
    /// With `debug_reactor` set, a warning names queries issued from an
    /// accept-loop thread.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        if self.debug_reactor && is_reactor_thread() {
            warn!(
                target: STORE_TARGET,
                store = %self.name,
                "blocking query issued from a reactor thread"
            );
        }
        self.runtime.block_on(future)
    }

    /// Closes both pools, waiting for checked out connections.
    pub fn close(self) {
        let Self {
            name,
            runtime,
            sync_pool,
            async_pool,
            ..
        } = self;
        runtime.block_on(async {
            if let Some(pool) = &sync_pool {
                pool.close().await;
            }
            if let Some(pool) = &async_pool {
                pool.close().await;
            }
        });
        info!(target: STORE_TARGET, store = %name, "relational store closed");
    }
}

impl std::fmt::Debug for SqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlStore")
            .field("name", &self.name)
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

/// Bound LDAP connection.
pub struct LdapStore {
    name: String,
    url: String,
    conn: Mutex<LdapConn>,
}

impl LdapStore {
    pub(crate) fn new(name: impl Into<String>, url: impl Into<String>, conn: LdapConn) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            conn: Mutex::new(conn),
        }
    }

    /// Store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Runs `op` with exclusive access to the connection.
    pub fn with_conn<R>(&self, op: impl FnOnce(&mut LdapConn) -> R) -> R {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        op(&mut conn)
    }

    /// Unbinds from the directory.
    pub fn close(self) {
        let mut conn = self.conn.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Err(error) = conn.unbind() {
            warn!(
                target: STORE_TARGET,
                store = %self.name,
                error = %error,
                "LDAP unbind failed"
            );
        }
    }
}

impl std::fmt::Debug for LdapStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapStore")
            .field("name", &self.name)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Directory-backed store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStore {
    name: String,
    root: Utf8PathBuf,
}

impl FileStore {
    pub(crate) fn new(name: impl Into<String>, root: Utf8PathBuf) -> Self {
        Self {
            name: name.into(),
            root,
        }
    }

    /// Store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute root directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

/// An open store of any kind.
#[derive(Debug)]
pub enum StoreHandle {
    /// Relational database pools.
    Sql(SqlStore),
    /// Directory connection.
    Ldap(LdapStore),
    /// Filesystem root.
    File(FileStore),
}

impl StoreHandle {
    /// Store name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Sql(store) => store.name(),
            Self::Ldap(store) => store.name(),
            Self::File(store) => store.name(),
        }
    }

    /// The relational store, if this is one.
    #[must_use]
    pub const fn as_sql(&self) -> Option<&SqlStore> {
        match self {
            Self::Sql(store) => Some(store),
            _ => None,
        }
    }

    /// Releases the underlying connections.
    pub fn close(self) {
        match self {
            Self::Sql(store) => store.close(),
            Self::Ldap(store) => store.close(),
            Self::File(store) => {
                info!(target: STORE_TARGET, store = %store.name, "file store closed");
            }
        }
    }
}
