//! Pool layout derived from a relational store configuration.

use std::time::Duration;

use axon_config::{PoolClass, RelationalStoreConfig};
use tracing::{debug, warn};

use super::STORE_TARGET;

/// Database family named by a connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    /// `postgres://` or `postgresql://`.
    Postgres,
    /// `sqlite:` URLs and `:memory:` databases.
    Sqlite,
    /// Anything else.
    Other,
}

impl DbKind {
    /// Classifies `conn_str`.
    #[must_use]
    pub fn detect(conn_str: &str) -> Self {
        if conn_str.starts_with("postgres") {
            Self::Postgres
        } else if conn_str.starts_with("sqlite:") || conn_str.ends_with(":memory:") {
            Self::Sqlite
        } else {
            Self::Other
        }
    }

    /// Whether the database lives inside the process.
    #[must_use]
    pub const fn is_embedded(self) -> bool {
        matches!(self, Self::Sqlite)
    }
}

/// Settings of the blocking connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPool {
    /// Requested pool implementation.
    pub class: PoolClass,
    /// Pooled connections; `None` when the class fixes the size.
    pub size: Option<u32>,
    /// Connections allowed above `size`.
    pub max_overflow: u32,
    /// Wait for a free connection.
    pub timeout: Duration,
    /// Connection lifetime before it is recycled.
    pub recycle: Duration,
    /// Whether connections are tested before checkout.
    pub pre_ping: bool,
    /// Last-in first-out checkout was requested. sqlx hands out idle
    /// connections oldest first, so this is reported but not honoured.
    pub lifo: bool,
}

impl SyncPool {
    /// Upper bound on open connections.
    #[must_use]
    pub fn max_connections(&self) -> u32 {
        match (self.class, self.size) {
            (PoolClass::StaticPool | PoolClass::AssertionPool, _) | (_, None) => 1,
            (_, Some(size)) => size.saturating_add(self.max_overflow).max(1),
        }
    }

    /// Connections kept open while idle.
    #[must_use]
    pub const fn min_connections(&self) -> u32 {
        match self.class {
            PoolClass::NullPool => 0,
            _ => 1,
        }
    }
}

/// Which pools a relational store opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPlan {
    /// Database family.
    pub kind: DbKind,
    /// Blocking pool, when requested.
    pub sync_pool: Option<SyncPool>,
    /// Whether the non-blocking PostgreSQL pool is opened.
    pub async_pool: bool,
    /// Whether pool events are logged (`sqlx::pool`).
    pub echo: bool,
}

impl PoolPlan {
    /// Derives the pool layout for `store`.
    ///
    /// Embedded databases always get a single static connection. The
    /// non-blocking pool is only available for PostgreSQL; other requests
    /// are downgraded with a warning.
    #[must_use]
    pub fn from_config(store: &RelationalStoreConfig) -> Self {
        let kind = DbKind::detect(&store.conn_str);

        let mut async_pool = store.async_pool;
        if async_pool && kind != DbKind::Postgres {
            warn!(
                target: STORE_TARGET,
                store = %store.name,
                "asynchronous pool requires PostgreSQL; disabling it"
            );
            async_pool = false;
        }

        let sync_pool = store.sync_pool.then(|| {
            let (class, size) = if kind.is_embedded() {
                (PoolClass::StaticPool, None)
            } else {
                (store.sync_pool_type, Some(store.pool_size))
            };
            let lifo = store.pool_use_lifo && !kind.is_embedded();
            if lifo {
                warn!(
                    target: STORE_TARGET,
                    store = %store.name,
                    "pool_use_lifo is not supported; connections are reused oldest first"
                );
            }
            SyncPool {
                class,
                size,
                max_overflow: store.max_overflow,
                timeout: Duration::from_secs(store.pool_timeout),
                recycle: Duration::from_secs(store.pool_recycle),
                pre_ping: store.pool_pre_ping,
                lifo,
            }
        });

        if sync_pool.is_none() && !async_pool {
            debug!(
                target: STORE_TARGET,
                store = %store.name,
                "store has no pools enabled"
            );
        }

        Self {
            kind,
            sync_pool,
            async_pool,
            echo: store.echo_pool,
        }
    }

    /// Whether neither pool is opened.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.sync_pool.is_none() && !self.async_pool
    }
}
