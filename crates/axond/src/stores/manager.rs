//! Opens, tracks and closes the configured stores.

use std::collections::BTreeMap;

use axon_config::{NamedRegistry, StoreConfig};
use once_cell::sync::OnceCell;
use tracing::{error, info, warn};

use super::{PoolPlan, STORE_TARGET, SqlStore, StoreConnector, StoreError, StoreHandle};

/// Store registry with the handles of every applied store.
pub struct StoreManager {
    configs: NamedRegistry<StoreConfig>,
    open: BTreeMap<String, StoreHandle>,
    main: OnceCell<String>,
    connector: Box<dyn StoreConnector>,
}

impl StoreManager {
    /// Creates a manager for `configs`; nothing is opened yet.
    #[must_use]
    pub fn new(configs: NamedRegistry<StoreConfig>, connector: Box<dyn StoreConnector>) -> Self {
        Self {
            configs,
            open: BTreeMap::new(),
            main: OnceCell::new(),
            connector,
        }
    }

    /// Opens the named store.
    ///
    /// # Errors
    /// Returns [`StoreError::AlreadyOpen`] when the store is open and the
    /// connector error when opening fails.
    pub fn apply(&mut self, name: &str) -> Result<&StoreHandle, StoreError> {
        if self.open.contains_key(name) {
            return Err(StoreError::AlreadyOpen {
                name: name.to_owned(),
            });
        }
        let config = self
            .configs
            .get(name)
            .ok_or_else(|| StoreError::UnknownStore {
                name: name.to_owned(),
            })?;

        let opened = match config {
            StoreConfig::RelationalStore(store) => {
                let plan = PoolPlan::from_config(store);
                self.connector
                    .open_relational(store, plan)
                    .map(StoreHandle::Sql)
            }
            StoreConfig::LdapStore(store) => self.connector.open_ldap(store).map(StoreHandle::Ldap),
            StoreConfig::FileStore(store) => self.connector.open_file(store).map(StoreHandle::File),
        };
        let handle = opened.inspect_err(|failure| {
            error!(
                target: STORE_TARGET,
                store = name,
                kind = config.kind(),
                error = %failure,
                "failed to open store"
            );
        })?;

        info!(
            target: STORE_TARGET,
            store = name,
            kind = config.kind(),
            "store opened"
        );
        Ok(self.open.entry(name.to_owned()).or_insert(handle))
    }

    /// Opens every configured store in name order.
    ///
    /// # Errors
    /// Stops at the first store that fails to open.
    pub fn apply_all(&mut self) -> Result<(), StoreError> {
        for name in self.configs.names() {
            self.apply(&name)?;
        }
        Ok(())
    }

    /// Releases the named store.
    ///
    /// # Errors
    /// Returns [`StoreError::NotOpen`] when the store is not open.
    pub fn close(&mut self, name: &str) -> Result<(), StoreError> {
        let handle = self.open.remove(name).ok_or_else(|| StoreError::NotOpen {
            name: name.to_owned(),
        })?;
        handle.close();
        Ok(())
    }

    /// Releases every open store.
    pub fn close_all(&mut self) {
        for (_, handle) in std::mem::take(&mut self.open) {
            handle.close();
        }
    }

    /// Binds `name` as the main store. Binding happens once per process.
    ///
    /// # Errors
    /// Fails when the store is not an open relational store or a different
    /// main store is already bound.
    pub fn bind_main(&self, name: &str) -> Result<(), StoreError> {
        let handle = self.open.get(name).ok_or_else(|| StoreError::NotOpen {
            name: name.to_owned(),
        })?;
        if handle.as_sql().is_none() {
            return Err(StoreError::MainNotRelational {
                name: name.to_owned(),
            });
        }

        let current = self.main.get_or_init(|| {
            info!(target: STORE_TARGET, store = name, "main store bound");
            name.to_owned()
        });
        if current != name {
            return Err(StoreError::MainAlreadyBound {
                current: current.clone(),
                requested: name.to_owned(),
            });
        }
        Ok(())
    }

    /// The bound main store.
    #[must_use]
    pub fn main(&self) -> Option<&SqlStore> {
        self.main
            .get()
            .and_then(|name| self.open.get(name))
            .and_then(StoreHandle::as_sql)
    }

    /// Name of the bound main store.
    #[must_use]
    pub fn main_name(&self) -> Option<&str> {
        self.main.get().map(String::as_str)
    }

    /// Looks up an open store.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StoreHandle> {
        self.open.get(name)
    }

    /// Whether the named store is open.
    #[must_use]
    pub fn is_open(&self, name: &str) -> bool {
        self.open.contains_key(name)
    }

    /// Configured stores.
    #[must_use]
    pub const fn configs(&self) -> &NamedRegistry<StoreConfig> {
        &self.configs
    }
}

impl Drop for StoreManager {
    fn drop(&mut self) {
        if !self.open.is_empty() {
            warn!(
                target: STORE_TARGET,
                count = self.open.len(),
                "closing stores left open"
            );
            self.close_all();
        }
    }
}

impl std::fmt::Debug for StoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreManager")
            .field("open", &self.open.keys().collect::<Vec<_>>())
            .field("main", &self.main.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::SystemConnector;
    use axon_config::{FileStoreConfig, RelationalStoreConfig};
    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        manager: StoreManager,
    }

    #[fixture]
    fn stores() -> Fixture {
        let dir = tempfile::tempdir().expect("temp dir");
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 dir");
        let configs = NamedRegistry::from_entries([
            StoreConfig::RelationalStore(RelationalStoreConfig {
                name: "sql_main".to_owned(),
                conn_str: "sqlite::memory:".to_owned(),
                ..RelationalStoreConfig::default()
            }),
            StoreConfig::RelationalStore(RelationalStoreConfig {
                name: "sql_audit".to_owned(),
                conn_str: "sqlite::memory:".to_owned(),
                ..RelationalStoreConfig::default()
            }),
            StoreConfig::FileStore(FileStoreConfig {
                name: "uploads".to_owned(),
                path: base.join("uploads"),
                ..FileStoreConfig::default()
            }),
        ])
        .expect("unique store names");
        let connector = SystemConnector::new(false).expect("database runtime");
        Fixture {
            _dir: dir,
            manager: StoreManager::new(configs, Box::new(connector)),
        }
    }

    #[rstest]
    fn applying_an_open_store_is_rejected(stores: Fixture) {
        let mut manager = stores.manager;
        manager.apply("uploads").expect("first apply");
        let error = manager.apply("uploads").expect_err("second apply");
        assert!(matches!(error, StoreError::AlreadyOpen { .. }));

        manager.close("uploads").expect("close");
        manager.apply("uploads").expect("reopen after close");
    }

    #[rstest]
    fn unknown_stores_are_reported(stores: Fixture) {
        let mut manager = stores.manager;
        let error = manager.apply("ghost").expect_err("unknown store");
        assert!(matches!(error, StoreError::UnknownStore { .. }));
        let error = manager.close("ghost").expect_err("not open");
        assert!(matches!(error, StoreError::NotOpen { .. }));
    }

    #[rstest]
    fn main_store_binds_once(stores: Fixture) {
        let mut manager = stores.manager;
        manager.apply_all().expect("open all stores");

        manager.bind_main("sql_main").expect("bind main");
        manager.bind_main("sql_main").expect("rebinding the same store");
        let error = manager.bind_main("sql_audit").expect_err("second main");
        assert!(matches!(error, StoreError::MainAlreadyBound { .. }));
        assert_eq!(manager.main().map(SqlStore::name), Some("sql_main"));
    }

    #[rstest]
    fn only_relational_stores_can_be_main(stores: Fixture) {
        let mut manager = stores.manager;
        manager.apply("uploads").expect("open file store");
        let error = manager.bind_main("uploads").expect_err("file store");
        assert!(matches!(error, StoreError::MainNotRelational { .. }));
        assert!(manager.main().is_none());
    }

    #[rstest]
    fn close_all_releases_every_store(stores: Fixture) {
        let mut manager = stores.manager;
        manager.apply_all().expect("open all stores");
        manager.close_all();
        assert!(!manager.is_open("sql_main"));
        assert!(!manager.is_open("uploads"));
    }
}
