//! Seam between the daemon runtime and the application it hosts.

use std::error::Error as StdError;
use std::sync::Arc;

use axon_config::Config;
use camino::Utf8Path;
use thiserror::Error;

use crate::stores::{SqlStore, StoreHandle, StoreManager};
use crate::transport::{ConnectionHandler, Listener, ListenerManager};

/// Handlers returned by [`Application::init`], keyed by listener name.
pub type ServiceHandlers = Vec<(String, Arc<dyn ConnectionHandler>)>;

/// Failure reported by application code.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApplicationError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ApplicationError {
    /// Error with a message only.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Error wrapping an underlying cause.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Application hosted by the daemon.
///
/// `configure` runs before anything is applied and registers the listeners
/// and stores the application needs. `init` runs once sockets are bound and
/// stores are open, and returns one handler per listener.
pub trait Application {
    /// Registers listeners and stores on the loaded configuration.
    ///
    /// # Errors
    /// Returns an error when the configuration cannot serve the application.
    fn configure(&self, _config: &mut Config) -> Result<(), ApplicationError> {
        Ok(())
    }

    /// Builds the connection handlers.
    ///
    /// # Errors
    /// Returns an error when the application cannot start.
    fn init(&self, context: &ServiceContext<'_>) -> Result<ServiceHandlers, ApplicationError>;

    /// Version reported by `--version`.
    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_owned()
    }

    /// Creates the initial database state for `--bootstrap`.
    ///
    /// # Errors
    /// Returns an error when bootstrapping fails.
    fn bootstrap(&self, _context: &ServiceContext<'_>) -> Result<(), ApplicationError> {
        Ok(())
    }

    /// Drops every table of the main store for `--drop-all-tables`.
    ///
    /// # Errors
    /// Returns an error when the tables cannot be dropped.
    fn drop_all_tables(&self, _context: &ServiceContext<'_>) -> Result<(), ApplicationError> {
        Ok(())
    }

    /// Writes interface documents for `--write-interface`.
    ///
    /// # Errors
    /// Returns an error when the documents cannot be written.
    fn write_interface(
        &self,
        _context: &ServiceContext<'_>,
        _dir: &Utf8Path,
    ) -> Result<(), ApplicationError> {
        Ok(())
    }
}

/// Read-only view of the applied daemon handed to application code.
#[derive(Debug, Clone, Copy)]
pub struct ServiceContext<'a> {
    config: &'a Config,
    listeners: &'a ListenerManager,
    stores: Option<&'a StoreManager>,
}

impl<'a> ServiceContext<'a> {
    pub(crate) const fn new(
        config: &'a Config,
        listeners: &'a ListenerManager,
        stores: Option<&'a StoreManager>,
    ) -> Self {
        Self {
            config,
            listeners,
            stores,
        }
    }

    /// Applied configuration.
    #[must_use]
    pub const fn config(&self) -> &'a Config {
        self.config
    }

    /// Main relational store, once bound.
    #[must_use]
    pub fn get_main_store(&self) -> Option<&'a SqlStore> {
        self.stores.and_then(StoreManager::main)
    }

    /// Open store by name.
    #[must_use]
    pub fn store(&self, name: &str) -> Option<&'a StoreHandle> {
        self.stores.and_then(|stores| stores.get(name))
    }

    /// Listener by name.
    #[must_use]
    pub fn listener(&self, name: &str) -> Option<&'a Listener> {
        self.listeners.get(name)
    }

    /// Whether debug mode is on.
    #[must_use]
    pub const fn debug(&self) -> bool {
        self.config.debug
    }
}
