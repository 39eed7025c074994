//! Owns every configured listener and binds them together.

use std::collections::BTreeMap;
use std::sync::Arc;

use axon_config::{ListenerConfig, NamedRegistry, TransportKind};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{ConnectionHandler, LISTENER_TARGET, Listener, ListenerError, PendingBind};
use crate::exit::listen_failure_code;

/// First listener that failed while binding.
#[derive(Debug, Error)]
#[error("listener '{listener}' failed on {transport} port {port}: {source}")]
pub struct ListenFailure {
    /// Listener name.
    pub listener: String,
    /// Transport the listener binds.
    pub transport: TransportKind,
    /// Configured port.
    pub port: u16,
    /// Underlying failure.
    #[source]
    pub source: ListenerError,
}

impl ListenFailure {
    fn new(listener: &Listener, source: ListenerError) -> Self {
        let server = listener.config().server();
        Self {
            listener: server.name.clone(),
            transport: server.transport,
            port: server.port,
            source,
        }
    }

    /// Process exit code identifying the failed endpoint.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        listen_failure_code(self.transport, self.port)
    }
}

/// Listeners keyed by name.
#[derive(Debug, Default)]
pub struct ListenerManager {
    listeners: BTreeMap<String, Listener>,
}

impl ListenerManager {
    /// Creates unbound listeners for every enabled configuration entry.
    #[must_use]
    pub fn from_config(services: &NamedRegistry<ListenerConfig>) -> Self {
        let mut listeners = BTreeMap::new();
        for config in services.iter() {
            let server = config.server();
            if server.disabled {
                debug!(
                    target: LISTENER_TARGET,
                    listener = %server.name,
                    "listener disabled; not binding"
                );
                continue;
            }
            listeners.insert(server.name.clone(), Listener::new(config.clone()));
        }
        Self { listeners }
    }

    /// Binds every listener in parallel and starts accepting.
    ///
    /// Sockets of the other listeners are released when any bind fails.
    ///
    /// # Errors
    /// Returns the first failure, in listener name order.
    pub fn listen_all(&mut self) -> Result<(), ListenFailure> {
        let mut failure = None;
        let mut pending: Vec<PendingBind> = Vec::with_capacity(self.listeners.len());
        for listener in self.listeners.values_mut() {
            match listener.listen() {
                Ok(bind) => pending.push(bind),
                Err(error) => {
                    listener.fail(&error);
                    failure.get_or_insert_with(|| ListenFailure::new(listener, error));
                }
            }
        }

        for bind in pending {
            let name = bind.listener().to_owned();
            let result = bind.wait();
            let Some(listener) = self.listeners.get_mut(&name) else {
                continue;
            };
            let outcome = result.and_then(|socket| {
                if failure.is_some() {
                    socket.cleanup();
                    Ok(())
                } else {
                    listener.set_listening_port(socket)
                }
            });
            if let Err(error) = outcome {
                listener.fail(&error);
                if failure.is_none() {
                    failure = Some(ListenFailure::new(listener, error));
                }
            }
        }

        match failure {
            Some(failure) => {
                self.shutdown_all();
                Err(failure)
            }
            None => {
                info!(
                    target: LISTENER_TARGET,
                    count = self.listeners.len(),
                    "all listeners bound"
                );
                Ok(())
            }
        }
    }

    /// Attaches the application handler for `name`.
    ///
    /// # Errors
    /// Returns [`ListenerError::NotListening`] for unknown listeners and
    /// propagates attach failures.
    pub fn attach(
        &mut self,
        name: &str,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<(), ListenerError> {
        let listener = self
            .listeners
            .get_mut(name)
            .ok_or_else(|| ListenerError::NotListening {
                listener: name.to_owned(),
            })?;
        listener.attach(handler)
    }

    /// Looks up a listener by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Listener> {
        self.listeners.get(name)
    }

    /// Whether `name` is managed.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.listeners.contains_key(name)
    }

    /// Iterates over listeners in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Listener> {
        self.listeners.values()
    }

    /// Number of managed listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is managed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Stops every accept loop.
    pub fn shutdown_all(&mut self) {
        for listener in self.listeners.values_mut() {
            if let Err(error) = listener.shutdown() {
                warn!(
                    target: LISTENER_TARGET,
                    listener = %listener.name(),
                    error = %error,
                    "listener shutdown failed"
                );
            }
        }
    }
}

impl Drop for ListenerManager {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
