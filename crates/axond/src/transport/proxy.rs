//! Placeholder handler that stands in for the application until it is ready.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tracing::{debug, warn};

use super::{ConnectionHandler, ConnectionStream, Datagram, LISTENER_TARGET, ListenerError};

/// Outcome of handing a connection or datagram to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Passed to the attached handler.
    Dispatched,
    /// Buffered until a handler is attached.
    Queued,
    /// Discarded because the buffer is full.
    Dropped,
}

enum Parked {
    Stream(ConnectionStream),
    Datagram(Datagram),
}

enum ProxyState {
    Pending {
        started: bool,
        queue: VecDeque<Parked>,
    },
    Bound(Arc<dyn ConnectionHandler>),
}

/// Per-listener connection factory with two states.
///
/// While pending, the proxy remembers whether the listener has started and
/// buffers up to `capacity` connections. [`FactoryProxy::attach`] swaps in
/// the real handler, replays the start signal and drains the buffer.
pub struct FactoryProxy {
    listener: String,
    capacity: usize,
    state: Mutex<ProxyState>,
}

impl FactoryProxy {
    /// Creates a pending proxy for `listener` buffering at most `capacity`
    /// connections.
    #[must_use]
    pub fn new(listener: impl Into<String>, capacity: usize) -> Self {
        Self {
            listener: listener.into(),
            capacity,
            state: Mutex::new(ProxyState::Pending {
                started: false,
                queue: VecDeque::new(),
            }),
        }
    }

    /// Name of the listener this proxy serves.
    #[must_use]
    pub fn listener(&self) -> &str {
        &self.listener
    }

    /// Whether a real handler has been attached.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        matches!(*self.lock(), ProxyState::Bound(_))
    }

    /// Number of connections and datagrams waiting for a handler.
    #[must_use]
    pub fn queued(&self) -> usize {
        match &*self.lock() {
            ProxyState::Pending { queue, .. } => queue.len(),
            ProxyState::Bound(_) => 0,
        }
    }

    /// Records that the listener started accepting.
    pub fn started(&self) {
        let handler = {
            let mut state = self.lock();
            match &mut *state {
                ProxyState::Pending { started, .. } => {
                    *started = true;
                    None
                }
                ProxyState::Bound(handler) => Some(Arc::clone(handler)),
            }
        };
        if let Some(handler) = handler {
            handler.started(&self.listener);
        }
    }

    /// Records that the listener stopped accepting. Buffered connections are
    /// closed.
    pub fn stopped(&self) {
        let handler = {
            let mut state = self.lock();
            match &mut *state {
                ProxyState::Pending { started, queue } => {
                    *started = false;
                    if !queue.is_empty() {
                        debug!(
                            target: LISTENER_TARGET,
                            listener = %self.listener,
                            dropped = queue.len(),
                            "closing connections that never reached a handler"
                        );
                        queue.clear();
                    }
                    None
                }
                ProxyState::Bound(handler) => Some(Arc::clone(handler)),
            }
        };
        if let Some(handler) = handler {
            handler.stopped(&self.listener);
        }
    }

    /// Hands an accepted stream to the handler, or buffers it.
    pub fn on_connection(&self, stream: ConnectionStream) -> Delivery {
        self.deliver(Parked::Stream(stream))
    }

    /// Hands a received datagram to the handler, or buffers it.
    pub fn on_datagram(&self, datagram: Datagram) -> Delivery {
        self.deliver(Parked::Datagram(datagram))
    }

    /// Installs the real handler.
    ///
    /// # Errors
    /// Returns [`ListenerError::AlreadyAttached`] when a handler is already
    /// bound.
    pub fn attach(&self, handler: Arc<dyn ConnectionHandler>) -> Result<(), ListenerError> {
        let (started, queue) = {
            let mut state = self.lock();
            let ProxyState::Pending { started, queue } = &mut *state else {
                return Err(ListenerError::AlreadyAttached {
                    listener: self.listener.clone(),
                });
            };
            let parked = (*started, std::mem::take(queue));
            *state = ProxyState::Bound(Arc::clone(&handler));
            parked
        };

        if started {
            handler.started(&self.listener);
        }
        if !queue.is_empty() {
            debug!(
                target: LISTENER_TARGET,
                listener = %self.listener,
                queued = queue.len(),
                "draining connections accepted before attach"
            );
        }
        for parked in queue {
            self.dispatch(&handler, parked);
        }
        Ok(())
    }

    fn deliver(&self, parked: Parked) -> Delivery {
        let handler = {
            let mut state = self.lock();
            match &mut *state {
                ProxyState::Bound(handler) => Arc::clone(handler),
                ProxyState::Pending { queue, .. } => {
                    if queue.len() < self.capacity {
                        queue.push_back(parked);
                        return Delivery::Queued;
                    }
                    warn!(
                        target: LISTENER_TARGET,
                        listener = %self.listener,
                        capacity = self.capacity,
                        "connection dropped before a handler was attached"
                    );
                    return Delivery::Dropped;
                }
            }
        };
        self.dispatch(&handler, parked);
        Delivery::Dispatched
    }

    fn dispatch(&self, handler: &Arc<dyn ConnectionHandler>, parked: Parked) {
        match parked {
            Parked::Datagram(datagram) => handler.handle_datagram(datagram),
            Parked::Stream(stream) => {
                let handler = Arc::clone(handler);
                let spawned = thread::Builder::new()
                    .name(format!("{}-conn", self.listener))
                    .spawn(move || handler.handle(stream));
                if let Err(error) = spawned {
                    warn!(
                        target: LISTENER_TARGET,
                        listener = %self.listener,
                        error = %error,
                        "failed to spawn connection thread"
                    );
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProxyState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for FactoryProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryProxy")
            .field("listener", &self.listener)
            .field("capacity", &self.capacity)
            .field("bound", &self.is_bound())
            .finish()
    }
}
