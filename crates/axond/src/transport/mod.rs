//! Listener manager for the daemon's network endpoints.
//!
//! Every configured listener binds on its own thread ([`Listener::listen`])
//! and starts accepting as soon as the bind completes, before the
//! application has built its handlers. Connections accepted in between wait
//! in the listener's [`FactoryProxy`] until [`Listener::attach`] supplies the
//! real handler.

mod errors;
mod handler;
mod listener;
#[cfg(test)]
mod listener_tests;
mod manager;
mod proxy;
#[cfg(test)]
pub(crate) mod test_utils;
mod tls;

pub use self::errors::ListenerError;
pub use self::handler::{ConnectionHandler, ConnectionStream, Datagram, EchoHandler};
pub use self::listener::{BoundSocket, Listener, ListenerHandle, ListenerState, PendingBind};
pub use self::manager::{ListenFailure, ListenerManager};
pub use self::proxy::{Delivery, FactoryProxy};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
