//! Boot and service runtime for axon daemons.
//!
//! A daemon is an [`Application`] run through [`run`]: the configuration is
//! loaded with [`axon_config`], then [`Boot`] detaches the process, writes the
//! pid file, configures logging, applies resource limits, binds every
//! listener, drops privileges and opens the configured stores. Connections
//! that arrive before the application is ready wait in a per-listener
//! [`FactoryProxy`] and are handed over once [`Application::init`] returns
//! its handlers.
//!
//! Failures map to process exit codes (see [`exit`]); a listener that cannot
//! bind exits with a code naming its port.

mod app;
mod boot;
pub mod exit;
pub mod limits;
pub mod process;
mod reactor;
pub mod stores;
pub mod telemetry;
pub mod transport;
mod worker;

pub use app::{Application, ApplicationError, ServiceContext, ServiceHandlers};
pub use boot::{
    ApplyMode, Boot, BootDeps, BootError, BootReporter, BootStage, LimitDeps, ProcessDeps,
    RunPlan, StructuredBootReporter, run, run_with,
};
pub use reactor::is_reactor_thread;
pub use transport::{ConnectionHandler, EchoHandler, FactoryProxy};
pub use worker::{WorkerError, WorkerPool};

#[cfg(test)]
mod tests;
