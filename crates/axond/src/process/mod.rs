//! Process-level collaborators: daemonisation, pid files, privilege drop and
//! shutdown signals.

pub(crate) mod daemonizer;
mod errors;
mod pid;
pub(crate) mod privileges;
pub(crate) mod shutdown;

pub use daemonizer::{DaemonizeError, Daemonizer, SystemDaemonizer};
pub use errors::ProcessError;
pub use pid::PidFile;
pub use privileges::{PrivilegeDrop, PrivilegeError, PrivilegeOps, SystemPrivileges};
pub use shutdown::{
    SHUTDOWN_SIGNALS, ShutdownCause, ShutdownError, ShutdownSignal, SystemShutdownSignal,
};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
