//! Detaches the daemon from its controlling terminal.

use std::ffi::OsStr;
use std::fs;

use camino::Utf8Path;
use daemonize_me::Daemon;
use thiserror::Error;
use tracing::{debug, info};

use super::PROCESS_TARGET;

/// Moves the daemon into the background.
pub trait Daemonizer: Send + Sync {
    /// Detaches the process into the background, continuing in the child
    /// with `workdir` as the current directory.
    fn daemonize(&self, name: &str, workdir: &Utf8Path) -> Result<(), DaemonizeError>;
}

/// Reasons the daemon could not detach.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// `fork`, `setsid` or the directory change failed.
    #[error("{0}")]
    System(#[from] daemonize_me::DaemonError),
    /// Threads do not survive `fork`, so daemonising must happen first.
    #[error("refusing to daemonise a process running {threads} threads")]
    Threaded {
        /// Threads observed in the process.
        threads: usize,
    },
    /// A detached daemon would lose every log line.
    #[error("refusing to daemonise without a log destination; set logger_dest")]
    MissingLogDestination,
}

/// Detaches with `daemonize-me`, refusing once threads are running.
#[derive(Debug, Default)]
pub struct SystemDaemonizer;

impl SystemDaemonizer {
    /// Production daemoniser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, name: &str, workdir: &Utf8Path) -> Result<(), DaemonizeError> {
        if let Some(threads) = thread_count()
            && threads > 1
        {
            return Err(DaemonizeError::Threaded { threads });
        }
        info!(
            target: PROCESS_TARGET,
            workdir = %workdir,
            "detaching from terminal"
        );
        Daemon::new()
            .work_dir(workdir.as_std_path())
            .name(OsStr::new(name))
            .start()?;
        debug!(
            target: PROCESS_TARGET,
            "detached; boot continues in the child"
        );
        Ok(())
    }
}

/// Threads of the current process, where the platform exposes them.
fn thread_count() -> Option<usize> {
    fs::read_dir("/proc/self/task").ok().map(Iterator::count)
}
