use std::io;

use axon_config::{LimitAction, LimitKind};
use nix::errno::Errno;
use thiserror::Error;

/// Errors raised while enforcing resource limits.
#[derive(Debug, Error)]
pub enum LimitsError {
    /// Reading the current limit failed.
    #[error("getrlimit({kind}) failed: {source}")]
    Get {
        /// Limit being read.
        kind: LimitKind,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Setting the new limit failed.
    #[error("setrlimit({kind}, soft={soft}, hard={hard}) failed: {source}")]
    Set {
        /// Limit being changed.
        kind: LimitKind,
        /// Requested soft value.
        soft: u64,
        /// Requested hard value.
        hard: u64,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// The memory sampler could not be created or queried.
    #[error("memory sampler unavailable: {reason}")]
    Sampler {
        /// Description of the failure.
        reason: String,
    },
    /// Sending the limit action to the process failed.
    #[error("failed to deliver {action} to self: {source}")]
    Signal {
        /// Action being delivered.
        action: LimitAction,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Starting the watchdog thread failed.
    #[error("failed to start watchdog for {kind}: {source}")]
    Spawn {
        /// Limit being watched.
        kind: LimitKind,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
