use axon_config::ConfigError;
use thiserror::Error;

use crate::app::ApplicationError;
use crate::exit::{EXIT_RESOURCE_LIMIT, EXIT_UNKNOWN};
use crate::limits::LimitsError;
use crate::process::{DaemonizeError, PrivilegeError, ProcessError, ShutdownError};
use crate::stores::StoreError;
use crate::telemetry::TelemetryError;
use crate::transport::{ListenFailure, ListenerError};
use crate::worker::WorkerError;

/// Errors that abort the boot sequence.
#[derive(Debug, Error)]
pub enum BootError {
    /// Loading or persisting the configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Detaching from the terminal failed.
    #[error("failed to daemonise: {0}")]
    Daemonize(#[from] DaemonizeError),
    /// Preparing the process environment failed.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Logging could not be configured.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The worker pool could not start.
    #[error(transparent)]
    Worker(#[from] WorkerError),
    /// A resource limit could not be enforced.
    #[error(transparent)]
    Limits(#[from] LimitsError),
    /// A listener failed to bind.
    #[error(transparent)]
    Listen(#[from] ListenFailure),
    /// A handler could not be attached to its listener.
    #[error("failed to attach handler to listener '{listener}': {source}")]
    Attach {
        /// Listener name.
        listener: String,
        /// Underlying failure.
        #[source]
        source: ListenerError,
    },
    /// Changing the process identity failed.
    #[error("failed to drop privileges: {0}")]
    Privileges(#[from] PrivilegeError),
    /// A store could not be opened.
    #[error(transparent)]
    Stores(#[from] StoreError),
    /// Application code failed.
    #[error(transparent)]
    Application(#[from] ApplicationError),
    /// Waiting for the shutdown signal failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

impl BootError {
    /// Process exit code for this failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Listen(failure) => failure.exit_code(),
            Self::Limits(_) => EXIT_RESOURCE_LIMIT,
            _ => EXIT_UNKNOWN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_config::TransportKind;
    use rstest::rstest;

    #[rstest]
    fn listener_failures_carry_the_port() {
        let error = BootError::Listen(ListenFailure {
            listener: "web".to_owned(),
            transport: TransportKind::Udp4,
            port: 5353,
            source: ListenerError::ThreadPanic,
        });
        assert_eq!(error.exit_code(), 205_353);
    }

    #[rstest]
    fn limit_failures_use_the_resource_code() {
        let error = BootError::Limits(LimitsError::Sampler {
            reason: "no procfs".to_owned(),
        });
        assert_eq!(error.exit_code(), 201);
    }

    #[rstest]
    fn other_failures_are_unknown() {
        let error = BootError::Application(ApplicationError::new("boom"));
        assert_eq!(error.exit_code(), 1);
    }
}
