use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while preparing the process environment.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Changing into the working directory failed.
    #[error("failed to change working directory to '{path}': {source}")]
    WorkingDirectory {
        /// Target directory.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the PID file failed.
    #[error("failed to write pid file '{path}': {source}")]
    PidWrite {
        /// PID file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
