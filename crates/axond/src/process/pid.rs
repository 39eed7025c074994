use std::fs::{self, OpenOptions};
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use super::PROCESS_TARGET;
use super::errors::ProcessError;

/// PID file removed again when the guard drops.
#[derive(Debug)]
pub struct PidFile {
    path: Utf8PathBuf,
}

impl PidFile {
    /// Writes the current process id followed by a newline to `path`.
    pub fn write(path: &Utf8Path) -> Result<Self, ProcessError> {
        let pid = std::process::id();
        let to_error = |source: io::Error| ProcessError::PidWrite {
            path: path.to_path_buf(),
            source,
        };
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let mut file = options.open(path).map_err(to_error)?;
        writeln!(file, "{pid}").map_err(to_error)?;
        file.sync_all().map_err(to_error)?;
        info!(
            target: PROCESS_TARGET,
            pid,
            file = %path,
            "pid file written"
        );
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Location of the file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.path)
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(
                target: PROCESS_TARGET,
                file = %self.path,
                error = %error,
                "failed to remove pid file"
            );
        }
    }
}
