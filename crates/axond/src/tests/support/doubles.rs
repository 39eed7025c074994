//! Process collaborators that record calls instead of touching the process.

use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use crate::process::{
    DaemonizeError, Daemonizer, PrivilegeError, PrivilegeOps, ShutdownCause, ShutdownError,
    ShutdownSignal,
};

/// Daemoniser that records the requested name and directory.
#[derive(Debug, Default)]
pub struct RecordingDaemonizer {
    calls: Mutex<Vec<(String, Utf8PathBuf)>>,
}

impl RecordingDaemonizer {
    /// Requests received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Utf8PathBuf)> {
        self.calls.lock().expect("daemonizer mutex poisoned").clone()
    }
}

impl Daemonizer for RecordingDaemonizer {
    fn daemonize(&self, name: &str, workdir: &Utf8Path) -> Result<(), DaemonizeError> {
        self.calls
            .lock()
            .expect("daemonizer mutex poisoned")
            .push((name.to_owned(), workdir.to_path_buf()));
        Ok(())
    }
}

/// Identity changes observed by [`RecordingPrivileges`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityCall {
    /// `setgroups`.
    Groups(Vec<u32>),
    /// `setgid`.
    Gid(u32),
    /// `setuid`.
    Uid(u32),
}

/// Privilege operations that record the requested identity changes.
#[derive(Debug, Default)]
pub struct RecordingPrivileges {
    calls: Mutex<Vec<IdentityCall>>,
}

impl RecordingPrivileges {
    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<IdentityCall> {
        self.calls.lock().expect("privileges mutex poisoned").clone()
    }

    fn record(&self, call: IdentityCall) {
        self.calls
            .lock()
            .expect("privileges mutex poisoned")
            .push(call);
    }
}

impl PrivilegeOps for RecordingPrivileges {
    fn set_groups(&self, gids: &[u32]) -> Result<(), PrivilegeError> {
        self.record(IdentityCall::Groups(gids.to_vec()));
        Ok(())
    }

    fn set_gid(&self, gid: u32) -> Result<(), PrivilegeError> {
        self.record(IdentityCall::Gid(gid));
        Ok(())
    }

    fn set_uid(&self, uid: u32) -> Result<(), PrivilegeError> {
        self.record(IdentityCall::Uid(uid));
        Ok(())
    }

    fn primary_gid(&self, _uid: u32) -> Result<u32, PrivilegeError> {
        Ok(0)
    }
}

/// Shutdown signal that fires immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateShutdown;

impl ShutdownSignal for ImmediateShutdown {
    fn wait(&self) -> Result<ShutdownCause, ShutdownError> {
        Ok(ShutdownCause::Requested)
    }
}
