//! Drops root privileges after privileged ports are bound.
//!
//! Supplementary groups go first, then the primary group, then the user:
//! once the user id changes the process may no longer alter its groups.

use axon_config::{Config, IdentityError};
use nix::errno::Errno;
use nix::unistd::{Gid, Uid, User};
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// System calls used to change the process identity.
pub trait PrivilegeOps: Send + Sync {
    /// Replaces the supplementary group list.
    fn set_groups(&self, gids: &[u32]) -> Result<(), PrivilegeError>;
    /// Sets the real and effective group id.
    fn set_gid(&self, gid: u32) -> Result<(), PrivilegeError>;
    /// Sets the real and effective user id.
    fn set_uid(&self, uid: u32) -> Result<(), PrivilegeError>;
    /// Primary group of the account owning `uid`.
    fn primary_gid(&self, uid: u32) -> Result<u32, PrivilegeError>;
}

/// Errors raised while changing the process identity.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// A configured user or group name did not resolve.
    #[error(transparent)]
    Identity(#[from] IdentityError),
    /// The target user id has no account entry.
    #[error("no account entry for uid {uid}")]
    UnknownUid {
        /// User id looked up.
        uid: u32,
    },
    /// A system call failed.
    #[error("{call}({id}) failed: {source}")]
    Call {
        /// Name of the failing call.
        call: &'static str,
        /// Identifier passed to the call.
        id: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

/// Identity switch resolved from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivilegeDrop {
    uid: Option<u32>,
    gid: Option<u32>,
    groups: Option<Vec<u32>>,
}

impl PrivilegeDrop {
    /// Resolves `uid`, `gid` and `gids` against the account database.
    pub fn from_config(config: &Config) -> Result<Self, PrivilegeError> {
        let uid = u32::try_from(config.get_uid()?).ok();
        let gid = u32::try_from(config.get_gid()?).ok();
        let groups = config.get_gids()?;
        Ok(Self { uid, gid, groups })
    }

    /// Builds a switch from numeric ids.
    #[must_use]
    pub const fn new(uid: Option<u32>, gid: Option<u32>, groups: Option<Vec<u32>>) -> Self {
        Self { uid, gid, groups }
    }

    /// Whether nothing needs to change.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.uid.is_none() && self.gid.is_none() && self.groups.is_none()
    }

    /// Applies the switch through `ops`.
    ///
    /// Without explicit supplementary groups, the inherited list is cleared
    /// whenever the group or user changes. Without an explicit group, the
    /// target user's primary group is used.
    pub fn apply(&self, ops: &dyn PrivilegeOps) -> Result<(), PrivilegeError> {
        match &self.groups {
            Some(groups) => ops.set_groups(groups)?,
            None if self.gid.is_some() || self.uid.is_some() => ops.set_groups(&[])?,
            None => {}
        }

        let gid = match (self.gid, self.uid) {
            (Some(gid), _) => Some(gid),
            (None, Some(uid)) => Some(ops.primary_gid(uid)?),
            (None, None) => None,
        };
        if let Some(gid) = gid {
            ops.set_gid(gid)?;
        }

        if let Some(uid) = self.uid {
            ops.set_uid(uid)?;
        }

        if !self.is_empty() {
            info!(
                target: PROCESS_TARGET,
                uid = ?self.uid,
                gid = ?gid,
                groups = ?self.groups,
                "process identity changed"
            );
        }
        Ok(())
    }
}

/// Privilege operations backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPrivileges;

impl PrivilegeOps for SystemPrivileges {
    #[cfg(not(target_os = "macos"))]
    fn set_groups(&self, gids: &[u32]) -> Result<(), PrivilegeError> {
        let groups: Vec<Gid> = gids.iter().copied().map(Gid::from_raw).collect();
        nix::unistd::setgroups(&groups).map_err(|source| PrivilegeError::Call {
            call: "setgroups",
            id: u32::try_from(gids.len()).unwrap_or(u32::MAX),
            source,
        })
    }

    #[cfg(target_os = "macos")]
    fn set_groups(&self, _gids: &[u32]) -> Result<(), PrivilegeError> {
        Ok(())
    }

    fn set_gid(&self, gid: u32) -> Result<(), PrivilegeError> {
        nix::unistd::setgid(Gid::from_raw(gid)).map_err(|source| PrivilegeError::Call {
            call: "setgid",
            id: gid,
            source,
        })
    }

    fn set_uid(&self, uid: u32) -> Result<(), PrivilegeError> {
        nix::unistd::setuid(Uid::from_raw(uid)).map_err(|source| PrivilegeError::Call {
            call: "setuid",
            id: uid,
            source,
        })
    }

    fn primary_gid(&self, uid: u32) -> Result<u32, PrivilegeError> {
        match User::from_uid(Uid::from_raw(uid)) {
            Ok(Some(user)) => Ok(user.gid.as_raw()),
            Ok(None) => Err(PrivilegeError::UnknownUid { uid }),
            Err(source) => Err(PrivilegeError::Call {
                call: "getpwuid",
                id: uid,
                source,
            }),
        }
    }
}
