use axon_config::{LimitKind, Limits};
use nix::sys::resource::{Resource, getrlimit, setrlimit};
use tracing::{debug, warn};

use super::{LIMITS_TARGET, LimitsError};

/// Which half of an rlimit pair a [`Limits`] block sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    /// The value enforced by the kernel, raisable up to the hard limit.
    Soft,
    /// The ceiling for the soft limit.
    Hard,
}

/// Access to the process rlimits.
pub trait RlimitBackend: Send + Sync {
    /// Current `(soft, hard)` pair, or `None` when the platform lacks the
    /// limit.
    fn get(&self, kind: LimitKind) -> Result<Option<(u64, u64)>, LimitsError>;

    /// Replaces the `(soft, hard)` pair.
    fn set(&self, kind: LimitKind, soft: u64, hard: u64) -> Result<(), LimitsError>;
}

/// Applies every configured limit of `limits` to `scope`.
///
/// Lowering a hard limit below the current soft limit lowers the soft limit
/// with it. Returns the number of limits changed.
pub fn apply_static(
    limits: &Limits,
    scope: LimitScope,
    backend: &dyn RlimitBackend,
) -> Result<usize, LimitsError> {
    let mut applied = 0;
    for (kind, value) in limits.configured() {
        let Some(native) = kind.to_native(value) else {
            warn!(
                target: LIMITS_TARGET,
                limit = %kind,
                value,
                "ignoring negative resource limit"
            );
            continue;
        };
        let Some((soft, hard)) = backend.get(kind)? else {
            warn!(
                target: LIMITS_TARGET,
                limit = %kind,
                "resource limit unsupported on this platform"
            );
            continue;
        };
        let (new_soft, new_hard) = match scope {
            LimitScope::Soft => (native, hard),
            LimitScope::Hard => (soft.min(native), native),
        };
        backend.set(kind, new_soft, new_hard)?;
        debug!(
            target: LIMITS_TARGET,
            limit = %kind,
            ?scope,
            was_soft = soft,
            was_hard = hard,
            soft = new_soft,
            hard = new_hard,
            "resource limit applied"
        );
        applied += 1;
    }
    Ok(applied)
}

/// Backend calling `getrlimit` and `setrlimit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRlimits;

impl SystemRlimits {
    fn resource(kind: LimitKind) -> Option<Resource> {
        match kind {
            LimitKind::Core => Some(Resource::RLIMIT_CORE),
            LimitKind::Cpu => Some(Resource::RLIMIT_CPU),
            LimitKind::Fsize => Some(Resource::RLIMIT_FSIZE),
            LimitKind::Data => Some(Resource::RLIMIT_DATA),
            LimitKind::Stack => Some(Resource::RLIMIT_STACK),
            LimitKind::Nofile => Some(Resource::RLIMIT_NOFILE),
            #[cfg(target_os = "linux")]
            LimitKind::Rss => Some(Resource::RLIMIT_RSS),
            #[cfg(target_os = "linux")]
            LimitKind::Nproc => Some(Resource::RLIMIT_NPROC),
            #[cfg(target_os = "linux")]
            LimitKind::Memlock => Some(Resource::RLIMIT_MEMLOCK),
            #[cfg(target_os = "linux")]
            LimitKind::As => Some(Resource::RLIMIT_AS),
            #[cfg(not(target_os = "linux"))]
            LimitKind::Rss | LimitKind::Nproc | LimitKind::Memlock | LimitKind::As => None,
        }
    }
}

impl RlimitBackend for SystemRlimits {
    fn get(&self, kind: LimitKind) -> Result<Option<(u64, u64)>, LimitsError> {
        let Some(resource) = Self::resource(kind) else {
            return Ok(None);
        };
        getrlimit(resource)
            .map(|(soft, hard)| Some((soft, hard)))
            .map_err(|source| LimitsError::Get { kind, source })
    }

    fn set(&self, kind: LimitKind, soft: u64, hard: u64) -> Result<(), LimitsError> {
        let Some(resource) = Self::resource(kind) else {
            return Ok(());
        };
        setrlimit(resource, soft, hard).map_err(|source| LimitsError::Set {
            kind,
            soft,
            hard,
            source,
        })
    }
}
