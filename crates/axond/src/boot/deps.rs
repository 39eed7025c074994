//! Collaborators the boot sequence talks to.

use std::sync::Arc;

use tracing::warn;

use super::{BOOT_TARGET, BootReporter, StructuredBootReporter};
use crate::limits::{
    MemorySampler, RlimitBackend, SelfSignaller, SysinfoSampler, SystemRlimits, SystemSignaller,
};
use crate::process::{
    Daemonizer, PrivilegeOps, ShutdownSignal, SystemDaemonizer, SystemPrivileges,
    SystemShutdownSignal,
};
use crate::stores::StoreConnector;

/// Process-level collaborators.
pub struct ProcessDeps {
    /// Detaches from the terminal.
    pub daemonizer: Arc<dyn Daemonizer>,
    /// Changes the process identity.
    pub privileges: Arc<dyn PrivilegeOps>,
    /// Blocks until shutdown is requested.
    pub shutdown: Arc<dyn ShutdownSignal>,
}

/// Resource limit collaborators.
pub struct LimitDeps {
    /// Reads and writes rlimits.
    pub rlimits: Arc<dyn RlimitBackend>,
    /// Memory readings for timed limits; `None` disables them.
    pub sampler: Option<Arc<dyn MemorySampler>>,
    /// Delivers timed limit actions.
    pub signaller: Arc<dyn SelfSignaller>,
}

/// Everything [`Boot`](super::Boot) needs besides the configuration.
pub struct BootDeps {
    /// Process control.
    pub process: ProcessDeps,
    /// Resource limits.
    pub limits: LimitDeps,
    /// Opens stores. When `None`, a
    /// [`SystemConnector`](crate::stores::SystemConnector) is started at the
    /// store stage, after the process has been daemonised.
    pub connector: Option<Box<dyn StoreConnector>>,
    /// Receives boot events.
    pub reporter: Arc<dyn BootReporter>,
}

impl BootDeps {
    /// Production collaborators.
    #[must_use]
    pub fn system() -> Self {
        let sampler = SysinfoSampler::new()
            .inspect_err(|error| {
                warn!(
                    target: BOOT_TARGET,
                    error = %error,
                    "memory sampler unavailable"
                );
            })
            .ok()
            .map(|sampler| Arc::new(sampler) as Arc<dyn MemorySampler>);
        Self {
            process: ProcessDeps {
                daemonizer: Arc::new(SystemDaemonizer::new()),
                privileges: Arc::new(SystemPrivileges),
                shutdown: Arc::new(SystemShutdownSignal::new()),
            },
            limits: LimitDeps {
                rlimits: Arc::new(SystemRlimits),
                sampler,
                signaller: Arc::new(SystemSignaller),
            },
            connector: None,
            reporter: Arc::new(StructuredBootReporter::new()),
        }
    }
}

impl std::fmt::Debug for BootDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootDeps")
            .field("sampler", &self.limits.sampler.is_some())
            .field("connector", &self.connector.is_some())
            .finish_non_exhaustive()
    }
}
