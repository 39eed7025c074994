//! Scenario world for boot behaviour: a temporary daemon directory, a
//! configuration and the recording collaborators the boot talks to.

use std::net::TcpListener;
use std::sync::Arc;

use axon_config::{
    Config, DaemonFlavor, FileStoreConfig, ListenerConfig, NamedRegistry, ServerConfig,
    StoreConfig,
};
use camino::Utf8PathBuf;
use tempfile::TempDir;

use super::{ImmediateShutdown, RecordingBootReporter, RecordingDaemonizer, RecordingPrivileges};
use crate::boot::{ApplyMode, Boot, BootDeps, BootError, LimitDeps, ProcessDeps};
use crate::limits::{SystemRlimits, SystemSignaller};
use crate::stores::SystemConnector;

/// Collaborators with recording doubles for every process-level effect.
#[must_use]
pub fn test_deps(
    reporter: Arc<RecordingBootReporter>,
    daemonizer: Arc<RecordingDaemonizer>,
    privileges: Arc<RecordingPrivileges>,
) -> BootDeps {
    BootDeps {
        process: ProcessDeps {
            daemonizer,
            privileges,
            shutdown: Arc::new(ImmediateShutdown),
        },
        limits: LimitDeps {
            rlimits: Arc::new(SystemRlimits),
            sampler: None,
            signaller: Arc::new(SystemSignaller),
        },
        connector: Some(Box::new(
            SystemConnector::new(false).expect("database runtime"),
        )),
        reporter,
    }
}

/// Scenario world shared across boot steps.
pub struct BootWorld {
    dir: TempDir,
    /// Configuration the next boot applies.
    pub config: Config,
    /// Receives boot events.
    pub reporter: Arc<RecordingBootReporter>,
    /// Records daemonisation requests.
    pub daemonizer: Arc<RecordingDaemonizer>,
    /// Records identity changes.
    pub privileges: Arc<RecordingPrivileges>,
    boot: Option<Boot>,
    result: Option<Result<(), BootError>>,
    busy: Option<TcpListener>,
}

impl BootWorld {
    /// Builds a world whose daemon keeps its files in a temporary directory.
    #[must_use]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        Self {
            dir,
            config: Config {
                name: Some("bootd".to_owned()),
                ..Config::default()
            },
            reporter: Arc::new(RecordingBootReporter::default()),
            daemonizer: Arc::new(RecordingDaemonizer::default()),
            privileges: Arc::new(RecordingPrivileges::default()),
            boot: None,
            result: None,
            busy: None,
        }
    }

    /// Directory holding the daemon's files.
    #[must_use]
    pub fn base(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().to_path_buf()).expect("utf8 temp dir")
    }

    /// Configures one TCP listener, a pid file and a file store.
    pub fn configure_service(&mut self) {
        let base = self.base();
        self.config.pid_file = Some(base.join("bootd.pid"));
        self.config.services = NamedRegistry::from_entries([ListenerConfig::Server(
            ServerConfig::tcp("api", "127.0.0.1", 0),
        )])
        .expect("unique listener names");
        self.config.stores = NamedRegistry::from_entries([StoreConfig::FileStore(
            FileStoreConfig {
                name: "uploads".to_owned(),
                path: base.join("uploads"),
                ..FileStoreConfig::default()
            },
        )])
        .expect("unique store names");
    }

    /// Requests daemonisation, which needs a log file.
    pub fn detach(&mut self) {
        self.config.daemonize = true;
        self.config.logger_dest = Some(self.base().join("bootd.log"));
    }

    /// Occupies a port and points the listener at it.
    pub fn occupy_listener_port(&mut self) {
        let busy = TcpListener::bind("127.0.0.1:0").expect("bind busy port");
        let port = busy.local_addr().expect("busy address").port();
        self.busy = Some(busy);
        let entry = self
            .config
            .services
            .get_mut("api")
            .expect("listener configured");
        entry.server_mut().port = port;
    }

    /// Port held open by [`BootWorld::occupy_listener_port`].
    #[must_use]
    pub fn busy_port(&self) -> Option<u16> {
        self.busy
            .as_ref()
            .and_then(|busy| busy.local_addr().ok())
            .map(|addr| addr.port())
    }

    /// Runs the boot stages for `mode` once.
    pub fn boot(&mut self, mode: ApplyMode) {
        let deps = test_deps(
            Arc::clone(&self.reporter),
            Arc::clone(&self.daemonizer),
            Arc::clone(&self.privileges),
        );
        let mut boot = Boot::new(self.config.clone(), DaemonFlavor::Service, deps);
        self.result = Some(boot.apply(mode));
        self.boot = Some(boot);
    }

    /// The boot, once started.
    #[must_use]
    pub fn booted(&self) -> &Boot {
        self.boot.as_ref().expect("boot has run")
    }

    /// Error returned by the last boot.
    #[must_use]
    pub fn error(&self) -> Option<&BootError> {
        self.result.as_ref().and_then(|result| result.as_ref().err())
    }
}

impl Drop for BootWorld {
    fn drop(&mut self) {
        if let Some(mut boot) = self.boot.take() {
            boot.shutdown();
        }
    }
}
