//! Boot orchestration.
//!
//! [`Boot::apply`] brings the process up in a fixed order: detach or change
//! directory, write the pid file, configure logging, apply resource limits,
//! bind listeners, drop privileges, then open stores. Privileges are dropped
//! only after every socket is bound so privileged ports remain reachable.
//! Each stage is reported through a [`BootReporter`].

mod deps;
mod errors;
mod reporter;
mod run;

use std::env;
use std::sync::Arc;

use axon_config::{Config, DEFAULT_STORE_NAME, DaemonFlavor, Named};
use camino::Utf8PathBuf;
use tracing::{debug, info, warn};

use crate::app::{ServiceContext, ServiceHandlers};
use crate::limits::{TimedEnforcement, Watchdog, apply_limits};
use crate::process::{DaemonizeError, PidFile, PrivilegeDrop, ProcessError, ShutdownCause};
use crate::stores::{StoreConnector, StoreManager, SystemConnector};
use crate::telemetry::{self, LoggingPlan, TelemetryHandle};
use crate::transport::ListenerManager;
use crate::worker::WorkerPool;

pub use deps::{BootDeps, LimitDeps, ProcessDeps};
pub use errors::BootError;
pub use reporter::{BootReporter, BootStage, StructuredBootReporter};
pub use run::{RunPlan, run, run_with};

pub(crate) const BOOT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::boot");

const WORKER_THREADS: usize = 2;
const WORKER_QUEUE: usize = 64;

/// Which stages [`Boot::apply`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Every stage; used when the daemon serves requests.
    Full,
    /// Logging and stores only; used by one-shot database tasks.
    Tooling,
}

enum Outcome {
    Done,
    Skipped(&'static str),
}

/// A daemon being brought up or torn down.
pub struct Boot {
    config: Config,
    flavour: DaemonFlavor,
    deps: BootDeps,
    pid_file: Option<PidFile>,
    telemetry: Option<TelemetryHandle>,
    pool: Option<Arc<WorkerPool>>,
    watchdogs: Vec<Watchdog>,
    listeners: ListenerManager,
    stores: Option<StoreManager>,
}

impl Boot {
    /// Prepares a boot of `config`; nothing is applied yet.
    #[must_use]
    pub fn new(config: Config, flavour: DaemonFlavor, deps: BootDeps) -> Self {
        Self {
            config,
            flavour,
            deps,
            pid_file: None,
            telemetry: None,
            pool: None,
            watchdogs: Vec::new(),
            listeners: ListenerManager::default(),
            stores: None,
        }
    }

    /// Runs the stages selected by `mode`.
    ///
    /// # Errors
    /// Stops at the first failing stage and returns its error; the failure
    /// has already been reported.
    pub fn apply(&mut self, mode: ApplyMode) -> Result<(), BootError> {
        info!(
            target: BOOT_TARGET,
            ?mode,
            daemon = self.config.name.as_deref().unwrap_or_default(),
            "applying configuration"
        );
        if mode == ApplyMode::Full {
            if self.config.daemonize {
                self.stage(BootStage::Daemonize, Self::daemonize)?;
            } else {
                self.stage(BootStage::WorkingDirectory, Self::change_directory)?;
            }
            self.stage(BootStage::PidFile, Self::write_pid)?;
        }
        self.stage(BootStage::Logging, Self::configure_logging)?;
        if mode == ApplyMode::Full {
            self.stage(BootStage::Limits, Self::enforce_limits)?;
            self.stage(BootStage::Listeners, Self::bind_listeners)?;
            self.stage(BootStage::Privileges, Self::drop_privileges)?;
        }
        self.stage(BootStage::Stores, Self::open_stores)
    }

    fn stage(
        &mut self,
        stage: BootStage,
        op: fn(&mut Self) -> Result<Outcome, BootError>,
    ) -> Result<(), BootError> {
        let reporter = Arc::clone(&self.deps.reporter);
        reporter.stage_starting(stage);
        match op(self) {
            Ok(Outcome::Done) => {
                reporter.stage_completed(stage);
                Ok(())
            }
            Ok(Outcome::Skipped(reason)) => {
                reporter.stage_skipped(stage, reason);
                Ok(())
            }
            Err(error) => {
                reporter.stage_failed(stage, &error);
                Err(error)
            }
        }
    }

    fn daemonize(&mut self) -> Result<Outcome, BootError> {
        if self.config.logger_dest.is_none() {
            return Err(DaemonizeError::MissingLogDestination.into());
        }
        let name = self.config.require_name()?;
        let workdir = self
            .config
            .workdir
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from("/"));
        self.deps.process.daemonizer.daemonize(name, &workdir)?;
        Ok(Outcome::Done)
    }

    fn change_directory(&mut self) -> Result<Outcome, BootError> {
        let Some(workdir) = &self.config.workdir else {
            return Ok(Outcome::Skipped("no working directory configured"));
        };
        env::set_current_dir(workdir).map_err(|source| ProcessError::WorkingDirectory {
            path: workdir.clone(),
            source,
        })?;
        debug!(target: BOOT_TARGET, workdir = %workdir, "working directory changed");
        Ok(Outcome::Done)
    }

    fn write_pid(&mut self) -> Result<Outcome, BootError> {
        let Some(path) = &self.config.pid_file else {
            return Ok(Outcome::Skipped("no pid file configured"));
        };
        self.pid_file = Some(PidFile::write(path)?);
        Ok(Outcome::Done)
    }

    fn configure_logging(&mut self) -> Result<Outcome, BootError> {
        if self.telemetry.is_some() {
            return Ok(Outcome::Skipped("logging already configured"));
        }
        let name = self.config.require_name()?;
        let pool = Arc::new(WorkerPool::new(
            &format!("{name}-worker"),
            WORKER_THREADS,
            WORKER_QUEUE,
        )?);
        let plan = LoggingPlan::from_config(&self.config);
        self.telemetry = Some(telemetry::initialise(&plan, Some(Arc::clone(&pool)))?);
        self.pool = Some(pool);
        Ok(Outcome::Done)
    }

    fn enforce_limits(&mut self) -> Result<Outcome, BootError> {
        if self.config.limits.is_empty() {
            return Ok(Outcome::Skipped("no resource limits configured"));
        }
        let limits = &self.deps.limits;
        let timed = limits
            .sampler
            .clone()
            .zip(self.pool.clone())
            .map(|(sampler, pool)| TimedEnforcement {
                sampler,
                signaller: Arc::clone(&limits.signaller),
                pool,
            });
        let watchdogs = apply_limits(&self.config.limits, limits.rlimits.as_ref(), timed.as_ref())?;
        self.watchdogs.extend(watchdogs);
        Ok(Outcome::Done)
    }

    fn bind_listeners(&mut self) -> Result<Outcome, BootError> {
        self.listeners = ListenerManager::from_config(&self.config.services);
        if self.listeners.is_empty() {
            return Ok(Outcome::Skipped("no listeners configured"));
        }
        self.listeners.listen_all()?;
        Ok(Outcome::Done)
    }

    fn drop_privileges(&mut self) -> Result<Outcome, BootError> {
        let switch = PrivilegeDrop::from_config(&self.config)?;
        if switch.is_empty() {
            return Ok(Outcome::Skipped("no user or group configured"));
        }
        switch.apply(self.deps.process.privileges.as_ref())?;
        Ok(Outcome::Done)
    }

    fn open_stores(&mut self) -> Result<Outcome, BootError> {
        if !self.flavour.has_stores() {
            return Ok(Outcome::Skipped("daemon flavour has no stores"));
        }
        if self.stores.is_some() {
            return Ok(Outcome::Skipped("stores already open"));
        }
        let connector: Box<dyn StoreConnector> = match self.deps.connector.take() {
            Some(connector) => connector,
            None => Box::new(SystemConnector::new(self.config.debug_reactor)?),
        };
        let mut stores = StoreManager::new(self.config.stores.clone(), connector);
        stores.apply_all()?;
        match self.config.main_store.as_deref() {
            Some(name) => stores.bind_main(name)?,
            None if stores.is_open(DEFAULT_STORE_NAME) => stores.bind_main(DEFAULT_STORE_NAME)?,
            None => debug!(target: BOOT_TARGET, "no main store configured"),
        }
        self.stores = Some(stores);
        Ok(Outcome::Done)
    }

    /// View handed to application code.
    #[must_use]
    pub fn context(&self) -> ServiceContext<'_> {
        ServiceContext::new(&self.config, &self.listeners, self.stores.as_ref())
    }

    /// Applied configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Listeners bound by [`Boot::apply`].
    #[must_use]
    pub const fn listeners(&self) -> &ListenerManager {
        &self.listeners
    }

    /// Stores opened by [`Boot::apply`].
    #[must_use]
    pub const fn stores(&self) -> Option<&StoreManager> {
        self.stores.as_ref()
    }

    /// Attaches application handlers to their listeners.
    ///
    /// Handlers for disabled or unknown listeners are skipped. Returns the
    /// number of handlers attached.
    ///
    /// # Errors
    /// Returns [`BootError::Attach`] when a listener refuses its handler.
    pub fn attach(&mut self, handlers: ServiceHandlers) -> Result<usize, BootError> {
        let mut attached = 0;
        for (name, handler) in handlers {
            if self
                .config
                .services
                .get(&name)
                .is_some_and(Named::is_disabled)
            {
                info!(target: BOOT_TARGET, listener = %name, "service disabled; handler not attached");
                continue;
            }
            if !self.listeners.contains(&name) {
                warn!(target: BOOT_TARGET, listener = %name, "no listener for handler");
                continue;
            }
            self.listeners
                .attach(&name, handler)
                .map_err(|source| BootError::Attach {
                    listener: name.clone(),
                    source,
                })?;
            attached += 1;
        }
        Ok(attached)
    }

    /// Blocks until a shutdown signal arrives.
    ///
    /// # Errors
    /// Returns [`BootError::Shutdown`] when signal handlers cannot be
    /// installed.
    pub fn wait_for_shutdown(&self) -> Result<ShutdownCause, BootError> {
        let cause = self.deps.process.shutdown.wait()?;
        info!(
            target: BOOT_TARGET,
            ?cause,
            signal = cause.signal_name().unwrap_or_default(),
            "shutdown requested"
        );
        Ok(cause)
    }

    /// Stops listeners and watchdogs, closes stores and removes the pid file.
    pub fn shutdown(&mut self) {
        self.listeners.shutdown_all();
        for watchdog in self.watchdogs.drain(..) {
            watchdog.stop();
        }
        if let Some(mut stores) = self.stores.take() {
            stores.close_all();
        }
        if let Some(pool) = self.pool.take()
            && let Ok(mut pool) = Arc::try_unwrap(pool)
        {
            pool.shutdown();
        }
        self.pid_file.take();
        self.deps.reporter.stopped();
    }
}

impl std::fmt::Debug for Boot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Boot")
            .field("flavour", &self.flavour)
            .field("listeners", &self.listeners)
            .field("stores", &self.stores)
            .field("watchdogs", &self.watchdogs.len())
            .finish_non_exhaustive()
    }
}
