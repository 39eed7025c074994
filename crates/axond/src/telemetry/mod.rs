//! Structured telemetry initialisation for the daemon.
//!
//! Logging is configured exactly once per process. The filter comes from the
//! configured loggers and per-subsystem switches (see [`directives`]); output
//! goes to stderr or to a [`RotatingFile`].

mod filter;
mod rotation;
mod timer;

use std::io::{self, IsTerminal};
use std::sync::{Arc, Mutex};

use axon_config::{Compression, Config, LogFormat, RotationPeriod};
use camino::Utf8PathBuf;
use nix::errno::Errno;
use nix::unistd::{Gid, Uid};
use once_cell::sync::OnceCell;
use tracing::{Subscriber, debug, info, subscriber::SetGlobalDefaultError, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::limits::{MemorySampler, SysinfoSampler};
use crate::worker::WorkerPool;

pub use filter::directives;
pub use rotation::{RotatingFile, gzip_file, rotated_name, rotation_due};

use timer::LogTimer;

pub(crate) const TELEMETRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::telemetry");

static TELEMETRY_GUARD: OnceCell<bool> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle {
    installed: bool,
}

impl TelemetryHandle {
    /// Whether this process runs the daemon's own subscriber.
    #[must_use]
    pub const fn installed(self) -> bool {
        self.installed
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
    /// `log_exclusive` was requested but another subscriber owns the process.
    #[error("log_exclusive is set but another subscriber is already installed")]
    ForeignSubscriber,
    /// The log file could not be opened.
    #[error("failed to open log destination '{path}': {source}")]
    Destination {
        /// Log file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The log file could not be handed to the daemon user.
    #[error("failed to change owner of '{path}': {source}")]
    Ownership {
        /// Log file path.
        path: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

/// Logging settings extracted from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingPlan {
    /// `EnvFilter` directives.
    pub directives: String,
    /// Output format.
    pub format: LogFormat,
    /// Log file, or stderr when `None`.
    pub destination: Option<Utf8PathBuf>,
    /// Rotation period for the log file.
    pub rotation: Option<RotationPeriod>,
    /// Compression applied to rotated files.
    pub compression: Option<Compression>,
    /// Prefix lines with the resident set size.
    pub log_rss: bool,
    /// Refuse to share the process with another subscriber.
    pub exclusive: bool,
    /// Keep an existing subscriber without complaint.
    pub optional: bool,
    /// User and group owning the log file.
    pub owner: (Option<u32>, Option<u32>),
}

impl LoggingPlan {
    /// Extracts the logging settings of `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let id = |value: Result<i64, _>| value.ok().and_then(|id: i64| u32::try_from(id).ok());
        Self {
            directives: directives(config),
            format: config.logger_format,
            destination: config.logger_dest.clone(),
            rotation: config.logger_dest_rotation_period,
            compression: config.logger_dest_rotation_compression,
            log_rss: config.log_rss,
            exclusive: config.log_exclusive,
            optional: config.log_optional,
            owner: (id(config.get_uid()), id(config.get_gid())),
        }
    }
}

/// Configures the global tracing subscriber when invoked for the first time.
///
/// Later calls return immediately. When a subscriber from elsewhere is
/// already installed, `log_optional` keeps it silently, `log_exclusive`
/// fails, and otherwise the existing subscriber is kept with a warning.
/// `pool` compresses rotated files off the logging thread.
pub fn initialise(
    plan: &LoggingPlan,
    pool: Option<Arc<WorkerPool>>,
) -> Result<TelemetryHandle, TelemetryError> {
    if let Some(installed) = TELEMETRY_GUARD.get() {
        debug!(target: TELEMETRY_TARGET, "logging already configured");
        return Ok(TelemetryHandle {
            installed: *installed,
        });
    }
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(plan, pool))
        .map(|installed| TelemetryHandle {
            installed: *installed,
        })
}

fn install_subscriber(
    plan: &LoggingPlan,
    pool: Option<Arc<WorkerPool>>,
) -> Result<bool, TelemetryError> {
    if tracing::dispatcher::has_been_set() {
        return keep_foreign_subscriber(plan);
    }

    let filter = EnvFilter::try_new(&plan.directives)
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let (writer, ansi) = match &plan.destination {
        Some(path) => (open_destination(plan, path, pool)?, false),
        None => (BoxMakeWriter::new(io::stderr), io::stderr().is_terminal()),
    };
    let timer = LogTimer::new(rss_sampler(plan.log_rss));

    let builder = |filter: EnvFilter, writer: BoxMakeWriter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(writer)
            .with_ansi(ansi)
            .with_timer(timer.clone())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match plan.format {
        LogFormat::Json => Box::new(builder(filter, writer).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter, writer).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)?;
    info!(
        target: TELEMETRY_TARGET,
        filter = %plan.directives,
        destination = plan.destination.as_ref().map_or("stderr", |path| path.as_str()),
        "logging configured"
    );
    Ok(true)
}

/// Decides what happens when another subscriber owns the process.
/// `log_optional` wins over `log_exclusive`.
fn keep_foreign_subscriber(plan: &LoggingPlan) -> Result<bool, TelemetryError> {
    if plan.optional {
        debug!(
            target: TELEMETRY_TARGET,
            "keeping existing subscriber because log_optional is set"
        );
        return Ok(false);
    }
    if plan.exclusive {
        return Err(TelemetryError::ForeignSubscriber);
    }
    warn!(
        target: TELEMETRY_TARGET,
        "another subscriber is installed; daemon logging settings are ignored"
    );
    Ok(false)
}

fn open_destination(
    plan: &LoggingPlan,
    path: &Utf8PathBuf,
    pool: Option<Arc<WorkerPool>>,
) -> Result<BoxMakeWriter, TelemetryError> {
    let file = RotatingFile::open(path, plan.rotation, plan.compression, pool).map_err(|source| {
        TelemetryError::Destination {
            path: path.clone(),
            source,
        }
    })?;
    let (uid, gid) = plan.owner;
    if uid.is_some() || gid.is_some() {
        nix::unistd::chown(
            path.as_std_path(),
            uid.map(Uid::from_raw),
            gid.map(Gid::from_raw),
        )
        .map_err(|source| TelemetryError::Ownership {
            path: path.clone(),
            source,
        })?;
    }
    Ok(BoxMakeWriter::new(Mutex::new(file)))
}

fn rss_sampler(enabled: bool) -> Option<Arc<dyn MemorySampler>> {
    if !enabled {
        return None;
    }
    match SysinfoSampler::new() {
        Ok(sampler) => Some(Arc::new(sampler)),
        Err(error) => {
            warn!(target: TELEMETRY_TARGET, error = %error, "log_rss disabled");
            None
        }
    }
}
