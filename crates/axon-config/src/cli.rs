//! Command-line surface of the daemon.
//!
//! One flag exists per scalar, boolean and string-list field of [`Config`].
//! Fields that only make sense in the file (identity, version, listener and
//! store records) have no flag. Listener endpoints are overridden through
//! dynamic `--host-<name>`, `--port-<name>` and `--assets-<name>[-<url>]`
//! arguments, which are split off before the static flags are parsed.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use clap::Parser;
use tracing::debug;

use crate::error::ConfigError;
use crate::model::{
    Compression, Config, ListenerConfig, LogFormat, RotationPeriod, SubApp,
};
use crate::registry::Named;

const HOST_PREFIX: &str = "--host-";
const PORT_PREFIX: &str = "--port-";
const ASSETS_PREFIX: &str = "--assets-";

/// Static command-line flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Parser)]
#[command(disable_version_flag = true, rename_all = "kebab-case")]
pub struct CliArgs {
    /// Configuration file; defaults to `<daemon name>.yaml`.
    #[arg(short = 'c', long)]
    pub config_file: Option<Utf8PathBuf>,
    /// Detach into the background.
    #[arg(long)]
    pub daemonize: bool,
    /// Working directory.
    #[arg(long)]
    pub workdir: Option<Utf8PathBuf>,
    /// User to switch to after binding.
    #[arg(long)]
    pub uid: Option<String>,
    /// Group to switch to after binding.
    #[arg(long)]
    pub gid: Option<String>,
    /// Supplementary groups to switch to after binding.
    #[arg(long, num_args = 1..)]
    pub gids: Option<Vec<String>>,
    /// Pid file path.
    #[arg(long)]
    pub pid_file: Option<Utf8PathBuf>,
    /// Log file path.
    #[arg(long)]
    pub logger_dest: Option<Utf8PathBuf>,
    /// Log line format: `json` or `compact`.
    #[arg(long)]
    pub logger_format: Option<LogFormat>,
    /// Log rotation period: DAILY, WEEKLY or MONTHLY.
    #[arg(long)]
    pub logger_dest_rotation_period: Option<RotationPeriod>,
    /// Compression of rotated log files.
    #[arg(long)]
    pub logger_dest_rotation_compression: Option<Compression>,
    /// Refuse to start when a log subscriber is already installed, unless
    /// --log-optional is also given.
    #[arg(long)]
    pub log_exclusive: bool,
    /// Keep an already installed log subscriber without warning.
    #[arg(long)]
    pub log_optional: bool,
    /// Prefix log lines with the resident memory size.
    #[arg(long)]
    pub log_rss: bool,
    /// Log protocol events.
    #[arg(long)]
    pub log_protocol: bool,
    /// Log SQL statements.
    #[arg(long)]
    pub log_queries: bool,
    /// Log SQL statements with results.
    #[arg(long)]
    pub log_results: bool,
    /// Log SQL driver internals.
    #[arg(long)]
    pub log_sql: bool,
    /// Debug mode.
    #[arg(long)]
    pub debug: bool,
    /// Warn about blocking work on accept loop threads.
    #[arg(long)]
    pub debug_reactor: bool,
    /// Store bound as the default for the data layer.
    #[arg(long)]
    pub main_store: Option<String>,
    /// Skip schema migrations.
    #[arg(long)]
    pub skip_migration: bool,
    /// Print version information and exit.
    #[arg(long)]
    pub version: bool,
    /// Create databases and schemas, then exit.
    #[arg(long)]
    pub bootstrap: bool,
    /// Write the merged configuration file and exit.
    #[arg(long)]
    pub write_config: bool,
    /// Load everything without serving.
    #[arg(long)]
    pub dry_run: bool,
    /// Drop every table of the main store, then exit.
    #[arg(long)]
    pub drop_all_tables: bool,
    /// Write interface documents to this directory, then exit.
    #[arg(long, value_name = "DIR")]
    pub write_interface: Option<Utf8PathBuf>,
}

macro_rules! override_values {
    ($cli:expr, $config:expr; $($field:ident),* $(,)?) => {
        $(
            if let Some(value) = &$cli.$field {
                $config.$field = Some(value.clone());
            }
        )*
    };
}

macro_rules! override_flags {
    ($cli:expr, $config:expr; $($field:ident),* $(,)?) => {
        $(
            if $cli.$field {
                $config.$field = true;
            }
        )*
    };
}

impl CliArgs {
    /// Overlays the command line on `config`; unset and `false` values leave
    /// the file value in place.
    pub fn apply(&self, config: &mut Config) {
        override_values!(self, config;
            workdir, uid, gid, gids, pid_file, logger_dest,
            logger_dest_rotation_period, logger_dest_rotation_compression, main_store,
        );
        override_flags!(self, config;
            daemonize, log_exclusive, log_optional, log_rss, log_protocol, log_queries,
            log_results, log_sql, debug, debug_reactor, skip_migration,
        );
        if let Some(format) = self.logger_format {
            config.logger_format = format;
        }

        config.run.version = self.version;
        config.run.bootstrap = self.bootstrap;
        config.run.write_config = self.write_config;
        config.run.dry_run = self.dry_run;
        config.run.drop_all_tables = self.drop_all_tables;
        config.run.write_interface.clone_from(&self.write_interface);
    }
}

/// A dynamic per-listener override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerOverride {
    /// `--host-<name>=HOST`
    Host {
        /// Listener name.
        listener: String,
        /// New bind host.
        host: String,
    },
    /// `--port-<name>=PORT`
    Port {
        /// Listener name.
        listener: String,
        /// New bind port.
        port: u16,
    },
    /// `--assets-<name>[-<url>]=DIR`
    Assets {
        /// Full argument key, matched against static file sub-applications.
        key: String,
        /// New asset directory.
        dir: Utf8PathBuf,
    },
}

/// Splits dynamic listener overrides from the static arguments.
///
/// Both `--port-web=8080` and `--port-web 8080` are accepted.
pub fn split_overrides(
    args: impl IntoIterator<Item = OsString>,
) -> Result<(Vec<OsString>, Vec<ListenerOverride>), ConfigError> {
    let mut remaining = Vec::new();
    let mut overrides = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let Some(text) = arg.to_str() else {
            remaining.push(arg);
            continue;
        };
        if !is_override(text) {
            remaining.push(arg);
            continue;
        }
        let (key, value) = match text.split_once('=') {
            Some((key, value)) => (key.to_owned(), value.to_owned()),
            None => {
                let value = args
                    .next()
                    .and_then(|value| value.into_string().ok())
                    .ok_or_else(|| ConfigError::Override {
                        argument: text.to_owned(),
                        reason: "a value is required".to_owned(),
                    })?;
                (text.to_owned(), value)
            }
        };
        overrides.push(parse_override(key, value)?);
    }
    Ok((remaining, overrides))
}

fn is_override(arg: &str) -> bool {
    [HOST_PREFIX, PORT_PREFIX, ASSETS_PREFIX]
        .iter()
        .any(|prefix| arg.strip_prefix(prefix).is_some_and(|rest| !rest.is_empty()))
}

fn parse_override(key: String, value: String) -> Result<ListenerOverride, ConfigError> {
    if let Some(listener) = key.strip_prefix(HOST_PREFIX) {
        return Ok(ListenerOverride::Host {
            listener: listener.to_owned(),
            host: value,
        });
    }
    if let Some(listener) = key.strip_prefix(PORT_PREFIX) {
        let port = value.parse::<u16>().map_err(|error| ConfigError::Override {
            argument: format!("{key}={value}"),
            reason: error.to_string(),
        })?;
        return Ok(ListenerOverride::Port {
            listener: listener.to_owned(),
            port,
        });
    }
    Ok(ListenerOverride::Assets {
        key,
        dir: Utf8PathBuf::from(value),
    })
}

impl ListenerOverride {
    /// Applies the override to `listener` when it addresses it. Returns
    /// whether anything changed.
    pub fn apply_to(&self, listener: &mut ListenerConfig) -> bool {
        match self {
            Self::Host { listener: name, host } => {
                if listener.name() != name {
                    return false;
                }
                debug!(listener = %name, host = %host, "overriding listener host");
                listener.server_mut().host.clone_from(host);
                true
            }
            Self::Port { listener: name, port } => {
                if listener.name() != name {
                    return false;
                }
                debug!(listener = %name, port, "overriding listener port");
                listener.server_mut().port = *port;
                true
            }
            Self::Assets { key, dir } => apply_assets(listener, key, dir),
        }
    }

    /// Error reported when no listener takes the override.
    #[must_use]
    pub fn unmatched(&self) -> ConfigError {
        match self {
            Self::Host { listener, .. } => ConfigError::UnknownListener {
                argument: format!("{HOST_PREFIX}{listener}"),
                listener: listener.clone(),
            },
            Self::Port { listener, .. } => ConfigError::UnknownListener {
                argument: format!("{PORT_PREFIX}{listener}"),
                listener: listener.clone(),
            },
            Self::Assets { key, dir } => ConfigError::Override {
                argument: format!("{key}={dir}"),
                reason: "no static file sub-application matches".to_owned(),
            },
        }
    }
}

/// Applies each override to the listeners it addresses and returns those
/// no configured listener took.
pub fn apply_matching_overrides(
    config: &mut Config,
    overrides: Vec<ListenerOverride>,
) -> Vec<ListenerOverride> {
    overrides
        .into_iter()
        .filter(|entry| {
            let mut applied = false;
            for listener in config.services.iter_mut() {
                applied |= entry.apply_to(listener);
            }
            !applied
        })
        .collect()
}

/// Applies dynamic overrides to the configured listeners.
///
/// # Errors
///
/// Fails on the first override that no configured listener takes.
pub fn apply_listener_overrides(
    config: &mut Config,
    overrides: &[ListenerOverride],
) -> Result<(), ConfigError> {
    let unmatched = apply_matching_overrides(config, overrides.to_vec());
    match unmatched.first() {
        Some(entry) => Err(entry.unmatched()),
        None => Ok(()),
    }
}

fn apply_assets(listener: &mut ListenerConfig, key: &str, dir: &Utf8PathBuf) -> bool {
    let ListenerConfig::HttpServer(http) = listener else {
        return false;
    };
    let name = http.server.name.clone();
    let mut matched = false;
    for subapp in &mut http.subapps {
        if subapp.asset_override_key(&name) != key {
            continue;
        }
        if let SubApp::StaticFileServer { path, url, .. } = subapp {
            debug!(listener = %name, url = %url, path = %dir, "overriding asset directory");
            path.clone_from(dir);
            matched = true;
        }
    }
    matched
}
