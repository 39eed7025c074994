//! Loads, merges and persists the daemon configuration.
//!
//! Precedence, lowest first: built-in defaults, the configuration file, the
//! command line, and finally values forced by the application through
//! [`Config::define_service`].

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::cli::{self, CliArgs};
use crate::error::ConfigError;
use crate::files::atomic_write;
use crate::migrate::{self, MigrationReport};
use crate::model::{Config, DaemonFlavor};

const LOADER_TARGET: &str = "axon_config::loader";

/// Entry point for turning a daemon name and argument vector into a
/// [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    base_dir: Utf8PathBuf,
    flavor: DaemonFlavor,
}

impl ConfigLoader {
    /// Loader resolving relative paths against the current directory.
    pub fn current(flavor: DaemonFlavor) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir()
            .map_err(|source| ConfigError::WorkingDirectory { source })?;
        let base_dir = Utf8PathBuf::from_path_buf(cwd).map_err(|path| ConfigError::NonUtf8Path {
            path: path.display().to_string(),
        })?;
        Ok(Self::in_dir(base_dir, flavor))
    }

    /// Loader resolving relative paths against `base_dir`.
    #[must_use]
    pub fn in_dir(base_dir: impl Into<Utf8PathBuf>, flavor: DaemonFlavor) -> Self {
        Self {
            base_dir: base_dir.into(),
            flavor,
        }
    }

    /// Directory relative paths are resolved against.
    #[must_use]
    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    /// Reads the configuration file, migrates it, overlays the command line
    /// and writes the file back when it was missing, upgraded, or gained a
    /// freshly generated identity.
    ///
    /// `argv` includes the program name.
    pub fn parse_config<I, T>(&self, daemon_name: &str, argv: I) -> Result<LoadedConfig, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let (static_args, overrides) = cli::split_overrides(argv.into_iter().map(Into::into))?;
        let cli = CliArgs::try_parse_from(static_args)?;
        let path = self.config_path(daemon_name, &cli);

        let (mut config, root_key, report) = match read_non_empty(&path)? {
            Some(text) => {
                let (key, config, report) = parse_document(&path, &text)?;
                (config, key, Some(report))
            }
            None => {
                info!(
                    target: LOADER_TARGET,
                    path = %path,
                    "configuration file missing, using defaults"
                );
                let config = Config::defaults(daemon_name, self.flavor, &self.base_dir);
                (config, self.flavor.root_key().to_owned(), None)
            }
        };

        if config.name.is_none() {
            config.name = Some(daemon_name.to_owned());
        }
        let identity_generated = config.ensure_identity();
        let loaded_names = config.registered_names();

        cli.apply(&mut config);
        config.pending_overrides = cli::apply_matching_overrides(&mut config, overrides);
        if !config.pending_overrides.is_empty() {
            debug!(
                target: LOADER_TARGET,
                pending = config.pending_overrides.len(),
                "listener overrides deferred until the application defines its listeners"
            );
        }
        config.sanitize(&self.base_dir);

        let loaded = LoadedConfig {
            config,
            path,
            root_key,
            loaded_names,
        };
        let upgraded = report.is_some_and(|report| report.upgraded());
        if report.is_none() || identity_generated || upgraded {
            loaded.write()?;
        }
        Ok(loaded)
    }

    fn config_path(&self, daemon_name: &str, cli: &CliArgs) -> Utf8PathBuf {
        let path = cli
            .config_file
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from(format!("{daemon_name}.yaml")));
        if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        }
    }
}

/// A merged configuration together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Merged configuration.
    pub config: Config,
    path: Utf8PathBuf,
    root_key: String,
    loaded_names: (BTreeSet<String>, BTreeSet<String>),
}

impl LoadedConfig {
    /// File the configuration is persisted to.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Top-level key of the document.
    #[must_use]
    pub fn root_key(&self) -> &str {
        &self.root_key
    }

    /// Applies the listener overrides still pending once the application
    /// has defined its listeners.
    ///
    /// # Errors
    ///
    /// Fails on the first override that no listener takes.
    pub fn finish_overrides(&mut self) -> Result<(), ConfigError> {
        let pending = std::mem::take(&mut self.config.pending_overrides);
        let unmatched = cli::apply_matching_overrides(&mut self.config, pending);
        match unmatched.first() {
            Some(entry) => Err(entry.unmatched()),
            None => Ok(()),
        }
    }

    /// Writes the configuration when the set of listener or store names
    /// changed since it was loaded. Returns whether the file was written.
    pub fn persist_if_changed(&mut self) -> Result<bool, ConfigError> {
        let current = self.config.registered_names();
        if current == self.loaded_names {
            return Ok(false);
        }
        self.write()?;
        self.loaded_names = current;
        Ok(true)
    }

    /// Serialises the configuration to its file.
    pub fn write(&self) -> Result<(), ConfigError> {
        let text = render(&self.root_key, &self.config)?;
        atomic_write(self.path.as_std_path(), text.as_bytes()).map_err(|source| {
            ConfigError::Write {
                path: self.path.clone(),
                source,
            }
        })?;
        info!(
            target: LOADER_TARGET,
            path = %self.path,
            "configuration file written"
        );
        Ok(())
    }
}

/// Renders the configuration as a YAML document under `root_key`.
pub fn render(root_key: &str, config: &Config) -> Result<String, ConfigError> {
    let body = serde_json::to_value(config).map_err(|error| ConfigError::Serialise {
        message: error.to_string(),
    })?;
    let mut document = Map::new();
    document.insert(root_key.to_owned(), body);
    serde_saphyr::to_string(&Value::Object(document)).map_err(|error| ConfigError::Serialise {
        message: error.to_string(),
    })
}

fn read_non_empty(path: &Utf8Path) -> Result<Option<String>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(text) if text.trim().is_empty() => Ok(None),
        Ok(text) => Ok(Some(text)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Parses and migrates a configuration document.
///
/// Returns the document's root key, the typed configuration and what the
/// migration chain did.
pub fn parse_document(
    path: &Utf8Path,
    text: &str,
) -> Result<(String, Config, MigrationReport), ConfigError> {
    let document: Value = serde_saphyr::from_str(text).map_err(|parse_error| {
        let message = parse_error.to_string();
        error!(
            target: LOADER_TARGET,
            path = %path,
            error = %message,
            content = %text,
            "malformed configuration file"
        );
        ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        }
    })?;

    let (root_key, mut body) = split_root(path, document)?;
    let report = migrate::migrate_document(&mut body).map_err(|source| {
        error!(
            target: LOADER_TARGET,
            path = %path,
            error = %source,
            content = %text,
            "configuration migration failed"
        );
        ConfigError::Migration {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let config = serde_json::from_value::<Config>(Value::Object(body)).map_err(|schema_error| {
        let message = schema_error.to_string();
        error!(
            target: LOADER_TARGET,
            path = %path,
            error = %message,
            content = %text,
            "configuration does not match the daemon model"
        );
        ConfigError::Schema {
            path: path.to_path_buf(),
            message,
        }
    })?;
    Ok((root_key, config, report))
}

fn split_root(path: &Utf8Path, document: Value) -> Result<(String, Map<String, Value>), ConfigError> {
    let Value::Object(top) = document else {
        return Err(ConfigError::Shape {
            path: path.to_path_buf(),
            found: 0,
        });
    };
    if top.len() != 1 {
        return Err(ConfigError::Shape {
            path: path.to_path_buf(),
            found: top.len(),
        });
    }
    let Some((root_key, body)) = top.into_iter().next() else {
        return Err(ConfigError::Shape {
            path: path.to_path_buf(),
            found: 0,
        });
    };
    match body {
        Value::Object(body) => Ok((root_key, body)),
        Value::Null => Ok((root_key, Map::new())),
        _ => Err(ConfigError::Shape {
            path: path.to_path_buf(),
            found: 1,
        }),
    }
}
